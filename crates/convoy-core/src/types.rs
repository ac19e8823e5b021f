//! Domain types for Convoy.
//!
//! These types are database-agnostic and use only serde for serialization.
//! The repository back-ends in `convoy-db` persist them as documents, so
//! every field here round-trips through serde_json.

use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

use crate::auth::{KeyType, Role};

/// Generate an opaque 24-character resource id.
pub fn uid() -> String {
    nanoid!(24)
}

/// Soft-delete marker carried by every persisted document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    Active,
    Deleted,
}

/// Hash function used for outbound HMAC signatures.
///
/// Serde names match the values accepted in group configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA512")]
    Sha512,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA224")]
    Sha224,
    #[serde(rename = "SHA384")]
    Sha384,
    #[serde(rename = "SHA3_224")]
    Sha3_224,
    #[serde(rename = "SHA3_256")]
    Sha3_256,
    #[serde(rename = "SHA3_384")]
    Sha3_384,
    #[serde(rename = "SHA3_512")]
    Sha3_512,
}

/// Webhook endpoint lifecycle.
///
/// `Inactive` means the circuit breaker tripped; `Pending` endpoints are
/// attempted and promoted to `Active` on their first successful delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Active,
    Inactive,
    Pending,
}

/// Per-endpoint delivery lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventDeliveryStatus {
    Scheduled,
    Processing,
    Success,
    Failure,
    Retry,
    Discarded,
}

impl EventDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDeliveryStatus::Scheduled => "Scheduled",
            EventDeliveryStatus::Processing => "Processing",
            EventDeliveryStatus::Success => "Success",
            EventDeliveryStatus::Failure => "Failure",
            EventDeliveryStatus::Retry => "Retry",
            EventDeliveryStatus::Discarded => "Discarded",
        }
    }

    /// Terminal states cannot be left except through a manual replay.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventDeliveryStatus::Success
                | EventDeliveryStatus::Failure
                | EventDeliveryStatus::Discarded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureConfig {
    pub header: String,
    pub hash: HashAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultStrategyConfig {
    pub interval_seconds: u64,
    pub retry_limit: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub default: DefaultStrategyConfig,
}

/// Per-group delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub signature: SignatureConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub disable_endpoint: bool,
    #[serde(default)]
    pub replay_attacks: bool,
}

/// Counts shown on the group listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStatistics {
    pub messages_sent: u64,
    pub total_apps: u64,
}

/// A tenant. Every other entity carries a `group_id` pointing here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
    pub config: GroupConfig,
    /// Filled on demand by the group service, never persisted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub statistics: Option<GroupStatistics>,
    /// Max deliveries admitted per `rate_limit_duration` window.
    pub rate_limit: u32,
    /// Window length as a duration string, e.g. `"1m"`.
    pub rate_limit_duration: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub document_status: DocumentStatus,
}

/// A destination URL owned by an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub uid: String,
    pub target_url: String,
    #[serde(default)]
    pub description: String,
    /// HMAC key for this endpoint's signatures.
    pub secret: String,
    pub status: EndpointStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named collection of endpoints belonging to a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub uid: String,
    pub group_id: String,
    pub title: String,
    #[serde(default)]
    pub support_email: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub document_status: DocumentStatus,
}

impl Application {
    pub fn endpoint(&self, uid: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.uid == uid)
    }

    pub fn active_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.status == EndpointStatus::Active)
    }
}

/// An immutable unit of payload ingested for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub event_type: String,
    /// Number of endpoints the event fanned out to at ingest time.
    pub matched_endpoints: u32,
    pub group_id: String,
    pub app_id: String,
    /// Opaque payload; delivered verbatim as the request body.
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub document_status: DocumentStatus,
}

/// Retry bookkeeping for one delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub num_trials: u16,
    pub retry_limit: u16,
    pub interval_seconds: u64,
    pub next_send_time: DateTime<Utc>,
}

/// A single HTTP send, recorded on the delivery's attempt ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub uid: String,
    #[serde(default)]
    pub ip_address: String,
    pub http_status: u16,
    pub api_version: String,
    #[serde(default)]
    pub request_http_header: String,
    #[serde(default)]
    pub response_http_header: String,
    /// Response body, truncated to the configured cap.
    #[serde(default)]
    pub response_data: String,
    #[serde(default)]
    pub error: String,
    /// True when the attempt received a 2xx within the timeout.
    pub status: bool,
    pub created_at: DateTime<Utc>,
}

/// The per-(event, endpoint) attempt ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDelivery {
    pub uid: String,
    pub group_id: String,
    pub app_id: String,
    pub event_id: String,
    pub endpoint_id: String,
    pub status: EventDeliveryStatus,
    pub metadata: DeliveryMetadata,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
    /// Last error description, empty while none occurred.
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored API key. Only the salted hash of the secret is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub uid: String,
    /// Public prefix used to look the key up during verification.
    pub mask_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub role: Role,
    pub hash: String,
    pub salt: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_status: DocumentStatus,
}

/// Page selector for list operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pageable {
    #[serde(default = "Pageable::first_page")]
    pub page: u64,
    #[serde(default = "Pageable::default_per_page")]
    pub per_page: u64,
    /// `1` ascending, `-1` descending by creation time.
    #[serde(default = "Pageable::default_sort")]
    pub sort: i32,
}

impl Pageable {
    fn first_page() -> u64 {
        1
    }

    fn default_per_page() -> u64 {
        20
    }

    fn default_sort() -> i32 {
        -1
    }

    /// Clamp out-of-range values instead of failing the request.
    pub fn normalize(mut self) -> Self {
        self.page = self.page.max(1);
        self.per_page = self.per_page.max(1);
        if self.sort != 1 {
            self.sort = -1;
        }
        self
    }
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: Self::default_per_page(),
            sort: -1,
        }
    }
}

/// Page description returned alongside list results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationData {
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub prev: u64,
    pub next: u64,
    pub total_page: u64,
}

impl PaginationData {
    pub fn new(total: u64, pageable: Pageable) -> Self {
        let total_page = total.div_ceil(pageable.per_page.max(1));
        let next = if pageable.page < total_page {
            pageable.page + 1
        } else {
            0
        };
        Self {
            total,
            page: pageable.page,
            per_page: pageable.per_page,
            prev: pageable.page.saturating_sub(1),
            next,
            total_page,
        }
    }
}

/// Filter accepted by the group listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupFilter {
    #[serde(default)]
    pub names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_length() {
        assert_eq!(uid().len(), 24);
        assert_ne!(uid(), uid());
    }

    #[test]
    fn test_hash_algorithm_serialization() {
        assert_eq!(
            serde_json::to_string(&HashAlgorithm::Sha256).unwrap(),
            "\"SHA256\""
        );
        assert_eq!(
            serde_json::to_string(&HashAlgorithm::Sha3_512).unwrap(),
            "\"SHA3_512\""
        );
        assert_eq!(
            serde_json::from_str::<HashAlgorithm>("\"MD5\"").unwrap(),
            HashAlgorithm::Md5
        );
        assert!(serde_json::from_str::<HashAlgorithm>("\"sha256\"").is_err());
    }

    #[test]
    fn test_endpoint_status_serialization() {
        assert_eq!(
            serde_json::to_string(&EndpointStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&EndpointStatus::Inactive).unwrap(),
            "\"inactive\""
        );
        assert_eq!(
            serde_json::to_string(&EndpointStatus::Pending).unwrap(),
            "\"pending\""
        );
    }

    #[test]
    fn test_event_delivery_status_roundtrip() {
        for status in [
            EventDeliveryStatus::Scheduled,
            EventDeliveryStatus::Processing,
            EventDeliveryStatus::Success,
            EventDeliveryStatus::Failure,
            EventDeliveryStatus::Retry,
            EventDeliveryStatus::Discarded,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(
                serde_json::from_str::<EventDeliveryStatus>(&json).unwrap(),
                status
            );
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(EventDeliveryStatus::Success.is_terminal());
        assert!(EventDeliveryStatus::Failure.is_terminal());
        assert!(EventDeliveryStatus::Discarded.is_terminal());
        assert!(!EventDeliveryStatus::Scheduled.is_terminal());
        assert!(!EventDeliveryStatus::Processing.is_terminal());
        assert!(!EventDeliveryStatus::Retry.is_terminal());
    }

    #[test]
    fn test_group_config_deserialization() {
        let json = r#"{
            "signature": {"header": "X-Convoy-Signature", "hash": "SHA256"},
            "strategy": {"type": "default", "default": {"interval_seconds": 10, "retry_limit": 3}}
        }"#;
        let config: GroupConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.signature.header, "X-Convoy-Signature");
        assert_eq!(config.strategy.kind, "default");
        assert_eq!(config.strategy.default.interval_seconds, 10);
        assert!(!config.disable_endpoint);
        assert!(!config.replay_attacks);
    }

    #[test]
    fn test_pageable_normalize() {
        let p = Pageable {
            page: 0,
            per_page: 0,
            sort: 7,
        }
        .normalize();
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, 1);
        assert_eq!(p.sort, -1);
    }

    #[test]
    fn test_pagination_data() {
        let data = PaginationData::new(
            45,
            Pageable {
                page: 2,
                per_page: 20,
                sort: -1,
            },
        );
        assert_eq!(data.total_page, 3);
        assert_eq!(data.prev, 1);
        assert_eq!(data.next, 3);

        let last = PaginationData::new(
            45,
            Pageable {
                page: 3,
                per_page: 20,
                sort: -1,
            },
        );
        assert_eq!(last.next, 0);
    }
}
