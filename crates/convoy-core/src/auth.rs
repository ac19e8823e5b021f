//! Identity: roles, credentials, API key material and the realm chain.
//!
//! A realm maps a request credential to an authenticated identity. Realms
//! are tried in configuration order; the first one that recognizes the
//! credential decides the outcome, valid or not.

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Prefix carried by every user-visible API key.
pub const API_KEY_PREFIX: &str = "CO";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoleType {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "ui_admin")]
    UiAdmin,
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "super_user")]
    SuperUser,
}

/// Scope attached to an API key or config-file user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    #[serde(rename = "type")]
    pub kind: RoleType,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
}

impl Role {
    pub fn super_user() -> Self {
        Self {
            kind: RoleType::SuperUser,
            groups: Vec::new(),
            apps: Vec::new(),
        }
    }

    pub fn is_super_user(&self) -> bool {
        self.kind == RoleType::SuperUser
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.is_super_user() || self.groups.iter().any(|g| g == group_id)
    }

    /// Scoped roles must name at least one group.
    pub fn validate(&self) -> Result<()> {
        if !self.is_super_user() && self.groups.iter().all(|g| g.trim().is_empty()) {
            return Err(Error::Invalid("invalid api key role".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Api,
    AppPortal,
    Cli,
}

/// Credential extracted from an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer(String),
}

impl Credential {
    /// Parse an `Authorization` header value.
    pub fn from_header(value: &str) -> Result<Self> {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::Unauthorized("authorization failed".to_string()));
            }
            return Ok(Credential::Bearer(token.to_string()));
        }
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|_| Error::Unauthorized("invalid basic credentials".to_string()))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| Error::Unauthorized("invalid basic credentials".to_string()))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| Error::Unauthorized("invalid basic credentials".to_string()))?;
            return Ok(Credential::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        Err(Error::Unauthorized("authorization failed".to_string()))
    }
}

/// Identity resolved by a realm.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub role: Role,
    /// Name of the realm that produced this identity.
    pub authenticated_by: String,
}

/// Freshly generated API key material. `key` is shown to the caller once;
/// only `hash` and `salt` are persisted.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub mask_id: String,
    pub salt: String,
    pub hash: String,
    pub key: String,
}

pub fn generate_api_key() -> GeneratedKey {
    let mut mask = [0u8; 8];
    let mut secret = [0u8; 32];
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut mask);
    OsRng.fill_bytes(&mut secret);
    OsRng.fill_bytes(&mut salt);

    let mask_id = hex::encode(mask);
    let secret = hex::encode(secret);
    let salt = hex::encode(salt);
    let hash = hash_api_key_secret(&secret, &salt);
    let key = format!("{}.{}.{}", API_KEY_PREFIX, mask_id, secret);

    GeneratedKey {
        mask_id,
        salt,
        hash,
        key,
    }
}

/// `hex(SHA256(secret || salt))`.
pub fn hash_api_key_secret(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split `CO.<mask_id>.<secret>` into its parts.
pub fn split_api_key(key: &str) -> Result<(String, String)> {
    let mut parts = key.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(API_KEY_PREFIX), Some(mask), Some(secret)) if !mask.is_empty() && !secret.is_empty() => {
            Ok((mask.to_string(), secret.to_string()))
        }
        _ => Err(Error::Unauthorized("invalid api key".to_string())),
    }
}

/// Constant-time comparison of a presented secret against the stored hash.
pub fn verify_api_key_secret(secret: &str, salt: &str, stored_hash: &str) -> bool {
    let computed = hash_api_key_secret(secret, salt);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

/// One authentication scheme.
///
/// `Ok(None)` means the realm does not handle this credential kind and the
/// chain should keep going. An `Err` means the realm recognized the
/// credential and rejected it, which stops the chain.
#[async_trait::async_trait]
pub trait Realm: Send + Sync {
    fn name(&self) -> &'static str;
    async fn authenticate(&self, credential: &Credential) -> Result<Option<AuthenticatedUser>>;
}

/// Ordered list of realms; the first non-pass-through outcome wins.
pub struct RealmChain {
    realms: Vec<std::sync::Arc<dyn Realm>>,
}

impl RealmChain {
    pub fn new(realms: Vec<std::sync::Arc<dyn Realm>>) -> Self {
        Self { realms }
    }

    pub async fn authenticate(&self, credential: &Credential) -> Result<AuthenticatedUser> {
        for realm in &self.realms {
            if let Some(user) = realm.authenticate(credential).await? {
                return Ok(user);
            }
        }
        Err(Error::Unauthorized("authorization failed".to_string()))
    }
}

/// Accepts anything with a super-user role. Development only.
pub struct NoopRealm;

#[async_trait::async_trait]
impl Realm for NoopRealm {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn authenticate(&self, _credential: &Credential) -> Result<Option<AuthenticatedUser>> {
        Ok(Some(AuthenticatedUser {
            role: Role::super_user(),
            authenticated_by: "noop".to_string(),
        }))
    }
}

/// A user declared in the configuration file for the basic realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

pub struct BasicRealm {
    users: Vec<BasicAuthUser>,
}

impl BasicRealm {
    pub fn new(users: Vec<BasicAuthUser>) -> Self {
        Self { users }
    }
}

#[async_trait::async_trait]
impl Realm for BasicRealm {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Option<AuthenticatedUser>> {
        let Credential::Basic { username, password } = credential else {
            return Ok(None);
        };
        for user in &self.users {
            let name_ok: bool = user.username.as_bytes().ct_eq(username.as_bytes()).into();
            let pass_ok: bool = user.password.as_bytes().ct_eq(password.as_bytes()).into();
            if name_ok && pass_ok {
                return Ok(Some(AuthenticatedUser {
                    role: user.role.clone(),
                    authenticated_by: "basic".to_string(),
                }));
            }
        }
        Err(Error::Unauthorized("invalid basic credentials".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    role: Role,
    exp: i64,
}

pub struct JwtRealm {
    secret: String,
}

impl JwtRealm {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait::async_trait]
impl Realm for JwtRealm {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Option<AuthenticatedUser>> {
        let Credential::Bearer(token) = credential else {
            return Ok(None);
        };
        // Native API keys are also bearer tokens; leave them to that realm.
        if token.starts_with(&format!("{}.", API_KEY_PREFIX)) {
            return Ok(None);
        }
        let data = jsonwebtoken::decode::<JwtClaims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.secret.as_bytes()),
            &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .map_err(|_| Error::Unauthorized("invalid jwt token".to_string()))?;
        Ok(Some(AuthenticatedUser {
            role: data.claims.role,
            authenticated_by: "jwt".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_format() {
        let generated = generate_api_key();
        assert_eq!(generated.mask_id.len(), 16);
        let (mask, secret) = split_api_key(&generated.key).unwrap();
        assert_eq!(mask, generated.mask_id);
        assert_eq!(secret.len(), 64);
        assert!(generated.key.starts_with("CO."));
    }

    #[test]
    fn test_verify_roundtrip_and_bit_flip() {
        let generated = generate_api_key();
        let (_, secret) = split_api_key(&generated.key).unwrap();
        assert!(verify_api_key_secret(&secret, &generated.salt, &generated.hash));

        // Any single-character change must reject.
        let mut flipped = secret.clone().into_bytes();
        flipped[0] = if flipped[0] == b'a' { b'b' } else { b'a' };
        let flipped = String::from_utf8(flipped).unwrap();
        assert!(!verify_api_key_secret(&flipped, &generated.salt, &generated.hash));
    }

    #[test]
    fn test_split_api_key_rejects_garbage() {
        assert!(split_api_key("CO.only-two-parts").is_err());
        assert!(split_api_key("XX.mask.secret").is_err());
        assert!(split_api_key("").is_err());
    }

    #[test]
    fn test_role_validation() {
        let role = Role {
            kind: RoleType::Admin,
            groups: vec![],
            apps: vec![],
        };
        assert_eq!(
            role.validate().unwrap_err().to_string(),
            "invalid api key role"
        );
        assert!(Role::super_user().validate().is_ok());
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&RoleType::SuperUser).unwrap(),
            "\"super_user\""
        );
        assert_eq!(
            serde_json::to_string(&KeyType::AppPortal).unwrap(),
            "\"app_portal\""
        );
    }

    #[test]
    fn test_credential_from_header() {
        let cred = Credential::from_header("Bearer CO.abc.def").unwrap();
        assert_eq!(cred, Credential::Bearer("CO.abc.def".to_string()));

        let encoded = base64::engine::general_purpose::STANDARD.encode("user:pass");
        let cred = Credential::from_header(&format!("Basic {}", encoded)).unwrap();
        assert_eq!(
            cred,
            Credential::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            }
        );

        assert!(Credential::from_header("Token abc").is_err());
    }

    #[tokio::test]
    async fn test_realm_chain_first_match_wins() {
        let chain = RealmChain::new(vec![
            std::sync::Arc::new(JwtRealm::new("s3cret")) as std::sync::Arc<dyn Realm>,
            std::sync::Arc::new(NoopRealm),
        ]);

        // Native-shaped bearer keys pass through the jwt realm to noop.
        let user = chain
            .authenticate(&Credential::Bearer("CO.mask.secret".to_string()))
            .await
            .unwrap();
        assert_eq!(user.authenticated_by, "noop");

        // A malformed jwt is claimed and rejected by the jwt realm.
        let err = chain
            .authenticate(&Credential::Bearer("not-a-jwt".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid jwt token");
    }

    #[tokio::test]
    async fn test_basic_realm() {
        let realm = BasicRealm::new(vec![BasicAuthUser {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            role: Role::super_user(),
        }]);

        let ok = realm
            .authenticate(&Credential::Basic {
                username: "admin".to_string(),
                password: "hunter2".to_string(),
            })
            .await
            .unwrap();
        assert!(ok.is_some());

        let err = realm
            .authenticate(&Credential::Basic {
                username: "admin".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid basic credentials");

        let pass_through = realm
            .authenticate(&Credential::Bearer("CO.a.b".to_string()))
            .await
            .unwrap();
        assert!(pass_through.is_none());
    }
}
