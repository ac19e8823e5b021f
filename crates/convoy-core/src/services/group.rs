//! Group CRUD with defaults, statistics fill and cascaded delete.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::error;

use crate::cache::Cache;
use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::repository::{ApplicationRepository, EventRepository, GroupRepository};
use crate::types::{self, DocumentStatus, Group, GroupConfig, GroupFilter, GroupStatistics};

pub const DEFAULT_RATE_LIMIT: u32 = 5000;
pub const DEFAULT_RATE_LIMIT_DURATION: &str = "1m";

fn group_cache_key(uid: &str) -> String {
    format!("group:{}", uid)
}

/// Fields accepted when creating or updating a group.
#[derive(Debug, Clone)]
pub struct GroupInput {
    pub name: String,
    pub logo_url: Option<String>,
    pub rate_limit: Option<u32>,
    pub rate_limit_duration: Option<String>,
    pub config: GroupConfig,
}

pub struct GroupService {
    group_repo: Arc<dyn GroupRepository>,
    app_repo: Arc<dyn ApplicationRepository>,
    event_repo: Arc<dyn EventRepository>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
}

impl GroupService {
    pub fn new(
        group_repo: Arc<dyn GroupRepository>,
        app_repo: Arc<dyn ApplicationRepository>,
        event_repo: Arc<dyn EventRepository>,
        cache: Arc<Cache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            group_repo,
            app_repo,
            event_repo,
            cache,
            cache_ttl,
        }
    }

    pub async fn create_group(&self, input: GroupInput) -> Result<Group> {
        validate_group_input(&input)?;

        let now = Utc::now();
        let group = Group {
            uid: types::uid(),
            name: input.name.trim().to_string(),
            logo_url: input.logo_url.unwrap_or_default(),
            config: input.config,
            statistics: None,
            rate_limit: input.rate_limit.filter(|l| *l > 0).unwrap_or(DEFAULT_RATE_LIMIT),
            rate_limit_duration: input
                .rate_limit_duration
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_RATE_LIMIT_DURATION.to_string()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            document_status: DocumentStatus::Active,
        };

        self.group_repo.create_group(&group).await.map_err(|e| {
            error!(error = %e, group = %group.name, "could not create group");
            Error::Internal("failed to create group".to_string())
        })?;

        Ok(group)
    }

    pub async fn update_group(&self, mut group: Group, input: GroupInput) -> Result<Group> {
        validate_group_input(&input)?;

        group.name = input.name.trim().to_string();
        if let Some(logo_url) = input.logo_url {
            group.logo_url = logo_url;
        }
        if let Some(rate_limit) = input.rate_limit.filter(|l| *l > 0) {
            group.rate_limit = rate_limit;
        }
        if let Some(duration) = input.rate_limit_duration.filter(|d| !d.is_empty()) {
            group.rate_limit_duration = duration;
        }
        group.config = input.config;
        group.updated_at = Utc::now();

        self.group_repo.update_group(&group).await.map_err(|e| {
            error!(error = %e, group = %group.uid, "could not update group");
            Error::Internal("an error occurred while updating Group".to_string())
        })?;
        self.cache.delete(&group_cache_key(&group.uid)).await;

        Ok(group)
    }

    /// List groups, trimming outer whitespace off each filter name, and
    /// fill the statistics of every returned group.
    pub async fn get_groups(&self, mut filter: GroupFilter) -> Result<Vec<Group>> {
        for name in filter.names.iter_mut() {
            *name = name.trim().to_string();
        }
        filter.names.retain(|n| !n.is_empty());

        let mut groups = self.group_repo.load_groups(&filter).await.map_err(|e| {
            error!(error = %e, "could not load groups");
            Error::Internal("an error occurred while fetching Groups".to_string())
        })?;

        for group in groups.iter_mut() {
            self.fill_statistics(group).await?;
        }
        Ok(groups)
    }

    /// Read-through cached fetch, used on hot request paths.
    pub async fn find_group_by_id(&self, uid: &str) -> Result<Group> {
        let key = group_cache_key(uid);
        if let Some(group) = self.cache.get::<Group>(&key).await {
            return Ok(group);
        }
        let group = self.group_repo.fetch_group_by_id(uid).await?;
        if let Err(e) = self.cache.set(&key, &group, self.cache_ttl).await {
            error!(error = %e, group = %uid, "could not cache group");
        }
        Ok(group)
    }

    pub async fn fill_statistics(&self, group: &mut Group) -> Result<()> {
        let messages = self.event_repo.count_group_messages(&group.uid).await;
        let apps = self.app_repo.count_group_applications(&group.uid).await;
        match (messages, apps) {
            (Ok(messages_sent), Ok(total_apps)) => {
                group.statistics = Some(GroupStatistics {
                    messages_sent,
                    total_apps,
                });
                Ok(())
            }
            (messages, apps) => {
                if let Err(e) = messages.and(apps) {
                    error!(error = %e, group = %group.uid, "could not count group statistics");
                }
                Err(Error::Internal(
                    "failed to count group statistics".to_string(),
                ))
            }
        }
    }

    /// Best-effort cascade: group, then its apps, then its events. A
    /// failed step surfaces its own error kind and earlier steps are not
    /// rolled back.
    pub async fn delete_group(&self, uid: &str) -> Result<()> {
        self.group_repo.delete_group(uid).await.map_err(|e| {
            error!(error = %e, group = %uid, "could not delete group");
            Error::Internal("failed to delete group".to_string())
        })?;
        self.cache.delete(&group_cache_key(uid)).await;

        self.app_repo
            .delete_group_applications(uid)
            .await
            .map_err(|e| {
                error!(error = %e, group = %uid, "could not delete group apps");
                Error::Internal("failed to delete group apps".to_string())
            })?;

        self.event_repo.delete_group_events(uid).await.map_err(|e| {
            error!(error = %e, group = %uid, "could not delete group events");
            Error::Internal("failed to delete group events".to_string())
        })?;

        Ok(())
    }
}

fn validate_group_input(input: &GroupInput) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(Error::Invalid(
            "name:please provide a valid name".to_string(),
        ));
    }
    if let Some(duration) = input.rate_limit_duration.as_deref().filter(|d| !d.is_empty()) {
        parse_duration(duration).map_err(|_| {
            Error::Invalid("rate_limit_duration:please provide a valid duration".to_string())
        })?;
    }
    validate_group_config(&input.config)
}

pub fn validate_group_config(config: &GroupConfig) -> Result<()> {
    if config.strategy.kind != "default" {
        return Err(Error::Invalid("strategy.type:unsupported value".to_string()));
    }
    if config.strategy.default.interval_seconds < 1 {
        return Err(Error::Invalid(
            "strategy.default.interval_seconds:must be at least 1".to_string(),
        ));
    }
    if config.strategy.default.retry_limit < 1 {
        return Err(Error::Invalid(
            "strategy.default.retry_limit:must be at least 1".to_string(),
        ));
    }
    if config.signature.header.trim().is_empty() {
        return Err(Error::Invalid(
            "signature.header:please provide a valid signature header".to_string(),
        ));
    }
    Ok(())
}
