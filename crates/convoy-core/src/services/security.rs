//! API key issuance, verification and revocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::auth::{
    generate_api_key, split_api_key, verify_api_key_secret, KeyType, Role, RoleType,
};
use crate::error::{Error, Result};
use crate::repository::{ApiKeyRepository, GroupRepository};
use crate::types::{
    self, ApiKey, Application, DocumentStatus, Group, Pageable, PaginationData,
};

/// Fields accepted when creating an API key.
#[derive(Debug, Clone)]
pub struct ApiKeyInput {
    pub name: String,
    pub key_type: KeyType,
    pub role: Role,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A created key together with its one-time plaintext.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub api_key: ApiKey,
    pub key: String,
}

pub struct SecurityService {
    group_repo: Arc<dyn GroupRepository>,
    api_key_repo: Arc<dyn ApiKeyRepository>,
}

impl SecurityService {
    pub fn new(group_repo: Arc<dyn GroupRepository>, api_key_repo: Arc<dyn ApiKeyRepository>) -> Self {
        Self {
            group_repo,
            api_key_repo,
        }
    }

    pub async fn create_api_key(&self, input: ApiKeyInput) -> Result<CreatedApiKey> {
        if let Some(expires_at) = input.expires_at {
            if expires_at <= Utc::now() {
                return Err(Error::Invalid("expiry date is invalid".to_string()));
            }
        }
        input.role.validate()?;
        self.ensure_groups_exist(&input.role.groups).await?;

        let generated = generate_api_key();
        let now = Utc::now();
        let api_key = ApiKey {
            uid: types::uid(),
            mask_id: generated.mask_id,
            name: input.name,
            key_type: input.key_type,
            role: input.role,
            hash: generated.hash,
            salt: generated.salt,
            expires_at: input.expires_at,
            revoked_at: None,
            created_at: now,
            updated_at: now,
            document_status: DocumentStatus::Active,
        };

        self.api_key_repo.create_api_key(&api_key).await.map_err(|e| {
            error!(error = %e, "could not create api key");
            Error::Internal("failed to create api key".to_string())
        })?;

        Ok(CreatedApiKey {
            api_key,
            key: generated.key,
        })
    }

    /// Issue a `ui_admin` key scoped to exactly one group and one app.
    /// When `base_url` is given, returns a portal link carrying both ids.
    pub async fn create_app_portal_api_key(
        &self,
        group: &Group,
        app: &Application,
        base_url: Option<&str>,
    ) -> Result<(CreatedApiKey, Option<String>)> {
        if app.group_id != group.uid {
            return Err(Error::Invalid("app does not belong to group".to_string()));
        }

        let role = Role {
            kind: RoleType::UiAdmin,
            groups: vec![group.uid.clone()],
            apps: vec![app.uid.clone()],
        };
        let generated = generate_api_key();
        let now = Utc::now();
        let api_key = ApiKey {
            uid: types::uid(),
            mask_id: generated.mask_id,
            name: format!("{} portal key", app.title),
            key_type: KeyType::AppPortal,
            role,
            hash: generated.hash,
            salt: generated.salt,
            expires_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
            document_status: DocumentStatus::Active,
        };

        self.api_key_repo.create_api_key(&api_key).await.map_err(|e| {
            error!(error = %e, "could not create api key");
            Error::Internal("failed to create api key".to_string())
        })?;

        let url = base_url
            .map(|base| format!("{}?groupID={}&appId={}", base, group.uid, app.uid));

        Ok((
            CreatedApiKey {
                api_key,
                key: generated.key,
            },
            url,
        ))
    }

    pub async fn revoke_api_key(&self, uid: &str) -> Result<()> {
        if uid.trim().is_empty() {
            return Err(Error::Invalid("key id is empty".to_string()));
        }
        self.api_key_repo
            .revoke_api_keys(&[uid.to_string()])
            .await
            .map_err(|e| {
                error!(error = %e, key = %uid, "could not revoke api key");
                Error::Internal("failed to revoke api key".to_string())
            })
    }

    pub async fn get_api_key_by_id(&self, uid: &str) -> Result<ApiKey> {
        if uid.trim().is_empty() {
            return Err(Error::Invalid("key id is empty".to_string()));
        }
        match self.api_key_repo.find_api_key_by_id(uid).await {
            Ok(key) => Ok(key),
            Err(Error::NotFound(m)) => Err(Error::NotFound(m)),
            Err(e) => {
                error!(error = %e, key = %uid, "could not fetch api key");
                Err(Error::Internal("failed to fetch api key".to_string()))
            }
        }
    }

    pub async fn update_api_key(&self, uid: &str, role: Role) -> Result<ApiKey> {
        if uid.trim().is_empty() {
            return Err(Error::Invalid("key id is empty".to_string()));
        }
        role.validate()?;
        self.ensure_groups_exist(&role.groups).await?;

        let mut api_key = match self.api_key_repo.find_api_key_by_id(uid).await {
            Ok(key) => key,
            Err(Error::NotFound(m)) => return Err(Error::NotFound(m)),
            Err(e) => {
                error!(error = %e, key = %uid, "could not fetch api key");
                return Err(Error::Internal("failed to fetch api key".to_string()));
            }
        };
        api_key.role = role;
        api_key.updated_at = Utc::now();

        self.api_key_repo.update_api_key(&api_key).await.map_err(|e| {
            error!(error = %e, key = %uid, "could not update api key");
            Error::Internal("failed to update api key".to_string())
        })?;
        Ok(api_key)
    }

    pub async fn get_api_keys(
        &self,
        pageable: Pageable,
    ) -> Result<(Vec<ApiKey>, PaginationData)> {
        self.api_key_repo
            .load_api_keys_paged(pageable)
            .await
            .map_err(|e| {
                error!(error = %e, "could not load api keys");
                Error::Internal("failed to load api keys".to_string())
            })
    }

    /// Verify a presented `CO.<mask>.<secret>` key in constant time and
    /// return the stored record when it is live.
    pub async fn verify_api_key(&self, presented: &str) -> Result<ApiKey> {
        let (mask_id, secret) = split_api_key(presented)?;
        let api_key = self
            .api_key_repo
            .find_api_key_by_mask_id(&mask_id)
            .await
            .map_err(|_| Error::Unauthorized("invalid api key".to_string()))?;

        if !verify_api_key_secret(&secret, &api_key.salt, &api_key.hash) {
            return Err(Error::Unauthorized("invalid api key".to_string()));
        }
        if api_key.revoked_at.is_some() {
            return Err(Error::Unauthorized("api key has been revoked".to_string()));
        }
        if let Some(expires_at) = api_key.expires_at {
            if expires_at <= Utc::now() {
                return Err(Error::Unauthorized("api key has expired".to_string()));
            }
        }
        Ok(api_key)
    }

    async fn ensure_groups_exist(&self, group_ids: &[String]) -> Result<()> {
        let groups = self
            .group_repo
            .fetch_groups_by_ids(group_ids)
            .await
            .map_err(|e| {
                error!(error = %e, "could not fetch groups for role");
                Error::Invalid("invalid group".to_string())
            })?;
        if groups.len() != group_ids.len() {
            return Err(Error::Invalid("cannot find group".to_string()));
        }
        Ok(())
    }
}
