//! Realm-chain authentication middleware and group-scope guards.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use convoy_core::auth::{AuthenticatedUser, Credential, Realm};
use convoy_core::error::Error;
use convoy_core::services::security::SecurityService;

use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the request credential through the configured realm chain and
/// stash the resulting identity in the request extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // An absent header still flows through the chain so a configured
    // noop realm can wave development traffic through.
    let credential = if header.is_empty() {
        Credential::Bearer(String::new())
    } else {
        Credential::from_header(header)?
    };

    let user = state.realm_chain.authenticate(&credential).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Non-super-user roles may only touch groups they are scoped to.
pub fn require_group_access(user: &AuthenticatedUser, group_id: &str) -> Result<(), Error> {
    if user.role.has_group(group_id) {
        return Ok(());
    }
    Err(Error::Forbidden(
        "unauthorized to access group".to_string(),
    ))
}

pub fn require_super_user(user: &AuthenticatedUser) -> Result<(), Error> {
    if user.role.is_super_user() {
        return Ok(());
    }
    Err(Error::Forbidden("requires super user".to_string()))
}

/// The `native` realm: bearer keys issued by the security service.
pub struct NativeRealm {
    security: Arc<SecurityService>,
}

impl NativeRealm {
    pub fn new(security: Arc<SecurityService>) -> Self {
        Self { security }
    }
}

#[async_trait::async_trait]
impl Realm for NativeRealm {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn authenticate(
        &self,
        credential: &Credential,
    ) -> Result<Option<AuthenticatedUser>, Error> {
        let Credential::Bearer(token) = credential else {
            return Ok(None);
        };
        if !token.starts_with("CO.") {
            return Ok(None);
        }
        let api_key = self.security.verify_api_key(token).await?;
        Ok(Some(AuthenticatedUser {
            role: api_key.role,
            authenticated_by: "native".to_string(),
        }))
    }
}
