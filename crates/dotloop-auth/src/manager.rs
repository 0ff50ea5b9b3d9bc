//! Token lifecycle manager
//!
//! Owns the current `CredentialRecord` (in memory, mirrored to a
//! `CredentialStore`) and performs the exchange and refresh grants through a
//! `TokenEndpoint`. Constructed once by the composition root and shared as
//! `Arc<TokenManager>`.
//!
//! Concurrent callers that both see an expired token may both refresh; the
//! last successful response wins.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::authorize::{CallbackParams, PendingAuthorization, build_authorization_url};
use crate::credentials::{CredentialRecord, CredentialStore, now_millis};
use crate::endpoint::TokenEndpoint;
use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

pub struct TokenManager {
    settings: OAuthSettings,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<CredentialRecord>>,
}

impl TokenManager {
    /// Create a manager, seeding in-memory state from the store.
    pub async fn load(
        settings: OAuthSettings,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let current = store.load().await;
        debug!(
            has_credentials = current.is_some(),
            "token manager initialized"
        );
        Self {
            settings,
            endpoint,
            store,
            current: RwLock::new(current),
        }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// True iff an access token is held and has not reached its expiry.
    pub async fn is_valid(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(CredentialRecord::is_valid)
    }

    /// Snapshot of the current record.
    pub async fn credentials(&self) -> Option<CredentialRecord> {
        self.current.read().await.clone()
    }

    /// Current access token, regardless of expiry.
    pub async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|r| r.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(CredentialRecord::has_refresh_token)
    }

    /// Authorization URL for the configured client, with `state` appended when given.
    pub fn authorization_url(&self, state: Option<&str>) -> String {
        build_authorization_url(&self.settings, state)
    }

    /// Start a login attempt with a fresh state value.
    pub fn begin_authorization(&self) -> PendingAuthorization {
        PendingAuthorization::begin(&self.settings)
    }

    /// Verify the callback against the pending login, then exchange the code.
    ///
    /// The redirect URI sent with the exchange is the one the authorization
    /// URL carried, so the relay's own default never applies.
    pub async fn complete_authorization(
        &self,
        pending: &PendingAuthorization,
        callback: &CallbackParams,
    ) -> Result<CredentialRecord> {
        let code = pending.verify(callback)?;
        self.exchange_with_state(
            &code,
            Some(pending.state()),
            Some(&self.settings.redirect_uri),
        )
        .await
    }

    /// Exchange an authorization code for tokens and persist them.
    ///
    /// Stored credentials are left untouched on failure.
    pub async fn exchange(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<CredentialRecord> {
        self.exchange_with_state(code, None, redirect_uri).await
    }

    async fn exchange_with_state(
        &self,
        code: &str,
        state: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<CredentialRecord> {
        if code.is_empty() {
            return Err(Error::MissingCode);
        }

        let issued_at = now_millis();
        let response = self
            .endpoint
            .exchange(code, state, redirect_uri)
            .await
            .map_err(|e| match e {
                Error::Upstream { status, body } => Error::TokenExchange {
                    status: Some(status),
                    body,
                },
                other => other,
            })?;

        let record = CredentialRecord::from_token_response(&response, issued_at, None);
        self.store.save(&record).await?;
        *self.current.write().await = Some(record.clone());

        info!(
            has_refresh_token = record.has_refresh_token(),
            expires_at = ?record.expires_at,
            "authorization code exchanged"
        );
        Ok(record)
    }

    /// Renew the access token with the held refresh token.
    ///
    /// Without a refresh token this fails before any network call and leaves
    /// state alone. Any failure of the grant itself clears all credentials.
    pub async fn refresh(&self) -> Result<CredentialRecord> {
        let Some(refresh_token) = self
            .current
            .read()
            .await
            .as_ref()
            .and_then(|r| r.refresh_token.clone())
            .filter(|t| !t.is_empty())
        else {
            return Err(Error::NoRefreshToken);
        };

        let issued_at = now_millis();
        match self.endpoint.refresh(&refresh_token).await {
            Ok(response) => {
                let record =
                    CredentialRecord::from_token_response(&response, issued_at, Some(refresh_token));
                self.store.save(&record).await?;
                *self.current.write().await = Some(record.clone());
                info!(
                    rotated_refresh_token = response.refresh_token.is_some(),
                    expires_at = ?record.expires_at,
                    "access token refreshed"
                );
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing credentials");
                if let Err(clear_err) = self.clear().await {
                    warn!(error = %clear_err, "failed to clear credentials after refresh failure");
                }
                let (status, body) = e.into_status_and_body();
                Err(Error::TokenRefresh { status, body })
            }
        }
    }

    /// Forget all credentials, in memory and in the store.
    pub async fn clear(&self) -> Result<()> {
        *self.current.write().await = None;
        self.store.clear().await?;
        info!("credentials cleared");
        Ok(())
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
