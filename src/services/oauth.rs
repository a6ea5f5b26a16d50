// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth2 refresh-token handling shared by the vendor clients.
//!
//! [`TokenManager`] hands out valid access tokens per user, refreshing them
//! (once, under a per-user lock) when they are about to expire, and turns a
//! failed refresh into [`AppError::ReconnectRequired`] after flagging the
//! stored connection.

use crate::db::WorkoutGateway;
use crate::error::AppError;
use crate::models::{Vendor, VendorConnection};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Result of a refresh-token grant.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present when the vendor rotates refresh tokens
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Performs the refresh-token grant for one vendor.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    fn vendor(&self) -> Vendor;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AppError>;
}

/// Standard OAuth2 token endpoint client.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    vendor: Vendor,
    token_url: String,
    client_id: String,
    client_secret: String,
}

/// Token endpoint response; vendors differ on `expires_at` vs `expires_in`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl OAuthClient {
    pub fn new(
        vendor: Vendor,
        token_url: impl Into<String>,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            vendor,
            token_url: token_url.into(),
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::VendorApi(self.vendor, format!("Token refresh request failed: {}", e))
            })?;

        let body: TokenResponse = read_json(self.vendor, response).await?;
        let expires_at = match (body.expires_at, body.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0).unwrap_or_default(),
            (None, Some(secs)) => Utc::now() + Duration::seconds(secs),
            (None, None) => Utc::now() + Duration::hours(1),
        };

        Ok(TokenGrant {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at,
        })
    }
}

/// Check a vendor response and parse its JSON body.
///
/// 401 and OAuth `400` rejections carry the token-error marker so callers
/// can tell them apart from other failures.
pub(crate) async fn read_json<T: for<'de> Deserialize<'de>>(
    vendor: Vendor,
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            tracing::warn!(vendor = %vendor, "Vendor rate limit hit (429)");
            return Err(AppError::VendorApi(
                vendor,
                AppError::VENDOR_RATE_LIMIT.to_string(),
            ));
        }
        if status.as_u16() == 401 || (status.as_u16() == 400 && body.contains("invalid_grant")) {
            return Err(AppError::VendorApi(
                vendor,
                AppError::VENDOR_TOKEN_ERROR.to_string(),
            ));
        }
        return Err(AppError::VendorApi(
            vendor,
            format!("HTTP {}: {}", status, body),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::VendorApi(vendor, format!("JSON parse error: {}", e)))
}

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token cache, keyed by local user ID.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Shared per-user refresh locks.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Access-token lifecycle for one vendor.
#[derive(Clone)]
pub struct TokenManager {
    db: Arc<dyn WorkoutGateway>,
    refresher: Arc<dyn TokenRefresher>,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

impl TokenManager {
    pub fn new(db: Arc<dyn WorkoutGateway>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            db,
            refresher,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.refresher.vendor()
    }

    /// Get a valid (non-expired) access token for the user.
    ///
    /// Fast path is the in-memory cache. Otherwise take the per-user lock,
    /// re-check the cache, then load the stored connection and refresh it
    /// if it expires within the margin.
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<String, AppError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if let Some(token) = self.cached(user_id, margin) {
            return Ok(token);
        }

        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting.
        if let Some(token) = self.cached(user_id, margin) {
            return Ok(token);
        }

        let connection = self.load_connection(user_id).await?;
        let expires_at = parse_expiry(&connection.expires_at)?;
        if Utc::now() + margin < expires_at {
            self.cache(user_id, &connection.access_token, expires_at);
            return Ok(connection.access_token);
        }

        tracing::info!(user_id, vendor = %self.vendor(), "Access token expired, refreshing");
        self.refresh_locked(connection).await
    }

    /// Refresh regardless of the stored expiry (after a 401).
    pub async fn force_refresh(&self, user_id: &str) -> Result<String, AppError> {
        self.token_cache.remove(user_id);

        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let connection = self.load_connection(user_id).await?;
        self.refresh_locked(connection).await
    }

    /// Run a vendor call, refreshing the token and retrying once if the
    /// vendor rejects it. A second rejection means the user must reconnect.
    pub async fn with_token_retry<T, F, Fut>(&self, user_id: &str, call: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let token = self.get_valid_access_token(user_id).await?;
        match call(token).await {
            Err(e) if e.is_vendor_token_error() => {
                tracing::info!(user_id, vendor = %self.vendor(), "Access token rejected, refreshing once");
            }
            other => return other,
        }

        let token = self.force_refresh(user_id).await?;
        match call(token).await {
            Err(e) if e.is_vendor_token_error() => {
                self.mark_needs_reconnect(user_id).await?;
                Err(AppError::ReconnectRequired(self.vendor()))
            }
            other => other,
        }
    }

    /// Flag the stored connection so the UI asks the user to reconnect.
    pub async fn mark_needs_reconnect(&self, user_id: &str) -> Result<(), AppError> {
        self.token_cache.remove(user_id);
        let Some(mut connection) = self.db.get_connection(user_id, self.vendor()).await? else {
            return Ok(());
        };
        if connection.needs_reconnect {
            return Ok(());
        }
        connection.needs_reconnect = true;
        connection.updated_at = format_utc_rfc3339(Utc::now());
        self.db.upsert_connection(&connection).await?;
        tracing::warn!(user_id, vendor = %self.vendor(), "Connection marked as requiring reconnect");
        Ok(())
    }

    /// Must be called with the user's refresh lock held.
    async fn refresh_locked(&self, connection: VendorConnection) -> Result<String, AppError> {
        let user_id = connection.user_id.clone();
        let grant = match self.refresher.refresh(&connection.refresh_token).await {
            Ok(grant) => grant,
            Err(e) if e.is_vendor_token_error() => {
                // Another instance may have rotated the refresh token first.
                if let Some(token) = self.adopt_newer_token(&connection).await? {
                    return Ok(token);
                }
                tracing::warn!(user_id = %user_id, vendor = %self.vendor(), error = %e, "Token refresh rejected");
                self.mark_needs_reconnect(&user_id).await?;
                return Err(AppError::ReconnectRequired(self.vendor()));
            }
            Err(e) => return Err(e),
        };

        let updated = VendorConnection {
            access_token: grant.access_token.clone(),
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| connection.refresh_token.clone()),
            expires_at: format_utc_rfc3339(grant.expires_at),
            needs_reconnect: false,
            updated_at: format_utc_rfc3339(Utc::now()),
            ..connection
        };
        self.db.upsert_connection(&updated).await?;
        self.cache(&user_id, &grant.access_token, grant.expires_at);

        tracing::info!(user_id = %user_id, vendor = %self.vendor(), "Token refreshed and cached");
        Ok(grant.access_token)
    }

    async fn adopt_newer_token(
        &self,
        stale: &VendorConnection,
    ) -> Result<Option<String>, AppError> {
        let Some(current) = self.db.get_connection(&stale.user_id, self.vendor()).await? else {
            return Ok(None);
        };
        if current.refresh_token == stale.refresh_token || current.needs_reconnect {
            return Ok(None);
        }
        let expires_at = parse_expiry(&current.expires_at)?;
        if expires_at <= Utc::now() {
            return Ok(None);
        }
        tracing::info!(user_id = %stale.user_id, "Refresh race lost, using stored token");
        self.cache(&stale.user_id, &current.access_token, expires_at);
        Ok(Some(current.access_token))
    }

    async fn load_connection(&self, user_id: &str) -> Result<VendorConnection, AppError> {
        let connection = self
            .db
            .get_connection(user_id, self.vendor())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} connection for user {}", self.vendor(), user_id))
            })?;
        if connection.needs_reconnect {
            return Err(AppError::ReconnectRequired(self.vendor()));
        }
        Ok(connection)
    }

    fn cached(&self, user_id: &str, margin: Duration) -> Option<String> {
        let cached = self.token_cache.get(user_id)?;
        (Utc::now() + margin < cached.expires_at).then(|| cached.access_token.clone())
    }

    fn cache(&self, user_id: &str, access_token: &str, expires_at: DateTime<Utc>) {
        self.token_cache.insert(
            user_id.to_string(),
            CachedToken {
                access_token: access_token.to_string(),
                expires_at,
            },
        );
    }

    fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to parse expiry: {}", e)))
}
