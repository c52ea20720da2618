//! Authentication strategies composed into [`HttpClient`](crate::http::HttpClient).
//!
//! Static credentials are attached as-is. Token-based strategies acquire a
//! token on first use, keep it in a [`TokenCache`] backed by the state store
//! and drop it when the server rejects it, so the client can log in again and
//! retry once.

use crate::secure_string::SecureString;
use crate::traits::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use intake_core::{load_state, save_state, StateStore};
use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// What a strategy needs to talk to the vendor while logging in.
pub struct AuthContext<'a> {
    pub client: &'a Client,
    pub base_url: &'a str,
}

impl AuthContext<'_> {
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Attaches credentials to outgoing requests.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Adds credentials to a request, logging in first if needed.
    async fn authorize(
        &self,
        ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder>;

    /// Whether `status` means the credentials were rejected.
    fn is_rejection(&self, status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED
    }

    /// Forgets cached credentials. Returns true when logging in again may help.
    async fn invalidate(&self) -> ConnectorResult<bool> {
        Ok(false)
    }

    /// Ends the server-side session, if there is one.
    async fn logout(&self, _ctx: &AuthContext<'_>) -> ConnectorResult<()> {
        Ok(())
    }
}

/// A token obtained from the vendor, persisted between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub token: SecureString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<SecureString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn new(token: impl Into<SecureString>) -> Self {
        Self {
            token: token.into(),
            session_cookie: None,
            expires_at: None,
        }
    }

    pub fn with_cookie(mut self, cookie: Option<SecureString>) -> Self {
        self.session_cookie = cookie;
        self
    }

    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(seconds));
        self
    }

    /// Tokens without an expiry are used until the server rejects them;
    /// others are refreshed a minute early.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map_or(true, |expires| expires - Duration::seconds(60) > now)
    }
}

/// In-process copy of an [`AuthState`], mirrored to a state store.
pub struct TokenCache {
    store: Arc<dyn StateStore>,
    key: String,
    current: RwLock<Option<AuthState>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    /// A cache persisted under `key`.
    pub fn persistent(store: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// The cached state if it is still usable, loading it from the store on
    /// first access.
    pub async fn current(&self) -> ConnectorResult<Option<AuthState>> {
        let now = Utc::now();
        if let Some(state) = self.current.read().await.as_ref() {
            if state.is_usable_at(now) {
                return Ok(Some(state.clone()));
            }
        }

        match load_state::<AuthState>(self.store.as_ref(), &self.key).await? {
            Some(state) if state.is_usable_at(now) => {
                debug!(key = %self.key, "Reusing persisted auth state");
                *self.current.write().await = Some(state.clone());
                Ok(Some(state))
            }
            _ => Ok(None),
        }
    }

    pub async fn store(&self, state: AuthState) -> ConnectorResult<()> {
        save_state(self.store.as_ref(), &self.key, &state).await?;
        *self.current.write().await = Some(state);
        Ok(())
    }

    pub async fn clear(&self) -> ConnectorResult<()> {
        *self.current.write().await = None;
        self.store.delete(&self.key).await?;
        Ok(())
    }

    /// Returns the cached state or runs `refresh` to obtain and store a new one.
    /// Concurrent callers share a single refresh.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> ConnectorResult<AuthState>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult<AuthState>>,
    {
        if let Some(state) = self.current().await? {
            return Ok(state);
        }
        let _guard = self.refresh.lock().await;
        if let Some(state) = self.current().await? {
            return Ok(state);
        }
        let state = refresh().await?;
        self.store(state.clone()).await?;
        Ok(state)
    }
}

/// No credentials.
pub struct NoAuth;

#[async_trait]
impl AuthStrategy for NoAuth {
    async fn authorize(
        &self,
        _ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        Ok(request)
    }
}

/// A fixed header, e.g. an API key.
pub struct HeaderAuth {
    name: String,
    value: SecureString,
}

impl HeaderAuth {
    pub fn new(name: impl Into<String>, value: impl Into<SecureString>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for HeaderAuth {
    async fn authorize(
        &self,
        _ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        Ok(request.header(self.name.as_str(), self.value.expose_secret()))
    }
}

/// A token passed as a query parameter.
pub struct QueryTokenAuth {
    param: String,
    value: SecureString,
}

impl QueryTokenAuth {
    pub fn new(param: impl Into<String>, value: impl Into<SecureString>) -> Self {
        Self {
            param: param.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for QueryTokenAuth {
    async fn authorize(
        &self,
        _ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        Ok(request.query(&[(self.param.as_str(), self.value.expose_secret())]))
    }
}

/// OAuth2 bearer tokens from a server-to-server account-credentials grant,
/// refreshed on expiry or rejection.
///
/// The client ID and secret go in basic auth on the token request; the
/// account ID and grant type go in the query.
pub struct OAuth2Auth {
    token_url: String,
    account_id: String,
    client_id: String,
    client_secret: SecureString,
    cache: TokenCache,
}

impl OAuth2Auth {
    pub fn new(
        token_url: impl Into<String>,
        account_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<SecureString>,
        cache: TokenCache,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            account_id: account_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache,
        }
    }

    async fn request_token(&self, client: &Client) -> ConnectorResult<AuthState> {
        info!("Fetching new OAuth2 token");

        let request = client
            .post(&self.token_url)
            .query(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.account_id.as_str()),
            ])
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()));

        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::AuthenticationFailed(format!(
                "OAuth2 token request failed: {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: Option<i64>,
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        let state = AuthState::new(token.access_token);
        Ok(match token.expires_in {
            Some(secs) => state.expiring_in(secs),
            None => state,
        })
    }
}

#[async_trait]
impl AuthStrategy for OAuth2Auth {
    async fn authorize(
        &self,
        ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        let state = self
            .cache
            .get_or_refresh(|| self.request_token(ctx.client))
            .await?;
        Ok(request.bearer_auth(state.token.expose_secret()))
    }

    async fn invalidate(&self) -> ConnectorResult<bool> {
        self.cache.clear().await?;
        Ok(true)
    }
}

/// Exchanges an API key for a JWT at a vendor endpoint.
///
/// The key is posted as `{"key": .., "scopes": [..]}` and the `jwt` field of
/// the response is sent as `Authorization: JWT <jwt>`.
pub struct JwtExchangeAuth {
    path: String,
    api_key: SecureString,
    scopes: Vec<String>,
    cache: TokenCache,
}

impl JwtExchangeAuth {
    pub fn new(
        path: impl Into<String>,
        api_key: impl Into<SecureString>,
        scopes: Vec<String>,
        cache: TokenCache,
    ) -> Self {
        Self {
            path: path.into(),
            api_key: api_key.into(),
            scopes,
            cache,
        }
    }

    async fn exchange(&self, ctx: &AuthContext<'_>) -> ConnectorResult<AuthState> {
        info!("Exchanging API key for JWT");

        let response = ctx
            .client
            .post(ctx.url(&self.path))
            .json(&json!({
                "key": self.api_key.expose_secret(),
                "scopes": self.scopes,
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(ConnectorError::AuthenticationFailed(
                    "Authorization Error: make sure API Key is correctly set".to_string(),
                ))
            }
            status if !status.is_success() => {
                return Err(ConnectorError::AuthenticationFailed(format!(
                    "Token exchange failed: {}",
                    status
                )))
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        let jwt = body
            .get("jwt")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::InvalidResponse("Token response has no jwt".into()))?;
        Ok(AuthState::new(jwt))
    }
}

#[async_trait]
impl AuthStrategy for JwtExchangeAuth {
    async fn authorize(
        &self,
        ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        let state = self.cache.get_or_refresh(|| self.exchange(ctx)).await?;
        Ok(request.header(
            AUTHORIZATION,
            format!("JWT {}", state.token.expose_secret()),
        ))
    }

    async fn invalidate(&self) -> ConnectorResult<bool> {
        self.cache.clear().await?;
        Ok(true)
    }
}

/// Username/password login that yields a session token plus a session cookie.
///
/// The login response carries the token under `response.token`. When the
/// server returns none because the account already holds a session, the login
/// is repeated with `releaseSession` set.
pub struct SessionLoginAuth {
    login_path: String,
    username: String,
    password: SecureString,
    token_header: String,
    cookie_name: String,
    cache: TokenCache,
}

impl SessionLoginAuth {
    pub fn new(
        login_path: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<SecureString>,
        token_header: impl Into<String>,
        cookie_name: impl Into<String>,
        cache: TokenCache,
    ) -> Self {
        Self {
            login_path: login_path.into(),
            username: username.into(),
            password: password.into(),
            token_header: token_header.into(),
            cookie_name: cookie_name.into(),
            cache,
        }
    }

    async fn login(&self, ctx: &AuthContext<'_>) -> ConnectorResult<AuthState> {
        info!(username = %self.username, "Logging in");

        let mut body = json!({
            "username": self.username,
            "password": self.password.expose_secret(),
        });
        if let Some(state) = self.login_once(ctx, &body).await? {
            return Ok(state);
        }

        warn!("Login returned no token, retrying with releaseSession");
        body["releaseSession"] = json!("true");
        self.login_once(ctx, &body).await?.ok_or_else(|| {
            ConnectorError::AuthenticationFailed("Could not retrieve login token".to_string())
        })
    }

    async fn login_once(
        &self,
        ctx: &AuthContext<'_>,
        body: &Value,
    ) -> ConnectorResult<Option<AuthState>> {
        let response = ctx
            .client
            .post(ctx.url(&self.login_path))
            .json(body)
            .send()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        let cookie = session_cookie(&response, &self.cookie_name);
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = payload
                .get("error_msg")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(ConnectorError::AuthenticationFailed(message));
        }

        let token = match payload.pointer("/response/token") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Ok(None),
        };
        Ok(Some(AuthState::new(token).with_cookie(cookie)))
    }

    fn attach(&self, request: RequestBuilder, state: &AuthState) -> RequestBuilder {
        let request = request.header(self.token_header.as_str(), state.token.expose_secret());
        match &state.session_cookie {
            Some(cookie) => request.header(
                COOKIE,
                format!("{}={}", self.cookie_name, cookie.expose_secret()),
            ),
            None => request,
        }
    }
}

fn session_cookie(response: &Response, name: &str) -> Option<SecureString> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix(prefix.as_str()))
        .map(|rest| SecureString::from(rest.split(';').next().unwrap_or_default()))
}

#[async_trait]
impl AuthStrategy for SessionLoginAuth {
    async fn authorize(
        &self,
        ctx: &AuthContext<'_>,
        request: RequestBuilder,
    ) -> ConnectorResult<RequestBuilder> {
        let state = self.cache.get_or_refresh(|| self.login(ctx)).await?;
        Ok(self.attach(request, &state))
    }

    fn is_rejection(&self, status: StatusCode) -> bool {
        status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED
    }

    async fn invalidate(&self) -> ConnectorResult<bool> {
        self.cache.clear().await?;
        Ok(true)
    }

    async fn logout(&self, ctx: &AuthContext<'_>) -> ConnectorResult<()> {
        let Some(state) = self.cache.current().await? else {
            return Ok(());
        };
        let request = self.attach(ctx.client.delete(ctx.url(&self.login_path)), &state);
        let result = request.send().await;
        self.cache.clear().await?;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Logout was not accepted");
                Ok(())
            }
            Ok(_) => {
                debug!("Logged out");
                Ok(())
            }
            Err(e) => Err(ConnectorError::ConnectionFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::MemoryStateStore;

    #[test]
    fn test_auth_state_usability() {
        let now = Utc::now();
        assert!(AuthState::new("t").is_usable_at(now));
        assert!(AuthState::new("t").expiring_in(3600).is_usable_at(now));
        assert!(!AuthState::new("t").expiring_in(30).is_usable_at(now));
    }

    #[test]
    fn test_auth_state_serialization_omits_empty_fields() {
        let json = serde_json::to_value(AuthState::new("abc")).unwrap();
        assert_eq!(json, json!({"token": "abc"}));
    }

    #[tokio::test]
    async fn test_token_cache_persists_and_clears() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let cache = TokenCache::persistent(store.clone(), "auth:zoom");
        cache
            .store(AuthState::new("tok").expiring_in(3600))
            .await
            .unwrap();

        let reloaded = TokenCache::persistent(store.clone(), "auth:zoom");
        let state = reloaded.current().await.unwrap().unwrap();
        assert_eq!(state.token.expose_secret(), "tok");

        reloaded.clear().await.unwrap();
        assert!(store.get("auth:zoom").await.unwrap().is_none());
        assert!(TokenCache::persistent(store, "auth:zoom")
            .current()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_or_refresh_runs_once() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let cache = TokenCache::persistent(store.clone(), "auth:x");
        let first = cache
            .get_or_refresh(|| async { Ok(AuthState::new("one")) })
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| async { Ok(AuthState::new("two")) })
            .await
            .unwrap();
        assert_eq!(first.token.expose_secret(), "one");
        assert_eq!(second.token.expose_secret(), "one");
        assert!(store.get("auth:x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_persisted_token_is_ignored() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        save_state(store.as_ref(), "auth:x", &AuthState::new("old").expiring_in(-10))
            .await
            .unwrap();
        let cache = TokenCache::persistent(store, "auth:x");
        assert!(cache.current().await.unwrap().is_none());
    }

    #[test]
    fn test_auth_context_url() {
        let client = Client::new();
        let ctx = AuthContext {
            client: &client,
            base_url: "https://sc.example.com/rest/",
        };
        assert_eq!(ctx.url("/token"), "https://sc.example.com/rest/token");
    }
}
