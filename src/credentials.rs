//! OAuth2 + Swift credential state machine.
//!
//! Tracks four things, each with its own cache: the OAuth2 client
//! id/secret (fixed, resolved once), the refresh token (persisted via the
//! host, either in config or in its credential store), the current OAuth2
//! access token (short-lived, ~1h), and the current Swift endpoint/token
//! pair obtained by exchanging the access token at hubiC's credentials
//! endpoint. All four follow the same shape: cached value + expiry,
//! refreshed lazily on access.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::Deserialize;

use crate::callback;
use crate::config::{self, HUBIC_CLIENT_ID_ENV, HUBIC_CLIENT_SECRET_ENV};
use crate::error::{RemoteError, Result};
use crate::host::HostIo;

const AUTHORIZE_URL: &str = "https://api.hubic.com/oauth/auth";
const TOKEN_URL: &str = "https://api.hubic.com/oauth/token";
const CREDENTIALS_URL: &str = "https://api.hubic.com/1.0/account/credentials";
const OAUTH_SCOPE: &str = "credentials.r";

const CONFIG_REFRESH_TOKEN: &str = "hubic_refresh_token";
const CREDS_OAUTH_CLIENT_NAME: &str = "oauth_client";
const CREDS_TOKEN_NAME: &str = "token";

/// A sentinel "already expired" timestamp, matching the original's use of
/// `datetime.datetime(2000, 1, 1, ...)` as an always-stale default.
fn distant_past() -> DateTime<Utc> {
    DateTime::from_timestamp(946_684_800, 0).expect("valid fixed timestamp")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SwiftCredentialsResponse {
    token: String,
    endpoint: String,
    expires: String,
}

struct OAuthState {
    refresh_token: Option<String>,
    access_token: Option<String>,
    access_token_expiration: DateTime<Utc>,
}

struct SwiftState {
    endpoint: Option<String>,
    token: Option<String>,
    expiration: DateTime<Utc>,
}

/// Owns the OAuth2/Swift token lifecycle for one remote instance. Shared
/// across commands for the lifetime of the process so tokens are fetched
/// once and reused until they actually expire.
pub struct CredentialManager {
    http: reqwest::Client,
    client_creds: Mutex<Option<(String, String)>>,
    oauth: Mutex<OAuthState>,
    swift: Mutex<SwiftState>,
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialManager {
    /// Build an idle credential manager. Nothing is resolved here — not even
    /// the OAuth client id/secret — so construction cannot fail and never
    /// talks to the host: the protocol adapter must send `VERSION 1` before
    /// any `GETCREDS`/`GETCONFIG` round-trip, and building this before that
    /// handshake would get the ordering backwards (`remote.py` builds its
    /// `HubicAuth` only after announcing the protocol version, for the same
    /// reason).
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            client_creds: Mutex::new(None),
            oauth: Mutex::new(OAuthState {
                refresh_token: None,
                access_token: None,
                access_token_expiration: distant_past(),
            }),
            swift: Mutex::new(SwiftState {
                endpoint: None,
                token: None,
                expiration: distant_past(),
            }),
        }
    }

    /// Resolve the OAuth2 client id/secret the first time they're needed
    /// (host credentials first, so a user can register their own hubiC
    /// application, falling back to the environment — there is no
    /// compiled-in default, hubiC application credentials are not ours to
    /// embed), and cache the result for the rest of the process's lifetime.
    fn client_credentials(&self, io: &dyn HostIo) -> Result<(String, String)> {
        {
            let cached = self.client_creds.lock().expect("client_creds mutex poisoned");
            if let Some(creds) = cached.as_ref() {
                return Ok(creds.clone());
            }
        }
        let creds = resolve_client_credentials(io)?;
        *self.client_creds.lock().expect("client_creds mutex poisoned") = Some(creds.clone());
        Ok(creds)
    }

    /// `INITREMOTE`: reuse an existing refresh token (the `enableremote`
    /// case, or a re-run of `initremote`) or run the interactive browser
    /// authorization flow to obtain one for the first time.
    pub async fn initialize(&self, io: &dyn HostIo) -> Result<()> {
        io.debug("Starting first-time OAuth2 authentication");

        let existing = get_refresh_token(io);
        if let Some(token) = existing {
            self.set_refresh_token(token);
            self.refresh_access_token(io).await?;
            return Ok(());
        }

        let (client_id, client_secret) = self.client_credentials(io)?;

        let scope = OAUTH_SCOPE;
        let redirect_uri = callback::redirect_uri();
        let mut state_bytes = [0u8; 16];
        rand::rng().fill(&mut state_bytes);
        let csrf_state = hex::encode(state_bytes);

        let auth_url = {
            let mut url = url::Url::parse(AUTHORIZE_URL).expect("valid constant URL");
            url.query_pairs_mut()
                .append_pair("client_id", &client_id)
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", scope)
                .append_pair("state", &csrf_state);
            url.to_string()
        };

        io.debug(&format!(
            "An authentication tab should open in your browser; if not, visit: {auth_url}"
        ));
        callback::open_in_browser(&auth_url)?;

        io.debug("Starting the HTTP server to handle the redirection URL");
        let params =
            tokio::task::spawn_blocking(callback::wait_for_callback)
                .await
                .map_err(|e| RemoteError::Auth(format!("callback task failed: {e}")))??;

        if let Some(ref got_state) = params.state {
            if got_state != &csrf_state {
                return Err(RemoteError::Auth(
                    "OAuth state missing or mismatched — possible CSRF attempt".to_string(),
                ));
            }
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[
                ("code", params.code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;
        let tokens: TokenResponse = response.error_for_status()?.json().await?;

        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            RemoteError::Auth("hubiC did not return a refresh token".to_string())
        })?;

        {
            let mut oauth = self.oauth.lock().expect("oauth mutex poisoned");
            oauth.refresh_token = Some(refresh_token.clone());
            oauth.access_token = Some(tokens.access_token);
            oauth.access_token_expiration = Utc::now() + chrono::Duration::seconds(tokens.expires_in);
        }
        io.debug(&format!(
            "The current OAuth access token expires in {} seconds",
            tokens.expires_in
        ));

        set_refresh_token(io, &refresh_token);
        Ok(())
    }

    /// `PREPARE`: load the stored refresh token and obtain a Swift token.
    pub async fn prepare(&self, io: &dyn HostIo) -> Result<()> {
        io.debug("Preparing the remote");
        let refresh_token = get_refresh_token(io)
            .ok_or_else(|| RemoteError::Configuration("No credentials found".to_string()))?;
        self.set_refresh_token(refresh_token);
        self.get_swift_credentials(io).await?;
        Ok(())
    }

    fn set_refresh_token(&self, token: String) {
        let mut oauth = self.oauth.lock().expect("oauth mutex poisoned");
        oauth.refresh_token = Some(token);
    }

    async fn refresh_access_token(&self, io: &dyn HostIo) -> Result<()> {
        let refresh_token = {
            let oauth = self.oauth.lock().expect("oauth mutex poisoned");
            oauth
                .refresh_token
                .clone()
                .ok_or_else(|| RemoteError::Auth("no refresh token available".to_string()))?
        };
        let (client_id, client_secret) = self.client_credentials(io)?;

        tracing::debug!("refreshing hubiC OAuth access token");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let tokens: TokenResponse = match response.error_for_status() {
            Ok(resp) => resp.json().await?,
            Err(e) => {
                tracing::warn!("OAuth access token refresh failed: {e}");
                return Err(e.into());
            }
        };

        let mut oauth = self.oauth.lock().expect("oauth mutex poisoned");
        oauth.access_token = Some(tokens.access_token);
        oauth.access_token_expiration = Utc::now() + chrono::Duration::seconds(tokens.expires_in);
        // hubiC may rotate the refresh token on use; keep whichever is newest.
        if let Some(rotated) = tokens.refresh_token {
            oauth.refresh_token = Some(rotated);
        }
        Ok(())
    }

    async fn access_token(&self, io: &dyn HostIo) -> Result<String> {
        let needs_refresh = {
            let oauth = self.oauth.lock().expect("oauth mutex poisoned");
            oauth.access_token.is_none() || oauth.access_token_expiration <= Utc::now()
        };
        if needs_refresh {
            self.refresh_access_token(io).await?;
        }
        let oauth = self.oauth.lock().expect("oauth mutex poisoned");
        oauth
            .access_token
            .clone()
            .ok_or_else(|| RemoteError::Auth("no access token available".to_string()))
    }

    async fn refresh_swift_token(&self, io: &dyn HostIo) -> Result<()> {
        tracing::debug!("refreshing Swift endpoint/token pair");
        let access_token = self.access_token(io).await?;
        let response = self
            .http
            .get(CREDENTIALS_URL)
            .bearer_auth(access_token)
            .send()
            .await?;
        let creds: SwiftCredentialsResponse = response.error_for_status()?.json().await?;

        let expiration = DateTime::parse_from_rfc3339(&creds.expires)
            .map_err(|e| RemoteError::Auth(format!("invalid Swift token expiry: {e}")))?
            .with_timezone(&Utc);

        let mut swift = self.swift.lock().expect("swift mutex poisoned");
        swift.token = Some(creds.token);
        swift.endpoint = Some(creds.endpoint);
        swift.expiration = expiration;
        Ok(())
    }

    /// Whether the cached Swift token is currently expired (or was never
    /// fetched).
    pub fn swift_token_expired(&self) -> bool {
        let swift = self.swift.lock().expect("swift mutex poisoned");
        swift.token.is_none() || swift.expiration <= Utc::now()
    }

    /// Return a valid `(endpoint, token)` pair, refreshing if the cached one
    /// has expired.
    pub async fn get_swift_credentials(&self, io: &dyn HostIo) -> Result<(String, String)> {
        if self.swift_token_expired() {
            self.refresh_swift_token(io).await?;
        }
        let swift = self.swift.lock().expect("swift mutex poisoned");
        let endpoint = swift.endpoint.clone().expect("just refreshed");
        let token = swift.token.clone().expect("just refreshed");
        Ok((endpoint, token))
    }

    /// Force a fresh Swift token, used after a `401` from the object store
    /// even though our cached expiry claimed the token was still valid.
    pub async fn force_refresh_swift(&self, io: &dyn HostIo) -> Result<(String, String)> {
        self.refresh_swift_token(io).await?;
        let swift = self.swift.lock().expect("swift mutex poisoned");
        let endpoint = swift.endpoint.clone().expect("just refreshed");
        let token = swift.token.clone().expect("just refreshed");
        Ok((endpoint, token))
    }
}

fn resolve_client_credentials(io: &dyn HostIo) -> Result<(String, String)> {
    if let Some((id, secret)) = io.get_credentials(CREDS_OAUTH_CLIENT_NAME) {
        return Ok((id, secret));
    }
    if let Ok(id) = std::env::var(HUBIC_CLIENT_ID_ENV) {
        let secret = std::env::var(HUBIC_CLIENT_SECRET_ENV).map_err(|_| {
            RemoteError::Configuration(format!(
                "{HUBIC_CLIENT_ID_ENV} is set but {HUBIC_CLIENT_SECRET_ENV} is missing"
            ))
        })?;
        return Ok((id, secret));
    }
    Err(RemoteError::Configuration(format!(
        "no hubiC OAuth2 application credentials configured: set the '{CREDS_OAUTH_CLIENT_NAME}' \
         remote credentials or the {HUBIC_CLIENT_ID_ENV}/{HUBIC_CLIENT_SECRET_ENV} environment variables"
    )))
}

/// Retrieve the stored refresh token, honoring the `embedcreds` policy: when
/// enabled, prefer config and migrate a credential-store token into config
/// the first time it is seen (so a later `enableremote embedcreds=yes` picks
/// up a token stored during the original `initremote`).
fn get_refresh_token(io: &dyn HostIo) -> Option<String> {
    if config::embedcreds_enabled_io(io) {
        if let Some(token) = io.get_config(CONFIG_REFRESH_TOKEN) {
            return Some(token);
        }
        if let Some((_, token)) = io.get_credentials(CREDS_TOKEN_NAME) {
            io.set_config(CONFIG_REFRESH_TOKEN, &token);
            return Some(token);
        }
        None
    } else {
        io.get_credentials(CREDS_TOKEN_NAME).map(|(_, token)| token)
    }
}

fn set_refresh_token(io: &dyn HostIo, token: &str) {
    if config::embedcreds_enabled_io(io) {
        io.set_config(CONFIG_REFRESH_TOKEN, token);
    } else {
        io.set_credentials(CREDS_TOKEN_NAME, "hubic", token);
    }
}
