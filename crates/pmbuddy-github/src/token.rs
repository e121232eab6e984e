//! GitHub App authentication.
//!
//! An app authenticates as itself with a short-lived RS256 JWT, then trades
//! that JWT for an installation access token usable against the MCP server.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pmbuddy_core::config::GitHubConfig;
use pmbuddy_core::error::{PmBuddyError, Result};

/// GitHub caps app JWT lifetime at ten minutes.
const JWT_TTL_SECS: u64 = 600;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
/// Installation tokens are re-minted this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(600);
/// Floor between refresh attempts, also the retry delay after a failure.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(60);

/// Claims of a GitHub App JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: u64,
    pub exp: u64,
    /// App id or client id.
    pub iss: String,
}

impl AppClaims {
    pub fn new(issuer: &str, now: u64) -> Self {
        Self {
            iat: now,
            exp: now + JWT_TTL_SECS,
            iss: issuer.to_string(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Keys stored in env files often carry literal `\n` sequences.
fn normalize_pem(pem: &str) -> String {
    pem.replace("\\n", "\n")
}

fn sign(claims: &AppClaims, pem: &str) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(normalize_pem(pem).as_bytes())
        .map_err(|e| PmBuddyError::GitHubAuth(format!("Invalid GitHub App private key: {}", e)))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key)
        .map_err(|e| PmBuddyError::GitHubAuth(format!("Failed to sign app JWT: {}", e)))
}

/// Sign an app JWT valid for ten minutes from now.
pub fn app_jwt(app_id: &str, pem: &str) -> Result<String> {
    sign(&AppClaims::new(app_id, unix_now()), pem)
}

/// Sign an app JWT with a private key read from disk.
pub fn app_jwt_from_pem_file(path: &Path, client_id: &str) -> Result<String> {
    let pem = std::fs::read_to_string(path)?;
    app_jwt(client_id, &pem)
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    #[serde(default)]
    account: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

/// An installation access token. GitHub issues them for one hour.
#[derive(Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Minimal client for the GitHub App REST endpoints.
pub struct GitHubAppClient {
    http: Client,
    api_url: String,
}

impl GitHubAppClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("pm-buddy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PmBuddyError::GitHubAuth(e.to_string()))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = req
            .header("Accept", GITHUB_ACCEPT)
            .send()
            .await
            .map_err(|e| PmBuddyError::GitHubAuth(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PmBuddyError::GitHubAuth(format!(
                "{} failed with HTTP {}: {}",
                what, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PmBuddyError::GitHubAuth(format!("{} returned bad JSON: {}", what, e)))
    }

    /// Id of the first installation of the app.
    pub async fn first_installation(&self, jwt: &str) -> Result<u64> {
        let url = format!("{}/app/installations", self.api_url);
        let installations: Vec<Installation> = self
            .send(self.http.get(&url).bearer_auth(jwt), "List installations")
            .await?;

        let first = installations.into_iter().next().ok_or_else(|| {
            PmBuddyError::GitHubAuth("No installations found for this GitHub App".into())
        })?;
        info!(
            installation_id = first.id,
            account = first.account.as_ref().map(|a| a.login.as_str()).unwrap_or("unknown"),
            "Using GitHub App installation"
        );
        Ok(first.id)
    }

    /// Exchange an app JWT for an installation access token.
    pub async fn installation_token(
        &self,
        jwt: &str,
        installation_id: u64,
    ) -> Result<InstallationToken> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );
        let token: InstallationToken = self
            .send(self.http.post(&url).bearer_auth(jwt), "Installation token exchange")
            .await?;
        info!(installation_id, expires_at = ?token.expires_at, "GitHub installation token obtained");
        Ok(token)
    }
}

/// A set, non-blank variable.
fn present<L>(lookup: &L, var: &str) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn require<L>(lookup: &L, var: &str) -> Result<String>
where
    L: Fn(&str) -> Option<String>,
{
    present(lookup, var)
        .ok_or_else(|| PmBuddyError::Config(format!("Environment variable {} is not set", var)))
}

/// Mint an installation token from the app id, private key, and optional
/// installation id named in `config`.
///
/// Without an installation id the app's first installation is used.
pub async fn installation_token_from_env<L>(
    config: &GitHubConfig,
    lookup: &L,
) -> Result<InstallationToken>
where
    L: Fn(&str) -> Option<String>,
{
    let app_id = require(lookup, &config.app_id_env)?;
    let pem = require(lookup, &config.private_key_env)?;
    let jwt = app_jwt(&app_id, &pem)?;

    let client = GitHubAppClient::new(&config.api_url)?;
    let installation_id = match present(lookup, &config.installation_id_env) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            PmBuddyError::Config(format!(
                "{} must be a numeric installation id, got '{}'",
                config.installation_id_env, raw
            ))
        })?,
        None => client.first_installation(&jwt).await?,
    };

    client.installation_token(&jwt, installation_id).await
}

/// The two tokens the triage agents authenticate with.
#[derive(Clone)]
pub struct AgentTokens {
    /// Installation token: format, refine, and root-cause agents.
    pub app_token: String,
    /// User/Actions token: investigate agent.
    pub user_token: String,
    /// Expiry of a minted `app_token`; `None` when it was read from the
    /// environment and cannot be renewed.
    pub app_token_expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AgentTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTokens")
            .field("app_token", &"<redacted>")
            .field("user_token", &"<redacted>")
            .field("app_token_expires_at", &self.app_token_expires_at)
            .finish()
    }
}

impl AgentTokens {
    /// Resolve both tokens. When the app id and private key are present the
    /// installation token is minted; otherwise it is read from
    /// `app_token_env`. A missing token is a config error.
    pub async fn resolve<L>(config: &GitHubConfig, lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let can_mint = present(&lookup, &config.app_id_env).is_some()
            && present(&lookup, &config.private_key_env).is_some();

        let (app_token, app_token_expires_at) = if can_mint {
            debug!("Minting GitHub App installation token");
            let minted = installation_token_from_env(config, &lookup).await?;
            (minted.token, minted.expires_at)
        } else {
            (require(&lookup, &config.app_token_env)?, None)
        };
        let user_token = require(&lookup, &config.token_env)?;

        Ok(Self {
            app_token,
            user_token,
            app_token_expires_at,
        })
    }

    /// How long until the app token should be re-minted, or `None` when it
    /// does not expire on a known schedule.
    pub fn refresh_delay(&self) -> Option<Duration> {
        self.refresh_delay_at(Utc::now())
    }

    fn refresh_delay_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.app_token_expires_at?;
        let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
        Some(
            remaining
                .saturating_sub(REFRESH_MARGIN)
                .max(MIN_REFRESH_DELAY),
        )
    }
}
