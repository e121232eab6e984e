use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use pmbuddy_core::error::{PmBuddyError, Result};

/// Token audience for Azure OpenAI.
pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Unix seconds; newer CLI versions only.
    #[serde(rename = "expires_on", default)]
    expires_on_epoch: Option<i64>,
    /// Local time, `%Y-%m-%d %H:%M:%S%.f`.
    #[serde(default)]
    expires_on: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Entra ID tokens from the signed-in Azure CLI (`az account get-access-token`),
/// cached until shortly before they expire.
pub struct AzureCliCredential {
    program: String,
    args: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_command(
            "az",
            [
                "account",
                "get-access-token",
                "--resource",
                COGNITIVE_SERVICES_RESOURCE,
                "--output",
                "json",
            ],
        )
    }

    /// Use a different command that prints the same JSON document.
    pub fn with_command<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cached: Mutex::new(None),
        }
    }

    /// A bearer token valid for at least the refresh margin.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(t) = cached.as_ref() {
            if t.expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(t.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        debug!(expires_at = %fresh.expires_at, "Fetched Azure CLI access token");
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| {
                PmBuddyError::Config(format!(
                    "Azure CLI credential: failed to run {}: {}",
                    self.program, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PmBuddyError::Config(format!(
                "Azure CLI credential: {} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_token(&output.stdout)
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_token(stdout: &[u8]) -> Result<CachedToken> {
    let raw: CliToken = serde_json::from_slice(stdout).map_err(|e| {
        PmBuddyError::Config(format!("Azure CLI credential: unexpected output: {}", e))
    })?;

    let expires_at = match (raw.expires_on_epoch, raw.expires_on.as_deref()) {
        (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single(),
        (None, Some(local)) => NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
            .map(|t| t.with_timezone(&Utc)),
        (None, None) => None,
    }
    .ok_or_else(|| PmBuddyError::Config("Azure CLI credential: token has no expiry".into()))?;

    Ok(CachedToken {
        token: raw.access_token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_credential(dir: &std::path::Path, expires_on: i64) -> AzureCliCredential {
        let calls = dir.join("calls");
        let script = format!(
            r#"echo call >> '{}'; echo '{{"accessToken":"tok-cli","expires_on":{},"tokenType":"Bearer"}}'"#,
            calls.display(),
            expires_on
        );
        AzureCliCredential::with_command("sh", ["-c".to_string(), script])
    }

    fn call_count(dir: &std::path::Path) -> usize {
        std::fs::read_to_string(dir.join("calls"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn test_parse_epoch_expiry() {
        let token =
            parse_token(br#"{"accessToken":"abc","expiresOn":"2024-01-01 00:00:00.000000","expires_on":1767225600}"#)
                .unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at.timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_parse_local_expiry_without_epoch() {
        let token =
            parse_token(br#"{"accessToken":"abc","expiresOn":"2030-06-01 12:30:00.000000"}"#).unwrap();
        assert!(token.expires_at > Utc::now());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_token(b"ERROR: Please run 'az login'"),
            Err(PmBuddyError::Config(_))
        ));
        assert!(matches!(
            parse_token(br#"{"accessToken":"abc"}"#),
            Err(PmBuddyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_token_is_cached_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let credential = script_credential(dir.path(), Utc::now().timestamp() + 3600);

        assert_eq!(credential.token().await.unwrap(), "tok-cli");
        assert_eq!(credential.token().await.unwrap(), "tok-cli");
        assert_eq!(call_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        // Inside the refresh margin
        let credential = script_credential(dir.path(), Utc::now().timestamp() + 60);

        credential.token().await.unwrap();
        credential.token().await.unwrap();
        assert_eq!(call_count(dir.path()), 2);
    }

    #[tokio::test]
    async fn test_failed_cli_is_config_error() {
        let credential =
            AzureCliCredential::with_command("sh", ["-c", "echo 'Please run az login' >&2; exit 1"]);
        match credential.token().await {
            Err(PmBuddyError::Config(msg)) => assert!(msg.contains("az login")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_cli_is_config_error() {
        let credential = AzureCliCredential::with_command("pmbuddy-no-such-az", ["account"]);
        assert!(matches!(
            credential.token().await,
            Err(PmBuddyError::Config(_))
        ));
    }
}
