//! Process configuration, read once at startup from flags and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use jsonwebtoken::jwk::JwkSet;

use crate::auth::{DisabledVerifier, JwtVerifier, TokenVerifier};
use parlor_llm::ProviderSettings;

/// Firebase publishes its ID-token signing keys here.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

#[derive(Debug, Clone, clap::Args)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5001)]
    pub port: u16,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Override the OpenAI API base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Override the Anthropic API base URL
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    /// Upstream request timeout in seconds (0 disables)
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 120)]
    pub upstream_timeout_secs: u64,

    /// URL of a JWKS document with token signing keys
    #[arg(long, env = "AUTH_JWKS_URL")]
    pub auth_jwks_url: Option<String>,

    /// Path to a JWKS document with token signing keys
    #[arg(long, env = "AUTH_JWKS_FILE")]
    pub auth_jwks_file: Option<PathBuf>,

    /// Path to an RSA public key (PEM) for token verification
    #[arg(long, env = "AUTH_PUBLIC_KEY_PEM_FILE")]
    pub auth_public_key_pem_file: Option<PathBuf>,

    /// Shared HS256 secret for token verification (development)
    #[arg(long, env = "AUTH_HMAC_SECRET", hide_env_values = true)]
    pub auth_hmac_secret: Option<String>,

    /// Expected `iss` claim
    #[arg(long, env = "AUTH_ISSUER")]
    pub auth_issuer: Option<String>,

    /// Expected `aud` claim
    #[arg(long, env = "AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,

    /// Firebase project; implies issuer, audience, and the Firebase JWKS
    #[arg(long, env = "FIREBASE_PROJECT_ID")]
    pub firebase_project_id: Option<String>,
}

// ---------------------------------------------------------------------------
// KeySource / AuthSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    JwksUrl(String),
    JwksFile(PathBuf),
    PemFile(PathBuf),
    HmacSecret(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub keys: KeySource,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl AuthSettings {
    fn from_args(args: &ServerArgs) -> Self {
        let firebase = args
            .firebase_project_id
            .as_deref()
            .filter(|p| !p.is_empty());

        let keys = if let Some(url) = non_empty(&args.auth_jwks_url) {
            KeySource::JwksUrl(url)
        } else if let Some(path) = &args.auth_jwks_file {
            KeySource::JwksFile(path.clone())
        } else if let Some(path) = &args.auth_public_key_pem_file {
            KeySource::PemFile(path.clone())
        } else if let Some(secret) = non_empty(&args.auth_hmac_secret) {
            KeySource::HmacSecret(secret)
        } else if firebase.is_some() {
            KeySource::JwksUrl(FIREBASE_JWKS_URL.to_string())
        } else {
            KeySource::None
        };

        Self {
            keys,
            issuer: non_empty(&args.auth_issuer)
                .or_else(|| firebase.map(|p| format!("https://securetoken.google.com/{p}"))),
            audience: non_empty(&args.auth_audience).or_else(|| firebase.map(str::to_string)),
        }
    }

    /// Load key material and build the verifier. With no key source the
    /// returned verifier refuses every token.
    pub async fn build_verifier(&self) -> anyhow::Result<Arc<dyn TokenVerifier>> {
        let mut verifier = match &self.keys {
            KeySource::None => {
                tracing::warn!("no token verification keys configured; all /api requests will be refused");
                return Ok(Arc::new(DisabledVerifier));
            }
            KeySource::JwksUrl(url) => JwtVerifier::from_jwks_url(reqwest::Client::new(), url.clone())
                .await
                .with_context(|| format!("loading JWKS from {url}"))?,
            KeySource::JwksFile(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading JWKS file {}", path.display()))?;
                let jwks: JwkSet = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing JWKS file {}", path.display()))?;
                JwtVerifier::from_jwks(&jwks)?
            }
            KeySource::PemFile(path) => {
                let pem = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading public key {}", path.display()))?;
                JwtVerifier::rsa_pem(&pem)?
            }
            KeySource::HmacSecret(secret) => {
                tracing::warn!("using a shared HMAC secret for token verification");
                JwtVerifier::hmac(secret.as_bytes())
            }
        };

        if let Some(issuer) = &self.issuer {
            verifier = verifier.with_issuer(issuer);
        }
        if let Some(audience) = &self.audience {
            verifier = verifier.with_audience(audience);
        }
        tracing::info!(keys = verifier.key_count().await, "token verification enabled");
        Ok(Arc::new(verifier))
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub providers: ProviderSettings,
    pub auth: AuthSettings,
}

impl ServerConfig {
    pub fn from_args(args: ServerArgs) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;

        let auth = AuthSettings::from_args(&args);
        let timeout = (args.upstream_timeout_secs > 0)
            .then(|| Duration::from_secs(args.upstream_timeout_secs));

        Ok(Self {
            bind_addr,
            providers: ProviderSettings {
                openai_api_key: non_empty(&args.openai_api_key),
                anthropic_api_key: non_empty(&args.anthropic_api_key),
                openai_base_url: non_empty(&args.openai_base_url),
                anthropic_base_url: non_empty(&args.anthropic_base_url),
                timeout,
            },
            auth,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        server: ServerArgs,
    }

    fn parse(args: &[&str]) -> ServerArgs {
        let mut argv = vec!["parlor"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().server
    }

    fn base_args() -> ServerArgs {
        parse(&[
            "--host", "127.0.0.1",
            "--port", "8080",
            "--upstream-timeout-secs", "30",
        ])
    }

    #[test]
    fn bind_address_and_timeout() {
        let config = ServerConfig::from_args(base_args()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.providers.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_timeout_disables() {
        let mut args = base_args();
        args.upstream_timeout_secs = 0;
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.providers.timeout, None);
    }

    #[test]
    fn invalid_host_is_error() {
        let mut args = base_args();
        args.host = "not a host".into();
        assert!(ServerConfig::from_args(args).is_err());
    }

    #[test]
    fn blank_keys_are_treated_as_missing() {
        let mut args = base_args();
        args.openai_api_key = Some("   ".into());
        args.anthropic_api_key = Some("ak-live".into());
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.providers.openai_api_key, None);
        assert_eq!(config.providers.anthropic_api_key.as_deref(), Some("ak-live"));
    }

    #[test]
    fn firebase_project_implies_issuer_audience_and_jwks() {
        let mut args = base_args();
        clear_auth(&mut args);
        args.firebase_project_id = Some("parlor-prod".into());
        let auth = AuthSettings::from_args(&args);
        assert_eq!(auth.keys, KeySource::JwksUrl(FIREBASE_JWKS_URL.to_string()));
        assert_eq!(auth.issuer.as_deref(), Some("https://securetoken.google.com/parlor-prod"));
        assert_eq!(auth.audience.as_deref(), Some("parlor-prod"));
    }

    #[test]
    fn explicit_settings_override_firebase_defaults() {
        let mut args = base_args();
        clear_auth(&mut args);
        args.firebase_project_id = Some("parlor-prod".into());
        args.auth_hmac_secret = Some("dev-secret".into());
        args.auth_audience = Some("custom-aud".into());
        let auth = AuthSettings::from_args(&args);
        assert_eq!(auth.keys, KeySource::HmacSecret("dev-secret".into()));
        assert_eq!(auth.audience.as_deref(), Some("custom-aud"));
    }

    #[tokio::test]
    async fn no_key_source_builds_disabled_verifier() {
        let auth = AuthSettings {
            keys: KeySource::None,
            issuer: None,
            audience: None,
        };
        let verifier = auth.build_verifier().await.unwrap();
        assert!(!verifier.is_enabled());
    }

    #[tokio::test]
    async fn jwks_file_builds_verifier() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"keys":[{{"kty":"oct","kid":"k1","alg":"HS256","k":"andrcy1zaGFyZWQtc2VjcmV0LWZvci1wYXJsb3ItdGVzdHM"}}]}}"#
        )
        .unwrap();

        let auth = AuthSettings {
            keys: KeySource::JwksFile(file.path().to_path_buf()),
            issuer: None,
            audience: None,
        };
        let verifier = auth.build_verifier().await.unwrap();
        assert!(verifier.is_enabled());
    }

    #[tokio::test]
    async fn jwks_url_is_fetched_at_startup() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"keys":[{"kty":"oct","kid":"k1","alg":"HS256","k":"andrcy1zaGFyZWQtc2VjcmV0LWZvci1wYXJsb3ItdGVzdHM"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = AuthSettings {
            keys: KeySource::JwksUrl(format!("{}/jwks", server.url())),
            issuer: None,
            audience: None,
        };
        assert!(auth.build_verifier().await.unwrap().is_enabled());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_pem_file_is_error() {
        let auth = AuthSettings {
            keys: KeySource::PemFile(PathBuf::from("/nonexistent/parlor/key.pem")),
            issuer: None,
            audience: None,
        };
        assert!(auth.build_verifier().await.is_err());
    }

    fn clear_auth(args: &mut ServerArgs) {
        args.auth_jwks_url = None;
        args.auth_jwks_file = None;
        args.auth_public_key_pem_file = None;
        args.auth_hmac_secret = None;
        args.auth_issuer = None;
        args.auth_audience = None;
        args.firebase_project_id = None;
    }
}
