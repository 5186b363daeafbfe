//! Bearer identity-token verification in front of the `/api` routes.
//!
//! The middleware answers 401 when the `Authorization: Bearer` header is
//! missing or malformed and 403 when the token fails verification. On
//! success an [`Identity`] is inserted into the request extensions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::ApiError;
use crate::AppState;
use parlor_types::ChatError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Claims of a verified caller. Read for logging only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
}

// ---------------------------------------------------------------------------
// TokenVerifier
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, ChatError>;

    /// `false` when no keys are configured and every token is refused.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Refuses every token. Installed when no verification keys are configured.
pub struct DisabledVerifier;

#[async_trait]
impl TokenVerifier for DisabledVerifier {
    async fn verify(&self, _token: &str) -> Result<Identity, ChatError> {
        Err(ChatError::InvalidToken(
            "token verification is not configured".to_string(),
        ))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// JwtVerifier
// ---------------------------------------------------------------------------

/// Minimum spacing between JWKS refetches triggered by unknown key ids.
pub const JWKS_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(60);

struct SigningKey {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

type KeyMap = HashMap<String, SigningKey>;

/// Where a JWKS-backed verifier refetches its keys when a token names a
/// `kid` it has not seen.
struct RemoteJwks {
    url: String,
    client: reqwest::Client,
    min_interval: Duration,
    last_fetch: Mutex<Instant>,
}

/// JWT verifier over a key set: JWKS entries selected by `kid`, a single
/// RSA public key, or an HMAC secret. A JWKS loaded from a URL is refetched
/// (at most once per refresh interval) when a token carries an unknown `kid`.
pub struct JwtVerifier {
    by_kid: RwLock<Arc<KeyMap>>,
    fallback: Option<SigningKey>,
    remote: Option<RemoteJwks>,
    issuer: Option<String>,
    audience: Option<String>,
}

const RSA_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
const EC_ALGORITHMS: [Algorithm; 2] = [Algorithm::ES256, Algorithm::ES384];

impl JwtVerifier {
    fn with_keys(by_kid: KeyMap, fallback: Option<SigningKey>) -> Self {
        Self {
            by_kid: RwLock::new(Arc::new(by_kid)),
            fallback,
            remote: None,
            issuer: None,
            audience: None,
        }
    }

    /// HS256-family tokens signed with a shared secret.
    pub fn hmac(secret: &[u8]) -> Self {
        let key = SigningKey {
            key: DecodingKey::from_secret(secret),
            algorithms: HMAC_ALGORITHMS.to_vec(),
        };
        Self::with_keys(KeyMap::new(), Some(key))
    }

    /// RS256-family tokens verified against one PEM-encoded public key.
    pub fn rsa_pem(pem: &[u8]) -> Result<Self, ChatError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| ChatError::Other(format!("Invalid RSA public key PEM: {e}")))?;
        let key = SigningKey {
            key,
            algorithms: RSA_ALGORITHMS.to_vec(),
        };
        Ok(Self::with_keys(KeyMap::new(), Some(key)))
    }

    /// Keys from a static JWKS document.
    pub fn from_jwks(jwks: &JwkSet) -> Result<Self, ChatError> {
        Ok(Self::with_keys(keys_from_jwks(jwks)?, None))
    }

    /// Keys fetched from a JWKS URL, refetched when an unknown `kid` shows up.
    pub async fn from_jwks_url(
        client: reqwest::Client,
        url: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let url = url.into();
        let keys = keys_from_jwks(&fetch_jwks(&client, &url).await?)?;
        let mut verifier = Self::with_keys(keys, None);
        verifier.remote = Some(RemoteJwks {
            url,
            client,
            min_interval: JWKS_REFRESH_MIN_INTERVAL,
            last_fetch: Mutex::new(Instant::now()),
        });
        Ok(verifier)
    }

    /// Override [`JWKS_REFRESH_MIN_INTERVAL`]. No effect without a JWKS URL.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        if let Some(remote) = self.remote.as_mut() {
            remote.min_interval = interval;
        }
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub async fn key_count(&self) -> usize {
        self.keys().await.len() + usize::from(self.fallback.is_some())
    }

    async fn keys(&self) -> Arc<KeyMap> {
        self.by_kid.read().await.clone()
    }

    /// Refetch the JWKS because `kid` is unknown. Returns `true` when the
    /// current key set now contains `kid`.
    async fn refresh(&self, remote: &RemoteJwks, kid: &str) -> bool {
        let mut last_fetch = remote.last_fetch.lock().await;
        // A concurrent request may have refreshed while this one waited.
        if self.keys().await.contains_key(kid) {
            return true;
        }
        if last_fetch.elapsed() < remote.min_interval {
            tracing::debug!(kid, "JWKS fetched recently, not refetching");
            return false;
        }
        *last_fetch = Instant::now();

        match fetch_jwks(&remote.client, &remote.url)
            .await
            .and_then(|jwks| keys_from_jwks(&jwks))
        {
            Ok(keys) => {
                let found = keys.contains_key(kid);
                tracing::info!(kid, keys = keys.len(), found, "refreshed JWKS");
                *self.by_kid.write().await = Arc::new(keys);
                found
            }
            Err(e) => {
                tracing::warn!(kid, error = %e, "JWKS refresh failed, keeping current keys");
                false
            }
        }
    }

    fn select<'a>(&'a self, keys: &'a KeyMap, kid: Option<&str>) -> Result<&'a SigningKey, ChatError> {
        match kid {
            Some(kid) if !keys.is_empty() => keys
                .get(kid)
                .ok_or_else(|| ChatError::InvalidToken(format!("unknown signing key {kid}"))),
            _ => self
                .fallback
                .as_ref()
                .ok_or_else(|| ChatError::InvalidToken("token header has no kid".to_string())),
        }
    }

    fn decode_identity(
        &self,
        token: &str,
        header: &Header,
        signing: &SigningKey,
    ) -> Result<Identity, ChatError> {
        let mut validation = Validation::new(header.alg);
        validation.algorithms = signing.algorithms.clone();
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match self.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<IdentityClaims>(token, &signing.key, &validation)
            .map_err(|e| ChatError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(ChatError::InvalidToken("empty subject".to_string()));
        }
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| ChatError::InvalidToken("exp out of range".to_string()))?;

        Ok(Identity {
            subject: claims.sub,
            email: claims.email,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ChatError> {
        let header = decode_header(token).map_err(|e| ChatError::InvalidToken(e.to_string()))?;

        let mut keys = self.keys().await;
        if let (Some(kid), Some(remote)) = (header.kid.as_deref(), self.remote.as_ref()) {
            if !keys.contains_key(kid) && self.refresh(remote, kid).await {
                keys = self.keys().await;
            }
        }

        let signing = self.select(&keys, header.kid.as_deref())?;
        self.decode_identity(token, &header, signing)
    }
}

/// Entries without a `kid` or with an unsupported key type are skipped.
fn keys_from_jwks(jwks: &JwkSet) -> Result<KeyMap, ChatError> {
    let mut keys = KeyMap::new();
    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            tracing::warn!("skipping JWKS entry without kid");
            continue;
        };
        let algorithms = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => RSA_ALGORITHMS.to_vec(),
            AlgorithmParameters::OctetKey(_) => HMAC_ALGORITHMS.to_vec(),
            AlgorithmParameters::EllipticCurve(_) => EC_ALGORITHMS.to_vec(),
            _ => {
                tracing::warn!(kid = %kid, "skipping JWKS entry with unsupported key type");
                continue;
            }
        };
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| ChatError::Other(format!("Invalid JWKS entry {kid}: {e}")))?;
        keys.insert(kid, SigningKey { key, algorithms });
    }

    if keys.is_empty() {
        return Err(ChatError::Other("JWKS document contains no usable keys".to_string()));
    }
    Ok(keys)
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<JwkSet, ChatError> {
    client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| ChatError::Other(format!("Failed to fetch JWKS from {url}: {e}")))?
        .json::<JwkSet>()
        .await
        .map_err(|e| ChatError::Other(format!("Failed to parse JWKS from {url}: {e}")))
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn require_identity(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(req.headers()).map(str::to_owned) else {
        return ApiError(ChatError::MissingToken).into_response();
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, "identity verified");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
