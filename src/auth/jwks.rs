//! JWKS (JSON Web Key Set) fetching and caching module.
//!
//! Each tenant verifier owns one [`JwksCache`] pointed at its issuer's key
//! set. Fetching goes through a [`KeySetSource`] so the transport can be
//! swapped without touching the caching rules.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// Minimum spacing between refetches triggered by an unknown key id.
pub const DEFAULT_MIN_REFRESH_SECONDS: u64 = 30;

/// Timeout for a single key set request.
pub const FETCH_TIMEOUT_SECONDS: u64 = 10;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID (optional, used to match JWT header kid)
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Where key sets come from.
pub trait KeySetSource: Send + Sync {
    /// Fetch the key set published at `url`.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JwksDocument, JwksCacheError>> + Send + 'a>>;
}

/// Fetches key sets over HTTPS.
#[derive(Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
}

impl HttpKeySetSource {
    pub fn new() -> Result<Self, JwksCacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| JwksCacheError::FetchError(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl KeySetSource for HttpKeySetSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JwksDocument, JwksCacheError>> + Send + 'a>> {
        Box::pin(async move {
            debug!("Fetching JWKS from {}", url);

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| JwksCacheError::FetchError(e.to_string()))?;

            if !response.status().is_success() {
                return Err(JwksCacheError::FetchError(format!(
                    "HTTP {} from JWKS endpoint",
                    response.status()
                )));
            }

            response
                .json::<JwksDocument>()
                .await
                .map_err(|e| JwksCacheError::ParseError(e.to_string()))
        })
    }
}

/// Caching rules for a [`JwksCache`].
#[derive(Debug, Clone, Copy)]
pub struct JwksCacheOptions {
    /// How long a fetched key set is trusted without refetching.
    pub cache_ttl: Duration,
    /// Whether to keep serving a stale key set when a refetch fails.
    pub allow_stale: bool,
    /// Minimum time between refetches caused by an unknown `kid`.
    pub min_refresh_interval: Duration,
}

impl Default for JwksCacheOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            allow_stale: true,
            min_refresh_interval: Duration::from_secs(DEFAULT_MIN_REFRESH_SECONDS),
        }
    }
}

/// Thread-safe JWKS cache with automatic refresh.
pub struct JwksCache {
    /// The JWKS endpoint URL.
    jwks_url: String,
    options: JwksCacheOptions,
    /// Cached keys by kid.
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
    /// Last successful fetch time.
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// Last attempt, successful or not.
    last_attempt: Arc<RwLock<Option<Instant>>>,
    source: Arc<dyn KeySetSource>,
}

impl JwksCache {
    /// Create a new JWKS cache.
    pub fn new(jwks_url: String, options: JwksCacheOptions, source: Arc<dyn KeySetSource>) -> Self {
        Self {
            jwks_url,
            options,
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            last_attempt: Arc::new(RwLock::new(None)),
            source,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a decoding key by key ID.
    ///
    /// If `kid` is None, returns the key set's only key. A key set holding
    /// several keys cannot serve a credential without a `kid`.
    /// Fetches when the cache has expired, or when `kid` is unknown and the
    /// last attempt is older than the minimum refresh interval.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        let expired = {
            let last_fetch = self.last_fetch.read().await;
            match *last_fetch {
                Some(t) => t.elapsed() >= self.options.cache_ttl,
                None => true,
            }
        };

        if !expired {
            if let Some(key) = self.get_from_cache(kid).await {
                return Ok(key);
            }

            // Unknown kid on a fresh cache: possibly a rotated key, but do not
            // let unknown kids hammer the endpoint.
            let recently_attempted = self
                .last_attempt
                .read()
                .await
                .is_some_and(|t| t.elapsed() < self.options.min_refresh_interval);
            if recently_attempted {
                return Err(self.missing(kid).await);
            }
        }

        match self.fetch_keys().await {
            Ok(()) => match self.get_from_cache(kid).await {
                Some(key) => Ok(key),
                None => Err(self.missing(kid).await),
            },
            Err(e) => {
                // Fetch failed - try stale cache if allowed
                if self.options.allow_stale {
                    let stale_ok = self
                        .last_fetch
                        .read()
                        .await
                        .is_some_and(|t| t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS));

                    if stale_ok {
                        warn!("JWKS fetch from {} failed, using stale cache: {}", self.jwks_url, e);
                        if let Some(key) = self.get_from_cache(kid).await {
                            return Ok(key);
                        }
                    }
                }

                Err(e)
            }
        }
    }

    async fn missing(&self, kid: Option<&str>) -> JwksCacheError {
        match kid {
            Some(k) => JwksCacheError::KeyNotFound(k.to_string()),
            None if self.keys.read().await.len() > 1 => JwksCacheError::KidRequired,
            None => JwksCacheError::NoKeysAvailable,
        }
    }

    /// Get a key from the cache without fetching.
    async fn get_from_cache(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let keys = self.keys.read().await;

        match kid {
            Some(k) => keys.get(k).cloned(),
            None if keys.len() == 1 => keys.values().next().cloned(),
            None => None,
        }
    }

    /// Fetch keys from the source and replace the cached set.
    pub async fn fetch_keys(&self) -> Result<(), JwksCacheError> {
        *self.last_attempt.write().await = Some(Instant::now());

        let jwks = self.source.fetch(&self.jwks_url).await?;

        let mut new_keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }

            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key");
                continue;
            }

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    debug!("Cached key with kid: {}", kid);
                    new_keys.insert(kid, decoding_key);
                }
                Err(e) => {
                    warn!("Failed to parse JWK: {}", e);
                }
            }
        }

        if new_keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }

        let count = new_keys.len();
        *self.keys.write().await = new_keys;
        *self.last_fetch.write().await = Some(Instant::now());

        debug!("Cached {} keys from {}", count, self.jwks_url);
        Ok(())
    }

    /// Convert a JWK to a jsonwebtoken DecodingKey.
    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksCacheError> {
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksCacheError::ParseError(format!("Invalid RSA components: {}", e)))
    }

    /// Check if the cache has any keys.
    pub async fn has_keys(&self) -> bool {
        !self.keys.read().await.is_empty()
    }

    /// Get the number of cached keys.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Drop every cached key.
    pub async fn clear(&self) {
        self.keys.write().await.clear();
        *self.last_fetch.write().await = None;
        *self.last_attempt.write().await = None;
    }
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone)]
pub enum JwksCacheError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response.
    ParseError(String),
    /// No valid keys found in JWKS.
    NoValidKeys,
    /// Key with specified kid not found.
    KeyNotFound(String),
    /// No keys available in cache.
    NoKeysAvailable,
    /// The credential names no key and the key set holds several.
    KidRequired,
}

impl std::fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
            Self::KidRequired => write!(f, "Key set has several keys and no kid was given"),
        }
    }
}

impl std::error::Error for JwksCacheError {}
