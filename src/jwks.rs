//! # JWKS Fetching and Caching
//!
//! Loads the identity provider's published signing keys (a JSON Web Key Set)
//! from its well-known endpoint and caches them for signature validation.
//!
//! ## Caching Policy
//!
//! The key set is fetched on first use and then served from memory. The
//! check-then-fetch sequence is guarded by a `Mutex`, so concurrent first
//! calls share a single fetch. A failed fetch is never cached: the cache stays
//! empty and the next call retries. With a refresh interval configured, a
//! stale set is refetched lazily; if that refetch fails, the previously
//! fetched keys keep serving so verification degrades gracefully instead of
//! going dark on a provider blip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Well-known path the identity provider publishes its key set under.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure to obtain a usable key set from the identity provider.
#[derive(Debug, Error)]
pub enum JwksError {
    /// The endpoint could not be reached or the response body not read.
    #[error("jwks request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a non-success status.
    #[error("jwks endpoint {url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    /// The response body was not a valid JWKS document.
    #[error("jwks document from {url} is malformed: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// The document parsed but contained no key this verifier can use.
    #[error("jwks document from {url} contains no usable signing key")]
    NoUsableKeys { url: String },
}

/// A single key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g. "RSA", "oct").
    pub kty: String,

    /// Key ID, referenced by the `kid` JWT header.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm hint (e.g. "RS256").
    #[serde(default)]
    pub alg: Option<String>,

    /// Public key use ("sig" or "enc").
    #[serde(default, rename = "use")]
    pub use_: Option<String>,

    /// Symmetric key material (oct keys), base64url.
    #[serde(default)]
    pub k: Option<String>,

    /// RSA modulus, base64url.
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent, base64url.
    #[serde(default)]
    pub e: Option<String>,
}

impl Jwk {
    /// Whether this key may be used for signature verification.
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }

    /// Convert to a decoding key. Returns `None` for encryption keys and key
    /// types this verifier does not support; such keys are skipped rather
    /// than failing the whole fetch.
    fn to_decoding_key(&self) -> Option<DecodingKey> {
        if !self.is_signing_key() {
            return None;
        }
        match self.kty.as_str() {
            "oct" => {
                let secret = URL_SAFE_NO_PAD.decode(self.k.as_deref()?).ok()?;
                Some(DecodingKey::from_secret(&secret))
            }
            "RSA" => {
                let (n, e) = (self.n.as_deref()?, self.e.as_deref()?);
                DecodingKey::from_rsa_components(n, e).ok()
            }
            _ => None,
        }
    }
}

/// JSON Web Key Set document, as published at the well-known endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// The provider's current keys.
    pub keys: Vec<Jwk>,
}

/// Converted keys from one fetch of the JWKS document.
struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    all: Vec<DecodingKey>,
    fetched_at: Instant,
}

impl KeySet {
    /// Returns `None` when the document yields no usable key.
    fn from_jwks(jwks: &JwkSet) -> Option<Self> {
        let mut by_kid = HashMap::new();
        let mut all = Vec::new();
        for jwk in &jwks.keys {
            if let Some(key) = jwk.to_decoding_key() {
                if let Some(kid) = &jwk.kid {
                    by_kid.insert(kid.clone(), key.clone());
                }
                all.push(key);
            }
        }
        if all.is_empty() {
            return None;
        }
        Some(Self {
            by_kid,
            all,
            fetched_at: Instant::now(),
        })
    }

    fn is_stale(&self, refresh_interval: Option<Duration>) -> bool {
        match refresh_interval {
            Some(ttl) => self.fetched_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Candidate keys for a token. A matching `kid` narrows to one key;
    /// otherwise every key in the set is a candidate, mirroring validation
    /// routines that are handed the whole set and try each key.
    fn candidates(&self, kid: Option<&str>) -> Vec<DecodingKey> {
        if let Some(kid) = kid {
            if let Some(key) = self.by_kid.get(kid) {
                return vec![key.clone()];
            }
        }
        self.all.clone()
    }
}

/// Caches the identity provider's signing keys, fetching on first need.
pub struct KeySetCache {
    jwks_url: String,
    refresh_interval: Option<Duration>,
    client: reqwest::blocking::Client,
    // Guards the check-then-fetch sequence so concurrent first calls share one fetch.
    state: Mutex<Option<KeySet>>,
}

impl KeySetCache {
    /// Create a cache for `<api_base_url>/.well-known/jwks.json`.
    ///
    /// # Security
    ///
    /// The URL must use HTTPS. Plain HTTP is accepted only for exact
    /// `localhost` / `127.0.0.1` hosts (test servers); anything else panics at
    /// construction time.
    pub fn new(api_base_url: &str, refresh_interval: Option<Duration>) -> Self {
        let jwks_url = format!("{}{}", api_base_url.trim_end_matches('/'), JWKS_PATH);

        let parsed = match Url::parse(&jwks_url) {
            Ok(u) => u,
            Err(e) => panic!("JWKS URL is invalid: {}. Error: {}", jwks_url, e),
        };
        match parsed.scheme() {
            "https" => {}
            "http" => {
                // Exact host match only - rejects lookalikes such as localhost.attacker.com
                let host = parsed.host_str().unwrap_or("");
                if host != "localhost" && host != "127.0.0.1" {
                    panic!(
                        "JWKS URL must use HTTPS (HTTP only allowed for localhost/127.0.0.1). Got: {}",
                        jwks_url
                    );
                }
            }
            other => panic!(
                "JWKS URL must use HTTPS or HTTP (localhost only). Got scheme {:?} in {}",
                other, jwks_url
            ),
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build JWKS HTTP client");

        Self {
            jwks_url,
            refresh_interval,
            client,
            state: Mutex::new(None),
        }
    }

    /// Candidate decoding keys for a token, fetching the key set on cache miss.
    ///
    /// On fetch failure any previously fetched set is left untouched: a stale
    /// set keeps serving (with a warning), while an empty cache propagates the
    /// error so the next call retries the fetch.
    pub fn keys_for(&self, kid: Option<&str>) -> Result<Vec<DecodingKey>, JwksError> {
        let mut state = self.state.lock().expect("key set cache Mutex poisoned");

        if let Some(set) = state.as_ref().filter(|s| !s.is_stale(self.refresh_interval)) {
            return Ok(set.candidates(kid));
        }

        match self.fetch() {
            Ok(fresh) => {
                let candidates = fresh.candidates(kid);
                *state = Some(fresh);
                Ok(candidates)
            }
            Err(e) => match state.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "jwks refresh failed, serving previously fetched keys");
                    Ok(stale.candidates(kid))
                }
                None => Err(e),
            },
        }
    }

    fn fetch(&self) -> Result<KeySet, JwksError> {
        debug!(url = %self.jwks_url, "fetching jwks");
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .map_err(|source| JwksError::Request {
                url: self.jwks_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(JwksError::Status {
                url: self.jwks_url.clone(),
                status,
            });
        }

        let body = response.text().map_err(|source| JwksError::Request {
            url: self.jwks_url.clone(),
            source,
        })?;
        let jwks: JwkSet = serde_json::from_str(&body).map_err(|source| JwksError::Parse {
            url: self.jwks_url.clone(),
            source,
        })?;

        let set = KeySet::from_jwks(&jwks).ok_or_else(|| JwksError::NoUsableKeys {
            url: self.jwks_url.clone(),
        })?;
        debug!(url = %self.jwks_url, key_count = set.all.len(), "jwks fetched");
        Ok(set)
    }

    /// Drop the cached key set so the next verification refetches it.
    ///
    /// Useful after a known key rotation or in tests.
    pub fn invalidate(&self) {
        *self.state.lock().expect("key set cache Mutex poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct_jwk(kid: &str, secret: &[u8]) -> Jwk {
        Jwk {
            kty: "oct".to_string(),
            kid: Some(kid.to_string()),
            alg: Some("HS256".to_string()),
            use_: Some("sig".to_string()),
            k: Some(URL_SAFE_NO_PAD.encode(secret)),
            n: None,
            e: None,
        }
    }

    #[test]
    fn parses_standard_document() {
        let jwks: JwkSet = serde_json::from_str(
            r#"{"keys":[
                {"kty":"RSA","kid":"rsa1","use":"sig","alg":"RS256","n":"AQAB","e":"AQAB"},
                {"kty":"oct","kid":"hmac1","alg":"HS256","k":"c2VjcmV0"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("rsa1"));
        assert!(jwks.keys[1].is_signing_key());
    }

    #[test]
    fn encryption_and_unknown_keys_are_skipped() {
        let mut enc = oct_jwk("enc1", b"secret");
        enc.use_ = Some("enc".to_string());
        let unknown = Jwk {
            kty: "EC".to_string(),
            kid: Some("ec1".to_string()),
            alg: Some("ES256".to_string()),
            use_: None,
            k: None,
            n: None,
            e: None,
        };
        let jwks = JwkSet {
            keys: vec![enc, unknown, oct_jwk("k1", b"secret")],
        };
        let set = KeySet::from_jwks(&jwks).unwrap();
        assert_eq!(set.all.len(), 1);
        assert!(set.by_kid.contains_key("k1"));
    }

    #[test]
    fn document_without_usable_keys_is_rejected() {
        let jwks = JwkSet { keys: vec![] };
        assert!(KeySet::from_jwks(&jwks).is_none());
    }

    #[test]
    fn kid_match_narrows_candidates() {
        let jwks = JwkSet {
            keys: vec![oct_jwk("k1", b"one"), oct_jwk("k2", b"two")],
        };
        let set = KeySet::from_jwks(&jwks).unwrap();
        assert_eq!(set.candidates(Some("k1")).len(), 1);
        // Unknown kid falls back to every key in the set
        assert_eq!(set.candidates(Some("k3")).len(), 2);
        assert_eq!(set.candidates(None).len(), 2);
    }

    #[test]
    fn staleness_follows_refresh_interval() {
        let jwks = JwkSet {
            keys: vec![oct_jwk("k1", b"secret")],
        };
        let set = KeySet::from_jwks(&jwks).unwrap();
        assert!(!set.is_stale(None));
        assert!(!set.is_stale(Some(Duration::from_secs(3600))));
        assert!(set.is_stale(Some(Duration::ZERO)));
    }

    #[test]
    #[should_panic(expected = "must use HTTPS")]
    fn plain_http_is_rejected_for_remote_hosts() {
        let _ = KeySetCache::new("http://idp.example.com", None);
    }

    #[test]
    fn localhost_http_is_allowed_for_tests() {
        let cache = KeySetCache::new("http://127.0.0.1:9/", None);
        assert_eq!(cache.jwks_url, "http://127.0.0.1:9/.well-known/jwks.json");
    }
}
