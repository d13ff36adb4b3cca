//! # Token Verification
//!
//! Validates JWTs issued by the identity provider and extracts the portal
//! login claims: the subject username and whether the account must change its
//! password.
//!
//! ## Validation Flow
//!
//! 1. Parse the JWT header to get `kid` (key ID) and `alg` (algorithm)
//! 2. Reject algorithms outside the supported whitelist
//! 3. Fetch candidate decoding keys from the JWKS cache (fetches on miss)
//! 4. Validate signature, expiration, and audience using `jsonwebtoken`
//!    (issuer validation stays off: the audience value is the per-tenant API
//!    key and already pins the provider)
//! 5. Extract the `sub` claim and the provider's `ChangePassword` claim
//!
//! Every failure is logged with its cause and collapsed to
//! [`Verdict::Invalid`] - callers see an authentication rejection, never a
//! system error. Failing closed this way means "could not prove valid" and
//! "proven invalid" are indistinguishable at the public boundary.
//!
//! ## Replay
//!
//! The provider's policy calls for replay protection, but no replay-tracking
//! store is wired in and `jsonwebtoken` keeps no replay state, so an already
//! consumed token that is otherwise valid verifies again. Enforcing replay
//! would need a shared store consulted here.

use jsonwebtoken::{Algorithm, Validation};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::VerifierConfig;
use crate::jwks::{JwksError, KeySetCache};

/// Claim the identity provider emits when the account must change its
/// password. Presence with any value is the positive case.
pub const CHANGE_PASSWORD_CLAIM: &str = "ChangePassword";

/// Supported JWT algorithms - whitelist for security.
const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::HS256,
    Algorithm::HS384,
    Algorithm::HS512,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
];

/// Outcome of a verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The token passed signature, lifetime, and audience checks.
    Valid {
        /// The token's subject claim, when present.
        user_name: Option<String>,
        /// Whether the provider flagged the account for a password change.
        must_change_password: bool,
    },
    /// The token failed validation, or no key set was available to validate
    /// it. The distinguishing detail is logged, not returned.
    Invalid,
}

impl Verdict {
    /// Whether the token was proven valid.
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid { .. })
    }

    /// Subject username of a valid token.
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Verdict::Valid { user_name, .. } => user_name.as_deref(),
            Verdict::Invalid => None,
        }
    }

    /// Whether a valid token carried the password-change flag.
    pub fn must_change_password(&self) -> bool {
        matches!(
            self,
            Verdict::Valid {
                must_change_password: true,
                ..
            }
        )
    }

    /// Decompose into `(is_valid, user_name, must_change_password)`, the
    /// shape session layers consume.
    pub fn into_parts(self) -> (bool, Option<String>, bool) {
        match self {
            Verdict::Valid {
                user_name,
                must_change_password,
            } => (true, user_name, must_change_password),
            Verdict::Invalid => (false, None, false),
        }
    }
}

/// Claims pulled from a token that passed validation.
struct VerifiedToken {
    user_name: Option<String>,
    must_change_password: bool,
}

/// Why a token was rejected. Logged via [`VerifyError::log`]; never crosses
/// the public boundary, which collapses to [`Verdict::Invalid`].
#[derive(Debug, Error)]
pub(crate) enum VerifyError {
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(#[from] JwksError),
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("unsupported algorithm {alg:?}")]
    UnsupportedAlgorithm { alg: Algorithm },
    #[error("no signing key available for the token")]
    NoMatchingKey,
    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
}

impl VerifyError {
    fn log(&self) {
        match self {
            VerifyError::KeysUnavailable(e) => {
                warn!(error = %e, "token verification failed: signing keys unavailable");
            }
            VerifyError::Malformed(e) => {
                debug!(error = %e, "token verification failed: malformed token");
            }
            VerifyError::UnsupportedAlgorithm { alg } => {
                warn!(?alg, "token verification failed: unsupported algorithm");
            }
            VerifyError::NoMatchingKey => {
                warn!("token verification failed: no signing key available");
            }
            VerifyError::Rejected(e) => {
                warn!(error = %e, "token verification failed");
            }
        }
    }
}

/// Verifies identity-provider JWTs against the cached JWKS.
pub struct TokenVerifier {
    audience: String,
    leeway_secs: u64,
    keys: KeySetCache,
}

impl TokenVerifier {
    /// Create a verifier from explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics when the configured base URL is invalid or not HTTPS (HTTP is
    /// accepted for localhost test servers only) - see [`KeySetCache::new`].
    pub fn new(config: VerifierConfig) -> Self {
        let keys = KeySetCache::new(&config.api_base_url, config.refresh_interval);
        Self {
            audience: config.audience,
            leeway_secs: config.leeway_secs,
            keys,
        }
    }

    /// Verify a token and extract its login claims.
    ///
    /// Returns [`Verdict::Valid`] only when the signature verifies against a
    /// key in the current set, the audience equals the configured value
    /// exactly, and the token has not expired. Any failure - including an
    /// unreachable JWKS endpoint - is logged and returned as
    /// [`Verdict::Invalid`]; no error escapes to the caller. No retries are
    /// performed; a single fetch or validation failure is terminal for the
    /// call.
    pub fn verify(&self, token: &str) -> Verdict {
        match self.verify_inner(token) {
            Ok(verified) => {
                debug!(
                    user = verified.user_name.as_deref().unwrap_or("<none>"),
                    must_change_password = verified.must_change_password,
                    "token verified"
                );
                Verdict::Valid {
                    user_name: verified.user_name,
                    must_change_password: verified.must_change_password,
                }
            }
            Err(e) => {
                e.log();
                Verdict::Invalid
            }
        }
    }

    /// Drop the cached key set so the next verification refetches it.
    ///
    /// Useful after a known provider key rotation, since the cache otherwise
    /// holds its keys for the process lifetime.
    pub fn invalidate_keys(&self) {
        self.keys.invalidate();
    }

    fn verify_inner(&self, token: &str) -> Result<VerifiedToken, VerifyError> {
        let header = jsonwebtoken::decode_header(token).map_err(VerifyError::Malformed)?;
        if !SUPPORTED_ALGORITHMS.contains(&header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm { alg: header.alg });
        }

        let candidates = self.keys.keys_for(header.kid.as_deref())?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let mut last_err = None;
        for key in &candidates {
            match jsonwebtoken::decode::<Value>(token, key, &validation) {
                Ok(data) => return Ok(extract_claims(&data.claims)),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(VerifyError::Rejected(e)),
            None => Err(VerifyError::NoMatchingKey),
        }
    }
}

fn extract_claims(claims: &Value) -> VerifiedToken {
    VerifiedToken {
        user_name: claims.get("sub").and_then(Value::as_str).map(str::to_owned),
        // Presence with any value, including null, flags the account.
        must_change_password: claims.get(CHANGE_PASSWORD_CLAIM).is_some(),
    }
}
