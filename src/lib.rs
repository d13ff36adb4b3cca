//! # mfa-token-verify
//!
//! Verifies JSON Web Tokens issued by a remote identity API using that API's
//! published signing keys (JWKS), and extracts the two pieces of information a
//! portal session layer needs from a valid token: the subject username and
//! whether the user must change their password.
//!
//! ## Overview
//!
//! The crate is a thin orchestration of two responsibilities:
//!
//! - **[`jwks`]** - fetches the provider's JSON Web Key Set from
//!   `<api_base_url>/.well-known/jwks.json` and caches it for the process
//!   lifetime (optionally with a refresh interval)
//! - **[`verifier`]** - builds validation constraints (audience exact-match,
//!   lifetime, signing key) and delegates cryptographic verification to the
//!   `jsonwebtoken` crate
//!
//! Cryptographic verification and claim parsing are fully delegated; there is
//! no custom algorithm here. Every validation failure collapses to
//! [`Verdict::Invalid`] at the public boundary - fail closed - with the
//! distinguishing detail emitted through `tracing` only.
//!
//! ## Example
//!
//! ```no_run
//! use mfa_token_verify::{TokenVerifier, Verdict, VerifierConfig};
//!
//! let config = VerifierConfig::new("https://api.multifactor.example", "acme-api");
//! let verifier = TokenVerifier::new(config);
//!
//! match verifier.verify("eyJhbGciOi...") {
//!     Verdict::Valid { user_name, must_change_password } => {
//!         // establish the session
//!     }
//!     Verdict::Invalid => {
//!         // authentication rejection, not a system error
//!     }
//! }
//! ```

pub mod config;
pub mod jwks;
pub mod verifier;

pub use config::VerifierConfig;
pub use jwks::{Jwk, JwkSet, JwksError, KeySetCache, JWKS_PATH};
pub use verifier::{TokenVerifier, Verdict, CHANGE_PASSWORD_CLAIM};
