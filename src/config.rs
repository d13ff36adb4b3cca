//! # Verifier Configuration
//!
//! Settings for [`TokenVerifier`](crate::TokenVerifier), supplied by the caller
//! at construction time. The application owns where these values come from
//! (config file, environment); this crate only defines the type they are
//! injected through.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use mfa_token_verify::VerifierConfig;
//!
//! let config = VerifierConfig::new("https://api.multifactor.example", "acme-api")
//!     .leeway(60)
//!     .refresh_interval(Duration::from_secs(3600));
//! ```

use std::time::Duration;

/// Configuration for token verification.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Base URL of the identity provider API. The JWKS document is fetched
    /// from `<api_base_url>/.well-known/jwks.json`.
    pub api_base_url: String,
    /// Expected `aud` claim value (the API key issued by the provider).
    /// Compared for exact equality.
    pub audience: String,
    /// Clock skew tolerance for `exp` validation, in seconds.
    pub leeway_secs: u64,
    /// How long a fetched key set stays fresh. `None` means the set is fetched
    /// once and used for the remainder of the process lifetime, so key
    /// rotation by the provider requires a restart.
    pub refresh_interval: Option<Duration>,
}

impl VerifierConfig {
    /// Create a configuration with the default leeway (30 seconds) and no
    /// automatic key refresh.
    pub fn new(api_base_url: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            audience: audience.into(),
            leeway_secs: 30,
            refresh_interval: None,
        }
    }

    /// Configure leeway for time-based claim validation.
    ///
    /// Allows some clock skew between the identity provider and this host when
    /// validating `exp`.
    pub fn leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Enable time-based expiry of the cached key set so provider key rotation
    /// is observed without a process restart.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }
}
