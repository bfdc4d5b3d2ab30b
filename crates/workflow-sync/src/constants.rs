//! Sync-wide constants
//!
//! Single source of truth for defaults used by the config structs and the
//! GitHub client.

/// GitHub REST API settings
pub mod github {
    /// Public API root
    pub const API_BASE_URL: &str = "https://api.github.com";
    /// Media type requested on every call
    pub const ACCEPT: &str = "application/vnd.github+json";
    /// Pinned REST API version
    pub const API_VERSION: &str = "2022-11-28";
    /// Environment variable that overrides the configured token
    pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
}

/// Default values for configuration
pub mod defaults {
    /// Branch pipeline files are committed to
    pub const BRANCH: &str = "main";
    /// Per-request timeout
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    /// User agent sent to the API (required by GitHub)
    pub const USER_AGENT: &str = concat!("flowctl/", env!("CARGO_PKG_VERSION"));
    /// Delay between successful polls
    pub const POLL_INTERVAL_MS: u64 = 5_000;
    /// Consecutive poll failures before tracking is reported degraded
    pub const FAILURE_THRESHOLD: u32 = 3;
    /// First retry delay after a failed poll
    pub const BACKOFF_BASE_MS: u64 = 1_000;
    /// Upper bound on the retry delay
    pub const BACKOFF_MAX_MS: u64 = 30_000;
}

/// Deploy settings
pub mod deploy {
    /// Commit message prefix for pipeline writes
    pub const COMMIT_PREFIX: &str = "Deploy workflow";
    /// Commit message prefix for pipeline removal
    pub const REMOVE_PREFIX: &str = "Remove workflow";
    /// Attempts to find a freshly dispatched run
    pub const DISPATCH_LOOKUP_ATTEMPTS: u32 = 5;
    /// Delay between run lookups after a dispatch
    pub const DISPATCH_LOOKUP_DELAY_MS: u64 = 2_000;
}
