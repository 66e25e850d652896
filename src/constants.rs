//! # System Constants
//!
//! Operational boundaries of the job dispatch layer: attempt limits, handler
//! thresholds, batch sizes, fixed source lists and retention windows.

/// Default attempt budget for an envelope.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Attempt budget for envelopes routed to the `critical` queue (alerts, EDD).
pub const CRITICAL_MAX_ATTEMPTS: u32 = 5;

/// Default in-flight lease before a claimed envelope becomes claimable again.
pub const DEFAULT_LEASE_SECONDS: u64 = 300;

/// Retry backoff: `attempt^4 + BASE + random(0..JITTER_PER_ATTEMPT * attempt)` seconds.
pub mod backoff {
    pub const BASE_DELAY_SECONDS: u64 = 15;
    pub const JITTER_SECONDS_PER_ATTEMPT: u64 = 30;
}

/// Backend client connection-level retry.
pub mod backend {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
}

/// Thresholds and sizes used by the task handlers.
pub mod handlers {
    /// Entity resolution match threshold sent to the backend.
    pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.75;
    /// Resolved entities at or above this confidence get a network analysis.
    pub const NETWORK_ANALYSIS_CONFIDENCE: f64 = 0.85;
    /// Network depth used for follow-ups from entity resolution and refresh.
    pub const DEFAULT_NETWORK_DEPTH: u32 = 2;
    /// Network risk exposure above this raises a `high_risk_network` alert.
    pub const HIGH_RISK_NETWORK_EXPOSURE: f64 = 0.7;

    pub const RESOLUTION_SYNC_BATCH_SIZE: usize = 1000;
    /// Upper bound on pages fetched per source in one sync run.
    pub const RESOLUTION_SYNC_MAX_BATCHES: usize = 100;
    pub const BATCH_SCORING_SIZE: usize = 100;
    pub const BATCH_SCREENING_SIZE: usize = 500;

    pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;
    pub const EDD_LOOKBACK_DAYS: u32 = 365;
    /// Ten years; longer windows are rejected at enqueue
    pub const MAX_LOOKBACK_DAYS: u32 = 3650;
    pub const EDD_NETWORK_DEPTH: u32 = 4;
    pub const TRANSACTION_FETCH_LIMIT: usize = 10_000;
    pub const SUSPICIOUS_VOLUME: f64 = 1_000_000.0;
    pub const SUSPICIOUS_COUNT: usize = 1000;
    pub const SUSPICIOUS_COUNTERPARTIES: usize = 100;
    pub const MAX_COUNTERPARTY_ANALYSES: usize = 50;
    pub const COUNTERPARTY_NETWORK_DEPTH: u32 = 1;
}

/// Source systems polled by the entity resolution sync.
pub const RESOLUTION_SOURCE_SYSTEMS: [&str; 4] = ["kyc_system", "core_banking", "crm", "trade_system"];

/// Watchlists refreshed by the watchlist sync when no sources are given.
pub const DEFAULT_WATCHLIST_SOURCES: [&str; 6] =
    ["ofac", "un", "eu", "uk_hmt", "dow_jones", "refinitiv"];

/// Blocking strategies requested when the producer does not name any.
pub const DEFAULT_BLOCKING_STRATEGIES: [&str; 2] = ["soundex", "ngram"];

/// Informational sub-tasks recorded by enhanced due diligence.
pub const EDD_MANUAL_CHECKS: [&str; 3] = [
    "adverse_media_screening",
    "source_of_funds_verification",
    "document_verification",
];

/// Retention windows applied by the cleanup job.
pub mod retention {
    pub const JOB_LOG_DAYS: i64 = 30;
    pub const RESULT_DAYS: i64 = 7;
    pub const DEAD_DAYS: i64 = 30;
}
