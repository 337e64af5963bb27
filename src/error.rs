//! Typed failures surfaced by the forecast engine.
//!
//! Only unrecoverable conditions end up here: no raw data, or no usable
//! configuration. Per-parameter and per-hour problems are absorbed by the
//! consensus fallback ladders and reported inside the forecast instead.

use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum ForecastError {
    // ---
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Upstream request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream response could not be parsed: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ForecastError {
    /// True when the failure originates at the upstream provider.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ForecastError::Network(_)
                | ForecastError::UpstreamStatus { .. }
                | ForecastError::Parse(_)
        )
    }
}

/// Internal failure of a consensus algorithm, consumed by its fallback ladder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    // ---
    #[error("no samples")]
    Empty,

    #[error("non-finite input: {0}")]
    NonFinite(String),

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("unrecognised weather code {0}")]
    UnknownCode(f64),
}
