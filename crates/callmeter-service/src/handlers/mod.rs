//! API handlers.

pub mod admin;
pub mod agents;
pub mod calls;
pub mod health;
pub mod topups;
pub mod wallet;
pub mod webhooks;

use serde::Deserialize;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, capped at 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

pub(crate) fn default_limit() -> usize {
    50
}
