//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectError, Selection};

/// Selects the backend with the minimum number of active connections.
///
/// Counts are read once per candidate; a count changing right after the read
/// is accepted. The cursor passes through untouched.
pub fn select(healthy: &[Arc<Backend>], cursor: usize) -> Result<Selection, SelectError> {
    // min_by_key keeps the first of equal elements, so ties go to registry order.
    healthy
        .iter()
        .min_by_key(|b| b.active_connections())
        .map(|backend| Selection {
            backend: backend.clone(),
            next_cursor: cursor,
        })
        .ok_or(SelectError::NoHealthyBackend)
}
