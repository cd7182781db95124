//! Round-robin load balancing strategies.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectError, Selection};

/// Plain rotation: `healthy[cursor mod len]`.
pub fn select(healthy: &[Arc<Backend>], cursor: usize) -> Result<Selection, SelectError> {
    if healthy.is_empty() {
        return Err(SelectError::NoHealthyBackend);
    }

    let backend = healthy[cursor % healthy.len()].clone();
    Ok(Selection {
        backend,
        next_cursor: cursor.wrapping_add(1),
    })
}

/// Weighted rotation.
///
/// Walks the virtual sequence in which backend `i` appears `weight_i` times,
/// in registry order, without materialising it. Zero-weight backends never
/// appear.
pub fn select_weighted(healthy: &[Arc<Backend>], cursor: usize) -> Result<Selection, SelectError> {
    let total: u64 = healthy.iter().map(|b| u64::from(b.weight)).sum();
    if total == 0 {
        return Err(SelectError::NoHealthyBackend);
    }

    let mut slot = (cursor as u64) % total;
    for backend in healthy {
        let weight = u64::from(backend.weight);
        if slot < weight {
            return Ok(Selection {
                backend: backend.clone(),
                next_cursor: cursor.wrapping_add(1),
            });
        }
        slot -= weight;
    }

    Err(SelectError::NoHealthyBackend)
}
