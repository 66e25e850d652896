//! Queue scan order.
//!
//! The dispatcher asks a [`QueueOrdering`] which queues to try, in order, on
//! each claim. [`StrictPriority`] always prefers higher weights and rotates
//! queues that share a weight so neither starves the other. Aging policies
//! can be plugged in through the same trait.

use crate::messaging::QueueName;

pub trait QueueOrdering: Send + Sync + std::fmt::Debug {
    /// Queues to scan for claim number `cycle`
    fn scan_order(&self, cycle: u64) -> Vec<QueueName>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrictPriority;

impl QueueOrdering for StrictPriority {
    fn scan_order(&self, cycle: u64) -> Vec<QueueName> {
        let mut order = Vec::with_capacity(QueueName::ALL.len());
        let mut queues = QueueName::ALL.to_vec();
        queues.sort_by(|a, b| b.weight().cmp(&a.weight()));

        for group in queues.chunk_by(|a, b| a.weight() == b.weight()) {
            let mut group = group.to_vec();
            let shift = (cycle % group.len() as u64) as usize;
            group.rotate_left(shift);
            order.extend(group);
        }
        order
    }
}
