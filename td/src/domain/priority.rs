//! Scheduling priority for work waiting on a concurrency slot.

use serde::{Deserialize, Serialize};

/// Relative priority used when the scheduler has more runnable work
/// than free slots. Higher variants are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_low_to_critical() {
        let mut p = vec![Priority::Critical, Priority::Low, Priority::High, Priority::Normal];
        p.sort();
        assert_eq!(p, vec![Priority::Low, Priority::Normal, Priority::High, Priority::Critical]);
    }

    #[test]
    fn priority_defaults_to_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
