//! Reference-counted activity flags
//!
//! Concurrent operations share one visible flag per key: it turns on with
//! the first holder and off when the last one finishes, so an early
//! finisher cannot clear a flag another operation still needs.

use dashmap::DashMap;

/// Key used when one indicator covers every vehicle
pub const ANY_VEHICLE: &str = "";

/// Per-key holder counts
#[derive(Debug, Default)]
pub struct ActivityIndicator {
    holders: DashMap<String, usize>,
}

impl ActivityIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a holder. Returns true when `key` just became active.
    pub fn enter(&self, key: &str) -> bool {
        let mut count = self.holders.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Remove a holder. Returns true when `key` just became idle.
    pub fn exit(&self, key: &str) -> bool {
        let idle = match self.holders.get_mut(key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => return false,
        };
        if idle {
            self.holders.remove_if(key, |_, count| *count == 0);
        }
        idle
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.holders.get(key).is_some_and(|count| *count > 0)
    }

    pub fn holders(&self, key: &str) -> usize {
        self.holders.get(key).map(|count| *count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_follows_first_and_last_holder() {
        let indicator = ActivityIndicator::new();
        assert!(indicator.enter(ANY_VEHICLE));
        assert!(!indicator.enter(ANY_VEHICLE));
        assert_eq!(indicator.holders(ANY_VEHICLE), 2);

        assert!(!indicator.exit(ANY_VEHICLE));
        assert!(indicator.is_active(ANY_VEHICLE));
        assert!(indicator.exit(ANY_VEHICLE));
        assert!(!indicator.is_active(ANY_VEHICLE));
    }

    #[test]
    fn test_keys_are_independent() {
        let indicator = ActivityIndicator::new();
        indicator.enter("A");
        assert!(!indicator.is_active("B"));
        assert!(!indicator.exit("B"));
        assert!(indicator.exit("A"));
    }
}
