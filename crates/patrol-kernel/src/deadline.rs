//! [`DeadlinePolicy`] – per-waypoint goal timeouts.
//!
//! Every waypoint index resolves to exactly one timeout: the first (and only)
//! [`DeadlineRule`] that lists the index, or the policy's default otherwise.
//! The partition between "long" and "short" legs is data, so deployments
//! change it through configuration rather than code.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use patrol_kernel::deadline::DeadlinePolicy;
//!
//! let policy = DeadlinePolicy::new(Duration::from_secs(12))
//!     .unwrap()
//!     .with_rule([1, 3], Duration::from_secs(17))
//!     .unwrap();
//!
//! assert_eq!(policy.timeout_for(0), Duration::from_secs(12));
//! assert_eq!(policy.timeout_for(3), Duration::from_secs(17));
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use patrol_types::PatrolError;

/// Timeout used for waypoints not covered by any rule.
pub const REFERENCE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// Timeout used for the reference route's long legs.
pub const REFERENCE_LONG_TIMEOUT: Duration = Duration::from_secs(17);

/// Waypoint indices of the reference route that get [`REFERENCE_LONG_TIMEOUT`].
pub const REFERENCE_LONG_LEGS: [usize; 4] = [1, 3, 4, 7];

// ────────────────────────────────────────────────────────────────────────────
// DeadlineRule
// ────────────────────────────────────────────────────────────────────────────

/// A set of waypoint indices sharing one timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineRule {
    pub indices: BTreeSet<usize>,
    pub timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// DeadlinePolicy
// ────────────────────────────────────────────────────────────────────────────

/// Total, side-effect-free mapping from waypoint index to goal timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlinePolicy {
    default: Duration,
    rules: Vec<DeadlineRule>,
}

impl DeadlinePolicy {
    /// Create a policy where every index maps to `default`.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::InvalidDeadline`] when `default` is zero.
    pub fn new(default: Duration) -> Result<Self, PatrolError> {
        if default.is_zero() {
            return Err(PatrolError::InvalidDeadline(
                "default timeout must be positive".to_string(),
            ));
        }
        Ok(Self {
            default,
            rules: Vec::new(),
        })
    }

    /// Add a rule mapping every index in `indices` to `timeout`.
    ///
    /// # Errors
    ///
    /// * [`PatrolError::InvalidDeadline`] – `timeout` is zero.
    /// * [`PatrolError::OverlappingDeadlineRule`] – an index already belongs
    ///   to another rule, which would make its timeout ambiguous.
    pub fn with_rule(
        mut self,
        indices: impl IntoIterator<Item = usize>,
        timeout: Duration,
    ) -> Result<Self, PatrolError> {
        if timeout.is_zero() {
            return Err(PatrolError::InvalidDeadline(
                "rule timeout must be positive".to_string(),
            ));
        }
        let indices: BTreeSet<usize> = indices.into_iter().collect();
        if let Some(&index) = indices
            .iter()
            .find(|i| self.rules.iter().any(|r| r.indices.contains(i)))
        {
            return Err(PatrolError::OverlappingDeadlineRule { index });
        }
        self.rules.push(DeadlineRule { indices, timeout });
        Ok(self)
    }

    /// The reference route's policy: 17 s for indices 1, 3, 4 and 7, 12 s for
    /// everything else.
    pub fn reference() -> Self {
        Self {
            default: REFERENCE_DEFAULT_TIMEOUT,
            rules: vec![DeadlineRule {
                indices: REFERENCE_LONG_LEGS.into_iter().collect(),
                timeout: REFERENCE_LONG_TIMEOUT,
            }],
        }
    }

    /// Return the timeout for the goal at `index`.
    pub fn timeout_for(&self, index: usize) -> Duration {
        self.rules
            .iter()
            .find(|r| r.indices.contains(&index))
            .map_or(self.default, |r| r.timeout)
    }

    /// Timeout for indices not covered by any rule.
    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    pub fn rules(&self) -> &[DeadlineRule] {
        &self.rules
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_policy_partitions_long_and_short_legs() {
        let policy = DeadlinePolicy::reference();
        for i in 0..10 {
            let expected = if REFERENCE_LONG_LEGS.contains(&i) {
                Duration::from_secs(17)
            } else {
                Duration::from_secs(12)
            };
            assert_eq!(policy.timeout_for(i), expected, "index {i}");
        }
    }

    #[test]
    fn every_index_is_positive_and_stable() {
        let policy = DeadlinePolicy::reference();
        for i in 0..64 {
            let first = policy.timeout_for(i);
            assert!(!first.is_zero());
            assert_eq!(policy.timeout_for(i), first);
        }
    }

    #[test]
    fn unknown_index_falls_back_to_default() {
        let policy = DeadlinePolicy::new(Duration::from_secs(5))
            .unwrap()
            .with_rule([2], Duration::from_secs(9))
            .unwrap();
        assert_eq!(policy.timeout_for(2), Duration::from_secs(9));
        assert_eq!(policy.timeout_for(1_000), Duration::from_secs(5));
    }

    #[test]
    fn zero_default_is_rejected() {
        let result = DeadlinePolicy::new(Duration::ZERO);
        assert!(matches!(result, Err(PatrolError::InvalidDeadline(_))));
    }

    #[test]
    fn zero_rule_timeout_is_rejected() {
        let result = DeadlinePolicy::new(Duration::from_secs(1))
            .unwrap()
            .with_rule([0], Duration::ZERO);
        assert!(matches!(result, Err(PatrolError::InvalidDeadline(_))));
    }

    #[test]
    fn overlapping_rules_are_rejected() {
        let result = DeadlinePolicy::new(Duration::from_secs(10))
            .unwrap()
            .with_rule([1, 2], Duration::from_secs(15))
            .unwrap()
            .with_rule([2, 3], Duration::from_secs(20));
        assert_eq!(
            result,
            Err(PatrolError::OverlappingDeadlineRule { index: 2 })
        );
    }

    #[test]
    fn disjoint_rules_each_apply() {
        let policy = DeadlinePolicy::new(Duration::from_secs(10))
            .unwrap()
            .with_rule([0], Duration::from_secs(1))
            .unwrap()
            .with_rule([1], Duration::from_secs(2))
            .unwrap();
        assert_eq!(policy.timeout_for(0), Duration::from_secs(1));
        assert_eq!(policy.timeout_for(1), Duration::from_secs(2));
        assert_eq!(policy.timeout_for(2), Duration::from_secs(10));
        assert_eq!(policy.rules().len(), 2);
    }

    #[test]
    fn default_is_reference() {
        assert_eq!(DeadlinePolicy::default(), DeadlinePolicy::reference());
        assert_eq!(
            DeadlinePolicy::default().default_timeout(),
            REFERENCE_DEFAULT_TIMEOUT
        );
    }
}
