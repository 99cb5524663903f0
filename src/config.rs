//! Runtime configuration for the object-model core
//!
//! This module provides the tunable policies of the runtime: how inline method caches
//! grow, whether lock ownership is tracked for debug assertions, how large the realized
//! class tree may plausibly become, and when retired cache memory is reclaimed.

use crate::{Error, Result};

/// Growth policy of the per-class inline method cache.
///
/// The cache doubles its capacity before an insertion would push the occupancy above
/// `load_factor_num / load_factor_den` of the capacity. The load factor must stay strictly
/// below one so that every probe sequence is guaranteed to meet an empty bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Capacity of a freshly created or reset cache (power of two, at least 2)
    pub initial_capacity: u32,
    /// Capacity at which the cache stops doubling and is flushed instead (power of two)
    pub max_capacity: u32,
    /// Numerator of the maximum load factor
    pub load_factor_num: u32,
    /// Denominator of the maximum load factor
    pub load_factor_den: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            initial_capacity: 4,
            max_capacity: 1 << 16,
            load_factor_num: 3,
            load_factor_den: 4,
        }
    }
}

impl CachePolicy {
    /// The highest occupancy a cache of `capacity` buckets may reach.
    #[must_use]
    pub fn max_occupied(&self, capacity: u32) -> u32 {
        let limit = u64::from(capacity) * u64::from(self.load_factor_num)
            / u64::from(self.load_factor_den);

        // At least one bucket is always left empty as the probe sentinel
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        limit.min(capacity.saturating_sub(1))
    }

    /// Check the policy for values that would break the cache invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a capacity is not a power of two, the initial
    /// capacity is below 2, the maximum capacity is below the initial one, or the load
    /// factor is not in the open interval `(0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if !self.initial_capacity.is_power_of_two() || self.initial_capacity < 2 {
            return Err(Error::InvalidConfig(format!(
                "initial cache capacity {} must be a power of two >= 2",
                self.initial_capacity
            )));
        }

        if !self.max_capacity.is_power_of_two() || self.max_capacity < self.initial_capacity {
            return Err(Error::InvalidConfig(format!(
                "maximum cache capacity {} must be a power of two >= {}",
                self.max_capacity, self.initial_capacity
            )));
        }

        if self.load_factor_num == 0 || self.load_factor_num >= self.load_factor_den {
            return Err(Error::InvalidConfig(format!(
                "cache load factor {}/{} must be in (0, 1)",
                self.load_factor_num, self.load_factor_den
            )));
        }

        Ok(())
    }
}

/// Configuration of a [`crate::ClassRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Inline method cache growth policy
    pub cache: CachePolicy,
    /// Track lock ownership so that `assert_locked` / `assert_unlocked` are checked
    pub lock_debug: bool,
    /// Upper bound of nodes visited by any class tree walk before it is declared corrupt
    pub max_class_count: usize,
    /// Number of pending retired bucket arrays which triggers an automatic collection
    pub reclaim_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CachePolicy::default(),
            lock_debug: cfg!(debug_assertions),
            max_class_count: 1_000_000,
            reclaim_threshold: 32,
        }
    }
}

impl RuntimeConfig {
    /// Configuration for development: lock tracking on, eager reclamation.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            lock_debug: true,
            reclaim_threshold: 4,
            ..Self::default()
        }
    }

    /// Configuration for deployment: no lock tracking on the hot paths.
    #[must_use]
    pub fn production() -> Self {
        Self {
            lock_debug: false,
            ..Self::default()
        }
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the cache policy is invalid or the class count
    /// budget is zero.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;

        if self.max_class_count == 0 {
            return Err(Error::InvalidConfig(
                "max_class_count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
