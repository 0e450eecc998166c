//! Shared provider traits for dependency injection.
//!
//! External dependencies that make output non-deterministic sit behind
//! small traits so the modules using them can be tested with fixed values.

use chrono::{DateTime, Local};

/// Trait for providing timestamps.
///
/// # Example
///
/// ```
/// use nlsh::providers::{TimeProvider, SystemTimeProvider};
///
/// let provider = SystemTimeProvider;
/// let timestamp = provider.now();
/// assert!(timestamp.timestamp() > 0);
/// ```
pub trait TimeProvider: Send + Sync {
    /// Returns the current local time.
    fn now(&self) -> DateTime<Local>;
}

/// Default time provider backed by the system clock.
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Time provider that always returns the same instant.
pub struct FixedTimeProvider(pub DateTime<Local>);

impl TimeProvider for FixedTimeProvider {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}
