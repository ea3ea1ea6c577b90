//! Bounded retry of failed calls.
//!
//! By default only the two timeout kinds are retried. A retry re-runs the
//! call from script building onward; input validation is not repeated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Error;

/// Decides whether an error may be retried.
pub type RetryClassifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// How many times, and for which errors, a call is retried.
///
/// ```
/// use std::time::Duration;
/// use script_relay::retry::RetryPolicy;
/// use script_relay::Error;
///
/// let policy = RetryPolicy::new(1, Duration::ZERO);
/// let timeout = Error::from_wire(1, "timed out", "Things3", "list");
/// assert!(policy.should_retry(&timeout, 0));
/// assert!(!policy.should_retry(&timeout, 1));
/// assert!(!policy.should_retry(&Error::unclassified("boom"), 0));
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    classifier: RetryClassifier,
}

impl RetryPolicy {
    /// Retry timeouts up to `max_retries` times, pausing `delay` between
    /// attempts.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            classifier: Arc::new(Error::is_timeout),
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Policy described by the retry configuration section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.delay_ms))
    }

    /// Replace the classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Same classifier and delay with a different bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pause between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether `error` is retriable at all.
    pub fn is_retriable(&self, error: &Error) -> bool {
        (self.classifier)(error)
    }

    /// Whether to retry after `error`, given `retries_done` retries so far.
    pub fn should_retry(&self, error: &Error, retries_done: u32) -> bool {
        retries_done < self.max_retries && self.is_retriable(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .finish()
    }
}
