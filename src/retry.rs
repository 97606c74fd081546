use std::time::Duration;

use crate::error::{ProviderError, ProviderErrorKind};

/// Provider calls per analysis unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Pause between attempts unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Whether a failed attempt may be repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again after the policy's delay.
    Transient,
    /// Give up now and report the error.
    Terminal,
}

/// Default classifier.
///
/// Quota exhaustion, unknown models, rejected credentials and malformed
/// requests cannot succeed on a second try. Everything else is retried.
pub fn classify_provider_error(err: &ProviderError) -> ErrorClass {
    match err.kind() {
        ProviderErrorKind::Quota
        | ProviderErrorKind::ModelNotFound
        | ProviderErrorKind::Authentication
        | ProviderErrorKind::InvalidRequest => ErrorClass::Terminal,
        ProviderErrorKind::Api | ProviderErrorKind::Transport | ProviderErrorKind::Unexpected => {
            ErrorClass::Transient
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of provider calls allowed for one analysis, including
    /// the first. Values below one are treated as one.
    pub max_attempts: u32,
    /// Pause before every attempt except the first.
    pub delay: Duration,
    /// Maps a provider error to its retry class.
    pub classifier: fn(&ProviderError) -> ErrorClass,
}

impl RetryPolicy {
    /// Creates a policy using [`classify_provider_error`].
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            classifier: classify_provider_error,
        }
    }

    /// Replaces the classifier, e.g. to retry authentication failures.
    pub fn with_classifier(mut self, classifier: fn(&ProviderError) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    /// Effective attempt count, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs the configured classifier.
    pub fn classify(&self, err: &ProviderError) -> ErrorClass {
        (self.classifier)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Source of the inter-attempt pause.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Records requested pauses without waiting.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) sleeps: Vec<Duration>,
}

#[cfg(test)]
impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }
}
