//! Per-enqueue options.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::QueueName;
use crate::error::{SpindleError, SpindleResult};

/// Matches the retry budget of the queueing library the demo was built on.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Handler deadline when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Builder-style options for `Client::enqueue`.
///
/// ```ignore
/// let opts = EnqueueOptions::new()
///     .queue("critical")
///     .process_in(Duration::from_millis(300))
///     .max_retry(3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: Option<QueueName>,
    pub process_in: Option<Duration>,
    pub process_at: Option<DateTime<Utc>>,
    pub max_retry: Option<u32>,
    pub timeout: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = Some(delay);
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Earliest dispatch time relative to `now`.
    ///
    /// `process_in` and `process_at` are mutually exclusive.
    pub fn resolve_process_at(&self, now: DateTime<Utc>) -> SpindleResult<DateTime<Utc>> {
        match (self.process_in, self.process_at) {
            (Some(_), Some(_)) => Err(SpindleError::InvalidOption(
                "process_in and process_at cannot both be set".into(),
            )),
            (Some(delay), None) => {
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|e| SpindleError::InvalidOption(format!("process_in: {e}")))?;
                now.checked_add_signed(delay).ok_or_else(|| {
                    SpindleError::InvalidOption("process_in is beyond the supported date range".into())
                })
            }
            (None, Some(at)) => Ok(at),
            (None, None) => Ok(now),
        }
    }

    pub fn validate(&self) -> SpindleResult<()> {
        if let Some(queue) = &self.queue
            && queue.as_str().is_empty()
        {
            return Err(SpindleError::InvalidOption("queue name must not be empty".into()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SpindleError::InvalidOption("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_delay_forms_is_a_configuration_error() {
        let now = Utc::now();
        let opts = EnqueueOptions::new()
            .process_in(Duration::from_secs(1))
            .process_at(now);
        assert!(matches!(
            opts.resolve_process_at(now),
            Err(SpindleError::InvalidOption(_))
        ));
    }

    #[test]
    fn resolves_relative_and_absolute_times() {
        let now = Utc::now();

        let none = EnqueueOptions::new().resolve_process_at(now).unwrap();
        assert_eq!(none, now);

        let rel = EnqueueOptions::new()
            .process_in(Duration::from_millis(300))
            .resolve_process_at(now)
            .unwrap();
        assert_eq!(rel, now + chrono::Duration::milliseconds(300));

        let at = now + chrono::Duration::hours(1);
        let abs = EnqueueOptions::new().process_at(at).resolve_process_at(now).unwrap();
        assert_eq!(abs, at);
    }

    #[test]
    fn out_of_range_delay_is_an_option_error() {
        let opts = EnqueueOptions::new().process_in(Duration::from_secs(10_000_000_000_000));
        assert!(matches!(
            opts.resolve_process_at(Utc::now()),
            Err(SpindleError::InvalidOption(_))
        ));
    }

    #[test]
    fn empty_queue_and_zero_timeout_are_rejected() {
        assert!(EnqueueOptions::new().queue("").validate().is_err());
        assert!(EnqueueOptions::new().timeout(Duration::ZERO).validate().is_err());
        assert!(EnqueueOptions::new().queue("low").validate().is_ok());
    }
}
