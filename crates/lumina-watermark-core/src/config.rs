//! Pipeline configuration.

use std::time::Duration;

use crate::capability::MIN_GLES_VERSION;

/// Recovery policy applied when the decoder or the render thread fails.
///
/// Every recovery is a full teardown-and-recreate of the pipeline. The policy
/// only decides how long to wait before recreating and when to give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Maximum consecutive recreations before the controller gives up.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first recreation
    pub initial_backoff: Duration,
    /// Base delay for the second attempt; doubled for every further attempt
    pub backoff_step: Duration,
    /// Upper bound for the delay between attempts
    pub max_backoff: Duration,
    /// Time spent `Playing` after which the attempt counter resets
    pub reset_after: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(8),
            initial_backoff: Duration::ZERO,
            backoff_step: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            reset_after: Duration::from_secs(10),
        }
    }
}

impl RecoveryPolicy {
    /// Immediate, unlimited recreation on every error.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::ZERO,
            backoff_step: Duration::ZERO,
            max_backoff: Duration::ZERO,
            reset_after: Duration::ZERO,
        }
    }

    /// Returns the delay before recovery `attempt` (1-based), or `None` if the
    /// attempt exceeds `max_attempts`.
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        if attempt == 1 {
            return Some(self.initial_backoff);
        }
        let shift = (attempt - 2).min(16);
        let delay = self.backoff_step.saturating_mul(1u32 << shift);
        Some(delay.min(self.max_backoff))
    }
}

/// Configuration for one [`PlaybackController`](crate::controller::PlaybackController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Loop the stream when it ends
    pub looping: bool,
    /// Keep the display awake while playing
    pub keep_screen_on: bool,
    /// Minimum packed GLES version (`major << 16 | minor`) needed for compositing
    pub min_gles_version: u32,
    /// Error recovery policy
    pub recovery: RecoveryPolicy,
    /// How long `destroy()` waits for the render thread to acknowledge release
    pub render_command_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            looping: true,
            keep_screen_on: true,
            min_gles_version: MIN_GLES_VERSION,
            recovery: RecoveryPolicy::default(),
            render_command_timeout: Duration::from_secs(2),
        }
    }
}

impl PipelineConfig {
    /// Sets the looping flag.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Sets the keep-screen-on flag.
    pub fn with_keep_screen_on(mut self, keep_screen_on: bool) -> Self {
        self.keep_screen_on = keep_screen_on;
        self
    }

    /// Sets the recovery policy.
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets the render command timeout.
    pub fn with_render_command_timeout(mut self, timeout: Duration) -> Self {
        self.render_command_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.backoff_for(1), Some(Duration::ZERO));
        assert_eq!(policy.backoff_for(2), Some(Duration::from_millis(50)));
        assert_eq!(policy.backoff_for(3), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff_for(7), Some(Duration::from_millis(1600)));
        assert_eq!(policy.backoff_for(8), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_for(9), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RecoveryPolicy {
            max_attempts: None,
            ..RecoveryPolicy::default()
        };
        assert_eq!(policy.backoff_for(40), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_unbounded_never_gives_up() {
        let policy = RecoveryPolicy::unbounded();
        assert_eq!(policy.backoff_for(10_000), Some(Duration::ZERO));
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::default()
            .with_looping(false)
            .with_keep_screen_on(false)
            .with_recovery(RecoveryPolicy::unbounded());
        assert!(!config.looping);
        assert!(!config.keep_screen_on);
        assert_eq!(config.recovery.max_attempts, None);
        assert_eq!(config.min_gles_version, 0x20000);
    }
}
