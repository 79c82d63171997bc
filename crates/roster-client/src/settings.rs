use std::sync::Arc;
use std::time::Duration;

use roster_common::protocol::error::{Result, RosterError};
use roster_common::transport::{TlsMaterial, DEFAULT_MAX_MESSAGE_SIZE};
use roster_store::CoordinationStore;

/// Load-balancing policy for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbPolicy {
    /// Route to the least-loaded non-quarantined host, round-robin among
    /// ties.
    RoundRobinWeighted,
}

/// Retry policy for transient transport failures.
///
/// Only retryable errors are retried; `NoReadyEndpoint` and service errors
/// fail the call immediately.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt`, with exponential backoff
    /// and a little jitter against thundering herds.
    pub(crate) fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.base_delay_ms as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1))
        .min(self.max_delay_ms as f64) as u64;

        let jitter = (delay_ms as f64 * 0.1) as u64;
        let jitter_amount = if jitter > 0 && rand::random::<bool>() {
            rand::random::<u64>() % jitter
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter_amount)
    }
}

/// Configuration for [`crate::RosterChannel::of`].
pub struct ChannelSettings {
    pub service_discovery_path: String,
    pub lb_policy: LbPolicy,
    pub store: Arc<dyn CoordinationStore>,
    /// When true, channel shutdown also closes the coordination client.
    pub owns_store: bool,
    pub tls: Option<TlsMaterial>,
    pub auth_token: Option<String>,
    pub max_message_size: usize,
    pub retry: RetryConfig,
}

impl ChannelSettings {
    pub fn new(service_discovery_path: impl Into<String>, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            service_discovery_path: service_discovery_path.into(),
            lb_policy: LbPolicy::RoundRobinWeighted,
            store,
            owns_store: false,
            tls: None,
            auth_token: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            retry: RetryConfig::default(),
        }
    }

    /// The channel takes ownership of the store client and closes it on
    /// shutdown.
    pub fn with_owned_store(mut self) -> Self {
        self.owns_store = true;
        self
    }

    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.service_discovery_path.starts_with('/') {
            return Err(RosterError::InvalidSettings(format!(
                "discovery path must be absolute, got '{}'",
                self.service_discovery_path
            )));
        }
        Ok(())
    }
}
