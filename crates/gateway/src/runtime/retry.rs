//! Retry backoff for transient provider errors.

use coda_domain::config::RetryConfig;

use super::cancel::TurnControl;

/// Delay before retry `attempt` (0-based): `base_delay_ms * 2^attempt`.
pub fn backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
}

/// Sleep out a backoff, waking early on abort or steer. Returns `false`
/// when the wait was interrupted.
pub async fn backoff_sleep(delay_ms: u64, control: &TurnControl) -> bool {
    control.set_retrying(true);
    let token = control.interrupt_token();
    let completed = tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => true,
        _ = token.cancelled() => false,
    };
    control.set_retrying(false);
    completed
}
