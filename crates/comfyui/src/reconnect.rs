//! Opening the push channel while ComfyUI is still starting up.
//!
//! The HTTP server may answer before the WebSocket endpoint accepts
//! handshakes, so [`open_with_retry`] keeps trying at a fixed spacing.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidgen_core::retry::{retry_fixed, RetryError, RetryPolicy};

use crate::client::{ChannelError, OpenChannel, PushChannel};

/// Handshake attempts before giving up (three minutes at five-second spacing).
pub const CHANNEL_CONNECT_ATTEMPTS: u32 = 36;

pub const CHANNEL_CONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn default_channel_policy() -> RetryPolicy {
    RetryPolicy::new(CHANNEL_CONNECT_ATTEMPTS, CHANNEL_CONNECT_DELAY)
}

/// Open `channel`, retrying per `policy`.
pub async fn open_with_retry(
    channel: &PushChannel,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<OpenChannel, ChannelError> {
    tracing::info!(url = %channel.endpoint(), "Opening push channel");

    match retry_fixed(policy, cancel, "Push channel handshake", |_| channel.open()).await {
        Ok(open) => Ok(open),
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        }) => Err(ChannelError::ConnectExhausted {
            url: channel.endpoint(),
            attempts,
            last_error: last_error.to_string(),
        }),
        Err(RetryError::Cancelled) => Err(ChannelError::Cancelled),
    }
}
