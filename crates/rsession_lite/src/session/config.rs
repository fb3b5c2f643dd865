use std::time::Duration;

/// Configuration shared by every session a [`SessionManager`](super::SessionManager) runs.
///
/// ```
/// use std::time::Duration;
/// use rsession_lite::session::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .handshake_timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(config.transport_buffer, 64);
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct SessionConfig {
    /// How long either side waits for the other half of the handshake.
    #[builder(default = Duration::from_secs(10))]
    pub handshake_timeout: Duration,

    /// Frames buffered per transport direction.
    #[builder(default = 64)]
    pub transport_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
