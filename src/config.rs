use std::time::Duration;

use url::Url;

use crate::error::SessionError;

/// Configuration for a [`SlideSession`](crate::session::SlideSession).
///
/// The backend base address is supplied by the caller; this layer only
/// normalizes it and appends the `/ws/<session-id>` routing path.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base address, with or without a `ws://`/`wss://` scheme.
    pub server_url: String,
    /// Bounded wait for the WebSocket open handshake.
    pub connect_timeout: Duration,
    /// Default timeout for correlated requests.
    pub request_timeout: Duration,
    /// Timeout for file uploads, which can carry large payloads.
    pub upload_timeout: Duration,
    /// Liveness ping cadence while connected.
    pub heartbeat_interval: Duration,
    /// Base delay of the exponential reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Ceiling applied to the backoff sequence.
    pub reconnect_max_delay: Duration,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Optional cap on the offline send buffer. `None` means unbounded.
    pub max_queued: Option<usize>,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(45),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            max_queued: None,
        }
    }

    pub fn builder(server_url: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(server_url)
    }

    /// Build the WebSocket endpoint for a session.
    ///
    /// Bare hosts default to `ws://` for loopback and `wss://` otherwise;
    /// `localhost` is normalized to `127.0.0.1` to avoid IPv6 resolution
    /// surprises.
    pub fn endpoint(&self, session_id: &str) -> Result<Url, SessionError> {
        let mut base = self.server_url.trim_end_matches('/').to_string();
        if !base.starts_with("ws://") && !base.starts_with("wss://") {
            if base.contains("localhost") || base.contains("127.0.0.1") {
                base = format!("ws://{base}");
            } else {
                base = format!("wss://{base}");
            }
        }
        if base.contains("localhost") {
            base = base.replace("localhost", "127.0.0.1");
        }
        let full = format!("{base}/ws/{session_id}");
        Url::parse(&full).map_err(|err| SessionError::InvalidUrl(format!("{full}: {err}")))
    }

    /// Backoff delay before reconnect attempt `attempt` (zero-based):
    /// `base * 2^attempt`, capped at the configured ceiling.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(server_url),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_base_delay = delay;
        self
    }

    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_max_delay = delay;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn max_queued(mut self, max: usize) -> Self {
        self.config.max_queued = Some(max);
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_scheme_by_host() {
        let local = SessionConfig::new("localhost:8080");
        assert_eq!(
            local.endpoint("abc").unwrap().as_str(),
            "ws://127.0.0.1:8080/ws/abc"
        );

        let remote = SessionConfig::new("slides.example.com");
        assert_eq!(
            remote.endpoint("abc").unwrap().as_str(),
            "wss://slides.example.com/ws/abc"
        );
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        let config = SessionConfig::new("ws://10.0.0.1:9000/");
        assert_eq!(
            config.endpoint("s1").unwrap().as_str(),
            "ws://10.0.0.1:9000/ws/s1"
        );
    }

    #[test]
    fn endpoint_rejects_garbage() {
        let config = SessionConfig::new("ws://not a host");
        assert!(matches!(
            config.endpoint("s1"),
            Err(SessionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = SessionConfig::builder("localhost:1")
            .reconnect_base_delay(Duration::from_millis(100))
            .reconnect_max_delay(Duration::from_millis(1500))
            .build();

        let delays: Vec<_> = (0..6).map(|n| config.reconnect_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1500),
                Duration::from_millis(1500),
            ]
        );
        // Non-decreasing up to and past the cap.
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }
}
