use std::sync::Arc;
use std::time::Duration;

use super::conn::DefaultDialer;
use super::ScgiTransport;

/// Limits applied to every SCGI round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScgiConfig {
    /// How long to wait for the dialer to open a connection.
    ///
    /// `None` waits as long as the dialer does.
    pub connect_timeout: Option<Duration>,

    /// Largest response head, in bytes, that will be read.
    pub max_header_size: usize,

    /// Largest number of response headers that will be parsed.
    pub max_headers: usize,
}

impl Default for ScgiConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            max_header_size: 64 * 1024,
            max_headers: 100,
        }
    }
}

/// A builder for an [`ScgiTransport`].
///
/// ```
/// # use std::time::Duration;
/// # use scgi_transport::client::conn::DefaultDialer;
/// let transport = scgi_transport::Builder::new()
///     .with_dialer(DefaultDialer {
///         keep_alive: None,
///         nodelay: true,
///     })
///     .with_connect_timeout(Duration::from_secs(2))
///     .build();
/// # let _ = transport;
/// ```
#[derive(Debug, Clone)]
pub struct Builder<D = DefaultDialer> {
    dialer: D,
    config: ScgiConfig,
}

impl Builder {
    /// Create a builder with the default dialer and limits.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            dialer: DefaultDialer::default(),
            config: ScgiConfig::default(),
        }
    }
}

impl<D> Builder<D> {
    /// Use the provided configuration.
    pub fn with_config(mut self, config: ScgiConfig) -> Self {
        self.config = config;
        self
    }

    /// Mutable access to the configuration.
    pub fn config(&mut self) -> &mut ScgiConfig {
        &mut self.config
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Wait for the dialer without a timeout.
    pub fn without_connect_timeout(mut self) -> Self {
        self.config.connect_timeout = None;
        self
    }

    /// Use the provided dialer to open connections.
    ///
    /// Any [`tower::Service`] from a [`DialTarget`](super::conn::DialTarget) to a stream
    /// which converts into a [`Stream`](crate::stream::Stream) can be used here.
    pub fn with_dialer<D2>(self, dialer: D2) -> Builder<D2> {
        Builder {
            dialer,
            config: self.config,
        }
    }

    /// Use the default TCP and Unix socket dialer.
    pub fn with_default_dialer(self) -> Builder<DefaultDialer> {
        self.with_dialer(DefaultDialer::default())
    }

    /// Mutable access to the dialer.
    pub fn dialer(&mut self) -> &mut D {
        &mut self.dialer
    }

    /// Build the transport.
    pub fn build(self) -> ScgiTransport<D> {
        ScgiTransport {
            dialer: self.dialer,
            config: Arc::new(self.config),
        }
    }
}
