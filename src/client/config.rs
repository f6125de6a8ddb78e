//! Connection configuration.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ClientError;
use crate::message::DEFAULT_MAX_LINE_LEN;
use crate::sasl::SaslMechanism;

/// Nick used when the configuration does not provide one.
pub const DEFAULT_NICK: &str = "slirc";

/// Version string advertised to CTCP VERSION and used as the default
/// quit message.
pub const DEFAULT_VERSION: &str = concat!("slirc-client ", env!("CARGO_PKG_VERSION"));

pub(crate) const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(4 * 60);
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_RECONNECT_FREQ: Duration = Duration::from_secs(2 * 60);

/// A byte stream usable as an IRC transport.
pub trait IrcStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IrcStream for T {}

/// Pluggable dialer, for proxies and for driving a connection over an
/// in-memory pipe in tests. The default dialer opens a TCP (optionally
/// TLS) connection to `Config::server`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<Box<dyn IrcStream>>;
}

/// Connection configuration.
///
/// Zero durations, an empty nick, and similar unset fields are replaced
/// by protocol defaults when the [`Connection`](super::Connection) is
/// created.
#[derive(Clone, Default)]
pub struct Config {
    /// Server address, `host:port`.
    pub server: String,
    /// Wrap the connection in TLS.
    pub use_tls: bool,
    /// TLS configuration; a webpki-roots default is built when absent.
    pub tls_config: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
    /// Custom dialer (e.g. a proxy). Overrides `server`-based dialing.
    pub dialer: Option<Arc<dyn Dialer>>,

    /// Server password (`PASS`).
    pub password: String,
    /// Parameters for the `WEBIRC` command, sent verbatim when non-empty.
    pub webirc: Vec<String>,

    /// Preferred nickname.
    pub nick: String,
    /// Username (ident); defaults to the nick.
    pub user: String,
    /// Realname/gecos; defaults to the username.
    pub real_name: String,
    /// Message sent with `QUIT`; defaults to `version`.
    pub quit_message: String,
    /// Version string for the CTCP VERSION responder.
    pub version: String,

    /// IRCv3 capabilities to request (failure is non-fatal).
    pub request_caps: Vec<String>,

    /// SASL credentials; setting both implies `use_sasl`.
    pub sasl_login: String,
    pub sasl_password: String,
    /// SASL mechanism, PLAIN by default.
    pub sasl_mech: SaslMechanism,
    /// Require SASL during registration.
    pub use_sasl: bool,
    /// Treat SASL failure as non-fatal.
    pub sasl_optional: bool,

    /// I/O timeout; also the keepalive tick interval.
    pub timeout: Duration,
    /// Interval between keepalive PINGs. Must be at least `timeout`.
    pub keep_alive: Duration,
    /// Delay between reconnection attempts.
    pub reconnect_freq: Duration,

    /// Maximum line length (body budget, including CRLF).
    pub max_line_len: usize,

    /// Install the CTCP rewrite and built-in responders.
    pub enable_ctcp: bool,
    /// Log each inbound and outbound line.
    pub debug: bool,
    /// Do not contain panics from callbacks.
    pub allow_panic: bool,
    /// Send lines that exceeded the body budget in truncated form
    /// instead of reporting an error.
    pub allow_truncation: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("use_tls", &self.use_tls)
            .field("nick", &self.nick)
            .field("user", &self.user)
            .field("request_caps", &self.request_caps)
            .field("use_sasl", &self.use_sasl)
            .field("timeout", &self.timeout)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_freq", &self.reconnect_freq)
            .field("max_line_len", &self.max_line_len)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Apply protocol defaults and validate, producing the immutable
    /// configuration the connection runs with.
    pub(crate) fn normalize(mut self) -> Result<Config, ClientError> {
        if self.nick.is_empty() {
            self.nick = DEFAULT_NICK.to_owned();
        }
        if self.user.is_empty() {
            self.user = self.nick.clone();
        }
        if self.keep_alive.is_zero() {
            self.keep_alive = DEFAULT_KEEPALIVE;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.keep_alive < self.timeout {
            return Err(ClientError::KeepAliveTooShort);
        }
        if self.reconnect_freq.is_zero() {
            self.reconnect_freq = DEFAULT_RECONNECT_FREQ;
        }
        if !self.sasl_login.is_empty() && !self.sasl_password.is_empty() {
            self.use_sasl = true;
        }
        if self.use_sasl && !self.request_caps.iter().any(|c| c == "sasl") {
            self.request_caps.push("sasl".to_owned());
        }
        if self.max_line_len == 0 {
            self.max_line_len = DEFAULT_MAX_LINE_LEN;
        }
        if self.version.is_empty() {
            self.version = DEFAULT_VERSION.to_owned();
        }
        Ok(self)
    }
}
