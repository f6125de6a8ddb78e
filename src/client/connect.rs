//! Dialing and connection supervision.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::workers;
use crate::client::{
    close_shutdown, CapResult, Connection, IrcStream, SaslOutcome, WRITE_QUEUE_SIZE,
};
use crate::error::{ClientError, Result};
use crate::isupport::Isupport;

impl Connection {
    /// Connect to the configured server.
    ///
    /// On success the worker tasks are running, registration (including
    /// capability negotiation and SASL) has completed, and the
    /// connection is ready for [`Connection::run`]. On failure the
    /// socket is closed and the workers are stopped, ready for another
    /// `connect` attempt.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        // check quit again in case quit() won a race with a reconnect
        if self.is_quitting() {
            return Err(ClientError::HasQuit);
        }
        if self.config.server.is_empty() && self.config.dialer.is_none() {
            return Err(ClientError::NoServer);
        }

        self.setup_callbacks();

        if self.config.debug {
            debug!(
                "connecting to {} (TLS: {})",
                self.config.server, self.config.use_tls
            );
        }

        let stream = self.dial().await?;
        info!("connected to {}", self.config.server);

        let (read_half, write_half) = tokio::io::split(stream);
        let shutdown = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_SIZE);
        let (welcome_tx, mut welcome_rx) = mpsc::channel::<()>(1);
        let (sasl_tx, mut sasl_rx) = mpsc::channel::<SaslOutcome>(1);
        let (caps_tx, mut caps_rx) =
            mpsc::channel::<CapResult>(self.config.request_caps.len().max(1));

        // reset all connection state
        {
            let mut state = self.state();
            state.running = true;
            state.shutdown = shutdown.clone();
            state.sender = Some(write_tx);
            state.last_error = None;
            state.ping_sent = false;
            state.current_nick = String::new();
            state.registered = false;
            state.isupport_partial = Some(Isupport::default());
            state.isupport = None;
            state.caps_advertised.clear();
            state.caps_acked.clear();
            state.welcome_tx = Some(welcome_tx);
            state.sasl_tx = Some(sasl_tx);
            state.caps_tx = Some(caps_tx);
            state.handles = vec![
                tokio::spawn(workers::read_loop(
                    Arc::clone(self),
                    read_half,
                    shutdown.clone(),
                )),
                tokio::spawn(workers::write_loop(
                    Arc::clone(self),
                    write_half,
                    write_rx,
                    shutdown.clone(),
                )),
                tokio::spawn(workers::keepalive_loop(
                    Arc::clone(self),
                    shutdown.clone(),
                )),
            ];
        }
        self.flags.store(0);
        self.batch_state().reset();

        // the socket and workers are live; clean them up on any
        // registration-phase failure
        let result = self
            .register(&shutdown, &mut caps_rx, &mut sasl_rx, &mut welcome_rx)
            .await;
        if let Err(err) = result {
            close_shutdown(&mut self.state());
            self.wait_for_stop().await;
            return Err(err);
        }
        Ok(())
    }

    /// The registration phase: identification commands, capability and
    /// SASL negotiation, then the wait for end-of-registration.
    async fn register(
        &self,
        shutdown: &CancellationToken,
        caps_rx: &mut mpsc::Receiver<CapResult>,
        sasl_rx: &mut mpsc::Receiver<SaslOutcome>,
        welcome_rx: &mut mpsc::Receiver<()>,
    ) -> Result<()> {
        self.negotiate_caps(shutdown, caps_rx, sasl_rx).await?;

        if !self.config.webirc.is_empty() {
            let params: Vec<&str> =
                self.config.webirc.iter().map(String::as_str).collect();
            let _ = self.send("WEBIRC", &params);
        }
        if !self.config.password.is_empty() {
            let _ = self.send("PASS", &[&self.config.password]);
        }

        let nick = self.preferred_nick();
        let _ = self.send("NICK", &[&nick]);
        let realname = if self.config.real_name.is_empty() {
            &self.config.user
        } else {
            &self.config.real_name
        };
        let _ = self.send("USER", &[&self.config.user, "s", "e", realname]);

        tokio::select! {
            _ = welcome_rx.recv() => Ok(()),
            _ = shutdown.cancelled() => Err(ClientError::ServerDisconnected),
            _ = sleep(self.config.timeout) => Err(ClientError::ServerTimedOut),
        }
    }

    /// Supervise a connected client: wait for the workers to stop, then
    /// reconnect after the backoff delay, forever, until [`quit`].
    ///
    /// Call after a successful [`connect`].
    ///
    /// [`quit`]: Connection::quit
    /// [`connect`]: Connection::connect
    pub async fn run(self: &Arc<Self>) {
        let mut last_reconnect: Option<Instant> = None;
        loop {
            self.wait_for_stop().await;

            if self.is_quitting() {
                return;
            }

            if let Some(err) = self.take_error() {
                warn!("disconnected: {}", err);
            }

            if let Some(last) = last_reconnect {
                let delay = (last + self.config.reconnect_freq)
                    .saturating_duration_since(Instant::now());
                if !delay.is_zero() {
                    if self.config.debug {
                        debug!("waiting {:?} to reconnect", delay);
                    }
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.reconnect_signal().notified() => {}
                    }
                }
            }

            last_reconnect = Some(Instant::now());
            if let Err(err) = self.connect().await {
                // still stopped; the next iteration returns immediately
                warn!("error while reconnecting: {}", err);
            }
        }
    }

    /// Wait for the current connection's workers to exit, then release
    /// per-connection resources and force-expire outstanding labels.
    pub(crate) async fn wait_for_stop(&self) {
        let (shutdown, handles) = {
            let mut state = self.state();
            (state.shutdown.clone(), std::mem::take(&mut state.handles))
        };
        shutdown.cancelled().await;
        for handle in handles {
            let _ = handle.await;
        }
        // the socket halves are owned by the read/write tasks and are
        // closed when those tasks return

        workers::expire_labels(self, true);
    }

    /// Open the transport: the configured dialer if any, otherwise
    /// TCP (plus TLS when enabled), all under the connection timeout.
    async fn dial(&self) -> Result<Box<dyn IrcStream>> {
        if let Some(dialer) = &self.config.dialer {
            return timeout(self.config.timeout, dialer.dial(&self.config.server))
                .await
                .map_err(|_| ClientError::ServerTimedOut)?
                .map_err(ClientError::from);
        }

        let stream = timeout(
            self.config.timeout,
            TcpStream::connect(&self.config.server),
        )
        .await
        .map_err(|_| ClientError::ServerTimedOut)??;

        if let Err(err) = enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", err);
        }

        if !self.config.use_tls {
            return Ok(Box::new(stream));
        }

        let tls_config = match &self.config.tls_config {
            Some(config) => config.clone(),
            None => default_tls_config(),
        };
        let host = self
            .config
            .server
            .rsplit_once(':')
            .map(|(host, _port)| host)
            .unwrap_or(&self.config.server);
        let server_name = ServerName::try_from(host.to_owned()).map_err(|_| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid TLS server name: {}", host),
            ))
        })?;

        let connector = TlsConnector::from(tls_config);
        let tls_stream = timeout(
            self.config.timeout,
            connector.connect(server_name, stream),
        )
        .await
        .map_err(|_| ClientError::ServerTimedOut)??;

        Ok(Box::new(tls_stream))
    }
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    use std::time::Duration;

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

fn default_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
