//! The per-connection worker tasks: read, write, keepalive.
//!
//! All blocking operations select on the shutdown token. Any worker
//! hitting a fatal error records it (first error wins) and cancels the
//! token; the supervisor collects the workers afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Connection, IrcStream};
use crate::error::{ClientError, LineError};
use crate::line::{LineCodec, INITIAL_BUFFER_SIZE};
use crate::message::parse_line;
use crate::registry::invoke_guarded;

/// Prefix for keepalive ping parameters.
pub(crate) const KEEPALIVE_PREFIX: &str = "KeepAlive-";

/// Read task: frame lines, parse, dispatch. Also hosts the periodic
/// batch/label expiry sweep so expiry observes message arrival order.
pub(crate) async fn read_loop(
    conn: Arc<Connection>,
    read_half: ReadHalf<Box<dyn IrcStream>>,
    shutdown: CancellationToken,
) {
    let mut framed = FramedRead::with_capacity(
        read_half,
        LineCodec::new(conn.config.max_line_len),
        INITIAL_BUFFER_SIZE,
    );
    let mut last_expire = Instant::now();

    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = framed.next() => item,
        };

        match item {
            Some(Ok(line)) => {
                if conn.config.debug {
                    debug!("<-- {}", line.trim_end());
                }
                match parse_line(&line) {
                    Ok(msg) => conn.run_callbacks(msg),
                    Err(err) => warn!("invalid message from server: {}", err),
                }
            }
            Some(Err(LineError::TooLong(max))) => {
                warn!("dropping line longer than {} bytes", max);
            }
            Some(Err(LineError::Io(err))) => {
                conn.set_error(err.into());
                break;
            }
            None => {
                conn.set_error(ClientError::ServerDisconnected);
                break;
            }
        }

        if conn.flags.batch() && last_expire.elapsed() > conn.config.timeout {
            expire_labels(&conn, false);
            last_expire = Instant::now();
        }
    }

    if conn.registered() {
        conn.run_disconnect_callbacks();
    }
}

/// Sweep stale batches and labels, invoking expired label callbacks with
/// the nil-batch sentinel.
pub(crate) fn expire_labels(conn: &Connection, force: bool) {
    let callbacks = conn.batch_state().expire(conn.config.keep_alive, force);
    for callback in callbacks {
        invoke_guarded(conn.config.allow_panic, move || callback(None));
    }
}

/// Write task: drain the outbound queue onto the socket, one write
/// deadline per line.
pub(crate) async fn write_loop(
    conn: Arc<Connection>,
    mut write_half: WriteHalf<Box<dyn IrcStream>>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let bytes = tokio::select! {
            _ = shutdown.cancelled() => return,
            bytes = outbound.recv() => match bytes {
                Some(bytes) => bytes,
                None => return,
            },
        };
        if bytes.is_empty() {
            continue;
        }

        if conn.config.debug {
            debug!("--> {}", String::from_utf8_lossy(&bytes).trim_end());
        }

        let write = async {
            write_half.write_all(&bytes).await?;
            write_half.flush().await
        };
        let result = time::timeout(conn.config.timeout, write).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                conn.set_error(err.into());
                return;
            }
            Err(_) => {
                conn.set_error(ClientError::ServerTimedOut);
                return;
            }
        }
    }
}

/// Keepalive task: wake every timeout interval, send a timestamped PING
/// every keepalive interval, watch for the PONG, restore the preferred
/// nick, and notice a server that ignores QUIT.
pub(crate) async fn keepalive_loop(conn: Arc<Connection>, shutdown: CancellationToken) {
    let period = conn.config.timeout;
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                tick += 1;
                process_tick(&conn, tick);
            }
        }
    }
}

/// One keepalive inspection. State is examined under the lock; sends
/// happen after it is released.
fn process_tick(conn: &Connection, tick: u64) {
    let mut error = None;
    let mut should_ping = false;
    let mut renick = None;

    {
        let mut state = conn.state();

        // a server that ignores QUIT gets cut off after the timeout
        if state.quit
            && state
                .quit_at
                .is_some_and(|at| at.elapsed() >= conn.config.timeout)
        {
            error = Some(ClientError::ServerDidNotQuit);
        } else if state.ping_sent {
            // unacked PING is fatal
            error = Some(ClientError::ServerTimedOut);
        } else {
            let ping_modulus = (conn.config.keep_alive.as_nanos()
                / conn.config.timeout.as_nanos())
            .max(1) as u64;
            if tick % ping_modulus == 0 {
                should_ping = true;
                state.ping_sent = true;
                if state.current_nick != state.preferred_nick {
                    renick = Some(state.preferred_nick.clone());
                }
            }
        }
    }

    if let Some(error) = error {
        conn.set_error(error);
        return;
    }
    if should_ping {
        conn.ping();
    }
    if let Some(nick) = renick {
        let _ = conn.send("NICK", &[&nick]);
    }
}

impl Connection {
    /// Send a keepalive PING in the timestamped format.
    pub(crate) fn ping(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let param = format!("{}{}", KEEPALIVE_PREFIX, now.as_nanos());
        let _ = self.send("PING", &[&param]);
    }

    /// Interpret a PONG parameter; a token in our keepalive format
    /// clears the outstanding-ping flag.
    pub(crate) fn record_pong(&self, param: &str) {
        let Some(timestamp) = param.strip_prefix(KEEPALIVE_PREFIX) else {
            return;
        };
        let Ok(sent_nanos) = timestamp.parse::<u128>() else {
            return;
        };

        if self.config.debug {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let lag = now.as_nanos().saturating_sub(sent_nanos);
            debug!("lag: {:?}", Duration::from_nanos(lag as u64));
        }

        self.state().ping_sent = false;
    }
}
