//! The IRC client connection runtime.
//!
//! A [`Connection`] is a long-lived, reconnecting connection to a single
//! IRC server. Each live connection runs three worker tasks (read,
//! write, keepalive) supervised by [`Connection::run`], coordinated
//! through a single cancellation token that is only ever cancelled,
//! never signalled. Inbound messages flow through the batch/label
//! assembler into the callback registry; outbound messages are
//! serialized under the size discipline and queued onto a bounded
//! channel drained by the write task.
//!
//! # Example
//!
//! ```no_run
//! use slirc_client::{Config, Connection};
//!
//! # async fn run() -> Result<(), slirc_client::ClientError> {
//! let conn = Connection::new(Config {
//!     server: "irc.libera.chat:6697".to_owned(),
//!     use_tls: true,
//!     nick: "slircbot".to_owned(),
//!     request_caps: vec!["message-tags".to_owned(), "server-time".to_owned()],
//!     ..Config::default()
//! })?;
//!
//! conn.add_callback("PRIVMSG", |conn, msg| {
//!     if msg.last_param() == Some("!ping") {
//!         if let Some(nick) = msg.nick() {
//!             let _ = conn.privmsg(nick, "pong");
//!         }
//!     }
//! });
//!
//! conn.connect().await?;
//! conn.run().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod connect;
mod dispatch;
mod handlers;
mod negotiate;
mod workers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{Batch, BatchState};
use crate::caps::NegotiatedFlags;
use crate::casemap::CaseMapping;
use crate::error::{ClientError, ProtocolError, Result};
use crate::isupport::Isupport;
use crate::message::{Message, Tags};
use crate::registry::{
    Callback, CallbackId, Registry, DISCONNECT_EVENT, REGISTRATION_EVENT,
};
use crate::response::Response;

pub use self::config::{Config, Dialer, IrcStream, DEFAULT_NICK, DEFAULT_VERSION};

/// Outcome of one capability negotiation, per requested cap.
pub(crate) struct CapResult {
    pub name: String,
    pub ack: bool,
}

/// Final outcome of the SASL exchange.
pub(crate) enum SaslOutcome {
    Success,
    Failed(String),
}

/// Size of the bounded outbound queue.
const WRITE_QUEUE_SIZE: usize = 10;

/// Connection lifecycle state, guarded by the state mutex (the innermost
/// lock: never held across a suspension point).
#[derive(Default)]
pub(crate) struct ClientState {
    pub running: bool,
    pub quit: bool,
    pub quit_at: Option<Instant>,
    pub ping_sent: bool,
    pub last_error: Option<ClientError>,
    pub shutdown: CancellationToken,
    pub sender: Option<mpsc::Sender<Vec<u8>>>,
    pub handles: Vec<JoinHandle<()>>,

    pub preferred_nick: String,
    pub current_nick: String,
    pub nick_counter: u64,
    pub registered: bool,
    pub has_base_callbacks: bool,

    pub caps_advertised: HashMap<String, String>,
    pub caps_acked: HashMap<String, String>,
    pub isupport_partial: Option<Isupport>,
    pub isupport: Option<Arc<Isupport>>,

    pub welcome_tx: Option<mpsc::Sender<()>>,
    pub sasl_tx: Option<mpsc::Sender<SaslOutcome>>,
    pub caps_tx: Option<mpsc::Sender<CapResult>>,
}

/// A supervised, reconnecting connection to one IRC server.
pub struct Connection {
    pub(crate) config: Config,
    state: Mutex<ClientState>,
    registry: Mutex<Registry>,
    batch: Mutex<BatchState>,
    pub(crate) flags: NegotiatedFlags,
    /// Interrupts the backoff sleep between reconnects. Created once and
    /// shared across reconnections.
    reconnect_signal: Notify,
}

impl Connection {
    /// Create a connection from a configuration. Defaults are applied
    /// here; dial with [`Connection::connect`].
    pub fn new(config: Config) -> Result<Arc<Connection>> {
        let config = config.normalize()?;
        let state = ClientState {
            preferred_nick: config.nick.clone(),
            ..ClientState::default()
        };
        Ok(Arc::new(Connection {
            config,
            state: Mutex::new(state),
            registry: Mutex::new(Registry::default()),
            batch: Mutex::new(BatchState::default()),
            flags: NegotiatedFlags::new(),
            reconnect_signal: Notify::new(),
        }))
    }

    // Lock order when more than one is held: registry, batch, state.
    pub(crate) fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("events lock poisoned")
    }

    pub(crate) fn batch_state(&self) -> MutexGuard<'_, BatchState> {
        self.batch.lock().expect("batch lock poisoned")
    }

    /// Record a fatal error and begin shutdown of the worker tasks. Only
    /// the first error per connection is kept.
    pub(crate) fn set_error(&self, err: ClientError) {
        let mut state = self.state();
        if state.last_error.is_none() {
            state.last_error = Some(err);
            close_shutdown(&mut state);
        }
    }

    pub(crate) fn take_error(&self) -> Option<ClientError> {
        self.state().last_error.take()
    }

    /// True if a connection is currently active.
    pub fn connected(&self) -> bool {
        self.state().running
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.state().quit
    }

    pub(crate) fn registered(&self) -> bool {
        self.state().registered
    }

    /// The nickname assigned by the server; empty before registration.
    pub fn current_nick(&self) -> String {
        self.state().current_nick.clone()
    }

    /// The desired nickname. If the actual nickname differs, the client
    /// periodically attempts to change back to this one.
    pub fn preferred_nick(&self) -> String {
        self.state().preferred_nick.clone()
    }

    pub(crate) fn set_current_nick(&self, nick: &str) {
        self.state().current_nick = nick.to_owned();
    }

    /// Change the preferred nickname and ask the server to apply it.
    pub fn set_nick(&self, nick: &str) -> Result<()> {
        self.state().preferred_nick = nick.to_owned();
        self.send("NICK", &[nick])
    }

    /// IRCv3 capabilities enabled on this connection, with their values.
    pub fn acknowledged_caps(&self) -> HashMap<String, String> {
        self.state().caps_acked.clone()
    }

    /// The ISUPPORT (005) map gathered during registration. Empty until
    /// registration completes; frozen afterwards.
    pub fn isupport(&self) -> Arc<Isupport> {
        self.state().isupport.clone().unwrap_or_default()
    }

    /// The case mapping the server declared in ISUPPORT, falling back to
    /// RFC 1459 when absent or unrecognized.
    pub fn casemapping(&self) -> CaseMapping {
        self.isupport()
            .text("CASEMAPPING")
            .and_then(CaseMapping::from_name)
            .unwrap_or_default()
    }

    /// Quit the connection and stop reconnecting. The server is expected
    /// to close the connection in response; if it does not within the
    /// timeout, the keepalive task declares the connection dead.
    ///
    /// Idempotent.
    pub fn quit(&self) {
        let quit_message = if self.config.quit_message.is_empty() {
            &self.config.version
        } else {
            &self.config.quit_message
        };

        {
            let mut state = self.state();
            state.quit = true;
            state.quit_at = Some(Instant::now());
        }

        let _ = self.send("QUIT", &[quit_message]);
    }

    /// Force an immediate disconnect and reconnection, interrupting any
    /// backoff sleep in [`Connection::run`].
    pub fn reconnect(&self) {
        close_shutdown(&mut self.state());
        self.reconnect_signal.notify_waiters();
    }

    pub(crate) fn reconnect_signal(&self) -> &Notify {
        &self.reconnect_signal
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send an IRC message without tags.
    pub fn send(&self, command: &str, params: &[&str]) -> Result<()> {
        self.send_with_tags(None, command, params)
    }

    /// Send an IRC message with tags.
    pub fn send_with_tags(
        &self,
        tags: Option<Tags>,
        command: &str,
        params: &[&str],
    ) -> Result<()> {
        let mut msg = Message::with_params(command, params.iter().copied());
        if let Some(tags) = tags {
            for (name, value) in tags {
                msg.set_tag(&name, value);
            }
        }
        self.send_message(&msg)
    }

    /// Send a built [`Message`] under the strict size discipline.
    pub fn send_message(&self, msg: &Message) -> Result<()> {
        let bytes = match msg.line_bytes_strict(true, self.config.max_line_len) {
            Ok(bytes) => bytes,
            Err(ProtocolError::BodyTooLong(bytes)) if self.config.allow_truncation => bytes,
            Err(err) => {
                if self.config.debug {
                    debug!("couldn't assemble message: {}", err);
                }
                return Err(err.into());
            }
        };
        self.send_internal(bytes)
    }

    /// Send a raw line; CRLF is appended.
    pub fn send_raw(&self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.send_internal(bytes)
    }

    /// Enqueue wire bytes for the write task.
    ///
    /// The running flag and the sender are snapshotted under the state
    /// lock, so bytes can never land on the queue of a previous
    /// connection instantiation.
    pub(crate) fn send_internal(&self, bytes: Vec<u8>) -> Result<()> {
        let (running, sender) = {
            let state = self.state();
            (state.running, state.sender.clone())
        };
        if !running {
            return Err(ClientError::Disconnected);
        }
        let Some(sender) = sender else {
            return Err(ClientError::Disconnected);
        };
        match sender.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ClientError::SendQueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::Disconnected),
        }
    }

    // ------------------------------------------------------------------
    // Convenience verbs
    // ------------------------------------------------------------------

    /// Join a channel.
    pub fn join(&self, channel: &str) -> Result<()> {
        self.send("JOIN", &[channel])
    }

    /// Leave a channel.
    pub fn part(&self, channel: &str) -> Result<()> {
        self.send("PART", &[channel])
    }

    /// Send a message to a target (channel or nickname).
    pub fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send("PRIVMSG", &[target, text])
    }

    /// Send a notice to a target.
    pub fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.send("NOTICE", &[target, text])
    }

    /// Send a CTCP ACTION ("/me") to a target.
    pub fn action(&self, target: &str, text: &str) -> Result<()> {
        self.privmsg(target, &format!("\u{1}ACTION {}\u{1}", text))
    }

    // ------------------------------------------------------------------
    // Callback management
    // ------------------------------------------------------------------

    /// Register a handler for an IRC command or numeric. Handlers for
    /// one command run in registration order; the returned id can be
    /// used to remove or replace the handler.
    pub fn add_callback<F>(&self, command: &str, callback: F) -> CallbackId
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.add_callback_internal(command, Arc::new(callback), false, None)
    }

    pub(crate) fn add_callback_internal(
        &self,
        command: &str,
        callback: Callback,
        prepend: bool,
        reuse_id: Option<u64>,
    ) -> CallbackId {
        self.registry().add(command, callback, prepend, reuse_id)
    }

    /// Remove a registered handler.
    pub fn remove_callback(&self, id: &CallbackId) {
        self.registry().remove(
            id,
            &Response::RPL_ENDOFMOTD.code_str(),
            &Response::ERR_NOMOTD.code_str(),
        );
    }

    /// Replace a registered handler in place; the replacement applies to
    /// the next dispatch. False when the id is unknown.
    pub fn replace_callback<F>(&self, id: &CallbackId, callback: F) -> bool
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.registry().replace(id, Arc::new(callback))
    }

    /// Drop all handlers for a command.
    pub fn clear_callback(&self, command: &str) {
        self.registry().clear(command);
    }

    /// Register a handler to run when connection registration completes
    /// (end of MOTD, or no MOTD). A single id covers both registrations.
    pub fn add_connect_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let id = self.add_callback_internal(
            &Response::RPL_ENDOFMOTD.code_str(),
            callback.clone(),
            false,
            None,
        );
        self.add_callback_internal(
            &Response::ERR_NOMOTD.code_str(),
            callback,
            false,
            Some(id.id),
        );
        CallbackId {
            command: REGISTRATION_EVENT.to_owned(),
            id: id.id,
        }
    }

    /// Register a handler to run once per disconnection, after the last
    /// message from the server is processed and before any reconnection
    /// attempt. The message supplied to the handler is empty.
    pub fn add_disconnect_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        self.add_callback_internal(DISCONNECT_EVENT, Arc::new(callback), false, None)
    }

    /// Register a handler for closed top-level batches. Handlers run in
    /// insertion order until one returns true; if none does, the batch
    /// is flattened through the normal command handlers.
    pub fn add_batch_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Connection, &Batch) -> bool + Send + Sync + 'static,
    {
        self.registry().add_batch(Arc::new(callback))
    }
}

/// Stop the workers of the current connection instantiation: mark the
/// connection not running and cancel the shutdown token (which is only
/// ever cancelled, never signalled).
pub(crate) fn close_shutdown(state: &mut ClientState) {
    if state.running {
        state.running = false;
        state.shutdown.cancel();
    }
}
