//! # slirc-client
//!
//! An IRC client runtime: a long-lived, reconnecting connection to a
//! single IRC server, with full support for the IRCv3 extensions a
//! modern client needs.
//!
//! ## Features
//!
//! - IRC message parsing and serialization with tags, prefixes, and
//!   UTF-8-safe length discipline
//! - IRCv3 capability negotiation (`CAP LS 302`), SASL (PLAIN and
//!   EXTERNAL), message tags, batches, and labeled responses
//! - A prioritized callback registry dispatching inbound messages by
//!   command, with batch assembly and label correlation in front of it
//! - Supervised read/write/keepalive tasks with automatic reconnection
//! - Optional TLS via rustls, CTCP responders, and formatting-code
//!   helpers
//!
//! ## Quick Start
//!
//! ```no_run
//! use slirc_client::{Config, Connection};
//!
//! # async fn run() -> Result<(), slirc_client::ClientError> {
//! let conn = Connection::new(Config {
//!     server: "irc.libera.chat:6697".to_owned(),
//!     use_tls: true,
//!     nick: "slircbot".to_owned(),
//!     ..Config::default()
//! })?;
//!
//! conn.add_connect_callback(|conn, _msg| {
//!     let _ = conn.join("#rust");
//! });
//!
//! conn.connect().await?;
//! conn.run().await; // reconnects until quit()
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

pub mod batch;
pub mod caps;
pub mod casemap;
pub mod client;
pub mod ctcp;
pub mod error;
pub mod fmt;
pub mod isupport;
pub mod line;
pub mod message;
pub mod prefix;
pub mod registry;
pub mod response;
pub mod sasl;

pub use self::batch::Batch;
pub use self::caps::Capability;
pub use self::casemap::{irc_eq, irc_to_lower, CaseMapping};
pub use self::client::{Config, Connection, Dialer, IrcStream};
pub use self::error::{ClientError, LineError, ProtocolError, Result};
pub use self::isupport::{Isupport, SupportValue};
pub use self::line::LineCodec;
pub use self::message::{parse_line, parse_line_strict, Message, Tags};
pub use self::prefix::{IllFormedNuh, Nuh};
pub use self::registry::CallbackId;
pub use self::response::Response;
pub use self::sasl::SaslMechanism;
