//! IRC message type and wire codec.
//!
//! [`Message`] is the canonical inbound/outbound unit: IRCv3 tags, an
//! optional source prefix, an uppercased command, and ordered parameters.
//! Parsing lives in [`parse`], assembly and the size/charset discipline in
//! [`serialize`], tag escaping in [`tags`].
//!
//! # Example
//!
//! ```rust
//! use slirc_client::Message;
//!
//! let raw = "@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #channel :Hello!";
//! let message: Message = raw.parse().expect("valid IRC message");
//! assert_eq!(message.command, "PRIVMSG");
//! assert_eq!(message.tag("time"), Some("2023-01-01T12:00:00Z"));
//!
//! let reply = Message::new("PRIVMSG")
//!     .param("#channel")
//!     .param("Hi back")
//!     .with_tag("+typing", Some("done"));
//! assert_eq!(reply.to_string(), "@+typing=done PRIVMSG #channel :Hi back");
//! ```

mod parse;
mod serialize;
pub mod tags;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::prefix::{IllFormedNuh, Nuh};

pub use self::parse::{parse_line, parse_line_strict};
pub use self::serialize::{
    DEFAULT_MAX_LINE_LEN, MAX_CLIENT_TAG_DATA_LEN, MAX_SERVER_TAG_DATA_LEN, MAX_TAGS_LEN,
};

/// Tag map: name to value. `None` is a tag present without a value
/// (`@a`), `Some("")` is a tag with an explicitly empty value (`@a=`).
pub type Tags = BTreeMap<String, Option<String>>;

/// An IRC message, as defined by RFC 1459 and extended by the IRCv3
/// message-tags specification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// Server tags (names not starting with `+`).
    pub tags: Tags,
    /// Client-only tags, keyed *with* their leading `+`.
    pub client_tags: Tags,
    /// Raw source prefix (the part after `:` and before the command).
    pub source: Option<String>,
    /// Uppercased verb or 3-digit numeric.
    pub command: String,
    /// Ordered parameters; only the last may be empty, contain spaces, or
    /// start with `:`.
    pub params: Vec<String>,
    /// Always emit the last parameter as a trailing (`:`-prefixed)
    /// parameter, even when it does not require it.
    pub force_trailing: bool,
}

impl Message {
    /// Create a message with the given command and no parameters.
    pub fn new(command: impl Into<String>) -> Self {
        Message {
            command: command.into(),
            ..Message::default()
        }
    }

    /// Create a message from a command, optional tags, and parameters.
    pub fn with_params<S, I>(command: impl Into<String>, params: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Message {
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
            ..Message::default()
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Set a tag. Names starting with `+` are routed to the client-only
    /// tag map.
    #[must_use]
    pub fn with_tag(mut self, name: &str, value: Option<&str>) -> Self {
        self.set_tag(name, value.map(str::to_owned));
        self
    }

    /// Set the source prefix.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Request trailing form for the last parameter.
    #[must_use]
    pub fn force_trailing(mut self) -> Self {
        self.force_trailing = true;
        self
    }

    /// Set a tag in place, routing client-only (`+`) names to their own map.
    pub fn set_tag(&mut self, name: &str, value: Option<String>) {
        if name.starts_with('+') {
            self.client_tags.insert(name.to_owned(), value);
        } else {
            self.tags.insert(name.to_owned(), value);
        }
    }

    /// Look up a tag by name (checking the client-only map for `+` names).
    ///
    /// Returns `Some("")` for a tag present without a value, `None` for an
    /// absent tag.
    pub fn tag(&self, name: &str) -> Option<&str> {
        let map = if name.starts_with('+') {
            &self.client_tags
        } else {
            &self.tags
        };
        map.get(name)
            .map(|v| v.as_deref().unwrap_or(""))
    }

    /// True if the tag is present, with or without a value.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tag(name).is_some()
    }

    /// Remove a tag by name.
    pub fn remove_tag(&mut self, name: &str) {
        if name.starts_with('+') {
            self.client_tags.remove(name);
        } else {
            self.tags.remove(name);
        }
    }

    /// The final parameter, if any.
    pub fn last_param(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Parse the source prefix as a `nick!user@host` tuple.
    pub fn nuh(&self) -> Result<Nuh, IllFormedNuh> {
        Nuh::parse(self.source.as_deref().unwrap_or(""))
    }

    /// The nick component of the source prefix, or `None` when the source
    /// is absent or not a well-formed user source.
    pub fn nick(&self) -> Option<&str> {
        let source = self.source.as_deref()?;
        let bang = source.find('!')?;
        let at = source.find('@')?;
        (bang < at).then(|| &source[..bang])
    }

    /// Serialize to a wire line without CRLF and without byte budgets.
    ///
    /// Validates the command and parameter discipline.
    pub fn line(&self) -> Result<String, ProtocolError> {
        serialize::assemble(self, None, None).map(|mut s| {
            s.truncate(s.len() - 2);
            s
        })
    }

    /// Serialize to wire bytes (CRLF-terminated) without byte budgets.
    pub fn line_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serialize::assemble(self, None, None).map(String::into_bytes)
    }

    /// Serialize to wire bytes under the strict size discipline.
    ///
    /// `from_client` splits the tag byte budget in half between
    /// client-only and server tags; `max_line_len` bounds the non-tag
    /// body including CRLF. A body over budget is truncated on a UTF-8
    /// code point boundary and reported as
    /// [`ProtocolError::BodyTooLong`] carrying the truncated bytes.
    pub fn line_bytes_strict(
        &self,
        from_client: bool,
        max_line_len: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        serialize::assemble(self, Some(from_client), Some(max_line_len))
            .map(String::into_bytes)
    }
}

impl fmt::Display for Message {
    /// Best-effort wire form without CRLF, for logs and diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        serialize::write_unchecked(self, f)
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_routing() {
        let mut msg = Message::new("TAGMSG");
        msg.set_tag("account", Some("bunny".to_owned()));
        msg.set_tag("+typing", Some("active".to_owned()));
        msg.set_tag("noval", None);

        assert_eq!(msg.tag("account"), Some("bunny"));
        assert_eq!(msg.tag("+typing"), Some("active"));
        assert_eq!(msg.tag("noval"), Some(""));
        assert_eq!(msg.tag("absent"), None);
        assert!(msg.tags.contains_key("account"));
        assert!(msg.client_tags.contains_key("+typing"));
        assert!(!msg.tags.contains_key("+typing"));
    }

    #[test]
    fn test_remove_tag() {
        let mut msg = Message::new("PRIVMSG").with_tag("label", Some("a1"));
        assert!(msg.has_tag("label"));
        msg.remove_tag("label");
        assert!(!msg.has_tag("label"));
    }

    #[test]
    fn test_nick_extraction() {
        let msg = Message::new("PRIVMSG").with_source("coolguy!ag@127.0.0.1");
        assert_eq!(msg.nick(), Some("coolguy"));

        let msg = Message::new("PING").with_source("irc.example.com");
        assert_eq!(msg.nick(), None);

        let msg = Message::new("PING");
        assert_eq!(msg.nick(), None);
    }

    #[test]
    fn test_display_round_trip() {
        let raw = ":dan!d@localhost PRIVMSG #chan :Hey!";
        let msg: Message = raw.parse().unwrap();
        assert_eq!(msg.to_string(), raw);
    }

    #[test]
    fn test_last_param() {
        let msg = Message::with_params("USER", ["guest", "0", "*", "Real Name"]);
        assert_eq!(msg.last_param(), Some("Real Name"));
        assert_eq!(Message::new("QUIT").last_param(), None);
    }
}
