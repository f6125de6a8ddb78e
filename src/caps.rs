//! IRCv3 capability negotiation support.
//!
//! Types and utilities for tracking capabilities through `CAP LS 302`
//! negotiation: known capability names, `name[=value]` token splitting,
//! and the negotiated-feature bitset that the dispatch path reads without
//! taking the connection state lock.
//!
//! # Reference
//! - IRCv3 Capability Negotiation: <https://ircv3.net/specs/extensions/capability-negotiation>

use std::sync::atomic::{AtomicU32, Ordering};

/// Known IRCv3 capability types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// SASL authentication
    Sasl,
    /// Client message tags support
    MessageTags,
    /// Server-time message tags
    ServerTime,
    /// Message batching
    Batch,
    /// Label request/response correlation
    LabeledResponse,
    /// Echo messages back to sender
    EchoMessage,
    /// Notify of account login/logout
    AccountNotify,
    /// Notify of away status changes
    AwayNotify,
    /// Add account tag to messages
    AccountTag,
    /// Notify of capability changes
    CapNotify,
    /// Notify of hostname changes
    ChgHost,
    /// Extended JOIN with account and realname
    ExtendedJoin,
    /// Notify of channel invites
    InviteNotify,
    /// Show all user prefix modes in NAMES
    MultiPrefix,
    /// Full nick!user@host in NAMES
    UserhostInNames,
    /// Multiline messages (draft)
    Multiline,
    /// Unknown/custom capability
    Custom(String),
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        match self {
            Self::Sasl => "sasl",
            Self::MessageTags => "message-tags",
            Self::ServerTime => "server-time",
            Self::Batch => "batch",
            Self::LabeledResponse => "labeled-response",
            Self::EchoMessage => "echo-message",
            Self::AccountNotify => "account-notify",
            Self::AwayNotify => "away-notify",
            Self::AccountTag => "account-tag",
            Self::CapNotify => "cap-notify",
            Self::ChgHost => "chghost",
            Self::ExtendedJoin => "extended-join",
            Self::InviteNotify => "invite-notify",
            Self::MultiPrefix => "multi-prefix",
            Self::UserhostInNames => "userhost-in-names",
            Self::Multiline => "draft/multiline",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        match s {
            "sasl" => Self::Sasl,
            "message-tags" => Self::MessageTags,
            "server-time" => Self::ServerTime,
            "batch" => Self::Batch,
            "labeled-response" => Self::LabeledResponse,
            "echo-message" => Self::EchoMessage,
            "account-notify" => Self::AccountNotify,
            "away-notify" => Self::AwayNotify,
            "account-tag" => Self::AccountTag,
            "cap-notify" => Self::CapNotify,
            "chghost" => Self::ChgHost,
            "extended-join" => Self::ExtendedJoin,
            "invite-notify" => Self::InviteNotify,
            "multi-prefix" => Self::MultiPrefix,
            "userhost-in-names" => Self::UserhostInNames,
            "draft/multiline" | "multiline" => Self::Multiline,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Split a `name[=value]` CAP token.
pub fn split_cap_token(token: &str) -> (&str, &str) {
    match token.split_once('=') {
        Some((name, value)) => (name, value),
        None => (token, ""),
    }
}

/// The `batch` capability was acknowledged.
pub const FLAG_BATCH: u32 = 1 << 0;
/// The `message-tags` capability was acknowledged.
pub const FLAG_MESSAGE_TAGS: u32 = 1 << 1;
/// `labeled-response` was acknowledged (requires `batch`).
pub const FLAG_LABELED_RESPONSE: u32 = 1 << 2;
/// Multiline was acknowledged (requires `batch` and `message-tags`).
pub const FLAG_MULTILINE: u32 = 1 << 3;

/// Compute the negotiated-feature bitset from acknowledged cap names,
/// honoring the capability preconditions.
pub fn compute_flags<'a, I>(acked: I) -> u32
where
    I: IntoIterator<Item = &'a str>,
{
    let (mut batch, mut label, mut tags, mut multiline) = (false, false, false, false);
    for name in acked {
        match Capability::from(name) {
            Capability::Batch => batch = true,
            Capability::LabeledResponse => label = true,
            Capability::MessageTags => tags = true,
            Capability::Multiline => multiline = true,
            _ => {}
        }
    }

    let mut flags = 0;
    if batch {
        flags |= FLAG_BATCH;
    }
    if tags {
        flags |= FLAG_MESSAGE_TAGS;
    }
    if batch && label {
        flags |= FLAG_LABELED_RESPONSE;
    }
    if batch && tags && multiline {
        flags |= FLAG_MULTILINE;
    }
    flags
}

/// Atomic view of the negotiated-feature bitset.
///
/// Dispatch reads these on every inbound message, so they bypass the
/// state lock entirely.
#[derive(Debug, Default)]
pub struct NegotiatedFlags(AtomicU32);

impl NegotiatedFlags {
    pub fn new() -> Self {
        NegotiatedFlags(AtomicU32::new(0))
    }

    /// Replace the whole bitset (after processing CAP ACK/DEL).
    pub fn store(&self, flags: u32) {
        self.0.store(flags, Ordering::Relaxed);
    }

    pub fn batch(&self) -> bool {
        self.0.load(Ordering::Relaxed) & FLAG_BATCH != 0
    }

    pub fn message_tags(&self) -> bool {
        self.0.load(Ordering::Relaxed) & FLAG_MESSAGE_TAGS != 0
    }

    pub fn labeled_response(&self) -> bool {
        self.0.load(Ordering::Relaxed) & FLAG_LABELED_RESPONSE != 0
    }

    pub fn multiline(&self) -> bool {
        self.0.load(Ordering::Relaxed) & FLAG_MULTILINE != 0
    }
}
