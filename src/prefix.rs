//! Message source (`nick!user@host`) parsing.

use std::fmt;

use thiserror::Error;

/// The source did not have the `nick!user@host` shape.
///
/// Bare server names (which usually contain a dot) and any other source
/// without both `!` and `@`, in that order, are ill-formed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("did not receive a well-formed nick!user@host")]
pub struct IllFormedNuh;

/// A parsed `nick!user@host` message source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nuh {
    pub nick: String,
    pub user: String,
    pub host: String,
}

impl Nuh {
    /// Parse a raw source. Requires both `!` and `@`, with `!` first.
    pub fn parse(raw: &str) -> Result<Nuh, IllFormedNuh> {
        match (raw.find('!'), raw.find('@')) {
            (Some(bang), Some(at)) if bang < at => Ok(Nuh {
                nick: raw[..bang].to_owned(),
                user: raw[bang + 1..at].to_owned(),
                host: raw[at + 1..].to_owned(),
            }),
            _ => Err(IllFormedNuh),
        }
    }
}

impl fmt::Display for Nuh {
    /// Canonical form; exact round-trip with [`Nuh::parse`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nick.is_empty() {
            return Ok(());
        }
        write!(f, "{}!{}@{}", self.nick, self.user, self.host)
    }
}
