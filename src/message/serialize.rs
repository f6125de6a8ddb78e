//! Wire-line assembly and the size/charset discipline.
//!
//! Assembly validates what parsing tolerates: the command must be
//! present, only the final parameter may be empty, contain spaces, or
//! start with `:`, and tag names must satisfy the grammar. Two byte
//! budgets apply in strict mode: the tag section budget (split in half
//! between client-only and server tags when assembling as a client) and
//! the body budget (default 512 bytes including CRLF). A body over
//! budget is truncated without ever splitting a UTF-8 code point.

use std::fmt::{self, Write as _};

use crate::error::ProtocolError;
use crate::message::tags::{escape_tag_value, is_valid_tag_name};
use crate::message::{Message, Tags};

/// Maximum length of the tag section (`@` + tag data), per IRCv3.
pub const MAX_TAGS_LEN: usize = 8191;

/// Maximum tag data bytes for client-only tags when sending as a client.
pub const MAX_CLIENT_TAG_DATA_LEN: usize = 4094;

/// Maximum tag data bytes for server tags when sending as a client.
pub const MAX_SERVER_TAG_DATA_LEN: usize = 4094;

/// Default body budget (including CRLF) for one line.
pub const DEFAULT_MAX_LINE_LEN: usize = 512;

/// Truncate to at most `max_bytes` without splitting a UTF-8 code point.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn write_tag_data(out: &mut String, tags: &Tags) -> Result<(), ProtocolError> {
    for (name, value) in tags {
        if !is_valid_tag_name(name) {
            return Err(ProtocolError::InvalidTagContent(name.clone()));
        }
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(name);
        if let Some(value) = value {
            if value.contains('\0') {
                return Err(ProtocolError::InvalidTagContent(name.clone()));
            }
            out.push('=');
            escape_tag_value(out, value).expect("writing to String cannot fail");
        }
    }
    Ok(())
}

fn check_token(token: &str) -> Result<(), ProtocolError> {
    if let Some(bad) = token.chars().find(|&c| c == '\0' || c == '\r' || c == '\n') {
        return Err(ProtocolError::LineContainsBadChar(bad));
    }
    Ok(())
}

/// Assemble `msg` into a CRLF-terminated wire line.
///
/// `from_client: Some(_)` enables the tag budgets (`Some(true)` splits
/// them for a client sender); `max_line_len: Some(_)` enables the body
/// budget. Exceeding the body budget yields
/// [`ProtocolError::BodyTooLong`] carrying the truncated line.
pub(super) fn assemble(
    msg: &Message,
    from_client: Option<bool>,
    max_line_len: Option<usize>,
) -> Result<String, ProtocolError> {
    if msg.command.is_empty() {
        return Err(ProtocolError::CommandMissing);
    }
    if let Some(bad) = msg
        .command
        .chars()
        .find(|&c| c == ' ' || c == '\0' || c == '\r' || c == '\n')
    {
        return Err(ProtocolError::LineContainsBadChar(bad));
    }

    let mut line = String::new();

    if !msg.tags.is_empty() || !msg.client_tags.is_empty() {
        let mut server_data = String::new();
        write_tag_data(&mut server_data, &msg.tags)?;
        let mut client_data = String::new();
        write_tag_data(&mut client_data, &msg.client_tags)?;

        match from_client {
            Some(true) => {
                // Half of the section budget to each kind of tag.
                if server_data.len() > MAX_SERVER_TAG_DATA_LEN
                    || client_data.len() > MAX_CLIENT_TAG_DATA_LEN
                {
                    return Err(ProtocolError::TagsTooLong(
                        server_data.len() + client_data.len(),
                    ));
                }
            }
            Some(false) => {
                if server_data.len() + client_data.len() > MAX_TAGS_LEN - 2 {
                    return Err(ProtocolError::TagsTooLong(
                        server_data.len() + client_data.len(),
                    ));
                }
            }
            None => {}
        }

        line.push('@');
        line.push_str(&server_data);
        if !server_data.is_empty() && !client_data.is_empty() {
            line.push(';');
        }
        line.push_str(&client_data);
        line.push(' ');
    }

    let tags_len = line.len();

    if let Some(source) = &msg.source {
        check_token(source)?;
        if source.is_empty() || source.contains(' ') {
            return Err(ProtocolError::BadParam(source.clone()));
        }
        line.push(':');
        line.push_str(source);
        line.push(' ');
    }

    line.push_str(&msg.command);

    for (i, param) in msg.params.iter().enumerate() {
        check_token(param)?;
        let last = i == msg.params.len() - 1;
        let needs_trailing =
            param.is_empty() || param.contains(' ') || param.starts_with(':');
        if needs_trailing && !last {
            return Err(ProtocolError::BadParam(param.clone()));
        }
        line.push(' ');
        if needs_trailing || (last && msg.force_trailing) {
            line.push(':');
        }
        line.push_str(param);
    }

    if let Some(max_line_len) = max_line_len {
        // Budget covers the non-tag portion plus CRLF.
        let body_len = line.len() - tags_len;
        if body_len + 2 > max_line_len {
            let keep = truncate_utf8(&line[tags_len..], max_line_len.saturating_sub(2)).len();
            line.truncate(tags_len + keep);
            line.push_str("\r\n");
            return Err(ProtocolError::BodyTooLong(line.into_bytes()));
        }
    }

    line.push_str("\r\n");
    Ok(line)
}

/// Write the wire form without validation or CRLF, for `Display`.
pub(super) fn write_unchecked(msg: &Message, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !msg.tags.is_empty() || !msg.client_tags.is_empty() {
        f.write_char('@')?;
        let mut first = true;
        for (name, value) in msg.tags.iter().chain(msg.client_tags.iter()) {
            if !first {
                f.write_char(';')?;
            }
            first = false;
            f.write_str(name)?;
            if let Some(value) = value {
                f.write_char('=')?;
                escape_tag_value(f, value)?;
            }
        }
        f.write_char(' ')?;
    }
    if let Some(source) = &msg.source {
        write!(f, ":{} ", source)?;
    }
    f.write_str(&msg.command)?;
    for (i, param) in msg.params.iter().enumerate() {
        let last = i == msg.params.len() - 1;
        let needs_trailing =
            param.is_empty() || param.contains(' ') || param.starts_with(':');
        f.write_char(' ')?;
        if needs_trailing && last || msg.force_trailing && last {
            f.write_char(':')?;
        }
        f.write_str(param)?;
    }
    Ok(())
}
