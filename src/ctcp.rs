//! CTCP message reclassification.
//!
//! An inbound PRIVMSG whose text is framed by 0x01 is a CTCP query. When
//! CTCP handling is enabled, such messages are rewritten before dispatch:
//! the command becomes one of the `CTCP_*` pseudo-commands (or bare
//! `CTCP` for unrecognized queries) and the 0x01 framing is stripped from
//! the final parameter, so handlers see the payload directly.

use crate::message::Message;

/// Known query reclassifications.
pub const CTCP_VERSION: &str = "CTCP_VERSION";
pub const CTCP_TIME: &str = "CTCP_TIME";
pub const CTCP_PING: &str = "CTCP_PING";
pub const CTCP_USERINFO: &str = "CTCP_USERINFO";
pub const CTCP_CLIENTINFO: &str = "CTCP_CLIENTINFO";
pub const CTCP_ACTION: &str = "CTCP_ACTION";
/// Unrecognized CTCP query.
pub const CTCP_UNKNOWN: &str = "CTCP";

const DELIMITER: char = '\u{1}';

/// Rewrite a CTCP-framed PRIVMSG in place. Non-CTCP messages pass
/// through untouched.
pub fn rewrite_ctcp(event: &mut Message) {
    if !(event.command == "PRIVMSG"
        && event.params.len() == 2
        && event.params[1].starts_with(DELIMITER))
    {
        return;
    }

    event.command = CTCP_UNKNOWN.to_owned();

    let text = &event.params[1];
    let mut payload = match text.rfind(DELIMITER) {
        Some(i) if i > 0 => text[1..i].to_owned(),
        // no closing delimiter
        _ => return,
    };

    if payload == "VERSION" {
        event.command = CTCP_VERSION.to_owned();
    } else if payload == "TIME" {
        event.command = CTCP_TIME.to_owned();
    } else if payload.starts_with("PING") {
        event.command = CTCP_PING.to_owned();
    } else if payload == "USERINFO" {
        event.command = CTCP_USERINFO.to_owned();
    } else if payload == "CLIENTINFO" {
        event.command = CTCP_CLIENTINFO.to_owned();
    } else if payload.starts_with("ACTION") {
        event.command = CTCP_ACTION.to_owned();
        payload = if payload.len() > 6 {
            payload[7.min(payload.len())..].to_owned()
        } else {
            String::new()
        };
    }

    let last = event.params.len() - 1;
    event.params[last] = payload;
}
