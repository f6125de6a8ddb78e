//! Wire-line parsing.
//!
//! The leading sections (tags, prefix, command) are recognized with nom;
//! parameters are walked by hand because the trailing rule (`:` takes the
//! rest of the line verbatim) does not decompose well into combinators.
//! The parser is lenient about runs of spaces between tokens and
//! uppercases the command.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::char,
    combinator::opt,
    error::VerboseError,
    sequence::preceded,
    IResult,
};

use crate::error::ProtocolError;
use crate::message::tags::{is_valid_tag_name, unescape_tag_value};
use crate::message::Message;

type ParseResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

/// The tag section: `@` up to the first space.
fn section_tags(input: &str) -> ParseResult<'_, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// The source prefix: `:` up to the first space.
fn section_prefix(input: &str) -> ParseResult<'_, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// The command verb (or numeric): everything up to the next space.
fn section_command(input: &str) -> ParseResult<'_, &str> {
    take_while1(|c| c != ' ')(input)
}

/// Parse one IRC line. CR/LF at either end is stripped first.
///
/// The last parameter is accepted whether or not it was sent in trailing
/// form; an empty trailing (`:` at end of line) yields an empty final
/// parameter.
pub fn parse_line(line: &str) -> Result<Message, ProtocolError> {
    parse_inner(line, true, None)
}

/// Parse one IRC line under a byte cap.
///
/// When `trim_final_crlf` is set, one trailing CR, LF, or CRLF is
/// stripped before parsing. `max_len` bounds the non-tag portion of the
/// line (counted as on the wire, including CRLF); excess bytes are
/// dropped on a UTF-8 code point boundary before parsing.
pub fn parse_line_strict(
    line: &str,
    trim_final_crlf: bool,
    max_len: usize,
) -> Result<Message, ProtocolError> {
    parse_inner(line, trim_final_crlf, Some(max_len))
}

fn parse_inner(
    line: &str,
    trim_crlf: bool,
    max_len: Option<usize>,
) -> Result<Message, ProtocolError> {
    let line = if trim_crlf {
        line.trim_matches(['\r', '\n'])
    } else {
        line
    };

    if line.is_empty() {
        return Err(ProtocolError::LineEmpty);
    }
    if let Some(bad) = line.chars().find(|&c| c == '\0' || c == '\r' || c == '\n') {
        return Err(ProtocolError::LineContainsBadChar(bad));
    }

    let mut msg = Message::default();

    // A line starting with `@` must contain a space after the tag data.
    let rest = if line.starts_with('@') {
        let (rest, tag_data) =
            section_tags(line).map_err(|_| ProtocolError::LineEmpty)?;
        parse_tag_data(tag_data, &mut msg)?;
        rest
    } else {
        line
    };

    let mut rest = rest.trim_start_matches(' ');
    if rest.is_empty() {
        return Err(ProtocolError::LineEmpty);
    }

    // Body cap (the tag section has its own budget); -2 accounts for the
    // CRLF this line carried on the wire.
    if let Some(max_len) = max_len {
        let cap = max_len.saturating_sub(2);
        if rest.len() > cap {
            let mut end = cap;
            while end > 0 && !rest.is_char_boundary(end) {
                end -= 1;
            }
            rest = &rest[..end];
        }
    }

    let (rest, prefix) =
        opt(section_prefix)(rest).map_err(|_| ProtocolError::LineEmpty)?;
    msg.source = prefix.map(str::to_owned);

    let rest = rest.trim_start_matches(' ');
    let (rest, command) =
        section_command(rest).map_err(|_| ProtocolError::LineEmpty)?;
    msg.command = command.to_ascii_uppercase();

    // Parameters: tokens separated by runs of spaces; a `:`-prefixed token
    // is the trailing parameter and takes the rest of the line verbatim.
    let mut rest = rest;
    loop {
        let trimmed = rest.trim_start_matches(' ');
        if trimmed.is_empty() {
            break;
        }
        if let Some(trailing) = trimmed.strip_prefix(':') {
            msg.params.push(trailing.to_owned());
            break;
        }
        match trimmed.find(' ') {
            Some(idx) => {
                msg.params.push(trimmed[..idx].to_owned());
                rest = &trimmed[idx..];
            }
            None => {
                msg.params.push(trimmed.to_owned());
                break;
            }
        }
    }

    Ok(msg)
}

fn parse_tag_data(data: &str, msg: &mut Message) -> Result<(), ProtocolError> {
    for token in data.split(';') {
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name, Some(unescape_tag_value(value))),
            None => (token, None),
        };
        if !is_valid_tag_name(name) {
            return Err(ProtocolError::InvalidTagContent(token.to_owned()));
        }
        msg.set_tag(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let msg = parse_line("PING").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.source.is_none());
        assert!(msg.params.is_empty());
        assert!(msg.tags.is_empty());
    }

    #[test]
    fn test_parse_command_with_params() {
        let msg = parse_line("PRIVMSG #channel :Hello, world!").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn test_parse_with_prefix() {
        let msg = parse_line(":nick!user@host PRIVMSG #channel :Hello").unwrap();
        assert_eq!(msg.source.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello"]);
    }

    #[test]
    fn test_parse_with_tags() {
        let msg =
            parse_line("@time=2023-01-01T00:00:00Z :nick PRIVMSG #ch :Hi").unwrap();
        assert_eq!(msg.tag("time"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(msg.source.as_deref(), Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#ch", "Hi"]);
    }

    #[test]
    fn test_parse_with_crlf() {
        let msg = parse_line("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["server"]);
    }

    #[test]
    fn test_parse_numeric_response() {
        let msg = parse_line(":server 001 nick :Welcome").unwrap();
        assert_eq!(msg.source.as_deref(), Some("server"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["nick", "Welcome"]);
    }

    #[test]
    fn test_parse_uppercases_command() {
        let msg = parse_line("privmsg #ch hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = parse_line("PRIVMSG #channel :").unwrap();
        assert_eq!(msg.params, vec!["#channel", ""]);
    }

    #[test]
    fn test_parse_collapses_spaces() {
        let msg = parse_line(":src   AWAY").unwrap();
        assert_eq!(msg.source.as_deref(), Some("src"));
        assert_eq!(msg.command, "AWAY");
        assert!(msg.params.is_empty());

        let msg = parse_line("USER  guest   0  * :Real  Name").unwrap();
        assert_eq!(msg.params, vec!["guest", "0", "*", "Real  Name"]);
    }

    #[test]
    fn test_parse_trailing_space_no_param() {
        let msg = parse_line("JOIN #chan ").unwrap();
        assert_eq!(msg.params, vec!["#chan"]);
    }

    #[test]
    fn test_parse_tag_without_value_and_empty_value() {
        let msg = parse_line("@a;b=;c=3 PING").unwrap();
        assert_eq!(msg.tags.get("a"), Some(&None));
        assert_eq!(msg.tags.get("b"), Some(&Some(String::new())));
        assert_eq!(msg.tag("a"), Some(""));
        assert_eq!(msg.tag("b"), Some(""));
        assert_eq!(msg.tag("c"), Some("3"));
    }

    #[test]
    fn test_parse_client_only_tag() {
        let msg = parse_line("@+example/foo=bar;msgid=x PRIVMSG #ch :hi").unwrap();
        assert_eq!(msg.tag("+example/foo"), Some("bar"));
        assert!(msg.client_tags.contains_key("+example/foo"));
        assert!(msg.tags.contains_key("msgid"));
    }

    #[test]
    fn test_parse_escaped_tag_value() {
        let msg = parse_line("@label=with\\sspace\\:and\\\\more PING").unwrap();
        assert_eq!(msg.tag("label"), Some("with space;and\\more"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_line(""), Err(ProtocolError::LineEmpty)));
        assert!(matches!(parse_line("\r\n"), Err(ProtocolError::LineEmpty)));
        assert!(matches!(
            parse_line("@tags-but-nothing-else"),
            Err(ProtocolError::LineEmpty)
        ));
        assert!(matches!(
            parse_line("@a=b "),
            Err(ProtocolError::LineEmpty)
        ));
        assert!(matches!(
            parse_line(":prefix-only "),
            Err(ProtocolError::LineEmpty)
        ));
        assert!(matches!(
            parse_line("PING \0"),
            Err(ProtocolError::LineContainsBadChar('\0'))
        ));
        assert!(matches!(
            parse_line("PING a\rb"),
            Err(ProtocolError::LineContainsBadChar('\r'))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_tag_name() {
        assert!(matches!(
            parse_line("@bad name=1 PING"),
            Err(ProtocolError::InvalidTagContent(_))
        ));
        assert!(matches!(
            parse_line("@;x=1 PING"),
            Err(ProtocolError::InvalidTagContent(_))
        ));
    }

    #[test]
    fn test_parse_strict_truncates_body() {
        // Cap of 12 leaves 10 bytes of body after the CRLF allowance.
        let msg = parse_line_strict("PRIVMSG #ab", true, 12).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#a"]);
    }

    #[test]
    fn test_parse_strict_truncation_respects_utf8() {
        // "PING é" is 7 bytes; a cap of 8 allows 6 body bytes, landing
        // inside the two-byte é, which must be dropped whole.
        let msg = parse_line_strict("PING é", true, 8).unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn test_parse_strict_ignores_tag_bytes() {
        let msg = parse_line_strict("@time=12345 PING x", true, 10).unwrap();
        assert_eq!(msg.tag("time"), Some("12345"));
        assert_eq!(msg.params, vec!["x"]);
    }

    #[test]
    fn test_parse_strict_no_trim() {
        assert!(matches!(
            parse_line_strict("PING x\r\n", false, 512),
            Err(ProtocolError::LineContainsBadChar('\r'))
        ));
    }
}
