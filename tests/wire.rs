//! Wire-codec conformance tests: round-trips, size discipline, tag
//! escaping, and source parsing.

use slirc_client::message::tags::{escape_tag_value, unescape_tag_value};
use slirc_client::{fmt, parse_line, IllFormedNuh, Message, Nuh, ProtocolError};

// =============================================================================
// PARSE / SERIALIZE ROUND-TRIP
// =============================================================================

#[test]
fn test_round_trip_corpus() {
    let cases = [
        "PING",
        "PING 3847362",
        "PONG 3847362",
        ":coolguy!ag@127.0.0.1 PRIVMSG #chan :Hey what's up!",
        ":irc.example.com 001 dan :Welcome to the network",
        "@time=2023-01-01T00:00:00.000Z;msgid=abc123 :nick!user@host PRIVMSG #channel :tagged",
        "@account=bunny :bunny!b@host JOIN #carrots",
        "USER guest 0 * :Real Name",
        "PRIVMSG #chan :",
        "@+example/tag=value TAGMSG #chan",
        "CAP REQ :chghost multi-prefix userhost-in-names",
    ];

    for raw in cases {
        let msg = parse_line(raw).expect(raw);
        let line = msg.line().expect(raw);
        let reparsed = parse_line(&line).expect(raw);
        assert_eq!(msg, reparsed, "round trip failed for {:?}", raw);
    }
}

#[test]
fn test_serialized_wire_form() {
    let msg = Message::with_params("PONG", ["3847362"]);
    assert_eq!(msg.line_bytes().unwrap(), b"PONG 3847362\r\n");

    let msg = Message::with_params("PRIVMSG", ["coalguys", "Isn't this such an \x02amazing\x0f day?!"]);
    assert_eq!(
        msg.line_bytes().unwrap(),
        b"PRIVMSG coalguys :Isn't this such an \x02amazing\x0f day?!\r\n"
    );
}

/// The formatting helper composes with the codec: dollar escapes become
/// control bytes before the message hits the wire.
#[test]
fn test_formatted_privmsg() {
    let text = fmt::unescape("Isn't this such an $bamazing$r day?!");
    let msg = Message::with_params("PRIVMSG", ["coalguys".to_owned(), text]);
    assert_eq!(
        msg.line_bytes().unwrap(),
        b"PRIVMSG coalguys :Isn't this such an \x02amazing\x0f day?!\r\n"
    );
}

// =============================================================================
// UTF-8 SAFETY UNDER TRUNCATION
// =============================================================================

#[test]
fn test_truncation_is_utf8_safe_at_every_limit() {
    // A body mixing 1-, 2-, 3-, and 4-byte code points.
    let payload = "aé€👋".repeat(80);
    let msg = Message::with_params("PRIVMSG", ["#chan".to_owned(), payload]);

    for limit in 32..=600 {
        let result = msg.line_bytes_strict(true, limit);
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(ProtocolError::BodyTooLong(bytes)) => bytes,
            Err(other) => panic!("unexpected error at limit {}: {}", limit, other),
        };
        assert!(bytes.len() <= limit, "limit {} exceeded: {}", limit, bytes.len());
        assert!(
            bytes.len() >= limit.saturating_sub(3).min(msg.line_bytes().unwrap().len()),
            "limit {} undershot: {}",
            limit,
            bytes.len()
        );
        let text = std::str::from_utf8(&bytes)
            .unwrap_or_else(|_| panic!("invalid UTF-8 at limit {}", limit));
        assert!(text.ends_with("\r\n"));
    }
}

// =============================================================================
// TAG ESCAPE INVOLUTION
// =============================================================================

#[test]
fn test_escape_unescape_involution() {
    let values = [
        "",
        "simple",
        "spaces and ; semicolons \\ with \r\n everything",
        "unicode ünïcödé",
        "trailing space ",
    ];
    for value in values {
        let mut escaped = String::new();
        escape_tag_value(&mut escaped, value).unwrap();
        assert_eq!(unescape_tag_value(&escaped), value);
    }
}

#[test]
fn test_escape_idempotent_on_clean_tokens() {
    // Tokens free of special bytes are fixed points of escaping.
    for token in ["abc", "123-456", "a.b/c", "already\\sescaped-looking?no"] {
        let mut once = String::new();
        escape_tag_value(&mut once, token).unwrap();
        if once == token {
            let mut twice = String::new();
            escape_tag_value(&mut twice, &once).unwrap();
            assert_eq!(once, twice);
        }
    }
}

// =============================================================================
// NUH
// =============================================================================

#[test]
fn test_nuh_round_trip() {
    for raw in [
        "coolguy!ag@127.0.0.1",
        "dan-!d@localhost",
        "nick!user@2001:db8::1",
    ] {
        let nuh = Nuh::parse(raw).unwrap();
        assert!(!nuh.nick.is_empty());
        assert_eq!(nuh.to_string(), raw);
        assert_eq!(Nuh::parse(&nuh.to_string()).unwrap(), nuh);
    }
}

#[test]
fn test_nuh_rejects_servers_and_fragments() {
    for raw in ["irc.example.com", "nick", "nick!user", "user@host", "a@b!c"] {
        assert_eq!(Nuh::parse(raw), Err(IllFormedNuh), "{:?}", raw);
    }
}

#[test]
fn test_message_nick_accessor() {
    let msg: Message = ":coolguy!ag@127.0.0.1 PRIVMSG #chan :hi".parse().unwrap();
    assert_eq!(msg.nick(), Some("coolguy"));
    assert_eq!(msg.nuh().unwrap().host, "127.0.0.1");

    let msg: Message = ":irc.example.com PING :token".parse().unwrap();
    assert_eq!(msg.nick(), None);
    assert!(msg.nuh().is_err());
}
