//! IRC formatting-code escapes.
//!
//! IRC text formatting rides on raw control bytes (bold 0x02, italic
//! 0x1d, underline 0x1f, reset 0x0f, colour 0x03). This module converts
//! between those bytes and a printable dollar-escape form:
//!
//! | escape | meaning |
//! |--------|---------|
//! | `$b` | bold |
//! | `$i` | italic |
//! | `$u` | underline |
//! | `$r` | reset |
//! | `$$` | a literal `$` |
//! | `$c[name]`, `$c[fg,bg]` | colour by name |

const BOLD: char = '\u{02}';
const COLOUR: char = '\u{03}';
const ITALIC: char = '\u{1d}';
const UNDERLINE: char = '\u{1f}';
const RESET: char = '\u{0f}';

/// Colour codes in match order: two-digit forms first so the longest
/// code wins when scanning raw text.
const NUM_TO_COLOUR: &[(&str, &str)] = &[
    ("15", "light grey"),
    ("14", "grey"),
    ("13", "pink"),
    ("12", "light blue"),
    ("11", "light cyan"),
    ("10", "cyan"),
    ("09", "light green"),
    ("08", "yellow"),
    ("07", "orange"),
    ("06", "magenta"),
    ("05", "brown"),
    ("04", "red"),
    ("03", "green"),
    ("02", "blue"),
    ("01", "black"),
    ("00", "white"),
    ("9", "light green"),
    ("8", "yellow"),
    ("7", "orange"),
    ("6", "magenta"),
    ("5", "brown"),
    ("4", "red"),
    ("3", "green"),
    ("2", "blue"),
    ("1", "black"),
    ("0", "white"),
];

fn colour_code_full(name: &str) -> &'static str {
    match name {
        "white" => "00",
        "black" => "01",
        "blue" => "02",
        "green" => "03",
        "red" => "04",
        "brown" => "05",
        "magenta" => "06",
        "orange" => "07",
        "yellow" => "08",
        "light green" => "09",
        "cyan" => "10",
        "light cyan" => "11",
        "light blue" => "12",
        "pink" => "13",
        "grey" => "14",
        "light grey" => "15",
        _ => "",
    }
}

fn colour_code_truncated(name: &str) -> &'static str {
    match name {
        "white" => "0",
        "black" => "1",
        "blue" => "2",
        "green" => "3",
        "red" => "4",
        "brown" => "5",
        "magenta" => "6",
        "orange" => "7",
        "yellow" => "8",
        "light green" => "9",
        "cyan" => "10",
        "light cyan" => "11",
        "light blue" => "12",
        "pink" => "13",
        "grey" => "14",
        "light grey" => "15",
        _ => "",
    }
}

/// Convert raw IRC formatting bytes into dollar escapes.
///
/// Turns `"a \x02cool\x02 \x034red\x0f thing"` into
/// `"a $bcool$b $c[red]red$r thing"`.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        match c {
            '$' => out.push_str("$$"),
            BOLD => out.push_str("$b"),
            ITALIC => out.push_str("$i"),
            UNDERLINE => out.push_str("$u"),
            RESET => out.push_str("$r"),
            COLOUR => {
                rest = &rest[1..];
                out.push_str("$c");
                if !rest.starts_with(|ch: char| ch.is_ascii_digit()) {
                    out.push_str("[]");
                    continue;
                }
                out.push('[');
                for &(code, name) in NUM_TO_COLOUR {
                    if let Some(after) = rest.strip_prefix(code) {
                        rest = after;
                        out.push_str(name);
                        if rest.len() > 1 && rest.starts_with(',') {
                            let bg = &rest[1..];
                            for &(code, name) in NUM_TO_COLOUR {
                                if let Some(after) = bg.strip_prefix(code) {
                                    out.push(',');
                                    out.push_str(name);
                                    rest = after;
                                    break;
                                }
                            }
                        }
                        break;
                    }
                }
                out.push(']');
                continue;
            }
            c => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// Convert dollar escapes into raw IRC formatting bytes.
///
/// Turns `"a $bcool$b $c[red]red$r thing"` into
/// `"a \x02cool\x02 \x034red\x0f thing"`.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if c != '$' || rest.len() < 2 {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        let mut chars = rest.chars();
        chars.next();
        let escape_char = chars.next().expect("length checked above");
        rest = &rest[1 + escape_char.len_utf8()..];
        match escape_char {
            '$' => out.push('$'),
            'b' => out.push(BOLD),
            'i' => out.push(ITALIC),
            'u' => out.push(UNDERLINE),
            'r' => out.push(RESET),
            'c' => {
                out.push(COLOUR);
                let Some(after_bracket) = rest.strip_prefix('[') else {
                    continue;
                };
                let Some((names, after)) = after_bracket.split_once(']') else {
                    continue;
                };
                rest = after;

                let next_is_digit =
                    rest.starts_with(|ch: char| ch.is_ascii_digit());
                match names.split_once(',') {
                    Some((fg, bg)) => {
                        out.push_str(colour_code_truncated(fg));
                        out.push(',');
                        if next_is_digit {
                            out.push_str(colour_code_full(bg));
                        } else {
                            out.push_str(colour_code_truncated(bg));
                        }
                    }
                    None => {
                        if next_is_digit {
                            out.push_str(colour_code_full(names));
                        } else {
                            out.push_str(colour_code_truncated(names));
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_basic() {
        assert_eq!(escape("\x02bold\x02"), "$bbold$b");
        assert_eq!(escape("\x1ditalic\x1d"), "$iitalic$i");
        assert_eq!(escape("\x1funder\x1f"), "$uunder$u");
        assert_eq!(escape("a\x0fb"), "a$rb");
        assert_eq!(escape("price: $5"), "price: $$5");
    }

    #[test]
    fn test_escape_colours() {
        assert_eq!(escape("\x034red\x0f"), "$c[red]red$r");
        assert_eq!(escape("\x0304deep"), "$c[red]deep");
        assert_eq!(escape("\x033,2greenblue"), "$c[green,blue]greenblue");
        // colour byte with no code
        assert_eq!(escape("\x03plain"), "$c[]plain");
    }

    #[test]
    fn test_unescape_basic() {
        assert_eq!(unescape("$bbold$b"), "\x02bold\x02");
        assert_eq!(unescape("$$5 bill"), "$5 bill");
        assert_eq!(unescape("$r reset"), "\x0f reset");
        // unknown escape yields the raw second character
        assert_eq!(unescape("$zx"), "zx");
        // trailing lone dollar is literal
        assert_eq!(unescape("end$"), "end$");
    }

    #[test]
    fn test_unescape_colours() {
        assert_eq!(unescape("$c[red]text"), "\x034text");
        // a digit after the colour forces the zero-padded form
        assert_eq!(unescape("$c[red]4text"), "\x03044text");
        assert_eq!(unescape("$c[green,blue]hi"), "\x033,2hi");
        assert_eq!(unescape("$c[]off"), "\x03off");
        assert_eq!(unescape("$chi"), "\x03hi");
    }

    #[test]
    fn test_message_round_trip() {
        let wire = "Isn't this such an \x02amazing\x0f day?!";
        let escaped = "Isn't this such an $bamazing$r day?!";
        assert_eq!(unescape(escaped), wire);
        assert_eq!(escape(wire), escaped);
    }
}
