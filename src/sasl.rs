//! SASL authentication helpers.
//!
//! Credential encoding for the `AUTHENTICATE` exchange. Only PLAIN
//! (RFC 4616) and EXTERNAL are supported.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN): <https://tools.ietf.org/html/rfc4616>

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Maximum length of a single `AUTHENTICATE` payload chunk.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Supported SASL authentication mechanisms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SaslMechanism {
    /// PLAIN mechanism (RFC 4616), username/password.
    #[default]
    Plain,
    /// EXTERNAL mechanism, authenticating via the TLS client certificate.
    External,
}

impl SaslMechanism {
    /// Parse a mechanism name. Returns `None` for unsupported mechanisms.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }

    /// The canonical mechanism name sent in `AUTHENTICATE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compose the raw PLAIN response: `authzid NUL authcid NUL passwd`.
///
/// The login name is duplicated as the authorization identity for
/// compatibility with servers that expect it.
pub fn plain_response(login: &str, password: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(login.len() * 2 + password.len() + 2);
    buf.extend_from_slice(login.as_bytes());
    buf.push(0);
    buf.extend_from_slice(login.as_bytes());
    buf.push(0);
    buf.extend_from_slice(password.as_bytes());
    buf
}

/// Encode a raw SASL response into `AUTHENTICATE` payload chunks.
///
/// The response is base64-encoded and split into 400-byte chunks. An
/// empty response is the single token `+`; if the final chunk is exactly
/// 400 bytes, a trailing `+` marks the end of the response.
pub fn encode_response(raw: &[u8]) -> Vec<String> {
    if raw.is_empty() {
        return vec!["+".to_owned()];
    }

    let encoded = BASE64.encode(raw);
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        // base64 output is ASCII, chunk boundaries are char boundaries
        .map(|chunk| std::str::from_utf8(chunk).expect("base64 is ASCII").to_owned())
        .collect();

    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        chunks.push("+".to_owned());
    }
    chunks
}
