//! Message reconstruction from normalized storage.
//!
//! The store keeps each message as an ordered list of header records plus one
//! body blob, with header and body data deduplicated by hash. Reconstruction
//! re-serializes that into a single transmittable message: headers in their
//! original order, a blank line, then the raw body bytes untouched.

use serde::{Deserialize, Serialize};

/// One normalized header record: name, stored wire-form value, and the
/// ordinal position that defines its place in the original message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub data: String,
    pub ordinal: i32,
}

/// The normalized pieces of one stored message.
#[derive(Debug, Clone)]
pub struct MessageParts {
    pub id: i64,
    pub headers: Vec<MessageHeader>,
    pub body: Vec<u8>,
}

/// Rebuild the full message from its normalized parts.
///
/// Header order comes from the ordinal column, not from the order the store
/// happened to return rows in. Body bytes are copied verbatim; values are
/// stored pre-encoded so no re-encoding happens here. Source data is never
/// mutated.
pub fn reconstruct(parts: &MessageParts) -> Vec<u8> {
    let mut headers: Vec<&MessageHeader> = parts.headers.iter().collect();
    headers.sort_by_key(|header| header.ordinal);

    let header_len: usize = headers
        .iter()
        .map(|h| h.name.len() + h.data.len() + 4)
        .sum();
    let mut out = Vec::with_capacity(header_len + 2 + parts.body.len());

    for header in headers {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.data.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&parts.body);

    out
}

/// Render a failed message id for the profile document's failure list.
///
/// Lowercase hex, no prefix.
pub fn failure_token(message_id: i64) -> String {
    format!("{:x}", message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str, data: &str, ordinal: i32) -> MessageHeader {
        MessageHeader {
            name: name.to_string(),
            data: data.to_string(),
            ordinal,
        }
    }

    #[test]
    fn test_headers_follow_ordinal_not_row_order() {
        let parts = MessageParts {
            id: 1,
            headers: vec![
                header("Subject", "hello", 2),
                header("From", "a@example.com", 0),
                header("To", "b@example.com", 1),
            ],
            body: b"body\r\n".to_vec(),
        };

        let raw = reconstruct(&parts);
        let text = String::from_utf8(raw).unwrap();
        assert_eq!(
            text,
            "From: a@example.com\r\nTo: b@example.com\r\nSubject: hello\r\n\r\nbody\r\n"
        );
    }

    #[test]
    fn test_body_bytes_are_untouched() {
        let body = vec![0u8, 159, 146, 150, b'\n', 0xff];
        let parts = MessageParts {
            id: 2,
            headers: vec![header("X-Blob", "yes", 0)],
            body: body.clone(),
        };

        let raw = reconstruct(&parts);
        assert!(raw.ends_with(&body));
    }

    #[test]
    fn test_output_parses_as_mail() {
        let parts = MessageParts {
            id: 3,
            headers: vec![
                header("From", "sender@example.com", 0),
                header("Subject", "=?utf-8?q?encoded?=", 1),
            ],
            body: b"plain text body".to_vec(),
        };

        let raw = reconstruct(&parts);
        let parsed = mailparse::parse_mail(&raw).unwrap();
        let from = parsed
            .headers
            .iter()
            .find(|h| h.get_key() == "From")
            .unwrap();
        assert_eq!(from.get_value(), "sender@example.com");
        assert_eq!(parsed.get_body().unwrap(), "plain text body");
    }

    #[test]
    fn test_failure_token_is_lowercase_hex() {
        assert_eq!(failure_token(255), "ff");
        assert_eq!(failure_token(4096), "1000");
    }
}
