//! Purpose: Encode and decode the tab-separated record format used by RPC calls.
//! Exports: `Record`, `Encoding`, `encode`, `decode`.
//! Role: Pure byte-level codec; no I/O and no knowledge of operations.
//! Invariants: Record order is preserved end-to-end; keys may repeat.
//! Invariants: One non-printable byte anywhere forces base64 for every field.
//! Invariants: Identity mode never escapes delimiters; printable-only payloads
//! cannot contain them by construction.

use crate::core::error::{Error, ErrorKind};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// An ordered key/value pair. An explicit pair list is used rather than a map
/// because the wire format is ordered and keys repeat (the `_`-prefixed bulk
/// convention); duplicate suppression would corrupt bulk results.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Field encoding for a request body, chosen per record list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Identity,
    Base64,
}

impl Encoding {
    /// Request content-type announcing the field encoding to the server.
    /// Built fresh per call; there are no shared header templates.
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Identity => "text/tab-separated-values",
            Encoding::Base64 => "text/tab-separated-values; colenc=B",
        }
    }
}

/// Encode records as `key \t value \n` lines. Two passes: the first detects
/// binary content and computes the exact output size for the chosen encoding,
/// the second writes into a buffer of that capacity.
pub fn encode(records: &[Record]) -> (Vec<u8>, Encoding) {
    let mut has_binary = false;
    for record in records {
        has_binary = has_binary || !is_printable(&record.key) || !is_printable(&record.value);
    }
    let encoding = if has_binary {
        Encoding::Base64
    } else {
        Encoding::Identity
    };

    let mut size = 0;
    for record in records {
        size += field_len(encoding, record.key.len());
        size += 1; // tab
        size += field_len(encoding, record.value.len());
        size += 1; // newline
    }

    let mut buf = Vec::with_capacity(size);
    for record in records {
        write_field(&mut buf, encoding, &record.key);
        buf.push(b'\t');
        write_field(&mut buf, encoding, &record.value);
        buf.push(b'\n');
    }
    (buf, encoding)
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (0x20..=0x7e).contains(&b))
}

fn field_len(encoding: Encoding, raw: usize) -> usize {
    match encoding {
        Encoding::Identity => raw,
        Encoding::Base64 => raw.div_ceil(3) * 4,
    }
}

fn write_field(buf: &mut Vec<u8>, encoding: Encoding, field: &[u8]) {
    match encoding {
        Encoding::Identity => buf.extend_from_slice(field),
        Encoding::Base64 => buf.extend_from_slice(STANDARD.encode(field).as_bytes()),
    }
}

type DecodeField = fn(&[u8]) -> Vec<u8>;

/// Decode an RPC response body into records.
///
/// The server signals the field encoding solely via the final character of
/// the response content-type: `B` base64, `U` percent-escape, `s` identity
/// (`...values`). The server only ever emits a fixed handful of content-type
/// strings, so this skips mime parameter parsing on purpose. Anything else is
/// a `Decode` error. An empty body decodes to no records regardless of the
/// content-type.
pub fn decode(buf: &[u8], content_type: &str) -> Result<Vec<Record>, Error> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let decode_field: DecodeField = match content_type.as_bytes().last() {
        Some(b'B') => base64_field,
        Some(b'U') => percent_field,
        Some(b's') => identity_field,
        _ => {
            return Err(Error::new(ErrorKind::Decode).with_message(format!(
                "responded with unknown Content-Type: {content_type}"
            )));
        }
    };

    // The newline count tells us the record count up front, so the result
    // vector never reallocates.
    let record_count = buf.iter().filter(|&&b| b == b'\n').count();
    let mut records = Vec::with_capacity(record_count);

    let mut rest = buf;
    while let Some(tab) = rest.iter().position(|&b| b == b'\t') {
        let key = decode_field(&rest[..tab]);
        rest = &rest[tab + 1..];
        if rest.is_empty() {
            // A key whose tab is the last byte of the buffer carries no
            // value bytes at all and is dropped.
            break;
        }
        let (raw_value, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(newline) => (&rest[..newline], &rest[newline + 1..]),
            // Trailing record without a terminator keeps whatever remains.
            None => (rest, &rest[rest.len()..]),
        };
        records.push(Record {
            key,
            value: decode_field(raw_value),
        });
        rest = next;
    }
    Ok(records)
}

fn identity_field(field: &[u8]) -> Vec<u8> {
    field.to_vec()
}

// The server controls this field; a corrupt one decodes to empty rather than
// failing the whole response.
fn base64_field(field: &[u8]) -> Vec<u8> {
    STANDARD.decode(field).unwrap_or_default()
}

// Only the %XX hex-pair form exists on this wire. A stray `%` without two
// valid hex digits produces garbage, not an error; inherited quirk.
fn percent_field(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] != b'%' {
            out.push(field[i]);
            i += 1;
            continue;
        }
        let hi = field.get(i + 1).copied().map_or(0, unhex);
        let lo = field.get(i + 2).copied().map_or(0, unhex);
        out.push(hi << 4 | lo);
        i += 3;
    }
    out
}

fn unhex(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{Encoding, Record, decode, encode};

    fn record(key: &str, value: &[u8]) -> Record {
        Record::new(key, value)
    }

    #[test]
    fn printable_records_use_identity_encoding() {
        let records = vec![record("alpha", b"one"), record("beta", b"two words")];
        let (buf, encoding) = encode(&records);
        assert_eq!(encoding, Encoding::Identity);
        assert_eq!(buf, b"alpha\tone\nbeta\ttwo words\n");
        assert_eq!(encoding.content_type(), "text/tab-separated-values");
    }

    #[test]
    fn single_binary_byte_forces_base64_for_every_field() {
        let records = vec![record("plain", b"ascii"), record("key", b"\x00binary")];
        let (buf, encoding) = encode(&records);
        assert_eq!(encoding, Encoding::Base64);
        assert_eq!(
            encoding.content_type(),
            "text/tab-separated-values; colenc=B"
        );
        // Even the fully printable record is base64 encoded.
        assert_eq!(buf, b"cGxhaW4=\tYXNjaWk=\na2V5\tAGJpbmFyeQ==\n");
    }

    #[test]
    fn round_trip_identity() {
        let records = vec![record("a", b"1"), record("a", b"2"), record("z", b"")];
        let (buf, encoding) = encode(&records);
        let decoded = decode(&buf, encoding.content_type()).expect("decode");
        assert_eq!(decoded, records);
    }

    #[test]
    fn round_trip_base64_with_arbitrary_bytes() {
        let records = vec![
            Record::new(vec![0u8, 9, 10, 13, 255], vec![1u8, 2, 3]),
            record("tab\there", b"new\nline"),
        ];
        let (buf, encoding) = encode(&records);
        assert_eq!(encoding, Encoding::Base64);
        let decoded = decode(&buf, "text/tab-separated-values; colenc=B").expect("decode");
        assert_eq!(decoded, records);
    }

    #[test]
    fn empty_list_encodes_to_empty_identity_body() {
        let (buf, encoding) = encode(&[]);
        assert!(buf.is_empty());
        assert_eq!(encoding, Encoding::Identity);
    }

    #[test]
    fn empty_buffer_decodes_to_no_records_without_content_type_check() {
        let decoded = decode(b"", "application/octet-stream").expect("decode");
        assert!(decoded.is_empty());
    }

    #[test]
    fn unknown_content_type_final_character_is_a_decode_error() {
        let err = decode(b"a\tb\n", "text/plain").expect_err("err");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Decode);
    }

    #[test]
    fn empty_content_type_is_a_decode_error() {
        let err = decode(b"a\tb\n", "").expect_err("err");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Decode);
    }

    #[test]
    fn percent_escaped_fields_are_decoded() {
        let decoded = decode(
            b"%5Fkey\tsp%20ace%0A\n",
            "text/tab-separated-values; colenc=U",
        )
        .expect("decode");
        assert_eq!(decoded, vec![record("_key", b"sp ace\n")]);
    }

    #[test]
    fn percent_without_valid_hex_yields_garbage_not_an_error() {
        // Invalid hex maps through a zero-returning unhex, and a trailing
        // `%` reads past the field end as zeros. Inherited behavior; this
        // must never become a validation error.
        let decoded = decode(b"k\ta%zzb\n", "text/tab-separated-values; colenc=U")
            .expect("decode");
        // 'z' unhexes to 0, so "%zz" collapses to a NUL byte.
        assert_eq!(decoded, vec![record("k", b"a\x00b")]);

        let decoded = decode(b"k\tend%\n", "text/tab-separated-values; colenc=U")
            .expect("decode");
        assert_eq!(decoded, vec![record("k", b"end\x00")]);
    }

    #[test]
    fn trailing_record_without_newline_is_kept() {
        let decoded = decode(b"a\t1\nb\t2", "text/tab-separated-values").expect("decode");
        assert_eq!(decoded, vec![record("a", b"1"), record("b", b"2")]);
    }

    #[test]
    fn key_with_trailing_tab_and_nothing_else_is_dropped() {
        let decoded = decode(b"a\t1\nb\t", "text/tab-separated-values").expect("decode");
        assert_eq!(decoded, vec![record("a", b"1")]);
    }

    #[test]
    fn immediate_newline_after_tab_yields_empty_value() {
        let decoded = decode(b"a\t\nb\t2\n", "text/tab-separated-values").expect("decode");
        assert_eq!(decoded, vec![record("a", b""), record("b", b"2")]);
    }

    #[test]
    fn bytes_before_first_tab_only_are_ignored() {
        // No tab at all: nothing to parse.
        let decoded = decode(b"loose bytes", "text/tab-separated-values").expect("decode");
        assert!(decoded.is_empty());
    }

    #[test]
    fn corrupt_base64_field_decodes_to_empty() {
        let decoded = decode(
            b"!!!not-base64!!!\tYQ==\n",
            "text/tab-separated-values; colenc=B",
        )
        .expect("decode");
        assert_eq!(decoded, vec![Record::new(Vec::new(), b"a".to_vec())]);
    }
}
