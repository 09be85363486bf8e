//! Purpose: Public connection type and the operations it exposes.
//! Exports: `Conn`, `ConnBuilder`, and the get/set/remove/bulk/prefix/count operations.
//! Role: Operation layer plus protocol dispatch; picks REST where it exists
//! and falls back to RPC for everything else.
//! Invariants: One `Conn` per endpoint, safe for concurrent use.
//! Invariants: A `Conn` is only handed out after a successful `/rpc/void` probe.
//! Invariants: Headers are built per call; no shared mutable templates.

use crate::core::codec::{self, Record};
use crate::core::error::{Error, ErrorKind};
use crate::core::tls::{self, CredentialSource};
use crate::core::transport::{DEFAULT_TIMEOUT, Deadline, Transport};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

// Dummy value transmitted for each requested key in bulk get/remove; the
// server ignores it.
const BULK_PLACEHOLDER: &[u8] = b"0";

/// Connection to one store endpoint.
///
/// The store exposes two interfaces: a RESTful one (one verb per operation,
/// value as the raw body) that is the faster of the two, and an RPC one
/// (POSTs to fixed paths, tab-separated payloads) that covers everything.
/// Single-key get/set/remove go over REST; bulk operations, counting, and
/// prefix matching fall back to RPC.
#[derive(Debug)]
pub struct Conn {
    base: Url,
    transport: Transport,
}

/// Configures and establishes a [`Conn`].
pub struct ConnBuilder {
    timeout: Duration,
    pool_size: usize,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl Default for ConnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnBuilder {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            pool_size: 4,
            credentials: None,
        }
    }

    /// Per-call deadline. A transport-level retry restarts the clock, so the
    /// worst case is roughly twice this value.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum idle pooled connections kept to the endpoint.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Supplying credentials switches the connection to https with client
    /// authentication.
    pub fn credentials(mut self, source: impl CredentialSource + 'static) -> Self {
        self.credentials = Some(Arc::new(source));
        self
    }

    /// Establish the connection and eagerly validate connectivity with a
    /// `/rpc/void` round trip, so a dead endpoint fails here instead of on
    /// the first real operation.
    pub fn connect(self, host: &str, port: u16) -> Result<Conn, Error> {
        let (scheme, tls_config) = match &self.credentials {
            Some(source) => ("https", Some(tls::client_config(source.as_ref())?)),
            None => ("http", None),
        };
        let authority = if host.contains(':') {
            // Bare IPv6 address.
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let base = Url::parse(&format!("{scheme}://{authority}/")).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid endpoint {authority}"))
                .with_source(err)
        })?;
        let conn = Conn {
            base,
            transport: Transport::new(self.timeout, self.pool_size, tls_config),
        };
        // Status deliberately ignored: the probe only proves the transport.
        conn.do_rpc("rpc/void", &[])?;
        Ok(conn)
    }
}

impl Conn {
    pub fn builder() -> ConnBuilder {
        ConnBuilder::new()
    }

    /// Connect with defaults (http, 2s timeout, pool of 4).
    pub fn connect(host: &str, port: u16) -> Result<Self, Error> {
        ConnBuilder::new().connect(host, port)
    }

    /// Number of retries performed because the remote end closed idle pooled
    /// connections. Monotonically increasing; wraps on overflow.
    pub fn retry_count(&self) -> u64 {
        self.transport.retry_count()
    }

    /// Retrieve the value stored at `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let _span = tracing::info_span!("kt_get", key).entered();
        let (code, body) = self.do_rest("GET", key, None)?;
        match code {
            200 => Ok(body),
            404 => Err(Error::not_found()),
            _ => Err(rest_error(body, code)),
        }
    }

    /// Store `value` at `key`.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let _span = tracing::info_span!("kt_set", key).entered();
        let (code, body) = self.do_rest("PUT", key, Some(value))?;
        if code != 201 {
            return Err(rest_error(body, code));
        }
        Ok(())
    }

    /// Remove the record stored at `key`.
    pub fn remove(&self, key: &str) -> Result<(), Error> {
        let _span = tracing::info_span!("kt_remove", key).entered();
        let (code, body) = self.do_rest("DELETE", key, None)?;
        match code {
            204 => Ok(()),
            404 => Err(Error::not_found()),
            _ => Err(rest_error(body, code)),
        }
    }

    /// Number of records in the database.
    pub fn count(&self) -> Result<u64, Error> {
        let _span = tracing::info_span!("kt_count").entered();
        let (code, records) = self.do_rpc("rpc/status", &[])?;
        if code != 200 {
            return Err(rpc_error(&records, code));
        }
        parse_numeric_record(&records, b"count")
    }

    /// Retrieve several keys in one round trip. The result holds only the
    /// keys the server found, in request order; a missing key is absent, not
    /// present with an empty value.
    pub fn get_bulk(&self, keys: &[&str]) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let _span = tracing::info_span!("kt_get_bulk", keys = keys.len()).entered();

        // Bulk queries transmit each key with a `_` prefix and a dummy value;
        // the server echoes only the keys it found, still `_`-prefixed, with
        // the real value. Every requested key is seeded with an explicit
        // absent slot first, so "not found" is representable without a nil
        // sentinel ambiguous with a legitimately empty value.
        let mut request = Vec::with_capacity(keys.len());
        let mut slots: Vec<(String, Option<Vec<u8>>)> = Vec::with_capacity(keys.len());
        let mut index: HashMap<&[u8], usize> = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            request.push(Record::new(format!("_{key}"), BULK_PLACEHOLDER));
            slots.push((key.to_string(), None));
            index.insert(key.as_bytes(), i);
        }

        let (code, records) = self.do_rpc("rpc/get_bulk", &request)?;
        if code != 200 {
            return Err(rpc_error(&records, code));
        }
        for record in records {
            let Some(key) = record.key.strip_prefix(b"_") else {
                continue;
            };
            if let Some(&slot) = index.get(key) {
                slots[slot].1 = Some(record.value);
            }
        }
        Ok(slots
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect())
    }

    /// Store several records in one round trip; returns the number stored.
    pub fn set_bulk(&self, entries: &[(&str, &[u8])]) -> Result<u64, Error> {
        let _span = tracing::info_span!("kt_set_bulk", entries = entries.len()).entered();
        let request: Vec<Record> = entries
            .iter()
            .map(|(key, value)| Record::new(format!("_{key}"), *value))
            .collect();
        let (code, records) = self.do_rpc("rpc/set_bulk", &request)?;
        if code != 200 {
            return Err(rpc_error(&records, code));
        }
        parse_numeric_record(&records, b"num")
    }

    /// Remove several keys in one round trip; returns the number removed.
    pub fn remove_bulk(&self, keys: &[&str]) -> Result<u64, Error> {
        let _span = tracing::info_span!("kt_remove_bulk", keys = keys.len()).entered();
        let request: Vec<Record> = keys
            .iter()
            .map(|key| Record::new(format!("_{key}"), BULK_PLACEHOLDER))
            .collect();
        let (code, records) = self.do_rpc("rpc/remove_bulk", &request)?;
        if code != 200 {
            return Err(rpc_error(&records, code));
        }
        parse_numeric_record(&records, b"num")
    }

    /// List up to `max` keys starting with `prefix`.
    ///
    /// Zero matches surface as the `NoMatch` "success" sentinel rather than a
    /// plain error; gokabinet reported it that way and callers still depend
    /// on matching it.
    pub fn match_prefix(&self, prefix: &str, max: i64) -> Result<Vec<String>, Error> {
        let _span = tracing::info_span!("kt_match_prefix", prefix, max).entered();
        let request = [
            Record::new("prefix", prefix),
            Record::new("max", max.to_string()),
        ];
        let (code, records) = self.do_rpc("rpc/match_prefix", &request)?;
        if code != 200 {
            return Err(rpc_error(&records, code));
        }
        let mut matches = Vec::with_capacity(records.len());
        for record in &records {
            if let Some(key) = record.key.strip_prefix(b"_") {
                matches.push(String::from_utf8_lossy(key).into_owned());
            }
        }
        if matches.is_empty() {
            return Err(Error::no_match());
        }
        Ok(matches)
    }

    /// RPC dispatch: POST an encoded record list to a fixed path and decode
    /// the response. Record contents are not interpreted here; that belongs
    /// to the operation layer.
    fn do_rpc(&self, path: &str, records: &[Record]) -> Result<(u16, Vec<Record>), Error> {
        let url = format!("{}{}", self.base, path);
        let (body, encoding) = codec::encode(records);
        let headers = [("Content-Type", encoding.content_type())];
        let (response, deadline) =
            self.transport
                .round_trip("POST", &url, &headers, Some(&body))?;
        let status = response.status();
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        let raw = read_body(response, deadline)?;
        let records = codec::decode(&raw, &content_type)?;
        Ok((status, records))
    }

    /// REST dispatch: verb against the escaped key as the path, value as the
    /// raw body in both directions.
    fn do_rest(&self, method: &str, key: &str, body: Option<&[u8]>) -> Result<(u16, Vec<u8>), Error> {
        let escaped: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        let url = format!("{}{}", self.base, escaped);
        let (response, deadline) = self.transport.round_trip(method, &url, &[], body)?;
        let status = response.status();
        let raw = read_body(response, deadline)?;
        Ok((status, raw))
    }
}

// A deadline that fired while the body was being read turns the whole call
// into a timeout, even though bytes were nominally received.
fn read_body(response: ureq::Response, deadline: Deadline) -> Result<Vec<u8>, Error> {
    let mut raw = Vec::new();
    let read = response.into_reader().read_to_end(&mut raw);
    if deadline.expired() {
        return Err(Error::timeout());
    }
    read.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    Ok(raw)
}

fn rest_error(body: Vec<u8>, code: u16) -> Error {
    Error::new(ErrorKind::Protocol)
        .with_message(String::from_utf8_lossy(&body).into_owned())
        .with_code(code)
}

/// Surface the server's `ERROR` record as the message when an RPC call comes
/// back with an unexpected status.
fn rpc_error(records: &[Record], code: u16) -> Error {
    let message = find_record(records, b"ERROR")
        .map(|record| String::from_utf8_lossy(&record.value).into_owned())
        .unwrap_or_else(|| "generic error".to_string());
    Error::new(ErrorKind::Protocol)
        .with_message(message)
        .with_code(code)
}

fn find_record<'a>(records: &'a [Record], key: &[u8]) -> Option<&'a Record> {
    records.iter().find(|record| record.key == key)
}

fn parse_numeric_record(records: &[Record], key: &[u8]) -> Result<u64, Error> {
    let record = find_record(records, key).ok_or_else(|| {
        Error::new(ErrorKind::Protocol).with_message(format!(
            "response missing {} record",
            String::from_utf8_lossy(key)
        ))
    })?;
    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| {
            Error::new(ErrorKind::Protocol).with_message(format!(
                "response carries non-numeric {} record",
                String::from_utf8_lossy(key)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::{parse_numeric_record, rpc_error};
    use crate::core::codec::Record;
    use crate::core::error::ErrorKind;

    #[test]
    fn rpc_error_prefers_the_error_record() {
        let records = vec![
            Record::new("noise", "x"),
            Record::new("ERROR", "invalid operation"),
        ];
        let err = rpc_error(&records, 450);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.message(), Some("invalid operation"));
        assert_eq!(err.code(), Some(450));
    }

    #[test]
    fn rpc_error_falls_back_to_a_generic_message() {
        let err = rpc_error(&[], 500);
        assert_eq!(err.message(), Some("generic error"));
        assert_eq!(err.code(), Some(500));
    }

    #[test]
    fn numeric_records_parse_or_fail_loudly() {
        let records = vec![Record::new("num", "42")];
        assert_eq!(parse_numeric_record(&records, b"num").expect("num"), 42);

        let err = parse_numeric_record(&records, b"count").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let records = vec![Record::new("num", "not a number")];
        let err = parse_numeric_record(&records, b"num").expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
