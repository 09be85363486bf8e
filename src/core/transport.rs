//! Purpose: Issue HTTP round trips with a uniform deadline and one eager retry.
//! Exports: `Transport`, `Deadline`, `DEFAULT_TIMEOUT`.
//! Role: Owns the pooled agent; operations never touch ureq directly.
//! Invariants: At most one retry per round trip, bounding latency to ~2x timeout.
//! Invariants: The retry counter is observational only and never gates correctness.
//! Invariants: HTTP status errors are successful round trips, not transport failures.

use crate::core::error::{Error, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-call deadline. Returned alongside the response so the caller can tell,
/// after reading the body, whether the deadline fired mid-read; a fired
/// deadline turns the whole operation into a timeout even though bytes were
/// nominally received.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Pooled transport to one endpoint, shared by all callers of a connection.
///
/// The agent sits behind an `RwLock` solely so a retry can swap in a fresh
/// agent, which discards every idle pooled connection in one move. Reads take
/// the lock only long enough to clone the handle (agents are cheap clones
/// sharing one pool).
#[derive(Debug)]
pub struct Transport {
    retry_count: AtomicU64,
    timeout: Duration,
    pool_size: usize,
    tls: Option<Arc<ureq::rustls::ClientConfig>>,
    agent: RwLock<ureq::Agent>,
}

impl Transport {
    pub fn new(
        timeout: Duration,
        pool_size: usize,
        tls: Option<Arc<ureq::rustls::ClientConfig>>,
    ) -> Self {
        let agent = build_agent(timeout, pool_size, tls.clone());
        Self {
            retry_count: AtomicU64::new(0),
            timeout,
            pool_size,
            tls,
            agent: RwLock::new(agent),
        }
    }

    /// Number of retries performed because the remote end closed an idle
    /// pooled connection. Increases monotonically until it wraps.
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Perform one HTTP round trip, retrying exactly once on a transport
    /// failure. Distinguishing error classes is not worth it here: the
    /// overwhelmingly common failure is the server closing a pooled idle
    /// connection, so the pool is flushed and the request retried eagerly.
    /// A retried non-idempotent write may therefore execute twice if the
    /// first response was lost after the server applied it; accepted policy.
    pub fn round_trip(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<(ureq::Response, Deadline), Error> {
        let deadline = Deadline::after(self.timeout);
        match flatten_status(self.attempt(method, url, headers, body)) {
            Ok(response) => Ok((response, deadline)),
            Err(first) => {
                tracing::debug!(error = %first, %url, "transport failure, flushing idle connections and retrying");
                self.flush_pool();
                self.retry_count.fetch_add(1, Ordering::Relaxed);
                let deadline = Deadline::after(self.timeout);
                match flatten_status(self.attempt(method, url, headers, body)) {
                    Ok(response) => Ok((response, deadline)),
                    Err(_) if deadline.expired() => Err(Error::timeout()),
                    Err(retry) => Err(Error::new(ErrorKind::Io)
                        .with_message("request failed")
                        .with_source(retry)),
                }
            }
        }
    }

    fn attempt(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<ureq::Response, ureq::Error> {
        let agent = self
            .agent
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone();
        let mut request = agent.request(method, url).timeout(self.timeout);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        match body {
            Some(bytes) => request.send_bytes(bytes),
            None => request.call(),
        }
    }

    fn flush_pool(&self) {
        let fresh = build_agent(self.timeout, self.pool_size, self.tls.clone());
        let mut agent = self
            .agent
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        *agent = fresh;
    }
}

// A 4xx/5xx status reaches us as an error variant, but for this protocol the
// status line carries operation semantics and must flow to the caller.
fn flatten_status(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, ureq::Error> {
    match result {
        Err(ureq::Error::Status(_, response)) => Ok(response),
        other => other,
    }
}

fn build_agent(
    timeout: Duration,
    pool_size: usize,
    tls: Option<Arc<ureq::rustls::ClientConfig>>,
) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new()
        .timeout(timeout)
        .max_idle_connections_per_host(pool_size);
    if let Some(config) = tls {
        builder = builder.tls_config(config);
    }
    builder.build()
}
