//! Purpose: Client library for Kyoto Tycoon style key-value stores.
//! Exports: `api` (connection, operations, errors) and `core` (codec, transport, tls).
//! Role: Client-side protocol engine; the remote store itself is out of scope.
//! Invariants: `api` is the public boundary; `core` modules are plumbing.
//! Invariants: Every operation returns a typed result or exactly one `Error` shape.

pub mod api;
pub mod core;
