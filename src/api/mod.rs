//! Purpose: Define the stable public API boundary for the client.
//! Exports: Connection, record, encoding, error, and credential types.
//! Role: The only path callers should take into the crate internals.
//! Invariants: Additive-only surface; internal modules stay private plumbing.

mod conn;

pub use crate::core::codec::{Encoding, Record};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::tls::{ClientIdentity, CredentialSource, PemDirCredentials};
pub use crate::core::transport::DEFAULT_TIMEOUT;
pub use conn::{Conn, ConnBuilder};
