// Core modules implementing the wire codec, transport policy, and error modeling.
pub mod codec;
pub mod error;
pub mod tls;
pub mod transport;
