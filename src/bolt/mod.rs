//! Low-level Bolt protocol building blocks.
//!
//! Everything below the driver API lives here: the PackStream value
//! encoding, chunked message framing, the message catalogue and the
//! handshake. The [`crate::driver`] module composes these into
//! connections, pools and sessions; most applications never touch this
//! layer directly.

pub mod chunk;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use chunk::ChunkCodec;
pub use error::{BoltError, BoltResult};
pub use handshake::{BoltVersion, MAGIC, PROPOSED_VERSIONS};
pub use message::{Begin, Demand, Failure, Hello, Request, Response, Route, Run, Success};
pub use packstream::{PackError, PackValue, Structure};
