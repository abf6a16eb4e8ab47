//! Line-protocol store client: encoding, pooled TCP connections and batch writes.

pub mod encoder;
pub mod pool;
pub mod writer;

pub use encoder::{encode_batch, encode_line, sanitize_tag, MEASUREMENT};
pub use pool::{ConnectionPool, PooledConnection};
pub use writer::{BatchWriter, WriteError};
