//! Serialization codec: values, statements, the snapshot stream, and file envelopes.

pub mod dump;
pub mod envelope;
pub mod statement;
pub mod value;

pub use envelope::EncryptionKey;
pub use statement::{Statement, StatementBuilder, quote_ident};
pub use value::Value;
