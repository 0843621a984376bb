//! Object identity for the rgit reference database.
//!
//! Provides the `ObjectId` type (a 20-byte content hash) and the hex
//! encoding/decoding used by the on-disk reference formats.

mod error;
pub mod hex;
mod oid;

pub use error::HashError;
pub use oid::ObjectId;
