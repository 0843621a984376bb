use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::HashError;

/// Number of bytes in an object id.
pub const OID_RAW_LEN: usize = 20;

/// Number of characters in the hex form of an object id.
pub const OID_HEX_LEN: usize = 40;

/// An object identifier — the 20-byte hash of an object's content.
///
/// The all-zero id is the "null" sentinel meaning "no object": it is what a
/// reflog records as the old value of a freshly created reference, and what
/// the resolver reports for a reference that is about to be created.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OID_RAW_LEN]);

impl ObjectId {
    /// The null (all-zero) object id.
    pub const NULL: Self = Self([0u8; OID_RAW_LEN]);

    /// Create an ObjectId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != OID_RAW_LEN {
            return Err(HashError::InvalidHashLength {
                expected: OID_RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; OID_RAW_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse an ObjectId from its 40-character hex form.
    pub fn from_hex(hex: impl AsRef<[u8]>) -> Result<Self, HashError> {
        let hex = hex.as_ref();
        if hex.len() != OID_HEX_LEN {
            return Err(HashError::InvalidHexLength {
                expected: OID_HEX_LEN,
                actual: hex.len(),
            });
        }
        let mut bytes = [0u8; OID_RAW_LEN];
        hex_decode(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if this is the null (all-zero) id.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex_to_string(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
