use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Time-ordered 128-bit identifier, wrapping a UUID v7.
///
/// Ordering is byte ordering, which for v7 matches creation order within a
/// process. The canonical text form (hyphenated lowercase) sorts the same way,
/// so storage can order by the text column directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub Uuid);

impl Id {
    /// Width of the canonical byte form.
    pub const BYTES: usize = 16;

    /// Create a new identifier using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The nil identifier. Never produced by [`Id::new`].
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Canonical byte form used on the wire.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parse the canonical byte form. Anything other than 16 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| IdError::InvalidLength(bytes.len()))?;
        Ok(Self(Uuid::from_bytes(arr)))
    }

    /// Milliseconds since the Unix epoch embedded in the identifier.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.0.get_timestamp().map(|ts| {
            let (secs, nanos) = ts.to_unix();
            secs * 1000 + u64::from(nanos) / 1_000_000
        })
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IdError::Malformed(e.to_string()))
    }
}

impl From<Uuid> for Id {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Errors produced while decoding an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("identifier must be 16 bytes, got {0}")]
    InvalidLength(usize),

    #[error("malformed identifier: {0}")]
    Malformed(String),
}

impl IdError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::InvalidArgument
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_creation_ordered() {
        let ids: Vec<Id> = (0..256).map(|_| Id::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn byte_form_round_trips() {
        let id = Id::new();
        let parsed = Id::from_bytes(id.as_bytes()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_short_byte_form() {
        let err = Id::from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, IdError::InvalidLength(3));
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("not-an-id".parse::<Id>().is_err());
        let id = Id::new();
        assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
    }

    #[test]
    fn timestamp_is_recent() {
        let id = Id::new();
        let now = chrono::Utc::now().timestamp_millis() as u64;
        let ts = id.timestamp_ms().unwrap();
        assert!(now.abs_diff(ts) < 5_000);
    }
}
