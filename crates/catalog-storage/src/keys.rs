//! Key encoding and decoding for storage layer.
//!
//! TID keys are `{tid:8 bytes BE, sign bit flipped}{zoid}` so that a forward
//! RocksDB iteration yields rows ordered by `(tid, zoid)`, negative cursors
//! included. Child keys are `{parent_zoid}\0{id}`, ordered by child name.

use crate::error::StorageError;

const TID_LEN: usize = 8;

fn encode_tid(tid: i64) -> [u8; TID_LEN] {
    ((tid as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_tid(bytes: &[u8]) -> Result<i64, StorageError> {
    let raw: [u8; TID_LEN] = bytes
        .try_into()
        .map_err(|_| StorageError::Key(format!("TID must be {} bytes", TID_LEN)))?;
    Ok((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

/// Key in the commit-order index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidKey {
    pub tid: i64,
    pub zoid: String,
}

impl TidKey {
    pub fn new(tid: i64, zoid: impl Into<String>) -> Self {
        Self {
            tid,
            zoid: zoid.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = encode_tid(self.tid).to_vec();
        bytes.extend_from_slice(self.zoid.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < TID_LEN {
            return Err(StorageError::Key(format!(
                "TID key too short: {} bytes",
                bytes.len()
            )));
        }
        let tid = decode_tid(&bytes[..TID_LEN])?;
        let zoid = std::str::from_utf8(&bytes[TID_LEN..])
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?
            .to_string();
        Ok(Self { tid, zoid })
    }

    /// First key with `tid >= min_tid`
    pub fn seek_tid(min_tid: i64) -> Vec<u8> {
        encode_tid(min_tid).to_vec()
    }
}

/// Key in the parent -> children index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildKey {
    pub parent: String,
    pub id: String,
}

impl ChildKey {
    pub fn new(parent: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            id: id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}\0{}", self.parent, self.id).into_bytes()
    }

    /// Prefix shared by every child of `parent`
    pub fn prefix(parent: &str) -> Vec<u8> {
        format!("{}\0", parent).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (parent, id) = s
            .split_once('\0')
            .ok_or_else(|| StorageError::Key(format!("Invalid child key format: {:?}", s)))?;
        Ok(Self::new(parent, id))
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{job_name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    /// Job name (e.g., "vacuum:catalog-db-c")
    pub job_name: String,
}

impl CheckpointKey {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.job_name).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tid_key_roundtrip() {
        let key = TidKey::new(42, "abc123");
        let decoded = TidKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_tid_key_order_is_tid_then_zoid() {
        let a = TidKey::new(5, "zzz").to_bytes();
        let b = TidKey::new(6, "aaa").to_bytes();
        let c = TidKey::new(6, "bbb").to_bytes();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_negative_cursor_sorts_first() {
        assert!(TidKey::seek_tid(-2) < TidKey::new(0, "a").to_bytes());
        assert_eq!(TidKey::from_bytes(&TidKey::new(-2, "").to_bytes()).unwrap().tid, -2);
    }

    #[test]
    fn test_child_key_roundtrip() {
        let key = ChildKey::new("parent", "doc-1");
        let bytes = key.to_bytes();
        assert!(bytes.starts_with(&ChildKey::prefix("parent")));
        assert_eq!(ChildKey::from_bytes(&bytes).unwrap(), key);
    }

    #[test]
    fn test_child_prefix_does_not_match_longer_parent() {
        let key = ChildKey::new("parent2", "x").to_bytes();
        assert!(!key.starts_with(&ChildKey::prefix("parent")));
    }
}
