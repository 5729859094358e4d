//! Named binary blobs an index decomposes into for persistence
//!
//! A [`BinarySet`] keeps its keys in insertion order. The stream form is a
//! 4-byte magic, a little-endian format version, then the bincode-encoded set.

use crate::{Error, ErrorType, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"VBBS";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySet {
    entries: Vec<(String, Vec<u8>)>,
}

impl BinarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the blob stored under `key`
    pub fn set(&mut self, key: impl Into<String>, data: Vec<u8>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((key, data)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Blob under `key`, or `MissingFile` when absent
    pub fn require(&self, key: &str) -> Result<&[u8]> {
        self.get(key).ok_or_else(|| {
            Error::new(
                ErrorType::MissingFile,
                format!("binary set has no entry '{}'", key),
            )
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total payload size in bytes
    pub fn total_size(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut *writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                "stream does not start with a binary set header",
            ));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                format!("unsupported binary set version {}", version),
            ));
        }
        let set = bincode::deserialize_from(&mut *reader)?;
        Ok(set)
    }
}

impl IntoIterator for BinarySet {
    type Item = (String, Vec<u8>);
    type IntoIter = std::vec::IntoIter<(String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Vec<u8>)> for BinarySet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        let mut set = BinarySet::new();
        for (k, v) in iter {
            set.set(k, v);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_keep_insertion_order() {
        let mut set = BinarySet::new();
        set.set("b", vec![1]);
        set.set("a", vec![2]);
        set.set("b", vec![3]);
        assert_eq!(set.keys(), vec!["b", "a"]);
        assert_eq!(set.get("b"), Some(&[3u8][..]));
        assert_eq!(set.total_size(), 2);
    }

    #[test]
    fn test_require_missing_key() {
        let set = BinarySet::new();
        assert_eq!(set.require("graph").unwrap_err().kind, ErrorType::MissingFile);
    }

    #[test]
    fn test_stream_roundtrip() {
        let mut set = BinarySet::new();
        set.set("parameters", b"{}".to_vec());
        set.set("ids", vec![0; 16]);

        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        let restored = BinarySet::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn test_stream_rejects_garbage() {
        let err = BinarySet::read_from(&mut &b"NOPE\x01\x00\x00\x00"[..]).unwrap_err();
        assert_eq!(err.kind, ErrorType::InvalidBinary);

        let err = BinarySet::read_from(&mut &b"VB"[..]).unwrap_err();
        assert_eq!(err.kind, ErrorType::ReadError);
    }
}
