use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Deterministic identifier of a logical transfer.
///
/// Derived from the canonical source path; every slice of one file carries
/// the same identity, which is what routes them to the same writer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A contiguous byte range of a source file.
///
/// This is also the wire shape for any transport layered on top: exactly
/// these five fields, with `content` base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    /// Identity of the file this slice belongs to.
    pub identity: Identity,
    /// Total size of the source file. Identical for every slice of one identity.
    pub total: u64,
    /// Size of this slice in bytes.
    pub size: u64,
    /// Byte offset of this slice within the file.
    pub offset: u64,
    /// Raw slice bytes (`content.len() == size`).
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Slice {
    /// Exclusive end offset of this slice.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Outcome of a single accepted [`SliceWriter::write`](crate::SliceWriter::write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// New bytes were covered; the file is not complete yet.
    Partial,
    /// The slice covered nothing new (retransmission).
    Duplicate,
    /// The slice completed the file and the writer finalized.
    Completed,
}

/// Observable lifecycle state of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterPhase {
    Uninitialized,
    Active,
    Failed,
    Finalized,
}

/// Snapshot of a writer's progress, suitable for reporting to a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterProgress {
    pub identity: Identity,
    pub path: PathBuf,
    pub phase: WriterPhase,
    /// Distinct bytes written so far.
    pub current_size: u64,
    /// Total file size, 0 until the first slice arrives.
    pub total: u64,
    /// `current_size / total * 100`.
    pub percent: f64,
    /// Sum of all accepted slice sizes, duplicates included.
    pub received_bytes: u64,
}

impl WriterProgress {
    /// Bytes still missing from the destination.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.current_size)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
