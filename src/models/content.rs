use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chunk size used when streaming content to clients.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest addressing a file in the content store.
/// Always 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: expected 64 hex characters")]
pub struct InvalidContentHash;

impl ContentHash {
    pub const LEN: usize = 64;

    pub fn parse(s: &str) -> Result<Self, InvalidContentHash> {
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidContentHash);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Computes the content address of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = InvalidContentHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidContentHash;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}

/// File content resolved from the content store.
#[derive(Debug, Clone)]
pub struct ContentHandle {
    hash: ContentHash,
    bytes: Bytes,
}

impl ContentHandle {
    pub fn new(hash: ContentHash, bytes: impl Into<Bytes>) -> Self {
        Self {
            hash,
            bytes: bytes.into(),
        }
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Streams the content in fixed-size chunks. Slicing `Bytes` is
    /// zero-copy, so no chunk duplicates the underlying buffer.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let bytes = self.bytes;
        let len = bytes.len();
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..len)
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| Ok(bytes.slice(start..(start + STREAM_CHUNK_SIZE).min(len))))
            .collect();
        stream::iter(chunks)
    }
}
