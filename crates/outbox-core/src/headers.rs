//! Ordered message headers and their binary storage encoding.
//!
//! Layout (all integers big-endian `u32`):
//!
//! ```text
//! count | key_len | key | value_len | value | key_len | ...
//! ```
//!
//! Empty headers encode to zero bytes, which the storage layer writes as NULL.

use crate::{HeadersError, HeadersResult};

const LEN_PREFIX: usize = 4;

/// Ordered mapping of string keys to byte values.
///
/// Insertion order is preserved and duplicate keys are allowed, matching
/// what brokers accept for record headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    /// Create empty headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Builder-style append.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, value);
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode into the binary storage format.
    pub fn to_bytes(&self) -> HeadersResult<Vec<u8>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let size = LEN_PREFIX
            + self
                .entries
                .iter()
                .map(|(k, v)| 2 * LEN_PREFIX + k.len() + v.len())
                .sum::<usize>();
        let mut out = Vec::with_capacity(size);

        write_len(&mut out, self.entries.len())?;
        for (key, value) in &self.entries {
            write_len(&mut out, key.len())?;
            out.extend_from_slice(key.as_bytes());
            write_len(&mut out, value.len())?;
            out.extend_from_slice(value);
        }

        Ok(out)
    }

    /// Decode from the binary storage format.
    pub fn from_bytes(raw: &[u8]) -> HeadersResult<Self> {
        if raw.is_empty() {
            return Ok(Self::new());
        }

        let mut cursor = Cursor { raw, offset: 0 };
        let count = cursor.read_len()?;
        let mut entries = Vec::with_capacity(count.min(raw.len() / (2 * LEN_PREFIX)));

        for _ in 0..count {
            let key_len = cursor.read_len()?;
            let key_offset = cursor.offset;
            let key = std::str::from_utf8(cursor.take(key_len)?)
                .map_err(|_| HeadersError::InvalidKey(key_offset))?
                .to_string();
            let value_len = cursor.read_len()?;
            let value = cursor.take(value_len)?.to_vec();
            entries.push((key, value));
        }

        if cursor.offset != raw.len() {
            return Err(HeadersError::TrailingBytes(raw.len() - cursor.offset));
        }

        Ok(Self { entries })
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> HeadersResult<()> {
    let len = u32::try_from(len).map_err(|_| HeadersError::FieldTooLarge(len))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Cursor<'a> {
    raw: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> HeadersResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.raw.len())
            .ok_or(HeadersError::Truncated {
                offset: self.offset,
                needed: n,
            })?;
        let slice = &self.raw[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_len(&mut self) -> HeadersResult<usize> {
        let bytes = self.take(LEN_PREFIX)?;
        let mut buf = [0u8; LEN_PREFIX];
        buf.copy_from_slice(bytes);
        Ok(u32::from_be_bytes(buf) as usize)
    }
}
