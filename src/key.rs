use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use serde_json::ser::Formatter;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, Write as _};

use crate::error::{Error, Result};

// Length of the base64 digest part, matches keys written by earlier clients
const DIGEST_PREFIX_LEN: usize = 27;

/// Fingerprint of everything that makes two requests share one cache entry.
///
/// The textual form is `<hex length of canonical encoding>-<27 chars of base64 SHA-1>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Box<str>);

impl CacheKey {
    /// Derives a key from cache-relevant request components.
    ///
    /// `components` must serialize to a JSON object-like value. Object keys are sorted
    /// at every level before hashing, so the key does not depend on insertion order.
    pub fn compute<C: Serialize + ?Sized>(components: &C) -> Result<Self> {
        let value = serde_json::to_value(components).map_err(Error::Serialization)?;
        let canonical = canonical_json(&value)?;
        let digest = Sha1::digest(&canonical);
        let encoded = STANDARD.encode(digest);
        Ok(Self(
            format!("{:x}-{}", canonical.len(), &encoded[..DIGEST_PREFIX_LEN]).into(),
        ))
    }

    /// Wraps a key previously obtained from [`CacheKey::as_str`], e.g. when read back from an external store.
    pub fn from_raw(raw: impl Into<Box<str>>) -> Self {
        Self(raw.into())
    }

    /// The key's textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compact JSON with sorted object keys, `/` escaped and non-ASCII written as `\uXXXX`.
fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, EscapingFormatter);
    Sorted(value)
        .serialize(&mut serializer)
        .map_err(Error::Serialization)?;
    Ok(out)
}

/// Serializes objects with their keys in order, whatever map backs `Value`.
struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(Sorted)),
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                serializer.collect_map(entries.into_iter().map(|(k, v)| (k, Sorted(v))))
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Compact output that additionally escapes `/` and everything outside ASCII.
struct EscapingFormatter;

impl Formatter for EscapingFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() && c != '/' {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            if c == '/' {
                writer.write_all(b"\\/")?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
