use http::header::CACHE_CONTROL;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Parsed `Cache-Control` directives.
///
/// Directive names are lowercased. A directive without a value maps to `""`.
/// When a directive repeats, the last occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControlHeader {
    directives: HashMap<Box<str>, Box<str>>,
}

impl CacheControlHeader {
    /// Parses any number of raw header lines. Malformed items are skipped.
    pub fn from_header_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut directives = HashMap::new();
        for line in lines {
            for part in split_unquoted(line.as_ref()) {
                if let Some((k, v)) = parse_directive(part) {
                    directives.insert(k, v);
                }
            }
        }
        Self { directives }
    }

    /// Parses every `Cache-Control` line of a header map. Non-UTF-8 lines are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_header_lines(
            headers
                .get_all(CACHE_CONTROL)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        )
    }

    /// Whether the directive is present, with or without a value
    pub fn has(&self, name: &str) -> bool {
        self.directives.contains_key(name.to_ascii_lowercase().as_str())
    }

    /// Value of the directive, or `default` when it is absent
    pub fn get<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.directives
            .get(name.to_ascii_lowercase().as_str())
            .map_or(default, |v| &**v)
    }

    /// All directives
    pub fn all(&self) -> &HashMap<Box<str>, Box<str>> {
        &self.directives
    }

    /// `no-store`: the response must not be cached at all
    pub fn is_no_store(&self) -> bool {
        self.has("no-store")
    }

    /// `no-cache`: the response may be stored but must be revalidated before reuse
    pub fn is_no_cache(&self) -> bool {
        self.has("no-cache")
    }

    /// Freshness lifetime in seconds: zero for `no-cache`, otherwise `s-maxage`,
    /// then `max-age`, then zero. Values that don't parse count as zero.
    pub fn max_age_seconds(&self) -> u64 {
        if self.is_no_cache() {
            return 0;
        }
        ["s-maxage", "max-age"]
            .iter()
            .find_map(|name| self.directives.get(*name))
            .map_or(0, |v| v.parse().unwrap_or(0))
    }

    /// Canonical header value, e.g. for sending or persisting the directives.
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.to_string()).ok()
    }
}

fn parse_directive(part: &str) -> Option<(Box<str>, Box<str>)> {
    let mut kv = part.splitn(2, '=');
    let k = kv.next()?.trim();
    if k.is_empty() || !k.bytes().all(is_token_byte) {
        return None;
    }
    let v = match kv.next().map(str::trim) {
        None => String::new(),
        Some(v) if v.starts_with('"') => unquote(v)?,
        Some(v) if v.bytes().all(is_token_byte) => v.to_owned(),
        Some(_) => return None,
    };
    Some((k.to_ascii_lowercase().into(), v.into()))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Strips the surrounding quotes and resolves backslash escapes.
/// `None` for an unterminated string or trailing garbage.
fn unquote(v: &str) -> Option<String> {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars().skip(1);
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return chars.next().is_none().then_some(out),
            c => out.push(c),
        }
    }
    None
}

/// Splits on commas outside of quoted strings.
fn split_unquoted(line: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, b) in line.bytes().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty())
}

impl fmt::Display for CacheControlHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // sorted, so equal directive sets always render identically
        let mut names: Vec<_> = self.directives.keys().collect();
        names.sort();
        for (i, k) in names.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(k)?;
            let v = &self.directives[k];
            if v.is_empty() {
                continue;
            }
            f.write_str("=")?;
            if v.bytes().all(|b| b.is_ascii_alphanumeric()) {
                f.write_str(v)?;
            } else {
                f.write_str("\"")?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

impl FromStr for CacheControlHeader {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_header_lines([s]))
    }
}

impl Serialize for CacheControlHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CacheControlHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let line = String::deserialize(deserializer)?;
        Ok(Self::from_header_lines([line]))
    }
}
