use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};

/// An absolute point in time, in whole Unix seconds, after which something is no longer fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Expiration {
    timestamp: i64,
}

/// How far in the future an [`Expiration`] lies: seconds from now, or a relative-time expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpiresIn {
    /// Offset in seconds from now
    Seconds(i64),
    /// Relative-time expression such as `"+1 hour"`, or an absolute RFC 3339/RFC 2822 date
    Expression(String),
}

impl From<i64> for ExpiresIn {
    fn from(secs: i64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<Duration> for ExpiresIn {
    fn from(d: Duration) -> Self {
        Self::Seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

impl From<&str> for ExpiresIn {
    fn from(expr: &str) -> Self {
        Self::Expression(expr.to_owned())
    }
}

impl From<String> for ExpiresIn {
    fn from(expr: String) -> Self {
        Self::Expression(expr)
    }
}

impl fmt::Display for ExpiresIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(s) => write!(f, "{s}"),
            Self::Expression(e) => f.write_str(e),
        }
    }
}

impl Expiration {
    /// Expiration at an exact Unix timestamp
    pub const fn at(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// Expiration relative to the current time.
    ///
    /// A value that lands exactly on "now" is moved one second into the past, so a
    /// zero-length expiration is never fresh.
    pub fn create(value: impl Into<ExpiresIn>) -> Result<Self> {
        Self::create_at(value, SystemTime::now())
    }

    /// Same as [`Expiration::create`], evaluated against the given `now`.
    pub fn create_at(value: impl Into<ExpiresIn>, now: SystemTime) -> Result<Self> {
        let now = unix_seconds(now);
        let timestamp = match value.into() {
            ExpiresIn::Seconds(secs) => now.saturating_add(secs),
            ExpiresIn::Expression(expr) => {
                parse_time_expression(&expr, now).ok_or(Error::InvalidExpiration(expr))?
            }
        };
        Ok(Self::at(if timestamp == now { timestamp - 1 } else { timestamp }))
    }

    /// Unix timestamp in seconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// `true` until the current time passes the timestamp
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }

    /// Complement of [`Expiration::is_fresh`]
    pub fn is_expired(&self) -> bool {
        !self.is_fresh()
    }

    /// Fresh while `now` is at or before the timestamp.
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        unix_seconds(now) <= self.timestamp
    }

    /// Complement of [`Expiration::is_fresh_at`]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        !self.is_fresh_at(now)
    }

    /// Time left until the expiration, zero once it passed.
    pub fn time_to_live(&self, now: SystemTime) -> Duration {
        let left = self.timestamp.saturating_sub(unix_seconds(now));
        Duration::from_secs(u64::try_from(left).unwrap_or(0))
    }
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

enum Unit {
    Seconds(i64),
    Months(i64),
}

fn unit(word: &str) -> Option<Unit> {
    let word = word.to_ascii_lowercase();
    let word = word.as_str();
    // accept plural forms of everything
    let singular = word.strip_suffix('s').filter(|w| !w.is_empty()).unwrap_or(word);
    Some(match singular {
        "sec" | "second" => Unit::Seconds(1),
        "min" | "minute" => Unit::Seconds(60),
        "hour" => Unit::Seconds(3600),
        "day" => Unit::Seconds(86_400),
        "week" => Unit::Seconds(7 * 86_400),
        "fortnight" => Unit::Seconds(14 * 86_400),
        "month" => Unit::Months(1),
        "year" => Unit::Months(12),
        _ => return None,
    })
}

/// Evaluates a relative-time expression against `now` (Unix seconds).
///
/// Accepts `now`, `today`, `tomorrow`, `yesterday` and any sequence of `[+|-]N unit`
/// terms, optionally followed by `ago`. Falls back to absolute RFC 3339 / RFC 2822 dates.
fn parse_time_expression(expr: &str, now: i64) -> Option<i64> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(date.unix_timestamp());
    }
    if let Ok(date) = OffsetDateTime::parse(trimmed, &Rfc2822) {
        return Some(date.unix_timestamp());
    }

    let mut tokens = split_terms(trimmed);
    let mut seconds = 0i64;
    let mut months = 0i64;
    let mut ago = false;
    let mut any = false;

    while let Some(token) = tokens.next() {
        if ago {
            // nothing may follow "ago"
            return None;
        }
        match token.to_ascii_lowercase().as_str() {
            "now" | "today" => {}
            "tomorrow" => seconds = seconds.checked_add(86_400)?,
            "yesterday" => seconds = seconds.checked_sub(86_400)?,
            "ago" if any => ago = true,
            _ => {
                let amount = parse_signed(&token)?;
                let unit = unit(&tokens.next()?)?;
                match unit {
                    Unit::Seconds(mul) => seconds = seconds.checked_add(amount.checked_mul(mul)?)?,
                    Unit::Months(mul) => months = months.checked_add(amount.checked_mul(mul)?)?,
                }
            }
        }
        any = true;
    }
    if !any {
        return None;
    }
    if ago {
        seconds = seconds.checked_neg()?;
        months = months.checked_neg()?;
    }

    let base = OffsetDateTime::from_unix_timestamp(now).ok()?;
    let shifted = add_months(base, months)?;
    shifted.unix_timestamp().checked_add(seconds)
}

/// Splits on whitespace and also between a number and a glued unit, e.g. `+10min`.
fn split_terms(expr: &str) -> impl Iterator<Item = String> + '_ {
    expr.split_whitespace().flat_map(|word| {
        let digits_end = word
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-'))))
            .map_or(word.len(), |(i, _)| i);
        let has_number = word[..digits_end].chars().any(|c| c.is_ascii_digit());
        if has_number && digits_end < word.len() {
            vec![word[..digits_end].to_owned(), word[digits_end..].to_owned()]
        } else {
            vec![word.to_owned()]
        }
    })
}

fn parse_signed(token: &str) -> Option<i64> {
    let (negative, digits) = match token.as_bytes().first()? {
        b'+' => (false, &token[1..]),
        b'-' => (true, &token[1..]),
        _ => (false, token),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = digits.parse().ok()?;
    Some(if negative { -n } else { n })
}

/// Calendar month arithmetic. A day that does not exist in the target month
/// overflows into the next one (Jan 31 + 1 month = Mar 3 or Mar 2).
fn add_months(date: OffsetDateTime, months: i64) -> Option<OffsetDateTime> {
    if months == 0 {
        return Some(date);
    }
    let total = (i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1).checked_add(months)?;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = time::Month::try_from(u8::try_from(total.rem_euclid(12) + 1).ok()?).ok()?;
    let first = Date::from_calendar_date(year, month, 1).ok()?;
    let day_offset = time::Duration::days(i64::from(date.day()) - 1);
    let target = first.checked_add(day_offset)?;
    Some(date.replace_date(target))
}
