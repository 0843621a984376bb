use bstr::{BStr, BString, ByteSlice, ByteVec};
use chrono::{Local, Offset};

use crate::error::UtilError;
use crate::Result;

/// A timestamp with timezone, as recorded in reflog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitDate {
    /// Seconds since Unix epoch.
    pub timestamp: i64,
    /// Timezone offset in minutes from UTC (e.g., -300 for EST).
    pub tz_offset: i32,
}

/// Convert the on-disk decimal timezone (`-0500`) to minutes (`-300`).
fn tz_offset_to_minutes(tz: i32) -> i32 {
    let sign = if tz < 0 { -1 } else { 1 };
    let abs = tz.unsigned_abs() as i32;
    sign * ((abs / 100) * 60 + abs % 100)
}

/// Convert minutes from UTC to the on-disk decimal representation.
fn minutes_to_tz_offset(minutes: i32) -> i32 {
    let sign = if minutes < 0 { -1 } else { 1 };
    let abs = minutes.unsigned_abs() as i32;
    sign * ((abs / 60) * 100 + abs % 60)
}

impl GitDate {
    /// Create a GitDate from a Unix timestamp and timezone offset in minutes.
    pub fn new(timestamp: i64, tz_offset_minutes: i32) -> Self {
        Self {
            timestamp,
            tz_offset: tz_offset_minutes,
        }
    }

    /// The current time in the local timezone.
    pub fn now() -> Self {
        let now = Local::now();
        let offset_secs = now.offset().fix().local_minus_utc();
        Self {
            timestamp: now.timestamp(),
            tz_offset: offset_secs / 60,
        }
    }

    /// Parse the raw on-disk format: `<timestamp> <+/-hhmm>`.
    pub fn parse_raw(input: &str) -> Result<Self> {
        let mut parts = input.split_whitespace();
        let ts = parts
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| UtilError::DateParse(format!("bad timestamp in '{input}'")))?;
        let tz = match parts.next() {
            Some(tz) => {
                if !tz.starts_with('+') && !tz.starts_with('-') {
                    return Err(UtilError::DateParse(format!("bad timezone in '{input}'")));
                }
                tz.parse::<i32>()
                    .map_err(|_| UtilError::DateParse(format!("bad timezone in '{input}'")))?
            }
            None => 0,
        };
        if parts.next().is_some() {
            return Err(UtilError::DateParse(format!(
                "trailing junk in date '{input}'"
            )));
        }
        Ok(Self {
            timestamp: ts,
            tz_offset: tz_offset_to_minutes(tz),
        })
    }

    /// Format in the raw on-disk form: `<timestamp> <+/-hhmm>`.
    pub fn format_raw(&self) -> String {
        format!(
            "{} {:+05}",
            self.timestamp,
            minutes_to_tz_offset(self.tz_offset)
        )
    }
}

/// A committer identity as stamped into reflog entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub date: GitDate,
}

impl Signature {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, date: GitDate) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            date,
        }
    }

    /// Parse the serialized form: `Name <email> timestamp tz`.
    pub fn parse(input: &BStr) -> Result<Self> {
        let input = input.as_bytes();

        // Find the last '>' to split off the date portion
        let gt_pos = input
            .iter()
            .rposition(|&b| b == b'>')
            .ok_or_else(|| UtilError::DateParse("missing '>' in signature".into()))?;

        let lt_pos = input[..gt_pos]
            .iter()
            .rposition(|&b| b == b'<')
            .ok_or_else(|| UtilError::DateParse("missing '<' in signature".into()))?;

        let name = input[..lt_pos].trim();
        let email = &input[lt_pos + 1..gt_pos];

        let date_str = input[gt_pos + 1..].trim();
        let date_str = std::str::from_utf8(date_str)
            .map_err(|_| UtilError::DateParse("non-UTF-8 date in signature".into()))?;
        let date = GitDate::parse_raw(date_str)?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            date,
        })
    }

    /// Format in the canonical form: `Name <email> timestamp tz`.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::new());
        out.push_str(&self.name);
        out.push_str(b" <");
        out.push_str(&self.email);
        out.push_str(b"> ");
        out.push_str(self.date.format_raw().as_bytes());
        out
    }
}
