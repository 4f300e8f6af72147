//! Capture timestamp formatting.
//!
//! Capture times are stored as absolute UTC instants and only converted to a
//! wall-clock representation at the edges: when burned into an image, shown in
//! a listing, or parsed from user input.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::{ImageError, Result};

/// Display format burned into stamped images (`2024/01/15 21:30:45`).
pub const DISPLAY_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Default display offset: UTC+09:00 (JST has no daylight saving).
pub const DEFAULT_DISPLAY_OFFSET_SECS: i32 = 9 * 3600;

/// Default display offset as a [`FixedOffset`].
pub fn default_display_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_DISPLAY_OFFSET_SECS).unwrap_or(Utc.fix())
}

/// Parse an offset written as `+09:00`, `-05:30`, `+0900` or `Z`.
pub fn parse_offset(text: &str) -> Option<FixedOffset> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Render an instant as the stamp/display text in the given offset.
pub fn format_display_time(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).format(DISPLAY_FORMAT).to_string()
}

/// Render an instant for a `YYYY-MM-DDTHH:MM` input field in the given offset.
pub fn format_input_time(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant
        .with_timezone(&offset)
        .format("%Y-%m-%dT%H:%M")
        .to_string()
}

/// Parse user input into a UTC instant.
///
/// Accepts RFC 3339 (`2024-01-15T12:30:45Z`), or a local wall-clock time in
/// `offset` written as `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD HH:MM[:SS]` or the
/// display format itself.
pub fn parse_local_datetime(text: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    const LOCAL_FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        DISPLAY_FORMAT,
    ];

    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| ImageError::InvalidInput(format!("Ambiguous local time: {text}")));
        }
    }

    Err(ImageError::InvalidInput(format!("Invalid date/time: {text}")))
}
