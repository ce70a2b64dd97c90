//! Utility functions for tierkv

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default upper bound on table name length
pub const MAX_TABLE_LEN: usize = 128;

/// Wildcard table name used for aggregate counters
pub const WILDCARD_TABLE: &str = "*";

/// Parse duration string (e.g., "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let idx = s.char_indices().last().map(|(i, _)| i).unwrap_or(0);
        s.split_at(idx)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let scale = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };
    let secs = num
        .checked_mul(scale)
        .ok_or_else(|| Error::InvalidConfig(format!("duration out of range: {}", s)))?;
    let duration = Duration::from_secs(secs);

    Ok(duration)
}

/// Validate a table name: non-empty, bounded, `[A-Za-z0-9._-]` only
pub fn validate_table(table: &str, max_len: usize) -> Result<()> {
    if table.is_empty() {
        return Err(Error::validation("table", "table name cannot be empty"));
    }

    if table.len() > max_len {
        return Err(Error::validation(
            "table",
            format!("table name too long (max {} bytes)", max_len),
        ));
    }

    if let Some(c) = table
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(Error::validation(
            "table",
            format!("table name contains invalid character {:?}", c),
        ));
    }

    Ok(())
}

/// Validate a key (must be non-empty)
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("key", "key cannot be empty"));
    }
    Ok(())
}

/// Is `last_use` older than `max_age` relative to `now`?
pub fn is_stale(last_use: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now.signed_duration_since(last_use) > max_age,
        Err(_) => false,
    }
}

/// Render a key for log output
pub fn display_key(key: &[u8]) -> String {
    if key.len() <= 32 {
        hex::encode(key)
    } else {
        format!("{}..({} bytes)", hex::encode(&key[..32]), key.len())
    }
}
