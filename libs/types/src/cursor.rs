//! Opaque keyset pagination cursors
//!
//! A cursor is the base64 of a boundary row's `period_start` in RFC 3339.
//! Opacity keeps clients from depending on the encoding; the round-trip is
//! still exact to the second boundary the candles are keyed on.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Encode a boundary `period_start` into an opaque cursor.
pub fn encode_cursor(period_start: DateTime<Utc>) -> String {
    BASE64.encode(period_start.to_rfc3339())
}

/// Decode a client-supplied cursor back into a timestamp.
pub fn decode_cursor(cursor: &str) -> Result<DateTime<Utc>, CoreError> {
    let bytes = BASE64.decode(cursor).map_err(|_| CoreError::InvalidParams {
        detail: format!("malformed cursor: {cursor}"),
    })?;
    let text = String::from_utf8(bytes).map_err(|_| CoreError::InvalidParams {
        detail: format!("malformed cursor: {cursor}"),
    })?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CoreError::InvalidParams {
            detail: format!("malformed cursor: {cursor}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap();
        let cursor = encode_cursor(t);
        assert_eq!(decode_cursor(&cursor).unwrap(), t);
    }

    #[test]
    fn garbage_is_invalid_params() {
        let err = decode_cursor("not base64 at all!!").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidParams);

        // Valid base64 of a non-timestamp is rejected too.
        let bogus = BASE64.encode("tomorrow-ish");
        let err = decode_cursor(&bogus).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidParams);
    }
}
