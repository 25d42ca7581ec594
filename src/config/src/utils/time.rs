// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use chrono::{DateTime, Duration, TimeZone, Utc};

#[inline(always)]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way FetchXML condition values are written.
pub fn format_fetch_datetime(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a back-end timestamp. The service emits ISO-8601 with or without a
/// zone suffix and with optional fractional seconds.
pub fn parse_fetch_datetime(s: &str) -> Result<DateTime<Utc>, anyhow::Error> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
    ] {
        if let Ok(t) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&t));
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
        }
    }
    Err(anyhow::anyhow!("invalid timestamp: {s}"))
}

/// Midpoint of a half-open interval, used by the adaptive split.
pub fn interval_midpoint(start: &DateTime<Utc>, end: &DateTime<Utc>) -> DateTime<Utc> {
    let span = end.signed_duration_since(*start);
    *start + Duration::seconds(span.num_seconds() / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fetch_datetime() {
        let t = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_fetch_datetime(&t), "2021-01-01T00:00:00Z");
    }

    #[test]
    fn test_parse_fetch_datetime() {
        let s = "2021-01-01T00:00:00Z";
        let t = parse_fetch_datetime(s).unwrap();
        assert_eq!(t.timestamp(), 1609459200);

        let s = "2021-01-01T00:00:00";
        let t = parse_fetch_datetime(s).unwrap();
        assert_eq!(t.timestamp(), 1609459200);

        let s = "2021-01-01 00:00:00.123";
        let t = parse_fetch_datetime(s).unwrap();
        assert_eq!(t.timestamp(), 1609459200);

        let s = "2021-01-01";
        let t = parse_fetch_datetime(s).unwrap();
        assert_eq!(t.timestamp(), 1609459200);

        assert!(parse_fetch_datetime("not a date").is_err());
    }

    #[test]
    fn test_interval_midpoint() {
        let a = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(
            interval_midpoint(&a, &b),
            Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap()
        );
    }
}
