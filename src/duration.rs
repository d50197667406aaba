//! Duration notation shared by the DSN builder and the migration runner.
//!
//! The driver option values (`timeout=30s`) and the `execution_time` column of
//! `schema_version` both use Go's duration notation, so existing deployments
//! and previously recorded rows keep reading the same.

use std::fmt::Write as _;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Format a duration the way Go's `time.Duration.String` does
/// (`0s`, `850ns`, `1.5ms`, `2m3.25s`, `1h0m0s`).
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < NANOS_PER_SEC {
        let (unit, scale) = if nanos < NANOS_PER_MICRO {
            ("ns", 1)
        } else if nanos < NANOS_PER_MILLI {
            ("µs", NANOS_PER_MICRO)
        } else {
            ("ms", NANOS_PER_MILLI)
        };
        return format!("{}{}", fixed_point(nanos, scale), unit);
    }

    let total_secs = nanos / NANOS_PER_SEC;
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    let frac = nanos % NANOS_PER_SEC;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    out.push_str(&fixed_point(seconds * NANOS_PER_SEC + frac, NANOS_PER_SEC));
    out.push('s');
    out
}

/// Format a duration and strip zero trailing components: `4m0s` becomes `4m`
/// and `2h0m0s` becomes `2h`.
pub fn format_short_duration(d: Duration) -> String {
    let mut s = format_duration(d);
    if s.ends_with("m0s") {
        s.truncate(s.len() - 2);
    }
    if s.ends_with("h0m") {
        s.truncate(s.len() - 2);
    }
    s
}

/// Parse Go duration notation (`500ms`, `1m30s`, `0.5h`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?;
        if number_len == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration '{input}'"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => return Err(format!("unknown unit '{other}' in duration '{input}'")),
        };
        total_nanos += value * scale;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render `value / scale` with trailing fractional zeros removed.
fn fixed_point(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_matches_go_notation() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_nanos(850)), "850ns");
        assert_eq!(format_duration(Duration::from_nanos(1_500)), "1.5µs");
        assert_eq!(format_duration(Duration::from_nanos(1_234_567)), "1.234567ms");
        assert_eq!(format_duration(Duration::from_millis(200)), "200ms");
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_millis(123_250)), "2m3.25s");
        assert_eq!(format_duration(Duration::from_secs(50 * 60)), "50m0s");
        assert_eq!(format_duration(Duration::from_secs(23 * 3600)), "23h0m0s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h1m1s");
    }

    #[test]
    fn test_short_duration_strips_zero_components() {
        assert_eq!(format_short_duration(Duration::from_secs(4 * 60)), "4m");
        assert_eq!(format_short_duration(Duration::from_secs(2 * 3600)), "2h");
        assert_eq!(format_short_duration(Duration::from_secs(3600 + 60)), "1h1m");
        assert_eq!(format_short_duration(Duration::from_secs(3601)), "1h0m1s");
        assert_eq!(format_short_duration(Duration::from_millis(35)), "35ms");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("0.5m").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }

    #[test]
    fn test_format_then_parse_is_stable() {
        let d = Duration::from_millis(90_500);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }
}
