//! Duration formatting shared by zone buckets and metric dicts.
//!
//! Format: `"Xs"` below one minute, `"M:SS"` below one hour, `"H:MM:SS"`
//! otherwise. Negative inputs clamp to zero.

/// Format a second count for display
pub fn format_time(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours == 0 {
        format!("{}:{:02}", minutes, secs)
    } else {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    }
}

/// Parse a formatted duration ("45s", "M:SS", "H:MM:SS") back into seconds.
///
/// Returns 0 when the string does not parse.
pub fn parse_time_str(time_str: &str) -> i64 {
    let s = time_str.trim();
    if let Some(stripped) = s.strip_suffix('s') {
        return stripped.parse().unwrap_or(0);
    }
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [m, sec] => {
            let m: i64 = m.parse().unwrap_or(0);
            let sec: i64 = sec.parse().unwrap_or(0);
            m * 60 + sec
        }
        [h, m, sec] => {
            let h: i64 = h.parse().unwrap_or(0);
            let m: i64 = m.parse().unwrap_or(0);
            let sec: i64 = sec.parse().unwrap_or(0);
            h * 3600 + m * 60 + sec
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0s");
        assert_eq!(format_time(45), "45s");
        assert_eq!(format_time(60), "1:00");
        assert_eq!(format_time(125), "2:05");
        assert_eq!(format_time(3599), "59:59");
        assert_eq!(format_time(3600), "1:00:00");
        assert_eq!(format_time(3725), "1:02:05");
        assert_eq!(format_time(-5), "0s");
    }

    #[test]
    fn test_parse_time_str() {
        assert_eq!(parse_time_str("45s"), 45);
        assert_eq!(parse_time_str("2:05"), 125);
        assert_eq!(parse_time_str("1:02:05"), 3725);
        assert_eq!(parse_time_str("garbage"), 0);
    }

    #[test]
    fn test_roundtrip() {
        for s in [0, 45, 60, 125, 3600, 3725, 86400] {
            assert_eq!(parse_time_str(&format_time(s)), s);
        }
    }
}
