use size::{Base, SizeFormatter, Style};

/// Formats a byte count the way the dashboard shows it ("1.25MiB" -> "1.25 MB" style,
/// abbreviated, base 10).
pub fn format_bytes(bytes: i64) -> String {
    let formatter = SizeFormatter::new()
        .with_base(Base::Base10)
        .with_style(Style::Abbreviated);
    return formatter.format(bytes);
}

/// Compact large-number formatting for table cells (12345 -> "12.35K").
pub fn format_number(n: i64) -> String {
    const SUFFIXES: [(&str, f64); 4] = [("T", 1e12), ("B", 1e9), ("M", 1e6), ("K", 1e3)];

    if n == 0 {
        return "0".to_string();
    }

    let abs = n.abs() as f64;
    for (suffix, scale) in SUFFIXES {
        if abs >= scale {
            let scaled = n as f64 / scale;
            // Drop trailing zeros ("2.00K" reads worse than "2K")
            if (scaled - scaled.trunc()).abs() < f64::EPSILON {
                return format!("{}{}", scaled.trunc() as i64, suffix);
            }
            return format!("{:.2}{}", scaled, suffix);
        }
    }
    return n.to_string();
}

/// HH:MM:SS from seconds, "N/A" when unknown.
pub fn format_time(seconds: Option<i64>) -> String {
    let Some(seconds) = seconds else {
        return "N/A".to_string();
    };

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    return format!("{:02}:{:02}:{:02}", hours, minutes, secs);
}

/// Microseconds rendered as milliseconds with two decimals (ProxySQL latency cells).
pub fn format_latency_us(latency_us: i64) -> String {
    return format!("{:.2}ms", latency_us as f64 / 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1K");
        assert_eq!(format_number(12345), "12.35K");
        assert_eq!(format_number(2_500_000), "2.50M");
        assert_eq!(format_number(3_000_000_000), "3B");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(None), "N/A");
        assert_eq!(format_time(Some(0)), "00:00:00");
        assert_eq!(format_time(Some(3661)), "01:01:01");
        assert_eq!(format_time(Some(86400)), "24:00:00");
    }

    #[test]
    fn test_format_latency_us() {
        assert_eq!(format_latency_us(1500), "1.50ms");
        assert_eq!(format_latency_us(0), "0.00ms");
    }
}
