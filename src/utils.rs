//! Small formatting and text helpers shared by the stages.

/// Formats a byte count with a binary unit suffix (e.g. `1.50 KB`).
pub fn format_bytes(size_bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let suffix = UNITS.get(unit).copied().unwrap_or("GB");
    if unit == 0 {
        format!("{size_bytes} {suffix}")
    } else {
        format!("{size:.2} {suffix}")
    }
}

/// Lowercases, trims and collapses internal whitespace runs to one space.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Percentage of `part` in `whole`, 0 when `whole` is zero.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Rounds to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  No   internet\tService "), "no internet service");
        assert_eq!(normalize_text("yes"), "yes");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_percent_and_rounding() {
        assert_eq!(percent(1, 0), 0.0);
        assert_eq!(round_to(percent(1, 3), 2), 33.33);
    }
}
