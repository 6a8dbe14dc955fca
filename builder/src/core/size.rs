//! Human-readable byte sizes for artifact listings.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format `bytes` with base-1024 units and at most two decimals (`1.5 KB`).
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut rounded = round2(value);
    // 1023.999 KB rounds up to 1024 KB; show it as 1 MB instead.
    if rounded >= 1024.0 && unit < UNITS.len() - 1 {
        unit += 1;
        rounded = round2(value / 1024.0);
    }
    format!("{} {}", rounded, UNITS[unit])
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_small_sizes_in_bytes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
    }

    #[test]
    fn formats_larger_units_with_two_decimals() {
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2_359_296), "2.25 MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn rounding_up_to_a_full_unit_moves_to_the_next_unit() {
        assert_eq!(format_size(1_048_575), "1 MB");
        assert_eq!(format_size(1_073_741_823), "1 GB");
        assert_eq!(format_size(1_048_000), "1023.44 KB");
    }
}
