//! SPICE numeric literals: engineering suffixes in, round-trippable text out.

use regex::Regex;
use std::sync::OnceLock;

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)([A-Za-z]*)$")
            .unwrap_or_else(|e| panic!("number regex is invalid: {e}"))
    })
}

/// Parse a SPICE number such as `4.7k`, `10uF`, `1meg`, `2.2e-9` or `100`.
///
/// Trailing unit letters after a recognized scale factor are ignored (`10uF`,
/// `1kOhm`). Upper-case `M` means mega and lower-case `m` means milli.
pub fn parse_spice_number(text: &str) -> Option<f64> {
    let cleaned = text.trim().replace(['\u{00b5}', '\u{03bc}'], "u");
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.parse::<f64>() {
        return value.is_finite().then_some(value);
    }

    let caps = number_regex().captures(&cleaned)?;
    let base: f64 = caps.get(1)?.as_str().parse().ok()?;
    let suffix = caps.get(2).map_or("", |m| m.as_str());
    Some(base * suffix_multiplier(suffix)?)
}

/// Scale factor for the leading part of `suffix`; any remaining letters are units.
fn suffix_multiplier(suffix: &str) -> Option<f64> {
    if suffix.is_empty() {
        return Some(1.0);
    }

    let lower = suffix.to_ascii_lowercase();
    if lower.starts_with("meg") {
        return Some(1e6);
    }
    if lower.starts_with("mil") {
        return Some(25.4e-6);
    }

    let first = suffix.chars().next()?;
    let multiplier = match first {
        'M' => 1e6,
        'm' => 1e-3,
        'P' => 1e15,
        'E' => 1e18,
        'Z' => 1e21,
        'Y' => 1e24,
        'y' => 1e-24,
        'z' => 1e-21,
        'a' | 'A' => 1e-18,
        'f' | 'F' => 1e-15,
        'p' => 1e-12,
        'n' | 'N' => 1e-9,
        'u' | 'U' => 1e-6,
        'k' | 'K' => 1e3,
        'g' | 'G' => 1e9,
        't' | 'T' => 1e12,
        // Bare unit names carry no scale: "5V", "10Ohm", "1s", "1Hz"
        'v' | 'V' | 'o' | 'O' | 's' | 'S' | 'h' | 'H' => {
            return bare_unit(&lower).then_some(1.0);
        }
        _ => return None,
    };
    Some(multiplier)
}

fn bare_unit(lower: &str) -> bool {
    matches!(lower, "v" | "ohm" | "ohms" | "s" | "sec" | "h" | "hz")
}

/// Format a value so that it parses back to exactly the same `f64`.
pub fn format_spice_number(value: f64) -> String {
    format!("{:e}", value)
}

/// Compact human-readable formatting for directives (`1e3`, `2.5e-6`).
pub fn format_directive_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value)
    } else {
        format!("{:e}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_engineering_suffixes() {
        assert_relative_eq!(parse_spice_number("4.7k").unwrap(), 4700.0);
        assert_relative_eq!(parse_spice_number("10u").unwrap(), 10e-6);
        assert_relative_eq!(parse_spice_number("10µ").unwrap(), 10e-6);
        assert_relative_eq!(parse_spice_number("1meg").unwrap(), 1e6);
        assert_relative_eq!(parse_spice_number("1MEG").unwrap(), 1e6);
        assert_relative_eq!(parse_spice_number("3m").unwrap(), 3e-3);
        assert_relative_eq!(parse_spice_number("3M").unwrap(), 3e6);
        assert_relative_eq!(parse_spice_number("2mil").unwrap(), 50.8e-6);
        assert_relative_eq!(parse_spice_number(".5n").unwrap(), 0.5e-9);
    }

    #[test]
    fn ignores_trailing_units() {
        assert_relative_eq!(parse_spice_number("10uF").unwrap(), 10e-6);
        assert_relative_eq!(parse_spice_number("1kOhm").unwrap(), 1e3);
        assert_relative_eq!(parse_spice_number("5V").unwrap(), 5.0);
        assert_relative_eq!(parse_spice_number("100nH").unwrap(), 100e-9);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_spice_number("abc"), None);
        assert_eq!(parse_spice_number(""), None);
        assert_eq!(parse_spice_number("1x"), None);
        assert_eq!(parse_spice_number("{R1}"), None);
    }

    #[test]
    fn formatted_numbers_round_trip_exactly() {
        for value in [1.0, 4700.0, 1.234_567_890_123e-9, 0.1 + 0.2, 99_999.999] {
            let text = format_spice_number(value);
            assert_eq!(parse_spice_number(&text), Some(value));
        }
    }
}
