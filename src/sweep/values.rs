// src/sweep/values.rs

//! Parsing of axis value lists and number formatting shared by the
//! backend adapters.
//!
//! Two list syntaxes are accepted:
//! - comma separated: `"7.5, 9, 12"`
//! - inclusive range with a step: `"5 > 9 2"` (→ 5, 7, 9)

/// Upper bound on the number of values a range may produce.
const MAX_RANGE_VALUES: usize = 10_000;

pub fn parse_float_list(text: &str) -> Result<Vec<f32>, String> {
    let text = text.trim();
    if text.contains('>') {
        let (min, max, step) = split_range(text)?;
        return float_range(min, max, step);
    }

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .map_err(|e| format!("invalid number '{s}': {e}"))
        })
        .collect()
}

pub fn parse_int_list(text: &str) -> Result<Vec<u32>, String> {
    let text = text.trim();
    if text.contains('>') {
        let (min, max, step) = split_range(text)?;
        if min < 0.0 || min.fract() != 0.0 || max.fract() != 0.0 || step.fract() != 0.0 {
            return Err(format!("integer range expected, got '{text}'"));
        }
        return float_range(min, max, step)
            .map(|values| values.into_iter().map(|v| v as u32).collect());
    }

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| format!("invalid integer '{s}': {e}"))
        })
        .collect()
}

/// Split `"min > max step"` into its three numbers.
fn split_range(text: &str) -> Result<(f32, f32, f32), String> {
    let (min_part, rest) = text
        .split_once('>')
        .ok_or_else(|| format!("invalid range '{text}'"))?;
    let mut rest = rest.split_whitespace();

    let parse = |s: Option<&str>, what: &str| -> Result<f32, String> {
        let s = s.ok_or_else(|| format!("range '{text}' is missing its {what}"))?;
        s.parse::<f32>()
            .map_err(|e| format!("invalid range {what} '{s}': {e}"))
    };

    let min = parse(Some(min_part.trim()), "minimum")?;
    let max = parse(rest.next(), "maximum")?;
    let step = parse(rest.next(), "step")?;

    if step <= 0.0 {
        return Err(format!("range step must be positive (got {step})"));
    }
    if max < min {
        return Err(format!("range maximum {max} is below minimum {min}"));
    }

    Ok((min, max, step))
}

fn float_range(min: f32, max: f32, step: f32) -> Result<Vec<f32>, String> {
    let mut values = Vec::new();
    let mut n = 0u32;
    loop {
        let v = min + step * n as f32;
        if v >= max + 0.01 {
            break;
        }
        values.push((v * 10_000.0).round() / 10_000.0);
        if values.len() > MAX_RANGE_VALUES {
            return Err(format!(
                "range {min} > {max} {step} produces more than {MAX_RANGE_VALUES} values"
            ));
        }
        n += 1;
    }
    Ok(values)
}

/// Format `value` with at most `max_decimals` decimals, trimming trailing
/// zeros but keeping at least `min_decimals`.
///
/// `format_number(7.0, 0, 4)` → `"7"`, `format_number(1.0, 1, 4)` →
/// `"1.0"`, `format_number(0.33333, 0, 3)` → `"0.333"`.
pub fn format_number(value: f32, min_decimals: usize, max_decimals: usize) -> String {
    let mut s = format!("{value:.max_decimals$}");
    if let Some(dot) = s.find('.') {
        let keep = dot + 1 + min_decimals;
        while s.len() > keep && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_lists_skip_blanks() {
        assert_eq!(parse_float_list("7.5, 9,, 12 ").unwrap(), vec![7.5, 9.0, 12.0]);
        assert_eq!(parse_int_list("20,30").unwrap(), vec![20, 30]);
        assert!(parse_int_list("").unwrap().is_empty());
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(parse_float_list("5 > 9 2").unwrap(), vec![5.0, 7.0, 9.0]);
        assert_eq!(parse_int_list("20 > 40 10").unwrap(), vec![20, 30, 40]);
        assert_eq!(
            parse_float_list("0.1 > 0.3 0.1").unwrap(),
            vec![0.1, 0.2, 0.3]
        );
    }

    #[test]
    fn bad_ranges_are_rejected() {
        assert!(parse_float_list("5 > 9 0").is_err());
        assert!(parse_float_list("9 > 5 1").is_err());
        assert!(parse_float_list("5 > 9").is_err());
        assert!(parse_int_list("1.5 > 3 1").is_err());
        assert!(parse_float_list("abc").is_err());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(7.0, 0, 4), "7");
        assert_eq!(format_number(7.5, 0, 4), "7.5");
        assert_eq!(format_number(1.0, 1, 4), "1.0");
        assert_eq!(format_number(0.33333, 0, 3), "0.333");
        assert_eq!(format_number(0.0, 0, 3), "0");
    }
}
