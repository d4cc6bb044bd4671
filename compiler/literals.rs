// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

//! Rendering of typed literal values into Galaxy source text.

use crate::diagnostics::{CompileError, Result};
use crate::typeregister;
use itertools::Itertools;

/// Quote a `string` value, escaping embedded backslashes and quotes.
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A `fixed` value always renders with a fractional point (`1` becomes `1.0`).
pub fn fixed(value: &str) -> Result<String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| CompileError::InvalidInvariant(format!("bad fixed literal '{value}'")))?;
    Ok(format!("{parsed:?}"))
}

/// `Color(r,g,b)` for three comma-separated byte channels, or
/// `ColorWithAlpha(r,g,b,a)` for four, where a leading alpha in the raw value
/// moves to the end. Channels are percentages: byte / 2.55, two decimals.
pub fn color(value: &str) -> Result<String> {
    let parts: Vec<&str> = value.split(',').collect();
    let channel = |s: &str| -> Result<String> {
        let v: f64 = s
            .trim()
            .parse()
            .map_err(|_| CompileError::InvalidInvariant(format!("bad color literal '{value}'")))?;
        Ok(format!("{:.2}", v / 2.55))
    };
    match parts.as_slice() {
        [r, g, b] => Ok(format!("Color({}, {}, {})", channel(r)?, channel(g)?, channel(b)?)),
        [a, r, g, b] => Ok(format!(
            "ColorWithAlpha({}, {}, {}, {})",
            channel(r)?,
            channel(g)?,
            channel(b)?,
            channel(a)?
        )),
        _ => Err(CompileError::InvalidInvariant(format!("bad color literal '{value}'"))),
    }
}

fn filter_mask(categories: &[&str], value: &str) -> Result<(String, String)> {
    let mut lower: Vec<&str> = vec![];
    let mut upper: Vec<&str> = vec![];
    for category in categories {
        if *category == "-" || category.is_empty() {
            continue;
        }
        let bit = typeregister::target_filter_bit(category).ok_or_else(|| {
            CompileError::InvalidInvariant(format!(
                "unknown target filter '{category}' in '{value}'"
            ))
        })?;
        if bit < 32 {
            lower.push(category);
        } else {
            upper.push(category);
        }
    }
    let lower = if lower.is_empty() {
        "0".to_string()
    } else {
        lower.iter().map(|x| format!("(1 << c_targetFilter{x})")).join(" | ")
    };
    let upper = if upper.is_empty() {
        "0".to_string()
    } else {
        upper.iter().map(|x| format!("(1 << (c_targetFilter{x} - 32))")).join(" | ")
    };
    Ok((lower, upper))
}

/// A `unitfilter` value is `included;excluded`, each side a comma-separated
/// category list. Each side splits into a low and a high 32-bit mask.
pub fn unit_filter(value: &str) -> Result<String> {
    let (include, exclude) = value.split_once(';').ok_or_else(|| {
        CompileError::InvalidInvariant(format!("bad unitfilter literal '{value}'"))
    })?;
    let include_parts: Vec<&str> = include.split(',').collect();
    let exclude_parts: Vec<&str> = exclude.split(',').collect();
    let (inc_lo, inc_hi) = filter_mask(&include_parts, value)?;
    let (exc_lo, exc_hi) = filter_mask(&exclude_parts, value)?;
    Ok(format!("UnitFilter({inc_lo}, {inc_hi}, {exc_lo}, {exc_hi})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_quoting() {
        assert_eq!(quote_string(""), "\"\"");
        assert_eq!(quote_string("AP_ZergCreepStomach"), "\"AP_ZergCreepStomach\"");
        assert_eq!(quote_string(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote_string(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn fixed_always_carries_a_point() {
        assert_eq!(fixed("1").unwrap(), "1.0");
        assert_eq!(fixed("2.5").unwrap(), "2.5");
        assert_eq!(fixed("0.30").unwrap(), "0.3");
        assert!(fixed("nope").is_err());
    }

    #[test]
    fn color_three_channels() {
        assert_eq!(color("255,0,128").unwrap(), "Color(100.00, 0.00, 50.20)");
    }

    #[test]
    fn color_four_channels_moves_alpha_last() {
        // raw order is alpha,r,g,b; generated order is r,g,b,alpha
        assert_eq!(
            color("255,255,0,128").unwrap(),
            "ColorWithAlpha(100.00, 0.00, 50.20, 100.00)"
        );
        assert!(color("1,2").is_err());
    }

    #[test]
    fn unit_filter_low_bits_only() {
        assert_eq!(
            unit_filter("Ground,Structure;-").unwrap(),
            "UnitFilter((1 << c_targetFilterGround) | (1 << c_targetFilterStructure), 0, 0, 0)"
        );
    }

    #[test]
    fn unit_filter_high_bits_only() {
        assert_eq!(
            unit_filter("-;Dead,Hidden").unwrap(),
            "UnitFilter(0, 0, 0, (1 << (c_targetFilterDead - 32)) | (1 << (c_targetFilterHidden - 32)))"
        );
    }

    #[test]
    fn unit_filter_straddles_bit_32() {
        assert_eq!(
            unit_filter("Visible,Stasis;-").unwrap(),
            "UnitFilter((1 << c_targetFilterVisible), (1 << (c_targetFilterStasis - 32)), 0, 0)"
        );
    }
}
