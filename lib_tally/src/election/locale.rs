//! Parsing helpers for the feed's pt-BR formatted string fields.
//!
//! Every number in the feed arrives as a string. Percentages use a decimal
//! comma (`"48,43"`), counts are plain digit runs (`"57259504"`). An empty
//! string means the figure has not been published yet and reads as zero.

use crate::error::{Result, TallyError};

/// Parses a decimal-comma percentage such as `"95,59"`.
pub fn parse_percentage(field: &'static str, value: &str) -> Result<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    trimmed
        .replacen(',', ".", 1)
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| TallyError::MalformedSource {
            field,
            value: value.to_string(),
        })
}

/// Parses a non-negative integer count such as `"124252796"`.
pub fn parse_count(field: &'static str, value: &str) -> Result<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    trimmed.parse::<u64>().map_err(|_| TallyError::MalformedSource {
        field,
        value: value.to_string(),
    })
}

/// Capitalizes each space-separated word: `"LUIZ INÁCIO"` becomes `"Luiz Inácio"`.
pub fn capitalize(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_comma() {
        assert_eq!(parse_percentage("pvv", "95,59").unwrap(), 95.59);
        assert_eq!(parse_percentage("psa", "100,00").unwrap(), 100.0);
        assert_eq!(parse_percentage("pvv", "").unwrap(), 0.0);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_percentage("pvv", "abc").unwrap_err();
        assert!(matches!(err, TallyError::MalformedSource { field: "pvv", .. }));
        assert!(parse_count("e", "12,5").is_err());
        assert!(parse_count("e", "-3").is_err());
    }

    #[test]
    fn parses_counts() {
        assert_eq!(parse_count("e", " 156454011 ").unwrap(), 156_454_011);
        assert_eq!(parse_count("e", "").unwrap(), 0);
    }

    #[test]
    fn capitalizes_words() {
        assert_eq!(capitalize("LUIZ INÁCIO LULA DA SILVA"), "Luiz Inácio Lula Da Silva");
        assert_eq!(capitalize("jair  bolsonaro"), "Jair  Bolsonaro");
    }
}
