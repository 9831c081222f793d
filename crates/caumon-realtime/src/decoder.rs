// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Line decoding for the ingestion stream
//!
//! Producers send one sample per line: `time,v1,...,vN`, optionally preceded
//! by a non-numeric tag (e.g. `car1:0.5,42,2100`). Everything before the first
//! character that can start a number is discarded.

use thiserror::Error;

use crate::trace::DataPoint;

/// Minimum fields per line: a timestamp and at least one signal
pub const MIN_FIELDS: usize = 2;

/// Why a line was not turned into a [`DataPoint`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("no numeric content")]
    NoNumericContent,

    #[error("expected at least 2 fields, found {found}")]
    TooFewFields { found: usize },

    #[error("non-numeric field '{token}'")]
    NonNumeric { token: String },
}

impl DecodeError {
    /// Blank lines are skipped without a warning
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

fn starts_number(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.')
}

/// Decode one raw line (line terminator optional)
pub fn decode_line(raw: &str) -> Result<DataPoint, DecodeError> {
    let line = raw.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let start = line
        .char_indices()
        .find(|&(_, c)| starts_number(c))
        .map(|(idx, _)| idx)
        .ok_or(DecodeError::NoNumericContent)?;

    let tokens: Vec<&str> = line[start..]
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.len() < MIN_FIELDS {
        return Err(DecodeError::TooFewFields {
            found: tokens.len(),
        });
    }

    let values = tokens
        .iter()
        .map(|token| {
            // `f64::from_str` also takes `nan`/`inf`, which are not decimal numbers
            token
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| DecodeError::NonNumeric {
                    token: (*token).to_string(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    Ok(DataPoint::new(values))
}

/// Split a comma-separated signal list into names
///
/// A leading `time` or `t` entry (any case) names the timestamp column, which
/// is implicit, so it is dropped once. Blank entries are ignored.
pub fn parse_signal_names(signals: &str) -> Vec<String> {
    let mut names: Vec<String> = signals
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    let leading_time = names
        .first()
        .map(|first| first.eq_ignore_ascii_case("time") || first.eq_ignore_ascii_case("t"))
        .unwrap_or(false);
    if leading_time {
        names.remove(0);
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line() {
        let point = decode_line("0,40,2000,2\n").unwrap();
        assert_eq!(point.as_slice(), &[0.0, 40.0, 2000.0, 2.0]);
        assert_eq!(point.time(), Some(0.0));
        assert_eq!(point.signals(), &[40.0, 2000.0, 2.0]);
    }

    #[test]
    fn test_prefix_is_stripped() {
        let point = decode_line("car1: 0.5, 42, 2100\r\n").unwrap();
        assert_eq!(point.as_slice(), &[0.5, 42.0, 2100.0]);
    }

    #[test]
    fn test_prefix_digit_starts_number() {
        // the '1' in "car1" is the first numeric character
        let point = decode_line("car1,2").unwrap();
        assert_eq!(point.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_signs_and_exponents() {
        let point = decode_line("-1.5,+2,.25,3e2").unwrap();
        assert_eq!(point.as_slice(), &[-1.5, 2.0, 0.25, 300.0]);
    }

    #[test]
    fn test_empty_tokens_dropped() {
        let point = decode_line("1,,2,").unwrap();
        assert_eq!(point.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(decode_line(""), Err(DecodeError::Empty));
        assert_eq!(decode_line("   \r\n"), Err(DecodeError::Empty));
        assert!(DecodeError::Empty.is_silent());
    }

    #[test]
    fn test_no_numeric_content() {
        assert_eq!(decode_line("hello world"), Err(DecodeError::NoNumericContent));
        assert!(!DecodeError::NoNumericContent.is_silent());
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(decode_line("42"), Err(DecodeError::TooFewFields { found: 1 }));
        assert_eq!(decode_line("42,,"), Err(DecodeError::TooFewFields { found: 1 }));
    }

    #[test]
    fn test_non_numeric_field() {
        assert_eq!(
            decode_line("0,40,fast"),
            Err(DecodeError::NonNumeric {
                token: "fast".to_string()
            })
        );
    }

    #[test]
    fn test_non_finite_fields_rejected() {
        for (line, token) in [
            ("0,nan", "nan"),
            ("0,inf", "inf"),
            ("1,-Infinity", "-Infinity"),
            ("0,NaN,2", "NaN"),
            ("0,1e999", "1e999"),
        ] {
            assert_eq!(
                decode_line(line),
                Err(DecodeError::NonNumeric {
                    token: token.to_string()
                }),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_signal_names_strip_leading_time() {
        assert_eq!(parse_signal_names("time,speed,RPM"), vec!["speed", "RPM"]);
        assert_eq!(parse_signal_names(" T , speed"), vec!["speed"]);
        assert_eq!(parse_signal_names("speed,RPM,gear"), vec!["speed", "RPM", "gear"]);
    }

    #[test]
    fn test_signal_names_strip_time_once() {
        assert_eq!(parse_signal_names("time,t,speed"), vec!["t", "speed"]);
        assert_eq!(parse_signal_names("speed,time"), vec!["speed", "time"]);
    }

    #[test]
    fn test_signal_names_blank_entries() {
        assert!(parse_signal_names("").is_empty());
        assert!(parse_signal_names("time").is_empty());
        assert_eq!(parse_signal_names("speed,,RPM,"), vec!["speed", "RPM"]);
    }
}
