//! Line tokenizer for the Q-Sys external control protocol.
//!
//! Responses are whitespace separated, but named controls and string values
//! may contain spaces and are then wrapped in double quotes:
//!
//! ```text
//! cv "Room A Gain" "-10.0dB" -10 0.5
//! ```

use crate::error::{QsysError, Result};

/// Split one received line into fields.
///
/// Whitespace separates fields except inside a pair of double quotes. Quote
/// characters are removed from the output, so `"Room A"` yields `Room A`.
/// An explicitly quoted empty string (`""`) yields an empty field. A line
/// with an unterminated quote is rejected as malformed.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_field = false;
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                in_field = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_field {
                    fields.push(std::mem::take(&mut current));
                    in_field = false;
                }
            }
            c => {
                current.push(c);
                in_field = true;
            }
        }
    }

    if in_quotes {
        return Err(QsysError::malformed(format!("unbalanced quotes in '{}'", line)));
    }

    if in_field {
        fields.push(current);
    }

    Ok(fields)
}

/// Wrap a named control in double quotes for transmission.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_fields_keep_whitespace() {
        let fields = tokenize(r#"cv "Room A" 1 "0.5""#).unwrap();
        assert_eq!(fields, vec!["cv", "Room A", "1", "0.5"]);
    }

    #[test]
    fn test_plain_fields() {
        let fields = tokenize("cgpa").unwrap();
        assert_eq!(fields, vec!["cgpa"]);

        let fields = tokenize("  sr   design  code 1 0 ").unwrap();
        assert_eq!(fields, vec!["sr", "design", "code", "1", "0"]);
    }

    #[test]
    fn test_empty_line() {
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize(" \t ").unwrap().is_empty());
    }

    #[test]
    fn test_empty_quoted_field_is_kept() {
        let fields = tokenize(r#"cv "Dialer String" "" 0 0"#).unwrap();
        assert_eq!(fields, vec!["cv", "Dialer String", "", "0", "0"]);
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        let err = tokenize(r#"cv "Room A 1 0.5"#).unwrap_err();
        assert!(matches!(err, QsysError::MalformedLine { .. }));
    }

    #[test]
    fn test_trailing_carriage_return_is_whitespace() {
        let fields = tokenize("cgpa\r").unwrap();
        assert_eq!(fields, vec!["cgpa"]);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("Room A"), "\"Room A\"");
    }
}
