//! Column type inference from sampled string values

use crate::models::TypeTag;
use chrono::NaiveDate;

/// Classify a column by trying, in order, integer, float, date and string.
///
/// Blank values are ignored. A column with no non-blank value is `Empty`.
/// Integer wins over float so whole-number columns never read as floats;
/// a bare year such as `2020` therefore classifies as `Integer`.
pub fn infer_type<S: AsRef<str>>(values: &[S]) -> TypeTag {
    let present: Vec<&str> = values
        .iter()
        .map(|v| v.as_ref().trim())
        .filter(|v| !v.is_empty())
        .collect();

    if present.is_empty() {
        return TypeTag::Empty;
    }

    if present.iter().all(|v| is_integer(v)) {
        TypeTag::Integer
    } else if present.iter().all(|v| v.parse::<f64>().is_ok()) {
        TypeTag::Float
    } else if present.iter().all(|v| is_iso_date(v)) {
        TypeTag::Date
    } else {
        TypeTag::String
    }
}

/// Optional sign followed by digits, with no width limit
fn is_integer(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYY-MM-DD` with exactly four year digits and two-digit month and day
fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());

    digits_ok && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_column() {
        assert_eq!(infer_type(&["1", "-42", "  7 ", ""]), TypeTag::Integer);
    }

    #[test]
    fn test_integer_wider_than_i64() {
        assert_eq!(infer_type(&["12345678901234567890", "1"]), TypeTag::Integer);
        assert_eq!(infer_type(&["+3", "-"]), TypeTag::String);
    }

    #[test]
    fn test_float_column() {
        assert_eq!(infer_type(&["1", "2.5", "4015.23"]), TypeTag::Float);
    }

    #[test]
    fn test_date_column() {
        assert_eq!(
            infer_type(&["2020-01-01", "", "1999-12-31"]),
            TypeTag::Date
        );
    }

    #[test]
    fn test_malformed_dates_fall_back_to_string() {
        assert_eq!(infer_type(&["2020-1-01"]), TypeTag::String);
        assert_eq!(infer_type(&["2020-02-30"]), TypeTag::String);
        assert_eq!(infer_type(&["01/02/2020"]), TypeTag::String);
    }

    #[test]
    fn test_year_fragment_is_integer() {
        assert_eq!(infer_type(&["2020", "2021"]), TypeTag::Integer);
    }

    #[test]
    fn test_mixed_column_is_string() {
        assert_eq!(infer_type(&["2020-01-01", "12.5"]), TypeTag::String);
        assert_eq!(infer_type(&["abc", "1"]), TypeTag::String);
    }

    #[test]
    fn test_blank_column_is_empty() {
        assert_eq!(infer_type(&["", "   ", "\t"]), TypeTag::Empty);
        assert_eq!(infer_type::<&str>(&[]), TypeTag::Empty);
    }
}
