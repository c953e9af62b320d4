use crate::ocr::Token;
use regex::Regex;

/// First `dd/mm/yyyy` found, scanning tokens in reading order.
pub fn extract_export_date(tokens: &[Token]) -> Option<String> {
    let re = Regex::new(r"\d{2}/\d{2}/\d{4}").ok()?;
    tokens
        .iter()
        .find_map(|t| re.find(&t.text).map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str) -> Token {
        Token::new(text, 0.9, [[0.0, 0.0]; 4])
    }

    #[test]
    fn finds_date_after_label() {
        let tokens = vec![tok("Date of exportation:"), tok("12/05/2024")];
        assert_eq!(extract_export_date(&tokens).as_deref(), Some("12/05/2024"));
    }

    #[test]
    fn takes_first_match_in_first_matching_token() {
        let tokens = vec![
            tok("By Truck"),
            tok("on 03/01/2025 or 04/01/2025"),
            tok("09/09/2029"),
        ];
        assert_eq!(extract_export_date(&tokens).as_deref(), Some("03/01/2025"));
    }

    #[test]
    fn rejects_loose_formats() {
        let tokens = vec![tok("1/5/2024"), tok("12-05-2024"), tok("12/05/24")];
        assert_eq!(extract_export_date(&tokens), None);
        assert_eq!(extract_export_date(&[]), None);
    }
}
