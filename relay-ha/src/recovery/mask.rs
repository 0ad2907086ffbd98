//! Secret masking.

/// Name fragments marking an environment variable as sensitive.
const SENSITIVE_MARKERS: [&str; 5] = ["TOKEN", "KEY", "PASSWORD", "SECRET", "URI"];

/// Keep the first and last four characters and star out the rest.
/// Values of eight characters or fewer are starred out completely.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();
    if len <= 8 {
        return "*".repeat(len);
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(len - 8))
}

/// Whether a value looks like the output of [`mask_value`].
pub fn is_masked(value: &str) -> bool {
    value.contains('*') && value.chars().count() > 8
}

pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|m| upper.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "")]
    #[case("abc", "***")]
    #[case("12345678", "********")]
    #[case("123456789", "1234*6789")]
    #[case("abcdefghijklmnop", "abcd********mnop")]
    fn test_mask_value(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_value(input), expected);
    }

    #[test]
    fn test_is_masked() {
        assert!(is_masked(&mask_value("123456:ABCDEFGHIJ")));
        assert!(!is_masked("********"));
        assert!(!is_masked("plain-value-here"));
    }

    #[rstest]
    #[case("BOT_TOKEN", true)]
    #[case("API_HASH", false)]
    #[case("REDIS_PASSWORD", true)]
    #[case("DATABASE_URI", true)]
    #[case("api_key", true)]
    #[case("LOG_CHANNEL", false)]
    fn test_is_sensitive_name(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_sensitive_name(name), expected);
    }
}
