use url::Url;
use validator::ValidateEmail;

/// Validates that the input looks like a valid email address
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.validate_email()
}

/// Validates a plan name for URL-friendly characters.
/// Rules:
/// - 1-50 characters
/// - Only lowercase ASCII letters, numbers, hyphens, underscores
/// - Must start with a letter or number
pub fn is_valid_plan_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 50 {
        return false;
    }

    let Some(first) = name.chars().next() else {
        return false;
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Checkout return URLs must be absolute http(s) URLs.
pub fn is_valid_redirect_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("user+tag@example.org"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("   "));
        assert!(!is_valid_email("notanemail"));
        assert!(!is_valid_email("spaces in@email.com"));
    }

    #[test]
    fn test_plan_names() {
        assert!(is_valid_plan_name("free-trial"));
        assert!(is_valid_plan_name("pro_monthly"));
        assert!(is_valid_plan_name("365days"));
        assert!(!is_valid_plan_name(""));
        assert!(!is_valid_plan_name("-monthly"));
        assert!(!is_valid_plan_name("Monthly"));
        assert!(!is_valid_plan_name("pro plan"));
        assert!(!is_valid_plan_name(&"a".repeat(51)));
    }

    #[test]
    fn test_redirect_urls() {
        assert!(is_valid_redirect_url("https://app.example.com/billing/success"));
        assert!(is_valid_redirect_url("http://localhost:3000/cancel"));
        assert!(!is_valid_redirect_url("javascript:alert(1)"));
        assert!(!is_valid_redirect_url("/relative/path"));
        assert!(!is_valid_redirect_url(""));
    }
}
