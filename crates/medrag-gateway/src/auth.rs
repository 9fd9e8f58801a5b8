use subtle::ConstantTimeEq;

use medrag_core::config::GatewayConfig;

/// Check a request's credentials against the configured token.
///
/// With no token configured every request is accepted. Otherwise the bearer
/// header is checked first, then a `?token=` query parameter.
pub fn validate_auth(
    config: &GatewayConfig,
    bearer: Option<&str>,
    query_token: Option<&str>,
) -> bool {
    let Some(expected) = config.token.as_deref() else {
        return true;
    };
    match bearer.or(query_token) {
        Some(given) => tokens_match(given, expected),
        None => false,
    }
}

fn tokens_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Extract the percent-decoded token from the query string (?token=...).
pub fn extract_token_from_query(query: &str) -> Option<String> {
    let raw = query.split('&').find_map(|pair| pair.strip_prefix("token="))?;
    urlencoding::decode(raw).ok().map(|token| token.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token(token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            token: token.map(String::from),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_no_token_configured_is_open() {
        assert!(validate_auth(&with_token(None), None, None));
        assert!(validate_auth(&with_token(None), Some("anything"), None));
    }

    #[test]
    fn test_bearer_checked_before_query() {
        let config = with_token(Some("s3cret"));
        assert!(validate_auth(&config, Some("s3cret"), None));
        assert!(!validate_auth(&config, Some("wrong"), Some("s3cret")));
        assert!(validate_auth(&config, None, Some("s3cret")));
        assert!(!validate_auth(&config, None, None));
    }

    #[test]
    fn test_extract_token_from_query() {
        assert_eq!(extract_token_from_query("a=1&token=abc").as_deref(), Some("abc"));
        assert_eq!(extract_token_from_query("a=1"), None);
        assert_eq!(extract_token_from_query(""), None);
    }

    #[test]
    fn test_query_token_is_percent_decoded() {
        let config = with_token(Some("s3cret/+="));
        let token = extract_token_from_query("token=s3cret%2F%2B%3D").unwrap();
        assert_eq!(token, "s3cret/+=");
        assert!(validate_auth(&config, None, Some(&token)));
    }

    #[test]
    fn test_token_prefix_or_extension_rejected() {
        let config = with_token(Some("s3cret"));
        assert!(!validate_auth(&config, Some("s3cre"), None));
        assert!(!validate_auth(&config, Some("s3cret!"), None));
        assert!(!validate_auth(&config, Some(""), None));
    }
}
