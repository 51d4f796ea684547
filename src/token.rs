use thiserror::Error;

/// Upper bound on a token's hex length. Current APNs tokens are 64 hex chars,
/// Apple only promises they are variable length.
pub const MAX_TOKEN_HEX_LEN: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("token contains non-hex character '{0}'")]
    NonHex(char),

    #[error("token has odd length {0}, expected whole bytes")]
    OddLength(usize),

    #[error("token is too long ({0} hex chars, max {max})", max = MAX_TOKEN_HEX_LEN)]
    TooLong(usize),
}

/// Normalize a raw device token candidate into lowercase hex.
///
/// Accepts plain hex (`a1b2c3...`) as well as the form devices print to the
/// console (`<a1b2c3d4 e5f6...>`).
pub fn normalize_token(raw: &str) -> Result<String, TokenError> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(trimmed);

    let token: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if token.is_empty() {
        return Err(TokenError::Empty);
    }
    if let Some(bad) = token.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(TokenError::NonHex(bad));
    }
    if token.len() % 2 != 0 {
        return Err(TokenError::OddLength(token.len()));
    }
    if token.len() > MAX_TOKEN_HEX_LEN {
        return Err(TokenError::TooLong(token.len()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_hex() {
        assert_eq!(normalize_token("deadbeef"), Ok("deadbeef".to_string()));
        assert_eq!(normalize_token("  CAFEF00D\r"), Ok("cafef00d".to_string()));
    }

    #[test]
    fn accepts_console_dump_form() {
        assert_eq!(
            normalize_token("<a1b2c3d4 e5f60718>"),
            Ok("a1b2c3d4e5f60718".to_string())
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(normalize_token(""), Err(TokenError::Empty));
        assert_eq!(normalize_token("<>"), Err(TokenError::Empty));
        assert_eq!(normalize_token("not-a-token"), Err(TokenError::NonHex('n')));
        assert_eq!(normalize_token("abc"), Err(TokenError::OddLength(3)));

        let long = "ab".repeat(MAX_TOKEN_HEX_LEN / 2 + 1);
        assert_eq!(normalize_token(&long), Err(TokenError::TooLong(long.len())));
    }

    #[test]
    fn unbalanced_brackets_are_not_stripped() {
        assert_eq!(normalize_token("<deadbeef"), Err(TokenError::NonHex('<')));
    }
}
