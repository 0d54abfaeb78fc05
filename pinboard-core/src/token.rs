use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,
    #[error("token must have the form username:secret")]
    Malformed,
}

/// API token of the form `username:secret`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    raw: String,
    split: usize,
}

impl AuthToken {
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        let raw = value.trim();
        if raw.is_empty() {
            return Err(TokenError::Empty);
        }
        let split = raw.find(':').ok_or(TokenError::Malformed)?;
        let (user, secret) = (&raw[..split], &raw[split + 1..]);
        if user.is_empty() || secret.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(TokenError::Malformed);
        }
        Ok(Self {
            raw: raw.to_string(),
            split,
        })
    }

    pub fn username(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_username_and_secret() {
        let token = AuthToken::parse(" maciej:ABC123 ").unwrap();
        assert_eq!(token.username(), "maciej");
        assert_eq!(token.as_str(), "maciej:ABC123");
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(AuthToken::parse(""), Err(TokenError::Empty));
        assert_eq!(AuthToken::parse("nocolon"), Err(TokenError::Malformed));
        assert_eq!(AuthToken::parse(":secret"), Err(TokenError::Malformed));
        assert_eq!(AuthToken::parse("user:"), Err(TokenError::Malformed));
        assert_eq!(AuthToken::parse("us er:secret"), Err(TokenError::Malformed));
    }

    #[test]
    fn debug_output_hides_secret() {
        let token = AuthToken::parse("maciej:ABC123").unwrap();
        let rendered = format!("{token:?}");
        assert!(rendered.contains("maciej"));
        assert!(!rendered.contains("ABC123"));
    }
}
