use rand::Rng;
use std::fmt;

const TOKEN_LENGTH: usize = 32;
const MAX_TOKEN_LENGTH: usize = 128;

/// Capability a recipient uses to leave an account. Issued once when the account is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UnsubscribeToken(String);

impl UnsubscribeToken {
    pub fn generate() -> UnsubscribeToken {
        let mut rng = rand::thread_rng();

        let token = std::iter::repeat_with(|| rng.sample(rand::distributions::Alphanumeric))
            .map(char::from)
            .take(TOKEN_LENGTH)
            .collect();

        Self(token)
    }

    pub fn parse(token: String) -> Result<UnsubscribeToken, String> {
        let is_empty = token.is_empty();
        let is_too_long = token.len() > MAX_TOKEN_LENGTH;
        let is_alphanumeric = token.chars().all(|char| char.is_ascii_alphanumeric());

        if is_empty || is_too_long || !is_alphanumeric {
            return Err(format!("{} is not a valid unsubscribe token", token));
        }

        Ok(Self(token))
    }
}

impl AsRef<str> for UnsubscribeToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnsubscribeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
