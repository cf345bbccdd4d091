use pamgate_core::{AppError, AppResult};

use crate::secrets_ports::GeneratedCredentials;

const USERNAME_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&*+-=?@^_";

/// Policy for generating JIT usernames and passwords.
///
/// Usernames follow `{prefix}{number}_{random}` with a three-digit number
/// and a five-character random tail, keeping them short enough for the
/// engines' identifier limits.
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    username_prefix: String,
    password_length: usize,
}

impl CredentialPolicy {
    /// Creates a policy with a custom username prefix and password length.
    pub fn new(username_prefix: String, password_length: usize) -> AppResult<Self> {
        if username_prefix.is_empty()
            || !username_prefix
                .chars()
                .all(|character| character.is_ascii_lowercase())
        {
            return Err(AppError::Validation(
                "username prefix must be non-empty lowercase ascii".to_owned(),
            ));
        }

        if password_length < 12 {
            return Err(AppError::Validation(
                "generated passwords must be at least 12 characters".to_owned(),
            ));
        }

        Ok(Self {
            username_prefix,
            password_length,
        })
    }

    /// Generates a fresh username candidate.
    pub fn generate_username(&self) -> AppResult<String> {
        let mut bytes = [0u8; 7];
        getrandom::fill(&mut bytes)
            .map_err(|error| AppError::Internal(format!("failed to generate username: {error}")))?;

        let number = (u16::from(bytes[0]) * 256 + u16::from(bytes[1])) % 1000;
        let suffix: String = bytes[2..]
            .iter()
            .map(|byte| {
                let index = usize::from(*byte) % USERNAME_SUFFIX_CHARSET.len();
                char::from(USERNAME_SUFFIX_CHARSET[index])
            })
            .collect();

        Ok(format!("{}{number:03}_{suffix}", self.username_prefix))
    }

    /// Generates a password mixing letters, digits, and symbols. Never
    /// contains whitespace or quoting characters.
    pub fn generate_password(&self) -> AppResult<String> {
        let mut bytes = vec![0u8; self.password_length];
        getrandom::fill(&mut bytes)
            .map_err(|error| AppError::Internal(format!("failed to generate password: {error}")))?;

        Ok(bytes
            .iter()
            .map(|byte| {
                let index = usize::from(*byte) % PASSWORD_CHARSET.len();
                char::from(PASSWORD_CHARSET[index])
            })
            .collect())
    }

    /// Generates a fresh credential pair.
    pub fn generate(&self) -> AppResult<GeneratedCredentials> {
        Ok(GeneratedCredentials {
            username: self.generate_username()?,
            password: self.generate_password()?,
        })
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            username_prefix: "pam".to_owned(),
            password_length: 16,
        }
    }
}
