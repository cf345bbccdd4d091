use pamgate_core::AppResult;

/// Port for symmetric encryption of stored credentials.
pub trait SecretEncryptor: Send + Sync {
    /// Encrypts a plaintext secret for storage.
    fn encrypt(&self, plaintext: &str) -> AppResult<Vec<u8>>;

    /// Decrypts a stored secret.
    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<String>;
}
