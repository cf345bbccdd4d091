mod accounts;
mod assets;
mod driver;
mod encryption;

pub use accounts::{AccountRepository, AdminCredentials, GeneratedCredentials};
pub use assets::{AssetRepository, SessionAuditRepository};
pub use driver::{DatabaseDriver, DatabaseTarget, DriverFactory, TerminationOutcome};
pub use encryption::SecretEncryptor;
