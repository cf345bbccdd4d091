//! Application services and ports.

#![forbid(unsafe_code)]

mod audit_ports;
mod request_ports;
mod request_service;
mod secrets_ports;
mod secrets_service;
mod session_ports;
mod session_service;

pub use audit_ports::{AuditEvent, AuditRepository};
pub use request_ports::{RequestRepository, RiskAdvisor};
pub use request_service::{NewRequestInput, RequestService};
pub use secrets_ports::{
    AccountRepository, AdminCredentials, AssetRepository, DatabaseDriver, DatabaseTarget,
    DriverFactory, GeneratedCredentials, SecretEncryptor, SessionAuditRepository,
    TerminationOutcome,
};
pub use secrets_service::{CredentialPolicy, SecretsService};
pub use session_ports::SessionRepository;
pub use session_service::SessionService;
