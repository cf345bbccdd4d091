use std::sync::Arc;

use chrono::{DateTime, Utc};
use pamgate_core::{Actor, AppError, AppResult};
use pamgate_domain::{AuditAction, Session, SessionId};
use tracing::warn;

use crate::audit_ports::{AuditEvent, AuditRepository};
use crate::secrets_ports::TerminationOutcome;
use crate::secrets_service::SecretsService;
use crate::session_ports::SessionRepository;

#[cfg(test)]
mod tests;

/// Lifecycle service for access sessions: starting, check-ins, closing,
/// and the expiry sweep. Provisioning and teardown of the backing JIT
/// account are delegated to the secrets service.
#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    secrets: SecretsService,
}

impl SessionService {
    /// Creates a session service.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        secrets: SecretsService,
    ) -> Self {
        Self {
            sessions,
            audit_repository,
            secrets,
        }
    }

    /// Starts a scheduled session inside its window: provisions the JIT
    /// account, then claims the transition to active.
    ///
    /// The account insert rejects a concurrent starter before any grant
    /// lands on the server; if the status claim still loses, the freshly
    /// provisioned account is torn down again and `Conflict` is returned.
    pub async fn start(&self, actor: &Actor, id: SessionId) -> AppResult<Session> {
        let mut session = self.require(actor, id).await?;
        if session.user_id() != actor.user_id() {
            return Err(AppError::Forbidden(
                "only the session owner may start it".to_owned(),
            ));
        }

        let now = Utc::now();
        if !session.can_start(now) {
            return Err(AppError::InvalidTransition(format!(
                "session '{id}' is {} or outside its window and cannot start",
                session.status().as_str()
            )));
        }

        self.secrets.create_account(&session).await?;

        let from_status = session.status();
        session.mark_active(now)?;
        if let Err(error) = self.sessions.persist_transition(&session, from_status).await {
            match self.secrets.terminate_account(&session, now).await {
                Ok(outcome) => {
                    for step_error in &outcome.errors {
                        warn!(session_id = %id, error = step_error, "compensating teardown step failed");
                    }
                }
                Err(teardown_error) => {
                    warn!(session_id = %id, %teardown_error, "compensating teardown failed");
                }
            }
            return Err(error);
        }

        self.record(actor, AuditAction::SessionStarted, &session).await?;
        Ok(session)
    }

    /// Records a keep-alive check-in on a live session.
    pub async fn check_in(&self, actor: &Actor, id: SessionId) -> AppResult<Session> {
        let mut session = self.require(actor, id).await?;
        if session.user_id() != actor.user_id() {
            return Err(AppError::Forbidden(
                "only the session owner may check in".to_owned(),
            ));
        }

        let from_status = session.status();
        session.check_in(Utc::now())?;
        self.sessions.persist_transition(&session, from_status).await?;
        Ok(session)
    }

    /// Ends a live session normally. Teardown is best-effort and reported
    /// in the outcome; it never blocks the terminal transition.
    pub async fn end(
        &self,
        actor: &Actor,
        id: SessionId,
    ) -> AppResult<(Session, TerminationOutcome)> {
        let session = self.require(actor, id).await?;
        if session.user_id() != actor.user_id() {
            return Err(AppError::Forbidden(
                "only the session owner may end it".to_owned(),
            ));
        }

        self.close(actor, session, AuditAction::SessionEnded).await
    }

    /// Force-closes a live session on behalf of an operator.
    pub async fn terminate(
        &self,
        actor: &Actor,
        id: SessionId,
    ) -> AppResult<(Session, TerminationOutcome)> {
        let session = self.require(actor, id).await?;
        self.close(actor, session, AuditAction::SessionTerminated)
            .await
    }

    /// Calls off a session that never started.
    pub async fn cancel(&self, actor: &Actor, id: SessionId) -> AppResult<Session> {
        let mut session = self.require(actor, id).await?;
        let from_status = session.status();
        session.mark_cancelled(actor.user_id(), Utc::now())?;
        self.sessions.persist_transition(&session, from_status).await?;
        self.record(actor, AuditAction::SessionCancelled, &session)
            .await?;
        Ok(session)
    }

    /// Expires every session whose window closed at or before `now`. Live
    /// sessions get a best-effort teardown first. Per-row failures are
    /// logged and skipped; returns the number of sessions expired.
    pub async fn expire_overdue(&self, now: DateTime<Utc>, limit: u32) -> AppResult<u32> {
        let overdue = self.sessions.list_overdue(now, limit).await?;
        let mut expired = 0;
        for mut session in overdue {
            if session.is_active() {
                match self.secrets.terminate_account(&session, now).await {
                    Ok(outcome) => {
                        for error in &outcome.errors {
                            warn!(session_id = %session.id(), error, "expiry teardown step failed");
                        }
                        if outcome.terminated {
                            session.record_account_revoked(now);
                        }
                    }
                    Err(error) => {
                        warn!(session_id = %session.id(), %error, "expiry teardown failed");
                    }
                }
            }

            let from_status = session.status();
            let outcome = match session.mark_expired(now) {
                Ok(()) => self.sessions.persist_transition(&session, from_status).await,
                Err(error) => Err(error),
            };

            match outcome {
                Ok(()) => {
                    self.audit_repository
                        .append_event(AuditEvent {
                            org_id: session.org_id(),
                            subject: "system".to_owned(),
                            action: AuditAction::SessionExpired,
                            resource_type: "session".to_owned(),
                            resource_id: session.id().to_string(),
                            detail: None,
                        })
                        .await?;
                    expired += 1;
                }
                Err(error) => {
                    warn!(session_id = %session.id(), %error, "skipping overdue session");
                }
            }
        }

        Ok(expired)
    }

    async fn close(
        &self,
        actor: &Actor,
        mut session: Session,
        action: AuditAction,
    ) -> AppResult<(Session, TerminationOutcome)> {
        if !session.is_active() {
            return Err(AppError::InvalidTransition(format!(
                "session '{}' is {} and cannot be closed",
                session.id(),
                session.status().as_str()
            )));
        }

        let now = Utc::now();
        let outcome = self.secrets.terminate_account(&session, now).await?;
        if outcome.terminated {
            session.record_account_revoked(now);
        }

        let from_status = session.status();
        match action {
            AuditAction::SessionTerminated => session.mark_terminated(now)?,
            _ => session.mark_ended(now)?,
        }
        self.sessions.persist_transition(&session, from_status).await?;
        self.record(actor, action, &session).await?;
        Ok((session, outcome))
    }

    async fn require(&self, actor: &Actor, id: SessionId) -> AppResult<Session> {
        self.sessions
            .find(actor.org_id(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session '{id}' does not exist")))
    }

    async fn record(&self, actor: &Actor, action: AuditAction, session: &Session) -> AppResult<()> {
        self.audit_repository
            .append_event(AuditEvent {
                org_id: actor.org_id(),
                subject: actor.user_id().to_string(),
                action,
                resource_type: "session".to_owned(),
                resource_id: session.id().to_string(),
                detail: None,
            })
            .await
    }
}
