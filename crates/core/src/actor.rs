use serde::{Deserialize, Serialize};

use crate::{OrgId, UserId};

/// Identity of the user or operator performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    user_id: UserId,
    org_id: OrgId,
}

impl Actor {
    /// Creates an actor from authentication and organization data.
    #[must_use]
    pub fn new(user_id: UserId, org_id: OrgId) -> Self {
        Self { user_id, org_id }
    }

    /// Returns the acting user identifier.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the organization the actor operates in.
    #[must_use]
    pub fn org_id(&self) -> OrgId {
        self.org_id
    }
}
