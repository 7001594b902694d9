//! Explicit session context.
//!
//! The coordinator and the transport never reach into ambient storage for
//! credentials; everything they need is carried by a [`Session`] constructed
//! once after login.

use std::fmt;
use std::sync::Arc;

use crate::error::SyncError;
use crate::models::{Role, UserId};

/// Supplies a valid bearer token on demand. Token acquisition and refresh
/// live behind this seam; the sync core only ever asks for the current value.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> String;
}

/// A fixed token, for deployments that refresh by rebuilding the session
/// and for tests.
pub struct StaticCredentials(pub String);

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> String {
        self.0.clone()
    }
}

/// Authenticated client identity: who is acting, in which role, with which
/// credential source.
#[derive(Clone)]
pub struct Session {
    user_id: UserId,
    role: Role,
    credentials: Arc<dyn CredentialProvider>,
}

impl Session {
    /// Build a session from the auth service's login response. The role
    /// string is resolved to a closed enum here, once; an unrecognized role
    /// is an error, never a default.
    pub fn new(
        user_id: UserId,
        role: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            user_id,
            role: Role::parse(role)?,
            credentials,
        })
    }

    pub fn with_role(
        user_id: UserId,
        role: Role,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            user_id,
            role,
            credentials,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn bearer_token(&self) -> String {
        self.credentials.bearer_token()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the token.
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .finish()
    }
}
