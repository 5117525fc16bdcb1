//! Identity resolution.
//!
//! Converts a bearer token into the acting user and bare ids into entity
//! snapshots. Token issuance and refresh are outside the crate; callers plug
//! in any `TokenVerifier`. `StaticTokens` covers embedding and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::model::{EntityKind, GrantRole, MemberRef, User};
use crate::store::{self, Document, EntityStore};

/// Maps a token to the id of the user it was issued to.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String>;
}

/// Static token table for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: Mutex<HashMap<String, String>>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, user_id: impl Into<String>) {
        let mut tokens = self.tokens.lock().expect("token mutex poisoned");
        tokens.insert(token.into(), user_id.into());
    }
}

impl TokenVerifier for StaticTokens {
    fn verify(&self, token: &str) -> Result<String> {
        let tokens = self.tokens.lock().expect("token mutex poisoned");
        tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Unauthorized("invalid token".to_string()))
    }
}

/// Read-only resolver used by every service to turn tokens and ids into the
/// snapshot fields needed for denormalization.
#[derive(Clone)]
pub struct Identity {
    store: Arc<dyn EntityStore>,
    verifier: Arc<dyn TokenVerifier>,
}

impl Identity {
    pub fn new(store: Arc<dyn EntityStore>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { store, verifier }
    }

    /// Resolve the acting user from a token.
    pub fn resolve_actor(&self, token: &str) -> Result<User> {
        let user_id = self.verifier.verify(token)?;
        self.user_by_id(&user_id)?
            .ok_or_else(|| Error::Unauthorized("user not resolvable".to_string()))
    }

    /// Resolve a referenced entity snapshot by kind and id.
    pub fn resolve_ref(&self, kind: EntityKind, id: &str) -> Result<Document> {
        store::require(self.store.as_ref(), kind, id)
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        match self.store.get(EntityKind::User, id)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub fn require_user(&self, id: &str) -> Result<User> {
        store::require_entity(self.store.as_ref(), EntityKind::User, id)
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let filter = crate::store::Filter::eq("email", email);
        let page = self.store.query(
            EntityKind::User,
            &filter,
            &crate::store::QueryOptions::default(),
        )?;
        match page.results.into_iter().next() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Build the denormalized member snapshot copied onto teams, trackers and
    /// workspaces. `role` overrides the user's own role when given (team
    /// membership grants start at the configured default).
    pub fn member_snapshot(&self, user_id: &str, role: Option<GrantRole>) -> Result<MemberRef> {
        let user = self.require_user(user_id)?;
        Ok(MemberRef {
            id: user.id,
            name: user.name,
            email: user.email,
            designation: user.designation,
            role: role.unwrap_or(user.role),
            status: user.status,
            is_email_verified: user.is_email_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn identity_with_user() -> (Identity, String) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let doc = store
            .create(
                EntityKind::User,
                json!({
                    "name": "Ada",
                    "email": "ada@example.com",
                    "role": "view",
                    "isEmailVerified": true,
                }),
            )
            .unwrap();
        let tokens = StaticTokens::new();
        tokens.register("tok-ada", doc.id.clone());
        (Identity::new(store, Arc::new(tokens)), doc.id)
    }

    #[test]
    fn resolves_actor_from_token() {
        let (identity, user_id) = identity_with_user();
        let user = identity.resolve_actor("tok-ada").unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.name, "Ada");
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let (identity, _) = identity_with_user();
        let err = identity.resolve_actor("tok-unknown").unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn member_snapshot_copies_denormalized_fields() {
        let (identity, user_id) = identity_with_user();
        let member = identity
            .member_snapshot(&user_id, Some(GrantRole::View))
            .unwrap();
        assert_eq!(member.email, "ada@example.com");
        assert!(member.is_email_verified);
    }
}
