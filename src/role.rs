//! Role grants.
//!
//! A role grant is a per-user collection of team- and tracker-scoped roles.
//! Grant entries are denormalized: each carries the resource name (and, for
//! teams, the owning workspace snapshot) so permission lookups never chase
//! references.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{
    EntityKind, GrantRole, RoleGrant, Team, TeamGrant, Tracker, TrackerGrant,
};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating or replacing a user's grants.
#[derive(Debug, Clone, Default)]
pub struct NewRoleGrant {
    pub user_id: String,
    /// Pairs of team id and granted role.
    pub teams: Vec<(String, GrantRole)>,
    /// Pairs of tracker id and granted role.
    pub trackers: Vec<(String, GrantRole)>,
}

#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    config: Config,
}

impl RoleService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    /// Create the grant collection for a user. A user holds at most one.
    pub fn create(&self, body: NewRoleGrant, token: &str) -> Result<RoleGrant> {
        let actor = self.identity.resolve_actor(token)?;
        if self.by_user(&body.user_id)?.is_some() {
            return Err(Error::Validation(format!(
                "user {} already has a role grant",
                body.user_id
            )));
        }

        for (_, role) in body.teams.iter().chain(body.trackers.iter()) {
            self.config.members.ensure_grantable(*role)?;
        }

        let user = self.identity.member_snapshot(&body.user_id, None)?;
        let teams = self.hydrate_team_grants(&body.teams)?;
        let trackers = self.hydrate_tracker_grants(&body.trackers)?;

        let grant = RoleGrant {
            id: String::new(),
            user,
            teams,
            trackers,
            created_by: actor.id.clone(),
            assign_by: Some(actor.id),
            created_at: Utc::now(),
        };
        store::create_entity(self.store.as_ref(), EntityKind::RoleGrant, &grant)
    }

    pub fn query(&self, options: QueryOptions) -> Result<Page<RoleGrant>> {
        let filter = Filter::All;
        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::RoleGrant, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, grant_id: &str) -> Result<RoleGrant> {
        store::require_entity(self.store.as_ref(), EntityKind::RoleGrant, grant_id)
    }

    /// Look up a user's grant collection, if any.
    pub fn by_user(&self, user_id: &str) -> Result<Option<RoleGrant>> {
        let filter = Filter::eq("user.id", user_id);
        let page = self.store.query(
            EntityKind::RoleGrant,
            &filter,
            &QueryOptions::default(),
        )?;
        match page.results.into_iter().next() {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Replace a user's team and tracker grants, re-hydrating snapshots.
    pub fn update(
        &self,
        grant_id: &str,
        teams: Option<Vec<(String, GrantRole)>>,
        trackers: Option<Vec<(String, GrantRole)>>,
        token: &str,
    ) -> Result<RoleGrant> {
        let actor = self.identity.resolve_actor(token)?;

        for (_, role) in teams.iter().flatten().chain(trackers.iter().flatten()) {
            self.config.members.ensure_grantable(*role)?;
        }

        let teams = match &teams {
            Some(pairs) => Some(self.hydrate_team_grants(pairs)?),
            None => None,
        };
        let trackers = match &trackers {
            Some(pairs) => Some(self.hydrate_tracker_grants(pairs)?),
            None => None,
        };

        store::update_entity(
            self.store.as_ref(),
            EntityKind::RoleGrant,
            grant_id,
            self.config.sync.max_retries,
            |grant: &mut RoleGrant| {
                if let Some(teams) = &teams {
                    grant.teams = teams.clone();
                }
                if let Some(trackers) = &trackers {
                    grant.trackers = trackers.clone();
                }
                grant.assign_by = Some(actor.id.clone());
                Ok(())
            },
        )
    }

    pub fn delete(&self, grant_id: &str, token: &str) -> Result<RoleGrant> {
        self.identity.resolve_actor(token)?;
        let grant = self.get(grant_id)?;
        self.store.delete(EntityKind::RoleGrant, grant_id)?;
        Ok(grant)
    }

    fn hydrate_team_grants(&self, pairs: &[(String, GrantRole)]) -> Result<Vec<TeamGrant>> {
        let mut grants = Vec::with_capacity(pairs.len());
        for (team_id, role) in pairs {
            let team: Team =
                store::require_entity(self.store.as_ref(), EntityKind::Team, team_id)?;
            let workspace = team.workspace.ok_or_else(|| {
                Error::Validation(format!("team {team_id} does not belong to a workspace"))
            })?;
            grants.push(TeamGrant {
                id: team.id,
                name: team.name,
                role: *role,
                workspace,
            });
        }
        Ok(grants)
    }

    fn hydrate_tracker_grants(
        &self,
        pairs: &[(String, GrantRole)],
    ) -> Result<Vec<TrackerGrant>> {
        let mut grants = Vec::with_capacity(pairs.len());
        for (tracker_id, role) in pairs {
            let tracker: Tracker =
                store::require_entity(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;
            grants.push(TrackerGrant {
                id: tracker.id,
                name: tracker.name,
                role: *role,
            });
        }
        Ok(grants)
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}
