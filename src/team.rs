//! Team operations.
//!
//! Teams are created from invitee email addresses: each email must resolve to
//! an existing user, who joins with the configured default role. A team
//! created inside a workspace is attached to the workspace's reference list,
//! and edits to a team's denormalized fields fan out to every tracker and
//! milestone holding a snapshot of it.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{EntityKind, GrantRole, Team, Workspace, WorkspaceRef};
use crate::refsync::{CascadeReport, ReferenceSync, SyncOp};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating a team.
#[derive(Debug, Clone, Default)]
pub struct NewTeam {
    pub name: String,
    /// Invitee emails; each must belong to a registered user.
    pub member_emails: Vec<String>,
    pub workspace_id: Option<String>,
    pub status: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TeamUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
}

/// Query filter for team listing.
#[derive(Debug, Clone, Default)]
pub struct TeamQuery {
    pub name: Option<String>,
    pub workspace_id: Option<String>,
    /// Only teams the given user is a member of.
    pub member_id: Option<String>,
}

#[derive(Clone)]
pub struct TeamService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    sync: ReferenceSync,
    config: Config,
}

impl TeamService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        let sync = ReferenceSync::new(Arc::clone(&store), config.sync.max_retries);
        Self {
            store,
            identity,
            sync,
            config,
        }
    }

    /// Create a team from invitee emails. Unknown emails fail validation
    /// before anything is written.
    pub fn create(&self, body: NewTeam, token: &str) -> Result<(Team, CascadeReport)> {
        let user = self.identity.resolve_actor(token)?;
        let default_role = self.config.members.resolve_default_role()?;

        let mut members = Vec::with_capacity(body.member_emails.len());
        for email in &body.member_emails {
            let invitee = self.identity.user_by_email(email)?.ok_or_else(|| {
                Error::Validation(format!("no registered user with email {email}"))
            })?;
            members.push(self.identity.member_snapshot(&invitee.id, Some(default_role))?);
        }

        let workspace = match &body.workspace_id {
            Some(id) => Some(self.workspace_snapshot(id)?),
            None => None,
        };

        let team = Team {
            id: String::new(),
            name: body.name,
            workspace,
            members,
            created_by: user.id,
            created_at: Utc::now(),
            status: body.status,
        };
        let team = store::create_entity(self.store.as_ref(), EntityKind::Team, &team)?;

        let mut report = CascadeReport::default();
        if let Some(workspace) = &team.workspace {
            report.merge(self.sync.team_membership_changed(
                SyncOp::Attach,
                &workspace.id,
                &team.id,
            ));
        }
        Ok((team, report))
    }

    pub fn query(&self, query: TeamQuery, options: QueryOptions) -> Result<Page<Team>> {
        let mut filter = Filter::All;
        if let Some(name) = query.name {
            filter = filter.and(Filter::contains_ci("name", name));
        }
        if let Some(workspace_id) = query.workspace_id {
            filter = filter.and(Filter::eq("workspace.id", workspace_id));
        }
        if let Some(member_id) = query.member_id {
            filter = filter.and(Filter::elem_match_id("members", member_id));
        }

        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::Team, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, team_id: &str) -> Result<Team> {
        store::require_entity(self.store.as_ref(), EntityKind::Team, team_id)
    }

    /// Update a team's own fields and propagate the new snapshot to every
    /// tracker and milestone that embeds it.
    pub fn update(
        &self,
        team_id: &str,
        update: TeamUpdate,
        token: &str,
    ) -> Result<(Team, CascadeReport)> {
        self.identity.resolve_actor(token)?;

        let team = store::update_entity(
            self.store.as_ref(),
            EntityKind::Team,
            team_id,
            self.config.sync.max_retries,
            |team: &mut Team| {
                if let Some(name) = &update.name {
                    team.name = name.clone();
                }
                if let Some(status) = &update.status {
                    team.status = Some(status.clone());
                }
                Ok(())
            },
        )?;

        let report = self.propagate_snapshot(&team)?;
        Ok((team, report))
    }

    /// Add a member by email, with an optional role override.
    pub fn add_member(
        &self,
        team_id: &str,
        email: &str,
        role: Option<GrantRole>,
        token: &str,
    ) -> Result<(Team, CascadeReport)> {
        self.identity.resolve_actor(token)?;
        let invitee = self
            .identity
            .user_by_email(email)?
            .ok_or_else(|| Error::Validation(format!("no registered user with email {email}")))?;
        let default_role = self.config.members.resolve_default_role()?;
        let role = role.unwrap_or(default_role);
        self.config.members.ensure_grantable(role)?;
        let member = self.identity.member_snapshot(&invitee.id, Some(role))?;

        let team = store::update_entity(
            self.store.as_ref(),
            EntityKind::Team,
            team_id,
            self.config.sync.max_retries,
            |team: &mut Team| {
                if team.members.iter().any(|m| m.id == member.id) {
                    return Err(Error::Validation(format!(
                        "user {email} is already a member of the team"
                    )));
                }
                team.members.push(member.clone());
                Ok(())
            },
        )?;

        let report = self.propagate_snapshot(&team)?;
        Ok((team, report))
    }

    /// Remove a member by user id. Removing an absent member is a no-op.
    pub fn remove_member(
        &self,
        team_id: &str,
        user_id: &str,
        token: &str,
    ) -> Result<(Team, CascadeReport)> {
        self.identity.resolve_actor(token)?;

        let team = store::update_entity(
            self.store.as_ref(),
            EntityKind::Team,
            team_id,
            self.config.sync.max_retries,
            |team: &mut Team| {
                team.members.retain(|member| member.id != user_id);
                Ok(())
            },
        )?;

        let report = self.propagate_snapshot(&team)?;
        Ok((team, report))
    }

    /// Delete the team and detach it from its workspace. Trackers and
    /// milestones keep their stale snapshots; they are only ever refreshed,
    /// never pruned, when the source team disappears.
    pub fn delete(&self, team_id: &str, token: &str) -> Result<(Team, CascadeReport)> {
        self.identity.resolve_actor(token)?;
        let team = self.get(team_id)?;
        self.store.delete(EntityKind::Team, team_id)?;

        let mut report = CascadeReport::default();
        if let Some(workspace) = &team.workspace {
            report.merge(self.sync.team_membership_changed(
                SyncOp::Detach,
                &workspace.id,
                team_id,
            ));
        }
        Ok((team, report))
    }

    fn propagate_snapshot(&self, team: &Team) -> Result<CascadeReport> {
        let snapshot = serde_json::to_value(team)?;
        Ok(self.sync.team_snapshot_changed(&team.id, snapshot))
    }

    fn workspace_snapshot(&self, workspace_id: &str) -> Result<WorkspaceRef> {
        let workspace: Workspace =
            store::require_entity(self.store.as_ref(), EntityKind::Workspace, workspace_id)?;
        Ok(WorkspaceRef {
            id: workspace.id,
            name: workspace.name,
            status: workspace.status,
            created_by: workspace.created_by,
            created_at: workspace.created_at,
        })
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}
