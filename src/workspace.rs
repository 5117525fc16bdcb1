//! Workspace operations.
//!
//! A workspace is the multi-tenant root: it references its teams and trackers
//! and carries a derived status bar summarizing progress across all trackers.
//! Reads are scoped to workspaces the actor created or is a member of.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{EntityKind, Reference, Workspace};
use crate::status::StatusAggregator;
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating a workspace.
#[derive(Debug, Clone, Default)]
pub struct NewWorkspace {
    pub name: String,
    pub kind: Option<String>,
    pub status: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceUpdate {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    /// Member ids; snapshots are re-hydrated from the user records.
    pub member_ids: Option<Vec<String>>,
    /// Team ids; each must exist.
    pub team_ids: Option<Vec<String>>,
    /// Tracker ids; each must exist.
    pub tracker_ids: Option<Vec<String>>,
}

/// Query filter for workspace listing.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceQuery {
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct WorkspaceService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    status: StatusAggregator,
    config: Config,
}

impl WorkspaceService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        let status = StatusAggregator::new(Arc::clone(&store), config.sync.max_retries);
        Self {
            store,
            identity,
            status,
            config,
        }
    }

    pub fn create(&self, body: NewWorkspace, token: &str) -> Result<Workspace> {
        let user = self.identity.resolve_actor(token)?;
        let workspace = Workspace {
            id: String::new(),
            name: body.name,
            kind: body.kind,
            status: body.status,
            teams: Vec::new(),
            trackers: Vec::new(),
            members: Vec::new(),
            created_by: user.id,
            created_at: Utc::now(),
            status_bar: None,
        };
        store::create_entity(self.store.as_ref(), EntityKind::Workspace, &workspace)
    }

    /// List workspaces the actor created or belongs to, with a freshly
    /// computed status bar on every result.
    pub fn query(
        &self,
        query: WorkspaceQuery,
        options: QueryOptions,
        token: &str,
    ) -> Result<Page<Workspace>> {
        let user = self.identity.resolve_actor(token)?;
        let now = Utc::now();

        let mut filter = Filter::AnyOf(vec![
            Filter::elem_match_id("members", user.id.clone()),
            Filter::eq("created_by", user.id),
        ]);
        if let Some(name) = query.name {
            filter = filter.and(Filter::contains_ci("name", name));
        }

        let options = self.with_default_limit(options);
        let page = self
            .store
            .query(EntityKind::Workspace, &filter, &options)?;

        let mut results = Vec::with_capacity(page.results.len());
        for doc in &page.results {
            let mut workspace: Workspace = doc.decode()?;
            workspace.status_bar = Some(self.status.workspace_status_bar(&workspace, now)?);
            results.push(workspace);
        }

        Ok(Page {
            results,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
            total_results: page.total_results,
        })
    }

    /// Fetch a workspace the actor can see. A workspace the actor neither
    /// created nor belongs to behaves as missing.
    pub fn get(&self, workspace_id: &str, token: &str) -> Result<Workspace> {
        let user = self.identity.resolve_actor(token)?;
        let workspace: Workspace =
            store::require_entity(self.store.as_ref(), EntityKind::Workspace, workspace_id)?;

        let is_member = workspace.members.iter().any(|member| member.id == user.id);
        if workspace.created_by != user.id && !is_member {
            return Err(Error::not_found(EntityKind::Workspace, workspace_id));
        }
        Ok(workspace)
    }

    /// Owner-only update. Member, team and tracker lists are re-hydrated so
    /// denormalized snapshots stay in step with their source entities.
    pub fn update(
        &self,
        workspace_id: &str,
        update: WorkspaceUpdate,
        token: &str,
    ) -> Result<Workspace> {
        let user = self.identity.resolve_actor(token)?;
        let current = self.get(workspace_id, token)?;
        if current.created_by != user.id {
            return Err(Error::Unauthorized(
                "only the workspace owner may update it".to_string(),
            ));
        }

        let members = match &update.member_ids {
            Some(ids) => {
                let mut members = Vec::with_capacity(ids.len());
                for id in ids {
                    members.push(self.identity.member_snapshot(id, None)?);
                }
                Some(members)
            }
            None => None,
        };
        let teams = self.verified_refs(EntityKind::Team, update.team_ids.as_deref())?;
        let trackers = self.verified_refs(EntityKind::Tracker, update.tracker_ids.as_deref())?;

        store::update_entity(
            self.store.as_ref(),
            EntityKind::Workspace,
            workspace_id,
            self.config.sync.max_retries,
            |workspace: &mut Workspace| {
                if let Some(name) = &update.name {
                    workspace.name = name.clone();
                }
                if let Some(kind) = &update.kind {
                    workspace.kind = Some(kind.clone());
                }
                if let Some(status) = &update.status {
                    workspace.status = Some(status.clone());
                }
                if let Some(members) = &members {
                    workspace.members = members.clone();
                }
                if let Some(teams) = &teams {
                    workspace.teams = teams.clone();
                }
                if let Some(trackers) = &trackers {
                    workspace.trackers = trackers.clone();
                }
                Ok(())
            },
        )
    }

    pub fn delete(&self, workspace_id: &str, token: &str) -> Result<Workspace> {
        // Access check before removal; children are orphaned, not deleted.
        let workspace = self.get(workspace_id, token)?;
        self.store.delete(EntityKind::Workspace, workspace_id)?;
        Ok(workspace)
    }

    fn verified_refs(
        &self,
        kind: EntityKind,
        ids: Option<&[String]>,
    ) -> Result<Option<Vec<Reference>>> {
        let Some(ids) = ids else {
            return Ok(None);
        };
        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            store::require(self.store.as_ref(), kind, id)?;
            refs.push(Reference::new(id.clone()));
        }
        Ok(Some(refs))
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}
