//! Tracker operations.
//!
//! A tracker is a dated container of work, typed by what it may hold:
//! milestones, direct sub-tasks, or both. Listing a tracker recomputes its
//! status bar from live descendants and eagerly rewrites the colors of its
//! milestones, so the persisted derived fields are only ever a cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{
    EntityKind, Milestone, Team, Tracker, TrackerKind, Workspace, WorkspaceRef,
};
use crate::refsync::{CascadeReport, ReferenceSync, SyncOp};
use crate::span::allocate_milestone_spans;
use crate::status::StatusAggregator;
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating a tracker.
#[derive(Debug, Clone)]
pub struct NewTracker {
    pub name: String,
    pub workspace_id: Option<String>,
    pub member_ids: Vec<String>,
    pub team_ids: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub kind: TrackerKind,
    pub status: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub kind: Option<TrackerKind>,
    /// Member ids; snapshots are re-hydrated from the user records.
    pub member_ids: Option<Vec<String>>,
    /// Team ids; snapshots are re-hydrated from the team records.
    pub team_ids: Option<Vec<String>>,
}

/// Query filter for tracker listing.
#[derive(Debug, Clone, Default)]
pub struct TrackerQuery {
    pub name: Option<String>,
    pub workspace_id: Option<String>,
    /// Only trackers the given user is a member of.
    pub member_id: Option<String>,
    /// Only trackers the given team is embedded in.
    pub team_id: Option<String>,
}

#[derive(Clone)]
pub struct TrackerService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    sync: ReferenceSync,
    status: StatusAggregator,
    config: Config,
}

impl TrackerService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        let sync = ReferenceSync::new(Arc::clone(&store), config.sync.max_retries);
        let status = StatusAggregator::new(Arc::clone(&store), config.sync.max_retries);
        Self {
            store,
            identity,
            sync,
            status,
            config,
        }
    }

    pub fn create(&self, body: NewTracker, token: &str) -> Result<(Tracker, CascadeReport)> {
        let user = self.identity.resolve_actor(token)?;
        validate_date_range(body.start_date, body.end_date)?;

        let workspace = match &body.workspace_id {
            Some(id) => Some(self.workspace_snapshot(id)?),
            None => None,
        };
        let members = self.hydrate_members(&body.member_ids)?;
        let teams = self.hydrate_teams(&body.team_ids)?;

        let tracker = Tracker {
            id: String::new(),
            name: body.name,
            workspace,
            members,
            teams,
            sub_tasks: Vec::new(),
            milestones: Vec::new(),
            start_date: body.start_date,
            end_date: body.end_date,
            kind: body.kind,
            status: body.status,
            created_by: user.id,
            created_at: Utc::now(),
            status_bar: None,
        };
        let tracker = store::create_entity(self.store.as_ref(), EntityKind::Tracker, &tracker)?;

        let mut report = CascadeReport::default();
        if let Some(workspace) = &tracker.workspace {
            report.merge(self.sync.tracker_membership_changed(
                SyncOp::Attach,
                &workspace.id,
                &tracker.id,
            ));
        }
        Ok((tracker, report))
    }

    /// List trackers with freshly computed status bars. As a side effect the
    /// health color of every listed tracker's milestones is recomputed and
    /// written back.
    pub fn query(&self, query: TrackerQuery, options: QueryOptions) -> Result<Page<Tracker>> {
        let now = Utc::now();

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
        if let Some(team_id) = query.team_id {
            filter = filter.and(Filter::elem_match_id("teams", team_id));
        }

        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::Tracker, &filter, &options)?;

        let mut results = Vec::with_capacity(page.results.len());
        for doc in &page.results {
            let mut tracker: Tracker = doc.decode()?;
            self.status.refresh_milestone_colors(&tracker, now)?;
            tracker.status_bar = Some(self.status.tracker_status_bar(&tracker, now)?);
            results.push(tracker);
        }

        Ok(Page {
            results,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
            total_results: page.total_results,
        })
    }

    pub fn get(&self, tracker_id: &str) -> Result<Tracker> {
        let mut tracker: Tracker =
            store::require_entity(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;
        tracker.status_bar = Some(self.status.tracker_status_bar(&tracker, Utc::now())?);
        Ok(tracker)
    }

    /// Update a tracker. Member and team snapshots are re-hydrated, dates are
    /// re-validated as a pair, and a type change is rejected while children of
    /// the outgoing type still exist.
    pub fn update(&self, tracker_id: &str, update: TrackerUpdate, token: &str) -> Result<Tracker> {
        self.identity.resolve_actor(token)?;

        let members = match &update.member_ids {
            Some(ids) => Some(self.hydrate_members(ids)?),
            None => None,
        };
        let teams = match &update.team_ids {
            Some(ids) => Some(self.hydrate_teams(ids)?),
            None => None,
        };

        store::update_entity(
            self.store.as_ref(),
            EntityKind::Tracker,
            tracker_id,
            self.config.sync.max_retries,
            |tracker: &mut Tracker| {
                if let Some(kind) = update.kind {
                    if !kind.accepts_direct_sub_tasks() && !tracker.sub_tasks.is_empty() {
                        return Err(Error::Validation(
                            "tracker still has direct sub tasks".to_string(),
                        ));
                    }
                    if !kind.accepts_milestones() && !tracker.milestones.is_empty() {
                        return Err(Error::Validation(
                            "tracker still has milestones".to_string(),
                        ));
                    }
                    tracker.kind = kind;
                }

                let start = update.start_date.unwrap_or(tracker.start_date);
                let end = update.end_date.unwrap_or(tracker.end_date);
                validate_date_range(start, end)?;
                tracker.start_date = start;
                tracker.end_date = end;

                if let Some(name) = &update.name {
                    tracker.name = name.clone();
                }
                if let Some(status) = &update.status {
                    tracker.status = Some(status.clone());
                }
                if let Some(members) = &members {
                    tracker.members = members.clone();
                }
                if let Some(teams) = &teams {
                    tracker.teams = teams.clone();
                }
                Ok(())
            },
        )
    }

    /// Delete the tracker and detach it from its workspace. Milestones and
    /// sub-tasks are orphaned, not deleted.
    pub fn delete(&self, tracker_id: &str, token: &str) -> Result<(Tracker, CascadeReport)> {
        self.identity.resolve_actor(token)?;
        let tracker: Tracker =
            store::require_entity(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;
        self.store.delete(EntityKind::Tracker, tracker_id)?;

        let mut report = CascadeReport::default();
        if let Some(workspace) = &tracker.workspace {
            report.merge(self.sync.tracker_membership_changed(
                SyncOp::Detach,
                &workspace.id,
                tracker_id,
            ));
        }
        Ok((tracker, report))
    }

    /// Distribute the tracker's 0-100% budget across its milestones by day
    /// span and persist the resulting percentages.
    pub fn allocate_spans(&self, tracker_id: &str) -> Result<Vec<Milestone>> {
        let tracker: Tracker =
            store::require_entity(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;

        let mut milestones = Vec::with_capacity(tracker.milestones.len());
        for reference in &tracker.milestones {
            let milestone: Milestone =
                store::require_entity(self.store.as_ref(), EntityKind::Milestone, &reference.id)?;
            milestones.push(milestone);
        }

        allocate_milestone_spans(&tracker, &mut milestones)?;

        for milestone in &milestones {
            let percentage = milestone.percentage;
            store::update_entity(
                self.store.as_ref(),
                EntityKind::Milestone,
                &milestone.id,
                self.config.sync.max_retries,
                |current: &mut Milestone| {
                    current.percentage = percentage;
                    Ok(())
                },
            )?;
        }
        Ok(milestones)
    }

    fn hydrate_members(&self, ids: &[String]) -> Result<Vec<crate::model::MemberRef>> {
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            members.push(self.identity.member_snapshot(id, None)?);
        }
        Ok(members)
    }

    fn hydrate_teams(&self, ids: &[String]) -> Result<Vec<Team>> {
        let mut teams = Vec::with_capacity(ids.len());
        for id in ids {
            teams.push(store::require_entity(
                self.store.as_ref(),
                EntityKind::Team,
                id,
            )?);
        }
        Ok(teams)
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

// Single-day spans (end == start) are valid; only reversed ranges fail.
fn validate_date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end < start {
        return Err(Error::Validation(
            "end date must not be before start date".to_string(),
        ));
    }
    Ok(())
}
