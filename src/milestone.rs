//! Milestone operations.
//!
//! Milestones only exist under milestone-capable trackers; creating one under
//! a task-only tracker fails validation. Every milestone carries a snapshot of
//! its owning tracker, and creation and deletion cascade into the tracker's
//! milestone reference list.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{EntityKind, Milestone, MilestoneStatus, Team, Tracker};
use crate::refsync::{CascadeReport, ReferenceSync};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating a milestone.
#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub name: String,
    pub tracker_id: String,
    pub team_ids: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct MilestoneUpdate {
    pub name: Option<String>,
    pub status: Option<MilestoneStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Team ids; snapshots are re-hydrated from the team records.
    pub team_ids: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct MilestoneService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    sync: ReferenceSync,
    config: Config,
}

impl MilestoneService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        let sync = ReferenceSync::new(Arc::clone(&store), config.sync.max_retries);
        Self {
            store,
            identity,
            sync,
            config,
        }
    }

    pub fn create(&self, body: NewMilestone, token: &str) -> Result<(Milestone, CascadeReport)> {
        let user = self.identity.resolve_actor(token)?;

        let tracker: Tracker =
            store::require_entity(self.store.as_ref(), EntityKind::Tracker, &body.tracker_id)?;
        if !tracker.kind.accepts_milestones() {
            return Err(Error::Validation("This tracker is task based".to_string()));
        }
        validate_dates(&tracker, body.start_date, body.end_date)?;

        let teams = self.hydrate_teams(&body.team_ids)?;
        let milestone = Milestone {
            id: String::new(),
            name: body.name,
            tracker: tracker.snapshot(),
            sub_tasks: Vec::new(),
            teams,
            start_date: body.start_date,
            end_date: body.end_date,
            percentage: 0.0,
            color: None,
            status: MilestoneStatus::Pending,
            created_by: user.id,
            created_at: Utc::now(),
        };
        let milestone =
            store::create_entity(self.store.as_ref(), EntityKind::Milestone, &milestone)?;

        let report = self.sync.milestone_created(&milestone);
        Ok((milestone, report))
    }

    pub fn query(&self, tracker_id: Option<&str>, options: QueryOptions) -> Result<Page<Milestone>> {
        let filter = match tracker_id {
            Some(id) => Filter::eq("tracker.id", id),
            None => Filter::All,
        };
        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::Milestone, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, milestone_id: &str) -> Result<Milestone> {
        store::require_entity(self.store.as_ref(), EntityKind::Milestone, milestone_id)
    }

    /// Update a milestone. Date changes are re-validated against the owning
    /// tracker's span.
    pub fn update(
        &self,
        milestone_id: &str,
        update: MilestoneUpdate,
        token: &str,
    ) -> Result<Milestone> {
        self.identity.resolve_actor(token)?;

        let teams = match &update.team_ids {
            Some(ids) => Some(self.hydrate_teams(ids)?),
            None => None,
        };

        store::update_entity(
            self.store.as_ref(),
            EntityKind::Milestone,
            milestone_id,
            self.config.sync.max_retries,
            |milestone: &mut Milestone| {
                let start = update.start_date.unwrap_or(milestone.start_date);
                let end = update.end_date.unwrap_or(milestone.end_date);
                if update.start_date.is_some() || update.end_date.is_some() {
                    let tracker: Tracker = store::require_entity(
                        self.store.as_ref(),
                        EntityKind::Tracker,
                        &milestone.tracker.id,
                    )?;
                    validate_dates(&tracker, start, end)?;
                }
                milestone.start_date = start;
                milestone.end_date = end;

                if let Some(name) = &update.name {
                    milestone.name = name.clone();
                }
                if let Some(status) = update.status {
                    milestone.status = status;
                }
                if let Some(teams) = &teams {
                    milestone.teams = teams.clone();
                }
                Ok(())
            },
        )
    }

    /// Delete the milestone and detach it from its tracker. Its sub-tasks are
    /// orphaned, not deleted.
    pub fn delete(&self, milestone_id: &str, token: &str) -> Result<(Milestone, CascadeReport)> {
        self.identity.resolve_actor(token)?;
        let milestone = self.get(milestone_id)?;
        self.store.delete(EntityKind::Milestone, milestone_id)?;
        let report = self.sync.milestone_removed(&milestone);
        Ok((milestone, report))
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

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}

// Single-day spans (end == start) are valid; only reversed ranges fail.
fn validate_dates(tracker: &Tracker, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end < start {
        return Err(Error::Validation(
            "end date must not be before start date".to_string(),
        ));
    }
    if start < tracker.start_date || end > tracker.end_date {
        return Err(Error::Validation(
            "milestone dates must fall within the tracker's date range".to_string(),
        ));
    }
    Ok(())
}
