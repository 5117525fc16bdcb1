//! Sub-task operations.
//!
//! Sub-tasks are the leaves everything else aggregates over. Each one carries
//! two independent optional parents: a task-capable tracker it attaches to
//! directly, and a milestone (which carries its own tracker snapshot, so
//! milestone-level mutations can refresh the grandparent). A sub-task may
//! hold both, either, or neither. Creation and update are batch operations;
//! each batch returns the merged cascade report.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{
    EntityKind, Milestone, MilestoneRef, SubTask, SubTaskStatus, Team, Tracker, TrackerRef,
};
use crate::refsync::{CascadeReport, ReferenceSync};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating a sub-task. `tracker_id` and `milestone_id`
/// are independent; either, both or neither may be set.
#[derive(Debug, Clone, Default)]
pub struct NewSubTask {
    pub name: String,
    pub description: Option<String>,
    pub tracker_id: Option<String>,
    pub milestone_id: Option<String>,
    /// Team the sub-task is assigned to; copied in as a snapshot.
    pub assign_to: Option<String>,
    /// Defaults to the configured board entry status.
    pub status: Option<SubTaskStatus>,
}

/// Partial update; `None` leaves the field untouched. The nested options
/// distinguish "leave alone" from "clear": `Some(None)` detaches that side.
#[derive(Debug, Clone, Default)]
pub struct SubTaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<SubTaskStatus>,
    pub assign_to: Option<Option<String>>,
    /// Re-parent onto (or detach from) a tracker.
    pub tracker_id: Option<Option<String>>,
    /// Re-parent onto (or detach from) a milestone.
    pub milestone_id: Option<Option<String>>,
}

/// Query filter for sub-task listing.
#[derive(Debug, Clone, Default)]
pub struct SubTaskQuery {
    pub tracker_id: Option<String>,
    pub milestone_id: Option<String>,
    /// Only sub-tasks assigned to the given team.
    pub assigned_team_id: Option<String>,
}

#[derive(Clone)]
pub struct SubTaskService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    sync: ReferenceSync,
    config: Config,
}

impl SubTaskService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        let sync = ReferenceSync::new(Arc::clone(&store), config.sync.max_retries);
        Self {
            store,
            identity,
            sync,
            config,
        }
    }

    /// Create a batch of sub-tasks. The whole batch is validated before the
    /// first write, so a bad entry fails the batch without partial inserts;
    /// cascade failures after the inserts are reported, not rolled back.
    pub fn create_batch(
        &self,
        batch: Vec<NewSubTask>,
        token: &str,
    ) -> Result<(Vec<SubTask>, CascadeReport)> {
        let user = self.identity.resolve_actor(token)?;
        let default_status = self.config.sub_tasks.resolve_default()?;

        let mut prepared = Vec::with_capacity(batch.len());
        for body in batch {
            prepared.push(self.prepare(body, &user.id, default_status)?);
        }

        let mut created = Vec::with_capacity(prepared.len());
        let mut report = CascadeReport::default();
        for sub_task in prepared {
            let sub_task =
                store::create_entity(self.store.as_ref(), EntityKind::SubTask, &sub_task)?;
            report.merge(self.sync.sub_task_created(&sub_task));
            created.push(sub_task);
        }
        Ok((created, report))
    }

    /// Create a single sub-task.
    pub fn create(&self, body: NewSubTask, token: &str) -> Result<(SubTask, CascadeReport)> {
        let (mut created, report) = self.create_batch(vec![body], token)?;
        Ok((created.remove(0), report))
    }

    pub fn query(&self, query: SubTaskQuery, options: QueryOptions) -> Result<Page<SubTask>> {
        let mut filter = Filter::All;
        if let Some(id) = query.tracker_id {
            filter = filter.and(Filter::eq("tracker.id", id));
        }
        if let Some(id) = query.milestone_id {
            filter = filter.and(Filter::eq("milestone.id", id));
        }
        if let Some(id) = query.assigned_team_id {
            filter = filter.and(Filter::eq("assign_to.id", id));
        }

        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::SubTask, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, sub_task_id: &str) -> Result<SubTask> {
        store::require_entity(self.store.as_ref(), EntityKind::SubTask, sub_task_id)
    }

    /// Apply updates to a batch of sub-tasks by id. Re-parenting detaches
    /// the sub-task from the parents it left and attaches it to the ones it
    /// gained; those secondary writes land in the returned report.
    pub fn update_batch(
        &self,
        batch: Vec<(String, SubTaskUpdate)>,
        token: &str,
    ) -> Result<(Vec<SubTask>, CascadeReport)> {
        self.identity.resolve_actor(token)?;

        let mut updated = Vec::with_capacity(batch.len());
        let mut report = CascadeReport::default();
        for (id, update) in batch {
            if let Some(status) = update.status {
                self.config.sub_tasks.ensure_allowed(status)?;
            }
            let assign_to = match &update.assign_to {
                Some(Some(team_id)) => Some(Some(self.team_snapshot(team_id)?)),
                Some(None) => Some(None),
                None => None,
            };
            let tracker = match &update.tracker_id {
                Some(Some(tracker_id)) => Some(Some(self.tracker_parent(tracker_id)?)),
                Some(None) => Some(None),
                None => None,
            };
            let milestone = match &update.milestone_id {
                Some(Some(milestone_id)) => Some(Some(self.milestone_parent(milestone_id)?)),
                Some(None) => Some(None),
                None => None,
            };

            let before = if tracker.is_some() || milestone.is_some() {
                Some(self.get(&id)?)
            } else {
                None
            };

            let sub_task = store::update_entity(
                self.store.as_ref(),
                EntityKind::SubTask,
                &id,
                self.config.sync.max_retries,
                |sub_task: &mut SubTask| {
                    if let Some(name) = &update.name {
                        sub_task.name = name.clone();
                    }
                    if let Some(description) = &update.description {
                        sub_task.description = Some(description.clone());
                    }
                    if let Some(status) = update.status {
                        sub_task.status = status;
                    }
                    if let Some(assign_to) = &assign_to {
                        sub_task.assign_to = assign_to.clone();
                    }
                    if let Some(tracker) = &tracker {
                        sub_task.tracker = tracker.clone();
                    }
                    if let Some(milestone) = &milestone {
                        sub_task.milestone = milestone.clone();
                    }
                    Ok(())
                },
            )?;

            if let Some(before) = before {
                report.merge(self.sync.sub_task_reparented(&before, &sub_task));
            }
            updated.push(sub_task);
        }
        Ok((updated, report))
    }

    /// Update a single sub-task.
    pub fn update(
        &self,
        sub_task_id: &str,
        update: SubTaskUpdate,
        token: &str,
    ) -> Result<(SubTask, CascadeReport)> {
        let (mut updated, report) =
            self.update_batch(vec![(sub_task_id.to_string(), update)], token)?;
        Ok((updated.remove(0), report))
    }

    /// Delete the sub-task and detach it from its parents.
    pub fn delete(&self, sub_task_id: &str, token: &str) -> Result<(SubTask, CascadeReport)> {
        self.identity.resolve_actor(token)?;
        let sub_task = self.get(sub_task_id)?;
        self.store.delete(EntityKind::SubTask, sub_task_id)?;
        let report = self.sync.sub_task_removed(&sub_task);
        Ok((sub_task, report))
    }

    fn prepare(
        &self,
        body: NewSubTask,
        user_id: &str,
        default_status: SubTaskStatus,
    ) -> Result<SubTask> {
        let tracker = match &body.tracker_id {
            Some(tracker_id) => Some(self.tracker_parent(tracker_id)?),
            None => None,
        };
        let milestone = match &body.milestone_id {
            Some(milestone_id) => Some(self.milestone_parent(milestone_id)?),
            None => None,
        };

        let assign_to = match &body.assign_to {
            Some(team_id) => Some(self.team_snapshot(team_id)?),
            None => None,
        };
        let status = match body.status {
            Some(status) => {
                self.config.sub_tasks.ensure_allowed(status)?;
                status
            }
            None => default_status,
        };

        Ok(SubTask {
            id: String::new(),
            name: body.name,
            description: body.description,
            tracker,
            milestone,
            assign_to,
            status,
            created_by: user_id.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Snapshot a tracker for direct attachment; the tracker must accept
    /// direct sub-tasks.
    fn tracker_parent(&self, tracker_id: &str) -> Result<TrackerRef> {
        let tracker: Tracker =
            store::require_entity(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;
        if !tracker.kind.accepts_direct_sub_tasks() {
            return Err(Error::Validation(
                "This tracker is milestone based".to_string(),
            ));
        }
        Ok(tracker.snapshot())
    }

    /// Snapshot a milestone for attachment; its owning tracker must be
    /// milestone-capable.
    fn milestone_parent(&self, milestone_id: &str) -> Result<MilestoneRef> {
        let milestone: Milestone =
            store::require_entity(self.store.as_ref(), EntityKind::Milestone, milestone_id)?;
        if !milestone.tracker.kind.accepts_milestones() {
            return Err(Error::Validation("This tracker is task based".to_string()));
        }
        Ok(milestone.snapshot())
    }

    fn team_snapshot(&self, team_id: &str) -> Result<Team> {
        store::require_entity(self.store.as_ref(), EntityKind::Team, team_id)
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}
