//! Reference synchronization.
//!
//! Parents hold lists of lightweight child references; every child create,
//! update or delete must patch those lists. The synchronizer owns the three
//! primitive operations (attach, detach, snapshot replace) and the cascade
//! rules that chain them: sub-task -> tracker and/or milestone, milestone ->
//! tracker, team/tracker -> workspace. A milestone-level child mutation also
//! refreshes the owning tracker's milestone list one level up.
//!
//! Consistency model: the primary mutation has already committed when a
//! cascade runs. Cascade writes are synchronous and reported - every outcome
//! lands in a `CascadeReport` and failures are additionally logged - but they
//! never roll the primary mutation back. Read-modify-write cycles retry on
//! version conflicts up to the configured bound.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::{EntityKind, Milestone, SubTask};
use crate::store::{self, EntityStore, Filter, QueryOptions};

/// Primitive synchronization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Attach,
    Detach,
    Refresh,
}

impl std::fmt::Display for SyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncOp::Attach => "attach",
            SyncOp::Detach => "detach",
            SyncOp::Refresh => "refresh",
        };
        f.write_str(name)
    }
}

/// Outcome of one secondary (cascade) write.
#[derive(Debug)]
pub struct CascadeOutcome {
    pub op: SyncOp,
    pub parent_kind: EntityKind,
    pub parent_id: String,
    pub error: Option<Error>,
}

/// Report covering every secondary write a cascade attempted.
///
/// The triggering mutation is never rolled back; callers inspect the report
/// to learn which parent reference lists could not be patched.
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub outcomes: Vec<CascadeOutcome>,
}

impl CascadeReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CascadeOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
    }

    pub fn merge(&mut self, other: CascadeReport) {
        self.outcomes.extend(other.outcomes);
    }

    fn record(
        &mut self,
        op: SyncOp,
        parent_kind: EntityKind,
        parent_id: &str,
        result: Result<()>,
    ) {
        let error = match result {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    op = %op,
                    parent = parent_kind.as_str(),
                    parent_id,
                    error = %err,
                    "cascade write failed"
                );
                Some(err)
            }
        };
        self.outcomes.push(CascadeOutcome {
            op,
            parent_kind,
            parent_id: parent_id.to_string(),
            error,
        });
    }
}

/// Which reference list on a parent holds children of a given kind.
fn ref_list_field(parent: EntityKind, child: EntityKind) -> Result<&'static str> {
    match (parent, child) {
        (EntityKind::Tracker, EntityKind::SubTask) => Ok("subTasks"),
        (EntityKind::Tracker, EntityKind::Milestone) => Ok("milestones"),
        (EntityKind::Milestone, EntityKind::SubTask) => Ok("subTasks"),
        (EntityKind::Workspace, EntityKind::Team) => Ok("teams"),
        (EntityKind::Workspace, EntityKind::Tracker) => Ok("trackers"),
        (EntityKind::Tracker, EntityKind::Team) => Ok("teams"),
        (EntityKind::Milestone, EntityKind::Team) => Ok("teams"),
        _ => Err(Error::Validation(format!(
            "{parent} does not hold references to {child}"
        ))),
    }
}

fn list_entries(body: &mut Value, field: &str) -> Vec<Value> {
    match body.get_mut(field) {
        Some(Value::Array(items)) => std::mem::take(items),
        _ => Vec::new(),
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

/// Keeps parent-held reference lists consistent with actual child membership.
#[derive(Clone)]
pub struct ReferenceSync {
    store: Arc<dyn EntityStore>,
    max_retries: u32,
}

impl ReferenceSync {
    pub fn new(store: Arc<dyn EntityStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Append `{id}` to the parent's reference list unless already present.
    ///
    /// Set semantics keyed by id: idempotent, insertion order preserved, new
    /// entries go at the end.
    pub fn attach_child(
        &self,
        parent_kind: EntityKind,
        parent_id: &str,
        child_kind: EntityKind,
        child_id: &str,
    ) -> Result<()> {
        let field = ref_list_field(parent_kind, child_kind)?;
        self.modify_list(parent_kind, parent_id, field, |mut entries| {
            if entries.iter().any(|entry| entry_id(entry) == Some(child_id)) {
                return entries;
            }
            entries.push(json!({ "id": child_id }));
            entries
        })
    }

    /// Remove the child's entry by string-equality on id. No-op when absent.
    pub fn detach_child(
        &self,
        parent_kind: EntityKind,
        parent_id: &str,
        child_kind: EntityKind,
        child_id: &str,
    ) -> Result<()> {
        let field = ref_list_field(parent_kind, child_kind)?;
        self.modify_list(parent_kind, parent_id, field, |mut entries| {
            entries.retain(|entry| entry_id(entry) != Some(child_id));
            entries
        })
    }

    /// Replace a child's denormalized snapshot in place, without altering
    /// membership or order. No-op when the child is not referenced.
    pub fn replace_child_snapshot(
        &self,
        parent_kind: EntityKind,
        parent_id: &str,
        child_kind: EntityKind,
        child_id: &str,
        snapshot: Value,
    ) -> Result<()> {
        let field = ref_list_field(parent_kind, child_kind)?;
        self.modify_list(parent_kind, parent_id, field, |mut entries| {
            for entry in entries.iter_mut() {
                if entry_id(entry) == Some(child_id) {
                    *entry = snapshot.clone();
                }
            }
            entries
        })
    }

    /// Rebuild a tracker's milestone reference list from the milestones that
    /// currently point at it. Existing order is preserved for surviving ids;
    /// newly discovered milestones append at the end.
    pub fn refresh_tracker_milestones(&self, tracker_id: &str) -> Result<()> {
        let filter = Filter::eq("tracker.id", tracker_id);
        let page = self.store.query(
            EntityKind::Milestone,
            &filter,
            &QueryOptions {
                limit: Some(usize::MAX),
                ..QueryOptions::default()
            },
        )?;
        let current_ids: Vec<String> = page.results.into_iter().map(|doc| doc.id).collect();

        self.modify_list(EntityKind::Tracker, tracker_id, "milestones", |entries| {
            let mut refreshed: Vec<Value> = entries
                .iter()
                .filter_map(entry_id)
                .filter(|id| current_ids.iter().any(|current| current == id))
                .map(|id| json!({ "id": id }))
                .collect();
            for id in &current_ids {
                let known = refreshed
                    .iter()
                    .any(|entry| entry_id(entry) == Some(id.as_str()));
                if !known {
                    refreshed.push(json!({ "id": id }));
                }
            }
            refreshed
        })
    }

    fn modify_list(
        &self,
        parent_kind: EntityKind,
        parent_id: &str,
        field: &str,
        rewrite: impl Fn(Vec<Value>) -> Vec<Value>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut doc = store::require(self.store.as_ref(), parent_kind, parent_id)?;
            let entries = list_entries(&mut doc.body, field);
            let rewritten = rewrite(entries);
            if let Value::Object(ref mut map) = doc.body {
                map.insert(field.to_string(), Value::Array(rewritten));
            }
            match self.store.save(&doc) {
                Ok(_) => return Ok(()),
                Err(err) if err.is_version_conflict() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        parent = parent_kind.as_str(),
                        parent_id,
                        field,
                        attempt,
                        "reference list write conflicted, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    // =========================================================================
    // Cascade entry points
    // =========================================================================

    /// Cascade for a newly created sub-task: attach to whichever of tracker
    /// and milestone is set; a milestone attachment also refreshes the
    /// grandparent tracker's milestone list.
    pub fn sub_task_created(&self, sub_task: &SubTask) -> CascadeReport {
        self.sub_task_cascade(sub_task, SyncOp::Attach)
    }

    /// Cascade for a deleted sub-task: detach from its parents and refresh
    /// the grandparent tracker when a milestone was involved.
    pub fn sub_task_removed(&self, sub_task: &SubTask) -> CascadeReport {
        self.sub_task_cascade(sub_task, SyncOp::Detach)
    }

    fn sub_task_cascade(&self, sub_task: &SubTask, op: SyncOp) -> CascadeReport {
        let mut report = CascadeReport::default();

        if let Some(tracker) = &sub_task.tracker {
            let result = self.apply(
                op,
                EntityKind::Tracker,
                &tracker.id,
                EntityKind::SubTask,
                &sub_task.id,
            );
            report.record(op, EntityKind::Tracker, &tracker.id, result);
        }

        if let Some(milestone) = &sub_task.milestone {
            let result = self.apply(
                op,
                EntityKind::Milestone,
                &milestone.id,
                EntityKind::SubTask,
                &sub_task.id,
            );
            report.record(op, EntityKind::Milestone, &milestone.id, result);

            // The milestone set on the tracker did not change, but the source
            // of truth is re-read eagerly after any milestone-level mutation.
            let tracker_id = &milestone.tracker.id;
            let result = self.refresh_tracker_milestones(tracker_id);
            report.record(SyncOp::Refresh, EntityKind::Tracker, tracker_id, result);
        }

        report
    }

    /// Cascade for a re-parented sub-task: detach from the parents it left,
    /// attach to the parents it gained. A milestone move also refreshes the
    /// affected grandparent trackers' milestone lists. Parents that did not
    /// change are left alone.
    pub fn sub_task_reparented(&self, before: &SubTask, after: &SubTask) -> CascadeReport {
        let mut report = CascadeReport::default();

        let old_tracker = before.tracker.as_ref().map(|tracker| tracker.id.as_str());
        let new_tracker = after.tracker.as_ref().map(|tracker| tracker.id.as_str());
        if old_tracker != new_tracker {
            if let Some(tracker_id) = old_tracker {
                let result = self.detach_child(
                    EntityKind::Tracker,
                    tracker_id,
                    EntityKind::SubTask,
                    &before.id,
                );
                report.record(SyncOp::Detach, EntityKind::Tracker, tracker_id, result);
            }
            if let Some(tracker_id) = new_tracker {
                let result = self.attach_child(
                    EntityKind::Tracker,
                    tracker_id,
                    EntityKind::SubTask,
                    &after.id,
                );
                report.record(SyncOp::Attach, EntityKind::Tracker, tracker_id, result);
            }
        }

        let old_milestone = before.milestone.as_ref();
        let new_milestone = after.milestone.as_ref();
        let milestone_changed = old_milestone.map(|milestone| milestone.id.as_str())
            != new_milestone.map(|milestone| milestone.id.as_str());
        if milestone_changed {
            if let Some(milestone) = old_milestone {
                let result = self.detach_child(
                    EntityKind::Milestone,
                    &milestone.id,
                    EntityKind::SubTask,
                    &before.id,
                );
                report.record(SyncOp::Detach, EntityKind::Milestone, &milestone.id, result);

                let tracker_id = &milestone.tracker.id;
                let result = self.refresh_tracker_milestones(tracker_id);
                report.record(SyncOp::Refresh, EntityKind::Tracker, tracker_id, result);
            }
            if let Some(milestone) = new_milestone {
                let result = self.attach_child(
                    EntityKind::Milestone,
                    &milestone.id,
                    EntityKind::SubTask,
                    &after.id,
                );
                report.record(SyncOp::Attach, EntityKind::Milestone, &milestone.id, result);

                let tracker_id = &milestone.tracker.id;
                let result = self.refresh_tracker_milestones(tracker_id);
                report.record(SyncOp::Refresh, EntityKind::Tracker, tracker_id, result);
            }
        }

        report
    }

    /// Cascade for a created milestone: attach to its owning tracker.
    pub fn milestone_created(&self, milestone: &Milestone) -> CascadeReport {
        let mut report = CascadeReport::default();
        let tracker_id = &milestone.tracker.id;
        let result = self.attach_child(
            EntityKind::Tracker,
            tracker_id,
            EntityKind::Milestone,
            &milestone.id,
        );
        report.record(SyncOp::Attach, EntityKind::Tracker, tracker_id, result);
        report
    }

    /// Cascade for a deleted milestone: detach from its owning tracker.
    pub fn milestone_removed(&self, milestone: &Milestone) -> CascadeReport {
        let mut report = CascadeReport::default();
        let tracker_id = &milestone.tracker.id;
        let result = self.detach_child(
            EntityKind::Tracker,
            tracker_id,
            EntityKind::Milestone,
            &milestone.id,
        );
        report.record(SyncOp::Detach, EntityKind::Tracker, tracker_id, result);
        report
    }

    /// Cascade for team membership changes on a workspace.
    pub fn team_membership_changed(
        &self,
        op: SyncOp,
        workspace_id: &str,
        team_id: &str,
    ) -> CascadeReport {
        let mut report = CascadeReport::default();
        let result = self.apply(
            op,
            EntityKind::Workspace,
            workspace_id,
            EntityKind::Team,
            team_id,
        );
        report.record(op, EntityKind::Workspace, workspace_id, result);
        report
    }

    /// Cascade for tracker membership changes on a workspace.
    pub fn tracker_membership_changed(
        &self,
        op: SyncOp,
        workspace_id: &str,
        tracker_id: &str,
    ) -> CascadeReport {
        let mut report = CascadeReport::default();
        let result = self.apply(
            op,
            EntityKind::Workspace,
            workspace_id,
            EntityKind::Tracker,
            tracker_id,
        );
        report.record(op, EntityKind::Workspace, workspace_id, result);
        report
    }

    /// Propagate a team's changed denormalized fields to every tracker and
    /// milestone holding a snapshot of it. Membership and order are untouched.
    pub fn team_snapshot_changed(&self, team_id: &str, snapshot: Value) -> CascadeReport {
        let mut report = CascadeReport::default();
        for kind in [EntityKind::Tracker, EntityKind::Milestone] {
            let filter = Filter::elem_match_id("teams", team_id);
            let page = match self.store.query(
                kind,
                &filter,
                &QueryOptions {
                    limit: Some(usize::MAX),
                    ..QueryOptions::default()
                },
            ) {
                Ok(page) => page,
                Err(err) => {
                    report.record(SyncOp::Refresh, kind, "*", Err(err));
                    continue;
                }
            };
            for doc in page.results {
                let result = self.replace_child_snapshot(
                    kind,
                    &doc.id,
                    EntityKind::Team,
                    team_id,
                    snapshot.clone(),
                );
                report.record(SyncOp::Refresh, kind, &doc.id, result);
            }
        }
        report
    }

    fn apply(
        &self,
        op: SyncOp,
        parent_kind: EntityKind,
        parent_id: &str,
        child_kind: EntityKind,
        child_id: &str,
    ) -> Result<()> {
        match op {
            SyncOp::Attach => self.attach_child(parent_kind, parent_id, child_kind, child_id),
            SyncOp::Detach => self.detach_child(parent_kind, parent_id, child_kind, child_id),
            SyncOp::Refresh => Err(Error::InvalidArgument(
                "refresh is not an attach/detach operation".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn sync_with_tracker() -> (ReferenceSync, Arc<dyn EntityStore>, String) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let tracker = store
            .create(
                EntityKind::Tracker,
                json!({ "name": "t", "subTasks": [], "milestones": [] }),
            )
            .unwrap();
        (ReferenceSync::new(Arc::clone(&store), 3), store, tracker.id)
    }

    fn sub_task_ids(store: &dyn EntityStore, tracker_id: &str) -> Vec<String> {
        let doc = store.get(EntityKind::Tracker, tracker_id).unwrap().unwrap();
        doc.body["subTasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn attach_is_idempotent_and_appends_at_end() {
        let (sync, store, tracker_id) = sync_with_tracker();

        sync.attach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, "s1")
            .unwrap();
        sync.attach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, "s2")
            .unwrap();
        sync.attach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, "s1")
            .unwrap();

        assert_eq!(sub_task_ids(store.as_ref(), &tracker_id), vec!["s1", "s2"]);
    }

    #[test]
    fn detach_absent_id_is_a_silent_noop() {
        let (sync, store, tracker_id) = sync_with_tracker();

        sync.attach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, "s1")
            .unwrap();
        sync.detach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, "s9")
            .unwrap();

        assert_eq!(sub_task_ids(store.as_ref(), &tracker_id), vec!["s1"]);
    }

    #[test]
    fn snapshot_replacement_preserves_order() {
        let (sync, store, tracker_id) = sync_with_tracker();

        for id in ["s1", "s2", "s3"] {
            sync.attach_child(EntityKind::Tracker, &tracker_id, EntityKind::SubTask, id)
                .unwrap();
        }
        sync.replace_child_snapshot(
            EntityKind::Tracker,
            &tracker_id,
            EntityKind::SubTask,
            "s2",
            json!({ "id": "s2", "name": "renamed" }),
        )
        .unwrap();

        let doc = store
            .get(EntityKind::Tracker, &tracker_id)
            .unwrap()
            .unwrap();
        let entries = doc.body["subTasks"].as_array().unwrap();
        assert_eq!(entries[1]["name"], "renamed");
        assert_eq!(
            sub_task_ids(store.as_ref(), &tracker_id),
            vec!["s1", "s2", "s3"]
        );
    }

    #[test]
    fn missing_parent_names_the_entity_kind() {
        let (sync, _store, _) = sync_with_tracker();
        let err = sync
            .attach_child(EntityKind::Tracker, "missing", EntityKind::SubTask, "s1")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: EntityKind::Tracker,
                ..
            }
        ));
    }

    #[test]
    fn unrelated_parent_child_pair_is_rejected() {
        let (sync, _store, tracker_id) = sync_with_tracker();
        let err = sync
            .attach_child(
                EntityKind::Tracker,
                &tracker_id,
                EntityKind::Workspace,
                "w1",
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn refresh_rebuilds_from_current_children() {
        let (sync, store, tracker_id) = sync_with_tracker();

        let milestone = store
            .create(
                EntityKind::Milestone,
                json!({ "name": "m1", "tracker": { "id": tracker_id } }),
            )
            .unwrap();
        // Stale entry for a milestone that no longer exists.
        sync.attach_child(
            EntityKind::Tracker,
            &tracker_id,
            EntityKind::Milestone,
            "gone",
        )
        .unwrap();

        sync.refresh_tracker_milestones(&tracker_id).unwrap();

        let doc = store
            .get(EntityKind::Tracker, &tracker_id)
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = doc.body["milestones"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![milestone.id.as_str()]);
    }
}
