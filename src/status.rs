//! Derived status computation.
//!
//! Trackers, milestones and workspaces carry a derived "status bar": days
//! left, done percentage and a health color. Nothing here is hand-edited;
//! every value is recomputed from the current descendant sub-tasks on read,
//! and the persisted copy is only a cache. Milestone colors are written back
//! eagerly whenever the owning tracker is listed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    EntityKind, HealthColor, Milestone, SubTask, SubTaskStatus, Team, Tracker,
    TrackerStatusBar, Workspace, WorkspaceStatusBar,
};
use crate::store::{self, EntityStore, Filter, QueryOptions};

const MS_PER_DAY: i64 = 86_400_000;

fn ceil_days(delta_ms: i64) -> i64 {
    // Ceiling division for positive deltas; a partial day counts as a day.
    (delta_ms + MS_PER_DAY - 1).div_euclid(MS_PER_DAY)
}

/// Whole days until `end_date`, floored at 0. Absent and past end dates both
/// yield 0.
pub fn days_left(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(end) = end_date else {
        return 0;
    };
    let delta_ms = (end - now).num_milliseconds();
    if delta_ms <= 0 {
        return 0;
    }
    ceil_days(delta_ms)
}

/// Total whole days spanned by a date range (ceiling).
pub fn span_days(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    ceil_days((end - start).num_milliseconds())
}

/// Share of the span already elapsed, in percent. Zero-length spans elapse
/// nothing rather than dividing by zero.
pub fn elapsed_percentage(total_days: i64, days_left: i64) -> f64 {
    if total_days <= 0 {
        return 0.0;
    }
    (total_days - days_left) as f64 / total_days as f64 * 100.0
}

/// Done percentage with the zero-children guard: no sub-tasks means 0, never
/// NaN or infinity.
pub fn done_percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    done as f64 / total as f64 * 100.0
}

/// Health color rule, identical for trackers and milestones:
/// fully done is Green regardless of schedule, behind schedule is Red,
/// on track but incomplete is Yellow.
pub fn health_color(done_percentage: f64, elapsed_percentage: f64) -> HealthColor {
    if done_percentage == 100.0 {
        HealthColor::Green
    } else if done_percentage < elapsed_percentage {
        HealthColor::Red
    } else {
        HealthColor::Yellow
    }
}

/// Computes status bars for trackers and workspaces from their descendants.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn EntityStore>,
    max_retries: u32,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn EntityStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Count a tracker's sub-tasks: direct children plus the children of all
    /// of its milestones. Returns `(total, done)`.
    pub fn tracker_sub_task_totals(&self, tracker: &Tracker) -> Result<(usize, usize)> {
        let mut total = 0;
        let mut done = 0;

        for reference in &tracker.sub_tasks {
            let sub_task: SubTask =
                store::require_entity(self.store.as_ref(), EntityKind::SubTask, &reference.id)?;
            total += 1;
            if sub_task.status == SubTaskStatus::Done {
                done += 1;
            }
        }

        for reference in &tracker.milestones {
            let milestone: Milestone =
                store::require_entity(self.store.as_ref(), EntityKind::Milestone, &reference.id)?;
            let (milestone_total, milestone_done) = self.milestone_sub_task_totals(&milestone)?;
            total += milestone_total;
            done += milestone_done;
        }

        Ok((total, done))
    }

    fn milestone_sub_task_totals(&self, milestone: &Milestone) -> Result<(usize, usize)> {
        let mut total = 0;
        let mut done = 0;
        for reference in &milestone.sub_tasks {
            let sub_task: SubTask =
                store::require_entity(self.store.as_ref(), EntityKind::SubTask, &reference.id)?;
            total += 1;
            if sub_task.status == SubTaskStatus::Done {
                done += 1;
            }
        }
        Ok((total, done))
    }

    /// Comments on the tracker plus all of their replies.
    pub fn total_comments(&self, tracker_id: &str) -> Result<usize> {
        let filter = Filter::eq("tracker_id.id", tracker_id);
        let page = self.store.query(
            EntityKind::Comment,
            &filter,
            &QueryOptions {
                limit: Some(usize::MAX),
                ..QueryOptions::default()
            },
        )?;

        let mut total = 0;
        for doc in page.results {
            let comment: crate::model::Comment = doc.decode()?;
            total += 1 + comment.replies.len();
        }
        Ok(total)
    }

    /// Compute a tracker's status bar from its current descendants.
    pub fn tracker_status_bar(
        &self,
        tracker: &Tracker,
        now: DateTime<Utc>,
    ) -> Result<TrackerStatusBar> {
        let days_left = days_left(Some(tracker.end_date), now);
        let total_comments = self.total_comments(&tracker.id)?;
        let (total_subtask, done) = self.tracker_sub_task_totals(tracker)?;
        let done_percentage = done_percentage(done, total_subtask);

        let total_days = span_days(tracker.start_date, tracker.end_date);
        let elapsed = elapsed_percentage(total_days, days_left);
        let tracker_color = health_color(done_percentage, elapsed);

        Ok(TrackerStatusBar {
            days_left,
            total_comments,
            // View counting is not implemented.
            total_views: 0,
            total_subtask,
            done_percentage,
            tracker_color,
        })
    }

    /// Compute a milestone's health color from its own sub-tasks and dates.
    pub fn milestone_color(
        &self,
        milestone: &Milestone,
        now: DateTime<Utc>,
    ) -> Result<HealthColor> {
        let (total, done) = self.milestone_sub_task_totals(milestone)?;
        let done_percentage = done_percentage(done, total);

        let days_left = days_left(Some(milestone.end_date), now);
        let total_days = span_days(milestone.start_date, milestone.end_date);
        let elapsed = elapsed_percentage(total_days, days_left);

        Ok(health_color(done_percentage, elapsed))
    }

    /// Recompute and persist the color of every milestone under a tracker.
    /// This is the deliberate write-on-read cache refresh performed whenever
    /// a tracker is listed.
    pub fn refresh_milestone_colors(&self, tracker: &Tracker, now: DateTime<Utc>) -> Result<()> {
        for reference in &tracker.milestones {
            let milestone: Milestone =
                store::require_entity(self.store.as_ref(), EntityKind::Milestone, &reference.id)?;
            let color = self.milestone_color(&milestone, now)?;
            store::update_entity(
                self.store.as_ref(),
                EntityKind::Milestone,
                &reference.id,
                self.max_retries,
                |current: &mut Milestone| {
                    current.color = Some(color);
                    Ok(())
                },
            )?;
        }
        Ok(())
    }

    /// Compute a workspace's status bar: team/tracker/member counts, mean
    /// tracker progress, and the aggregate color.
    pub fn workspace_status_bar(
        &self,
        workspace: &Workspace,
        now: DateTime<Utc>,
    ) -> Result<WorkspaceStatusBar> {
        let mut member_ids: HashSet<String> = HashSet::new();
        for reference in &workspace.teams {
            let team: Team =
                store::require_entity(self.store.as_ref(), EntityKind::Team, &reference.id)?;
            for member in &team.members {
                member_ids.insert(member.id.clone());
            }
        }

        let mut progress_sum = 0.0;
        let mut red = 0;
        let mut green = 0;
        for reference in &workspace.trackers {
            let tracker: Tracker =
                store::require_entity(self.store.as_ref(), EntityKind::Tracker, &reference.id)?;
            let (total, done) = self.tracker_sub_task_totals(&tracker)?;
            let done_pct = done_percentage(done, total);

            let days_left = days_left(Some(tracker.end_date), now);
            let total_days = span_days(tracker.start_date, tracker.end_date);
            let elapsed = elapsed_percentage(total_days, days_left);
            match health_color(done_pct, elapsed) {
                HealthColor::Red => red += 1,
                HealthColor::Green => green += 1,
                HealthColor::Yellow => {}
            }
            progress_sum += done_pct;
        }

        let total_tracker = workspace.trackers.len();
        let workspace_progress = if total_tracker == 0 {
            0.0
        } else {
            progress_sum / total_tracker as f64
        };

        let workspace_color = if red > 0 {
            HealthColor::Red
        } else if total_tracker > 0 && green == total_tracker && workspace_progress == 100.0 {
            HealthColor::Green
        } else {
            HealthColor::Yellow
        };

        Ok(WorkspaceStatusBar {
            total_team: workspace.teams.len(),
            total_tracker,
            workspace_progress,
            workspace_color,
            total_member: member_ids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn days_left_floors_at_zero() {
        let now = utc(2024, 1, 15);
        assert_eq!(days_left(None, now), 0);
        assert_eq!(days_left(Some(utc(2024, 1, 1)), now), 0);
        assert_eq!(days_left(Some(utc(2024, 1, 15)), now), 0);
        assert_eq!(days_left(Some(utc(2024, 1, 20)), now), 5);
    }

    #[test]
    fn partial_days_round_up() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(days_left(Some(utc(2024, 1, 16)), now), 1);
        assert_eq!(days_left(Some(utc(2024, 1, 17)), now), 2);
    }

    #[test]
    fn zero_sub_tasks_is_zero_percent() {
        assert_eq!(done_percentage(0, 0), 0.0);
        assert_eq!(done_percentage(2, 4), 50.0);
    }

    #[test]
    fn fully_done_is_green_regardless_of_schedule() {
        assert_eq!(health_color(100.0, 0.0), HealthColor::Green);
        assert_eq!(health_color(100.0, 100.0), HealthColor::Green);
    }

    #[test]
    fn behind_schedule_is_red() {
        assert_eq!(health_color(20.0, 60.0), HealthColor::Red);
    }

    #[test]
    fn on_track_but_incomplete_is_yellow() {
        // 0 < 0 is false, so an untouched tracker on day one is Yellow.
        assert_eq!(health_color(0.0, 0.0), HealthColor::Yellow);
        assert_eq!(health_color(60.0, 40.0), HealthColor::Yellow);
    }

    #[test]
    fn elapsed_percentage_guards_zero_span() {
        assert_eq!(elapsed_percentage(0, 0), 0.0);
        assert_eq!(elapsed_percentage(30, 12), 60.0);
    }
}
