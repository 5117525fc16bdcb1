//! Milestone span allocation.
//!
//! A tracker's 0-100% completion budget is distributed across its milestones
//! in array order (creation order, never re-sorted by date), proportional to
//! each milestone's day span relative to the tracker's total day span:
//!
//! - the first milestone spans tracker start -> its own end date
//! - middle milestones span their own date range
//! - the last milestone receives whatever remains, closing the total to
//!   exactly 100
//!
//! The remainder is computed from an explicit running sum. A single milestone
//! is both first and last, so the closing rule gives it the full 100.

use crate::error::{Error, Result};
use crate::model::{Milestone, Tracker};
use crate::status::span_days;

/// Assign `percentage` to each milestone, in place. Percentages sum to
/// exactly 100 for one or more milestones.
pub fn allocate_milestone_spans(tracker: &Tracker, milestones: &mut [Milestone]) -> Result<()> {
    if milestones.is_empty() {
        return Ok(());
    }

    let total_days = span_days(tracker.start_date, tracker.end_date);
    if total_days <= 0 {
        return Err(Error::Validation(format!(
            "tracker {} has an empty date span",
            tracker.id
        )));
    }

    let last_index = milestones.len() - 1;
    let mut running_sum = 0.0;

    for (index, milestone) in milestones.iter_mut().enumerate() {
        let percentage = if index == last_index {
            100.0 - running_sum
        } else if index == 0 {
            let days = span_days(tracker.start_date, milestone.end_date);
            days as f64 / total_days as f64 * 100.0
        } else {
            let days = span_days(milestone.start_date, milestone.end_date);
            days as f64 / total_days as f64 * 100.0
        };

        milestone.percentage = percentage;
        running_sum += percentage;
    }

    Ok(())
}
