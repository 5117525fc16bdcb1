//! Span allocation through the tracker service: percentages are computed in
//! milestone creation order and persisted.

mod support;

use support::{utc, Env};
use trackcore::milestone::NewMilestone;
use trackcore::model::TrackerKind;
use trackcore::tracker::NewTracker;

#[test]
fn allocated_spans_are_persisted_and_sum_to_one_hundred() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    // 30-day tracker with three milestones.
    let (tracker, _) = env
        .trackers
        .create(
            NewTracker {
                name: "Release".to_string(),
                workspace_id: None,
                member_ids: vec![],
                team_ids: vec![],
                start_date: utc(2024, 1, 1),
                end_date: utc(2024, 1, 31),
                kind: TrackerKind::Milestone,
                status: None,
            },
            "tok",
        )
        .unwrap();

    let spans = [
        (utc(2024, 1, 1), utc(2024, 1, 10)),
        (utc(2024, 1, 10), utc(2024, 1, 20)),
        (utc(2024, 1, 20), utc(2024, 1, 31)),
    ];
    for (index, (start, end)) in spans.into_iter().enumerate() {
        env.milestones
            .create(
                NewMilestone {
                    name: format!("Phase {}", index + 1),
                    tracker_id: tracker.id.clone(),
                    team_ids: vec![],
                    start_date: start,
                    end_date: end,
                },
                "tok",
            )
            .unwrap();
    }

    let allocated = env.trackers.allocate_spans(&tracker.id).unwrap();
    assert_eq!(allocated.len(), 3);

    let sum: f64 = allocated.iter().map(|m| m.percentage).sum();
    assert!((sum - 100.0).abs() < 1e-9);
    // First milestone covers 9 of 30 days.
    assert!((allocated[0].percentage - 30.0).abs() < 1e-9);

    // The percentages were written back.
    let persisted = env.milestones.get(&allocated[2].id).unwrap();
    assert!((persisted.percentage - allocated[2].percentage).abs() < 1e-9);
    assert!(persisted.percentage > 0.0);
}

#[test]
fn single_milestone_takes_the_whole_budget() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let (tracker, _) = env
        .trackers
        .create(
            NewTracker {
                name: "Release".to_string(),
                workspace_id: None,
                member_ids: vec![],
                team_ids: vec![],
                start_date: utc(2024, 1, 1),
                end_date: utc(2024, 1, 31),
                kind: TrackerKind::Milestone,
                status: None,
            },
            "tok",
        )
        .unwrap();
    env.milestones
        .create(
            NewMilestone {
                name: "Only".to_string(),
                tracker_id: tracker.id.clone(),
                team_ids: vec![],
                start_date: utc(2024, 1, 1),
                end_date: utc(2024, 1, 10),
            },
            "tok",
        )
        .unwrap();

    let allocated = env.trackers.allocate_spans(&tracker.id).unwrap();
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].percentage, 100.0);
}
