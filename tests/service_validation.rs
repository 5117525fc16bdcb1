//! Domain rule enforcement across the services: tracker typing, access
//! checks, invitation lifecycle and grant uniqueness.

mod support;

use support::{utc, Env};
use trackcore::config::Config;
use trackcore::invitation::NewInvitation;
use trackcore::milestone::NewMilestone;
use trackcore::model::{GrantRole, InvitationStatus, SubTaskStatus, TrackerKind};
use trackcore::role::NewRoleGrant;
use trackcore::subtask::NewSubTask;
use trackcore::team::NewTeam;
use trackcore::tracker::NewTracker;
use trackcore::workspace::NewWorkspace;
use trackcore::Error;

fn new_tracker(name: &str, kind: TrackerKind) -> NewTracker {
    NewTracker {
        name: name.to_string(),
        workspace_id: None,
        member_ids: vec![],
        team_ids: vec![],
        start_date: utc(2024, 1, 1),
        end_date: utc(2024, 1, 31),
        kind,
        status: None,
    }
}

#[test]
fn task_based_tracker_rejects_milestones() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Sprint", TrackerKind::Task), "tok")
        .unwrap();
    let err = env
        .milestones
        .create(
            NewMilestone {
                name: "Phase 1".to_string(),
                tracker_id: tracker.id,
                team_ids: vec![],
                start_date: utc(2024, 1, 1),
                end_date: utc(2024, 1, 15),
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ref msg) if msg == "This tracker is task based"));
}

#[test]
fn milestone_based_tracker_rejects_direct_sub_tasks() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Release", TrackerKind::Milestone), "tok")
        .unwrap();
    let err = env
        .sub_tasks
        .create(
            NewSubTask {
                name: "Direct".to_string(),
                tracker_id: Some(tracker.id),
                ..Default::default()
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ref msg) if msg == "This tracker is milestone based"));
}

#[test]
fn sub_task_without_parents_is_allowed() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let (sub_task, report) = env
        .sub_tasks
        .create(
            NewSubTask {
                name: "Unfiled".to_string(),
                ..Default::default()
            },
            "tok",
        )
        .unwrap();
    assert!(report.is_clean());
    assert!(report.outcomes.is_empty());
    assert!(sub_task.tracker.is_none());
    assert!(sub_task.milestone.is_none());
}

#[test]
fn tracker_dates_must_not_run_backwards() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let mut body = new_tracker("Backwards", TrackerKind::Task);
    body.end_date = utc(2023, 12, 31);
    let err = env.trackers.create(body, "tok").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn single_day_spans_are_accepted() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let mut body = new_tracker("One day", TrackerKind::Milestone);
    body.end_date = body.start_date;
    let (tracker, _) = env.trackers.create(body, "tok").unwrap();
    assert_eq!(tracker.start_date, tracker.end_date);

    let (milestone, _) = env
        .milestones
        .create(
            NewMilestone {
                name: "Kickoff".to_string(),
                tracker_id: tracker.id,
                team_ids: vec![],
                start_date: utc(2024, 1, 1),
                end_date: utc(2024, 1, 1),
            },
            "tok",
        )
        .unwrap();
    assert_eq!(milestone.start_date, milestone.end_date);
}

#[test]
fn sub_task_status_must_be_on_the_configured_board() {
    let mut config = Config::default();
    config.sub_tasks.statuses = vec!["todo".to_string(), "done".to_string()];
    let env = Env::with_config(config);
    env.seed_user("Ada", "ada@example.com", "tok");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Sprint", TrackerKind::Task), "tok")
        .unwrap();
    let err = env
        .sub_tasks
        .create(
            NewSubTask {
                name: "Verify".to_string(),
                tracker_id: Some(tracker.id),
                status: Some(SubTaskStatus::QaTest),
                ..Default::default()
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn role_grants_are_limited_to_the_configured_roles() {
    let mut config = Config::default();
    config.members.grant_roles = vec!["view".to_string()];
    let env = Env::with_config(config);
    env.seed_user("Ada", "ada@example.com", "tok");
    let user_id = env.seed_user("Brook", "brook@example.com", "tok-b");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Sprint", TrackerKind::Task), "tok")
        .unwrap();
    let err = env
        .roles
        .create(
            NewRoleGrant {
                user_id,
                teams: vec![],
                trackers: vec![(tracker.id, GrantRole::Edit)],
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn milestone_dates_must_fit_the_tracker_span() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Release", TrackerKind::Milestone), "tok")
        .unwrap();
    let err = env
        .milestones
        .create(
            NewMilestone {
                name: "Overflow".to_string(),
                tracker_id: tracker.id,
                team_ids: vec![],
                start_date: utc(2024, 1, 20),
                end_date: utc(2024, 2, 10),
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn workspaces_are_invisible_to_non_members() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok-ada");
    env.seed_user("Brook", "brook@example.com", "tok-brook");

    let workspace = env
        .workspaces
        .create(
            NewWorkspace {
                name: "Private".to_string(),
                ..Default::default()
            },
            "tok-ada",
        )
        .unwrap();

    assert!(env.workspaces.get(&workspace.id, "tok-ada").is_ok());
    let err = env.workspaces.get(&workspace.id, "tok-brook").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let page = env
        .workspaces
        .query(Default::default(), Default::default(), "tok-brook")
        .unwrap();
    assert_eq!(page.total_results, 0);
}

#[test]
fn only_the_author_may_delete_a_comment() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok-ada");
    env.seed_user("Brook", "brook@example.com", "tok-brook");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Sprint", TrackerKind::Task), "tok-ada")
        .unwrap();
    let comment = env.comments.create(&tracker.id, "note", "tok-ada").unwrap();

    let err = env.comments.delete(&comment.id, "tok-brook").unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert!(env.comments.delete(&comment.id, "tok-ada").is_ok());
}

#[test]
fn team_creation_rejects_unknown_emails() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");

    let err = env
        .teams
        .create(
            NewTeam {
                name: "Backend".to_string(),
                member_emails: vec!["nobody@example.com".to_string()],
                ..Default::default()
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn invitation_acceptance_enrolls_members_once() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok-ada");
    let invitee_id = env.seed_user("Brook", "brook@example.com", "tok-brook");

    let workspace = env
        .workspaces
        .create(
            NewWorkspace {
                name: "Platform".to_string(),
                ..Default::default()
            },
            "tok-ada",
        )
        .unwrap();
    let (team, _) = env
        .teams
        .create(
            NewTeam {
                name: "Backend".to_string(),
                workspace_id: Some(workspace.id.clone()),
                ..Default::default()
            },
            "tok-ada",
        )
        .unwrap();

    let invitation = env
        .invitations
        .create(
            NewInvitation {
                member_emails: vec!["brook@example.com".to_string()],
                workspace_id: Some(workspace.id.clone()),
                team_ids: vec![team.id.clone()],
                ..Default::default()
            },
            "tok-ada",
        )
        .unwrap();
    assert_eq!(invitation.status, InvitationStatus::Pending);

    // The invitee got mail.
    let sent = env.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "brook@example.com");
    drop(sent);

    let accepted = env.invitations.respond(&invitation.id, true).unwrap();
    assert_eq!(accepted.status, InvitationStatus::Accepted);

    let team = env.teams.get(&team.id).unwrap();
    assert!(team.members.iter().any(|m| m.id == invitee_id));
    let workspace = env.workspaces.get(&workspace.id, "tok-ada").unwrap();
    assert!(workspace.members.iter().any(|m| m.id == invitee_id));

    // Second response of either kind is rejected.
    let err = env.invitations.respond(&invitation.id, false).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn invitation_lookup_by_link_token() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");
    env.seed_user("Brook", "brook@example.com", "tok-b");

    let invitation = env
        .invitations
        .create(
            NewInvitation {
                member_emails: vec!["brook@example.com".to_string()],
                ..Default::default()
            },
            "tok",
        )
        .unwrap();

    let found = env.invitations.get_by_token(invitation.token).unwrap();
    assert_eq!(found.id, invitation.id);
}

#[test]
fn a_user_holds_at_most_one_role_grant() {
    let env = Env::new();
    env.seed_user("Ada", "ada@example.com", "tok");
    let user_id = env.seed_user("Brook", "brook@example.com", "tok-b");

    let (tracker, _) = env
        .trackers
        .create(new_tracker("Sprint", TrackerKind::Task), "tok")
        .unwrap();

    let grant = env
        .roles
        .create(
            NewRoleGrant {
                user_id: user_id.clone(),
                teams: vec![],
                trackers: vec![(tracker.id.clone(), GrantRole::Edit)],
            },
            "tok",
        )
        .unwrap();
    assert_eq!(grant.trackers.len(), 1);
    assert_eq!(grant.trackers[0].role, GrantRole::Edit);

    let err = env
        .roles
        .create(
            NewRoleGrant {
                user_id,
                teams: vec![],
                trackers: vec![],
            },
            "tok",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn unknown_tokens_are_unauthorized() {
    let env = Env::new();
    let err = env
        .workspaces
        .create(
            NewWorkspace {
                name: "Nope".to_string(),
                ..Default::default()
            },
            "tok-missing",
        )
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}
