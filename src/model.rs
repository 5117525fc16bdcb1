//! Entity records for trackcore.
//!
//! Entities are plain serde records persisted as JSON documents. Parents hold
//! lightweight references to children (`Reference`, id only) or denormalized
//! snapshots of a few fields (`MemberRef`, `TrackerRef`, ...), never live
//! pointers. Snapshot fields are copied in at write time and refreshed by the
//! reference synchronizer; derived fields (`percentage`, `color`, status bars)
//! are recomputed from current children on read and persisted only as a cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of documents held by the entity store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    Team,
    Tracker,
    Milestone,
    SubTask,
    Comment,
    Invitation,
    RoleGrant,
    User,
}

impl EntityKind {
    /// Stable snake_case name, used for store file names and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Team => "team",
            EntityKind::Tracker => "tracker",
            EntityKind::Milestone => "milestone",
            EntityKind::SubTask => "sub_task",
            EntityKind::Comment => "comment",
            EntityKind::Invitation => "invitation",
            EntityKind::RoleGrant => "role_grant",
            EntityKind::User => "user",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Workspace => "Workspace",
            EntityKind::Team => "Team",
            EntityKind::Tracker => "Tracker",
            EntityKind::Milestone => "Milestone",
            EntityKind::SubTask => "Sub task",
            EntityKind::Comment => "Comment",
            EntityKind::Invitation => "Invitation",
            EntityKind::RoleGrant => "Role grant",
            EntityKind::User => "User",
        };
        f.write_str(name)
    }
}

/// Lightweight child reference held on a parent document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// What a tracker may contain: milestones, direct sub-tasks, or both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    Milestone,
    Task,
    Both,
}

impl TrackerKind {
    pub fn accepts_milestones(&self) -> bool {
        matches!(self, TrackerKind::Milestone | TrackerKind::Both)
    }

    pub fn accepts_direct_sub_tasks(&self) -> bool {
        matches!(self, TrackerKind::Task | TrackerKind::Both)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubTaskStatus {
    Todo,
    InProgress,
    DevelopmentDone,
    QaTest,
    Done,
}

impl SubTaskStatus {
    /// Wire name, matching the serialized camelCase form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubTaskStatus::Todo => "todo",
            SubTaskStatus::InProgress => "inProgress",
            SubTaskStatus::DevelopmentDone => "developmentDone",
            SubTaskStatus::QaTest => "qaTest",
            SubTaskStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for SubTaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(SubTaskStatus::Todo),
            "inProgress" => Ok(SubTaskStatus::InProgress),
            "developmentDone" => Ok(SubTaskStatus::DevelopmentDone),
            "qaTest" => Ok(SubTaskStatus::QaTest),
            "done" => Ok(SubTaskStatus::Done),
            other => Err(crate::error::Error::Validation(format!(
                "unknown sub task status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    Pending,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Per-resource access role carried by role grants and member snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrantRole {
    Edit,
    BoardLead,
    View,
}

impl GrantRole {
    /// Wire name, matching the serialized snake_case form.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantRole::Edit => "edit",
            GrantRole::BoardLead => "board_lead",
            GrantRole::View => "view",
        }
    }
}

impl std::str::FromStr for GrantRole {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(GrantRole::Edit),
            "board_lead" => Ok(GrantRole::BoardLead),
            "view" => Ok(GrantRole::View),
            other => Err(crate::error::Error::InvalidConfig(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

/// Health indicator derived from done-vs-elapsed percentages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthColor {
    Green,
    Yellow,
    Red,
}

// =============================================================================
// Snapshots (denormalized copies of a few source fields)
// =============================================================================

/// Denormalized member fields copied onto teams, trackers and workspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    pub role: GrantRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "isEmailVerified", default)]
    pub is_email_verified: bool,
}

/// Denormalized tracker fields copied onto milestones and sub-tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerRef {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TrackerKind,
}

/// Denormalized workspace fields copied onto teams, trackers and grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Denormalized milestone fields copied onto sub-tasks. Carries the owning
/// tracker snapshot so sub-task mutations can cascade one level further up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneRef {
    pub id: String,
    pub name: String,
    pub tracker: TrackerRef,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    #[serde(default = "GrantRole::default_member_role")]
    pub role: GrantRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "isEmailVerified", default)]
    pub is_email_verified: bool,
}

impl GrantRole {
    fn default_member_role() -> GrantRole {
        GrantRole::View
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub teams: Vec<Reference>,
    #[serde(default)]
    pub trackers: Vec<Reference>,
    #[serde(default)]
    pub members: Vec<MemberRef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Derived, recomputed on every workspace list; persisted value is a cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_bar: Option<WorkspaceStatusBar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceRef>,
    #[serde(default)]
    pub members: Vec<MemberRef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracker {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceRef>,
    #[serde(default)]
    pub members: Vec<MemberRef>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(rename = "subTasks", default)]
    pub sub_tasks: Vec<Reference>,
    #[serde(default)]
    pub milestones: Vec<Reference>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TrackerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Derived, recomputed on every tracker list; persisted value is a cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_bar: Option<TrackerStatusBar>,
}

impl Tracker {
    pub fn snapshot(&self) -> TrackerRef {
        TrackerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub tracker: TrackerRef,
    #[serde(rename = "subTasks", default)]
    pub sub_tasks: Vec<Reference>,
    #[serde(default)]
    pub teams: Vec<Team>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Derived share of the tracker's timespan, assigned by the span allocator.
    #[serde(default)]
    pub percentage: f64,
    /// Derived health color, refreshed whenever the owning tracker is listed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<HealthColor>,
    #[serde(default = "MilestoneStatus::pending")]
    pub status: MilestoneStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl MilestoneStatus {
    fn pending() -> MilestoneStatus {
        MilestoneStatus::Pending
    }
}

impl Milestone {
    pub fn snapshot(&self) -> MilestoneRef {
        MilestoneRef {
            id: self.id.clone(),
            name: self.name.clone(),
            tracker: self.tracker.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set when the sub-task attaches directly to a task-capable tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerRef>,
    /// Set when the sub-task attaches through a milestone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<MilestoneRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<Team>,
    pub status: SubTaskStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Author snapshot on comments and replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommenterRef {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub replied_by: CommenterRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub tracker_id: Reference,
    pub commented_by: CommenterRef,
    #[serde(default)]
    pub replies: Vec<Reply>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    /// Opaque token carried in the invitation link.
    pub token: uuid::Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerRef>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub members: Vec<MemberRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<MemberRef>,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

/// Team-scoped access grant (role within a team of a workspace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamGrant {
    pub id: String,
    pub name: String,
    pub role: GrantRole,
    pub workspace: WorkspaceRef,
}

/// Tracker-scoped access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerGrant {
    pub id: String,
    pub name: String,
    pub role: GrantRole,
}

/// Per-user collection of access grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrant {
    pub id: String,
    pub user: MemberRef,
    #[serde(default)]
    pub teams: Vec<TeamGrant>,
    #[serde(default)]
    pub trackers: Vec<TrackerGrant>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Derived status
// =============================================================================

/// Progress and health summary for a tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerStatusBar {
    pub days_left: i64,
    pub total_comments: usize,
    /// View counting is not implemented; the field stays for wire
    /// compatibility and always reads 0.
    pub total_views: u32,
    pub total_subtask: usize,
    pub done_percentage: f64,
    pub tracker_color: HealthColor,
}

/// Progress and health summary for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceStatusBar {
    #[serde(rename = "totalTeam")]
    pub total_team: usize,
    #[serde(rename = "totalTracker")]
    pub total_tracker: usize,
    #[serde(rename = "workspaceProgress")]
    pub workspace_progress: f64,
    #[serde(rename = "workSpaceColor")]
    pub workspace_color: HealthColor,
    #[serde(rename = "totalMember")]
    pub total_member: usize,
}
