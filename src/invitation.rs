//! Invitations.
//!
//! An invitation bundles a set of invitees with the workspace, tracker and
//! teams they are being invited into, carries an opaque link token, and is
//! delivered through the pluggable mailer. Accepting a pending invitation
//! enrolls every invitee into the invitation's teams and workspace; either
//! response is final.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::mailer::Mailer;
use crate::model::{
    EntityKind, Invitation, InvitationStatus, MemberRef, Team, Tracker, Workspace,
    WorkspaceRef,
};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

/// Fields accepted when creating an invitation.
#[derive(Debug, Clone, Default)]
pub struct NewInvitation {
    /// Invitee emails; each must belong to a registered user.
    pub member_emails: Vec<String>,
    pub workspace_id: Option<String>,
    pub tracker_id: Option<String>,
    pub team_ids: Vec<String>,
}

#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    mailer: Arc<dyn Mailer>,
    config: Config,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        identity: Identity,
        mailer: Arc<dyn Mailer>,
        config: Config,
    ) -> Self {
        Self {
            store,
            identity,
            mailer,
            config,
        }
    }

    /// Create an invitation and notify every invitee. Mail failures surface
    /// as errors after the invitation is persisted.
    pub fn create(&self, body: NewInvitation, token: &str) -> Result<Invitation> {
        let user = self.identity.resolve_actor(token)?;
        let invited_by = self.identity.member_snapshot(&user.id, None)?;
        let default_role = self.config.members.resolve_default_role()?;

        let mut members = Vec::with_capacity(body.member_emails.len());
        for email in &body.member_emails {
            let invitee = self.identity.user_by_email(email)?.ok_or_else(|| {
                Error::Validation(format!("no registered user with email {email}"))
            })?;
            members.push(self.identity.member_snapshot(&invitee.id, Some(default_role))?);
        }

        let workspace = match &body.workspace_id {
            Some(id) => {
                let workspace: Workspace =
                    store::require_entity(self.store.as_ref(), EntityKind::Workspace, id)?;
                Some(WorkspaceRef {
                    id: workspace.id,
                    name: workspace.name,
                    status: workspace.status,
                    created_by: workspace.created_by,
                    created_at: workspace.created_at,
                })
            }
            None => None,
        };
        let tracker = match &body.tracker_id {
            Some(id) => {
                let tracker: Tracker =
                    store::require_entity(self.store.as_ref(), EntityKind::Tracker, id)?;
                Some(tracker.snapshot())
            }
            None => None,
        };
        let mut teams = Vec::with_capacity(body.team_ids.len());
        for id in &body.team_ids {
            let team: Team = store::require_entity(self.store.as_ref(), EntityKind::Team, id)?;
            teams.push(team);
        }

        let invitation = Invitation {
            id: String::new(),
            token: Uuid::new_v4(),
            workspace,
            tracker,
            teams,
            members,
            invited_by: Some(invited_by),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        let invitation =
            store::create_entity(self.store.as_ref(), EntityKind::Invitation, &invitation)?;

        for member in &invitation.members {
            let subject = match &invitation.workspace {
                Some(workspace) => format!("You have been invited to {}", workspace.name),
                None => "You have been invited".to_string(),
            };
            let body = format!(
                "{} invited you. Use token {} to respond.",
                user.name, invitation.token
            );
            self.mailer.send(&member.email, &subject, &body)?;
        }

        Ok(invitation)
    }

    pub fn query(&self, options: QueryOptions) -> Result<Page<Invitation>> {
        let filter = Filter::All;
        let options = self.with_default_limit(options);
        let page = self
            .store
            .query(EntityKind::Invitation, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, invitation_id: &str) -> Result<Invitation> {
        store::require_entity(self.store.as_ref(), EntityKind::Invitation, invitation_id)
    }

    /// Look up an invitation by its link token.
    pub fn get_by_token(&self, link_token: Uuid) -> Result<Invitation> {
        let filter = Filter::eq("token", link_token.to_string());
        let page = self.store.query(
            EntityKind::Invitation,
            &filter,
            &QueryOptions::default(),
        )?;
        match page.results.into_iter().next() {
            Some(doc) => doc.decode(),
            None => Err(Error::not_found(EntityKind::Invitation, link_token.to_string())),
        }
    }

    /// Accept or reject a pending invitation. Acceptance enrolls every
    /// invitee into the invitation's teams and workspace member lists; a
    /// second response of either kind fails validation.
    pub fn respond(&self, invitation_id: &str, accept: bool) -> Result<Invitation> {
        let invitation = self.get(invitation_id)?;
        if invitation.status != InvitationStatus::Pending {
            return Err(Error::Validation(
                "invitation has already been responded to".to_string(),
            ));
        }

        if accept {
            for team in &invitation.teams {
                self.enroll_in_team(&team.id, &invitation.members)?;
            }
            if let Some(workspace) = &invitation.workspace {
                self.enroll_in_workspace(&workspace.id, &invitation.members)?;
            }
        }

        let status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Rejected
        };
        store::update_entity(
            self.store.as_ref(),
            EntityKind::Invitation,
            invitation_id,
            self.config.sync.max_retries,
            |invitation: &mut Invitation| {
                invitation.status = status;
                Ok(())
            },
        )
    }

    pub fn delete(&self, invitation_id: &str, token: &str) -> Result<Invitation> {
        self.identity.resolve_actor(token)?;
        let invitation = self.get(invitation_id)?;
        self.store.delete(EntityKind::Invitation, invitation_id)?;
        Ok(invitation)
    }

    fn enroll_in_team(&self, team_id: &str, members: &[MemberRef]) -> Result<()> {
        store::update_entity(
            self.store.as_ref(),
            EntityKind::Team,
            team_id,
            self.config.sync.max_retries,
            |team: &mut Team| {
                for member in members {
                    if !team.members.iter().any(|m| m.id == member.id) {
                        team.members.push(member.clone());
                    }
                }
                Ok(())
            },
        )
        .map(|_: Team| ())
    }

    fn enroll_in_workspace(&self, workspace_id: &str, members: &[MemberRef]) -> Result<()> {
        store::update_entity(
            self.store.as_ref(),
            EntityKind::Workspace,
            workspace_id,
            self.config.sync.max_retries,
            |workspace: &mut Workspace| {
                for member in members {
                    if !workspace.members.iter().any(|m| m.id == member.id) {
                        workspace.members.push(member.clone());
                    }
                }
                Ok(())
            },
        )
        .map(|_: Workspace| ())
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}
