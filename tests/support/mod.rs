//! Shared test environment: an in-memory store wired through every service,
//! with a static token table and a recording mailer.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use trackcore::comment::CommentService;
use trackcore::config::Config;
use trackcore::identity::{Identity, StaticTokens, TokenVerifier};
use trackcore::invitation::InvitationService;
use trackcore::mailer::Mailer;
use trackcore::milestone::MilestoneService;
use trackcore::model::EntityKind;
use trackcore::role::RoleService;
use trackcore::store::{EntityStore, MemoryStore};
use trackcore::subtask::SubTaskService;
use trackcore::team::TeamService;
use trackcore::tracker::TrackerService;
use trackcore::workspace::WorkspaceService;
use trackcore::Result;

/// Mailer that records every send for assertions.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl Mailer for RecordingMailer {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        let mut sent = self.sent.lock().expect("mailer mutex poisoned");
        sent.push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

pub struct Env {
    pub store: Arc<dyn EntityStore>,
    pub tokens: Arc<StaticTokens>,
    pub identity: Identity,
    pub mailer: Arc<RecordingMailer>,
    pub workspaces: WorkspaceService,
    pub teams: TeamService,
    pub trackers: TrackerService,
    pub milestones: MilestoneService,
    pub sub_tasks: SubTaskService,
    pub comments: CommentService,
    pub invitations: InvitationService,
    pub roles: RoleService,
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env(),
            )
            .with_test_writer()
            .try_init();
    });
}

impl Env {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn EntityStore>) -> Self {
        Self::build(store, Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(Arc::new(MemoryStore::new()), config)
    }

    fn build(store: Arc<dyn EntityStore>, config: Config) -> Self {
        init_tracing();
        let tokens = Arc::new(StaticTokens::new());
        let identity = Identity::new(
            Arc::clone(&store),
            Arc::clone(&tokens) as Arc<dyn TokenVerifier>,
        );
        let mailer = Arc::new(RecordingMailer::default());
        let mail_seam = Arc::clone(&mailer) as Arc<dyn Mailer>;

        Self {
            workspaces: WorkspaceService::new(
                Arc::clone(&store),
                identity.clone(),
                config.clone(),
            ),
            teams: TeamService::new(Arc::clone(&store), identity.clone(), config.clone()),
            trackers: TrackerService::new(Arc::clone(&store), identity.clone(), config.clone()),
            milestones: MilestoneService::new(
                Arc::clone(&store),
                identity.clone(),
                config.clone(),
            ),
            sub_tasks: SubTaskService::new(Arc::clone(&store), identity.clone(), config.clone()),
            comments: CommentService::new(Arc::clone(&store), identity.clone(), config.clone()),
            invitations: InvitationService::new(
                Arc::clone(&store),
                identity.clone(),
                mail_seam,
                config.clone(),
            ),
            roles: RoleService::new(Arc::clone(&store), identity.clone(), config),
            store,
            tokens,
            identity,
            mailer,
        }
    }

    /// Seed a user record and register a bearer token for it. Returns the
    /// generated user id.
    pub fn seed_user(&self, name: &str, email: &str, token: &str) -> String {
        let doc = self
            .store
            .create(
                EntityKind::User,
                json!({
                    "name": name,
                    "email": email,
                    "role": "view",
                    "isEmailVerified": true,
                }),
            )
            .expect("seed user");
        self.tokens.register(token, doc.id.clone());
        doc.id
    }
}

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}
