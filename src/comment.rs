//! Comments on trackers.
//!
//! Comments hang off trackers by reference and hold their replies inline.
//! The author snapshot is copied in at write time; only the author may delete
//! a comment. Comment counts feed the tracker status bar (each reply counts).

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{Comment, CommenterRef, EntityKind, Reference, Reply, User};
use crate::store::{self, EntityStore, Filter, Page, QueryOptions};

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn EntityStore>,
    identity: Identity,
    config: Config,
}

impl CommentService {
    pub fn new(store: Arc<dyn EntityStore>, identity: Identity, config: Config) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    pub fn create(&self, tracker_id: &str, content: &str, token: &str) -> Result<Comment> {
        let user = self.identity.resolve_actor(token)?;
        store::require(self.store.as_ref(), EntityKind::Tracker, tracker_id)?;

        let comment = Comment {
            id: String::new(),
            content: content.to_string(),
            tracker_id: Reference::new(tracker_id),
            commented_by: commenter(&user),
            replies: Vec::new(),
            created_at: Utc::now(),
        };
        store::create_entity(self.store.as_ref(), EntityKind::Comment, &comment)
    }

    /// Append a reply; replies live inside the comment document.
    pub fn add_reply(&self, comment_id: &str, content: &str, token: &str) -> Result<Comment> {
        let user = self.identity.resolve_actor(token)?;
        let reply = Reply {
            content: content.to_string(),
            replied_by: commenter(&user),
            created_at: Utc::now(),
        };

        store::update_entity(
            self.store.as_ref(),
            EntityKind::Comment,
            comment_id,
            self.config.sync.max_retries,
            |comment: &mut Comment| {
                comment.replies.push(reply.clone());
                Ok(())
            },
        )
    }

    pub fn comments_for_tracker(
        &self,
        tracker_id: &str,
        options: QueryOptions,
    ) -> Result<Page<Comment>> {
        let filter = Filter::eq("tracker_id.id", tracker_id);
        let options = self.with_default_limit(options);
        let page = self.store.query(EntityKind::Comment, &filter, &options)?;
        page.try_map(|doc| doc.decode())
    }

    pub fn get(&self, comment_id: &str) -> Result<Comment> {
        store::require_entity(self.store.as_ref(), EntityKind::Comment, comment_id)
    }

    /// Delete a comment; only its author may do so.
    pub fn delete(&self, comment_id: &str, token: &str) -> Result<Comment> {
        let user = self.identity.resolve_actor(token)?;
        let comment = self.get(comment_id)?;
        if comment.commented_by.id != user.id {
            return Err(Error::Unauthorized(
                "only the comment author may delete it".to_string(),
            ));
        }
        self.store.delete(EntityKind::Comment, comment_id)?;
        Ok(comment)
    }

    fn with_default_limit(&self, mut options: QueryOptions) -> QueryOptions {
        if options.limit.is_none() {
            options.limit = Some(self.config.query.default_limit);
        }
        options
    }
}

fn commenter(user: &User) -> CommenterRef {
    CommenterRef {
        id: user.id.clone(),
        name: user.name.clone(),
        designation: user.designation.clone(),
    }
}
