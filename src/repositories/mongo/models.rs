use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Stored documents. Ids are plain strings, timestamps epoch milliseconds,
/// so the feed sort `{ created: -1, id: -1 }` stays index-friendly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ProfileModel {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub location: String,
    pub admin: bool,
    pub following: HashSet<String>,
    pub pinned_post: Option<String>,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct AuthorModel {
    pub id: String,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct PostModel {
    pub id: String,
    pub author: AuthorModel,
    pub title: String,
    pub body: String,
    pub category: String,
    pub created: i64,
    pub likes: HashSet<String>,
    pub reposts: HashSet<String>,
    pub saved_by: HashSet<String>,
    pub comments: Vec<CommentModel>,
    pub views: i64,
    pub edited: bool,
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct CommentModel {
    pub text: String,
    pub username: String,
    pub author_id: String,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct NotificationModel {
    pub id: String,
    pub recipient: String,
    pub sender: AuthorModel,
    pub kind: String,
    pub post_id: Option<String>,
    pub post_title: Option<String>,
    pub created: i64,
    pub read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct CommunityModel {
    pub id: String,
    pub name: String,
    pub join_code: Option<String>,
    pub members: HashSet<String>,
    pub creator: String,
    pub created: i64,
}

/// Sub-collection documents: one message, addressed by its parent
/// community's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct MessageModel {
    pub community_id: String,
    pub text: String,
    pub sender: String,
    pub username: String,
    pub created: i64,
}
