use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Date = DateTime<Utc>;

macro_rules! id_types {
    ($($name:ident),* $(,)?) => {$(
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self { Self(::uuid::Uuid::new_v4().to_string()) }

            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self { Self(s) }
        }
    )*};
}

id_types![UserId, PostId, NotificationId, CommunityId];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub location: String,
    pub role: Role,
    pub following: HashSet<UserId>,
    pub pinned_post: Option<PostId>,
    pub created: Date,
}

impl Profile {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

/// Denormalized author block carried on posts and notifications so
/// rendering never needs a profile lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    pub username: String,
}

impl From<&Profile> for Author {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id.clone(),
            name: p.full_name.clone(),
            username: p.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author: Author,
    pub title: String,
    pub body: String,
    pub category: String,
    pub created: Date,
    pub likes: HashSet<UserId>,
    pub reposts: HashSet<UserId>,
    pub saved_by: HashSet<UserId>,
    pub comments: Vec<Comment>,
    pub views: u64,
    pub edited: bool,
    pub status: PostStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostStatus {
    Published,
    /// Held for admin moderation.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    pub username: String,
    pub author_id: UserId,
    pub created: Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub sender: Author,
    pub kind: NotificationKind,
    pub post: Option<PostRef>,
    pub created: Date,
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: PostId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub privacy: Privacy,
    pub members: HashSet<UserId>,
    pub creator: UserId,
    pub created: Date,
}

impl Community {
    pub fn is_member(&self, user: &UserId) -> bool { self.members.contains(user) }
}

/// A private community always carries its join code; a public one cannot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privacy {
    Public,
    Private { join_code: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender: UserId,
    pub username: String,
    pub created: Date,
}
