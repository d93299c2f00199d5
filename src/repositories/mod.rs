use std::cmp::Ordering;

use async_trait::async_trait;
use regex::Regex;

use crate::entities::{
    ChatMessage, Comment, Community, CommunityId, Date, Notification, NotificationId, Post, PostId,
    PostStatus, Privacy, Profile, UserId,
};
use crate::subscriptions::Snapshots;

pub mod mock;
pub mod mongo;

pub type Result<T> = ::std::result::Result<T, RepositoryError>;

/// One collection of profile documents keyed by user id. Set-valued fields
/// are mutated through targeted add/remove operations, never by rewriting
/// the whole document.
#[async_trait]
pub trait ProfileRepository {
    async fn insert(&self, item: Profile) -> Result<bool>;
    async fn is_exists(&self, id: &UserId) -> Result<bool>;

    async fn find(&self, id: &UserId) -> Result<Profile>;
    async fn finds(&self, query: ProfileQuery) -> Result<Vec<Profile>>;
    async fn count(&self) -> Result<u64>;

    async fn update(&self, id: &UserId, mutation: ProfileMutation) -> Result<Profile>;
    async fn set_pinned(&self, id: &UserId, post: Option<PostId>) -> Result<Profile>;

    async fn is_following(&self, id: &UserId, target: &UserId) -> Result<bool>;
    async fn insert_following(&self, id: &UserId, target: &UserId) -> Result<bool>;
    async fn delete_following(&self, id: &UserId, target: &UserId) -> Result<bool>;

    async fn delete(&self, id: &UserId) -> Result<Profile>;

    /// Standing subscription to one profile document; `None` when the
    /// document does not (or no longer does) exist.
    async fn watch(&self, id: &UserId) -> Result<Snapshots<Option<Profile>>>;
}

#[async_trait]
pub trait PostRepository {
    async fn insert(&self, item: Post) -> Result<bool>;
    async fn is_exists(&self, id: &PostId) -> Result<bool>;

    async fn find(&self, id: &PostId) -> Result<Post>;
    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>>;
    async fn count(&self, query: PostQuery) -> Result<u64>;

    /// Newest-first page in strict [`feed_order`]; `cursor` is the
    /// last-seen sort position ("start after").
    async fn page(&self, cursor: Option<PageCursor>, limit: u32) -> Result<Vec<Post>>;

    async fn update(&self, id: &PostId, mutation: PostMutation) -> Result<Post>;

    async fn is_liked(&self, id: &PostId, user: &UserId) -> Result<bool>;
    async fn insert_liked(&self, id: &PostId, user: &UserId) -> Result<bool>;
    async fn delete_liked(&self, id: &PostId, user: &UserId) -> Result<bool>;

    async fn insert_reposted(&self, id: &PostId, user: &UserId) -> Result<bool>;
    async fn delete_reposted(&self, id: &PostId, user: &UserId) -> Result<bool>;

    async fn insert_saved(&self, id: &PostId, user: &UserId) -> Result<bool>;
    async fn delete_saved(&self, id: &PostId, user: &UserId) -> Result<bool>;

    /// Append-only comment list.
    async fn push_comment(&self, id: &PostId, comment: Comment) -> Result<()>;

    /// Server-side increment; never a read-modify-write, so concurrent
    /// viewers cannot lose updates.
    async fn incr_views(&self, id: &PostId) -> Result<()>;

    async fn delete(&self, id: &PostId) -> Result<Post>;
    async fn delete_by_author(&self, author: &UserId) -> Result<u64>;

    async fn watch(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>>;
}

#[async_trait]
pub trait NotificationRepository {
    async fn insert(&self, item: Notification) -> Result<bool>;

    /// Newest-first.
    async fn finds_for(&self, recipient: &UserId) -> Result<Vec<Notification>>;

    async fn mark_read(&self, id: &NotificationId) -> Result<bool>;

    async fn delete(&self, id: &NotificationId) -> Result<Notification>;
    async fn delete_all_for(&self, recipient: &UserId) -> Result<u64>;

    async fn watch_for(&self, recipient: &UserId) -> Result<Snapshots<Vec<Notification>>>;
}

#[async_trait]
pub trait CommunityRepository {
    async fn insert(&self, item: Community) -> Result<bool>;

    async fn find(&self, id: &CommunityId) -> Result<Community>;
    async fn finds(&self) -> Result<Vec<Community>>;

    async fn set_privacy(&self, id: &CommunityId, privacy: Privacy) -> Result<Community>;

    async fn is_member(&self, id: &CommunityId, user: &UserId) -> Result<bool>;
    async fn insert_member(&self, id: &CommunityId, user: &UserId) -> Result<bool>;
    async fn delete_member(&self, id: &CommunityId, user: &UserId) -> Result<bool>;

    async fn delete(&self, id: &CommunityId) -> Result<Community>;

    /// Append-only message sub-collection, ascending by creation time.
    async fn push_message(&self, id: &CommunityId, message: ChatMessage) -> Result<ChatMessage>;
    async fn messages(&self, id: &CommunityId) -> Result<Vec<ChatMessage>>;

    async fn watch_all(&self) -> Result<Snapshots<Vec<Community>>>;
    async fn watch_messages(&self, id: &CommunityId) -> Result<Snapshots<Vec<ChatMessage>>>;
}

#[derive(Debug, Clone, Default)]
pub struct ProfileQuery {
    pub username_prefix: Option<String>,
    pub newest_first: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileMutation {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub author: Option<UserId>,
    pub saved_by: Option<UserId>,
    pub status: Option<PostStatus>,
    pub text: Option<Regex>,
    pub newest_first: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct PostMutation {
    pub body: Option<String>,
    pub edited: Option<bool>,
    pub status: Option<PostStatus>,
}

/// Sort position of the last item of a page; the next page starts strictly
/// after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created: Date,
    pub id: PostId,
}

impl PageCursor {
    pub fn of(post: &Post) -> Self {
        Self {
            created: post.created,
            id: post.id.clone(),
        }
    }
}

/// Feed ordering: descending creation time, ties broken by descending id so
/// the order is deterministic.
pub fn feed_order(a: &Post, b: &Post) -> Ordering {
    b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id))
}

/// Whether `post` sorts strictly after `cursor` in [`feed_order`].
pub fn after_cursor(post: &Post, cursor: &PageCursor) -> bool {
    match post.created.cmp(&cursor.created) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => post.id < cursor.id,
    }
}

#[derive(Debug)]
pub enum RepositoryError {
    NotFound,
    NoUnique { matched: u32 },
    Internal(anyhow::Error),
}

impl ::std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            RepositoryError::NotFound => write!(f, "cannot find object."),
            RepositoryError::NoUnique { matched } => write!(
                f,
                "expected unique object, found non-unique objects (matched: {})",
                matched
            ),
            RepositoryError::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl ::std::error::Error for RepositoryError {}
