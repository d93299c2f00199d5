use chrono::TimeZone;
use mongodb::bson::{doc, Document};

use super::models::{
    AuthorModel, CommentModel, CommunityModel, MessageModel, NotificationModel, PostModel,
    ProfileModel,
};
use super::{PageCursor, PostQuery, ProfileQuery};
use crate::entities::{
    Author, ChatMessage, Comment, Community, CommunityId, Date, Notification, NotificationId,
    NotificationKind, Post, PostId, PostRef, PostStatus, Privacy, Profile, Role, UserId,
};
pub(super) fn to_millis(d: Date) -> i64 { d.timestamp_millis() }

pub(super) fn from_millis(ms: i64) -> Date {
    ::chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or(::chrono::DateTime::<::chrono::Utc>::MIN_UTC)
}

impl From<Profile> for ProfileModel {
    fn from(
        Profile {
            id,
            full_name,
            username,
            email,
            bio,
            location,
            role,
            following,
            pinned_post,
            created,
        }: Profile,
    ) -> Self {
        Self {
            id: id.0,
            full_name,
            username,
            email,
            bio,
            location,
            admin: role == Role::Admin,
            following: following.drain_to_strings(),
            pinned_post: pinned_post.map(|p| p.0),
            created: to_millis(created),
        }
    }
}

impl From<ProfileModel> for Profile {
    fn from(
        ProfileModel {
            id,
            full_name,
            username,
            email,
            bio,
            location,
            admin,
            following,
            pinned_post,
            created,
        }: ProfileModel,
    ) -> Self {
        Self {
            id: id.into(),
            full_name,
            username,
            email,
            bio,
            location,
            role: match admin {
                true => Role::Admin,
                false => Role::Member,
            },
            following: following.into_iter().map(UserId::from).collect(),
            pinned_post: pinned_post.map(PostId::from),
            created: from_millis(created),
        }
    }
}

impl From<Author> for AuthorModel {
    fn from(Author { id, name, username }: Author) -> Self {
        Self {
            id: id.0,
            name,
            username,
        }
    }
}

impl From<AuthorModel> for Author {
    fn from(AuthorModel { id, name, username }: AuthorModel) -> Self {
        Self {
            id: id.into(),
            name,
            username,
        }
    }
}

impl From<Post> for PostModel {
    fn from(
        Post {
            id,
            author,
            title,
            body,
            category,
            created,
            likes,
            reposts,
            saved_by,
            comments,
            views,
            edited,
            status,
        }: Post,
    ) -> Self {
        Self {
            id: id.0,
            author: author.into(),
            title,
            body,
            category,
            created: to_millis(created),
            likes: likes.drain_to_strings(),
            reposts: reposts.drain_to_strings(),
            saved_by: saved_by.drain_to_strings(),
            comments: comments.into_iter().map(Into::into).collect(),
            views: views as i64,
            edited,
            pending: status == PostStatus::Pending,
        }
    }
}

impl From<PostModel> for Post {
    fn from(
        PostModel {
            id,
            author,
            title,
            body,
            category,
            created,
            likes,
            reposts,
            saved_by,
            comments,
            views,
            edited,
            pending,
        }: PostModel,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            title,
            body,
            category,
            created: from_millis(created),
            likes: likes.into_iter().map(UserId::from).collect(),
            reposts: reposts.into_iter().map(UserId::from).collect(),
            saved_by: saved_by.into_iter().map(UserId::from).collect(),
            comments: comments.into_iter().map(Into::into).collect(),
            views: views.max(0) as u64,
            edited,
            status: match pending {
                true => PostStatus::Pending,
                false => PostStatus::Published,
            },
        }
    }
}

impl From<Comment> for CommentModel {
    fn from(
        Comment {
            text,
            username,
            author_id,
            created,
        }: Comment,
    ) -> Self {
        Self {
            text,
            username,
            author_id: author_id.0,
            created: to_millis(created),
        }
    }
}

impl From<CommentModel> for Comment {
    fn from(
        CommentModel {
            text,
            username,
            author_id,
            created,
        }: CommentModel,
    ) -> Self {
        Self {
            text,
            username,
            author_id: author_id.into(),
            created: from_millis(created),
        }
    }
}

pub(super) fn kind_to_str(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Like => "like",
        NotificationKind::Comment => "comment",
        NotificationKind::Follow => "follow",
    }
}

fn kind_from_str(s: &str) -> NotificationKind {
    match s {
        "comment" => NotificationKind::Comment,
        "follow" => NotificationKind::Follow,
        _ => NotificationKind::Like,
    }
}

impl From<Notification> for NotificationModel {
    fn from(
        Notification {
            id,
            recipient,
            sender,
            kind,
            post,
            created,
            read,
        }: Notification,
    ) -> Self {
        let (post_id, post_title) = match post {
            Some(PostRef { id, title }) => (Some(id.0), Some(title)),
            None => (None, None),
        };

        Self {
            id: id.0,
            recipient: recipient.0,
            sender: sender.into(),
            kind: kind_to_str(kind).to_string(),
            post_id,
            post_title,
            created: to_millis(created),
            read,
        }
    }
}

impl From<NotificationModel> for Notification {
    fn from(
        NotificationModel {
            id,
            recipient,
            sender,
            kind,
            post_id,
            post_title,
            created,
            read,
        }: NotificationModel,
    ) -> Self {
        Self {
            id: NotificationId::from(id),
            recipient: recipient.into(),
            sender: sender.into(),
            kind: kind_from_str(&kind),
            post: post_id.map(|pid| PostRef {
                id: pid.into(),
                title: post_title.unwrap_or_default(),
            }),
            created: from_millis(created),
            read,
        }
    }
}

impl From<Community> for CommunityModel {
    fn from(
        Community {
            id,
            name,
            privacy,
            members,
            creator,
            created,
        }: Community,
    ) -> Self {
        Self {
            id: id.0,
            name,
            join_code: match privacy {
                Privacy::Public => None,
                Privacy::Private { join_code } => Some(join_code),
            },
            members: members.drain_to_strings(),
            creator: creator.0,
            created: to_millis(created),
        }
    }
}

impl From<CommunityModel> for Community {
    fn from(
        CommunityModel {
            id,
            name,
            join_code,
            members,
            creator,
            created,
        }: CommunityModel,
    ) -> Self {
        Self {
            id: CommunityId::from(id),
            name,
            privacy: match join_code {
                Some(join_code) => Privacy::Private { join_code },
                None => Privacy::Public,
            },
            members: members.into_iter().map(UserId::from).collect(),
            creator: creator.into(),
            created: from_millis(created),
        }
    }
}

impl From<MessageModel> for ChatMessage {
    fn from(
        MessageModel {
            community_id: _,
            text,
            sender,
            username,
            created,
        }: MessageModel,
    ) -> Self {
        Self {
            text,
            sender: sender.into(),
            username,
            created: from_millis(created),
        }
    }
}

impl From<ProfileQuery> for Document {
    fn from(
        ProfileQuery {
            username_prefix,
            newest_first: _,
            limit: _,
        }: ProfileQuery,
    ) -> Self {
        let mut query = doc! {};

        if let Some(prefix) = username_prefix {
            let anchored = format!("^{}", ::regex::escape(&prefix));
            query.insert("username", doc! { "$regex": anchored });
        }

        query
    }
}

impl From<PostQuery> for Document {
    fn from(
        PostQuery {
            author,
            saved_by,
            status,
            text,
            newest_first: _,
            limit: _,
        }: PostQuery,
    ) -> Self {
        let mut query = doc! {};

        if let Some(id) = author {
            query.insert("author.id", id.0);
        }

        if let Some(id) = saved_by {
            query.insert("saved_by", doc! { "$in": [id.0] });
        }

        if let Some(status) = status {
            query.insert("pending", status == PostStatus::Pending);
        }

        if let Some(re) = text {
            let pattern = re.as_str();
            query.insert(
                "$or",
                vec![
                    doc! { "title": { "$regex": pattern, "$options": "i" } },
                    doc! { "body": { "$regex": pattern, "$options": "i" } },
                    doc! { "category": { "$regex": pattern, "$options": "i" } },
                ],
            );
        }

        query
    }
}

/// "Start after" rendered as a range filter over the (created, id) sort key.
pub(super) fn cursor_filter(cursor: &PageCursor) -> Document {
    let millis = to_millis(cursor.created);

    doc! { "$or": [
        { "created": { "$lt": millis } },
        { "created": millis, "id": { "$lt": cursor.id.as_str() } },
    ] }
}

trait DrainToStrings {
    fn drain_to_strings(self) -> ::std::collections::HashSet<String>;
}
impl DrainToStrings for ::std::collections::HashSet<UserId> {
    fn drain_to_strings(self) -> ::std::collections::HashSet<String> {
        self.into_iter().map(|u| u.0).collect()
    }
}
