use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;

use crate::auth::Identity;
use crate::entities::{
    Author, Comment, Notification, NotificationId, NotificationKind, Post, PostId, PostRef,
    PostStatus, Profile, Role, UserId,
};
use crate::repositories::{
    CommunityRepository, NotificationRepository, PostQuery, PostRepository, ProfileMutation,
    ProfileQuery, ProfileRepository,
};
use crate::utils::{is_blank, AlsoChain};

/// Application-service layer: every user interaction is one method here.
/// Each mutating method follows the same shape — compute the transition,
/// issue the targeted remote write, and fan out a notification only on the
/// not-present → present transition, never to oneself.
pub struct Handler {
    pub profile_repository: Arc<dyn ProfileRepository + Sync + Send>,
    pub post_repository: Arc<dyn PostRepository + Sync + Send>,
    pub notification_repository: Arc<dyn NotificationRepository + Sync + Send>,
    pub community_repository: Arc<dyn CommunityRepository + Sync + Send>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileSetupForm {
    pub full_name: String,
    pub username: String,
    pub bio: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
    pub category: String,
}

impl Handler {
    #[tracing::instrument(skip(self))]
    pub async fn create_profile(&self, identity: &Identity, form: ProfileSetupForm) -> Result<Profile> {
        let ProfileSetupForm {
            full_name,
            username,
            bio,
            location,
        } = form;

        if is_blank(&full_name) || is_blank(&username) {
            bail!("full name and username are required.");
        }

        let new_profile = Profile {
            id: identity.uid.clone(),
            full_name,
            username,
            email: identity.email.clone(),
            bio,
            location,
            role: Role::Member,
            following: Default::default(),
            pinned_post: None,
            created: Utc::now(),
        };

        let can_insert = self.profile_repository.insert(new_profile.clone()).await?;
        if !can_insert {
            bail!("already registered.");
        }

        Ok(new_profile.also_(|p| tracing::trace!("created profile - {}", p.id)))
    }

    pub async fn update_profile(&self, id: &UserId, mutation: ProfileMutation) -> Result<Profile> {
        Ok(self.profile_repository.update(id, mutation).await?)
    }

    #[tracing::instrument(skip(self, author))]
    pub async fn publish_post(&self, author: &Profile, draft: PostDraft) -> Result<Post> {
        let PostDraft {
            title,
            body,
            category,
        } = draft;

        if is_blank(&title) || is_blank(&body) {
            bail!("title and body are required.");
        }

        let new_post = Post {
            id: PostId::generate(),
            author: Author::from(author),
            title,
            body,
            category,
            created: Utc::now(),
            likes: Default::default(),
            reposts: Default::default(),
            saved_by: Default::default(),
            comments: vec![],
            views: 0,
            edited: false,
            status: PostStatus::Published,
        };

        let can_insert = self.post_repository.insert(new_post.clone()).await?;
        if !can_insert {
            bail!("post id collision.");
        }

        Ok(new_post.also_(|p| tracing::trace!("published post - {}", p.id)))
    }

    /// Returns the new membership state: `true` when the toggle liked the
    /// post. The notification rides the false→true transition reported by
    /// the set-add itself, so concurrent toggles cannot double-notify.
    #[tracing::instrument(skip(self, actor, post))]
    pub async fn toggle_like(&self, actor: &Profile, post: &Post) -> Result<bool> {
        if post.likes.contains(&actor.id) {
            self.post_repository.delete_liked(&post.id, &actor.id).await?;
            return Ok(false);
        }

        let inserted = self.post_repository.insert_liked(&post.id, &actor.id).await?;

        if inserted && post.author.id != actor.id {
            self.notify(
                post.author.id.clone(),
                Author::from(actor),
                NotificationKind::Like,
                Some(PostRef {
                    id: post.id.clone(),
                    title: post.title.clone(),
                }),
            )
            .await?;
        }

        Ok(true)
    }

    pub async fn toggle_repost(&self, actor: &UserId, post: &Post) -> Result<bool> {
        match post.reposts.contains(actor) {
            true => {
                self.post_repository.delete_reposted(&post.id, actor).await?;
                Ok(false)
            }
            false => {
                self.post_repository.insert_reposted(&post.id, actor).await?;
                Ok(true)
            }
        }
    }

    pub async fn toggle_bookmark(&self, actor: &UserId, post: &Post) -> Result<bool> {
        match post.saved_by.contains(actor) {
            true => {
                self.post_repository.delete_saved(&post.id, actor).await?;
                Ok(false)
            }
            false => {
                self.post_repository.insert_saved(&post.id, actor).await?;
                Ok(true)
            }
        }
    }

    #[tracing::instrument(skip(self, actor, post))]
    pub async fn add_comment(&self, actor: &Profile, post: &Post, text: &str) -> Result<Comment> {
        if is_blank(text) {
            bail!("comment text is required.");
        }

        let comment = Comment {
            text: text.to_string(),
            username: actor.username.clone(),
            author_id: actor.id.clone(),
            created: Utc::now(),
        };

        self.post_repository
            .push_comment(&post.id, comment.clone())
            .await?;

        if post.author.id != actor.id {
            self.notify(
                post.author.id.clone(),
                Author::from(actor),
                NotificationKind::Comment,
                Some(PostRef {
                    id: post.id.clone(),
                    title: post.title.clone(),
                }),
            )
            .await?;
        }

        Ok(comment)
    }

    #[tracing::instrument(skip(self, actor, target))]
    pub async fn toggle_follow(&self, actor: &Profile, target: &Profile) -> Result<bool> {
        if actor.id == target.id {
            bail!("cannot follow yourself.");
        }

        if actor.following.contains(&target.id) {
            self.profile_repository
                .delete_following(&actor.id, &target.id)
                .await?;
            return Ok(false);
        }

        let inserted = self
            .profile_repository
            .insert_following(&actor.id, &target.id)
            .await?;

        if inserted {
            self.notify(
                target.id.clone(),
                Author::from(actor),
                NotificationKind::Follow,
                None,
            )
            .await?;
        }

        Ok(true)
    }

    pub async fn edit_post(&self, actor: &UserId, post: &Post, body: &str) -> Result<Post> {
        if post.author.id != *actor {
            bail!("only the author can edit a post.");
        }
        if is_blank(body) {
            bail!("post body is required.");
        }
        if body == post.body {
            bail!("nothing changed.");
        }

        let updated = self
            .post_repository
            .update(
                &post.id,
                crate::repositories::PostMutation {
                    body: Some(body.to_string()),
                    edited: Some(true),
                    status: None,
                },
            )
            .await?;

        Ok(updated)
    }

    /// Permanent. The caller is responsible for the explicit confirm step.
    pub async fn delete_post(&self, actor: &UserId, post: &Post) -> Result<Post> {
        if post.author.id != *actor {
            bail!("only the author can delete a post.");
        }

        Ok(self.post_repository.delete(&post.id).await?)
    }

    /// At most one pinned post per user; pinning another post replaces the
    /// current one outright. Returns the new pinned id, `None` after unpin.
    pub async fn toggle_pin(&self, actor: &Profile, post: &Post) -> Result<Option<PostId>> {
        if post.author.id != actor.id {
            bail!("can only pin your own post.");
        }

        let new_pinned = match actor.pinned_post.as_ref() == Some(&post.id) {
            true => None,
            false => Some(post.id.clone()),
        };

        self.profile_repository
            .set_pinned(&actor.id, new_pinned.clone())
            .await?;

        Ok(new_pinned)
    }

    /// Opening the detail view counts exactly one view, server-side.
    pub async fn open_post(&self, id: &PostId) -> Result<Post> {
        self.post_repository.incr_views(id).await?;

        Ok(self.post_repository.find(id).await?)
    }

    async fn notify(
        &self,
        recipient: UserId,
        sender: Author,
        kind: NotificationKind,
        post: Option<PostRef>,
    ) -> Result<()> {
        let notification = Notification {
            id: NotificationId::generate(),
            recipient,
            sender,
            kind,
            post,
            created: Utc::now(),
            read: false,
        };

        self.notification_repository.insert(notification).await?;
        Ok(())
    }

    pub async fn notifications_for(&self, recipient: &UserId) -> Result<Vec<Notification>> {
        Ok(self.notification_repository.finds_for(recipient).await?)
    }

    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<bool> {
        Ok(self.notification_repository.mark_read(id).await?)
    }

    pub async fn clear_notifications(&self, recipient: &UserId) -> Result<u64> {
        Ok(self.notification_repository.delete_all_for(recipient).await?)
    }

    /// Author's posts, newest first, with the pinned post (if any) moved to
    /// the front. No other ordering guarantee for the rest.
    pub async fn posts_by_author(
        &self,
        author: &UserId,
        pinned: Option<&PostId>,
    ) -> Result<Vec<Post>> {
        let mut posts = self
            .post_repository
            .finds(PostQuery {
                author: Some(author.clone()),
                newest_first: true,
                ..Default::default()
            })
            .await?;

        if let Some(pinned) = pinned {
            if let Some(pos) = posts.iter().position(|p| p.id == *pinned) {
                let front = posts.remove(pos);
                posts.insert(0, front);
            }
        }

        Ok(posts)
    }

    pub async fn saved_posts(&self, user: &UserId) -> Result<Vec<Post>> {
        Ok(self
            .post_repository
            .finds(PostQuery {
                saved_by: Some(user.clone()),
                newest_first: true,
                ..Default::default()
            })
            .await?)
    }

    /// Username prefix search. A failed query degrades to an empty result
    /// set instead of propagating.
    pub async fn search_profiles(&self, term: &str, limit: u32) -> Vec<Profile> {
        if is_blank(term) {
            return vec![];
        }

        let query = ProfileQuery {
            username_prefix: Some(term.trim().to_string()),
            limit: Some(limit),
            ..Default::default()
        };

        match self.profile_repository.finds(query).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("profile search failed: {}", e);
                vec![]
            }
        }
    }

    /// Who-to-follow suggestions: anyone but the viewer and the already
    /// followed. Degrades to empty on failure.
    pub async fn suggest_profiles(&self, viewer: &Profile, limit: u32) -> Vec<Profile> {
        let query = ProfileQuery {
            limit: Some(limit),
            ..Default::default()
        };

        match self.profile_repository.finds(query).await {
            Ok(mut found) => {
                found.retain(|p| p.id != viewer.id && !viewer.following.contains(&p.id));
                found
            }
            Err(e) => {
                tracing::warn!("profile suggestions failed: {}", e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructors::in_memory;

    async fn setup_profile(app: &crate::constructors::App, email: &str, username: &str) -> Profile {
        let identity = {
            use crate::auth::AuthGateway;
            app.auth.register(email, "hunter22").await.unwrap()
        };

        app.handler
            .create_profile(
                &identity,
                ProfileSetupForm {
                    full_name: username.to_uppercase(),
                    username: username.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn publish(app: &crate::constructors::App, author: &Profile, title: &str) -> Post {
        app.handler
            .publish_post(
                author,
                PostDraft {
                    title: title.to_string(),
                    body: "body".to_string(),
                    category: "General".to_string(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn like_parity_and_notification_fanout() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let fan = setup_profile(&app, "f@b.c", "fan").await;
        let post = publish(&app, &author, "hello").await;

        // odd number of toggles -> liked
        let mut current = post.clone();
        for _ in 0..3 {
            let liked = app.handler.toggle_like(&fan, &current).await.unwrap();
            current = app.handler.post_repository.find(&post.id).await.unwrap();
            assert_eq!(liked, current.likes.contains(&fan.id));
        }
        assert!(current.likes.contains(&fan.id));

        // two false->true transitions happened, each notified the author
        let inbox = app.handler.notifications_for(&author.id).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox
            .iter()
            .all(|n| n.kind == NotificationKind::Like && n.sender.id == fan.id));
        assert_eq!(
            inbox[0].post.as_ref().map(|p| p.title.as_str()),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn self_like_never_notifies() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let post = publish(&app, &author, "mine").await;

        assert!(app.handler.toggle_like(&author, &post).await.unwrap());
        assert!(app
            .handler
            .notifications_for(&author.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn comments_only_grow_and_notify_once_each() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let reader = setup_profile(&app, "r@b.c", "reader").await;
        let post = publish(&app, &author, "discuss").await;

        app.handler.add_comment(&reader, &post, "first").await.unwrap();
        app.handler.add_comment(&author, &post, "reply").await.unwrap();

        let stored = app.handler.post_repository.find(&post.id).await.unwrap();
        assert_eq!(
            stored.comments.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            ["first", "reply"]
        );

        // only the reader's comment notified; the author's own did not
        let inbox = app.handler.notifications_for(&author.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::Comment);

        assert!(app
            .handler
            .add_comment(&reader, &post, "   ")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn follow_notifies_target_once() {
        let app = in_memory();
        let actor = setup_profile(&app, "a@b.c", "actor").await;
        let target = setup_profile(&app, "t@b.c", "target").await;

        assert!(app.handler.toggle_follow(&actor, &target).await.unwrap());

        let actor = app.handler.profile_repository.find(&actor.id).await.unwrap();
        assert!(actor.following.contains(&target.id));
        assert!(!app.handler.toggle_follow(&actor, &target).await.unwrap());

        let inbox = app.handler.notifications_for(&target.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::Follow);

        assert!(app.handler.toggle_follow(&actor, &actor).await.is_err());
    }

    #[tokio::test]
    async fn pin_replaces_and_unpins() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let a = publish(&app, &author, "a").await;
        let b = publish(&app, &author, "b").await;

        assert_eq!(
            app.handler.toggle_pin(&author, &a).await.unwrap(),
            Some(a.id.clone())
        );

        let author = app.handler.profile_repository.find(&author.id).await.unwrap();
        assert_eq!(
            app.handler.toggle_pin(&author, &b).await.unwrap(),
            Some(b.id.clone())
        );

        let author = app.handler.profile_repository.find(&author.id).await.unwrap();
        assert_eq!(author.pinned_post, Some(b.id.clone()));

        // toggling the pinned post unpins
        assert_eq!(app.handler.toggle_pin(&author, &b).await.unwrap(), None);

        // cannot pin someone else's post
        let other = setup_profile(&app, "o@b.c", "other").await;
        assert!(app.handler.toggle_pin(&other, &a).await.is_err());
    }

    #[tokio::test]
    async fn edit_is_author_only_and_rejects_noops() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let other = setup_profile(&app, "o@b.c", "other").await;
        let post = publish(&app, &author, "text").await;

        assert!(app.handler.edit_post(&other.id, &post, "new").await.is_err());
        assert!(app.handler.edit_post(&author.id, &post, "body").await.is_err());
        assert!(app.handler.edit_post(&author.id, &post, " ").await.is_err());

        let updated = app
            .handler
            .edit_post(&author.id, &post, "new body")
            .await
            .unwrap();
        assert!(updated.edited);
        assert_eq!(updated.body, "new body");
    }

    #[tokio::test]
    async fn open_post_counts_one_view() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let post = publish(&app, &author, "seen").await;

        let opened = app.handler.open_post(&post.id).await.unwrap();
        assert_eq!(opened.views, 1);

        let opened = app.handler.open_post(&post.id).await.unwrap();
        assert_eq!(opened.views, 2);
    }

    #[tokio::test]
    async fn author_posts_put_pinned_first() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let _a = publish(&app, &author, "a").await;
        let b = publish(&app, &author, "b").await;
        let c = publish(&app, &author, "c").await;
        let _ = c;

        let posts = app
            .handler
            .posts_by_author(&author.id, Some(&b.id))
            .await
            .unwrap();
        assert_eq!(posts[0].id, b.id);
        assert_eq!(posts.len(), 3);
    }
}
