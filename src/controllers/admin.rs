//! Admin panel operations: platform overview, user management with the
//! cascade delete, and post moderation. Every entry point is gated on the
//! acting profile's role.

use std::sync::Arc;

use crate::entities::{Post, PostId, PostStatus, Profile, UserId};
use crate::handlers::Handler;
use crate::repositories::{
    PostMutation, PostQuery, PostRepository, ProfileQuery, ProfileRepository, RepositoryError,
};

type Result<T> = ::std::result::Result<T, AdminError>;

#[derive(Debug)]
pub enum AdminError {
    Forbidden,
    Repository(RepositoryError),
}

impl ::std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            AdminError::Forbidden => write!(f, "admin role required."),
            AdminError::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl ::std::error::Error for AdminError {}

impl From<RepositoryError> for AdminError {
    fn from(e: RepositoryError) -> Self { AdminError::Repository(e) }
}

#[derive(Debug, Clone)]
pub struct AdminOverview {
    pub user_count: u64,
    pub post_count: u64,
    pub pending_count: u64,
    pub recent_users: Vec<Profile>,
    pub recent_pending: Vec<Post>,
}

pub struct AdminController {
    handler: Arc<Handler>,
}

const RECENT_LIMIT: u32 = 5;

impl AdminController {
    pub fn new(handler: Arc<Handler>) -> Self { Self { handler } }

    fn guard(actor: &Profile) -> Result<()> {
        match actor.is_admin() {
            true => Ok(()),
            false => Err(AdminError::Forbidden),
        }
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn overview(&self, actor: &Profile) -> Result<AdminOverview> {
        Self::guard(actor)?;

        let user_count = self.handler.profile_repository.count().await?;
        let post_count = self
            .handler
            .post_repository
            .count(PostQuery::default())
            .await?;
        let pending_count = self
            .handler
            .post_repository
            .count(PostQuery {
                status: Some(PostStatus::Pending),
                ..Default::default()
            })
            .await?;

        let recent_users = self
            .handler
            .profile_repository
            .finds(ProfileQuery {
                newest_first: true,
                limit: Some(RECENT_LIMIT),
                ..Default::default()
            })
            .await?;
        let recent_pending = self
            .handler
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Pending),
                newest_first: true,
                limit: Some(RECENT_LIMIT),
                ..Default::default()
            })
            .await?;

        Ok(AdminOverview {
            user_count,
            post_count,
            pending_count,
            recent_users,
            recent_pending,
        })
    }

    /// Full user listing with a case-insensitive name/username/email filter.
    pub async fn list_users(&self, actor: &Profile, filter: &str) -> Result<Vec<Profile>> {
        Self::guard(actor)?;

        let mut users = self
            .handler
            .profile_repository
            .finds(ProfileQuery::default())
            .await?;

        let needle = filter.trim().to_lowercase();
        if !needle.is_empty() {
            users.retain(|u| {
                u.full_name.to_lowercase().contains(&needle)
                    || u.username.to_lowercase().contains(&needle)
                    || u.email.to_lowercase().contains(&needle)
            });
        }

        Ok(users)
    }

    /// Cascade delete: every post the user authored, then the profile.
    /// Posts go first so a failure cannot orphan them. Returns the number
    /// of posts removed.
    #[tracing::instrument(skip(self, actor))]
    pub async fn delete_user(&self, actor: &Profile, target: &UserId) -> Result<u64> {
        Self::guard(actor)?;

        let removed_posts = self.handler.post_repository.delete_by_author(target).await?;
        self.handler.profile_repository.delete(target).await?;

        tracing::info!(
            "deleted user {} and {} of their posts",
            target,
            removed_posts
        );
        Ok(removed_posts)
    }

    pub async fn approve_post(&self, actor: &Profile, id: &PostId) -> Result<Post> {
        Self::guard(actor)?;

        Ok(self
            .handler
            .post_repository
            .update(
                id,
                PostMutation {
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await?)
    }

    /// Rejection removes the pending post outright.
    pub async fn reject_post(&self, actor: &Profile, id: &PostId) -> Result<Post> {
        Self::guard(actor)?;

        Ok(self.handler.post_repository.delete(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthGateway;
    use crate::constructors::{in_memory, App};
    use crate::handlers::{PostDraft, ProfileSetupForm};

    async fn setup_profile(app: &App, email: &str, username: &str) -> Profile {
        let identity = app.auth.register(email, "hunter22").await.unwrap();
        app.handler
            .create_profile(
                &identity,
                ProfileSetupForm {
                    full_name: username.to_string(),
                    username: username.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn promote(app: &App, profile: &Profile) -> Profile {
        // admin promotion is an operations step, not an app surface
        let mut admin = profile.clone();
        admin.role = crate::entities::Role::Admin;
        app.handler.profile_repository.delete(&profile.id).await.unwrap();
        app.handler.profile_repository.insert(admin.clone()).await.unwrap();
        admin
    }

    #[tokio::test]
    async fn member_role_is_rejected_everywhere() {
        let app = in_memory();
        let admin_ctl = app.admin();
        let member = setup_profile(&app, "m@b.c", "member").await;

        match admin_ctl.overview(&member).await {
            Err(AdminError::Forbidden) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        match admin_ctl.delete_user(&member, &member.id).await {
            Err(AdminError::Forbidden) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn overview_counts_and_recency() {
        let app = in_memory();
        let admin_ctl = app.admin();
        let admin = promote(&app, &setup_profile(&app, "a@b.c", "admin").await).await;
        let writer = setup_profile(&app, "w@b.c", "writer").await;

        for i in 0..3 {
            app.handler
                .publish_post(
                    &writer,
                    PostDraft {
                        title: format!("t{}", i),
                        body: "b".to_string(),
                        category: "General".to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let overview = admin_ctl.overview(&admin).await.unwrap();
        assert_eq!(overview.user_count, 2);
        assert_eq!(overview.post_count, 3);
        assert_eq!(overview.pending_count, 0);
        assert!(overview.recent_users.len() <= 5);
    }

    #[tokio::test]
    async fn cascade_delete_removes_profile_and_posts() {
        let app = in_memory();
        let admin_ctl = app.admin();
        let admin = promote(&app, &setup_profile(&app, "a@b.c", "admin").await).await;
        let victim = setup_profile(&app, "v@b.c", "victim").await;

        for i in 0..2 {
            app.handler
                .publish_post(
                    &victim,
                    PostDraft {
                        title: format!("t{}", i),
                        body: "b".to_string(),
                        category: "General".to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let removed = admin_ctl.delete_user(&admin, &victim.id).await.unwrap();
        assert_eq!(removed, 2);

        assert!(!app
            .handler
            .profile_repository
            .is_exists(&victim.id)
            .await
            .unwrap());
        assert_eq!(
            admin_ctl.overview(&admin).await.unwrap().post_count,
            0
        );
    }

    #[tokio::test]
    async fn moderation_flips_status_or_removes() {
        let app = in_memory();
        let admin_ctl = app.admin();
        let admin = promote(&app, &setup_profile(&app, "a@b.c", "admin").await).await;
        let writer = setup_profile(&app, "w@b.c", "writer").await;

        let post = app
            .handler
            .publish_post(
                &writer,
                PostDraft {
                    title: "hold me".to_string(),
                    body: "b".to_string(),
                    category: "General".to_string(),
                },
            )
            .await
            .unwrap();

        // push it into the moderation queue
        app.handler
            .post_repository
            .update(
                &post.id,
                PostMutation {
                    status: Some(PostStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(admin_ctl.overview(&admin).await.unwrap().pending_count, 1);

        let approved = admin_ctl.approve_post(&admin, &post.id).await.unwrap();
        assert_eq!(approved.status, PostStatus::Published);
        assert_eq!(admin_ctl.overview(&admin).await.unwrap().pending_count, 0);

        admin_ctl.reject_post(&admin, &post.id).await.unwrap();
        assert_eq!(admin_ctl.overview(&admin).await.unwrap().post_count, 0);
    }
}
