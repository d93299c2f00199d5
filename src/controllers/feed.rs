//! The feed: a bounded, newest-first local mirror of the post collection.
//!
//! The mirror is a reducer over (authoritative page, pending optimistic
//! patches, deletion tombstones). Authoritative deliveries always win
//! outright: replacing the page discards every pending patch. Patches exist
//! so a toggle is visible before the remote write round-trips; they are
//! never rolled back on write failure — the next authoritative state
//! reconciles.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use regex::Regex;
use smallvec::SmallVec;

use crate::analytics::trending_score;
use crate::entities::{Comment, Post, PostId, Profile, UserId};
use crate::handlers::{Handler, PostDraft};
use crate::repositories::{PageCursor, PostRepository};

pub const POSTS_PER_PAGE: u32 = 10;

pub const CATEGORIES: [&str; 7] = ["General", "Tech", "Life", "Art", "Music", "Gaming", "Crypto"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedView {
    Global,
    Following,
    Trending,
}

#[derive(Debug, Clone)]
pub enum PostPatch {
    Like {
        post: PostId,
        user: UserId,
        liked: bool,
    },
    Repost {
        post: PostId,
        user: UserId,
        reposted: bool,
    },
    Save {
        post: PostId,
        user: UserId,
        saved: bool,
    },
    Comment {
        post: PostId,
        comment: Comment,
    },
    View {
        post: PostId,
    },
    Insert(Box<Post>),
    Remove {
        post: PostId,
    },
}

/// Authoritative page plus the optimistic patches staged since it arrived.
/// Deleted ids are tombstoned so a stale page cannot resurrect them.
#[derive(Default)]
pub struct PostMirror {
    authoritative: Vec<Post>,
    pending: SmallVec<[PostPatch; 4]>,
    tombstones: HashSet<PostId>,
}

impl PostMirror {
    /// Snapshot delivery: wholesale replacement, pending patches discarded.
    pub fn replace(&mut self, posts: Vec<Post>) {
        let Self {
            authoritative,
            pending,
            tombstones,
        } = self;

        *authoritative = posts;
        authoritative.retain(|p| !tombstones.contains(&p.id));
        pending.clear();
    }

    /// Page continuation: append without duplicating ids already mirrored
    /// and without resurrecting tombstoned ones.
    pub fn extend(&mut self, page: Vec<Post>) {
        let seen = self
            .authoritative
            .iter()
            .map(|p| p.id.clone())
            .collect::<HashSet<_>>();

        for post in page {
            if seen.contains(&post.id) || self.tombstones.contains(&post.id) {
                continue;
            }
            self.authoritative.push(post);
        }
    }

    pub fn stage(&mut self, patch: PostPatch) {
        if let PostPatch::Remove { post } = &patch {
            self.tombstones.insert(post.clone());
        }

        self.pending.push(patch);
    }

    /// Current view: authoritative state with pending patches applied.
    pub fn posts(&self) -> Vec<Post> {
        let mut posts = self.authoritative.clone();

        for patch in &self.pending {
            apply_patch(&mut posts, patch);
        }

        posts
    }

    pub fn len(&self) -> usize { self.authoritative.len() }

    pub fn is_empty(&self) -> bool { self.authoritative.is_empty() }
}

fn find_post<'a>(posts: &'a mut [Post], id: &PostId) -> Option<&'a mut Post> {
    posts.iter_mut().find(|p| p.id == *id)
}

fn apply_patch(posts: &mut Vec<Post>, patch: &PostPatch) {
    match patch {
        PostPatch::Like { post, user, liked } => {
            if let Some(p) = find_post(posts, post) {
                match liked {
                    true => p.likes.insert(user.clone()),
                    false => p.likes.remove(user),
                };
            }
        }
        PostPatch::Repost {
            post,
            user,
            reposted,
        } => {
            if let Some(p) = find_post(posts, post) {
                match reposted {
                    true => p.reposts.insert(user.clone()),
                    false => p.reposts.remove(user),
                };
            }
        }
        PostPatch::Save { post, user, saved } => {
            if let Some(p) = find_post(posts, post) {
                match saved {
                    true => p.saved_by.insert(user.clone()),
                    false => p.saved_by.remove(user),
                };
            }
        }
        PostPatch::Comment { post, comment } => {
            if let Some(p) = find_post(posts, post) {
                p.comments.push(comment.clone());
            }
        }
        PostPatch::View { post } => {
            if let Some(p) = find_post(posts, post) {
                p.views += 1;
            }
        }
        PostPatch::Insert(post) => posts.insert(0, (**post).clone()),
        PostPatch::Remove { post } => posts.retain(|p| p.id != *post),
    }
}

pub struct FeedController {
    handler: Arc<Handler>,
    mirror: PostMirror,
    cursor: Option<PageCursor>,
    has_more: bool,
    posting: bool,
    view: FeedView,
    search: String,
}

impl FeedController {
    pub fn new(handler: Arc<Handler>) -> Self {
        Self {
            handler,
            mirror: PostMirror::default(),
            cursor: None,
            has_more: true,
            posting: false,
            view: FeedView::Global,
            search: String::new(),
        }
    }

    pub fn view(&self) -> FeedView { self.view }

    pub fn set_view(&mut self, view: FeedView) { self.view = view; }

    pub fn set_search(&mut self, term: impl Into<String>) { self.search = term.into(); }

    pub fn has_more(&self) -> bool { self.has_more }

    pub fn is_posting(&self) -> bool { self.posting }

    /// First page; resets the cursor.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<()> {
        let page = self
            .handler
            .post_repository
            .page(None, POSTS_PER_PAGE)
            .await?;

        self.has_more = page.len() == POSTS_PER_PAGE as usize;
        self.cursor = page.last().map(PageCursor::of);
        self.mirror.replace(page);

        Ok(())
    }

    /// Cursor continuation. No-op once the collection is exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn load_more(&mut self) -> Result<()> {
        let cursor = match (&self.cursor, self.has_more) {
            (Some(c), true) => c.clone(),
            _ => return Ok(()),
        };

        let page = self
            .handler
            .post_repository
            .page(Some(cursor), POSTS_PER_PAGE)
            .await?;

        self.has_more = page.len() == POSTS_PER_PAGE as usize;
        if let Some(last) = page.last() {
            self.cursor = Some(PageCursor::of(last));
        }
        self.mirror.extend(page);

        Ok(())
    }

    /// Standing-subscription delivery path: the snapshot is the whole
    /// ordered collection and supersedes everything local.
    pub fn apply_snapshot(&mut self, posts: Vec<Post>) {
        self.cursor = posts.last().map(PageCursor::of);
        self.has_more = false;
        self.mirror.replace(posts);
    }

    /// Publish with instant local feedback: the stored post (timestamped
    /// with local time until a snapshot replaces it) is unshifted onto the
    /// mirror. The posting flag re-enables on every path.
    pub async fn publish(&mut self, author: &Profile, draft: PostDraft) -> Result<()> {
        if self.posting {
            bail!("already publishing.");
        }

        self.posting = true;
        let res = self.handler.publish_post(author, draft).await;
        self.posting = false;

        let post = res?;
        self.mirror.stage(PostPatch::Insert(Box::new(post)));

        Ok(())
    }

    pub async fn toggle_like(&mut self, actor: &Profile, post_id: &PostId) -> Result<bool> {
        let post = self.current(post_id)?;
        let liked = !post.likes.contains(&actor.id);

        self.mirror.stage(PostPatch::Like {
            post: post_id.clone(),
            user: actor.id.clone(),
            liked,
        });

        // local state is left as-is on failure; the next snapshot reconciles
        self.handler
            .toggle_like(actor, &post)
            .await
            .map_err(|e| log_failed("like", e))?;

        Ok(liked)
    }

    pub async fn toggle_repost(&mut self, actor: &Profile, post_id: &PostId) -> Result<bool> {
        let post = self.current(post_id)?;
        let reposted = !post.reposts.contains(&actor.id);

        self.mirror.stage(PostPatch::Repost {
            post: post_id.clone(),
            user: actor.id.clone(),
            reposted,
        });

        self.handler
            .toggle_repost(&actor.id, &post)
            .await
            .map_err(|e| log_failed("repost", e))?;

        Ok(reposted)
    }

    pub async fn toggle_bookmark(&mut self, actor: &Profile, post_id: &PostId) -> Result<bool> {
        let post = self.current(post_id)?;
        let saved = !post.saved_by.contains(&actor.id);

        self.mirror.stage(PostPatch::Save {
            post: post_id.clone(),
            user: actor.id.clone(),
            saved,
        });

        self.handler
            .toggle_bookmark(&actor.id, &post)
            .await
            .map_err(|e| log_failed("bookmark", e))?;

        Ok(saved)
    }

    pub async fn comment(&mut self, actor: &Profile, post_id: &PostId, text: &str) -> Result<()> {
        let post = self.current(post_id)?;

        let comment = self
            .handler
            .add_comment(actor, &post, text)
            .await
            .map_err(|e| log_failed("comment", e))?;

        self.mirror.stage(PostPatch::Comment {
            post: post_id.clone(),
            comment,
        });

        Ok(())
    }

    /// The caller runs the explicit confirm step first. A deleted id is
    /// tombstoned: "load more" can never bring it back.
    pub async fn delete(&mut self, actor: &UserId, post_id: &PostId) -> Result<()> {
        let post = self.current(post_id)?;

        self.mirror.stage(PostPatch::Remove {
            post: post_id.clone(),
        });

        self.handler
            .delete_post(actor, &post)
            .await
            .map_err(|e| log_failed("delete", e))?;

        Ok(())
    }

    /// Detail-view open: exactly one server-side view increment, mirrored
    /// locally so the counter moves without waiting for a snapshot.
    pub async fn open_post(&mut self, post_id: &PostId) -> Result<Post> {
        self.mirror.stage(PostPatch::View {
            post: post_id.clone(),
        });

        self.handler
            .open_post(post_id)
            .await
            .map_err(|e| log_failed("open", e))
    }

    pub async fn edit(&mut self, actor: &UserId, post_id: &PostId, body: &str) -> Result<()> {
        let post = self.current(post_id)?;

        self.handler
            .edit_post(actor, &post, body)
            .await
            .map_err(|e| log_failed("edit", e))?;

        Ok(())
    }

    /// What the active view shows: case-insensitive substring search over
    /// title/body/category, restricted to followed authors in the
    /// Following view, re-scored (never persisted) in Trending.
    pub fn visible(&self, viewer: Option<&Profile>) -> Vec<Post> {
        let matcher = search_matcher(&self.search);

        let mut posts = self
            .mirror
            .posts()
            .into_iter()
            .filter(|p| {
                let matched = matcher
                    .as_ref()
                    .map(|re| {
                        re.is_match(&p.title) || re.is_match(&p.body) || re.is_match(&p.category)
                    })
                    .unwrap_or(true);

                match (self.view, viewer) {
                    (FeedView::Following, Some(v)) => {
                        matched && v.following.contains(&p.author.id)
                    }
                    (FeedView::Following, None) => false,
                    _ => matched,
                }
            })
            .collect::<Vec<_>>();

        if self.view == FeedView::Trending {
            posts.sort_by(|a, b| {
                trending_score(b)
                    .cmp(&trending_score(a))
                    .then_with(|| b.id.cmp(&a.id))
            });
        }

        posts
    }

    fn current(&self, post_id: &PostId) -> Result<Post> {
        match self.mirror.posts().into_iter().find(|p| p.id == *post_id) {
            Some(p) => Ok(p),
            None => bail!("post is not in the feed."),
        }
    }
}

fn search_matcher(term: &str) -> Option<Regex> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }

    Regex::new(&format!("(?i){}", regex::escape(term))).ok()
}

fn log_failed(action: &str, e: anyhow::Error) -> anyhow::Error {
    tracing::warn!("{} failed: {}", action, e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructors::{in_memory, App};
    use crate::handlers::ProfileSetupForm;
    use crate::repositories::ProfileRepository;

    async fn setup_profile(app: &App, email: &str, username: &str) -> Profile {
        use crate::auth::AuthGateway;

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

    async fn seed_posts(app: &App, author: &Profile, n: usize) -> Vec<Post> {
        let mut out = vec![];
        for i in 0..n {
            out.push(
                app.handler
                    .publish_post(
                        author,
                        PostDraft {
                            title: format!("post {}", i),
                            body: format!("body {}", i),
                            category: "General".to_string(),
                        },
                    )
                    .await
                    .unwrap(),
            );
            // distinct creation instants keep the order assertions exact
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        out
    }

    #[tokio::test]
    async fn pagination_never_duplicates_or_drops() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        seed_posts(&app, &author, 25).await;

        let mut feed = app.feed();
        feed.refresh().await.unwrap();
        assert_eq!(feed.visible(None).len(), 10);
        assert!(feed.has_more());

        feed.load_more().await.unwrap();
        feed.load_more().await.unwrap();
        assert!(!feed.has_more());

        let posts = feed.visible(None);
        assert_eq!(posts.len(), 25);

        let ids = posts.iter().map(|p| p.id.clone()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 25);

        for pair in posts.windows(2) {
            assert!(
                (pair[0].created, &pair[0].id) >= (pair[1].created, &pair[1].id),
                "feed order broke across a page boundary"
            );
        }

        // exhausted: another load is a no-op
        feed.load_more().await.unwrap();
        assert_eq!(feed.visible(None).len(), 25);
    }

    #[tokio::test]
    async fn trending_scores_and_orders_deterministically() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let posts = seed_posts(&app, &author, 3).await;

        // (views, likes): (10, 0), (0, 3), (5, 1) -> scores 10, 15, 10
        for _ in 0..10 {
            app.handler.post_repository.incr_views(&posts[0].id).await.unwrap();
        }
        for i in 0..3 {
            let fan = setup_profile(&app, &format!("f{}@b.c", i), &format!("fan{}", i)).await;
            let p = app.handler.post_repository.find(&posts[1].id).await.unwrap();
            app.handler.toggle_like(&fan, &p).await.unwrap();
        }
        for _ in 0..5 {
            app.handler.post_repository.incr_views(&posts[2].id).await.unwrap();
        }
        let fan = setup_profile(&app, "x@b.c", "xfan").await;
        let p = app.handler.post_repository.find(&posts[2].id).await.unwrap();
        app.handler.toggle_like(&fan, &p).await.unwrap();

        let mut feed = app.feed();
        feed.refresh().await.unwrap();
        feed.set_view(FeedView::Trending);

        let visible = feed.visible(None);
        assert_eq!(visible[0].id, posts[1].id);

        let scores = visible.iter().map(trending_score).collect::<Vec<_>>();
        assert_eq!(scores, [15, 10, 10]);

        // tie broken by descending id, deterministically
        let tied = visible[1..].iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        let mut expect = vec![posts[0].id.clone(), posts[2].id.clone()];
        expect.sort();
        expect.reverse();
        assert_eq!(tied, expect);
    }

    #[tokio::test]
    async fn search_and_following_filters() {
        let app = in_memory();
        let followed = setup_profile(&app, "a@b.c", "followed").await;
        let stranger = setup_profile(&app, "s@b.c", "stranger").await;
        let mut viewer = setup_profile(&app, "v@b.c", "viewer").await;

        app.handler
            .publish_post(
                &followed,
                PostDraft {
                    title: "Rust ownership".to_string(),
                    body: "borrows".to_string(),
                    category: "Tech".to_string(),
                },
            )
            .await
            .unwrap();
        app.handler
            .publish_post(
                &stranger,
                PostDraft {
                    title: "rustic cooking".to_string(),
                    body: "stew".to_string(),
                    category: "Life".to_string(),
                },
            )
            .await
            .unwrap();

        app.handler.toggle_follow(&viewer, &followed).await.unwrap();
        viewer = app.handler.profile_repository.find(&viewer.id).await.unwrap();

        let mut feed = app.feed();
        feed.refresh().await.unwrap();

        feed.set_search("RUST");
        assert_eq!(feed.visible(Some(&viewer)).len(), 2);

        feed.set_view(FeedView::Following);
        let visible = feed.visible(Some(&viewer));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].author.id, followed.id);

        feed.set_search("stew");
        assert!(feed.visible(Some(&viewer)).is_empty());
    }

    #[tokio::test]
    async fn optimistic_patches_apply_then_snapshot_wins() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let fan = setup_profile(&app, "f@b.c", "fan").await;
        let posts = seed_posts(&app, &author, 1).await;

        let mut feed = app.feed();
        feed.refresh().await.unwrap();

        assert!(feed.toggle_like(&fan, &posts[0].id).await.unwrap());
        assert!(feed.visible(None)[0].likes.contains(&fan.id));

        // authoritative replacement discards pending patches and agrees
        feed.refresh().await.unwrap();
        assert!(feed.visible(None)[0].likes.contains(&fan.id));

        assert!(!feed.toggle_like(&fan, &posts[0].id).await.unwrap());
        assert!(!feed.visible(None)[0].likes.contains(&fan.id));
    }

    #[tokio::test]
    async fn publish_unshifts_and_reenables() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;

        let mut feed = app.feed();
        feed.refresh().await.unwrap();

        feed.publish(
            &author,
            PostDraft {
                title: "fresh".to_string(),
                body: "off the press".to_string(),
                category: "General".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(!feed.is_posting());
        let visible = feed.visible(None);
        assert_eq!(visible[0].title, "fresh");

        // invalid draft fails but still re-enables the control
        assert!(feed
            .publish(
                &author,
                PostDraft {
                    title: " ".to_string(),
                    body: String::new(),
                    category: "General".to_string(),
                }
            )
            .await
            .is_err());
        assert!(!feed.is_posting());
    }

    #[tokio::test]
    async fn deleted_posts_never_resurrect_via_load_more() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let posts = seed_posts(&app, &author, 15).await;

        let mut feed = app.feed();
        feed.refresh().await.unwrap();

        // newest-first: page one holds the last-seeded posts
        let victim = feed.visible(None)[3].id.clone();
        feed.delete(&author.id, &victim).await.unwrap();
        assert!(feed.visible(None).iter().all(|p| p.id != victim));

        feed.load_more().await.unwrap();
        let all = feed.visible(None);
        assert_eq!(all.len(), 14);
        assert!(all.iter().all(|p| p.id != victim));
        let _ = posts;
    }

    #[tokio::test]
    async fn open_post_moves_the_local_counter() {
        let app = in_memory();
        let author = setup_profile(&app, "a@b.c", "author").await;
        let posts = seed_posts(&app, &author, 1).await;

        let mut feed = app.feed();
        feed.refresh().await.unwrap();

        let opened = feed.open_post(&posts[0].id).await.unwrap();
        assert_eq!(opened.views, 1);
        assert_eq!(feed.visible(None)[0].views, 1);
    }
}
