use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::{
    after_cursor, feed_order, ChatMessage, Comment, Community, CommunityId, CommunityRepository,
    Notification, NotificationId, NotificationRepository, PageCursor, Post, PostId, PostMutation,
    PostQuery, PostRepository, Privacy, Profile, ProfileMutation, ProfileQuery, ProfileRepository,
    RepositoryError, Result, UserId,
};
use crate::subscriptions::Snapshots;

/// In-process collection of documents plus a change signal feeding standing
/// subscriptions. The stand-in for the hosted document store.
pub struct InMemoryRepository<T> {
    items: Arc<Mutex<Vec<T>>>,
    changed: broadcast::Sender<()>,
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(64);
        Self {
            items: Arc::new(Mutex::new(vec![])),
            changed,
        }
    }

    fn touch(&self) { let _ = self.changed.send(()); }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> InMemoryRepository<T> {
    /// Initial snapshot immediately, then one recomputed snapshot per
    /// observed change. A lagged receiver just recomputes; snapshots are
    /// whole replacements, so coalescing loses nothing.
    fn snapshots<S, F>(&self, compute: F) -> Snapshots<S>
    where
        S: Send + 'static,
        F: Fn(&[T]) -> S + Send + 'static,
    {
        let items = Arc::clone(&self.items);
        let mut rx = self.changed.subscribe();

        Snapshots::produce(|tx| async move {
            loop {
                let snap = {
                    let guard = items.lock().await;
                    compute(&guard)
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => (),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[inline]
fn find_mut<T, P>(v: &mut Vec<T>, predicate: P) -> Result<&mut T>
where P: FnMut(&&mut T) -> bool {
    let mut res = v.iter_mut().filter(predicate).collect::<Vec<_>>();

    match res.len() {
        0 => Err(RepositoryError::NotFound),
        1 => Ok(res.remove(0)),
        i => Err(RepositoryError::NoUnique { matched: i as u32 }),
    }
}

#[inline]
fn find_ref<T, P>(v: &[T], predicate: P) -> Result<&T>
where P: FnMut(&&T) -> bool {
    let mut res = v.iter().filter(predicate).collect::<Vec<_>>();

    match res.len() {
        0 => Err(RepositoryError::NotFound),
        1 => Ok(res.remove(0)),
        i => Err(RepositoryError::NoUnique { matched: i as u32 }),
    }
}

#[inline]
fn remove_unique<T, P>(v: &mut Vec<T>, predicate: P) -> Result<T>
where P: Fn(&T) -> bool {
    let mut indexes = v
        .iter()
        .enumerate()
        .filter(|(_, item)| predicate(item))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    match indexes.len() {
        0 => Err(RepositoryError::NotFound),
        1 => Ok(v.remove(indexes.remove(0))),
        i => Err(RepositoryError::NoUnique { matched: i as u32 }),
    }
}

#[async_trait]
impl ProfileRepository for InMemoryRepository<Profile> {
    async fn insert(&self, item: Profile) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match find_ref(&guard, |p| p.id == item.id) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        drop(guard);

        self.touch();
        Ok(true)
    }

    async fn is_exists(&self, id: &UserId) -> Result<bool> {
        let guard = self.items.lock().await;

        match find_ref(&guard, |p| p.id == *id) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find(&self, id: &UserId) -> Result<Profile> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |p| p.id == *id)?.clone())
    }

    async fn finds(
        &self,
        ProfileQuery {
            username_prefix,
            newest_first,
            limit,
        }: ProfileQuery,
    ) -> Result<Vec<Profile>> {
        let guard = self.items.lock().await;

        let mut res = guard
            .iter()
            .filter(|p| {
                username_prefix
                    .as_ref()
                    .map(|pre| p.username.starts_with(pre.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect::<Vec<_>>();

        if newest_first {
            res.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
        }
        if let Some(n) = limit {
            res.truncate(n as usize);
        }

        Ok(res)
    }

    async fn count(&self) -> Result<u64> { Ok(self.items.lock().await.len() as u64) }

    async fn update(&self, id: &UserId, mutation: ProfileMutation) -> Result<Profile> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;

        let ProfileMutation {
            full_name,
            bio,
            location,
        } = mutation;
        if let Some(val) = full_name {
            item.full_name = val;
        }
        if let Some(val) = bio {
            item.bio = val;
        }
        if let Some(val) = location {
            item.location = val;
        }

        let updated = item.clone();
        drop(guard);

        self.touch();
        Ok(updated)
    }

    async fn set_pinned(&self, id: &UserId, post: Option<PostId>) -> Result<Profile> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;

        item.pinned_post = post;

        let updated = item.clone();
        drop(guard);

        self.touch();
        Ok(updated)
    }

    async fn is_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |p| p.id == *id)?.following.contains(target))
    }

    async fn insert_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;

        let inserted = item.following.insert(target.clone());
        drop(guard);

        if inserted {
            self.touch();
        }
        Ok(inserted)
    }

    async fn delete_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;

        let removed = item.following.remove(target);
        drop(guard);

        if removed {
            self.touch();
        }
        Ok(removed)
    }

    async fn delete(&self, id: &UserId) -> Result<Profile> {
        let mut guard = self.items.lock().await;
        let removed = remove_unique(&mut guard, |p| p.id == *id)?;
        drop(guard);

        self.touch();
        Ok(removed)
    }

    async fn watch(&self, id: &UserId) -> Result<Snapshots<Option<Profile>>> {
        let id = id.clone();

        Ok(self.snapshots(move |items| items.iter().find(|p| p.id == id).cloned()))
    }
}

fn post_matches(query: &PostQuery, post: &Post) -> bool {
    let author_ok = query
        .author
        .as_ref()
        .map(|a| post.author.id == *a)
        .unwrap_or(true);
    let saved_ok = query
        .saved_by
        .as_ref()
        .map(|u| post.saved_by.contains(u))
        .unwrap_or(true);
    let status_ok = query.status.map(|s| post.status == s).unwrap_or(true);
    let text_ok = query
        .text
        .as_ref()
        .map(|re| {
            re.is_match(&post.title) || re.is_match(&post.body) || re.is_match(&post.category)
        })
        .unwrap_or(true);

    author_ok && saved_ok && status_ok && text_ok
}

fn run_post_query(query: &PostQuery, items: &[Post]) -> Vec<Post> {
    let mut res = items
        .iter()
        .filter(|p| post_matches(query, p))
        .cloned()
        .collect::<Vec<_>>();

    if query.newest_first {
        res.sort_by(feed_order);
    }
    if let Some(n) = query.limit {
        res.truncate(n as usize);
    }

    res
}

#[async_trait]
impl PostRepository for InMemoryRepository<Post> {
    async fn insert(&self, item: Post) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match find_ref(&guard, |p| p.id == item.id) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        drop(guard);

        self.touch();
        Ok(true)
    }

    async fn is_exists(&self, id: &PostId) -> Result<bool> {
        let guard = self.items.lock().await;

        match find_ref(&guard, |p| p.id == *id) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find(&self, id: &PostId) -> Result<Post> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |p| p.id == *id)?.clone())
    }

    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>> {
        let guard = self.items.lock().await;

        Ok(run_post_query(&query, &guard))
    }

    async fn count(&self, query: PostQuery) -> Result<u64> {
        let guard = self.items.lock().await;

        Ok(guard.iter().filter(|p| post_matches(&query, p)).count() as u64)
    }

    async fn page(&self, cursor: Option<PageCursor>, limit: u32) -> Result<Vec<Post>> {
        let guard = self.items.lock().await;

        let mut res = guard
            .iter()
            .filter(|p| cursor.as_ref().map(|c| after_cursor(p, c)).unwrap_or(true))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(feed_order);
        res.truncate(limit as usize);

        Ok(res)
    }

    async fn update(&self, id: &PostId, mutation: PostMutation) -> Result<Post> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;

        let PostMutation {
            body,
            edited,
            status,
        } = mutation;
        if let Some(val) = body {
            item.body = val;
        }
        if let Some(val) = edited {
            item.edited = val;
        }
        if let Some(val) = status {
            item.status = val;
        }

        let updated = item.clone();
        drop(guard);

        self.touch();
        Ok(updated)
    }

    async fn is_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |p| p.id == *id)?.likes.contains(user))
    }

    async fn insert_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let inserted = find_mut(&mut guard, |p| p.id == *id)?.likes.insert(user.clone());
        drop(guard);

        if inserted {
            self.touch();
        }
        Ok(inserted)
    }

    async fn delete_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let removed = find_mut(&mut guard, |p| p.id == *id)?.likes.remove(user);
        drop(guard);

        if removed {
            self.touch();
        }
        Ok(removed)
    }

    async fn insert_reposted(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let inserted = find_mut(&mut guard, |p| p.id == *id)?
            .reposts
            .insert(user.clone());
        drop(guard);

        if inserted {
            self.touch();
        }
        Ok(inserted)
    }

    async fn delete_reposted(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let removed = find_mut(&mut guard, |p| p.id == *id)?.reposts.remove(user);
        drop(guard);

        if removed {
            self.touch();
        }
        Ok(removed)
    }

    async fn insert_saved(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let inserted = find_mut(&mut guard, |p| p.id == *id)?
            .saved_by
            .insert(user.clone());
        drop(guard);

        if inserted {
            self.touch();
        }
        Ok(inserted)
    }

    async fn delete_saved(&self, id: &PostId, user: &UserId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let removed = find_mut(&mut guard, |p| p.id == *id)?.saved_by.remove(user);
        drop(guard);

        if removed {
            self.touch();
        }
        Ok(removed)
    }

    async fn push_comment(&self, id: &PostId, comment: Comment) -> Result<()> {
        let mut guard = self.items.lock().await;
        find_mut(&mut guard, |p| p.id == *id)?.comments.push(comment);
        drop(guard);

        self.touch();
        Ok(())
    }

    async fn incr_views(&self, id: &PostId) -> Result<()> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |p| p.id == *id)?;
        item.views += 1;
        drop(guard);

        self.touch();
        Ok(())
    }

    async fn delete(&self, id: &PostId) -> Result<Post> {
        let mut guard = self.items.lock().await;
        let removed = remove_unique(&mut guard, |p| p.id == *id)?;
        drop(guard);

        self.touch();
        Ok(removed)
    }

    async fn delete_by_author(&self, author: &UserId) -> Result<u64> {
        let mut guard = self.items.lock().await;

        let before = guard.len();
        guard.retain(|p| p.author.id != *author);
        let removed = (before - guard.len()) as u64;
        drop(guard);

        if removed > 0 {
            self.touch();
        }
        Ok(removed)
    }

    async fn watch(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>> {
        Ok(self.snapshots(move |items| run_post_query(&query, items)))
    }
}

#[async_trait]
impl NotificationRepository for InMemoryRepository<Notification> {
    async fn insert(&self, item: Notification) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match find_ref(&guard, |n| n.id == item.id) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        drop(guard);

        self.touch();
        Ok(true)
    }

    async fn finds_for(&self, recipient: &UserId) -> Result<Vec<Notification>> {
        let guard = self.items.lock().await;

        Ok(notifications_for(&guard, recipient))
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool> {
        let mut guard = self.items.lock().await;
        let item = find_mut(&mut guard, |n| n.id == *id)?;

        let flipped = !item.read;
        item.read = true;
        drop(guard);

        if flipped {
            self.touch();
        }
        Ok(flipped)
    }

    async fn delete(&self, id: &NotificationId) -> Result<Notification> {
        let mut guard = self.items.lock().await;
        let removed = remove_unique(&mut guard, |n| n.id == *id)?;
        drop(guard);

        self.touch();
        Ok(removed)
    }

    async fn delete_all_for(&self, recipient: &UserId) -> Result<u64> {
        let mut guard = self.items.lock().await;

        let before = guard.len();
        guard.retain(|n| n.recipient != *recipient);
        let removed = (before - guard.len()) as u64;
        drop(guard);

        if removed > 0 {
            self.touch();
        }
        Ok(removed)
    }

    async fn watch_for(&self, recipient: &UserId) -> Result<Snapshots<Vec<Notification>>> {
        let recipient = recipient.clone();

        Ok(self.snapshots(move |items| notifications_for(items, &recipient)))
    }
}

fn notifications_for(items: &[Notification], recipient: &UserId) -> Vec<Notification> {
    let mut res = items
        .iter()
        .filter(|n| n.recipient == *recipient)
        .cloned()
        .collect::<Vec<_>>();
    res.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));

    res
}

/// Communities plus their per-community message sub-collections; one change
/// signal covers both, snapshots filter per key.
pub struct InMemoryCommunityRepository {
    communities: Arc<Mutex<Vec<Community>>>,
    messages: Arc<Mutex<Vec<(CommunityId, ChatMessage)>>>,
    changed: broadcast::Sender<()>,
}

impl InMemoryCommunityRepository {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(64);
        Self {
            communities: Arc::new(Mutex::new(vec![])),
            messages: Arc::new(Mutex::new(vec![])),
            changed,
        }
    }

    fn touch(&self) { let _ = self.changed.send(()); }
}

impl Default for InMemoryCommunityRepository {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl CommunityRepository for InMemoryCommunityRepository {
    async fn insert(&self, item: Community) -> Result<bool> {
        let mut guard = self.communities.lock().await;

        match find_ref(&guard, |c| c.id == item.id) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        drop(guard);

        self.touch();
        Ok(true)
    }

    async fn find(&self, id: &CommunityId) -> Result<Community> {
        let guard = self.communities.lock().await;

        Ok(find_ref(&guard, |c| c.id == *id)?.clone())
    }

    async fn finds(&self) -> Result<Vec<Community>> {
        Ok(self.communities.lock().await.clone())
    }

    async fn set_privacy(&self, id: &CommunityId, privacy: Privacy) -> Result<Community> {
        let mut guard = self.communities.lock().await;
        let item = find_mut(&mut guard, |c| c.id == *id)?;

        item.privacy = privacy;

        let updated = item.clone();
        drop(guard);

        self.touch();
        Ok(updated)
    }

    async fn is_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        let guard = self.communities.lock().await;

        Ok(find_ref(&guard, |c| c.id == *id)?.members.contains(user))
    }

    async fn insert_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        let mut guard = self.communities.lock().await;
        let inserted = find_mut(&mut guard, |c| c.id == *id)?
            .members
            .insert(user.clone());
        drop(guard);

        if inserted {
            self.touch();
        }
        Ok(inserted)
    }

    async fn delete_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        let mut guard = self.communities.lock().await;
        let removed = find_mut(&mut guard, |c| c.id == *id)?.members.remove(user);
        drop(guard);

        if removed {
            self.touch();
        }
        Ok(removed)
    }

    async fn delete(&self, id: &CommunityId) -> Result<Community> {
        let mut guard = self.communities.lock().await;
        let removed = remove_unique(&mut guard, |c| c.id == *id)?;
        drop(guard);

        self.messages.lock().await.retain(|(cid, _)| cid != id);
        self.touch();
        Ok(removed)
    }

    async fn push_message(&self, id: &CommunityId, message: ChatMessage) -> Result<ChatMessage> {
        {
            let guard = self.communities.lock().await;
            find_ref(&guard, |c| c.id == *id)?;
        }

        self.messages
            .lock()
            .await
            .push((id.clone(), message.clone()));

        self.touch();
        Ok(message)
    }

    async fn messages(&self, id: &CommunityId) -> Result<Vec<ChatMessage>> {
        let guard = self.messages.lock().await;

        Ok(messages_of(&guard, id))
    }

    async fn watch_all(&self) -> Result<Snapshots<Vec<Community>>> {
        let communities = Arc::clone(&self.communities);
        let mut rx = self.changed.subscribe();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = communities.lock().await.clone();
                if tx.send(snap).is_err() {
                    break;
                }

                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => (),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn watch_messages(&self, id: &CommunityId) -> Result<Snapshots<Vec<ChatMessage>>> {
        let id = id.clone();
        let messages = Arc::clone(&self.messages);
        let mut rx = self.changed.subscribe();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = {
                    let guard = messages.lock().await;
                    messages_of(&guard, &id)
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => (),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

fn messages_of(items: &[(CommunityId, ChatMessage)], id: &CommunityId) -> Vec<ChatMessage> {
    let mut res = items
        .iter()
        .filter(|(cid, _)| cid == id)
        .map(|(_, m)| m.clone())
        .collect::<Vec<_>>();
    res.sort_by(|a, b| a.created.cmp(&b.created));

    res
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::entities::{Author, PostStatus};

    fn post(id: &str, secs: i64) -> Post {
        Post {
            id: PostId::from(id),
            author: Author {
                id: UserId::from("author"),
                name: "Author".to_string(),
                username: "author".to_string(),
            },
            title: "t".to_string(),
            body: "b".to_string(),
            category: "General".to_string(),
            created: Utc.timestamp_opt(secs, 0).unwrap(),
            likes: Default::default(),
            reposts: Default::default(),
            saved_by: Default::default(),
            comments: vec![],
            views: 0,
            edited: false,
            status: PostStatus::Published,
        }
    }

    #[tokio::test]
    async fn set_ops_report_transitions() {
        let repo = InMemoryRepository::<Post>::new();
        repo.insert(post("p", 1)).await.unwrap();
        let u = UserId::from("u");

        assert!(repo.insert_liked(&PostId::from("p"), &u).await.unwrap());
        assert!(!repo.insert_liked(&PostId::from("p"), &u).await.unwrap());
        assert!(repo.delete_liked(&PostId::from("p"), &u).await.unwrap());
        assert!(!repo.delete_liked(&PostId::from("p"), &u).await.unwrap());
    }

    #[tokio::test]
    async fn page_respects_cursor_and_order() {
        let repo = InMemoryRepository::<Post>::new();
        for (id, secs) in [("a", 3), ("b", 2), ("c", 2), ("d", 1)] {
            repo.insert(post(id, secs)).await.unwrap();
        }

        let first = repo.page(None, 2).await.unwrap();
        let ids = first.iter().map(|p| p.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["a", "c"]);

        let cursor = PageCursor::of(first.last().unwrap());
        let second = repo.page(Some(cursor), 2).await.unwrap();
        let ids = second.iter().map(|p| p.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["b", "d"]);
    }

    #[tokio::test]
    async fn text_query_matches_title_body_and_category() {
        let repo = InMemoryRepository::<Post>::new();
        let mut tagged = post("t", 1);
        tagged.title = "Learning Rust".to_string();
        repo.insert(tagged).await.unwrap();
        repo.insert(post("u", 2)).await.unwrap();

        let found = repo
            .finds(PostQuery {
                text: Some(::regex::Regex::new("(?i)rust").unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "t");

        // category matches too
        let found = repo
            .finds(PostQuery {
                text: Some(::regex::Regex::new("General").unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn watch_delivers_fresh_snapshots() {
        let repo = InMemoryRepository::<Post>::new();
        let mut snaps = repo
            .watch(PostQuery {
                newest_first: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(snaps.recv().await.unwrap().is_empty());

        repo.insert(post("p", 1)).await.unwrap();
        assert_eq!(snaps.recv().await.unwrap().len(), 1);
    }
}
