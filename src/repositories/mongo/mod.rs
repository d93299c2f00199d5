use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};
use tracing::Instrument;

use super::{
    ChatMessage, Comment, Community, CommunityId, CommunityRepository, Notification,
    NotificationId, NotificationRepository, PageCursor, Post, PostId, PostMutation, PostQuery,
    PostRepository, Privacy, Profile, ProfileMutation, ProfileQuery, ProfileRepository,
    RepositoryError, Result, UserId,
};
use crate::entities::PostStatus;
use crate::subscriptions::Snapshots;
use crate::utils::LetChain;

mod helpers;
mod models;
mod type_convert;

use helpers::{initialize_coll, ConvertError, ConvertOption, ExpectTrue, IntoBool, UniqueCheck};
use models::{
    CommentModel, CommunityModel, MessageModel, NotificationModel, PostModel, ProfileModel,
};
use type_convert::cursor_filter;

#[derive(Clone, Copy)]
enum ModifyOpTy {
    Push,
    Pull,
}

impl ModifyOpTy {
    fn operator(self) -> &'static str {
        match self {
            ModifyOpTy::Push => "$addToSet",
            ModifyOpTy::Pull => "$pull",
        }
    }
}

/// Targeted set-add/remove against one array field of one document. The
/// returned bool is the membership transition: `false` means the element
/// was already in (or already out of) the set.
async fn modify_set<T: Send + Sync>(
    coll: &Collection<T>,
    id: &str,
    field: &str,
    element: &str,
    ty: ModifyOpTy,
) -> Result<bool> {
    let res = coll
        .update_one(
            doc! { "id": id },
            doc! { ty.operator(): { field: element } },
            None,
        )
        .instrument(tracing::trace_span!("update_one"))
        .await
        .cvt()?;

    res.matched_count.into_bool().expect_true()?;
    Ok(res.modified_count.into_bool())
}

async fn is_contains<T: Send + Sync>(
    coll: &Collection<T>,
    id: &str,
    field: &str,
    element: &str,
) -> Result<bool> {
    let res = coll
        .count_documents(
            doc! {
                "id": id,
                field: { "$in": [element] }
            },
            None,
        )
        .instrument(tracing::trace_span!("count_documents"))
        .await
        .cvt()?
        .let_(IntoBool::into_bool);

    Ok(res)
}

fn sort_newest_first() -> Document { doc! { "created": -1, "id": -1 } }

pub struct MongoProfileRepository {
    client: Client,
    coll: Collection<ProfileModel>,
}

impl MongoProfileRepository {
    pub async fn new_with(client: Client, db: Database) -> ::anyhow::Result<Self> {
        initialize_coll("users", &db).await?;

        Ok(Self {
            client,
            coll: db.collection("users"),
        })
    }
}

#[async_trait]
impl ProfileRepository for MongoProfileRepository {
    async fn insert(&self, profile: Profile) -> Result<bool> {
        let model: ProfileModel = profile.into();

        self.coll
            .insert_one(model, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
            .unique_check()
    }

    async fn is_exists(&self, id: &UserId) -> Result<bool> {
        let res = self
            .coll
            .count_documents(doc! { "id": id.as_str() }, None)
            .await
            .cvt()?
            .let_(IntoBool::into_bool);

        Ok(res)
    }

    async fn find(&self, id: &UserId) -> Result<Profile> {
        let profile: Profile = self
            .coll
            .find_one(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(profile)
    }

    async fn finds(&self, query: ProfileQuery) -> Result<Vec<Profile>> {
        let mut opts = FindOptions::default();
        if query.newest_first {
            opts.sort = Some(sort_newest_first());
        }
        opts.limit = query.limit.map(|n| n as i64);

        let query_doc: Document = query.into();

        let res = self
            .coll
            .find(query_doc, opts)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }

    async fn count(&self) -> Result<u64> {
        self.coll.count_documents(doc! {}, None).await.cvt()
    }

    async fn update(&self, id: &UserId, mutation: ProfileMutation) -> Result<Profile> {
        let mut mutation_doc = doc! {};
        let ProfileMutation {
            full_name,
            bio,
            location,
        } = mutation;
        if let Some(v) = full_name {
            mutation_doc.insert("full_name", v);
        }
        if let Some(v) = bio {
            mutation_doc.insert("bio", v);
        }
        if let Some(v) = location {
            mutation_doc.insert("location", v);
        }

        async fn transaction(
            this: &MongoProfileRepository,
            id: &UserId,
            mutation: Document,
        ) -> ::mongodb::error::Result<Option<Profile>> {
            let mut session = this.client.start_session(None).await?;
            session.start_transaction(None).await?;

            match this
                .coll
                .update_one_with_session(
                    doc! { "id": id.as_str() },
                    doc! { "$set": mutation },
                    None,
                    &mut session,
                )
                .await?
                .matched_count
                .let_(IntoBool::into_bool)
            {
                false => return Ok(None),
                true => (),
            }

            let profile: Profile = this
                .coll
                .find_one_with_session(doc! { "id": id.as_str() }, None, &mut session)
                .await?
                .expect("updated document vanished mid-transaction")
                .into();

            loop {
                let r = session.commit_transaction().await;
                if let Err(ref e) = r {
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
                        continue;
                    }
                }

                break r.map(|_| Some(profile));
            }
        }

        let res = loop {
            let r = transaction(self, id, mutation_doc.clone()).await;
            if let Err(ref e) = r {
                if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
                    continue;
                }
            }

            break r;
        };

        res.cvt()?.opt_cvt()
    }

    async fn set_pinned(&self, id: &UserId, post: Option<PostId>) -> Result<Profile> {
        let value = match post {
            Some(p) => Bson::String(p.0),
            None => Bson::Null,
        };

        let mut opts = FindOneAndUpdateOptions::default();
        opts.return_document = Some(ReturnDocument::After);

        let profile: Profile = self
            .coll
            .find_one_and_update(
                doc! { "id": id.as_str() },
                doc! { "$set": { "pinned_post": value } },
                opts,
            )
            .instrument(tracing::trace_span!("find_one_and_update"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(profile)
    }

    async fn is_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        is_contains(&self.coll, id.as_str(), "following", target.as_str()).await
    }

    async fn insert_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "following",
            target.as_str(),
            ModifyOpTy::Push,
        )
        .await
    }

    async fn delete_following(&self, id: &UserId, target: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "following",
            target.as_str(),
            ModifyOpTy::Pull,
        )
        .await
    }

    async fn delete(&self, id: &UserId) -> Result<Profile> {
        let profile: Profile = self
            .coll
            .find_one_and_delete(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one_and_delete"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(profile)
    }

    async fn watch(&self, id: &UserId) -> Result<Snapshots<Option<Profile>>> {
        let mut stream = self
            .coll
            .watch(Vec::<Document>::new(), None)
            .await
            .cvt()?;
        let coll = self.coll.clone();
        let id = id.clone();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = match coll.find_one(doc! { "id": id.as_str() }, None).await {
                    Ok(found) => found.map(Profile::from),
                    Err(e) => {
                        // Degrade to "no profile" so routing never hangs.
                        tracing::warn!("profile watch query failed: {}", e);
                        let _ = tx.send(None);
                        break;
                    }
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match stream.next().await {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("profile change stream failed: {}", e);
                        let _ = tx.send(None);
                        break;
                    }
                    None => break,
                }
            }
        }))
    }
}

pub struct MongoPostRepository {
    coll: Collection<PostModel>,
}

impl MongoPostRepository {
    pub async fn new_with(_client: Client, db: Database) -> ::anyhow::Result<Self> {
        initialize_coll("posts", &db).await?;

        Ok(Self {
            coll: db.collection("posts"),
        })
    }

    async fn run_query(coll: &Collection<PostModel>, query: PostQuery) -> Result<Vec<Post>> {
        let mut opts = FindOptions::default();
        if query.newest_first {
            opts.sort = Some(sort_newest_first());
        }
        opts.limit = query.limit.map(|n| n as i64);

        let query_doc: Document = query.into();

        let res = coll
            .find(query_doc, opts)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }
}

#[async_trait]
impl PostRepository for MongoPostRepository {
    async fn insert(&self, post: Post) -> Result<bool> {
        let model: PostModel = post.into();

        self.coll
            .insert_one(model, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
            .unique_check()
    }

    async fn is_exists(&self, id: &PostId) -> Result<bool> {
        let res = self
            .coll
            .count_documents(doc! { "id": id.as_str() }, None)
            .await
            .cvt()?
            .let_(IntoBool::into_bool);

        Ok(res)
    }

    async fn find(&self, id: &PostId) -> Result<Post> {
        let post: Post = self
            .coll
            .find_one(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(post)
    }

    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>> {
        Self::run_query(&self.coll, query).await
    }

    async fn count(&self, query: PostQuery) -> Result<u64> {
        let query_doc: Document = query.into();

        self.coll.count_documents(query_doc, None).await.cvt()
    }

    async fn page(&self, cursor: Option<PageCursor>, limit: u32) -> Result<Vec<Post>> {
        let filter = match cursor {
            Some(ref c) => cursor_filter(c),
            None => doc! {},
        };

        let mut opts = FindOptions::default();
        opts.sort = Some(sort_newest_first());
        opts.limit = Some(limit as i64);

        let res = self
            .coll
            .find(filter, opts)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }

    async fn update(&self, id: &PostId, mutation: PostMutation) -> Result<Post> {
        let mut set = doc! {};
        let PostMutation {
            body,
            edited,
            status,
        } = mutation;
        if let Some(v) = body {
            set.insert("body", v);
        }
        if let Some(v) = edited {
            set.insert("edited", v);
        }
        if let Some(v) = status {
            set.insert("pending", v == PostStatus::Pending);
        }

        let mut opts = FindOneAndUpdateOptions::default();
        opts.return_document = Some(ReturnDocument::After);

        let post: Post = self
            .coll
            .find_one_and_update(doc! { "id": id.as_str() }, doc! { "$set": set }, opts)
            .instrument(tracing::trace_span!("find_one_and_update"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(post)
    }

    async fn is_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        is_contains(&self.coll, id.as_str(), "likes", user.as_str()).await
    }

    async fn insert_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(&self.coll, id.as_str(), "likes", user.as_str(), ModifyOpTy::Push).await
    }

    async fn delete_liked(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(&self.coll, id.as_str(), "likes", user.as_str(), ModifyOpTy::Pull).await
    }

    async fn insert_reposted(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "reposts",
            user.as_str(),
            ModifyOpTy::Push,
        )
        .await
    }

    async fn delete_reposted(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "reposts",
            user.as_str(),
            ModifyOpTy::Pull,
        )
        .await
    }

    async fn insert_saved(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "saved_by",
            user.as_str(),
            ModifyOpTy::Push,
        )
        .await
    }

    async fn delete_saved(&self, id: &PostId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "saved_by",
            user.as_str(),
            ModifyOpTy::Pull,
        )
        .await
    }

    async fn push_comment(&self, id: &PostId, comment: Comment) -> Result<()> {
        let model: CommentModel = comment.into();
        let value = ::mongodb::bson::to_bson(&model)
            .map_err(|e| RepositoryError::Internal(::anyhow::Error::new(e)))?;

        let res = self
            .coll
            .update_one(
                doc! { "id": id.as_str() },
                doc! { "$push": { "comments": value } },
                None,
            )
            .instrument(tracing::trace_span!("update_one"))
            .await
            .cvt()?;

        res.matched_count.let_(IntoBool::into_bool).expect_true()
    }

    async fn incr_views(&self, id: &PostId) -> Result<()> {
        let res = self
            .coll
            .update_one(
                doc! { "id": id.as_str() },
                doc! { "$inc": { "views": 1 } },
                None,
            )
            .instrument(tracing::trace_span!("update_one"))
            .await
            .cvt()?;

        res.matched_count.let_(IntoBool::into_bool).expect_true()
    }

    async fn delete(&self, id: &PostId) -> Result<Post> {
        let post: Post = self
            .coll
            .find_one_and_delete(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one_and_delete"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(post)
    }

    async fn delete_by_author(&self, author: &UserId) -> Result<u64> {
        let res = self
            .coll
            .delete_many(doc! { "author.id": author.as_str() }, None)
            .instrument(tracing::trace_span!("delete_many"))
            .await
            .cvt()?;

        Ok(res.deleted_count)
    }

    async fn watch(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>> {
        let mut stream = self
            .coll
            .watch(Vec::<Document>::new(), None)
            .await
            .cvt()?;
        let coll = self.coll.clone();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = match Self::run_query(&coll, query.clone()).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("post watch query failed: {}", e);
                        break;
                    }
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match stream.next().await {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("post change stream failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }))
    }
}

pub struct MongoNotificationRepository {
    coll: Collection<NotificationModel>,
}

impl MongoNotificationRepository {
    pub async fn new_with(_client: Client, db: Database) -> ::anyhow::Result<Self> {
        initialize_coll("notifications", &db).await?;

        Ok(Self {
            coll: db.collection("notifications"),
        })
    }

    async fn for_recipient(
        coll: &Collection<NotificationModel>,
        recipient: &UserId,
    ) -> Result<Vec<Notification>> {
        let mut opts = FindOptions::default();
        opts.sort = Some(sort_newest_first());

        let res = coll
            .find(doc! { "recipient": recipient.as_str() }, opts)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }
}

#[async_trait]
impl NotificationRepository for MongoNotificationRepository {
    async fn insert(&self, notification: Notification) -> Result<bool> {
        let model: NotificationModel = notification.into();

        self.coll
            .insert_one(model, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
            .unique_check()
    }

    async fn finds_for(&self, recipient: &UserId) -> Result<Vec<Notification>> {
        Self::for_recipient(&self.coll, recipient).await
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool> {
        let res = self
            .coll
            .update_one(
                doc! { "id": id.as_str() },
                doc! { "$set": { "read": true } },
                None,
            )
            .instrument(tracing::trace_span!("update_one"))
            .await
            .cvt()?;

        res.matched_count.let_(IntoBool::into_bool).expect_true()?;
        Ok(res.modified_count.let_(IntoBool::into_bool))
    }

    async fn delete(&self, id: &NotificationId) -> Result<Notification> {
        let notification: Notification = self
            .coll
            .find_one_and_delete(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one_and_delete"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(notification)
    }

    async fn delete_all_for(&self, recipient: &UserId) -> Result<u64> {
        let res = self
            .coll
            .delete_many(doc! { "recipient": recipient.as_str() }, None)
            .instrument(tracing::trace_span!("delete_many"))
            .await
            .cvt()?;

        Ok(res.deleted_count)
    }

    async fn watch_for(&self, recipient: &UserId) -> Result<Snapshots<Vec<Notification>>> {
        let mut stream = self
            .coll
            .watch(Vec::<Document>::new(), None)
            .await
            .cvt()?;
        let coll = self.coll.clone();
        let recipient = recipient.clone();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = match Self::for_recipient(&coll, &recipient).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("notification watch query failed: {}", e);
                        break;
                    }
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match stream.next().await {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("notification change stream failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }))
    }
}

pub struct MongoCommunityRepository {
    coll: Collection<CommunityModel>,
    messages: Collection<MessageModel>,
}

impl MongoCommunityRepository {
    pub async fn new_with(_client: Client, db: Database) -> ::anyhow::Result<Self> {
        initialize_coll("communities", &db).await?;

        Ok(Self {
            coll: db.collection("communities"),
            messages: db.collection("messages"),
        })
    }

    async fn all_communities(coll: &Collection<CommunityModel>) -> Result<Vec<Community>> {
        let res = coll
            .find(doc! {}, None)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }

    async fn is_exists_community(&self, id: &CommunityId) -> Result<bool> {
        let res = self
            .coll
            .count_documents(doc! { "id": id.as_str() }, None)
            .await
            .cvt()?
            .let_(IntoBool::into_bool);

        Ok(res)
    }

    async fn messages_of(
        messages: &Collection<MessageModel>,
        id: &CommunityId,
    ) -> Result<Vec<ChatMessage>> {
        let mut opts = FindOptions::default();
        opts.sort = Some(doc! { "created": 1 });

        let res = messages
            .find(doc! { "community_id": id.as_str() }, opts)
            .instrument(tracing::trace_span!("find"))
            .await
            .cvt()?
            .try_collect::<Vec<_>>()
            .await
            .cvt()?
            .drain(..)
            .map(|m| m.into())
            .collect();

        Ok(res)
    }
}

#[async_trait]
impl CommunityRepository for MongoCommunityRepository {
    async fn insert(&self, community: Community) -> Result<bool> {
        let model: CommunityModel = community.into();

        self.coll
            .insert_one(model, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
            .unique_check()
    }

    async fn find(&self, id: &CommunityId) -> Result<Community> {
        let community: Community = self
            .coll
            .find_one(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(community)
    }

    async fn finds(&self) -> Result<Vec<Community>> {
        Self::all_communities(&self.coll).await
    }

    async fn set_privacy(&self, id: &CommunityId, privacy: Privacy) -> Result<Community> {
        let value = match privacy {
            Privacy::Public => Bson::Null,
            Privacy::Private { join_code } => Bson::String(join_code),
        };

        let mut opts = FindOneAndUpdateOptions::default();
        opts.return_document = Some(ReturnDocument::After);

        let community: Community = self
            .coll
            .find_one_and_update(
                doc! { "id": id.as_str() },
                doc! { "$set": { "join_code": value } },
                opts,
            )
            .instrument(tracing::trace_span!("find_one_and_update"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        Ok(community)
    }

    async fn is_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        is_contains(&self.coll, id.as_str(), "members", user.as_str()).await
    }

    async fn insert_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "members",
            user.as_str(),
            ModifyOpTy::Push,
        )
        .await
    }

    async fn delete_member(&self, id: &CommunityId, user: &UserId) -> Result<bool> {
        modify_set(
            &self.coll,
            id.as_str(),
            "members",
            user.as_str(),
            ModifyOpTy::Pull,
        )
        .await
    }

    async fn delete(&self, id: &CommunityId) -> Result<Community> {
        let community: Community = self
            .coll
            .find_one_and_delete(doc! { "id": id.as_str() }, None)
            .instrument(tracing::trace_span!("find_one_and_delete"))
            .await
            .cvt()?
            .opt_cvt()?
            .into();

        self.messages
            .delete_many(doc! { "community_id": id.as_str() }, None)
            .instrument(tracing::trace_span!("delete_many"))
            .await
            .cvt()?;

        Ok(community)
    }

    async fn push_message(&self, id: &CommunityId, message: ChatMessage) -> Result<ChatMessage> {
        self.is_exists_community(id).await?.expect_true()?;

        let model = MessageModel {
            community_id: id.0.clone(),
            text: message.text.clone(),
            sender: message.sender.0.clone(),
            username: message.username.clone(),
            created: message.created.timestamp_millis(),
        };

        self.messages
            .insert_one(model, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
            .cvt()?;

        Ok(message)
    }

    async fn messages(&self, id: &CommunityId) -> Result<Vec<ChatMessage>> {
        Self::messages_of(&self.messages, id).await
    }

    async fn watch_all(&self) -> Result<Snapshots<Vec<Community>>> {
        let mut stream = self
            .coll
            .watch(Vec::<Document>::new(), None)
            .await
            .cvt()?;
        let coll = self.coll.clone();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = match Self::all_communities(&coll).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("community watch query failed: {}", e);
                        break;
                    }
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match stream.next().await {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("community change stream failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }))
    }

    async fn watch_messages(&self, id: &CommunityId) -> Result<Snapshots<Vec<ChatMessage>>> {
        let mut stream = self
            .messages
            .watch(Vec::<Document>::new(), None)
            .await
            .cvt()?;
        let messages = self.messages.clone();
        let id = id.clone();

        Ok(Snapshots::produce(|tx| async move {
            loop {
                let snap = match Self::messages_of(&messages, &id).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("message watch query failed: {}", e);
                        break;
                    }
                };
                if tx.send(snap).is_err() {
                    break;
                }

                match stream.next().await {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("message change stream failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }))
    }
}
