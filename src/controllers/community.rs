//! Tribes: membership, the code gate, and per-community chat.
//!
//! Membership is a small state machine: `NotMember` joins a public tribe
//! directly; a private one answers `AwaitingCode` until the exact stored
//! join code is supplied. Only members may open the chat, an ascending
//! append-only message feed delivered by a standing subscription.

use std::sync::Arc;

use chrono::Utc;

use crate::entities::{ChatMessage, Community, CommunityId, Privacy, Profile, UserId};
use crate::handlers::Handler;
use crate::repositories::{CommunityRepository, RepositoryError};
use crate::subscriptions::Snapshots;
use crate::utils::is_blank;

type Result<T> = ::std::result::Result<T, CommunityError>;

#[derive(Debug)]
pub enum CommunityError {
    WrongCode,
    EmptyCode,
    EmptyName,
    EmptyMessage,
    NotMember,
    NotCreator,
    Repository(RepositoryError),
}

impl ::std::fmt::Display for CommunityError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            CommunityError::WrongCode => write!(f, "join code does not match."),
            CommunityError::EmptyCode => write!(f, "a private tribe needs a join code."),
            CommunityError::EmptyName => write!(f, "tribe name is required."),
            CommunityError::EmptyMessage => write!(f, "message text is required."),
            CommunityError::NotMember => write!(f, "members only."),
            CommunityError::NotCreator => write!(f, "only the creator can do that."),
            CommunityError::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl ::std::error::Error for CommunityError {}

impl From<RepositoryError> for CommunityError {
    fn from(e: RepositoryError) -> Self { CommunityError::Repository(e) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    NotMember,
    /// Private tribe: entry is gated until the code is supplied.
    AwaitingCode,
    Member,
}

/// A joined chat view: the community and its live message feed.
pub struct ChatRoom {
    pub community: Community,
    messages: Snapshots<Vec<ChatMessage>>,
}

impl ChatRoom {
    /// Next full message-list snapshot, ascending by creation time.
    pub async fn recv(&mut self) -> Option<Vec<ChatMessage>> { self.messages.recv().await }
}

pub struct CommunityController {
    handler: Arc<Handler>,
}

impl CommunityController {
    pub fn new(handler: Arc<Handler>) -> Self { Self { handler } }

    pub async fn create(
        &self,
        creator: &Profile,
        name: &str,
        privacy: Privacy,
    ) -> Result<Community> {
        if is_blank(name) {
            return Err(CommunityError::EmptyName);
        }
        if let Privacy::Private { join_code } = &privacy {
            if is_blank(join_code) {
                return Err(CommunityError::EmptyCode);
            }
        }

        let community = Community {
            id: CommunityId::generate(),
            name: name.trim().to_string(),
            privacy,
            members: ::std::iter::once(creator.id.clone()).collect(),
            creator: creator.id.clone(),
            created: Utc::now(),
        };

        self.handler.community_repository.insert(community.clone()).await?;

        Ok(community)
    }

    pub async fn list(&self) -> Result<Vec<Community>> {
        Ok(self.handler.community_repository.finds().await?)
    }

    pub async fn watch(&self) -> Result<Snapshots<Vec<Community>>> {
        Ok(self.handler.community_repository.watch_all().await?)
    }

    pub fn join_state(viewer: &UserId, community: &Community) -> JoinState {
        match community.is_member(viewer) {
            true => JoinState::Member,
            false => JoinState::NotMember,
        }
    }

    /// Direct join. A private tribe answers `AwaitingCode`; nothing is
    /// written until [`join_with_code`](Self::join_with_code) succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn join(&self, viewer: &UserId, id: &CommunityId) -> Result<JoinState> {
        let community = self.handler.community_repository.find(id).await?;

        if community.is_member(viewer) {
            return Ok(JoinState::Member);
        }

        match community.privacy {
            Privacy::Public => {
                self.handler.community_repository.insert_member(id, viewer).await?;
                Ok(JoinState::Member)
            }
            Privacy::Private { .. } => Ok(JoinState::AwaitingCode),
        }
    }

    /// Completes a code-gated join. A mismatch changes nothing.
    #[tracing::instrument(skip(self, code))]
    pub async fn join_with_code(
        &self,
        viewer: &UserId,
        id: &CommunityId,
        code: &str,
    ) -> Result<JoinState> {
        let community = self.handler.community_repository.find(id).await?;

        if community.is_member(viewer) {
            return Ok(JoinState::Member);
        }

        if let Privacy::Private { join_code } = &community.privacy {
            if join_code != code {
                return Err(CommunityError::WrongCode);
            }
        }

        self.handler.community_repository.insert_member(id, viewer).await?;
        Ok(JoinState::Member)
    }

    pub async fn leave(&self, viewer: &UserId, id: &CommunityId) -> Result<JoinState> {
        self.handler.community_repository.delete_member(id, viewer).await?;

        Ok(JoinState::NotMember)
    }

    /// Members only. The room subscribes to the community's message
    /// sub-collection; dropping it tears the feed down.
    pub async fn open_chat(&self, viewer: &UserId, id: &CommunityId) -> Result<ChatRoom> {
        let community = self.handler.community_repository.find(id).await?;

        if !community.is_member(viewer) {
            return Err(CommunityError::NotMember);
        }

        let messages = self.handler.community_repository.watch_messages(id).await?;

        Ok(ChatRoom {
            community,
            messages,
        })
    }

    #[tracing::instrument(skip(self, sender))]
    pub async fn send_message(
        &self,
        sender: &Profile,
        id: &CommunityId,
        text: &str,
    ) -> Result<ChatMessage> {
        if is_blank(text) {
            return Err(CommunityError::EmptyMessage);
        }

        let community = self.handler.community_repository.find(id).await?;
        if !community.is_member(&sender.id) {
            return Err(CommunityError::NotMember);
        }

        let message = ChatMessage {
            text: text.to_string(),
            sender: sender.id.clone(),
            username: sender.username.clone(),
            created: Utc::now(),
        };

        Ok(self.handler.community_repository.push_message(id, message).await?)
    }

    /// Creator only. Going private requires a fresh non-empty code; going
    /// public clears the stored code unconditionally.
    #[tracing::instrument(skip(self))]
    pub async fn set_privacy(
        &self,
        actor: &UserId,
        id: &CommunityId,
        privacy: Privacy,
    ) -> Result<Community> {
        let community = self.handler.community_repository.find(id).await?;

        if community.creator != *actor {
            return Err(CommunityError::NotCreator);
        }

        if let Privacy::Private { join_code } = &privacy {
            if is_blank(join_code) {
                return Err(CommunityError::EmptyCode);
            }
        }

        Ok(self.handler.community_repository.set_privacy(id, privacy).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthGateway;
    use crate::constructors::{in_memory, App};
    use crate::handlers::ProfileSetupForm;

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

    #[tokio::test]
    async fn public_join_and_leave() {
        let app = in_memory();
        let tribes = app.communities();
        let creator = setup_profile(&app, "c@b.c", "creator").await;
        let member = setup_profile(&app, "m@b.c", "member").await;

        let tribe = tribes
            .create(&creator, "rustaceans", Privacy::Public)
            .await
            .unwrap();
        assert!(tribe.is_member(&creator.id));

        assert_eq!(
            tribes.join(&member.id, &tribe.id).await.unwrap(),
            JoinState::Member
        );
        // idempotent
        assert_eq!(
            tribes.join(&member.id, &tribe.id).await.unwrap(),
            JoinState::Member
        );

        assert_eq!(
            tribes.leave(&member.id, &tribe.id).await.unwrap(),
            JoinState::NotMember
        );
        let stored = tribes.list().await.unwrap().remove(0);
        assert!(!stored.is_member(&member.id));
    }

    #[tokio::test]
    async fn private_join_is_code_gated() {
        let app = in_memory();
        let tribes = app.communities();
        let creator = setup_profile(&app, "c@b.c", "creator").await;
        let outsider = setup_profile(&app, "o@b.c", "outsider").await;

        let tribe = tribes
            .create(
                &creator,
                "secret",
                Privacy::Private {
                    join_code: "sesame".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            tribes.join(&outsider.id, &tribe.id).await.unwrap(),
            JoinState::AwaitingCode
        );

        match tribes.join_with_code(&outsider.id, &tribe.id, "guess").await {
            Err(CommunityError::WrongCode) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        let stored = tribes.list().await.unwrap().remove(0);
        assert!(!stored.is_member(&outsider.id));

        assert_eq!(
            tribes
                .join_with_code(&outsider.id, &tribe.id, "sesame")
                .await
                .unwrap(),
            JoinState::Member
        );
    }

    #[tokio::test]
    async fn privacy_toggle_rules() {
        let app = in_memory();
        let tribes = app.communities();
        let creator = setup_profile(&app, "c@b.c", "creator").await;
        let other = setup_profile(&app, "o@b.c", "other").await;

        let tribe = tribes.create(&creator, "open", Privacy::Public).await.unwrap();

        // creator only
        match tribes
            .set_privacy(
                &other.id,
                &tribe.id,
                Privacy::Private {
                    join_code: "x".to_string(),
                },
            )
            .await
        {
            Err(CommunityError::NotCreator) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        // public -> private without a code is rejected, state unchanged
        match tribes
            .set_privacy(
                &creator.id,
                &tribe.id,
                Privacy::Private {
                    join_code: "  ".to_string(),
                },
            )
            .await
        {
            Err(CommunityError::EmptyCode) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert_eq!(
            tribes.list().await.unwrap().remove(0).privacy,
            Privacy::Public
        );

        let private = tribes
            .set_privacy(
                &creator.id,
                &tribe.id,
                Privacy::Private {
                    join_code: "sesame".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            private.privacy,
            Privacy::Private {
                join_code: "sesame".to_string()
            }
        );

        // private -> public always clears the code
        let public = tribes
            .set_privacy(&creator.id, &tribe.id, Privacy::Public)
            .await
            .unwrap();
        assert_eq!(public.privacy, Privacy::Public);
    }

    #[tokio::test]
    async fn chat_is_member_only_and_ordered() {
        let app = in_memory();
        let tribes = app.communities();
        let creator = setup_profile(&app, "c@b.c", "creator").await;
        let outsider = setup_profile(&app, "o@b.c", "outsider").await;

        let tribe = tribes.create(&creator, "chatty", Privacy::Public).await.unwrap();

        match tribes.open_chat(&outsider.id, &tribe.id).await {
            Err(CommunityError::NotMember) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        match tribes.send_message(&outsider, &tribe.id, "hi").await {
            Err(CommunityError::NotMember) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        let mut room = tribes.open_chat(&creator.id, &tribe.id).await.unwrap();
        assert!(room.recv().await.unwrap().is_empty());

        match tribes.send_message(&creator, &tribe.id, "  ").await {
            Err(CommunityError::EmptyMessage) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        tribes.send_message(&creator, &tribe.id, "first").await.unwrap();
        tribes.send_message(&creator, &tribe.id, "second").await.unwrap();

        // drain to the latest snapshot
        let mut latest = room.recv().await.unwrap();
        while latest.len() < 2 {
            latest = room.recv().await.unwrap();
        }
        assert_eq!(
            latest.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["first", "second"]
        );
        assert_eq!(latest[0].username, "creator");
    }
}
