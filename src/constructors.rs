use std::sync::Arc;

use crate::auth::{AuthGateway, InMemoryAuth};
use crate::controllers::{AdminController, CommunityController, FeedController, SessionController};
use crate::entities::{Notification, Post, Profile};
use crate::handlers::Handler;
use crate::repositories::mock::{InMemoryCommunityRepository, InMemoryRepository};
use crate::repositories::mongo::{
    MongoCommunityRepository, MongoNotificationRepository, MongoPostRepository,
    MongoProfileRepository,
};

/// Composition root. Controllers are built per view; they all share the one
/// handler (and through it the injected backend).
pub struct App {
    pub handler: Arc<Handler>,
    pub auth: Arc<dyn AuthGateway + Sync + Send>,
}

impl App {
    pub fn session(&self) -> SessionController {
        SessionController::start(
            Arc::clone(&self.auth),
            Arc::clone(&self.handler.profile_repository),
        )
    }

    pub fn feed(&self) -> FeedController { FeedController::new(Arc::clone(&self.handler)) }

    pub fn communities(&self) -> CommunityController {
        CommunityController::new(Arc::clone(&self.handler))
    }

    pub fn admin(&self) -> AdminController { AdminController::new(Arc::clone(&self.handler)) }
}

/// Fully in-process app: in-memory repositories and auth. What the tests
/// run against.
pub fn in_memory() -> App {
    App {
        handler: Arc::new(Handler {
            profile_repository: Arc::new(InMemoryRepository::<Profile>::new()),
            post_repository: Arc::new(InMemoryRepository::<Post>::new()),
            notification_repository: Arc::new(InMemoryRepository::<Notification>::new()),
            community_repository: Arc::new(InMemoryCommunityRepository::new()),
        }),
        auth: Arc::new(InMemoryAuth::new()),
    }
}

/// MongoDB-backed app. The auth gateway stays injected: the hosted identity
/// provider has no document-store rendering.
pub async fn mongo(
    uri_str: impl AsRef<str>,
    db_name: impl AsRef<str>,
    auth: Arc<dyn AuthGateway + Sync + Send>,
) -> ::anyhow::Result<App> {
    let c = ::mongodb::Client::with_uri_str(uri_str.as_ref()).await?;
    let db = c.database(db_name.as_ref());

    let app = App {
        handler: Arc::new(Handler {
            profile_repository: Arc::new(
                MongoProfileRepository::new_with(c.clone(), db.clone()).await?,
            ),
            post_repository: Arc::new(MongoPostRepository::new_with(c.clone(), db.clone()).await?),
            notification_repository: Arc::new(
                MongoNotificationRepository::new_with(c.clone(), db.clone()).await?,
            ),
            community_repository: Arc::new(MongoCommunityRepository::new_with(c, db).await?),
        }),
        auth,
    };

    Ok(app)
}
