pub mod admin;
pub mod community;
pub mod feed;
pub mod session;

pub use admin::{AdminController, AdminError, AdminOverview};
pub use community::{ChatRoom, CommunityController, CommunityError, JoinState};
pub use feed::{FeedController, FeedView, PostMirror, PostPatch, POSTS_PER_PAGE};
pub use session::{Route, SessionController, SessionState};
