//! Session: who is signed in, and do they have a profile yet.
//!
//! One task consumes the identity stream; each authenticated identity opens
//! a live subscription to its own profile document, keyed in an arena so an
//! identity change (or sign-out) tears the previous one down. Loading stays
//! set until the first identity resolution and, when authenticated, the
//! first profile snapshot — a subscription failure clears it with an absent
//! profile rather than leaving the caller spinning.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::auth::{AuthGateway, Identity};
use crate::entities::{Profile, UserId};
use crate::repositories::ProfileRepository;
use crate::subscriptions::{Subscription, SubscriptionArena};

#[derive(Debug, Clone)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
        }
    }

    /// Routing is a pure function of (identity present?, profile present?).
    pub fn route(&self) -> Route {
        match (self.loading, &self.identity, &self.profile) {
            (true, _, _) => Route::Loading,
            (false, None, _) => Route::SignIn,
            (false, Some(_), None) => Route::ProfileSetup,
            (false, Some(_), Some(_)) => Route::Shell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Loading,
    SignIn,
    ProfileSetup,
    Shell,
}

pub struct SessionController {
    state: watch::Receiver<SessionState>,
    _sub: Subscription,
}

impl SessionController {
    pub fn start(
        auth: Arc<dyn AuthGateway + Sync + Send>,
        profiles: Arc<dyn ProfileRepository + Sync + Send>,
    ) -> Self {
        let (tx, rx) = watch::channel(SessionState::initial());
        let mut identities = auth.subscribe();

        let sub = Subscription::spawn(async move {
            let mut state = SessionState::initial();
            let mut arena: SubscriptionArena<UserId> = SubscriptionArena::new();
            let (profile_tx, mut profile_rx) =
                mpsc::unbounded_channel::<(UserId, Option<Profile>)>();

            loop {
                tokio::select! {
                    delivered = identities.recv() => match delivered {
                        None => break,
                        Some(None) => {
                            arena.clear();
                            state.identity = None;
                            state.profile = None;
                            state.loading = false;
                            let _ = tx.send(state.clone());
                        }
                        Some(Some(identity)) => {
                            let uid = identity.uid.clone();
                            state.identity = Some(identity);
                            state.profile = None;

                            match profiles.watch(&uid).await {
                                Ok(mut snaps) => {
                                    state.loading = true;

                                    let forward = profile_tx.clone();
                                    let key = uid.clone();
                                    arena.put(uid, Subscription::spawn(async move {
                                        while let Some(snap) = snaps.recv().await {
                                            if forward.send((key.clone(), snap)).is_err() {
                                                return;
                                            }
                                        }
                                        // feed ended (backend error): absent,
                                        // so routing can proceed
                                        let _ = forward.send((key, None));
                                    }));
                                }
                                Err(e) => {
                                    tracing::warn!("profile subscription failed: {}", e);
                                    state.loading = false;
                                }
                            }

                            let _ = tx.send(state.clone());
                        }
                    },
                    Some((uid, profile)) = profile_rx.recv() => {
                        // a snapshot from a superseded identity is stale
                        let current = state
                            .identity
                            .as_ref()
                            .map(|i| i.uid == uid)
                            .unwrap_or(false);
                        if !current {
                            continue;
                        }

                        state.profile = profile;
                        state.loading = false;
                        let _ = tx.send(state.clone());
                    }
                }
            }
        });

        Self {
            state: rx,
            _sub: sub,
        }
    }

    pub fn state(&self) -> SessionState { self.state.borrow().clone() }

    pub fn route(&self) -> Route { self.state.borrow().route() }

    /// Waits for the next state publication.
    pub async fn changed(&mut self) -> SessionState {
        let _ = self.state.changed().await;
        self.state.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::AuthGateway;
    use crate::constructors::in_memory;
    use crate::handlers::ProfileSetupForm;

    async fn wait_for(ctl: &mut SessionController, route: Route) -> SessionState {
        for _ in 0..32 {
            if ctl.route() == route {
                return ctl.state();
            }
            let state = tokio::time::timeout(Duration::from_secs(2), ctl.changed())
                .await
                .expect("session state never settled");
            if state.route() == route {
                return state;
            }
        }
        panic!("route {:?} never reached (at {:?})", route, ctl.route());
    }

    #[tokio::test]
    async fn routes_through_the_whole_lifecycle() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let app = in_memory();
        let mut session = app.session();

        // anonymous: loading clears to sign-in
        wait_for(&mut session, Route::SignIn).await;

        // authenticated but no profile document yet
        let identity = app.auth.register("a@b.c", "hunter22").await.unwrap();
        wait_for(&mut session, Route::ProfileSetup).await;

        // profile setup completes; live profile snapshot arrives
        app.handler
            .create_profile(
                &identity,
                ProfileSetupForm {
                    full_name: "Ada".to_string(),
                    username: "ada".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let state = wait_for(&mut session, Route::Shell).await;
        assert_eq!(state.profile.unwrap().username, "ada");

        // profile edits are pushed, not polled
        app.handler
            .update_profile(
                &identity.uid,
                crate::repositories::ProfileMutation {
                    bio: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let state = tokio::time::timeout(Duration::from_secs(2), session.changed())
            .await
            .expect("profile update never arrived");
        assert_eq!(state.profile.unwrap().bio, "hello");

        app.auth.sign_out().await;
        let state = wait_for(&mut session, Route::SignIn).await;
        assert!(state.identity.is_none() && state.profile.is_none());
    }
}
