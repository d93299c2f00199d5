//! Identity provider seam.
//!
//! The hosted auth backend is consumed through [`AuthGateway`]: sign-in,
//! registration, sign-out and a standing identity stream. Controllers only
//! ever see the trait, so tests run against [`InMemoryAuth`].

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::entities::UserId;
use crate::subscriptions::Snapshots;
use crate::utils::is_blank;

type Result<T> = ::std::result::Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    pub email: String,
}

#[async_trait]
pub trait AuthGateway {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;
    async fn register(&self, email: &str, password: &str) -> Result<Identity>;
    async fn sign_out(&self);

    /// Current identity or absence, delivered immediately and on every
    /// change until the handle is dropped.
    fn subscribe(&self) -> Snapshots<Option<Identity>>;
}

#[derive(Debug)]
pub enum AuthError {
    BadCredentials,
    DuplicateRegistration,
    WeakPassword,
    Internal(anyhow::Error),
}

impl AuthError {
    /// Raw backend error code, the way the hosted provider spells it.
    pub fn code(&self) -> &str {
        match self {
            AuthError::BadCredentials => "auth/invalid-credential",
            AuthError::DuplicateRegistration => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::Internal(_) => "auth/internal-error",
        }
    }

    /// Human-readable form for the sign-in form: provider prefix stripped,
    /// dashes to spaces, leading capital.
    pub fn humanize(&self) -> String { humanize_code(self.code()) }
}

impl ::std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            AuthError::Internal(e) => write!(f, "{} ({})", self.humanize(), e),
            _ => write!(f, "{}", self.humanize()),
        }
    }
}

impl ::std::error::Error for AuthError {}

pub fn humanize_code(code: &str) -> String {
    let stripped = code.strip_prefix("auth/").unwrap_or(code);
    let spaced = stripped.replace('-', " ");

    let mut chars = spaced.chars();
    match chars.next() {
        None => spaced,
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

struct Account {
    uid: UserId,
    email: String,
    password: String,
}

/// In-process stand-in for the hosted auth provider. Registration signs the
/// new account in, mirroring the backend's behavior.
pub struct InMemoryAuth {
    accounts: Mutex<Vec<Account>>,
    state: watch::Sender<Option<Identity>>,
}

impl InMemoryAuth {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(vec![]),
            state,
        }
    }
}

impl Default for InMemoryAuth {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl AuthGateway for InMemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let accounts = self.accounts.lock().await;

        let found = accounts
            .iter()
            .find(|a| a.email == email && a.password == password)
            .ok_or(AuthError::BadCredentials)?;

        let identity = Identity {
            uid: found.uid.clone(),
            email: found.email.clone(),
        };
        self.state.send_replace(Some(identity.clone()));

        Ok(identity)
    }

    async fn register(&self, email: &str, password: &str) -> Result<Identity> {
        if is_blank(password) || password.len() < 6 {
            return Err(AuthError::WeakPassword);
        }

        let mut accounts = self.accounts.lock().await;

        if accounts.iter().any(|a| a.email == email) {
            return Err(AuthError::DuplicateRegistration);
        }

        let account = Account {
            uid: UserId::generate(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let identity = Identity {
            uid: account.uid.clone(),
            email: account.email.clone(),
        };
        accounts.push(account);

        self.state.send_replace(Some(identity.clone()));

        Ok(identity)
    }

    async fn sign_out(&self) {
        self.state.send_replace(None);
    }

    fn subscribe(&self) -> Snapshots<Option<Identity>> {
        let mut rx = self.state.subscribe();

        Snapshots::produce(|tx| async move {
            loop {
                let current = rx.borrow_and_update().clone();
                if tx.send(current).is_err() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanizes_provider_codes() {
        assert_eq!(humanize_code("auth/invalid-credential"), "Invalid credential");
        assert_eq!(
            humanize_code("auth/email-already-in-use"),
            "Email already in use"
        );
        assert_eq!(humanize_code("no-prefix"), "No prefix");
    }

    #[tokio::test]
    async fn register_then_sign_out_then_sign_in() {
        let auth = InMemoryAuth::new();
        let mut ids = auth.subscribe();

        assert_eq!(ids.recv().await, Some(None));

        let registered = auth.register("a@b.c", "hunter22").await.unwrap();
        assert_eq!(ids.recv().await.unwrap().unwrap(), registered);

        auth.sign_out().await;
        assert_eq!(ids.recv().await, Some(None));

        let back = auth.sign_in("a@b.c", "hunter22").await.unwrap();
        assert_eq!(back.uid, registered.uid);
    }

    #[tokio::test]
    async fn rejects_duplicates_and_bad_credentials() {
        let auth = InMemoryAuth::new();
        auth.register("a@b.c", "hunter22").await.unwrap();

        match auth.register("a@b.c", "other-pass").await {
            Err(AuthError::DuplicateRegistration) => {}
            other => panic!("unexpected: {:?}", other.map(|i| i.email)),
        }

        match auth.sign_in("a@b.c", "wrong").await {
            Err(AuthError::BadCredentials) => {}
            other => panic!("unexpected: {:?}", other.map(|i| i.email)),
        }

        match auth.register("weak@b.c", "pw").await {
            Err(AuthError::WeakPassword) => {}
            other => panic!("unexpected: {:?}", other.map(|i| i.email)),
        }
    }
}
