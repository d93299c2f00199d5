use mongodb::bson::doc;
use mongodb::error::Result as MongoResult;
use mongodb::Database;
use tracing::Instrument;

use super::{RepositoryError, Result as RepoResult};

pub(super) async fn initialize_coll(
    coll_name: impl Into<::mongodb::bson::Bson>,
    db: &Database,
) -> MongoResult<()> {
    db.run_command(
        doc! {
            "createIndexes": coll_name.into(),
            "indexes": [{
                "name": "unique_id",
                "key": {
                    "id": 1
                },
                "unique": true
            }],
        },
        None,
    )
    .instrument(tracing::trace_span!("run_command"))
    .await?;

    Ok(())
}

pub(super) trait ConvertError<T> {
    fn cvt(self) -> RepoResult<T>;
}
impl<T> ConvertError<T> for MongoResult<T> {
    #[inline]
    fn cvt(self) -> RepoResult<T> {
        self.map_err(|e| RepositoryError::Internal(::anyhow::Error::new(e)))
    }
}

pub(super) trait ConvertOption<T> {
    fn opt_cvt(self) -> RepoResult<T>;
}
impl<T> ConvertOption<T> for Option<T> {
    #[inline]
    fn opt_cvt(self) -> RepoResult<T> { self.ok_or(RepositoryError::NotFound) }
}

pub(super) trait IntoBool {
    fn into_bool(self) -> bool;
}
impl IntoBool for u64 {
    #[inline]
    fn into_bool(self) -> bool { self != 0 }
}

/// Duplicate-key on the unique `id` index means "already present", which
/// callers observe as `Ok(false)`, not an error.
pub(super) trait UniqueCheck {
    fn unique_check(self) -> RepoResult<bool>;
}
impl UniqueCheck for MongoResult<::mongodb::results::InsertOneResult> {
    fn unique_check(self) -> RepoResult<bool> {
        match self {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(RepositoryError::Internal(::anyhow::Error::new(e))),
        }
    }
}

fn is_duplicate_key(e: &::mongodb::error::Error) -> bool {
    match &*e.kind {
        ::mongodb::error::ErrorKind::Write(::mongodb::error::WriteFailure::WriteError(we)) => {
            we.code == 11000
        }
        _ => false,
    }
}

pub(super) trait ExpectTrue {
    fn expect_true(self) -> RepoResult<()>;
}
impl ExpectTrue for bool {
    #[inline]
    fn expect_true(self) -> RepoResult<()> {
        match self {
            true => Ok(()),
            false => Err(RepositoryError::NotFound),
        }
    }
}
