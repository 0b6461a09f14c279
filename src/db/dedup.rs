//! Get-or-create primitive
//!
//! Looks an entity up by its identifying attributes and inserts it when
//! missing. The insert runs under a SAVEPOINT: if a concurrent creator won
//! the race, the uniqueness violation only unwinds the savepoint, the
//! caller's transaction stays usable, and the lookup is repeated to pick up
//! the surviving row. No locks are taken up front.

use std::fmt::Debug;

use rusqlite::{ffi, Connection, ErrorCode, Transaction};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Lookups before giving up on a key that keeps conflicting
const MAX_ATTEMPTS: u32 = 3;

/// An entity that can be found or created from its identifying key
pub trait Materialize: Sized {
    /// Attributes that uniquely identify one row
    type Key: Debug;

    /// Entity name used in logs and errors
    const KIND: &'static str;

    /// Exact-match lookup on the key
    fn find(conn: &Connection, key: &Self::Key) -> Result<Option<Self>, StorageError>;

    /// Insert a new row for the key. Must fail with a uniqueness violation
    /// if the row already exists.
    fn insert(conn: &Connection, key: &Self::Key) -> rusqlite::Result<Self>;
}

/// Return the entity for `key`, creating it if it does not exist yet.
///
/// The created row is only durable once the caller commits `tx`.
pub fn get_or_create<T: Materialize>(
    tx: &mut Transaction<'_>,
    key: &T::Key,
) -> Result<T, StorageError> {
    for attempt in 1..=MAX_ATTEMPTS {
        if let Some(found) = T::find(tx, key)? {
            return Ok(found);
        }

        let sp = tx.savepoint()?;
        match T::insert(&sp, key) {
            Ok(created) => {
                sp.commit()?;
                debug!(kind = T::KIND, key = ?key, "Created row");
                return Ok(created);
            }
            Err(e) if is_unique_violation(&e) => {
                // Dropping the savepoint rolls back just the failed insert
                drop(sp);
                warn!(kind = T::KIND, key = ?key, attempt, "Uniqueness conflict, re-querying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // The last conflict's winner may be visible by now
    if let Some(found) = T::find(tx, key)? {
        return Ok(found);
    }

    Err(StorageError::Conflict(format!(
        "{} {:?} conflicted {} times without becoming visible",
        T::KIND,
        key,
        MAX_ATTEMPTS
    )))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
