//! Session-scoped Postgres advisory locks.

use sqlx::postgres::PgConnection;
use sqlx::Connection;

use crate::error::Result;
use crate::store::LedgerStore;

/// A held `pg_advisory_lock` tied to a dedicated connection.
///
/// The lock is session-scoped: it lives as long as the connection
/// does. The connection is detached from the pool, so dropping the
/// guard without calling [`AdvisoryLock::release`] closes the socket
/// and the server releases the lock on its own.
pub struct AdvisoryLock {
    conn: PgConnection,
    key: i64,
}

impl AdvisoryLock {
    /// Explicitly unlock and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlock statement fails; the connection
    /// is closed regardless, which releases the lock server-side.
    pub async fn release(mut self) -> Result<()> {
        let res = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut self.conn)
            .await;
        let _ = self.conn.close().await;
        res?;
        Ok(())
    }

    /// The lock key this guard holds.
    #[must_use]
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl LedgerStore {
    /// Try to take the advisory lock for `key` without blocking.
    ///
    /// Returns `None` when another session already holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be acquired or the lock
    /// query fails.
    pub async fn try_advisory_lock(&self, key: i64) -> Result<Option<AdvisoryLock>> {
        let mut conn = self.pool().acquire().await?.detach();
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut conn)
            .await?;
        if locked {
            Ok(Some(AdvisoryLock { conn, key }))
        } else {
            let _ = conn.close().await;
            Ok(None)
        }
    }
}
