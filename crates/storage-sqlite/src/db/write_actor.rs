//! Serializes all writes through one connection on a dedicated thread.
//!
//! Each job runs inside an immediate transaction; an error from the job
//! rolls back everything it wrote.

use std::any::Any;

use diesel::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};
use tradesync_core::errors::{DatabaseError, Error, Result};

use super::{get_connection, DbPool};
use crate::errors::StorageError;

const WRITE_QUEUE_CAPACITY: usize = 256;

type BoxedValue = Box<dyn Any + Send>;
type Job = Box<dyn FnOnce(&mut SqliteConnection) -> Result<BoxedValue> + Send>;
type Reply = oneshot::Sender<Result<BoxedValue>>;

/// Handle to the writer thread. Cheap to clone.
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::Sender<(Job, Reply)>,
}

/// Carries either a domain error from the job or a diesel error from the
/// transaction itself.
enum TxError {
    Core(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

fn writer_unavailable() -> Error {
    Error::Database(DatabaseError::Internal(
        "database writer is not running".to_string(),
    ))
}

fn run_job(pool: &DbPool, job: Job) -> Result<BoxedValue> {
    let mut conn = get_connection(pool)?;
    conn.immediate_transaction::<_, TxError, _>(|conn| job(conn).map_err(TxError::Core))
        .map_err(|err| match err {
            TxError::Core(err) => err,
            TxError::Diesel(err) => StorageError::from(err).into(),
        })
}

pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::channel::<(Job, Reply)>(WRITE_QUEUE_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("tradesync-db-writer".to_string())
        .spawn(move || {
            while let Some((job, reply)) = receiver.blocking_recv() {
                let _ = reply.send(run_job(&pool, job));
            }
            debug!("Database writer stopped");
        });
    if let Err(err) = spawned {
        error!("Failed to start database writer: {}", err);
    }
    WriteHandle { sender }
}

impl WriteHandle {
    /// Runs `job` on the writer connection inside a transaction.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |conn| job(conn).map(|value| Box::new(value) as BoxedValue));
        self.sender
            .send((job, reply))
            .await
            .map_err(|_| writer_unavailable())?;
        let value = response.await.map_err(|_| writer_unavailable())??;
        value.downcast::<T>().map(|value| *value).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "database writer returned an unexpected value".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_db::setup_db;
    use super::*;
    use diesel::prelude::*;

    use crate::schema::tracked_accounts;

    #[tokio::test]
    async fn failed_job_rolls_back_its_writes() {
        let db = setup_db();

        let result: Result<()> = db
            .writer
            .exec(|conn| {
                diesel::insert_into(tracked_accounts::table)
                    .values((
                        tracked_accounts::account_id.eq("0xrollback"),
                        tracked_accounts::added_at.eq("now"),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Err(Error::validation("abort"))
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let mut conn = get_connection(&db.pool).expect("conn");
        let count: i64 = tracked_accounts::table
            .count()
            .get_result(&mut conn)
            .expect("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn returns_the_job_value() {
        let db = setup_db();
        let value = db.writer.exec(|_conn| Ok(41 + 1)).await.expect("value");
        assert_eq!(value, 42);
    }
}
