use crate::core::db;
use crate::core::error;
use crate::core::store::Store;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use ulid::Ulid;

/// Serialized access layer for the pipeline database.
///
/// Every stage operation goes through `with_conn`, which takes an in-process
/// lock (the table store's own row locking is the only cross-process safety
/// net, per the pipeline's batch concurrency model) and appends one audit
/// event per operation to `stage.events.jsonl`.
pub struct DbBroker {
    db_path: PathBuf,
    events_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StageEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            db_path: store.db_path(),
            events_log_path: store.events_log_path(),
        }
    }

    /// Execute a closure with a serialized connection to the pipeline DB.
    pub fn with_conn<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, error::SortpipeError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SortpipeError>,
    {
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap();

        let conn = db::db_connect(&self.db_path.to_string_lossy())?;
        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, status)?;

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), error::SortpipeError> {
        use std::fs::OpenOptions;
        use std::io::Write;
        use std::time::{SystemTime, UNIX_EPOCH};

        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let ts = format!("{}Z", secs);

        let ev = StageEvent {
            ts,
            event_id: Ulid::new().to_string(),
            actor: actor.to_string(),
            op: op.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_log_path)
            .map_err(error::SortpipeError::IoError)?;

        let line = serde_json::to_string(&ev)?;
        writeln!(f, "{}", line).map_err(error::SortpipeError::IoError)?;
        Ok(())
    }
}
