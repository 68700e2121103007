use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::Connection;
use std::fs;

pub fn db_connect(db_path: &str) -> Result<Connection, error::SortpipeError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::SortpipeError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::SortpipeError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::SortpipeError::RusqliteError)?;
    Ok(conn)
}

pub fn initialize_pipeline_db(store: &Store) -> Result<(), error::SortpipeError> {
    fs::create_dir_all(&store.root).map_err(error::SortpipeError::IoError)?;
    fs::create_dir_all(&store.storage_root).map_err(error::SortpipeError::IoError)?;

    let db_path = store.db_path();
    let broker = DbBroker::new(store);
    broker
        .with_conn("sortpipe", "db.init", |conn| {
            for ddl in schemas::ALL_SCHEMAS {
                conn.execute(ddl, [])?;
            }
            conn.execute(
                "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
                [schemas::SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        })
        .map_err(|e| error::SortpipeError::DatabaseInitializationError(e.to_string()))?;

    println!("Pipeline database initialized at {}", db_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_db_path_reports_initialization_failure() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let store = Store::new(tmp.path());
        // A directory squatting on the database path makes the open fail.
        fs::create_dir(store.db_path()).expect("squat");

        let err = initialize_pipeline_db(&store).expect_err("must fail");
        assert!(matches!(
            err,
            error::SortpipeError::DatabaseInitializationError(_)
        ));
    }
}
