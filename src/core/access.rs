//! Access control gate for destructive operations.
//!
//! Each sorting run is owned by the team named on its selection row. Bulk
//! deletes resolve every candidate row to its owning team and require the
//! requesting identity to be a member of all of them; one unauthorized row
//! blocks the whole batch. A team with zero resolvable members denies by
//! default rather than silently passing.

use crate::core::broker::DbBroker;
use crate::core::error::SortpipeError;
use crate::core::store::Store;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMember {
    pub member_name: String,
    pub db_user: String,
    pub remote_user: Option<String>,
}

pub fn create_team(store: &Store, team_name: &str, description: &str) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "access.team_create", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO teams(team_name, description) VALUES(?1, ?2)",
            params![team_name, description],
        )?;
        Ok(())
    })
}

pub fn add_member(
    store: &Store,
    team_name: &str,
    member_name: &str,
    db_user: &str,
    remote_user: Option<&str>,
) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "access.member_add", |conn| {
        let exists: Option<String> = conn
            .query_row(
                "SELECT team_name FROM teams WHERE team_name = ?1",
                params![team_name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(SortpipeError::NotFound(format!(
                "team '{team_name}' does not exist; create it first"
            )));
        }
        conn.execute(
            "INSERT OR REPLACE INTO team_members(team_name, member_name, db_user, remote_user)
             VALUES(?1, ?2, ?3, ?4)",
            params![team_name, member_name, db_user, remote_user],
        )?;
        Ok(())
    })
}

pub fn team_members(conn: &Connection, team_name: &str) -> Result<Vec<TeamMember>, SortpipeError> {
    let mut stmt = conn.prepare(
        "SELECT member_name, db_user, remote_user FROM team_members
         WHERE team_name = ?1 ORDER BY member_name",
    )?;
    let rows = stmt.query_map(params![team_name], |row| {
        Ok(TeamMember {
            member_name: row.get(0)?,
            db_user: row.get(1)?,
            remote_user: row.get(2)?,
        })
    })?;
    let mut members = Vec::new();
    for m in rows {
        members.push(m?);
    }
    Ok(members)
}

/// Owning team of a sorting run, resolved through its selection row.
pub fn owning_team(conn: &Connection, sorting_id: &str) -> Result<String, SortpipeError> {
    let team: Option<String> = conn
        .query_row(
            "SELECT sel.team_name FROM sortings s
             JOIN sorting_selections sel
               ON sel.session_id = s.session_id
              AND sel.sort_group_id = s.sort_group_id
              AND sel.interval_name = s.interval_name
              AND sel.sorter_name = s.sorter_name
              AND sel.param_set_name = s.param_set_name
             WHERE s.sorting_id = ?1",
            params![sorting_id],
            |row| row.get(0),
        )
        .optional()?;
    team.ok_or_else(|| {
        SortpipeError::NotFound(format!(
            "no selection row (and thus no owning team) for sorting '{sorting_id}'"
        ))
    })
}

/// All-or-nothing delete authorization over a batch of sorting runs.
pub fn authorize_delete(
    conn: &Connection,
    requesting_user: &str,
    sorting_ids: &[String],
) -> Result<(), SortpipeError> {
    for sorting_id in sorting_ids {
        let team = owning_team(conn, sorting_id)?;
        let members = team_members(conn, &team)?;
        if members.is_empty() {
            return Err(SortpipeError::NoTeamMembersError(team));
        }
        if !members.iter().any(|m| m.db_user == requesting_user) {
            return Err(SortpipeError::PermissionDeniedError(format!(
                "user '{requesting_user}' is not a member of team '{team}' owning sorting '{sorting_id}'"
            )));
        }
    }
    Ok(())
}

/// Gate-checked bulk delete of sorting rows. Dependent units and workspace
/// registry rows cascade; on-disk artifacts are left to `artifacts::reconcile`.
pub fn delete_sortings(
    store: &Store,
    requesting_user: &str,
    sorting_ids: &[String],
) -> Result<usize, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn(requesting_user, "access.delete_sortings", |conn| {
        authorize_delete(conn, requesting_user, sorting_ids)?;
        let mut deleted = 0usize;
        for sorting_id in sorting_ids {
            deleted += conn.execute(
                "DELETE FROM sortings WHERE sorting_id = ?1",
                params![sorting_id],
            )?;
        }
        Ok(deleted)
    })
}
