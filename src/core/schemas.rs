//! Centralized database schema definitions for the pipeline database.
//!
//! One SQLite database (`pipeline.db`) holds every table: session and
//! electrode metadata, sort groups, named parameter sets, the recording
//! cache, the sorting lineage forest, finalized units, teams, and the
//! curation workspace registry. Stages own their rows; the schema is
//! declared here so `initialize_pipeline_db` can create everything in one
//! pass and tests can assert against the DDL.

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const SCHEMA_SESSIONS: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        source_path TEXT NOT NULL,
        sampling_rate REAL NOT NULL,
        created_at TEXT NOT NULL
    )
";

pub const SCHEMA_ELECTRODES: &str = "
    CREATE TABLE IF NOT EXISTS electrodes (
        session_id TEXT NOT NULL,
        electrode_id INTEGER NOT NULL,
        electrode_group_name TEXT NOT NULL,
        probe_shank INTEGER NOT NULL,
        probe_electrode INTEGER NOT NULL,
        bad_channel INTEGER NOT NULL DEFAULT 0,
        original_reference_electrode INTEGER NOT NULL DEFAULT -1,
        rel_x REAL NOT NULL DEFAULT 0,
        rel_y REAL NOT NULL DEFAULT 0,
        rel_z REAL NOT NULL DEFAULT 0,
        PRIMARY KEY(session_id, electrode_id),
        FOREIGN KEY(session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
    )
";

pub const SCHEMA_SORT_GROUPS: &str = "
    CREATE TABLE IF NOT EXISTS sort_groups (
        session_id TEXT NOT NULL,
        sort_group_id INTEGER NOT NULL,
        sort_reference_electrode_id INTEGER NOT NULL DEFAULT -1,
        PRIMARY KEY(session_id, sort_group_id),
        FOREIGN KEY(session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
    )
";

pub const SCHEMA_SORT_GROUP_ELECTRODES: &str = "
    CREATE TABLE IF NOT EXISTS sort_group_electrodes (
        session_id TEXT NOT NULL,
        sort_group_id INTEGER NOT NULL,
        electrode_id INTEGER NOT NULL,
        PRIMARY KEY(session_id, sort_group_id, electrode_id),
        FOREIGN KEY(session_id, sort_group_id)
            REFERENCES sort_groups(session_id, sort_group_id) ON DELETE CASCADE,
        FOREIGN KEY(session_id, electrode_id)
            REFERENCES electrodes(session_id, electrode_id) ON DELETE CASCADE
    )
";

pub const SCHEMA_SORT_INTERVALS: &str = "
    CREATE TABLE IF NOT EXISTS sort_intervals (
        session_id TEXT NOT NULL,
        interval_name TEXT NOT NULL,
        start_time REAL NOT NULL,
        end_time REAL NOT NULL,
        PRIMARY KEY(session_id, interval_name),
        FOREIGN KEY(session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
    )
";

pub const SCHEMA_SORTER_PARAMS: &str = "
    CREATE TABLE IF NOT EXISTS sorter_params (
        sorter_name TEXT NOT NULL,
        param_set_name TEXT NOT NULL,
        params_json TEXT NOT NULL,
        filter_json TEXT NOT NULL,
        PRIMARY KEY(sorter_name, param_set_name)
    )
";

pub const SCHEMA_METRIC_CONFIGS: &str = "
    CREATE TABLE IF NOT EXISTS metric_configs (
        config_name TEXT PRIMARY KEY,
        metrics_json TEXT NOT NULL,
        params_json TEXT NOT NULL
    )
";

pub const SCHEMA_ARTIFACT_PARAMS: &str = "
    CREATE TABLE IF NOT EXISTS artifact_params (
        params_name TEXT PRIMARY KEY,
        params_json TEXT NOT NULL
    )
";

pub const SCHEMA_CURATION_PARAMS: &str = "
    CREATE TABLE IF NOT EXISTS curation_params (
        params_name TEXT PRIMARY KEY,
        merge_json TEXT NOT NULL,
        reject_json TEXT NOT NULL
    )
";

pub const SCHEMA_SORTING_SELECTIONS: &str = "
    CREATE TABLE IF NOT EXISTS sorting_selections (
        session_id TEXT NOT NULL,
        sort_group_id INTEGER NOT NULL,
        interval_name TEXT NOT NULL,
        sorter_name TEXT NOT NULL,
        param_set_name TEXT NOT NULL,
        artifact_params_name TEXT NOT NULL,
        metric_config_name TEXT NOT NULL,
        team_name TEXT NOT NULL,
        PRIMARY KEY(session_id, sort_group_id, interval_name, sorter_name, param_set_name),
        FOREIGN KEY(session_id, sort_group_id)
            REFERENCES sort_groups(session_id, sort_group_id),
        FOREIGN KEY(session_id, interval_name)
            REFERENCES sort_intervals(session_id, interval_name),
        FOREIGN KEY(sorter_name, param_set_name)
            REFERENCES sorter_params(sorter_name, param_set_name),
        FOREIGN KEY(artifact_params_name) REFERENCES artifact_params(params_name),
        FOREIGN KEY(metric_config_name) REFERENCES metric_configs(config_name),
        FOREIGN KEY(team_name) REFERENCES teams(team_name)
    )
";

pub const SCHEMA_RECORDINGS: &str = "
    CREATE TABLE IF NOT EXISTS recordings (
        session_id TEXT NOT NULL,
        sort_group_id INTEGER NOT NULL,
        interval_name TEXT NOT NULL,
        sorter_name TEXT NOT NULL,
        param_set_name TEXT NOT NULL,
        recording_path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        num_samples INTEGER NOT NULL,
        sampling_rate REAL NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY(session_id, sort_group_id, interval_name, sorter_name, param_set_name)
    )
";

pub const SCHEMA_SORTINGS: &str = "
    CREATE TABLE IF NOT EXISTS sortings (
        sorting_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        sort_group_id INTEGER NOT NULL,
        interval_name TEXT NOT NULL,
        sorter_name TEXT NOT NULL,
        param_set_name TEXT NOT NULL,
        parent_sorting_id TEXT,
        status TEXT NOT NULL,
        labels_json TEXT NOT NULL DEFAULT '{}',
        metrics_json TEXT NOT NULL DEFAULT '{}',
        sorting_path TEXT NOT NULL,
        time_of_sort INTEGER NOT NULL DEFAULT 0,
        description TEXT NOT NULL DEFAULT '',
        FOREIGN KEY(parent_sorting_id) REFERENCES sortings(sorting_id)
    )
";

pub const SCHEMA_SORTINGS_PARENT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_sortings_parent ON sortings(parent_sorting_id)";

pub const SCHEMA_UNITS: &str = "
    CREATE TABLE IF NOT EXISTS units (
        sorting_id TEXT NOT NULL,
        unit_id INTEGER NOT NULL,
        label TEXT NOT NULL DEFAULT '',
        noise_overlap REAL NOT NULL DEFAULT -1,
        nn_hit_rate REAL NOT NULL DEFAULT -1,
        isi_violation REAL NOT NULL DEFAULT -1,
        firing_rate REAL NOT NULL DEFAULT -1,
        num_spikes INTEGER NOT NULL DEFAULT -1,
        PRIMARY KEY(sorting_id, unit_id),
        FOREIGN KEY(sorting_id) REFERENCES sortings(sorting_id) ON DELETE CASCADE
    )
";

pub const SCHEMA_TEAMS: &str = "
    CREATE TABLE IF NOT EXISTS teams (
        team_name TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT ''
    )
";

pub const SCHEMA_TEAM_MEMBERS: &str = "
    CREATE TABLE IF NOT EXISTS team_members (
        team_name TEXT NOT NULL,
        member_name TEXT NOT NULL,
        db_user TEXT NOT NULL,
        remote_user TEXT,
        PRIMARY KEY(team_name, member_name),
        FOREIGN KEY(team_name) REFERENCES teams(team_name) ON DELETE CASCADE
    )
";

pub const SCHEMA_WORKSPACES: &str = "
    CREATE TABLE IF NOT EXISTS workspaces (
        workspace_name TEXT PRIMARY KEY,
        workspace_uri TEXT NOT NULL,
        recording_handle TEXT NOT NULL DEFAULT '',
        sorting_handle TEXT NOT NULL DEFAULT '',
        sorting_id TEXT NOT NULL,
        FOREIGN KEY(sorting_id) REFERENCES sortings(sorting_id) ON DELETE CASCADE
    )
";

/// Every DDL statement, in dependency order.
pub const ALL_SCHEMAS: &[&str] = &[
    SCHEMA_META,
    SCHEMA_SESSIONS,
    SCHEMA_ELECTRODES,
    SCHEMA_SORT_GROUPS,
    SCHEMA_SORT_GROUP_ELECTRODES,
    SCHEMA_SORT_INTERVALS,
    SCHEMA_SORTER_PARAMS,
    SCHEMA_METRIC_CONFIGS,
    SCHEMA_ARTIFACT_PARAMS,
    SCHEMA_CURATION_PARAMS,
    SCHEMA_TEAMS,
    SCHEMA_TEAM_MEMBERS,
    SCHEMA_SORTING_SELECTIONS,
    SCHEMA_RECORDINGS,
    SCHEMA_SORTINGS,
    SCHEMA_SORTINGS_PARENT_INDEX,
    SCHEMA_UNITS,
    SCHEMA_WORKSPACES,
];
