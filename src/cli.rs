//! CLI struct definitions for the sortpipe command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "sortpipe",
    version = env!("CARGO_PKG_VERSION"),
    about = "Spike-sorting pipeline coordinator: electrode grouping, recording preparation, sorter runs, quality metrics, curation, and provenance-tracked finalization."
)]
pub(crate) struct Cli {
    /// Pipeline root directory (defaults to the current directory).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Initialize the pipeline database and storage root
    Init {
        /// Artifact storage root, recorded in sortpipe.toml (relative paths
        /// resolve against the pipeline root)
        #[clap(long)]
        storage_dir: Option<PathBuf>,
    },
    /// Session, electrode, and sort-interval registration
    Session(SessionCli),
    /// Sort-group assignment
    Group(GroupCli),
    /// Named parameter sets
    Params(ParamsCli),
    /// Register a sorting selection binding a tuple to its parameters and team
    Select {
        #[clap(flatten)]
        key: KeyArgs,
        /// Artifact-detection parameter set name
        #[clap(long, default_value = "none")]
        artifact: String,
        /// Metric configuration name
        #[clap(long, default_value = "franklab_default")]
        metrics: String,
        /// Owning team
        #[clap(long)]
        team: String,
    },
    /// Prepare (or reuse) the cached recording for a selection
    Prepare {
        #[clap(flatten)]
        key: KeyArgs,
    },
    /// Run the configured sorter for a selection
    Sort {
        #[clap(flatten)]
        key: KeyArgs,
    },
    /// Compute the configured quality metrics for a sorting
    Metrics {
        sorting_id: String,
    },
    /// Automatic and manual curation steps
    Curate(CurateCli),
    /// Freeze a manually curated sorting into unit rows
    Finalize {
        sorting_id: String,
    },
    /// Query finalized units against inclusion criteria
    Units {
        sorting_id: String,
        #[clap(long)]
        max_noise_overlap: Option<f64>,
        #[clap(long)]
        min_nn_hit_rate: Option<f64>,
        #[clap(long)]
        max_isi_violation: Option<f64>,
        #[clap(long)]
        min_firing_rate: Option<f64>,
        #[clap(long)]
        min_num_spikes: Option<i64>,
        /// Labels that disqualify a unit (repeatable)
        #[clap(long = "exclude-label")]
        exclude_labels: Vec<String>,
    },
    /// Team management
    Team(TeamCli),
    /// Remove orphaned run directories from the storage root
    Cleanup {
        /// Delete without asking for confirmation
        #[clap(long)]
        yes: bool,
    },
    /// Delete sorting runs (requires membership in each owning team)
    Delete {
        /// Requesting database user
        #[clap(long)]
        user: String,
        /// Sorting ids to delete
        sorting_ids: Vec<String>,
    },
}

/// The five-part tuple identifying one sorting run.
#[derive(clap::Args, Debug)]
pub(crate) struct KeyArgs {
    #[clap(long)]
    pub session: String,
    #[clap(long)]
    pub group: i64,
    #[clap(long)]
    pub interval: String,
    #[clap(long)]
    pub sorter: String,
    #[clap(long = "param-set")]
    pub param_set: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SessionCli {
    #[clap(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SessionCommand {
    /// Register a session and its source recording
    Register {
        session_id: String,
        /// Source recording file
        #[clap(long)]
        source: PathBuf,
        /// Sampling rate in Hz
        #[clap(long)]
        rate: f64,
    },
    /// Import electrode metadata from a JSON file (replaces existing rows)
    Electrodes {
        session_id: String,
        #[clap(long)]
        file: PathBuf,
    },
    /// Register a named sort interval
    Interval {
        session_id: String,
        interval_name: String,
        #[clap(long)]
        start: f64,
        #[clap(long)]
        end: f64,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct GroupCli {
    #[clap(subcommand)]
    pub command: GroupCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum GroupCommand {
    /// One sort group per (electrode group, shank)
    ByShank { session_id: String },
    /// One sort group per electrode group, shanks collapsed
    ByElectrodeGroup { session_id: String },
    /// Override group reference electrodes ("group=reference", repeatable)
    SetReference {
        session_id: String,
        #[clap(long = "pair")]
        pairs: Vec<String>,
    },
    /// List the session's sort groups
    List { session_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ParamsCli {
    #[clap(subcommand)]
    pub command: ParamsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ParamsCommand {
    /// Seed the default parameter sets for every stage
    Defaults,
    /// List registered metric configurations
    List,
    /// Register a sorter parameter set
    Sorter {
        sorter_name: String,
        param_set_name: String,
        /// Sorter parameters as a JSON object
        #[clap(long, default_value = "{}")]
        params: String,
        /// Filter parameters as a JSON object (defaults apply to omitted fields)
        #[clap(long, default_value = "{}")]
        filter: String,
    },
    /// Register an artifact-detection parameter set
    Artifact {
        params_name: String,
        #[clap(long, default_value = "{}")]
        params: String,
    },
    /// Register a metric configuration
    Metrics {
        config_name: String,
        /// Metric names to compute (repeatable)
        #[clap(long = "metric")]
        metrics: Vec<String>,
        #[clap(long, default_value = "{}")]
        params: String,
    },
    /// Register an automatic-curation parameter set
    Curation {
        params_name: String,
        /// Reject units whose ISI-violation fraction exceeds this threshold
        #[clap(long)]
        isi_violation_frac_threshold: Option<f64>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CurateCli {
    #[clap(subcommand)]
    pub command: CurateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CurateCommand {
    /// Apply named automatic-curation rules, appending a child sorting
    Auto {
        sorting_id: String,
        #[clap(long, default_value = "none")]
        params: String,
    },
    /// Publish a sorting to a curation workspace for human review
    Publish { sorting_id: String },
    /// Import human curation decisions from the workspace
    Import { sorting_id: String },
    /// Show a sorting's lineage, root first
    Lineage { sorting_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TeamCli {
    #[clap(subcommand)]
    pub command: TeamCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TeamCommand {
    /// Create a team
    Create {
        team_name: String,
        #[clap(long, default_value = "")]
        description: String,
    },
    /// Add (or update) a team member
    AddMember {
        team_name: String,
        member_name: String,
        /// Database identity used for permission checks
        #[clap(long)]
        db_user: String,
        /// Workspace identity for curation permission grants
        #[clap(long)]
        remote_user: Option<String>,
    },
}
