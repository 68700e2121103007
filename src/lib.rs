//! sortpipe: a coordinator for stateful spike-sorting pipelines.
//!
//! sortpipe tracks the full provenance of a spike-sorting campaign in one
//! SQLite database: which electrodes were grouped together, which time
//! intervals were sorted with which parameters, what each sorter run
//! produced, and how every curation step refined it. The numerical work
//! (filtering, sorting, metric computation) lives behind engine traits;
//! sortpipe owns the orchestration, the cache, and the lineage.
//!
//! # Architecture
//!
//! - **One database, many stages.** Every stage reads and writes
//!   `pipeline.db` through `DbBroker`, which serializes access and appends
//!   an audit event per operation to `stage.events.jsonl`.
//! - **File artifacts, row provenance.** Cached recordings and sorting
//!   outputs are files in per-run directories under the storage root; the
//!   database rows pointing at them are the authority on what is live.
//! - **Append-only curation.** Curation never rewrites a sorting; each
//!   automatic or manual pass appends a child to the lineage forest, so any
//!   finalized result can be traced back to its root sorter run.
//! - **Fail-closed deletion.** Destructive operations resolve each sorting
//!   to its owning team and require the requester to be a member of all of
//!   them.

pub mod core;
pub mod stages;

mod cli;

use crate::cli::{
    Cli, Command, CurateCommand, GroupCommand, KeyArgs, ParamsCommand, SessionCommand, TeamCommand,
};
use crate::core::engine::LocalEngine;
use crate::core::error::SortpipeError;
use crate::core::params::{
    ArtifactDetectionParams, FilterParams, MergeParams, MetricParams, RejectParams,
};
use crate::core::store::Store;
use crate::core::workspace::LocalWorkspace;
use crate::core::{access, artifacts, config, db};
use crate::stages::finalize::UnitInclusionCriteria;
use crate::stages::recording::RecordingKey;
use crate::stages::{curation, finalize, grouping, metrics, recording, session, sorting};
use clap::Parser;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

impl KeyArgs {
    fn into_key(self) -> RecordingKey {
        RecordingKey {
            session_id: self.session,
            sort_group_id: self.group,
            interval_name: self.interval,
            sorter_name: self.sorter,
            param_set_name: self.param_set,
        }
    }
}

fn parse_reference_pairs(pairs: &[String]) -> Result<Vec<(i64, i64)>, SortpipeError> {
    pairs
        .iter()
        .map(|raw| {
            let (group, reference) = raw.split_once('=').ok_or_else(|| {
                SortpipeError::ValidationError(format!(
                    "expected 'group=reference', got '{raw}'"
                ))
            })?;
            let group = group.trim().parse::<i64>().map_err(|_| {
                SortpipeError::ValidationError(format!("invalid group id in '{raw}'"))
            })?;
            let reference = reference.trim().parse::<i64>().map_err(|_| {
                SortpipeError::ValidationError(format!("invalid reference id in '{raw}'"))
            })?;
            Ok((group, reference))
        })
        .collect()
}

fn parse_json_object(raw: &str, what: &str) -> Result<serde_json::Value, SortpipeError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        SortpipeError::ValidationError(format!("invalid {what} JSON: {e}"))
    })?;
    if !value.is_object() {
        return Err(SortpipeError::ValidationError(format!(
            "{what} must be a JSON object"
        )));
    }
    Ok(value)
}

fn workspace_client(store: &Store) -> Result<LocalWorkspace, SortpipeError> {
    LocalWorkspace::new(&store.root.join("workspaces"))
}

fn confirm_on_stdin(orphans: &[String]) -> bool {
    println!("The following run directories are orphaned:");
    for name in orphans {
        println!("  {name}");
    }
    print!("Delete them? [y/N] ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

pub fn run() -> Result<(), SortpipeError> {
    let cli = Cli::parse();
    let root: PathBuf = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(SortpipeError::IoError)?,
    };
    let store = config::open_store(&root)?;
    let engine = LocalEngine;

    match cli.command {
        Command::Init { storage_dir } => {
            let store = match storage_dir {
                Some(dir) => {
                    let written = config::Config {
                        storage_dir: Some(dir),
                    };
                    let path = written.write(&root)?;
                    println!("{} {}", "Wrote".green(), path.display());
                    config::open_store(&root)?
                }
                None => store,
            };
            db::initialize_pipeline_db(&store)?;
        }
        Command::Session(group) => match group.command {
            SessionCommand::Register {
                session_id,
                source,
                rate,
            } => {
                session::register_session(&store, &session_id, &source, rate)?;
                println!("{} session '{session_id}'", "Registered".green());
            }
            SessionCommand::Electrodes { session_id, file } => {
                let rows = session::electrodes_from_json(&file)?;
                let n = session::import_electrodes(&store, &session_id, &rows)?;
                println!("{} {n} electrodes for '{session_id}'", "Imported".green());
            }
            SessionCommand::Interval {
                session_id,
                interval_name,
                start,
                end,
            } => {
                session::add_sort_interval(&store, &session_id, &interval_name, start, end)?;
                println!(
                    "{} interval '{interval_name}' [{start}, {end}]",
                    "Registered".green()
                );
            }
        },
        Command::Group(group) => match group.command {
            GroupCommand::ByShank { session_id } => {
                let groups = grouping::group_by_shank(&store, &session_id)?;
                println!("{} {} sort groups", "Assigned".green(), groups.len());
            }
            GroupCommand::ByElectrodeGroup { session_id } => {
                let groups = grouping::group_by_electrode_group(&store, &session_id)?;
                println!("{} {} sort groups", "Assigned".green(), groups.len());
            }
            GroupCommand::SetReference { session_id, pairs } => {
                let overrides = parse_reference_pairs(&pairs)?;
                grouping::set_reference_from_list(&store, &session_id, &overrides)?;
                println!("{} {} reference overrides", "Applied".green(), overrides.len());
            }
            GroupCommand::List { session_id } => {
                for g in grouping::list_sort_groups(&store, &session_id)? {
                    println!(
                        "group {:<3} ref {:<4} electrodes {:?}",
                        g.sort_group_id, g.sort_reference_electrode_id, g.electrode_ids
                    );
                }
            }
        },
        Command::Params(group) => match group.command {
            ParamsCommand::Defaults => {
                recording::insert_sorter_params(
                    &store,
                    crate::core::engine::LOCAL_SORTER,
                    "default",
                    &serde_json::json!({}),
                    &FilterParams::default(),
                )?;
                sorting::insert_default_artifact_params(&store)?;
                metrics::insert_default_metric_config(&store)?;
                curation::insert_default_curation_params(&store)?;
                println!("{} default parameter sets", "Seeded".green());
            }
            ParamsCommand::List => {
                for name in metrics::list_metric_configs(&store)? {
                    println!("{name}");
                }
            }
            ParamsCommand::Sorter {
                sorter_name,
                param_set_name,
                params,
                filter,
            } => {
                let params = parse_json_object(&params, "sorter params")?;
                let filter: FilterParams =
                    serde_json::from_value(parse_json_object(&filter, "filter params")?)?;
                recording::insert_sorter_params(
                    &store,
                    &sorter_name,
                    &param_set_name,
                    &params,
                    &filter,
                )?;
                println!(
                    "{} sorter params '{sorter_name}/{param_set_name}'",
                    "Registered".green()
                );
            }
            ParamsCommand::Artifact { params_name, params } => {
                let detection: ArtifactDetectionParams =
                    serde_json::from_value(parse_json_object(&params, "artifact params")?)?;
                sorting::insert_artifact_params(&store, &params_name, &detection)?;
                println!("{} artifact params '{params_name}'", "Registered".green());
            }
            ParamsCommand::Metrics {
                config_name,
                metrics: metric_names,
                params,
            } => {
                let metric_params: MetricParams =
                    serde_json::from_value(parse_json_object(&params, "metric params")?)?;
                metrics::insert_metric_config(&store, &config_name, &metric_names, &metric_params)?;
                println!("{} metric config '{config_name}'", "Registered".green());
            }
            ParamsCommand::Curation {
                params_name,
                isi_violation_frac_threshold,
            } => {
                let reject = RejectParams {
                    isi_violation_frac_threshold,
                };
                curation::insert_curation_params(
                    &store,
                    &params_name,
                    &MergeParams::default(),
                    &reject,
                )?;
                println!("{} curation params '{params_name}'", "Registered".green());
            }
        },
        Command::Select {
            key,
            artifact,
            metrics: metric_config,
            team,
        } => {
            let selection = sorting::SortingSelection {
                key: key.into_key(),
                artifact_params_name: artifact,
                metric_config_name: metric_config,
                team_name: team,
            };
            sorting::insert_selection(&store, &selection)?;
            println!(
                "{} selection for run '{}'",
                "Registered".green(),
                selection.key.run_id()
            );
        }
        Command::Prepare { key } => {
            let artifact = recording::prepare_recording(&store, &engine, &key.into_key())?;
            println!(
                "{} recording at {} ({} samples, hash {})",
                "Prepared".green(),
                artifact.recording_path.display(),
                artifact.num_samples,
                &artifact.content_hash[..12]
            );
        }
        Command::Sort { key } => {
            let record = sorting::run_sorting(&store, &engine, &engine, &key.into_key())?;
            println!("{} sorting '{}'", "Created".green(), record.sorting_id);
        }
        Command::Metrics { sorting_id } => {
            let table = metrics::compute_metrics(&store, &engine, &sorting_id)?;
            for (metric, per_unit) in &table {
                println!("{metric}:");
                for (unit, value) in per_unit {
                    println!("  unit {unit:<4} {value:.4}");
                }
            }
        }
        Command::Curate(group) => match group.command {
            CurateCommand::Auto { sorting_id, params } => {
                let child = curation::auto_curate(&store, &sorting_id, &params)?;
                println!("{} auto-curated child '{}'", "Created".green(), child.sorting_id);
            }
            CurateCommand::Publish { sorting_id } => {
                let client = workspace_client(&store)?;
                let row = curation::publish_for_manual_curation(&store, &client, &sorting_id)?;
                println!(
                    "{} workspace '{}' at {}",
                    "Published".green(),
                    row.workspace_name,
                    row.workspace_uri
                );
            }
            CurateCommand::Import { sorting_id } => {
                let client = workspace_client(&store)?;
                match curation::import_manual_curation(&store, &engine, &client, &sorting_id)? {
                    Some(child) => {
                        println!(
                            "{} manually-curated child '{}'",
                            "Created".green(),
                            child.sorting_id
                        );
                    }
                    None => {
                        println!("{}", "Nothing imported".yellow());
                    }
                }
            }
            CurateCommand::Lineage { sorting_id } => {
                for (depth, id) in curation::ancestry(&store, &sorting_id)?.iter().enumerate() {
                    println!("{}{id}", "  ".repeat(depth));
                }
            }
        },
        Command::Finalize { sorting_id } => {
            let n = finalize::finalize_sorting(&store, &sorting_id)?;
            println!("{} {n} units from '{sorting_id}'", "Finalized".green());
        }
        Command::Units {
            sorting_id,
            max_noise_overlap,
            min_nn_hit_rate,
            max_isi_violation,
            min_firing_rate,
            min_num_spikes,
            exclude_labels,
        } => {
            let criteria = UnitInclusionCriteria {
                max_noise_overlap,
                min_nn_hit_rate,
                max_isi_violation,
                min_firing_rate,
                min_num_spikes,
                exclude_labels,
            };
            let included = finalize::unit_inclusion(&store, &sorting_id, &criteria)?;
            for unit in included {
                println!("{unit}");
            }
        }
        Command::Team(group) => match group.command {
            TeamCommand::Create {
                team_name,
                description,
            } => {
                access::create_team(&store, &team_name, &description)?;
                println!("{} team '{team_name}'", "Created".green());
            }
            TeamCommand::AddMember {
                team_name,
                member_name,
                db_user,
                remote_user,
            } => {
                access::add_member(
                    &store,
                    &team_name,
                    &member_name,
                    &db_user,
                    remote_user.as_deref(),
                )?;
                println!("{} '{member_name}' to '{team_name}'", "Added".green());
            }
        },
        Command::Cleanup { yes } => {
            let removed = if yes {
                artifacts::nightly_cleanup(&store)?
            } else {
                artifacts::interactive_cleanup(&store, confirm_on_stdin)?
            };
            println!("{} {} run directories", "Removed".green(), removed.len());
        }
        Command::Delete { user, sorting_ids } => {
            if sorting_ids.is_empty() {
                return Err(SortpipeError::ValidationError(
                    "no sorting ids given".to_string(),
                ));
            }
            let deleted = access::delete_sortings(&store, &user, &sorting_ids)?;
            println!("{} {deleted} sortings", "Deleted".green());
        }
    }
    Ok(())
}
