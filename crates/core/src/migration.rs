//! Batch consolidation of the legacy lab-deficiency fields, and its undo.
//!
//! A migration run lists every vitamin, snapshots the list, plans an update for each record
//! whose merged value differs from what is stored (or which still carries legacy text), and in
//! execute mode applies the plan one record at a time. Each run leaves four files in the log
//! directory:
//!
//! - `vitamin_before_<stamp>.json`: the list before any write
//! - `vitamin_after_<stamp>.json`: the list after the run
//! - `vitamin_lab_migration_report_<stamp>.json`: per-record outcome
//! - `vitamin_lab_migration_summary_<stamp>.txt`: the human-readable summary
//!
//! A failed record is recorded in the report and the run moves on. [`run_restore`] replays a
//! "before" snapshot through the same merge to reverse a run.

use crate::entities::{Document, Entity, Vitamin};
use crate::merge::{comparison_key, consolidated_lab_patch, merge_lab_fields, LabFields};
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, SortSpec};
use crate::{ConsoleError, ConsoleResult};
use chrono::{Local, Utc};
use nutri_types::EntityId;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Counts of records still carrying legacy text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabSummary {
    pub total: usize,
    pub with_legacy_description: usize,
    pub with_legacy_details: usize,
    pub with_any_legacy: usize,
}

pub fn summarize(vitamins: &[Vitamin]) -> LabSummary {
    let mut summary = LabSummary {
        total: vitamins.len(),
        ..LabSummary::default()
    };
    for vitamin in vitamins {
        let description = has_text(vitamin.lab_test_deficiency_description.as_deref());
        let details = has_text(vitamin.lab_test_deficiency_details.as_deref());
        summary.with_legacy_description += usize::from(description);
        summary.with_legacy_details += usize::from(details);
        summary.with_any_legacy += usize::from(description || details);
    }
    summary
}

/// The three fields as stored before the run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabValues {
    pub lab_test_deficiency: String,
    pub lab_test_deficiency_description: String,
    pub lab_test_deficiency_details: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReason {
    pub merged_changed: bool,
    pub has_legacy: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedUpdate {
    pub id: EntityId,
    pub vitamin_name_he: String,
    pub before: LabValues,
    pub merged: String,
    pub reason: PlanReason,
}

/// Plan an update for every record whose merged value differs from its stored details, or
/// which still has description or details text.
pub fn build_plan(vitamins: &[Vitamin]) -> Vec<PlannedUpdate> {
    vitamins
        .iter()
        .filter_map(|vitamin| {
            let merged = merge_lab_fields(LabFields::of(vitamin));
            let current = vitamin
                .lab_test_deficiency_details
                .as_deref()
                .unwrap_or("")
                .trim();
            let merged_changed = comparison_key(&merged) != comparison_key(current);
            let has_legacy = has_text(vitamin.lab_test_deficiency_description.as_deref())
                || has_text(vitamin.lab_test_deficiency_details.as_deref());
            if !merged_changed && !has_legacy {
                return None;
            }
            let fields = LabFields::of(vitamin);
            Some(PlannedUpdate {
                id: vitamin.meta.id.clone(),
                vitamin_name_he: vitamin.vitamin_name_he.clone(),
                before: LabValues {
                    lab_test_deficiency: fields.lab_test_deficiency.to_string(),
                    lab_test_deficiency_description: fields.description.to_string(),
                    lab_test_deficiency_details: fields.details.to_string(),
                },
                merged,
                reason: PlanReason {
                    merged_changed,
                    has_legacy,
                },
            })
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    DryRun,
    Execute,
}

/// Where the data came from, recorded in the report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSource {
    pub base_url: String,
    pub app_id: String,
}

#[derive(Clone, Debug)]
pub struct MigrationOptions {
    pub mode: MigrationMode,
    pub log_dir: PathBuf,
    /// Pause after each update in execute mode.
    pub pause: Duration,
    pub retry: RetryPolicy,
    pub source: Option<ReportSource>,
}

impl MigrationOptions {
    pub fn new(mode: MigrationMode, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            log_dir: log_dir.into(),
            pause: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            source: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthsBefore {
    pub lab_test_deficiency: usize,
    pub lab_test_deficiency_description: usize,
    pub lab_test_deficiency_details: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedUpdate {
    pub id: EntityId,
    pub vitamin_name_he: String,
    pub reason: PlanReason,
    pub before_lengths: LengthsBefore,
    pub after_length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub id: EntityId,
    pub vitamin_name_he: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub started_at: String,
    pub mode: MigrationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<ReportSource>,
    pub before_summary: LabSummary,
    pub planned_updates: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    pub updates: Vec<AppliedUpdate>,
    pub after_summary: LabSummary,
    pub finished_at: String,
}

/// Paths written by a migration run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationFiles {
    pub before: PathBuf,
    pub after: PathBuf,
    pub report: PathBuf,
    pub summary: PathBuf,
}

#[derive(Clone, Debug)]
pub struct MigrationOutcome {
    pub report: MigrationReport,
    pub files: MigrationFiles,
    /// The lines written to the summary file.
    pub summary_lines: Vec<String>,
}

impl MigrationOutcome {
    pub fn has_failures(&self) -> bool {
        self.report.failed > 0
    }
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> ConsoleResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

async fn list_vitamins<S: EntityStore>(
    store: &S,
    retry: &RetryPolicy,
) -> ConsoleResult<(Vec<Document>, Vec<Vitamin>)> {
    let sort = SortSpec::asc("vitaminNameHe");
    let docs = retry
        .run("list vitamins", || store.list(Vitamin::NAME, Some(&sort)))
        .await?;
    let vitamins = docs
        .iter()
        .cloned()
        .map(Vitamin::from_document)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((docs, vitamins))
}

/// Run the lab-field consolidation.
///
/// # Arguments
///
/// * `store` - Where the vitamins live.
/// * `options` - Mode, log directory, pacing and retry policy.
///
/// # Returns
///
/// The report and the paths of the files written. Per-record failures are inside the report;
/// check [`MigrationOutcome::has_failures`].
///
/// # Errors
///
/// Listing failures (after retries) and file-system errors abort the run.
pub async fn run_migration<S: EntityStore>(
    store: &S,
    options: &MigrationOptions,
) -> ConsoleResult<MigrationOutcome> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    std::fs::create_dir_all(&options.log_dir)?;

    let started_at = iso_now();
    let (before_docs, before_list) = list_vitamins(store, &options.retry).await?;
    let before_summary = summarize(&before_list);
    let plan = build_plan(&before_list);

    let before_path = options.log_dir.join(format!("vitamin_before_{stamp}.json"));
    write_json(&before_path, &before_docs)?;

    tracing::info!(
        mode = ?options.mode,
        total = before_summary.total,
        planned = plan.len(),
        "lab-field migration planned"
    );

    let mut updates = Vec::new();
    let mut failures = Vec::new();

    if options.mode == MigrationMode::Execute {
        for item in &plan {
            let result = options
                .retry
                .run("update vitamin", || {
                    store.update(
                        Vitamin::NAME,
                        item.id.as_str(),
                        consolidated_lab_patch(&item.merged),
                    )
                })
                .await;
            match result {
                Ok(_) => updates.push(AppliedUpdate {
                    id: item.id.clone(),
                    vitamin_name_he: item.vitamin_name_he.clone(),
                    reason: item.reason,
                    before_lengths: LengthsBefore {
                        lab_test_deficiency: item.before.lab_test_deficiency.chars().count(),
                        lab_test_deficiency_description: item
                            .before
                            .lab_test_deficiency_description
                            .chars()
                            .count(),
                        lab_test_deficiency_details: item
                            .before
                            .lab_test_deficiency_details
                            .chars()
                            .count(),
                    },
                    after_length: item.merged.chars().count(),
                }),
                Err(err) => {
                    tracing::error!(id = %item.id, error = %err, "vitamin update failed");
                    failures.push(RecordFailure {
                        id: item.id.clone(),
                        vitamin_name_he: item.vitamin_name_he.clone(),
                        error: err.to_string(),
                    });
                }
            }
            tokio::time::sleep(options.pause).await;
        }
    }

    let (after_docs, after_list) = list_vitamins(store, &options.retry).await?;
    let after_summary = summarize(&after_list);

    let after_path = options.log_dir.join(format!("vitamin_after_{stamp}.json"));
    write_json(&after_path, &after_docs)?;

    let report = MigrationReport {
        started_at,
        mode: options.mode,
        env: options.source.clone(),
        before_summary,
        planned_updates: plan.len(),
        updated: updates.len(),
        failed: failures.len(),
        failures,
        updates,
        after_summary,
        finished_at: iso_now(),
    };
    let report_path = options
        .log_dir
        .join(format!("vitamin_lab_migration_report_{stamp}.json"));
    write_json(&report_path, &report)?;

    let mode = match report.mode {
        MigrationMode::DryRun => "dry-run",
        MigrationMode::Execute => "execute",
    };
    let summary_lines = vec![
        format!("Migration mode: {mode}"),
        format!("Before total: {}", before_summary.total),
        format!("Before with legacy: {}", before_summary.with_any_legacy),
        format!("Planned updates: {}", report.planned_updates),
        format!("Updated: {}", report.updated),
        format!("Failed: {}", report.failed),
        format!("After with legacy: {}", after_summary.with_any_legacy),
        format!("Before backup: {}", before_path.display()),
        format!("After backup: {}", after_path.display()),
        format!("Report: {}", report_path.display()),
    ];
    let summary_path = options
        .log_dir
        .join(format!("vitamin_lab_migration_summary_{stamp}.txt"));
    std::fs::write(&summary_path, format!("{}\n", summary_lines.join("\n")))?;

    Ok(MigrationOutcome {
        report,
        files: MigrationFiles {
            before: before_path,
            after: after_path,
            report: report_path,
            summary: summary_path,
        },
        summary_lines,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub backup: String,
    pub planned: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    pub finished_at: String,
}

/// Replay a "before" snapshot through the merge and write the result back.
///
/// Only records that had description or details text are touched. The report is written to
/// `vitamin_restore_report_<millis>.json` in `log_dir`.
///
/// # Errors
///
/// `ConsoleError::InvalidInput` when the backup is missing or not a JSON array; I/O and JSON
/// errors. Per-record update failures are reported, not returned.
pub async fn run_restore<S: EntityStore>(
    store: &S,
    backup: &Path,
    log_dir: &Path,
) -> ConsoleResult<(RestoreReport, PathBuf)> {
    if !backup.exists() {
        return Err(ConsoleError::InvalidInput(format!(
            "Backup file not found: {}",
            backup.display()
        )));
    }
    let records = match serde_json::from_str::<Value>(&std::fs::read_to_string(backup)?)? {
        Value::Array(items) => items,
        _ => {
            return Err(ConsoleError::InvalidInput(
                "Backup file must contain an array".into(),
            ))
        }
    };

    let mut planned = 0;
    let mut updated = 0;
    let mut failures = Vec::new();

    for record in records {
        let Value::Object(doc) = record else {
            continue;
        };
        let vitamin = Vitamin::from_document(doc)?;
        if !has_text(vitamin.lab_test_deficiency_description.as_deref())
            && !has_text(vitamin.lab_test_deficiency_details.as_deref())
        {
            continue;
        }
        planned += 1;

        let merged = merge_lab_fields(LabFields::of(&vitamin));
        match store
            .update(
                Vitamin::NAME,
                vitamin.meta.id.as_str(),
                consolidated_lab_patch(&merged),
            )
            .await
        {
            Ok(_) => updated += 1,
            Err(err) => {
                tracing::error!(id = %vitamin.meta.id, error = %err, "restore update failed");
                failures.push(RecordFailure {
                    id: vitamin.meta.id.clone(),
                    vitamin_name_he: vitamin.vitamin_name_he.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    let report = RestoreReport {
        backup: backup.display().to_string(),
        planned,
        updated,
        failed: failures.len(),
        failures,
        finished_at: iso_now(),
    };
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!(
        "vitamin_restore_report_{}.json",
        Utc::now().timestamp_millis()
    ));
    write_json(&path, &report)?;
    tracing::info!(planned, updated, failed = report.failed, "restore finished");
    Ok((report, path))
}
