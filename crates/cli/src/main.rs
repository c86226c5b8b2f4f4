use clap::{Parser, Subcommand};
use nutri_core::{
    auth::{list_users, set_role, Identity},
    catalog::Catalog,
    merge::{merge_lab_fields, LabFields},
    migration::{run_migration, run_restore, summarize, MigrationMode, MigrationOptions, ReportSource},
    search::global_search,
    store::{local::LocalKv, local::LocalStore, Backend},
    tabular::parse_import,
    transfer::{export, export_file_name, import_rows, ExportFormat, TransferKind},
    ConsoleConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nutri")]
#[command(about = "Nutrition console batch tooling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consolidate the legacy lab-deficiency fields of every vitamin (dry run unless --execute)
    MigrateLabFields {
        /// Write the merged values back
        #[arg(long)]
        execute: bool,
        /// Directory for snapshots and reports (default: NUTRI_MIGRATION_LOG_DIR)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Replay a "before" snapshot through the merge and write the results back
    RestoreLabFields {
        /// Path to a vitamin_before_<stamp>.json snapshot
        backup: PathBuf,
        /// Directory for the restore report (default: NUTRI_MIGRATION_LOG_DIR)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Count vitamins that still carry legacy lab text
    LabSummary,
    /// Show the consolidated lab text for the given field values
    MergePreview {
        #[arg(long, default_value = "")]
        lab_test_deficiency: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        details: String,
    },
    /// Import a .csv or .json file
    Import {
        /// vitamins, foods, symptoms, diseases, articles or effects-cases
        entity: TransferKind,
        file: PathBuf,
    },
    /// Export every record of one kind
    Export {
        /// vitamins, foods, symptoms, diseases, articles or effects-cases
        entity: TransferKind,
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Search names, descriptions and tags across the catalog
    Search { term: String },
    /// Backfill food symptom lists from every symptom's food links
    RepairLinks,
    /// Show the signed-in user
    Whoami,
    /// List users, newest first
    Users,
    /// Change a user's role
    SetRole { user_id: String, role: String },
}

/// Loaded once per invocation.
struct Console {
    cfg: ConsoleConfig,
    backend: Backend,
}

impl Console {
    fn open() -> anyhow::Result<Self> {
        let cfg = ConsoleConfig::from_env()?;
        let backend = Backend::from_config(&cfg)?;
        Ok(Self { cfg, backend })
    }

    fn local(&self) -> anyhow::Result<LocalStore> {
        let kv = LocalKv::open(self.cfg.local_state_file())?;
        Ok(LocalStore::new(Arc::new(kv)))
    }

    fn log_dir(&self, explicit: Option<PathBuf>) -> PathBuf {
        explicit.unwrap_or_else(|| self.cfg.migration_log_dir().to_path_buf())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "nutri_core=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let Some(command) = cli.command else {
        println!("Use 'nutri --help' for commands");
        return Ok(ExitCode::SUCCESS);
    };

    if let Commands::MergePreview {
        lab_test_deficiency,
        description,
        details,
    } = &command
    {
        println!(
            "{}",
            merge_lab_fields(LabFields {
                lab_test_deficiency,
                description,
                details,
            })
        );
        return Ok(ExitCode::SUCCESS);
    }

    let console = Console::open()?;
    match command {
        Commands::MigrateLabFields { execute, log_dir } => {
            let mode = if execute {
                MigrationMode::Execute
            } else {
                MigrationMode::DryRun
            };
            tracing::info!(mode = ?mode, backend = ?console.backend.kind(), "starting lab-field migration");
            let mut options = MigrationOptions::new(mode, console.log_dir(log_dir));
            options.source = console.cfg.rest().map(|rest| ReportSource {
                base_url: rest.base_url.clone(),
                app_id: rest.app_id.clone(),
            });
            let outcome = run_migration(&console.backend, &options).await?;
            for line in &outcome.summary_lines {
                println!("{line}");
            }
            println!("Report: {}", outcome.files.report.display());
            if outcome.has_failures() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::RestoreLabFields { backup, log_dir } => {
            let (report, path) =
                run_restore(&console.backend, &backup, &console.log_dir(log_dir)).await?;
            println!(
                "Restore finished: planned={} updated={} failed={}",
                report.planned, report.updated, report.failed
            );
            println!("Report: {}", path.display());
            if report.failed > 0 {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::LabSummary => {
            let vitamins = Catalog::new(console.backend.clone()).vitamins().await?;
            println!("{}", serde_json::to_string_pretty(&summarize(&vitamins))?);
        }
        Commands::MergePreview { .. } => {}
        Commands::Import { entity, file } => {
            let text = std::fs::read_to_string(&file)?;
            let file_name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let rows = parse_import(file_name, &text)?;
            let summary = if entity.is_local() {
                import_rows(&console.local()?, entity, &rows).await?
            } else {
                import_rows(&console.backend, entity, &rows).await?
            };
            println!("Added {}, skipped {}", summary.added, summary.skipped);
        }
        Commands::Export {
            entity,
            format,
            out_dir,
        } => {
            let body = if entity.is_local() {
                export(&console.local()?, entity, format).await?
            } else {
                export(&console.backend, entity, format).await?
            };
            std::fs::create_dir_all(&out_dir)?;
            let path = out_dir.join(export_file_name(
                entity,
                format,
                chrono::Utc::now().timestamp_millis(),
            ));
            std::fs::write(&path, body)?;
            println!("Wrote {}", path.display());
        }
        Commands::Search { term } => {
            let results = global_search(&console.backend, &term).await?;
            if results.is_empty() {
                println!("No results.");
            } else {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Commands::RepairLinks => {
            let report = Catalog::new(console.backend.clone())
                .repair_symptom_food_links()
                .await?;
            println!("Updated {} foods", report.updated.len());
        }
        Commands::Whoami => {
            let user = Identity::from_config(&console.cfg, &console.backend).me().await?;
            println!("{} ({})", user.email, user.role());
        }
        Commands::Users => {
            for user in list_users(&console.backend).await? {
                println!("{}\t{}\t{}", user.meta.id, user.email, user.role());
            }
        }
        Commands::SetRole { user_id, role } => {
            let user = set_role(&console.backend, &user_id, &role).await?;
            println!("{} is now {}", user.email, user.role());
        }
    }

    Ok(ExitCode::SUCCESS)
}
