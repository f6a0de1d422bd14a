use anyhow::{Context, Result};
use catalog_taxonomy::{
    BatchOrchestrator, EngineConfig, ItemSelector, MergeOptions, RuleRegistry, SqliteStore,
    TaxonomyConsolidator,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "catalog-taxonomy")]
#[command(about = "Rule-driven catalog classification and taxonomy consolidation")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "CATALOG_TAXONOMY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config and environment)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema if missing
    Init,

    /// Classify items against the rule registry
    Classify {
        /// unclassified | all | brand:<name> | category:<id> | ids:<id,..>
        #[arg(short, long, default_value = "unclassified")]
        selector: ItemSelector,

        /// Rule registry JSON (overrides config and environment)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Error ceiling before the batch aborts
        #[arg(long)]
        error_threshold: Option<usize>,

        /// Resolve and count without writing associations
        #[arg(long)]
        dry_run: bool,
    },

    /// Distinct item count per category
    Counts,

    /// List visible empty leaves; hide them with --apply
    HideEmpty {
        #[arg(long)]
        apply: bool,
    },

    /// Make hidden categories visible again
    Show { ids: Vec<i64> },

    /// Merge SOURCE into TARGET and delete SOURCE
    Merge {
        source: i64,
        target: i64,

        /// Reparent SOURCE's children under TARGET
        #[arg(long)]
        cascade: bool,
    },

    /// List duplicate sibling categories; merge them with --apply
    Duplicates {
        #[arg(long)]
        apply: bool,

        #[arg(long)]
        cascade: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_taxonomy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }

    let store = SqliteStore::open(&config.database)?;
    info!("Opened database: {}", config.database.display());

    match args.command {
        Command::Init => {
            info!("Schema ready");
        }
        Command::Classify {
            selector,
            rules,
            error_threshold,
            dry_run,
        } => {
            if let Some(rules) = rules {
                config.rules = rules;
            }
            if let Some(threshold) = error_threshold {
                config.error_threshold = threshold;
            }

            let registry = RuleRegistry::from_file(&config.rules)?;
            info!(
                "Loaded {} rules (version {}) from {}",
                registry.rule_count(),
                registry.version(),
                config.rules.display()
            );

            let orchestrator = BatchOrchestrator::new(&store, config.batch_options(dry_run));
            let report = orchestrator.classify_batch(&selector, &registry);
            print_json(&report)?;

            if report.is_aborted() {
                std::process::exit(2);
            }
        }
        Command::Counts => {
            let counts = TaxonomyConsolidator::new(&store).count_by_category()?;
            print_json(&counts)?;
        }
        Command::HideEmpty { apply } => {
            let consolidator = TaxonomyConsolidator::new(&store);
            let counts = consolidator.count_by_category()?;
            let empty = consolidator.find_empty(&counts)?;

            if apply {
                let ids: Vec<i64> = empty.iter().map(|c| c.id).collect();
                let hidden = consolidator.hide_empty(&ids)?;
                info!("Hid {} empty categories", hidden);
            }
            print_json(&empty)?;
        }
        Command::Show { ids } => {
            let shown = TaxonomyConsolidator::new(&store).show(&ids)?;
            info!("Made {} categories visible", shown);
        }
        Command::Merge {
            source,
            target,
            cascade,
        } => {
            let report = TaxonomyConsolidator::new(&store)
                .merge_categories(source, target, MergeOptions { cascade })
                .with_context(|| format!("Merging category {} into {}", source, target))?;
            print_json(&report)?;
        }
        Command::Duplicates { apply, cascade } => {
            let consolidator = TaxonomyConsolidator::new(&store);
            let groups = consolidator.find_duplicate_groups()?;

            if apply {
                let mut reports = Vec::new();
                for group in &groups {
                    reports.extend(consolidator.merge_duplicate_group(group, MergeOptions { cascade })?);
                }
                print_json(&reports)?;
            } else {
                print_json(&groups)?;
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
