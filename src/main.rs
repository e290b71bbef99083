mod storage;
mod frecency;
mod log_parser;
mod store_manager;
mod indexer;
mod matcher;
mod relevance;
mod query;
mod render;
mod config;
mod i18n;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::{Context, Result};
use colored::*;

use config::Config;
use i18n::I18n;
use indexer::{SyncOptions, SyncReport};
use matcher::CommandMatcher;
use query::{QueryEngine, QueryOptions, SortMode};
use store_manager::StoreManager;

#[derive(Parser)]
#[command(name = "cch")]
#[command(version, about = "Search and rank shell commands run by Claude Code sessions")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// History database to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new entries from the session logs
    Sync {
        /// Re-read every log file from the start
        #[arg(long)]
        force: bool,
        /// Session log root [default: ~/.claude/projects]
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// List recorded commands
    List {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Search recorded commands
    Search {
        /// Substring (or regex with --regex) to match against the command text
        pattern: String,
        /// Treat the pattern as a regular expression
        #[arg(long)]
        regex: bool,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Show database statistics
    Stats {
        /// Skip indexing new log entries first
        #[arg(long)]
        no_sync: bool,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Maximum number of results [default: display.max_results]
    #[arg(long, short = 'n')]
    limit: Option<usize>,
    /// Only commands run in this directory
    #[arg(long, conflicts_with = "here")]
    cwd: Option<String>,
    /// Only commands run in the current directory
    #[arg(long)]
    here: bool,
    /// Result ordering [default: search.default_sort]
    #[arg(long, value_enum)]
    sort: Option<SortMode>,
    /// Skip indexing new log entries first
    #[arg(long)]
    no_sync: bool,
    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::new().context("Failed to load config")?;
    let i18n = I18n::new(&config.get_effective_language());
    if !config.display.color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
    log::debug!("using database {}", db_path.display());
    let mut store = StoreManager::open(&db_path)
        .with_context(|| i18n.t_format("error_open_store", &[&db_path.display().to_string()]))?;

    match cli.command {
        Commands::Sync { force, source } => {
            let mut options = sync_options(&config);
            if let Some(source) = source {
                options.source_root = source;
            }
            options.force = force;
            if force {
                println!("{}", i18n.t("sync_forced").yellow());
            }
            let report = indexer::sync(&mut store, &options);
            println!(
                "{}",
                i18n.t_format(
                    "sync_summary",
                    &[&report.files_scanned.to_string(), &report.new_records.to_string()]
                )
                .green()
            );
            print_sync_problems(&report, &i18n);
        }
        Commands::List { query } => {
            maybe_sync(&mut store, &config, query.no_sync, &i18n);
            let options = query_options(&query, &config, None, false, &i18n)?;
            let engine = QueryEngine::new(&store);
            let results = engine.list(&options)?;
            if results.is_empty() && !query.json {
                println!("{}", i18n.t("no_records").yellow());
                return Ok(());
            }
            print_results(results, options.limit, None, query.json, &i18n)?;
        }
        Commands::Search { pattern, regex, query } => {
            maybe_sync(&mut store, &config, query.no_sync, &i18n);
            let options = query_options(&query, &config, Some(pattern.clone()), regex, &i18n)?;
            let matcher = CommandMatcher::new(&pattern, regex);
            if matcher.fell_back() && !query.json {
                eprintln!("{}", i18n.t_format("regex_fallback", &[matcher.pattern()]).yellow());
            }

            let engine = QueryEngine::new(&store);
            let results = engine.search(&options)?;
            if results.is_empty() && !query.json {
                println!("{}", i18n.t_format("no_matches", &[&pattern]).yellow());
                return Ok(());
            }
            print_results(results, options.limit, Some(&matcher), query.json, &i18n)?;
        }
        Commands::Stats { no_sync } => {
            maybe_sync(&mut store, &config, no_sync, &i18n);
            let stats = store.stats()?;
            println!("{}", i18n.t_format("stats_commands", &[&stats.commands.to_string()]));
            println!("{}", i18n.t_format("stats_distinct", &[&stats.distinct_commands.to_string()]));
            println!("{}", i18n.t_format("stats_failed", &[&stats.failed_commands.to_string()]));
            println!("{}", i18n.t_format("stats_files", &[&stats.indexed_files.to_string()]));
            let fts = if store.fts_enabled() { i18n.t("enabled") } else { i18n.t("disabled") };
            println!("{}", i18n.t_format("stats_fts", &[&fts]));
        }
    }

    Ok(())
}

fn sync_options(config: &Config) -> SyncOptions {
    let mut options = SyncOptions::new(config.source_root());
    options.extension = config.storage.log_extension.clone();
    options
}

/// Index new log entries before a query unless disabled.
fn maybe_sync(store: &mut StoreManager, config: &Config, no_sync: bool, i18n: &I18n) {
    if no_sync || !config.auto_sync() {
        log::debug!("skipping sync");
        return;
    }
    let report = indexer::sync(store, &sync_options(config));
    log::debug!(
        "sync: {} files scanned, {} new records",
        report.files_scanned,
        report.new_records
    );
    print_sync_problems(&report, i18n);
}

fn print_sync_problems(report: &SyncReport, i18n: &I18n) {
    if report.errors.is_empty() {
        return;
    }
    eprintln!("{}", i18n.t_format("sync_problems", &[&report.errors.len().to_string()]).yellow());
    for error in &report.errors {
        eprintln!("  {}", error.dimmed());
    }
}

fn query_options(
    args: &QueryArgs,
    config: &Config,
    pattern: Option<String>,
    regex: bool,
    i18n: &I18n,
) -> Result<QueryOptions> {
    let cwd = if args.here {
        let dir = std::env::current_dir().with_context(|| i18n.t("error_cwd"))?;
        Some(dir.to_string_lossy().to_string())
    } else {
        args.cwd.clone()
    };

    Ok(QueryOptions {
        pattern,
        regex,
        cwd,
        limit: Some(args.limit.unwrap_or(config.display.max_results)),
        sort: args.sort.unwrap_or(config.search.default_sort),
        relevance: config.search.relevance,
    })
}

fn print_results(
    mut results: query::QueryResults,
    limit: Option<usize>,
    matcher: Option<&CommandMatcher>,
    json: bool,
    i18n: &I18n,
) -> Result<()> {
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    let rows = render::display_rows(&results, i18n);

    if json {
        println!("{}", render::render_json(&rows, results.total())?);
        return Ok(());
    }

    print!("{}", render::render_rows(&rows, matcher, i18n));
    if results.total() > results.len() {
        println!(
            "{}",
            i18n.t_format(
                "showing_of",
                &[&results.len().to_string(), &results.total().to_string()]
            )
            .dimmed()
        );
    }
    Ok(())
}
