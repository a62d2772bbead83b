//! Timeline Harvester CLI
//!
//! Local execution entry point.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use timeline_harvester::{
    config,
    driver::{
        DriverFactory,
        snapshot::{SnapshotFactory, SnapshotSite},
    },
    error::Result,
    models::{
        Config, EnrichmentOptions, ExtractionRequest, OutputFormat, SearchMode, Subject,
        sort_newest_first,
    },
    pipeline::{self, HarvestOutcome, HarvestStats, Harvester},
    services::{
        BrowserLoginRenewer, Credentials, Extractor, QualityFilter, SessionManager, SessionPolicy,
    },
    storage::{FileSessionStore, OutputWriter},
    utils::log as console,
};

/// Timeline Harvester - resilient timeline extraction
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Extract recent timeline posts through a browser driver"
)]
struct Cli {
    /// Path to the config file (default: $HARVESTER_CONFIG or data/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract recent items for a user (`@name`) or hashtag (`#tag`)
    Extract {
        subject: String,

        #[arg(long)]
        max_items: Option<usize>,

        #[arg(long)]
        min_items: Option<usize>,

        #[arg(long)]
        scroll_steps: Option<usize>,

        /// Restrict search results to a language code, e.g. `en`
        #[arg(long)]
        language: Option<String>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Enrich items with engagement metrics
        #[arg(long)]
        metrics: bool,

        /// Enrich items with reply snippets
        #[arg(long)]
        comments: bool,

        #[arg(long, default_value_t = 20)]
        comment_limit: usize,

        /// Output formats (default: from config)
        #[arg(long, value_enum)]
        format: Vec<FormatArg>,

        /// Output directory (default: from config)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Inspect or renew the persisted session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Validate the configuration file
    Validate,

    /// Run extraction offline over a saved page dump
    Replay {
        html: PathBuf,

        /// Subject the dump belongs to, used for output naming
        #[arg(long, default_value = "@replay")]
        subject: String,

        #[arg(long)]
        max_items: Option<usize>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Show age and validity of the stored session
    Status,
    /// Log in again and store the new session
    Renew,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Live,
    Top,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Live => SearchMode::Live,
            ModeArg::Top => SearchMode::Top,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
    console::init(level);
}

#[cfg(feature = "chromium")]
fn driver_factory(config: &Config) -> Result<Arc<dyn DriverFactory>> {
    use timeline_harvester::driver::chromium::ChromiumFactory;
    Ok(Arc::new(ChromiumFactory::new(config.driver.clone())))
}

#[cfg(not(feature = "chromium"))]
fn driver_factory(_config: &Config) -> Result<Arc<dyn DriverFactory>> {
    Err(timeline_harvester::error::AppError::config(
        "this build has no browser driver; rebuild with --features chromium",
    ))
}

fn session_manager(config: &Config, factory: Arc<dyn DriverFactory>) -> Arc<SessionManager> {
    let store = FileSessionStore::new(&config.session.storage_file);
    let credentials = Credentials::from_env(&config.session);
    if credentials.is_none() {
        log::warn!(
            "{} / {} not set; session renewal is unavailable",
            config.session.username_env,
            config.session.password_env
        );
    }
    let renewer = BrowserLoginRenewer::new(
        factory,
        config.session.clone(),
        &config.driver,
        credentials,
    );
    Arc::new(SessionManager::new(
        Arc::new(store),
        Arc::new(renewer),
        SessionPolicy::from(&config.session),
    ))
}

async fn write_outcome(
    outcome: &HarvestOutcome,
    formats: &[OutputFormat],
    dir: PathBuf,
) -> Result<()> {
    let written = OutputWriter::new(dir).write(outcome, formats, Utc::now()).await?;
    for path in written {
        console::sub_item(&format!("Wrote {}", path.display()));
    }
    Ok(())
}

fn summarize(outcome: &HarvestOutcome) {
    let range = match (outcome.items.last(), outcome.items.first()) {
        (Some(oldest), Some(newest)) => format!(
            "{} .. {}",
            oldest.timestamp.to_rfc3339(),
            newest.timestamp.to_rfc3339()
        ),
        _ => "-".to_string(),
    };
    console::summary(
        &format!("Harvest {}", outcome.subject),
        &[
            ("Items", outcome.items.len().to_string()),
            ("Date range", range),
            ("Passes", outcome.stats.passes.to_string()),
            ("Scroll steps", outcome.stats.scroll_steps.to_string()),
            ("Dropped", outcome.stats.dropped.to_string()),
            ("Enriched", outcome.stats.enriched.to_string()),
        ],
    );
    for warning in &outcome.warnings {
        console::warn(&format!("{warning:?}"));
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::config_path(cli.config.as_deref());

    if let Command::Validate = cli.command {
        init_logging(cli.verbose, "info");
        pipeline::run_validate(&config_path)?;
        return Ok(());
    }

    let config = config::load_all(&config_path)?;
    init_logging(cli.verbose, &config.logging.level);
    log::info!("Loaded configuration from {}", config_path.display());

    match cli.command {
        Command::Extract {
            subject,
            max_items,
            min_items,
            scroll_steps,
            language,
            mode,
            metrics,
            comments,
            comment_limit,
            format,
            output_dir,
        } => {
            let subject = Subject::parse(&subject)?;
            console::header(&format!("Harvesting {subject}"));

            let mut request = ExtractionRequest::new(subject)
                .with_limits(
                    max_items.unwrap_or(config.request.max_items),
                    min_items.unwrap_or(config.request.min_items),
                )
                .with_scroll_steps(scroll_steps.unwrap_or(config.request.max_scroll_steps));
            if let Some(language) = language {
                request = request.with_language(language);
            }
            if let Some(mode) = mode {
                request = request.with_search_mode(mode.into());
            }
            if metrics || comments {
                request = request.with_enrichment(EnrichmentOptions {
                    metrics,
                    comments,
                    comment_limit,
                });
            }

            let factory = driver_factory(&config)?;
            let sessions = session_manager(&config, factory.clone());
            let harvester = Harvester::new(config.clone(), factory, sessions)?;

            let outcome = match harvester.harvest(&request).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    console::error(&format!(
                        "Harvest failed after gathering {} items: {}",
                        failure.items_gathered, failure.error
                    ));
                    return Err(failure.error);
                }
            };

            summarize(&outcome);
            let formats: Vec<OutputFormat> = if format.is_empty() {
                config.output.formats.clone()
            } else {
                format.into_iter().map(OutputFormat::from).collect()
            };
            let dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.dir));
            write_outcome(&outcome, &formats, dir).await?;
            console::success("Harvest complete");
        }

        Command::Session { action } => {
            let factory = driver_factory(&config);
            let sessions = match factory {
                Ok(factory) => session_manager(&config, factory),
                Err(e) => match action {
                    SessionAction::Renew => return Err(e),
                    SessionAction::Status => {
                        // status only reads the stored file
                        let factory: Arc<dyn DriverFactory> =
                            Arc::new(SnapshotFactory::new(SnapshotSite::new()));
                        session_manager(&config, factory)
                    }
                },
            };

            match action {
                SessionAction::Status => {
                    let (session, validity) = sessions.status().await?;
                    console::header("Session status");
                    console::sub_item(&format!("File: {}", config.session.storage_file));
                    match session {
                        Some(session) => {
                            console::sub_item(&format!(
                                "Last verified: {} ({}h ago)",
                                session.last_verified_at.to_rfc3339(),
                                session.age(Utc::now()).num_hours()
                            ));
                            console::sub_item(&format!(
                                "Cookies: {}",
                                session.state.cookies.len()
                            ));
                        }
                        None => console::sub_item("No stored session"),
                    }
                    console::sub_item(&format!("Validity: {validity:?}"));
                }
                SessionAction::Renew => {
                    console::header("Renewing session");
                    let session = sessions.force_renew().await?;
                    console::success(&format!(
                        "Session renewed with {} cookies",
                        session.state.cookies.len()
                    ));
                }
            }
        }

        Command::Replay {
            html,
            subject,
            max_items,
            output_dir,
        } => {
            let subject = Subject::parse(&subject)?;
            console::header(&format!("Replaying {}", html.display()));

            let page = tokio::fs::read_to_string(&html).await?;
            let extractor = Extractor::new(&config.selectors, &config.extraction)?;
            let report = extractor.extract_html(&page);
            let candidates = report.candidates();
            for (kind, count) in report.issue_counts() {
                console::sub_item(&format!("Rejected {count} ({kind})"));
            }

            let filtered =
                QualityFilter::new(&config.quality).filter(report.items, &mut HashSet::new());
            let mut items = filtered.accepted;
            sort_newest_first(&mut items);
            items.truncate(max_items.unwrap_or(config.request.max_items));

            let outcome = HarvestOutcome {
                subject,
                items,
                warnings: Vec::new(),
                stats: HarvestStats {
                    passes: 1,
                    candidates,
                    dropped: filtered.dropped.len(),
                    ..HarvestStats::default()
                },
                enrichment_requested: false,
            };
            summarize(&outcome);
            let dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.dir));
            write_outcome(&outcome, &config.output.formats, dir).await?;
            console::success("Replay complete");
        }

        Command::Validate => {}
    }

    Ok(())
}
