//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use kbmirror_core::{
    Action, BridgeClusterer, Classification, Clusterer, PassOptions, ProgressReporter, Services,
    SyncResult, Unclustered, append_examples, plan_collection, sync_collection,
};
use kbmirror_docstore::HttpDocumentStore;
use kbmirror_shared::{
    AppConfig, ArticleId, CollectionConfig, Location, init_config, load_config, load_config_from,
};
use kbmirror_source::HttpRecordSource;
use kbmirror_storage::{LedgerStore, MemoryLedgerStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbmirror: keep a folder of documents in step with knowledge-base articles.
#[derive(Parser)]
#[command(
    name = "kbmirror",
    version,
    about = "Mirror knowledge-base articles into documents and append example tickets.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.kbmirror/kbmirror.toml).
    #[arg(long, global = true, env = "KBMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Reconcile mirrored documents with the source articles.
    Sync {
        /// Only this collection (defaults to every configured collection).
        #[arg(short, long)]
        collection: Option<String>,

        /// Classify articles without touching documents or ledgers.
        #[arg(long)]
        dry_run: bool,
    },

    /// Append clustered example tickets to article documents.
    Examples {
        /// Print the blocks instead of writing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect saved ledgers.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Ledger subcommands.
#[derive(Subcommand)]
pub(crate) enum LedgerAction {
    /// Print the entries of one collection's ledger.
    Show {
        /// Collection name.
        collection: String,

        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List saved ledgers with their sizes.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbmirror_cli=info,kbmirror_core=info,kbmirror_storage=info,kbmirror_source=info,kbmirror_docstore=info",
        1 => "kbmirror_cli=debug,kbmirror_core=debug,kbmirror_storage=debug,kbmirror_source=debug,kbmirror_docstore=debug",
        _ => "kbmirror_cli=trace,kbmirror_core=trace,kbmirror_storage=trace,kbmirror_source=trace,kbmirror_docstore=trace,kbmirror_text=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init().await;
    }

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Sync {
            collection,
            dry_run,
        } => cmd_sync(&config, collection.as_deref(), dry_run).await,
        Command::Examples { dry_run } => cmd_examples(&config, dry_run).await,
        Command::Ledger { action } => match action {
            LedgerAction::Show { collection, json } => {
                cmd_ledger_show(&config, &collection, json).await
            }
            LedgerAction::List => cmd_ledger_list(&config).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

fn select_collections<'c>(config: &'c AppConfig, name: Option<&str>) -> Result<Vec<&'c CollectionConfig>> {
    if config.collections.is_empty() {
        return Err(eyre!(
            "no collections configured. Add a [[collections]] section to the config file."
        ));
    }
    match name {
        None => Ok(config.collections.iter().collect()),
        Some(name) => config
            .collections
            .iter()
            .find(|c| c.name == name)
            .map(|c| vec![c])
            .ok_or_else(|| eyre!("unknown collection '{name}'")),
    }
}

async fn cmd_sync(config: &AppConfig, collection: Option<&str>, dry_run: bool) -> Result<()> {
    let collections = select_collections(config, collection)?;
    let source = HttpRecordSource::new(&config.source)?;
    let store = HttpDocumentStore::new(&config.document_store)?;
    let options = PassOptions::from_config(config);

    if dry_run {
        let ledgers = open_ledgers_readonly(config).await?;
        let services = Services {
            source: &source,
            store: &store,
            ledgers: ledgers.as_ref(),
        };
        for collection in collections {
            let reporter = CliProgress::new();
            let plan = plan_collection(services, &options, collection, &reporter).await;
            reporter.finish();
            print_plan(&collection.name, &plan?);
        }
        return Ok(());
    }

    let db_path = config.ledger.resolved_db_path()?;
    let ledgers = Storage::open(&db_path).await?;
    let services = Services {
        source: &source,
        store: &store,
        ledgers: &ledgers,
    };

    for collection in collections {
        info!(collection = %collection.name, "syncing collection");
        let reporter = CliProgress::new();
        let result = sync_collection(services, &options, collection, &reporter).await;
        reporter.finish();
        print_sync_result(&result?);
    }
    Ok(())
}

/// Read-only ledger access for dry runs. Without a database yet, every
/// ledger reads as empty.
async fn open_ledgers_readonly(config: &AppConfig) -> Result<Box<dyn LedgerStore>> {
    let db_path = config.ledger.resolved_db_path()?;
    if db_path.exists() {
        Ok(Box::new(Storage::open_readonly(&db_path).await?))
    } else {
        warn!(path = %db_path.display(), "no ledger database yet, planning against empty ledgers");
        Ok(Box::new(MemoryLedgerStore::new()))
    }
}

fn print_sync_result(result: &SyncResult) {
    let report = &result.report;
    println!();
    println!("  Collection '{}' synced", result.collection);
    println!("  Created:   {}", report.count(Action::Created));
    println!("  Recreated: {}", report.count(Action::Recreated));
    println!("  Updated:   {}", report.count(Action::Updated));
    println!("  Deleted:   {}", report.count(Action::Deleted));
    println!("  Current:   {}", report.count(Action::Current));
    println!("  Skipped:   {}", report.count(Action::Skipped));
    println!("  Ledger:    {} entries", result.ledger_size);
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    for outcome in report.outcomes.iter().filter(|o| o.action == Action::Skipped) {
        println!(
            "    skipped {}: {}",
            outcome.article_id,
            outcome.detail.as_deref().unwrap_or("unknown")
        );
    }
    println!();
}

fn print_plan(collection: &str, plan: &kbmirror_core::SyncPlan) {
    let unknown = plan.rows.iter().filter(|(_, c)| c.is_none()).count();
    println!();
    println!("  Collection '{collection}' (dry run)");
    println!("  New:       {}", plan.count(Classification::New));
    println!("  Missing:   {}", plan.count(Classification::MovedOrMissing));
    println!("  Stale:     {}", plan.count(Classification::Stale));
    println!("  Current:   {}", plan.count(Classification::Current));
    println!("  Delete:    {}", plan.deletions.len());
    if unknown > 0 {
        println!("  Unchecked: {unknown}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// examples
// ---------------------------------------------------------------------------

async fn cmd_examples(config: &AppConfig, dry_run: bool) -> Result<()> {
    if config.collections.is_empty() {
        return Err(eyre!("no collections configured, so there are no documents to annotate"));
    }
    let source = HttpRecordSource::new(&config.source)?;
    let store = HttpDocumentStore::new(&config.document_store)?;
    let options = PassOptions::from_config(config);
    let ledgers = open_ledgers_readonly(config).await?;
    let services = Services {
        source: &source,
        store: &store,
        ledgers: ledgers.as_ref(),
    };

    let mut bridge = match &config.examples.bridge_cmd {
        Some(cmd) => Some(BridgeClusterer::spawn(cmd, &config.examples.bridge_args)?),
        None => {
            info!("no clustering bridge configured, tickets stay unclustered");
            None
        }
    };
    let mut unclustered = Unclustered;
    let clusterer: &mut dyn Clusterer = match bridge.as_mut() {
        Some(bridge) => bridge,
        None => &mut unclustered,
    };

    let reporter = CliProgress::new();
    let result = append_examples(services, &options, config, clusterer, dry_run, &reporter).await;
    reporter.finish();
    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    let result = result?;

    if dry_run {
        for (article_id, doc, body) in &result.rendered {
            println!("--- article {article_id} → document {doc}");
            println!("{body}");
            println!();
        }
    }

    println!();
    println!("  Examples {}", if dry_run { "rendered (dry run)" } else { "appended" });
    println!("  Written:   {}", if dry_run { result.rendered.len() } else { result.written.len() });
    println!("  Unmatched: {}", result.unmatched.len());
    println!("  Filtered:  {}", result.filtered.len());
    println!("  Cleared:   {}", result.cleared.len());
    println!("  Skipped:   {}", result.skipped.len());
    for (article_id, reason) in &result.skipped {
        println!("    skipped {article_id}: {reason}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// ledger
// ---------------------------------------------------------------------------

async fn open_existing_storage(config: &AppConfig) -> Result<Storage> {
    let db_path = config.ledger.resolved_db_path()?;
    open_readonly_at(&db_path).await
}

async fn open_readonly_at(path: &Path) -> Result<Storage> {
    Storage::open_readonly(path)
        .await
        .map_err(|e| eyre!("{e}. Run `kbmirror sync` to create the ledger database."))
}

async fn cmd_ledger_show(config: &AppConfig, collection: &str, json: bool) -> Result<()> {
    let collection = config
        .collections
        .iter()
        .find(|c| c.name == collection)
        .ok_or_else(|| eyre!("unknown collection '{collection}'"))?;
    let storage = open_existing_storage(config).await?;
    let location = Location(config.ledger.location.clone());
    let ledger = storage.load(&collection.ledger_name, &location).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(());
    }

    if ledger.is_empty() {
        println!("Ledger '{}' is empty.", collection.ledger_name);
        return Ok(());
    }
    let width = ledger
        .ids()
        .map(|id| id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("ARTICLE".len());
    println!("{:<width$}  {:<10}  DOCUMENT", "ARTICLE", "REVISION");
    for (id, entry) in ledger.iter() {
        println!(
            "{:<width$}  {:<10}  {}",
            id.as_str(),
            entry.revision.as_str(),
            entry.document_ref
        );
    }
    println!();
    println!("{} entries", ledger.len());
    Ok(())
}

async fn cmd_ledger_list(config: &AppConfig) -> Result<()> {
    let storage = open_existing_storage(config).await?;
    let location = Location(config.ledger.location.clone());
    let summaries = storage.list_ledgers(&location).await?;

    if summaries.is_empty() {
        println!("No ledgers saved under '{location}'.");
        return Ok(());
    }
    println!("{:<24}  {:>8}  SAVED", "LEDGER", "ENTRIES");
    for summary in summaries {
        println!("{:<24}  {:>8}  {}", summary.name, summary.entry_count, summary.saved_at);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn article_done(&self, article_id: &ArticleId, action: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {article_id}: {action}"));
    }
}
