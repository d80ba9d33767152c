//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use curio_client::{CallPayload, CollectionApi, EmbeddingApi, RetryClient, RetryPolicy};
use curio_dataset::{Dataset, ItemFilter, compose_text, load_descriptions};
use curio_indexer::{Indexer, embedding_dims, load_records};
use curio_pipeline::{PipelineConfig, Progress, RunSummary, run_pipeline};
use curio_shared::{AppConfig, RunConfig, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Curio — checkpointed enrichment for museum collection datasets.
#[derive(Parser)]
#[command(
    name = "curio",
    version,
    about = "Fetch, embed, and index museum collection records with resumable progress.",
    long_about = None,
)]
pub(crate) struct Cli {
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

/// Shared per-run pipeline flags.
#[derive(Debug, clap::Args)]
pub(crate) struct RunArgs {
    /// Cap on the number of items processed this run.
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Start fresh: zero the checkpoint and truncate the sink.
    #[arg(long)]
    pub fresh: bool,

    /// Delay between items in milliseconds (overrides config).
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Persist the checkpoint every N items (overrides config).
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Also cache terminal not-found results so future runs skip them.
    #[arg(long)]
    pub cache_not_found: bool,

    /// Directory for checkpoint, cache, and sink files
    /// (defaults to <data_dir>/<stage> from config).
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch object metadata from the public collection API.
    Fetch {
        /// Path to the collection CSV export.
        dataset: PathBuf,

        /// Identifier prefix for items (e.g., met_).
        #[arg(long, default_value = "met_")]
        id_prefix: String,

        /// Keep only rows with this classification (e.g., Paintings).
        #[arg(long)]
        classification: Option<String>,

        /// Keep only rows marked public domain.
        #[arg(long)]
        public_domain: bool,

        /// Keep only rows with a link resource.
        #[arg(long)]
        require_link: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Generate embeddings for dataset items via the embedding service.
    Embed {
        /// Path to the collection CSV export.
        dataset: PathBuf,

        /// Identifier prefix for items (e.g., moma_).
        #[arg(long, default_value = "moma_")]
        id_prefix: String,

        /// Optional JSONL sidecar of AI visual descriptions.
        #[arg(long)]
        descriptions: Option<PathBuf>,

        /// Execution device/tier hint passed to the service.
        #[arg(long)]
        device: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Bulk-upsert sink output into the search index.
    Index {
        /// Sink JSONL file to index (defaults to <data_dir>/embed/embeddings.jsonl).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Index name (overrides config).
        #[arg(long)]
        index: Option<String>,

        /// Bulk batch size (overrides config).
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
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
        0 => "curio=info",
        1 => "curio=debug",
        _ => "curio=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fetch {
            dataset,
            id_prefix,
            classification,
            public_domain,
            require_link,
            run,
        } => {
            cmd_fetch(
                &dataset,
                &id_prefix,
                classification,
                public_domain,
                require_link,
                &run,
            )
            .await
        }
        Command::Embed {
            dataset,
            id_prefix,
            descriptions,
            device,
            run,
        } => cmd_embed(&dataset, &id_prefix, descriptions.as_deref(), device, &run).await,
        Command::Index {
            input,
            index,
            batch_size,
        } => cmd_index(input, index, batch_size).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Path and config resolution
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve the output directory for one pipeline stage.
fn stage_dir(config: &AppConfig, out: Option<&PathBuf>, stage: &str) -> PathBuf {
    match out {
        Some(dir) => dir.clone(),
        None => expand_tilde(&config.defaults.data_dir).join(stage),
    }
}

/// Merge config-file defaults with CLI run flags.
fn resolve_run_config(config: &AppConfig, args: &RunArgs, device: Option<String>) -> RunConfig {
    let mut run = RunConfig::from(config);
    run.limit = args.limit;
    run.resume = !args.fresh;
    run.cache_not_found = args.cache_not_found;
    if let Some(ms) = args.delay_ms {
        run.delay = Duration::from_millis(ms);
    }
    if let Some(interval) = args.checkpoint_interval {
        run.checkpoint_interval = interval.max(1);
    }
    if let Some(device) = device {
        run.device = device;
    }
    run
}

fn pipeline_config(
    run: RunConfig,
    model: &str,
    dir: &std::path::Path,
    sink_name: &str,
) -> PipelineConfig {
    PipelineConfig {
        run,
        model: model.to_string(),
        checkpoint_path: dir.join("progress.json"),
        cache_path: dir.join("cache.jsonl"),
        sink_path: dir.join(sink_name),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_fetch(
    dataset_path: &std::path::Path,
    id_prefix: &str,
    classification: Option<String>,
    public_domain: bool,
    require_link: bool,
    args: &RunArgs,
) -> Result<()> {
    let config = load_config()?;

    let filter = ItemFilter {
        classification,
        public_domain_only: public_domain,
        require_link,
    };
    let dataset = Dataset::load_csv(dataset_path, id_prefix, &filter)?;
    if dataset.is_empty() {
        println!("No items matched the filter — nothing to do.");
        return Ok(());
    }

    let run = resolve_run_config(&config, args, None);
    let dir = stage_dir(&config, args.out.as_ref(), "fetch");
    let pipeline = pipeline_config(run, "collection_api", &dir, "objects.jsonl");

    let service = CollectionApi::new(&config.collection_api)?;
    let mut client = RetryClient::new(service, RetryPolicy::from(&config.retry));

    info!(
        dataset = %dataset_path.display(),
        items = dataset.len(),
        out = %dir.display(),
        "fetching object metadata"
    );

    let prefix = id_prefix.to_string();
    let reporter = CliProgress::new();
    let summary = run_pipeline(
        &pipeline,
        dataset.items(),
        &mut client,
        |item| {
            let key = item.id.strip_prefix(&prefix).unwrap_or(&item.id);
            Some(CallPayload::ObjectKey(key.to_string()))
        },
        &reporter,
    )
    .await?;

    print_summary("Fetch", &summary, &pipeline.sink_path);
    Ok(())
}

async fn cmd_embed(
    dataset_path: &std::path::Path,
    id_prefix: &str,
    descriptions_path: Option<&std::path::Path>,
    device: Option<String>,
    args: &RunArgs,
) -> Result<()> {
    let config = load_config()?;

    let dataset = Dataset::load_csv(dataset_path, id_prefix, &ItemFilter::default())?;
    if dataset.is_empty() {
        println!("Dataset is empty — nothing to do.");
        return Ok(());
    }

    let descriptions = match descriptions_path {
        Some(path) => load_descriptions(path)?,
        None => Default::default(),
    };

    let run = resolve_run_config(&config, args, device);
    let dir = stage_dir(&config, args.out.as_ref(), "embed");
    let pipeline = pipeline_config(run, &config.embedding.model, &dir, "embeddings.jsonl");

    let service = EmbeddingApi::new(&config.embedding)?;
    let mut client = RetryClient::new(service, RetryPolicy::from(&config.retry));

    info!(
        dataset = %dataset_path.display(),
        items = dataset.len(),
        descriptions = descriptions.len(),
        model = %config.embedding.model,
        out = %dir.display(),
        "generating embeddings"
    );

    let reporter = CliProgress::new();
    let summary = run_pipeline(
        &pipeline,
        dataset.items(),
        &mut client,
        |item| {
            let text = compose_text(item, descriptions.get(&item.id));
            if text.is_empty() {
                None
            } else {
                Some(CallPayload::Text(text))
            }
        },
        &reporter,
    )
    .await?;

    print_summary("Embed", &summary, &pipeline.sink_path);
    Ok(())
}

async fn cmd_index(
    input: Option<PathBuf>,
    index: Option<String>,
    batch_size: Option<usize>,
) -> Result<()> {
    let config = load_config()?;

    let input = input.unwrap_or_else(|| {
        expand_tilde(&config.defaults.data_dir)
            .join("embed")
            .join("embeddings.jsonl")
    });
    let index_name = index.unwrap_or_else(|| config.index.name.clone());
    let batch_size = batch_size.unwrap_or(config.index.batch_size);

    let records = load_records(&input)?;
    if records.is_empty() {
        println!("Nothing to index in {}.", input.display());
        return Ok(());
    }

    let api_key = std::env::var(&config.index.api_key_env).ok();
    if api_key.is_none() {
        info!(env = %config.index.api_key_env, "no API key in environment, connecting anonymously");
    }

    let indexer = Indexer::new(&config.index.url, &index_name, api_key, batch_size);

    if let Some(dims) = embedding_dims(&records) {
        indexer.ensure_index(&records[0].model, dims).await?;
    }

    info!(
        input = %input.display(),
        records = records.len(),
        index = %index_name,
        batch_size,
        "bulk indexing"
    );

    let summary = indexer.bulk_upsert(&records).await?;

    println!();
    println!("  Indexing complete!");
    println!("  Indexed: {}", summary.indexed);
    println!("  Failed:  {}", summary.failed);
    println!("  Batches: {}", summary.batches);
    println!();

    if summary.failed > 0 {
        return Err(eyre!("{} documents were rejected by the index", summary.failed));
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(stage: &str, summary: &RunSummary, sink: &std::path::Path) {
    println!();
    println!("  {stage} run complete!");
    println!("  Processed: {}", summary.processed);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Failed:    {}", summary.failed);
    println!(
        "  Total:     {} processed / {} skipped / {} failed",
        summary.checkpoint.total_processed,
        summary.checkpoint.total_skipped,
        summary.checkpoint.total_failed,
    );
    println!("  Sink:      {}", sink.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl Progress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, current: usize, total: usize, identifier: &str) {
        self.spinner
            .set_message(format!("Processing [{current}/{total}] {identifier}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
