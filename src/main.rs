use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use uuid::Uuid;

use mail_labeler::config::LabelerConfig;
use mail_labeler::embedding::create_encoder;
use mail_labeler::llm::{LlmBackend, LlmConfig, RetryPolicy, create_provider};
use mail_labeler::loader;
use mail_labeler::pipeline::{
    Adjudicator, CategoryInventory, Classifier, DisabledAdjudicator, LlmAdjudicator,
};
use mail_labeler::trace::{self, DEFAULT_TRACE_FILE};

/// Label unsolved emails with a category and a priority.
///
/// Reads a JSON list of email records and writes `<input>.labeled.json`
/// next to it, changing only each record's `category` and `priority`.
#[derive(Parser)]
#[command(name = "mail-labeler", version)]
struct Cli {
    /// JSON file containing the unsolved emails.
    input: PathBuf,

    /// JSON list of allowed category names.
    #[arg(long, default_value = "categories.json")]
    categories: PathBuf,

    /// JSON list of solved example emails used for priors and similarity.
    #[arg(long)]
    samples: Option<PathBuf>,

    /// TOML file overriding thresholds, embedding and adjudication settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// File the run log and decision trace are appended to.
    #[arg(long, default_value = DEFAULT_TRACE_FILE)]
    trace_file: PathBuf,

    /// Records classified concurrently.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Never call a model; low-confidence decisions use their fallbacks.
    #[arg(long)]
    no_adjudication: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match trace::init_logging(&cli.trace_file) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: trace file unavailable ({e})");
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_target(false)
                .init();
            None
        }
    };

    match run(&cli).await {
        Ok(output) => {
            eprintln!("Wrote labeled output to {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run failed: {e:#}");
            eprintln!("Error: {e:#}\nSee {} for details.", cli.trace_file.display());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<PathBuf> {
    let run_id = Uuid::new_v4();
    info!(%run_id, started_at = %Utc::now().to_rfc3339(), "-------------------------");
    eprintln!("📬 Mail Labeler v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => LabelerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LabelerConfig::default(),
    };
    config.apply_env_overrides();
    if cli.no_adjudication {
        config.adjudication.enabled = false;
    }
    config.validate()?;

    // ── Inputs (any failure aborts before classification) ──────────
    let categories = loader::validate_categories(loader::read_json(&cli.categories)?)?;
    let inventory = Arc::new(CategoryInventory::new(categories)?);
    info!(path = %cli.categories.display(), count = inventory.len(), "Loaded categories");

    let emails = loader::validate_input_emails(loader::read_json(&cli.input)?)?;
    let records = loader::parse_records(&emails)?;
    info!(path = %cli.input.display(), count = records.len(), "Loaded input emails");

    let samples = match &cli.samples {
        Some(path) => {
            let samples = loader::load_samples(loader::read_json(path)?)?;
            info!(path = %path.display(), count = samples.len(), "Loaded samples");
            samples
        }
        None => {
            info!("No samples given; priors and similarity stay unresolved");
            Vec::new()
        }
    };

    eprintln!("   Categories: {}", inventory.len());
    eprintln!("   Emails: {}", records.len());
    eprintln!("   Samples: {}", samples.len());

    // ── Cascade ─────────────────────────────────────────────────────
    let encoder = create_encoder(&config.embedding)?;
    let adjudicator = build_adjudicator(&config)?;
    let classifier =
        Classifier::from_samples(&config, inventory, &samples, encoder, adjudicator).await;

    let results = classifier.classify_batch(&records, cli.concurrency).await;

    // ── Output ──────────────────────────────────────────────────────
    let mut labeled = Vec::with_capacity(records.len());
    for (index, (original, result)) in emails.iter().zip(&results).enumerate() {
        let number = index + 1;
        trace::emit_trace(number, &result.trace);

        let updated = result.apply_to_value(original);
        loader::enforce_only_labels_changed(original, &updated)
            .with_context(|| format!("email {number}"))?;

        info!(
            record = number,
            category = %result.category,
            priority = %result.priority,
            junk = result.junk,
            "Labeled"
        );
        labeled.push(updated);
    }

    let output = loader::make_output_path(&cli.input);
    loader::write_json(&output, &labeled)?;
    info!(%run_id, path = %output.display(), count = labeled.len(), "Wrote output");
    Ok(output)
}

fn build_adjudicator(config: &LabelerConfig) -> anyhow::Result<Arc<dyn Adjudicator>> {
    let settings = &config.adjudication;
    if !settings.enabled {
        info!("Adjudication disabled");
        return Ok(Arc::new(DisabledAdjudicator));
    }

    let Some(llm_config) = LlmConfig::from_env(settings)? else {
        let backend = LlmBackend::parse(&settings.backend)?;
        warn!(
            var = backend.api_key_var(),
            "API key not set; adjudication disabled"
        );
        return Ok(Arc::new(DisabledAdjudicator));
    };

    let llm = create_provider(&llm_config)?;
    Ok(Arc::new(LlmAdjudicator::new(
        llm,
        RetryPolicy::from_config(settings),
    )))
}
