//! forgesight - image authenticity analysis from the command line.
//!
//! ## Commands
//!
//! - `analyze`: run the detector pipeline over an image and print a verdict
//! - `steps`: list the detectors the default pipeline runs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use forgesight_core::{
    init_tracing, progress_channel, PipelineConfig, PipelineOutcome, PipelineRunner,
    ProgressEvent, ProgressStream, TaskInput,
};
use forgesight_steps::{
    default_registry, step_catalog, ConsensusJudge, GeminiClient, ProviderConfig, SearchConfig,
};

#[derive(Parser)]
#[command(name = "forgesight")]
#[command(author = "Forgesight Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multimodal image authenticity analysis", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an image (and optional accompanying text) for signs of
    /// AI generation or manipulation
    Analyze {
        /// Path to the image file
        image: PathBuf,

        /// Text that accompanied the image (caption, post body)
        #[arg(short, long)]
        text: Option<String>,

        /// Stream progress events to stdout as NDJSON instead of the
        /// human-readable narrative
        #[arg(long)]
        events: bool,

        /// Per-step timeout in seconds
        #[arg(long, default_value = "45")]
        step_timeout: u64,

        /// Steps allowed to run at once (1 = sequential)
        #[arg(long, default_value = "1")]
        concurrency: usize,
    },

    /// List the detectors the default pipeline runs
    Steps,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Analyze {
            image,
            text,
            events,
            step_timeout,
            concurrency,
        } => cmd_analyze(&image, text, events, step_timeout, concurrency).await,
        Commands::Steps => cmd_steps(),
    }
}

/// Run the detector pipeline over one image and print the verdict.
///
/// A failed individual step does not fail the command; only an unreadable
/// image, missing provider credentials, or a failed final aggregation do.
async fn cmd_analyze(
    image: &PathBuf,
    text: Option<String>,
    events: bool,
    step_timeout: u64,
    concurrency: usize,
) -> Result<()> {
    let input = load_input(image, text)?;

    let provider = ProviderConfig::from_env().context("Provider credentials missing")?;
    let model =
        Arc::new(GeminiClient::new(provider).context("Failed to build provider client")?);
    let registry = default_registry(model.clone(), SearchConfig::from_env())
        .context("Failed to assemble step registry")?;
    let judge = ConsensusJudge::new(model);

    let runner = PipelineRunner::new(PipelineConfig {
        step_timeout: Duration::from_secs(step_timeout),
        max_concurrent: concurrency,
    });
    info!(steps = registry.len(), "pipeline assembled");

    let (emitter, stream) = progress_channel();
    let renderer = tokio::spawn(render_stream(stream, events));

    let outcome = runner.execute(input, &registry, &emitter, &judge).await;
    // Close the channel so the renderer drains and exits.
    drop(emitter);
    renderer.await.context("Progress renderer failed")?;

    let outcome = outcome.context("Pipeline run failed")?;
    if !events {
        print_verdict(&outcome);
    }
    Ok(())
}

/// Read the image from disk and pair it with the accompanying text.
fn load_input(image: &Path, text: Option<String>) -> Result<TaskInput> {
    let bytes =
        std::fs::read(image).with_context(|| format!("Failed to read image {:?}", image))?;
    Ok(TaskInput::new(bytes, text))
}

/// List the detectors the default pipeline runs.
fn cmd_steps() -> Result<()> {
    for (name, display_name) in step_catalog() {
        println!("{name:<22} {display_name}");
    }
    Ok(())
}

/// Drain progress events until the run's emitter is dropped.
async fn render_stream(mut stream: ProgressStream, as_ndjson: bool) {
    while let Some(event) = stream.recv().await {
        if as_ndjson {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize progress event"),
            }
        } else {
            render_human(&event);
        }
    }
}

/// One narrative line per event, on stderr so stdout stays reserved for
/// the verdict (and for NDJSON in `--events` mode).
fn render_human(event: &ProgressEvent) {
    match event {
        ProgressEvent::Start { total_steps } => {
            eprintln!("analyzing with {total_steps} steps");
        }
        ProgressEvent::StepStart { display_name, .. } => eprintln!("  … {display_name}"),
        ProgressEvent::StepComplete { step, .. } => eprintln!("  ✓ {step}"),
        ProgressEvent::StepError { step, error } => eprintln!("  ✗ {step}: {error}"),
        ProgressEvent::FinalAnalysisStart {} => eprintln!("  … weighing the findings"),
        ProgressEvent::FinalResult { .. } | ProgressEvent::Complete {} => {}
        ProgressEvent::Error { error } => eprintln!("analysis failed: {error}"),
    }
}

/// Final verdict block on stdout.
fn print_verdict(outcome: &PipelineOutcome) {
    println!();
    println!("{}", score_line(outcome.verdict.probability_score));
    println!();
    println!("{}", outcome.verdict.explanation);
    println!();
    for (name, result) in &outcome.results {
        if result.is_success() {
            println!("  ✓ {name}");
        } else {
            println!(
                "  ✗ {name}: {}",
                result.error.as_deref().unwrap_or("unspecified error")
            );
        }
    }
    println!();
    println!(
        "steps: {} succeeded, {} failed, {} ms total",
        outcome.succeeded_count(),
        outcome.failed_count(),
        outcome.duration_ms
    );
    println!("run id: {}", outcome.run_id);
}

fn score_line(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("probability of manipulation: {score:.0}/100"),
        None => "probability of manipulation: not scored".to_string(),
    }
}
