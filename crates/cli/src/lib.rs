use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use prompt_analysis::{AnalysisError, AnchorConfig, PromptAnalyzer, ANCHOR_SCHEMA_VERSION};
use prompt_protocol::{serialize_json_pretty, AnalysisReport, ErrorEnvelope};
use prompt_vector_store::{EmbeddingManager, EmbeddingMode, EmbeddingModel};
use serde::Serialize;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::flags::{EmbedMode, SeverityFlag};

mod flags;
mod report;

/// Exit status of `analyze --fail-on` when a finding reaches the threshold.
const FINDINGS_EXIT_CODE: i32 = 2;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "prompt-check")]
#[command(about = "Find contradictions, gaps and vague requests in system prompts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model directory (overrides PROMPT_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// CUDA device id
    #[arg(long, global = true)]
    cuda_device: Option<i32>,

    /// Timeout for each embedding call, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a system prompt, optionally against a user request
    Analyze(AnalyzeArgs),

    /// Embed every anchor set and write them to a cache file
    Precompute(PrecomputeArgs),

    /// Parse and validate an anchor overlay file
    #[command(name = "validate-anchors")]
    ValidateAnchors(ValidateArgs),

    /// Print the JSON schema of the analysis report
    Schema,
}

impl Commands {
    const fn json(&self) -> bool {
        match self {
            Commands::Analyze(args) => args.json,
            Commands::Precompute(args) => args.json,
            Commands::ValidateAnchors(args) => args.json,
            Commands::Schema => true,
        }
    }
}

#[derive(Args)]
struct AnalyzeArgs {
    /// System prompt file ("-" reads stdin)
    system: PathBuf,

    /// File holding the user request
    #[arg(long, conflicts_with = "request")]
    user: Option<PathBuf>,

    /// Inline user request
    #[arg(long)]
    request: Option<String>,

    /// Anchor overlay merged over the bundled anchors (JSON or TOML)
    #[arg(long)]
    anchors: Option<PathBuf>,

    /// Anchor cache written by `precompute`
    #[arg(long)]
    anchor_cache: Option<PathBuf>,

    /// Exit with status 2 when a finding reaches this severity
    #[arg(long, value_enum)]
    fail_on: Option<SeverityFlag>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PrecomputeArgs {
    /// Anchor overlay merged over the bundled anchors (JSON or TOML)
    #[arg(long)]
    anchors: Option<PathBuf>,

    /// Output file
    #[arg(long, default_value = ".prompt-check/anchors.json")]
    out: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Overlay file to validate
    path: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct PrecomputeOutput {
    path: PathBuf,
    model_id: String,
    fingerprint: String,
}

#[derive(Serialize)]
struct AnchorSummary {
    schema_version: u32,
    parameters: usize,
    behavioral_opposites: usize,
    constraint_conflicts: usize,
    specificity: usize,
    anchor_sets: usize,
    centroids: usize,
}

impl AnchorSummary {
    fn of(config: &AnchorConfig) -> Self {
        Self {
            schema_version: ANCHOR_SCHEMA_VERSION,
            parameters: config.parameters().len(),
            behavioral_opposites: config.behavioral_opposites().len(),
            constraint_conflicts: config.constraint_conflicts().len(),
            specificity: config.specificity().len(),
            anchor_sets: config.anchor_table().len(),
            centroids: config.centroid_table().len(),
        }
    }
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    if let Some(model) = &cli.embed_model {
        env::set_var("PROMPT_EMBEDDING_MODEL", model);
    }
    if let Some(dir) = &cli.model_dir {
        env::set_var("PROMPT_MODEL_DIR", dir);
    }
    if let Some(device) = cli.cuda_device {
        env::set_var("PROMPT_CUDA_DEVICE", device.to_string());
    }
    if let Some(mode) = cli.embed_mode {
        env::set_var("PROMPT_EMBEDDING_MODE", mode.as_str());
    }

    // stdout is reserved for JSON
    let json_output = cli.command.json();
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let timeout = cli.timeout_ms.map(Duration::from_millis);
    let result = match cli.command {
        Commands::Analyze(args) => run_analyze(args, timeout).await,
        Commands::Precompute(args) => run_precompute(args, timeout).await,
        Commands::ValidateAnchors(args) => run_validate(args),
        Commands::Schema => run_schema(),
    };

    match result {
        Err(err) if json_output => {
            print_stdout(&serialize_json_pretty(&error_envelope(&err))?)?;
            std::process::exit(1);
        }
        other => other,
    }
}

async fn run_analyze(args: AnalyzeArgs, timeout: Option<Duration>) -> Result<()> {
    let system = read_input(&args.system)?;
    let user = match (&args.user, args.request) {
        (Some(path), _) => Some(read_input(path)?),
        (None, request) => request,
    };

    let config = load_anchors(args.anchors.as_deref())?;
    let (manager, mode) = build_manager(timeout)?;
    if let Some(path) = &args.anchor_cache {
        if mode == EmbeddingMode::Stub {
            log::warn!(
                "Ignoring anchor cache {}: lexical vectors are not portable across runs",
                path.display()
            );
        } else {
            let loaded = manager
                .load_precomputed(path)
                .await
                .map_err(AnalysisError::from)
                .with_context(|| format!("Failed to load anchor cache {}", path.display()))?;
            log::info!("Loaded {loaded} anchor sets from {}", path.display());
        }
    }

    let analyzer = PromptAnalyzer::new(manager, config).await?;
    let report = analyzer.analyze(&system, user.as_deref()).await?;

    if args.json {
        print_stdout(&serialize_json_pretty(&report)?)?;
    } else {
        print_stdout(&report::render_markdown(
            &args.system.display().to_string(),
            &report,
        ))?;
    }

    if let Some(threshold) = args.fail_on {
        exit_on_findings(&report, threshold);
    }
    Ok(())
}

fn exit_on_findings(report: &AnalysisReport, threshold: SeverityFlag) {
    let count = report.findings_at_least(threshold.as_domain()).count();
    if count > 0 {
        log::warn!(
            "{count} findings at or above {}",
            threshold.as_domain()
        );
        std::process::exit(FINDINGS_EXIT_CODE);
    }
}

async fn run_precompute(args: PrecomputeArgs, timeout: Option<Duration>) -> Result<()> {
    let config = load_anchors(args.anchors.as_deref())?;
    let (manager, _) = build_manager(timeout)?;
    let analyzer = PromptAnalyzer::new(manager, config).await?;
    let manager = analyzer.manager();
    manager
        .save_precomputed(&args.out)
        .await
        .map_err(AnalysisError::from)
        .with_context(|| format!("Failed to write anchor cache {}", args.out.display()))?;

    let output = PrecomputeOutput {
        path: args.out,
        model_id: manager.model_id().to_string(),
        fingerprint: manager.fingerprint(),
    };
    if args.json {
        print_stdout(&serialize_json_pretty(&output)?)?;
    } else {
        println!(
            "Wrote anchors for {} to {} (fingerprint {})",
            output.model_id,
            output.path.display(),
            output.fingerprint
        );
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let config = load_anchors(Some(args.path.as_path()))?;
    let summary = AnchorSummary::of(&config);
    if args.json {
        print_stdout(&serialize_json_pretty(&summary)?)?;
    } else {
        println!(
            "{} is valid: {} parameters, {} behavioral pairs, {} constraint conflicts, {} specificity tables",
            args.path.display(),
            summary.parameters,
            summary.behavioral_opposites,
            summary.constraint_conflicts,
            summary.specificity
        );
    }
    Ok(())
}

fn run_schema() -> Result<()> {
    let schema = schemars::schema_for!(AnalysisReport);
    print_stdout(&serde_json::to_string_pretty(&schema)?)
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_anchors(path: Option<&Path>) -> Result<AnchorConfig> {
    let loaded = match path {
        Some(path) => AnchorConfig::from_file(path),
        None => AnchorConfig::builtin(),
    };
    loaded.map_err(|err| AnalysisError::anchor_config(&err).into())
}

fn build_manager(timeout: Option<Duration>) -> Result<(Arc<EmbeddingManager>, EmbeddingMode)> {
    let model = EmbeddingModel::from_env()
        .map_err(AnalysisError::from)
        .context("Failed to initialise embedding model")?;
    let mode = model.mode();
    let mut manager = EmbeddingManager::new(Arc::new(model));
    if let Some(timeout) = timeout {
        manager = manager.with_timeout(timeout);
    }
    log::debug!(
        "Embedding backend {} ({}, dim {})",
        mode.as_str(),
        manager.model_id(),
        manager.dimension()
    );
    Ok((Arc::new(manager), mode))
}

fn error_envelope(err: &anyhow::Error) -> ErrorEnvelope {
    let code = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<AnalysisError>())
        .map_or("invalid_request", AnalysisError::code);
    let envelope = ErrorEnvelope::new(code, format!("{err:#}"));
    match code {
        "embedding_unavailable" => envelope
            .with_hint("Install the model files or set PROMPT_EMBEDDING_MODE=stub for offline runs"),
        "timeout" => envelope.with_hint("Raise --timeout-ms or check the embedding backend"),
        "anchor_config" => envelope.with_hint(
            "Check the overlay with `prompt-check validate-anchors` or rebuild the cache with `prompt-check precompute`",
        ),
        "malformed_input" => envelope.with_hint("The system prompt is empty or too short to analyze"),
        _ => envelope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompt_vector_store::VectorStoreError;

    #[test]
    fn envelope_codes_follow_the_error_chain() {
        let err = anyhow::Error::from(AnalysisError::from(VectorStoreError::unavailable("offline")))
            .context("Failed to initialise embedding model");
        let envelope = error_envelope(&err);
        assert_eq!(envelope.code, "embedding_unavailable");
        assert!(envelope.message.contains("offline"));
        assert!(envelope.hint.is_some());

        let plain = anyhow::anyhow!("Failed to read prompt.txt");
        assert_eq!(error_envelope(&plain).code, "invalid_request");
    }

    #[test]
    fn overlay_errors_are_anchor_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"thresholds": {"parameter": 3.0}}"#).unwrap();
        let err = load_anchors(Some(path.as_path())).unwrap_err();
        assert_eq!(error_envelope(&err).code, "anchor_config");
    }
}
