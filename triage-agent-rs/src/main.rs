// triage-agent-rs/src/main.rs
// Command-line front end for the MCTA triage core

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, ValueEnum};
use log::{info, warn};

use triage_agent::intake::{process_uploads, GeminiImageExtractor, Upload};
use triage_agent::{LabPanel, RunMode, RunResult, SessionState, TriageSession, VitalSample};
use triage_sdk::config::{AgentConfig, CompositeConfigProvider, EnvConfigProvider, GeminiConfig};
use triage_sdk::gemini::GeminiClient;
use triage_sdk::ModelClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Multi-turn run with tool calls
    Agent,
    /// Single structured call without tools
    Fast,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Agent => RunMode::Agent,
            Mode::Fast => RunMode::Fast,
        }
    }
}

/// Multimodal clinical triage with a hosted model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Free-text patient notes
    #[arg(long, conflicts_with = "notes_file")]
    notes: Option<String>,

    /// Read patient notes from a file
    #[arg(long)]
    notes_file: Option<PathBuf>,

    /// JSON object of lab values, e.g. {"WBC": 18.5, "Lactate": 4.8}
    #[arg(long)]
    labs: Option<PathBuf>,

    /// JSON array of {"time", "SpO2", "HeartRate"} measurements
    #[arg(long)]
    vitals: Option<PathBuf>,

    /// Image to include (X-ray, lab report photo, vitals chart); repeatable
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "agent")]
    mode: Mode,

    /// Print the full run result as JSON
    #[arg(long)]
    json: bool,

    /// Write the vitals chart PNG here when one was generated
    #[arg(long)]
    chart_out: Option<PathBuf>,
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload::from_bytes(filename, mime_type_for(path), &bytes))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_summary(result: &RunResult) {
    match &result.report {
        Some(report) => {
            println!("Triage urgency:   {}", report.triage_urgency);
            println!("Confidence:       {:.2}", report.confidence_score);
            println!("Differential diagnosis:");
            for (rank, entry) in report.differential_diagnosis.iter().enumerate() {
                println!("  {}. {}", rank + 1, entry.label());
            }
            if let Some(score) = report.risk_score() {
                println!("Sepsis risk score: {}", score);
            }
            println!("\nEvidence:\n{}", report.evidence_summary);
        }
        None => println!("No diagnostic report was produced."),
    }

    if !result.tool_log.is_empty() {
        println!("\nTool log:");
        for line in &result.tool_log {
            println!("  {}", line);
        }
    }

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in &result.errors {
            println!("  {}", error);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut provider = CompositeConfigProvider::new();
    provider.add_provider(EnvConfigProvider::new().with_prefix("MCTA"));
    provider.add_provider(EnvConfigProvider::new());

    let gemini_config = GeminiConfig::from_provider(&provider)?;
    let agent_config = AgentConfig::from_provider(&provider)?;
    info!("Using model {} (max {} turns)", gemini_config.model, agent_config.max_turns);

    let client: Arc<dyn ModelClient> = Arc::new(GeminiClient::new_with_config(gemini_config)?);
    let session = TriageSession::new(client.clone(), &agent_config)?;
    let extractor = GeminiImageExtractor::new(client, agent_config.retry.clone());

    let notes = match (&args.notes, &args.notes_file) {
        (Some(notes), _) => notes.clone(),
        (None, Some(path)) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        (None, None) => String::new(),
    };

    let mut state = SessionState::new();
    if let Some(path) = &args.labs {
        state.labs = Some(read_json::<LabPanel>(path)?);
    }
    if let Some(path) = &args.vitals {
        state.vitals = Some(read_json::<Vec<VitalSample>>(path)?);
    }

    let uploads = args
        .images
        .iter()
        .map(|path| read_upload(path))
        .collect::<Result<Vec<_>>>()?;
    let intake = process_uploads(&uploads, &extractor, &mut state).await;
    for warning in &intake.warnings {
        warn!("{}", warning);
    }

    let input = state.patient_input(notes, &intake);
    let result = session.run(&mut state, &input, args.mode.into()).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if let (Some(path), Some(chart)) = (&args.chart_out, &state.visualization) {
        let png = base64::engine::general_purpose::STANDARD
            .decode(chart)
            .context("decoding vitals chart")?;
        fs::write(path, png).with_context(|| format!("writing {}", path.display()))?;
        info!("Vitals chart written to {}", path.display());
    }

    if result.report.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
