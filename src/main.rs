//! mind-rs CLI: generate a decision and explain it with dictionary features

use anyhow::{bail, Context, Result};
use clap::Parser;
use mind_rs::{DecidePipeline, DecideRequest, DecideResponse, MindError, ModelConfig};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mind-rs")]
#[command(about = "Interpretable decisions from a generative model")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model directory or `HuggingFace` ID (e.g., "meta-llama/Meta-Llama-3-8B-Instruct")
    #[arg(short, long)]
    model: Option<String>,

    /// Sparse dictionary checkpoint (safetensors)
    #[arg(long)]
    sae: Option<PathBuf>,

    /// Capture layer (e.g., "layers.14.mlp.down_proj")
    #[arg(short, long)]
    layer: Option<String>,

    /// Device: cpu, cuda, cuda:N or metal
    #[arg(short, long)]
    device: Option<String>,

    /// Refiner checkpoint (safetensors)
    #[arg(long)]
    hrm: Option<PathBuf>,

    /// Prompt for a one-shot request
    #[arg(short, long)]
    prompt: Option<String>,

    /// Agent issuing the one-shot request
    #[arg(long, default_value = "cli")]
    agent_id: String,

    #[arg(long, default_value_t = 64)]
    max_new_tokens: usize,

    /// Skip refinement for the one-shot request
    #[arg(long)]
    no_hrm: bool,

    /// One-shot request as a JSON file
    #[arg(
        short,
        long,
        conflicts_with_all = ["prompt", "agent_id", "max_new_tokens", "no_hrm"]
    )]
    request: Option<PathBuf>,

    /// Read JSON-lines requests from stdin, write JSON-lines responses to stdout
    #[arg(
        long,
        conflicts_with_all = ["prompt", "request", "agent_id", "max_new_tokens", "no_hrm"]
    )]
    serve: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn model_config(&self) -> Result<ModelConfig> {
        let mut config = match (&self.config, &self.model) {
            (Some(path), _) => ModelConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            (None, Some(model)) => ModelConfig::new(model.clone()),
            (None, None) => bail!("either --config or --model is required"),
        };
        if let Some(model) = &self.model {
            config.model_path.clone_from(model);
        }
        if let Some(sae) = &self.sae {
            config.sae_path = Some(sae.clone());
        }
        if let Some(layer) = &self.layer {
            config.capture_layer = Some(layer.clone());
        }
        if let Some(device) = &self.device {
            config.device.clone_from(device);
        }
        if let Some(hrm) = &self.hrm {
            config.hrm_path = Some(hrm.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn one_shot_request(&self) -> Result<DecideRequest> {
        if let Some(path) = &self.request {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading request {}", path.display()))?;
            return Ok(serde_json::from_str(&text)?);
        }
        let Some(prompt) = &self.prompt else {
            bail!("one of --prompt, --request or --serve is required");
        };
        Ok(DecideRequest {
            agent_id: self.agent_id.clone(),
            prompt: prompt.clone(),
            hrm_enabled: !self.no_hrm,
            max_new_tokens: self.max_new_tokens,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only responses
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.model_config()?;
    let request = if cli.serve {
        None
    } else {
        let request = cli.one_shot_request()?;
        request.validate(config.max_new_tokens_limit)?;
        Some(request)
    };
    eprintln!("=== mind-rs ===");
    eprintln!("Model:  {}", config.model_path);
    eprintln!("Device: {}", config.device);
    match (&config.sae_path, &config.capture_layer) {
        (Some(sae), Some(layer)) => eprintln!("SAE:    {} @ {layer}", sae.display()),
        (None, Some(layer)) => eprintln!("Layer:  {layer} (no dictionary)"),
        _ => eprintln!("SAE:    disabled"),
    }

    let pipeline = DecidePipeline::from_config(&config)?;
    info!("Pipeline ready");

    let Some(request) = request else {
        return serve(&pipeline, config.max_new_tokens_limit);
    };
    let response = pipeline.decide(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Answer one JSON request per stdin line until EOF.
fn serve(pipeline: &DecidePipeline, max_new_tokens_limit: usize) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    let mut served = 0usize;

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match handle_line(pipeline, &line, max_new_tokens_limit) {
            Ok(response) => serde_json::to_value(&response)?,
            Err(e) => {
                warn!("Request failed: {e}");
                serde_json::json!({ "error": e.to_string(), "retryable": e.is_retryable() })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
        served += 1;
    }

    info!("Served {served} requests");
    Ok(())
}

fn handle_line(
    pipeline: &DecidePipeline,
    line: &str,
    max_new_tokens_limit: usize,
) -> std::result::Result<DecideResponse, MindError> {
    let request: DecideRequest = serde_json::from_str(line)?;
    request.validate(max_new_tokens_limit)?;
    pipeline.decide(&request)
}
