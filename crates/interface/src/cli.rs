//! CLI - Command Line Interface
//!
//! Available Commands:
//! - smartmark context <file>   - Print the transcript above a line
//! - smartmark classify <file>  - Show the marker role of every line
//! - smartmark render <file>    - Re-render the transcript in canonical marker form
//! - smartmark reply <file>     - Ask the model and stream its reply into the file

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use smartmark_core::{
    ContextScanner, Document, DocumentHandle, MarkerSet, ProviderTransport, ReplyOutcome,
    ReplyReport, ReplySession, SmartMarkConfig, SmartMarkConfigLoader, TextBuffer, Transcript,
    Transport, render_transcript,
};

use crate::document_io::{load_document, save_document};

/// CLI Errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Document error: {0}")]
    DocumentError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Reply failed: {0}")]
    ReplyFailed(String),
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::ConfigError(_) => 78,
            CliError::DocumentError(_) => 66,
            CliError::ProviderError(_) => 69,
            CliError::ReplyFailed(_) => 75,
        }
    }
}

/// CLI Configuration
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Explicit config file
    pub config_path: Option<PathBuf>,

    /// Verbose output
    pub verbose: bool,

    /// Output format
    pub output_format: OutputFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            verbose: false,
            output_format: OutputFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// SmartMark CLI
#[derive(Parser, Debug)]
#[command(name = "smartmark")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Config file (merged over the default locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Print the transcript reconstructed above a line
    Context(ContextArgs),

    /// Show how every line of a document is classified
    Classify(ClassifyArgs),

    /// Re-render the transcript above a line in canonical marker form
    Render(ContextArgs),

    /// Send the transcript to the model and write the reply into the file
    Reply(ReplyArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ContextArgs {
    /// Document path
    pub file: PathBuf,

    /// Line to scan upward from (0-based, -1 = last line)
    #[arg(short, long, allow_hyphen_values = true)]
    pub line: Option<isize>,

    /// Turn pairs to collect (overrides context.depth)
    #[arg(short, long)]
    pub depth: Option<usize>,
}

#[derive(Args, Debug)]
pub(crate) struct ClassifyArgs {
    /// Document path
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct ReplyArgs {
    /// Document path
    pub file: PathBuf,

    /// Line the prompt sits on (0-based, default: last line)
    #[arg(short, long)]
    pub line: Option<usize>,

    /// Model to use (overrides llm.model)
    #[arg(short = 'M', long)]
    pub model: Option<String>,

    /// Request the whole reply at once
    #[arg(long)]
    pub no_stream: bool,
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = CliConfig {
        config_path: cli.config.clone(),
        verbose: cli.verbose,
        output_format: cli.output.unwrap_or(OutputFormat::Pretty),
    };

    if config.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let settings = load_settings(config.config_path.as_deref())?;

    let output = match cli.command {
        Commands::Context(args) => cmd_context(args, &settings, &config).await?,
        Commands::Classify(args) => cmd_classify(args, &settings).await?,
        Commands::Render(args) => cmd_render(args, &settings).await?,
        Commands::Reply(mut args) => {
            let mut settings = settings;
            if let Some(model) = args.model.take() {
                settings.llm.model = model;
            }
            let transport = ProviderTransport::from_config(&settings.llm)
                .map_err(|e| CliError::ProviderError(e.to_string()))?;
            cmd_reply(args, &settings, &transport).await?
        }
    };

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn load_settings(explicit: Option<&Path>) -> Result<SmartMarkConfig, CliError> {
    let mut loader = SmartMarkConfigLoader::new();
    loader
        .load(explicit)
        .map_err(|e| CliError::ConfigError(e.to_string()))?;
    info!(sources = loader.sources().len(), "configuration loaded");
    Ok(loader.into_config())
}

async fn open_document(path: &Path, line: Option<usize>) -> Result<TextBuffer, CliError> {
    load_document(path, line)
        .await
        .map_err(|e| CliError::DocumentError(format!("{:#}", e)))
}

pub(crate) async fn cmd_context(
    args: ContextArgs,
    settings: &SmartMarkConfig,
    config: &CliConfig,
) -> Result<String, CliError> {
    let transcript = scan_file(&args, settings).await?;
    format_transcript(&transcript, config.output_format)
}

pub(crate) async fn cmd_classify(
    args: ClassifyArgs,
    settings: &SmartMarkConfig,
) -> Result<String, CliError> {
    let buffer = open_document(&args.file, None).await?;
    Ok(format_classification(
        &buffer,
        &MarkerSet::from(&settings.markers),
    ))
}

pub(crate) async fn cmd_render(
    args: ContextArgs,
    settings: &SmartMarkConfig,
) -> Result<String, CliError> {
    let transcript = scan_file(&args, settings).await?;
    Ok(render_transcript(
        &transcript,
        &MarkerSet::from(&settings.markers),
    ))
}

async fn scan_file(args: &ContextArgs, settings: &SmartMarkConfig) -> Result<Transcript, CliError> {
    let buffer = open_document(&args.file, None).await?;
    let scanner = ContextScanner::new(MarkerSet::from(&settings.markers));
    let depth = args.depth.unwrap_or(settings.context.depth);
    let report = scanner.scan_report(&buffer, args.line.unwrap_or(-1), depth);
    info!(
        lines_visited = report.lines_visited,
        stop = ?report.stop,
        "scanned {}",
        args.file.display()
    );
    Ok(report.transcript)
}

pub(crate) async fn cmd_reply<T: Transport + ?Sized>(
    args: ReplyArgs,
    settings: &SmartMarkConfig,
    transport: &T,
) -> Result<String, CliError> {
    let buffer = open_document(&args.file, args.line).await?;
    let prompt_line = buffer.cursor_line().unwrap_or_else(|| buffer.last_line());
    let handle = DocumentHandle::new(buffer);

    let mut session = ReplySession::new(handle.clone(), settings);
    let transcript = session
        .transcript(None)
        .map_err(|e| CliError::DocumentError(e.to_string()))?;
    if transcript.is_empty() {
        return Err(CliError::DocumentError(format!(
            "no dialogue found above line {}",
            prompt_line
        )));
    }

    let token = session.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = if args.no_stream || !settings.llm.stream {
        session
            .complete_reply(transport, &transcript, prompt_line)
            .await
    } else {
        session
            .stream_reply(transport, &transcript, prompt_line)
            .await
    };
    interrupt.abort();

    let report = result.map_err(|e| CliError::DocumentError(e.to_string()))?;
    let buffer = handle.lock().clone();
    save_document(&args.file, &buffer)
        .await
        .map_err(|e| CliError::DocumentError(format!("{:#}", e)))?;

    format_report(&report)
}

pub(crate) fn format_report(report: &ReplyReport) -> Result<String, CliError> {
    match &report.outcome {
        ReplyOutcome::Completed => Ok(format!(
            "reply written ({} chunks, {} bytes)",
            report.chunks, report.bytes_written
        )),
        ReplyOutcome::Cancelled => Ok(format!(
            "reply interrupted ({} bytes kept)",
            report.bytes_written
        )),
        ReplyOutcome::Failed(message) => {
            warn!("reply failed after {} chunks", report.chunks);
            Err(CliError::ReplyFailed(message.clone()))
        }
    }
}

pub(crate) fn format_transcript(
    transcript: &Transcript,
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(transcript)
            .map_err(|e| CliError::DocumentError(e.to_string())),
        OutputFormat::Pretty => Ok(transcript
            .iter()
            .map(|turn| format!("[{}]\n{}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n\n")),
    }
}

pub(crate) fn format_classification(buffer: &TextBuffer, markers: &MarkerSet) -> String {
    buffer
        .lines()
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let classified = markers.classify(line);
            format!("{:>4}  {:<18} {}", index, classified.kind(), line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
