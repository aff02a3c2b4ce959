//! Command-line interface implementation

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::SpriteConfig;
use crate::models::{Document, OutputFile};
use crate::packer::Algorithm;
use crate::pipeline::SpritePipeline;

/// Exit codes
const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;

/// cssprite - scan stylesheets, pack referenced images, rewrite declarations
#[derive(Parser)]
#[command(name = "cssprite")]
#[command(about = "Scan stylesheets for background images, pack them into sprite sheets and rewrite the declarations")]
#[command(version)]
pub struct Cli {
    /// Input stylesheet files or glob patterns
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// TOML configuration file; command-line flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base name for generated sprite sheets (required here or in the config)
    #[arg(long)]
    pub sprite_sheet_name: Option<String>,

    /// Name for rewritten stylesheets; defaults to each source file name
    #[arg(long)]
    pub style_sheet_name: Option<String>,

    /// Url prefix written in front of sheet paths in rewritten declarations
    #[arg(long)]
    pub sprite_sheet_path: Option<String>,

    /// Base path for root-relative urls
    #[arg(long)]
    pub base_url: Option<PathBuf>,

    /// Packing algorithm
    #[arg(long, value_enum)]
    pub algorithm: Option<Algorithm>,

    /// Packer engine selector
    #[arg(long)]
    pub engine: Option<String>,

    /// Padding between packed images in pixels
    #[arg(long)]
    pub padding: Option<u32>,

    /// Disable retina grouping and scaling
    #[arg(long)]
    pub no_retina: bool,

    /// Buffer all stylesheets and share one sprite set across them
    #[arg(long)]
    pub accumulate: bool,

    /// Output directory for sheets and rewritten stylesheets
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Log every skipped image
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let inputs = match expand_inputs(&cli.inputs) {
        Ok(inputs) => inputs,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: cannot start runtime: {}", err);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    runtime.block_on(generate(config, inputs, &cli.out))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "cssprite=debug" } else { "cssprite=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .init();
}

/// Load the TOML config (if any) and merge command-line overrides on top.
fn build_config(cli: &Cli) -> Result<SpriteConfig, crate::config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SpriteConfig::load(path)?,
        None => SpriteConfig::default(),
    };

    if let Some(name) = &cli.sprite_sheet_name {
        config.sprite_sheet_name = Some(name.clone());
    }
    if let Some(name) = &cli.style_sheet_name {
        config.style_sheet_name = Some(name.clone());
    }
    if let Some(prefix) = &cli.sprite_sheet_path {
        config.sprite_sheet_path = Some(prefix.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(algorithm) = cli.algorithm {
        config.algorithm = algorithm;
    }
    if let Some(engine) = &cli.engine {
        config.engine = Some(engine.clone());
    }
    if let Some(padding) = cli.padding {
        config.padding = padding;
    }
    if cli.no_retina {
        config.retina = false;
    }
    if cli.accumulate {
        config.accumulate = true;
    }
    if cli.verbose {
        config.verbose = true;
    }
    Ok(config)
}

/// Expand literal paths and glob patterns into a concrete input list.
fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>, String> {
    let mut inputs = Vec::new();
    for pattern in patterns {
        let literal = Path::new(pattern);
        if literal.is_file() {
            inputs.push(literal.to_path_buf());
            continue;
        }
        let matches =
            glob::glob(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
        let mut matched = false;
        for entry in matches {
            let path = entry.map_err(|e| format!("cannot read '{}': {}", pattern, e))?;
            if path.is_file() {
                inputs.push(path);
                matched = true;
            }
        }
        if !matched {
            return Err(format!("no stylesheets match '{}'", pattern));
        }
    }
    if inputs.is_empty() {
        return Err("no input stylesheets".to_string());
    }
    Ok(inputs)
}

async fn generate(config: SpriteConfig, inputs: Vec<PathBuf>, out: &Path) -> ExitCode {
    let (mut pipeline, mut outputs) = match SpritePipeline::builder(config).build() {
        Ok(built) => built,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let mut failed = false;
    for path in inputs {
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) => {
                eprintln!("Error: cannot read '{}': {}", path.display(), err);
                failed = true;
                continue;
            }
        };
        if let Err(err) = pipeline.process(Document::buffered(path.clone(), contents)).await {
            eprintln!("Error: '{}': {}", path.display(), err);
            failed = true;
        }
    }

    if let Err(err) = pipeline.finalize().await {
        eprintln!("Error: {}", err);
        return ExitCode::from(EXIT_ERROR);
    }

    while let Some(file) = outputs.sheets.recv().await {
        if let Err(err) = write_output(out, &file) {
            eprintln!("Error: {}", err);
            failed = true;
        }
    }
    while let Some(file) = outputs.stylesheets.recv().await {
        if let Err(err) = write_output(out, &file) {
            eprintln!("Error: {}", err);
            failed = true;
        }
    }

    if failed {
        ExitCode::from(EXIT_ERROR)
    } else {
        ExitCode::from(EXIT_SUCCESS)
    }
}

/// Write one output file under the output directory, creating parents.
fn write_output(out: &Path, file: &OutputFile) -> Result<(), String> {
    let target = out.join(&file.path);
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create '{}': {}", parent.display(), e))?;
        }
    }
    std::fs::write(&target, &file.contents)
        .map_err(|e| format!("cannot write '{}': {}", target.display(), e))
}
