use clap::{Args, Parser, Subcommand};
use pq7_extract::blur::{self, DEFAULT_BLUR_THRESHOLD};
use pq7_extract::llm_extract::OpenAiCompatClient;
use pq7_extract::ocr::HttpOcrEngine;
use pq7_extract::{Config, Pq7Pipeline, source};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pq7-extract")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract shipping fields from PQ7 phytosanitary certificates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full extraction on one document and print the result as JSON
    Extract {
        /// TOML configuration; built-in defaults are used if the file is missing
        #[arg(long, env = "PQ7_CONFIG", default_value = "pq7.toml")]
        config: PathBuf,

        #[command(flatten)]
        input: Input,

        /// Print the result even when too few fields were recovered
        #[arg(long)]
        allow_incomplete: bool,
    },
    /// Print the Laplacian variance of an image and whether it counts as blurry
    Blur {
        file: PathBuf,

        #[arg(long, default_value_t = DEFAULT_BLUR_THRESHOLD)]
        threshold: f64,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Input {
    /// Local image or PDF
    #[arg(long)]
    file: Option<PathBuf>,

    /// http(s) URL of an image or PDF
    #[arg(long)]
    url: Option<String>,

    /// Base64 image payload, optionally as a data URI
    #[arg(long)]
    base64: Option<String>,
}

async fn load_input(input: &Input) -> Result<Vec<u8>, pq7_extract::PipelineError> {
    if let Some(path) = &input.file {
        source::read_file(path)
    } else if let Some(url) = &input.url {
        source::fetch_url(&reqwest::Client::new(), url).await
    } else if let Some(payload) = &input.base64 {
        source::decode_base64(payload)
    } else {
        Err(pq7_extract::PipelineError::Source("no input given".into()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing; stdout is reserved for the JSON result
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Extract {
            config,
            input,
            allow_incomplete,
        } => {
            let cfg = if config.exists() {
                Config::load(&config)?
            } else {
                warn!(path = %config.display(), "Config file not found, using defaults");
                Config::default()
            };

            let bytes = load_input(&input).await?;
            let image = source::decode_image(&bytes)?;
            info!(width = image.width(), height = image.height(), "Decoded document");

            let ocr = Arc::new(HttpOcrEngine::new(&cfg.ocr)?);
            let llm = Arc::new(OpenAiCompatClient::connect(&cfg.llm).await?);
            let pipeline = Pq7Pipeline::new(ocr, llm, &cfg)?;

            let result = pipeline.extract(&image).await?;
            if !allow_incomplete {
                result.ensure_usable()?;
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Blur { file, threshold } => {
            let image = source::decode_image(&source::read_file(&file)?)?;
            let report = blur::assess(&image, threshold);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
