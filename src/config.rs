use crate::blur::DEFAULT_BLUR_THRESHOLD;
use crate::error::PipelineError;
use crate::ocr::TokenFilter;
use crate::region::{RegionLayout, RegionSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
    /// Upper bound for a single region's OCR call.
    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,
    #[serde(default)]
    pub filter: TokenFilter,
    /// Custom region table; the built-in one is used when absent.
    #[serde(default)]
    pub regions: Option<Vec<RegionSpec>>,
    /// When set, region crops are written here for layout calibration.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

fn default_blur_threshold() -> f64 {
    DEFAULT_BLUR_THRESHOLD
}

fn default_ocr_timeout_secs() -> u64 {
    30
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            blur_threshold: default_blur_threshold(),
            ocr_timeout_secs: default_ocr_timeout_secs(),
            filter: TokenFilter::default(),
            regions: None,
            debug_dir: None,
        }
    }
}

impl PipelineSection {
    pub fn layout(&self) -> Result<RegionLayout, PipelineError> {
        match &self.regions {
            Some(specs) => RegionLayout::new(specs.clone()),
            None => Ok(RegionLayout::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_network_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ocr_endpoint() -> String {
    "http://127.0.0.1:8868/predict/ocr_system".to_string()
}

fn default_network_timeout_secs() -> u64 {
    10
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
            timeout_secs: default_network_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Local Ollama server exposing the OpenAI-compatible API.
    Ollama,
    /// Any hosted OpenAI-compatible endpoint; key from `LLM_API_KEY`.
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_backend")]
    pub backend: LlmBackend,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Assembled OCR text longer than this is cut before prompting.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_ollama")]
    pub ollama: Endpoint,
    #[serde(default = "default_remote")]
    pub remote: Endpoint,
}

fn default_backend() -> LlmBackend {
    LlmBackend::Remote
}

fn default_max_tokens() -> u32 {
    3096
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_max_input_chars() -> usize {
    12_000
}

fn default_ollama() -> Endpoint {
    Endpoint {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3".to_string(),
    }
}

fn default_remote() -> Endpoint {
    Endpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

impl LlmSection {
    /// The endpoint of the selected backend.
    pub fn endpoint(&self) -> &Endpoint {
        match self.backend {
            LlmBackend::Ollama => &self.ollama,
            LlmBackend::Remote => &self.remote,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        let cfg: Config = toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        // fail at startup rather than on the first request
        cfg.pipeline.layout()?;
        Ok(cfg)
    }
}
