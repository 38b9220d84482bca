use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI, config file, or defaults
///
/// Example configuration file content
/// # Video Convert Configuration
///
/// # Server configuration
/// listen_on_port = 3000
/// permits = 4
/// uploads_dir = "./uploads"
///
/// # Transcoder configuration
/// ffmpeg_bin = "ffmpeg"
///
/// # Public base URL for returned file links (optional)
/// public_url = "http://media.example.com"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Number of concurrent transcode subprocesses
    #[arg(short, long, default_value_t = default_permits())]
    #[serde(default = "default_permits")]
    pub permits: usize,

    /// Directory receiving uploads and converted outputs
    #[arg(short, long, default_value = "./uploads")]
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    /// Transcoder binary to invoke
    #[arg(short, long, default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Public base URL used to build returned file URLs
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Configuration file path (merged under CLI arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            permits: default_permits(),
            uploads_dir: default_uploads_dir(),
            ffmpeg_bin: default_ffmpeg_bin(),
            public_url: None,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.permits == default_permits() {
            self.permits = file_config.permits;
        }
        if self.uploads_dir == default_uploads_dir() {
            self.uploads_dir = file_config.uploads_dir;
        }
        if self.ffmpeg_bin == default_ffmpeg_bin() {
            self.ffmpeg_bin = file_config.ffmpeg_bin;
        }

        // For Option fields, CLI takes precedence if Some
        if self.public_url.is_none() {
            self.public_url = file_config.public_url;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.permits == 0 {
            return Err(anyhow::anyhow!(
                "permits must be at least 1, otherwise no conversion can ever run"
            ));
        }

        if self.ffmpeg_bin.is_empty() {
            return Err(anyhow::anyhow!("Transcoder binary cannot be empty"));
        }

        if self.uploads_dir.is_empty() {
            return Err(anyhow::anyhow!("Uploads directory cannot be empty"));
        }

        if let Some(public_url) = &self.public_url {
            if public_url.is_empty() {
                return Err(anyhow::anyhow!("Public URL cannot be empty"));
            }
            if !public_url.starts_with("http://") && !public_url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "Public URL must start with http:// or https://"
                ));
            }
        }

        Ok(())
    }

    /// Base URL that returned file links are rooted at
    pub fn public_base_url(&self) -> String {
        let base = match &self.public_url {
            Some(url) => url.clone(),
            None => format!("http://localhost:{}", self.listen_on_port),
        };
        base.trim_end_matches('/').to_string()
    }
}

// Default value functions
fn default_port() -> u16 {
    3000
}

fn default_permits() -> usize {
    let n = num_cpus::get();
    if n > 16 { 16 } else { n }
}

fn default_uploads_dir() -> String {
    "./uploads".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
