//! Configuration loading and management

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use mirror_core::{CloneMode, CloneOptions, MirrorSettings, TaskScanOptions, TocOptions};
use serde::{Deserialize, Serialize};

/// Main configuration for drive-mirror
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote store connection and the folders to work on
    #[serde(default)]
    pub drive: DriveConfig,

    /// Template cloning
    #[serde(default)]
    pub clone: CloneConfig,

    /// External executor for large templates
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Table of contents
    #[serde(default)]
    pub toc: TocConfig,

    /// Task scanning
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_upload_base")]
    pub upload_base: String,

    /// Folder holding one folder per project
    #[serde(default)]
    pub root_folder_id: String,

    /// Master template folder
    #[serde(default)]
    pub template_folder_id: String,

    /// OAuth access token. Prefer the environment variable for real deployments.
    pub access_token: Option<String>,

    /// Environment variable that overrides `access_token` when set
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Upper bound for a single Drive request; 0 disables it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            root_folder_id: String::new(),
            template_folder_id: String::new(),
            access_token: None,
            access_token_env: default_access_token_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_upload_base() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}

fn default_access_token_env() -> String {
    "DRIVE_ACCESS_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Concurrent file copies per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,

    #[serde(default)]
    pub concurrent_branches: bool,

    #[serde(default)]
    pub mode: CloneMode,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause(),
            concurrent_branches: false,
            mode: CloneMode::default(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Executor endpoint. Dispatched cloning needs this.
    pub url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// Label used when a clone is started without a project name
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_webhook_timeout(),
            label: default_label(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_label() -> String {
    "New Project".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocConfig {
    #[serde(default = "default_toc_filename")]
    pub filename: String,

    #[serde(default = "default_toc_heading")]
    pub heading: String,

    #[serde(default = "default_toc_depth")]
    pub max_depth: usize,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            filename: default_toc_filename(),
            heading: default_toc_heading(),
            max_depth: default_toc_depth(),
        }
    }
}

fn default_toc_filename() -> String {
    "DAFTAR ISI.md".to_string()
}

fn default_toc_heading() -> String {
    "DAFTAR ISI".to_string()
}

fn default_toc_depth() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_task_depth")]
    pub task_max_depth: usize,

    /// Top-level folder whose uncoded children get `0.N` codes
    #[serde(default = "default_uncoded_folder")]
    pub uncoded_folder: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            task_max_depth: default_task_depth(),
            uncoded_folder: default_uncoded_folder(),
        }
    }
}

fn default_task_depth() -> usize {
    8
}

fn default_uncoded_folder() -> String {
    "Element 0".to_string()
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_file = config_path.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {:?}", config_path))?;

            // Written for reference; the token stays out of it
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    /// Access token from the environment, falling back to the config file.
    pub fn access_token(&self) -> Option<String> {
        std::env::var(&self.drive.access_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.drive.access_token.clone())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.drive.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook.timeout_secs)
    }

    /// Settings for `MirrorService`.
    pub fn settings(&self) -> MirrorSettings {
        MirrorSettings {
            drive_root_id: self.drive.root_folder_id.clone(),
            template_root_id: self.drive.template_folder_id.clone(),
            clone_mode: self.clone.mode,
            clone: CloneOptions {
                batch_size: self.clone.batch_size,
                batch_pause: Duration::from_millis(self.clone.batch_pause_ms),
                concurrent_branches: self.clone.concurrent_branches,
            },
            toc: TocOptions {
                filename: self.toc.filename.clone(),
                heading: self.toc.heading.clone(),
                max_depth: self.toc.max_depth,
            },
            scan: TaskScanOptions {
                max_depth: self.scan.task_max_depth,
                uncoded_folder: self.scan.uncoded_folder.clone(),
            },
            clone_label: self.webhook.label.clone(),
        }
    }
}
