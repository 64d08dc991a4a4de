//! TOML process configuration for a labman binary.
//!
//! Mirrors the teacher's own config-data crate: plain `serde` structs with
//! `deny_unknown_fields`, shell-expansion and directory-relative fixup for
//! any path field, and a dedicated error type distinguishing I/O from TOML
//! deserialization failure.

mod error;

pub use error::{ConfigError, Result};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_delay_hours() -> f64 {
    24.0
}

fn default_queue_capacity() -> usize {
    64
}

fn default_fps() -> f64 {
    30.0
}

/// Where and how the session's SQL store is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the session database file. If unset, an in-memory store is
    /// used (suitable for tests and dry runs, not for persisted sessions).
    /// Can contain shell variables such as `~`, `$A`, or `${B}`.
    pub path: Option<PathBuf>,
    /// Copy the database into an in-memory shadow on open and only flush
    /// writes back to disk on an explicit flush or at close.
    #[serde(default)]
    pub delay_save: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            delay_save: false,
        }
    }
}

/// The observation HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Address to bind the observation HTTP surface to.
    pub bind_addr: std::net::SocketAddr,
    /// Directory of static assets served under `/static`. Can contain
    /// shell variables.
    pub static_dir: Option<PathBuf>,
}

/// Periodic email reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    #[serde(default = "default_true")]
    pub use_starttls: bool,
    /// Submit over an implicit-TLS connection (SMTPS) instead of
    /// plaintext-then-STARTTLS. Takes precedence over `use_starttls`.
    #[serde(default)]
    pub use_ssl_submission: bool,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub subject: Option<String>,
    #[serde(default = "default_delay_hours")]
    pub delay_hours: f64,
    pub initial_delay_hours: Option<f64>,
}

/// On-disk image format for an image-files sink, as named in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatConfig {
    Bmp,
    Png,
    Tiff,
    Jpg,
}

/// Which sink a camera's frames should be routed to, as named in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    ImageFiles { format: ImageFormatConfig },
    Ffmpeg,
    InRam { max_frames: usize },
    LivePreview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    pub name: String,
    pub sink: SinkConfig,
}

/// Video-acquisition pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base directory under which dated run directories are allocated.
    /// Can contain shell variables.
    pub output_dir: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

/// Top-level process configuration, as loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub email: Option<EmailConfig>,
    pub video: Option<VideoConfig>,
}

impl SessionConfig {
    /// Load and parse a TOML config file, expanding shell variables in
    /// every path field and resolving relative paths against the config
    /// file's own directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: SessionConfig = toml::from_str(&text)?;

        let dirname = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(store_path) = &mut config.store.path {
            fixup_relative_path(store_path, &dirname)?;
        }
        if let Some(static_dir) = &mut config.http.static_dir {
            fixup_relative_path(static_dir, &dirname)?;
        }
        if let Some(video) = &mut config.video {
            fixup_relative_path(&mut video.output_dir, &dirname)?;
        }

        Ok(config)
    }
}

/// If `path` is relative after shell-expansion, make it relative to
/// `dirname`. `path` must be UTF-8 encoded and can start with a tilde.
fn fixup_relative_path(path: &mut PathBuf, dirname: &Path) -> Result<()> {
    let pathstr = path.to_str().expect("config paths must be utf-8");
    let expanded = shellexpand::full(pathstr)?;
    *path = PathBuf::from(expanded.to_string());

    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}
