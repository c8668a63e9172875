use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{collections::HashSet, fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::decode::MIN_PAYLOAD_BYTES;
use crate::detector::ChangeDetector;
use crate::render::PixelFormat;
use crate::retry::RetryPolicy;
use crate::server::artwork_route_problem;
use crate::transport::TransportSettings;

pub const DEFAULT_METADATA_URL: &str = "http://sonos-display.local:8000/metadata.json";
pub const DEFAULT_ARTWORK_URL: &str = "http://sonos-display.local:8000/Adafruit/artwork_bar.bmp";

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration, every leaf optional so files and flags layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub log_file: Option<PathBuf>,
    pub sync: Option<SyncConfig>,
    pub render: Option<RenderConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub metadata_url: Option<String>,
    pub artwork_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub force_refresh_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub socket_penalty_secs: Option<u64>,
    pub slow_response_secs: Option<u64>,
    pub pool_settle_secs: Option<u64>,
    pub min_payload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RenderConfig {
    pub sink: Option<SinkKind>,
    pub device: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_format: Option<PixelFormat>,
    pub stride: Option<u32>,      // bytes per line, packed when absent
    pub file_path: Option<PathBuf>,
    pub status_pattern: Option<bool>,
    pub pattern_square: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub root: Option<PathBuf>,
    pub metadata_file: Option<PathBuf>,
    pub artwork: Option<Vec<String>>,
    pub max_concurrent: Option<usize>,
    pub backlog: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Framebuffer,
    File,
}

impl std::str::FromStr for SinkKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "framebuffer" | "fb" => Ok(SinkKind::Framebuffer),
            "file" => Ok(SinkKind::File),
            other => Err(format!("unknown sink '{}' (framebuffer|file)", other)),
        }
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "artsync", version, about = "Now playing artwork sync")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// shorthand for --log-level debug
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::Url)]
    pub metadata_url: Option<String>,
    #[arg(long, value_hint = ValueHint::Url)]
    pub artwork_url: Option<String>,
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    #[arg(long)]
    pub sink: Option<SinkKind>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub device: Option<PathBuf>,
    /// frame file for the file sink
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<String>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub root: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Layer defaults, YAML and `cli`, then validate.
pub fn load_with(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = cli.config.as_ref() {
        if !p.exists() {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
        merge(&mut cfg, read_yaml(p)?);
    } else if let Some(p) = find_config_file() {
        merge(&mut cfg, read_yaml(&p)?);
    }

    apply_cli_overrides(&mut cfg, cli);
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/artsync/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/artsync/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/artsync.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["artsync.yaml", "config.yaml", "config/artsync.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_yaml(&s)
}

pub fn parse_yaml(s: &str) -> Result<Config, ConfigError> {
    // an empty file is a valid, empty config
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(s)?)
}

macro_rules! take {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        {
            $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
        }
    };
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    if src.log_file.is_some()  { dst.log_file = src.log_file; }

    match (&mut dst.sync, src.sync) {
        (None, Some(s)) => dst.sync = Some(s),
        (Some(d), Some(s)) => take!(d, s,
            metadata_url, artwork_url, poll_interval_secs, force_refresh_secs,
            http_timeout_secs, download_timeout_secs, max_retries, retry_delay_secs,
            socket_penalty_secs, slow_response_secs, pool_settle_secs, min_payload_bytes),
        _ => {}
    }
    match (&mut dst.render, src.render) {
        (None, Some(r)) => dst.render = Some(r),
        (Some(d), Some(s)) => take!(d, s,
            sink, device, width, height, pixel_format, stride, file_path,
            status_pattern, pattern_square),
        _ => {}
    }
    match (&mut dst.server, src.server) {
        (None, Some(s)) => dst.server = Some(s),
        (Some(d), Some(s)) => take!(d, s,
            bind, root, metadata_file, artwork, max_concurrent, backlog,
            request_timeout_secs, chunk_size),
        _ => {}
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.debug               { cfg.log_level = Some("debug".into()); }
    if cli.log_file.is_some()  { cfg.log_file = cli.log_file.clone(); }

    if cli.metadata_url.is_some() || cli.artwork_url.is_some() || cli.poll_interval_secs.is_some() {
        let sync = cfg.sync.get_or_insert_with(SyncConfig::default);
        if cli.metadata_url.is_some()       { sync.metadata_url = cli.metadata_url.clone(); }
        if cli.artwork_url.is_some()        { sync.artwork_url = cli.artwork_url.clone(); }
        if cli.poll_interval_secs.is_some() { sync.poll_interval_secs = cli.poll_interval_secs; }
    }
    if cli.sink.is_some() || cli.device.is_some() || cli.output.is_some() {
        let render = cfg.render.get_or_insert_with(RenderConfig::default);
        if cli.sink.is_some()   { render.sink = cli.sink; }
        if cli.device.is_some() { render.device = cli.device.clone(); }
        if cli.output.is_some() { render.file_path = cli.output.clone(); }
    }
    if cli.bind.is_some() || cli.root.is_some() {
        let server = cfg.server.get_or_insert_with(ServerConfig::default);
        if cli.bind.is_some() { server.bind = cli.bind.clone(); }
        if cli.root.is_some() { server.root = cli.root.clone(); }
    }
}

fn check_url(name: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("sync {} must be an http(s) URL, got '{}'", name, url)))
    }
}

fn check_positive(section: &str, name: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Validation(format!("{} {} must be > 0", section, name))),
        _ => Ok(()),
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let sync = cfg.sync_settings();
    check_url("metadata_url", &sync.metadata_url)?;
    check_url("artwork_url", &sync.artwork_url)?;
    if let Some(s) = cfg.sync.as_ref() {
        check_positive("sync", "poll_interval_secs", s.poll_interval_secs)?;
        check_positive("sync", "force_refresh_secs", s.force_refresh_secs)?;
        check_positive("sync", "http_timeout_secs", s.http_timeout_secs)?;
        check_positive("sync", "download_timeout_secs", s.download_timeout_secs)?;
        check_positive("sync", "max_retries", s.max_retries.map(u64::from))?;
        check_positive("sync", "slow_response_secs", s.slow_response_secs)?;
    }
    if sync.download_timeout < sync.http_timeout {
        return Err(ConfigError::Validation(
            "sync download_timeout_secs must be >= http_timeout_secs".into(),
        ));
    }

    if let Some(r) = cfg.render.as_ref() {
        check_positive("render", "width", r.width.map(u64::from))?;
        check_positive("render", "height", r.height.map(u64::from))?;
        check_positive("render", "pattern_square", r.pattern_square.map(u64::from))?;
    }
    let render = cfg.render_settings();
    if let Some(stride) = render.stride {
        let packed = render.width as u64 * render.pixel_format.bytes_per_pixel() as u64;
        if (stride as u64) < packed {
            return Err(ConfigError::Validation(format!(
                "render stride {} is shorter than a packed line ({} bytes)", stride, packed
            )));
        }
    }

    if let Some(s) = cfg.server.as_ref() {
        check_positive("server", "max_concurrent", s.max_concurrent.map(|v| v as u64))?;
        check_positive("server", "backlog", s.backlog.map(u64::from))?;
        check_positive("server", "request_timeout_secs", s.request_timeout_secs)?;
        check_positive("server", "chunk_size", s.chunk_size.map(|v| v as u64))?;
        if let Some(bind) = s.bind.as_ref() {
            bind.parse::<std::net::SocketAddr>().map_err(|e| {
                ConfigError::Validation(format!("server bind '{}' is not host:port ({})", bind, e))
            })?;
        }
        if let Some(artwork) = s.artwork.as_ref() {
            let mut taken = HashSet::new();
            for rel in artwork {
                if let Some(problem) = artwork_route_problem(rel, &taken) {
                    return Err(ConfigError::Validation(format!("server artwork '{}' {}", rel, problem)));
                }
                taken.insert(rel.trim_start_matches('/').to_string());
            }
        }
    }
    Ok(())
}

/// Fully resolved sync client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub metadata_url: String,
    pub artwork_url: String,
    pub poll_interval: Duration,
    pub force_refresh: Duration,
    pub http_timeout: Duration,
    pub download_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub socket_penalty: Duration,
    pub slow_response: Duration,
    pub pool_settle: Duration,
    pub min_payload_bytes: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            artwork_url: DEFAULT_ARTWORK_URL.to_string(),
            poll_interval: Duration::from_secs(2),
            force_refresh: Duration::from_secs(300),
            http_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(180),
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
            socket_penalty: Duration::from_secs(2),
            slow_response: Duration::from_secs(15),
            pool_settle: Duration::from_secs(2),
            min_payload_bytes: MIN_PAYLOAD_BYTES,
        }
    }
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: self.retry_delay,
            socket_penalty: self.socket_penalty,
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            slow_response_threshold: self.slow_response,
            pool_settle: self.pool_settle,
            ..TransportSettings::default()
        }
    }

    pub fn detector(&self) -> ChangeDetector {
        ChangeDetector::new(self.force_refresh)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub sink: SinkKind,
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub stride: Option<u32>,
    pub file_path: PathBuf,
    pub status_pattern: bool,
    pub pattern_square: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            sink: SinkKind::Framebuffer,
            device: PathBuf::from("/dev/fb0"),
            width: 320,
            height: 960,
            pixel_format: PixelFormat::default(),
            stride: None,
            file_path: PathBuf::from("artsync-frame.png"),
            status_pattern: true,
            pattern_square: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind: String,
    pub root: PathBuf,
    pub metadata_file: PathBuf,
    pub artwork: Vec<String>,
    pub max_concurrent: usize,
    pub backlog: u32,
    pub request_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind: "0.0.0.0:8000".to_string(),
            root: PathBuf::from("."),
            metadata_file: PathBuf::from("Adafruit/current_metadata.json"),
            artwork: vec!["Adafruit/artwork_bar.bmp".to_string(), "Adafruit/artwork.bmp".to_string()],
            max_concurrent: 8,
            backlog: 10,
            request_timeout: Duration::from_secs(30),
            chunk_size: 4096,
        }
    }
}

fn secs(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(fallback)
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn sync_settings(&self) -> SyncSettings {
        let d = SyncSettings::default();
        let Some(s) = self.sync.as_ref() else { return d };
        SyncSettings {
            metadata_url: s.metadata_url.clone().unwrap_or(d.metadata_url),
            artwork_url: s.artwork_url.clone().unwrap_or(d.artwork_url),
            poll_interval: secs(s.poll_interval_secs, d.poll_interval),
            force_refresh: secs(s.force_refresh_secs, d.force_refresh),
            http_timeout: secs(s.http_timeout_secs, d.http_timeout),
            download_timeout: secs(s.download_timeout_secs, d.download_timeout),
            max_retries: s.max_retries.unwrap_or(d.max_retries),
            retry_delay: secs(s.retry_delay_secs, d.retry_delay),
            socket_penalty: secs(s.socket_penalty_secs, d.socket_penalty),
            slow_response: secs(s.slow_response_secs, d.slow_response),
            pool_settle: secs(s.pool_settle_secs, d.pool_settle),
            min_payload_bytes: s.min_payload_bytes.unwrap_or(d.min_payload_bytes),
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let d = RenderSettings::default();
        let Some(r) = self.render.as_ref() else { return d };
        RenderSettings {
            sink: r.sink.unwrap_or(d.sink),
            device: r.device.clone().unwrap_or(d.device),
            width: r.width.unwrap_or(d.width),
            height: r.height.unwrap_or(d.height),
            pixel_format: r.pixel_format.unwrap_or(d.pixel_format),
            stride: r.stride.or(d.stride),
            file_path: r.file_path.clone().unwrap_or(d.file_path),
            status_pattern: r.status_pattern.unwrap_or(d.status_pattern),
            pattern_square: r.pattern_square.unwrap_or(d.pattern_square),
        }
    }

    pub fn server_settings(&self) -> ServerSettings {
        let d = ServerSettings::default();
        let Some(s) = self.server.as_ref() else { return d };
        ServerSettings {
            bind: s.bind.clone().unwrap_or(d.bind),
            root: s.root.clone().unwrap_or(d.root),
            metadata_file: s.metadata_file.clone().unwrap_or(d.metadata_file),
            artwork: s.artwork.clone().unwrap_or(d.artwork),
            max_concurrent: s.max_concurrent.unwrap_or(d.max_concurrent),
            backlog: s.backlog.unwrap_or(d.backlog),
            request_timeout: secs(s.request_timeout_secs, d.request_timeout),
            chunk_size: s.chunk_size.unwrap_or(d.chunk_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(path: &Path) -> Cli {
        Cli { config: Some(path.to_path_buf()), ..Cli::default() }
    }

    #[test]
    fn test_defaults_resolve() {
        let cfg = Config::default();
        let sync = cfg.sync_settings();
        assert_eq!(sync.metadata_url, DEFAULT_METADATA_URL);
        assert_eq!(sync.download_timeout, Duration::from_secs(180));
        assert_eq!(sync.retry_policy().max_attempts, 3);
        assert_eq!(cfg.render_settings().width, 320);
        assert_eq!(cfg.server_settings().artwork.len(), 2);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_yaml_then_cli_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artsync.yaml");
        fs::write(&path, r#"
log_level: warn
sync:
  metadata_url: http://10.0.0.2:8000/metadata.json
  poll_interval_secs: 5
render:
  sink: file
  width: 240
  pixel_format: xrgb8888
"#).unwrap();

        let mut cli = cli_with(&path);
        cli.debug = true;
        cli.poll_interval_secs = Some(7);
        cli.output = Some(PathBuf::from("/tmp/out.png"));

        let cfg = load_with(&cli).unwrap();
        assert_eq!(cfg.log_level(), "debug");
        let sync = cfg.sync_settings();
        assert_eq!(sync.metadata_url, "http://10.0.0.2:8000/metadata.json");
        assert_eq!(sync.poll_interval, Duration::from_secs(7));
        assert_eq!(sync.artwork_url, DEFAULT_ARTWORK_URL);
        let render = cfg.render_settings();
        assert_eq!(render.sink, SinkKind::File);
        assert_eq!(render.width, 240);
        assert_eq!(render.height, 960);
        assert_eq!(render.pixel_format, PixelFormat::Xrgb8888);
        assert_eq!(render.file_path, PathBuf::from("/tmp/out.png"));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut dst = parse_yaml("sync:\n  max_retries: 5\n  retry_delay_secs: 1\n").unwrap();
        let src = parse_yaml("sync:\n  max_retries: 2\n").unwrap();
        merge(&mut dst, src);
        let sync = dst.sync_settings();
        assert_eq!(sync.max_retries, 2);
        assert_eq!(sync.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let cli = cli_with(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(load_with(&cli), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            "sync:\n  metadata_url: ftp://host/metadata.json\n",
            "sync:\n  poll_interval_secs: 0\n",
            "sync:\n  http_timeout_secs: 60\n  download_timeout_secs: 30\n",
            "render:\n  width: 0\n",
            "render:\n  width: 320\n  stride: 100\n",
            "server:\n  bind: not-an-address\n",
            "server:\n  chunk_size: 0\n",
            "server:\n  artwork: [Adafruit/artwork.bmp, /Adafruit/artwork.bmp]\n",
            "server:\n  artwork: [status]\n",
            "server:\n  artwork: [metadata.json]\n",
        ];
        for yaml in bad.iter() {
            let cfg = parse_yaml(yaml).unwrap();
            assert!(validate(&cfg).is_err(), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_distinct_artwork_paths_accepted() {
        let cfg = parse_yaml("server:\n  artwork: [Adafruit/artwork_bar.bmp, Adafruit/artwork.bmp, status.bmp]\n").unwrap();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_unknown_sink_fails_to_parse() {
        assert!(parse_yaml("render:\n  sink: hdmi\n").is_err());
        assert_eq!("FB".parse::<SinkKind>(), Ok(SinkKind::Framebuffer));
    }

    #[test]
    fn test_empty_file_is_default() {
        let cfg = parse_yaml("  \n").unwrap();
        assert!(cfg.sync.is_none());
    }
}
