use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

// =============================================================================
// Network constants
// =============================================================================

/// User agent sent with every HTTP request
pub const USER_AGENT: &str = concat!("infinity-updater/", env!("CARGO_PKG_VERSION"));

/// Timeout for release metadata requests in milliseconds (15 seconds)
pub const DEFAULT_METADATA_TIMEOUT_MS: u64 = 15_000;

/// Timeout for downloading the tool binary in milliseconds (60 seconds)
pub const DEFAULT_TOOL_DOWNLOAD_TIMEOUT_MS: u64 = 60_000;

/// Timeout for downloading a new host build in milliseconds (120 seconds)
pub const DEFAULT_APP_DOWNLOAD_TIMEOUT_MS: u64 = 120_000;

/// Timeout for downloading the ffmpeg bundle in milliseconds (180 seconds)
pub const DEFAULT_FFMPEG_DOWNLOAD_TIMEOUT_MS: u64 = 180_000;

// =============================================================================
// Process constants
// =============================================================================

/// Timeout for `<tool> --version` in milliseconds (15 seconds)
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 15_000;

/// Flag that makes the tool print its version
pub const VERSION_FLAG: &str = "--version";

/// Marker argument passed to the relaunched executable after a self-update
pub const POST_UPDATE_ARG: &str = "--post-update";

/// Seconds the relaunch helper waits for this process to exit
pub const RELAUNCH_WAIT_SECS: u64 = 3;

// =============================================================================
// Artifact constants
// =============================================================================

/// Smallest tool download accepted as a real binary (bytes)
pub const MIN_COMPONENT_SIZE: u64 = 1_000;

/// Smallest raw host executable accepted as a real binary (bytes)
pub const MIN_APP_BINARY_SIZE: u64 = 10_000;

/// Temporary file the new host build is downloaded to
pub const APP_DOWNLOAD_TEMP: &str = "_update_download.tmp";

/// Scratch directory a host archive is extracted into
pub const APP_EXTRACT_DIR: &str = "_update_extract";

/// Directory inside the install that a direct update is copied into before
/// any file is replaced
pub const APP_STAGING_DIR: &str = "_update_staging";

/// Directory next to the executable holding the wrapped binaries
pub const ENGINE_DIR_NAME: &str = "engine";

pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub const CONFIG_FILE_NAME: &str = "updater.json";

// =============================================================================
// Default endpoints
// =============================================================================

pub const DEFAULT_TOOL_REPO: &str = "yt-dlp/yt-dlp";

pub const DEFAULT_TOOL_BINARY: &str = "yt-dlp";

pub const DEFAULT_APP_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/ThanathonTH/Weera_Program/main/version.json";

/// Name of the tool's release asset for the current platform
pub fn default_tool_asset() -> &'static str {
    if cfg!(windows) {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp_linux"
    }
}

/// ffmpeg archive for the current platform, if one is published as a zip
pub fn default_ffmpeg_bundle() -> Option<&'static str> {
    if cfg!(windows) {
        Some("https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip")
    } else if cfg!(target_os = "macos") {
        Some("https://evermeet.cx/ffmpeg/getrelease/zip")
    } else {
        None
    }
}

/// Updater configuration structure, read from `updater.json`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdaterConfig {
    /// Version of the running host build
    pub app_version: String,
    /// URL of the host application's version manifest (empty disables the check)
    pub app_manifest_url: String,
    pub self_update: SelfUpdateConfig,
    pub relaunch: RelaunchStrategy,
    pub tool: ToolConfig,
    pub ffmpeg: FfmpegConfig,
    pub http: HttpConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            app_manifest_url: DEFAULT_APP_MANIFEST_URL.to_string(),
            self_update: SelfUpdateConfig::default(),
            relaunch: RelaunchStrategy::default(),
            tool: ToolConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Load the configuration file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Failed to read {:?}: {}; using defaults", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => {
                info!("Loaded updater configuration from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Invalid updater configuration {:?}: {}; using defaults", path, e);
                Self::default()
            }
        }
    }

    /// The manifest URL, if the host-app check is configured at all
    pub fn manifest_url(&self) -> Option<&str> {
        let url = self.app_manifest_url.trim();
        (!url.is_empty()).then_some(url)
    }
}

/// Host-app self-update settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelfUpdateConfig {
    pub enabled: bool,
}

impl Default for SelfUpdateConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// How the running executable gets replaced
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelaunchStrategy {
    /// Script on Windows, direct rename elsewhere
    #[default]
    Auto,
    /// Always use a detached helper script
    Script,
    /// Replace the file in place and spawn the new build
    Rename,
}

/// Wrapped tool settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolConfig {
    /// GitHub repository publishing the tool
    pub repo: String,
    /// Release asset to download
    pub asset_name: String,
    /// Installed file name, without platform suffix
    pub binary_name: String,
    /// Used when the release API is unavailable and the tool must be
    /// installed. Empty means the latest release's `asset_name` of `repo`.
    pub fallback_url: String,
    pub min_size: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let asset_name = default_tool_asset();
        Self {
            repo: DEFAULT_TOOL_REPO.to_string(),
            asset_name: asset_name.to_string(),
            binary_name: DEFAULT_TOOL_BINARY.to_string(),
            fallback_url: String::new(),
            min_size: MIN_COMPONENT_SIZE,
        }
    }
}

/// ffmpeg bundle settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FfmpegConfig {
    /// Zip archive containing ffmpeg and ffprobe
    pub bundle_url: Option<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            bundle_url: default_ffmpeg_bundle().map(str::to_string),
        }
    }
}

/// Timeouts for network operations, in milliseconds
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpConfig {
    pub metadata_timeout_ms: u64,
    pub tool_download_timeout_ms: u64,
    pub app_download_timeout_ms: u64,
    pub ffmpeg_download_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: DEFAULT_METADATA_TIMEOUT_MS,
            tool_download_timeout_ms: DEFAULT_TOOL_DOWNLOAD_TIMEOUT_MS,
            app_download_timeout_ms: DEFAULT_APP_DOWNLOAD_TIMEOUT_MS,
            ffmpeg_download_timeout_ms: DEFAULT_FFMPEG_DOWNLOAD_TIMEOUT_MS,
        }
    }
}

/// Filesystem layout of an installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// The running (or to-be-replaced) host executable
    pub app_path: PathBuf,
    /// Directory containing the host executable
    pub base_dir: PathBuf,
    pub engine_dir: PathBuf,
    pub settings_file: PathBuf,
    pub config_file: PathBuf,
}

impl AppPaths {
    /// Layout rooted at the directory of `app_path`
    pub fn from_executable(app_path: &Path) -> Self {
        let base_dir = app_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            app_path: app_path.to_path_buf(),
            engine_dir: base_dir.join(ENGINE_DIR_NAME),
            settings_file: base_dir.join(SETTINGS_FILE_NAME),
            config_file: base_dir.join(CONFIG_FILE_NAME),
            base_dir,
        }
    }

    /// Layout of the currently running executable
    pub fn discover() -> std::io::Result<Self> {
        Ok(Self::from_executable(&std::env::current_exe()?))
    }

    pub fn tool_path(&self, tool: &ToolConfig) -> PathBuf {
        self.engine_dir
            .join(format!("{}{}", tool.binary_name, std::env::consts::EXE_SUFFIX))
    }

    pub fn ffmpeg_path(&self) -> PathBuf {
        self.engine_dir
            .join(format!("ffmpeg{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn ffprobe_path(&self) -> PathBuf {
        self.engine_dir
            .join(format!("ffprobe{}", std::env::consts::EXE_SUFFIX))
    }

    /// Whether the executable runs out of a cargo build directory.
    ///
    /// Replacing such a binary would clobber a developer's build output,
    /// so the host-app stage is skipped for it.
    pub fn is_development_build(&self) -> bool {
        let components: Vec<_> = self
            .app_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();

        components
            .windows(2)
            .any(|pair| pair[0] == "target" && (pair[1] == "debug" || pair[1] == "release"))
    }
}

/// Returns the path to the data directory for infinity-updater.
/// Uses $XDG_DATA_HOME/infinity-updater if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/infinity-updater,
/// or ./infinity-updater if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("infinity-updater.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("infinity-updater")
}
