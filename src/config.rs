use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::allocator::ResourceAllocator;
use crate::pipeline::PipelineConfig;

/// deskgate - headless desktop session gateway
///
/// Runs desktop applications headlessly, one isolated session per user, and
/// relays browser WebSocket connections to each session's VNC bridge.
#[derive(Parser, Debug, Clone)]
#[command(name = "deskgate", version, about, long_about = None)]
pub struct Config {
    /// Address for the internal control API (trusted network only; it
    /// grants raw process-spawning capability)
    #[arg(long, env = "DESKGATE_INTERNAL_BIND", default_value = "127.0.0.1:6090")]
    pub internal_bind: SocketAddr,

    /// Address for the public API and streaming gateway
    #[arg(long, env = "DESKGATE_PUBLIC_BIND", default_value = "0.0.0.0:3001")]
    pub public_bind: SocketAddr,

    /// Base URL of the control API the public tier talks to. Defaults to
    /// the local internal listener.
    #[arg(long, env = "DESKGATE_INTERNAL_URL")]
    pub internal_url: Option<String>,

    /// Root directory under which per-session workspaces are created
    #[arg(long, env = "DESKGATE_WORKSPACE_ROOT", default_value = "/workspace")]
    pub workspace_root: PathBuf,

    /// Minutes of inactivity after which a session is reclaimed
    #[arg(long, env = "DESKGATE_IDLE_MINUTES", default_value_t = 30)]
    pub idle_minutes: u64,

    /// Seconds between idle-reaper scans
    #[arg(long, env = "DESKGATE_REAP_INTERVAL_SECS", default_value_t = 60)]
    pub reap_interval_secs: u64,

    /// First virtual display number to allocate
    #[arg(long, default_value_t = 100)]
    pub display_base: u32,

    /// First VNC port to allocate
    #[arg(long, default_value_t = 5900)]
    pub vnc_port_base: u16,

    /// First bridge (WebSocket) port to allocate
    #[arg(long, default_value_t = 6900)]
    pub ws_port_base: u16,

    /// Virtual framebuffer server binary
    #[arg(long, default_value = "Xvfb")]
    pub xvfb_bin: String,

    /// Screen geometry for the virtual display
    #[arg(long, default_value = "1920x1080x24")]
    pub screen_geometry: String,

    /// Window manager binary
    #[arg(long, default_value = "fluxbox")]
    pub wm_bin: String,

    /// Target application command line, whitespace-separated
    #[arg(long, env = "DESKGATE_APP_COMMAND", default_value = "xterm")]
    pub app_command: String,

    /// VNC server binary
    #[arg(long, default_value = "x11vnc")]
    pub vnc_bin: String,

    /// WebSocket bridge binary
    #[arg(long, default_value = "websockify")]
    pub bridge_bin: String,

    /// Static viewer asset bundle served by the bridge
    #[arg(long, default_value = "/usr/share/novnc")]
    pub viewer_assets: PathBuf,

    /// Settle delay (ms) after stages with no probeable endpoint
    #[arg(long, default_value_t = 500)]
    pub settle_delay_ms: u64,

    /// Total budget (ms) for each stage readiness probe
    #[arg(long, default_value_t = 5000)]
    pub probe_timeout_ms: u64,

    /// Interval (ms) between readiness probe attempts
    #[arg(long, default_value_t = 100)]
    pub probe_interval_ms: u64,

    /// File extensions (comma-separated, no dots) the workspace file
    /// endpoints will accept
    #[arg(long, env = "DESKGATE_ALLOWED_EXTENSIONS", default_value = "txt,csv,png,dat")]
    pub allowed_extensions: String,

    /// Allowed CORS origins for the public API. Empty means permissive.
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,

    /// Per-IP request rate limit (requests per second) on the public API
    #[arg(long)]
    pub rate_limit: Option<u32>,
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_minutes * 60)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// URL the public tier uses to reach the control API.
    pub fn control_url(&self) -> String {
        match &self.internal_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.internal_bind),
        }
    }

    pub fn allocator(&self) -> ResourceAllocator {
        ResourceAllocator::new(self.display_base, self.vnc_port_base, self.ws_port_base)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            xvfb_bin: self.xvfb_bin.clone(),
            screen_geometry: self.screen_geometry.clone(),
            wm_bin: self.wm_bin.clone(),
            app_command: self
                .app_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            vnc_bin: self.vnc_bin.clone(),
            bridge_bin: self.bridge_bin.clone(),
            viewer_assets: self.viewer_assets.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            probe_interval: Duration::from_millis(self.probe_interval_ms),
        }
    }

    /// Normalized extension allow-list: lowercase, no leading dots, empty
    /// entries dropped.
    pub fn extension_allow_list(&self) -> Vec<String> {
        self.allowed_extensions
            .split(',')
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}
