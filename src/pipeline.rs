//! Launches and terminates the per-session process chain.
//!
//! Every session runs five cooperating background processes: a virtual
//! framebuffer (Xvfb), a window manager on that display, the target
//! application, a VNC server exporting the display, and a websockify bridge
//! that converts the VNC stream to WebSocket and serves the viewer assets.
//! Stages depend on their predecessor being usable, so the launcher probes
//! each stage that exposes an observable endpoint (X display socket, TCP
//! listener) before starting the next, with a bounded retry budget. Stages
//! with nothing to probe get a short settle delay instead.
//!
//! A probe that exhausts its budget logs a warning and the launch continues:
//! a stage that dies early surfaces later as a dead stream, not as a
//! creation error. Only an outright spawn failure aborts the launch.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::allocator::DisplayResources;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to start {stage}: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Commands and timing for the five-stage pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Virtual framebuffer server binary.
    pub xvfb_bin: String,
    /// Screen geometry passed to the framebuffer, e.g. `1920x1080x24`.
    pub screen_geometry: String,
    /// Window manager binary, launched with `DISPLAY` pointing at the
    /// session's virtual display.
    pub wm_bin: String,
    /// Target application command line. First element is the program, the
    /// rest are its arguments.
    pub app_command: Vec<String>,
    /// VNC server binary.
    pub vnc_bin: String,
    /// WebSocket bridge binary.
    pub bridge_bin: String,
    /// Static viewer asset bundle served by the bridge.
    pub viewer_assets: PathBuf,
    /// Settle delay for stages with no probeable endpoint (window manager,
    /// application).
    pub settle_delay: Duration,
    /// Total budget for each readiness probe.
    pub probe_timeout: Duration,
    /// Interval between probe attempts.
    pub probe_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            xvfb_bin: "Xvfb".to_string(),
            screen_geometry: "1920x1080x24".to_string(),
            wm_bin: "fluxbox".to_string(),
            app_command: vec!["xterm".to_string()],
            vnc_bin: "x11vnc".to_string(),
            bridge_bin: "websockify".to_string(),
            viewer_assets: PathBuf::from("/usr/share/novnc"),
            settle_delay: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(100),
        }
    }
}

/// Handles to the five background processes of one session.
///
/// Owned exclusively by the session record; taken out of the record's mutex
/// at teardown and consumed by [`terminate`].
#[derive(Debug)]
pub struct ProcessSet {
    pub xvfb: Child,
    pub wm: Child,
    pub app: Child,
    pub vnc: Child,
    pub bridge: Child,
}

impl ProcessSet {
    /// The stages in launch order, by name.
    pub fn into_stages(self) -> [(&'static str, Child); 5] {
        [
            ("xvfb", self.xvfb),
            ("wm", self.wm),
            ("app", self.app),
            ("vnc", self.vnc),
            ("bridge", self.bridge),
        ]
    }

    fn stages_mut(&mut self) -> [(&'static str, &mut Child); 5] {
        [
            ("xvfb", &mut self.xvfb),
            ("wm", &mut self.wm),
            ("app", &mut self.app),
            ("vnc", &mut self.vnc),
            ("bridge", &mut self.bridge),
        ]
    }
}

impl PipelineConfig {
    /// Launch the full process chain for a session.
    ///
    /// On a spawn failure the already-started stages are best-effort
    /// terminated before the error is returned, so a failed create does not
    /// leak displays or processes.
    pub async fn launch(
        &self,
        session_id: &str,
        resources: DisplayResources,
        workspace: &Path,
    ) -> Result<ProcessSet, PipelineError> {
        let display_arg = format!(":{}", resources.display);
        let mut started: Vec<(&'static str, Child)> = Vec::with_capacity(5);

        let result = self
            .launch_stages(&display_arg, resources, workspace, &mut started)
            .await;

        match result {
            Ok(()) => {
                let mut stages = started.into_iter();
                // Order matches the pushes in launch_stages.
                let (_, xvfb) = stages.next().expect("xvfb stage");
                let (_, wm) = stages.next().expect("wm stage");
                let (_, app) = stages.next().expect("app stage");
                let (_, vnc) = stages.next().expect("vnc stage");
                let (_, bridge) = stages.next().expect("bridge stage");
                tracing::info!(
                    session = %session_id,
                    display = %display_arg,
                    vnc_port = resources.vnc_port,
                    ws_port = resources.ws_port,
                    "session pipeline started"
                );
                Ok(ProcessSet { xvfb, wm, app, vnc, bridge })
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "pipeline launch failed, terminating started stages");
                for (stage, child) in &started {
                    signal_term(child, stage);
                }
                reap(started);
                Err(e)
            }
        }
    }

    async fn launch_stages(
        &self,
        display_arg: &str,
        resources: DisplayResources,
        workspace: &Path,
        started: &mut Vec<(&'static str, Child)>,
    ) -> Result<(), PipelineError> {
        let mut xvfb = Command::new(&self.xvfb_bin);
        xvfb.args([display_arg, "-screen", "0", self.screen_geometry.as_str()]);
        started.push(("xvfb", spawn_stage("xvfb", xvfb)?));
        self.wait_for_display(resources.display).await;

        let mut wm = Command::new(&self.wm_bin);
        wm.env("DISPLAY", display_arg);
        started.push(("wm", spawn_stage("wm", wm)?));
        tokio::time::sleep(self.settle_delay).await;

        let (app_bin, app_args) = self
            .app_command
            .split_first()
            .map(|(bin, args)| (bin.as_str(), args))
            .unwrap_or(("xterm", &[]));
        let mut app = Command::new(app_bin);
        app.args(app_args)
            .current_dir(workspace)
            .env("DISPLAY", display_arg);
        started.push(("app", spawn_stage("app", app)?));
        tokio::time::sleep(self.settle_delay).await;

        let rfb_port = resources.vnc_port.to_string();
        let mut vnc = Command::new(&self.vnc_bin);
        vnc.args([
            "-display",
            display_arg,
            "-rfbport",
            rfb_port.as_str(),
            "-forever",
            "-shared",
            "-nopw",
        ]);
        started.push(("vnc", spawn_stage("vnc", vnc)?));
        self.wait_for_listener(resources.vnc_port).await;

        let mut bridge = Command::new(&self.bridge_bin);
        bridge.args([
            &format!("--web={}", self.viewer_assets.display()),
            &resources.ws_port.to_string(),
            &format!("localhost:{}", resources.vnc_port),
        ]);
        started.push(("bridge", spawn_stage("bridge", bridge)?));
        self.wait_for_listener(resources.ws_port).await;

        Ok(())
    }

    /// Poll for the X server's display socket until it appears or the probe
    /// budget runs out.
    async fn wait_for_display(&self, display: u32) {
        let socket = PathBuf::from(format!("/tmp/.X11-unix/X{display}"));
        let deadline = tokio::time::Instant::now() + self.probe_timeout;
        while tokio::time::Instant::now() < deadline {
            if socket.exists() {
                return;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
        let display_num = display;
        tracing::warn!(display = display_num, "X display socket never appeared, continuing");
    }

    /// Poll a loopback TCP port until something accepts or the probe budget
    /// runs out.
    async fn wait_for_listener(&self, port: u16) {
        let deadline = tokio::time::Instant::now() + self.probe_timeout;
        while tokio::time::Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
        tracing::warn!(port, "listener never came up, continuing");
    }
}

fn spawn_stage(stage: &'static str, mut cmd: Command) -> Result<Child, PipelineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = cmd
        .spawn()
        .map_err(|source| PipelineError::Spawn { stage, source })?;
    tracing::debug!(stage, pid = child.id(), "stage spawned");
    Ok(child)
}

/// Best-effort graceful termination of a full process set.
///
/// Sends SIGTERM to every stage that still has a pid; delivery failures are
/// logged and swallowed, so termination always succeeds from the caller's
/// point of view. The children are then handed to a detached task that waits
/// on each so no zombies accumulate.
pub fn terminate(mut set: ProcessSet) {
    for (stage, child) in set.stages_mut() {
        signal_term(child, stage);
    }
    reap(set.into_stages());
}

/// Send SIGTERM to one child's process, guarding against missing or
/// out-of-range pids (the process may already have exited).
fn signal_term(child: &Child, stage: &str) {
    let Some(pid) = child.id() else {
        tracing::debug!(stage, "process already exited, skipping SIGTERM");
        return;
    };
    if pid == 0 || pid > i32::MAX as u32 {
        tracing::warn!(stage, pid, "pid out of signalable range");
        return;
    }
    #[cfg(unix)]
    unsafe {
        if libc::kill(pid as i32, libc::SIGTERM) != 0 {
            tracing::debug!(stage, pid, "SIGTERM delivery failed");
        }
    }
}

/// Wait on each child in the background so the kernel can release it.
fn reap<I>(children: I)
where
    I: IntoIterator<Item = (&'static str, Child)> + Send + 'static,
    I::IntoIter: Send,
{
    tokio::spawn(async move {
        for (stage, mut child) in children {
            match child.wait().await {
                Ok(status) => tracing::debug!(stage, %status, "stage exited"),
                Err(e) => tracing::debug!(stage, error = %e, "wait failed"),
            }
        }
    });
}
