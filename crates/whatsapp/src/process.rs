//! Lifecycle management for the Baileys sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use wagate_common::{Error, Result};

/// Settings for locating and running the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarSettings {
    /// Port of the sidecar WebSocket server.
    pub port: u16,
    /// Directory containing the sidecar code; autodiscovered when `None`.
    pub sidecar_dir: Option<PathBuf>,
    /// Spawn the sidecar process on demand. Disable to run it by hand.
    pub auto_start: bool,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            port: crate::sidecar::DEFAULT_SIDECAR_PORT,
            sidecar_dir: None,
            auto_start: true,
        }
    }
}

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the process: SIGTERM first, kill after a grace period.
    pub async fn stop(&mut self) {
        info!("stopping whatsapp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar exit"),
            Err(_) => {
                warn!("sidecar ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// Locate the sidecar directory (must contain `package.json`).
///
/// Search order: explicit path, `WAGATE_SIDECAR_DIR`, next to the executable,
/// then the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::message(format!(
            "sidecar directory missing package.json: {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var("WAGATE_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "WAGATE_SIDECAR_DIR set but package.json not found");
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("../sidecar/whatsapp-baileys"));
        candidates.push(exe_dir.join("../../sidecar/whatsapp-baileys"));
    }
    candidates.push(PathBuf::from("sidecar/whatsapp-baileys"));

    for candidate in candidates {
        if candidate.join("package.json").exists() {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    Err(Error::message(
        "whatsapp sidecar not found; set WAGATE_SIDECAR_DIR or place it at sidecar/whatsapp-baileys",
    ))
}

/// Spawn the sidecar and wire its logs into tracing.
pub async fn start_sidecar(sidecar_dir: &Path, port: u16) -> Result<SidecarProcess> {
    if !sidecar_dir.join("node_modules").exists() {
        run_npm_install(sidecar_dir).await?;
    }

    info!(path = %sidecar_dir.display(), port, "starting whatsapp sidecar");

    let mut child = Command::new("node")
        .arg("index.js")
        .current_dir(sidecar_dir)
        .env("WAGATE_SIDECAR_PORT", port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::external("failed to spawn sidecar", e))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_sidecar_log(&line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "wa_sidecar", "{}", line);
            }
        });
    }

    // Give the process a moment to fail fast on startup errors.
    tokio::time::sleep(Duration::from_millis(500)).await;
    match child.try_wait() {
        Ok(Some(status)) => Err(Error::message(format!(
            "sidecar exited immediately with status {status}"
        ))),
        Ok(None) => {
            info!(port, "whatsapp sidecar started");
            Ok(SidecarProcess { child, port })
        },
        Err(e) => Err(Error::external("failed to check sidecar status", e)),
    }
}

/// The sidecar logs through pino; translate its JSON levels, pass anything
/// else through verbatim.
fn forward_sidecar_log(line: &str) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
        let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
        match level {
            10 | 20 => debug!(target: "wa_sidecar", "{}", msg),
            30 => info!(target: "wa_sidecar", "{}", msg),
            40 => warn!(target: "wa_sidecar", "{}", msg),
            _ => error!(target: "wa_sidecar", "{}", msg),
        }
        return;
    }
    info!(target: "wa_sidecar", "{}", line);
}

async fn run_npm_install(sidecar_dir: &Path) -> Result<()> {
    info!(path = %sidecar_dir.display(), "running npm install for sidecar");

    let output = Command::new("npm")
        .arg("install")
        .current_dir(sidecar_dir)
        .output()
        .await
        .map_err(|e| Error::external("failed to run npm install", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::message(format!("npm install failed: {stderr}")));
    }

    Ok(())
}
