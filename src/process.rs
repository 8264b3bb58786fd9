use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::version::StopSignal;

/// A line of server output, or the end of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(String),
    Stderr(String),
    /// Both output streams reached EOF
    Closed,
}

/// A spawned server whose stdout and stderr are observed line by line
pub struct ServerProcess {
    name: String,
    child: Child,
    pid: u32,
    events: mpsc::UnboundedReceiver<OutputEvent>,
    watching: Arc<AtomicBool>,
}

/// Stdout lines the server uses to report failures
pub fn is_failure_line(line: &str) -> bool {
    line.contains(" ERROR ")
}

impl ServerProcess {
    /// Spawn `binary` with `args`, piping its output into an event channel.
    ///
    /// With `shell` set the command line runs through `cmd /C` on Windows or
    /// `sh -c` elsewhere, which `.bat` launchers need. The `sh` wrapper
    /// `exec`s the launcher, so the PID is the launcher's own.
    ///
    /// Output is forwarded while watching, which is the initial state. When
    /// not watching, plain stdout lines are logged and dropped; stderr,
    /// failure lines and the close event are always forwarded.
    pub fn spawn(name: &str, binary: &Path, args: &[&str], shell: bool) -> Result<Self> {
        let mut cmd = if shell {
            shell_command(binary, args)
        } else {
            let mut cmd = Command::new(binary);
            cmd.args(args);
            cmd
        };

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        debug!("Starting {}: {} {}", name, binary.display(), args.join(" "));

        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to spawn {}: {}", binary.display(), source);
            Error::Spawn {
                binary: binary.to_path_buf(),
                source,
            }
        })?;

        let pid = child.id().ok_or(Error::Exited("spawn"))?;

        let (tx, events) = mpsc::unbounded_channel();
        let watching = Arc::new(AtomicBool::new(true));
        match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => {
                tokio::spawn(pump_output(
                    name.to_string(),
                    stdout,
                    stderr,
                    tx,
                    watching.clone(),
                ));
            }
            _ => {
                let _ = tx.send(OutputEvent::Closed);
            }
        }

        info!("Started {} (PID: {})", name, pid);

        Ok(Self {
            name: name.to_string(),
            child,
            pid,
            events,
            watching,
        })
    }

    /// Forward every stdout line (`true`) or only failures (`false`)
    pub fn set_watching(&self, watching: bool) {
        self.watching.store(watching, Ordering::SeqCst);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next output event; `None` once the observer task is gone
    pub async fn next_event(&mut self) -> Option<OutputEvent> {
        self.events.recv().await
    }

    /// Ask the process to stop
    pub fn signal(&mut self, sig: StopSignal) -> Result<()> {
        debug!("Sending {} to {} (PID: {})", sig, self.name, self.pid);

        #[cfg(unix)]
        {
            send_signal(self.pid, sig)
        }

        #[cfg(windows)]
        {
            let _ = sig;
            kill_tree(self.pid)
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = sig;
            self.child
                .start_kill()
                .map_err(|e| Error::io(format!("Failed to stop {}", self.name), e))
        }
    }

    /// Force-kill the process and reap it
    pub async fn kill(&mut self) -> Result<()> {
        warn!("Killing {} (PID: {})", self.name, self.pid);

        // cmd.exe does not pass termination on to the launcher it runs
        #[cfg(windows)]
        {
            if let Err(e) = kill_tree(self.pid) {
                warn!("{}", e);
            }
        }

        self.child
            .kill()
            .await
            .map_err(|e| Error::io(format!("Failed to kill {}", self.name), e))
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::io(format!("Failed to wait for {}", self.name), e))?;

        debug!("{} exited with {}", self.name, status);
        Ok(status)
    }

    /// Whether the child has not been reaped yet
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

fn shell_line(binary: &Path, args: &[&str]) -> String {
    std::iter::once(format!("\"{}\"", binary.display()))
        .chain(args.iter().map(|a| a.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(windows)]
fn shell_command(binary: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(shell_line(binary, args));
    cmd
}

#[cfg(not(windows))]
fn shell_command(binary: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(format!("exec {}", shell_line(binary, args)));
    cmd
}

/// Terminate `pid` and every process it started
#[cfg(windows)]
fn kill_tree(pid: u32) -> Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::io(format!("Failed to run taskkill for PID {}", pid), e))?;

    if !status.success() {
        return Err(Error::io(
            format!("taskkill failed for PID {}", pid),
            std::io::Error::other(status.to_string()),
        ));
    }
    Ok(())
}

/// Forward stdout and stderr lines until both streams close
async fn pump_output(
    name: String,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::UnboundedSender<OutputEvent>,
    watching: Arc<AtomicBool>,
) {
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            line = out.next_line(), if out_open => match line {
                Ok(Some(line)) => {
                    debug!(target: "neotestdb::server", "[{}] {}", name, line);
                    if watching.load(Ordering::SeqCst) || is_failure_line(&line) {
                        let _ = tx.send(OutputEvent::Stdout(line));
                    }
                }
                _ => out_open = false,
            },
            line = err.next_line(), if err_open => match line {
                Ok(Some(line)) => {
                    debug!(target: "neotestdb::server", "[{} stderr] {}", name, line);
                    let _ = tx.send(OutputEvent::Stderr(line));
                }
                _ => err_open = false,
            },
        }
    }

    debug!("{} output closed", name);
    let _ = tx.send(OutputEvent::Closed);
}

/// Mark `path` as executable (`755`)
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::io(format!("Failed to chmod {}", path.display()), e))?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// Send `sig` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: u32, sig: StopSignal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), sig.as_nix())
        .map_err(|e| Error::io(format!("Failed to send {} to PID {}", sig, pid), e.into()))
}

/// Check if a process is running by PID
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// PID file for the server listening on `port`
pub fn pid_file(run_dir: &Path, install_dir_name: &str, port: u16) -> PathBuf {
    run_dir.join(format!("{}-{}.pid", install_dir_name, port))
}

pub async fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;
    }

    let mut file = File::create(path)
        .await
        .map_err(|e| Error::io(format!("Failed to create PID file {}", path.display()), e))?;
    file.write_all(pid.to_string().as_bytes())
        .await
        .map_err(|e| Error::io(format!("Failed to write PID file {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| Error::io(format!("Failed to write PID file {}", path.display()), e))?;

    Ok(())
}

pub async fn read_pid_file(path: &Path) -> Option<u32> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    contents.trim().parse().ok()
}

pub async fn remove_pid_file(path: &Path) {
    if tokio::fs::remove_file(path).await.is_err() {
        warn!("Failed to remove PID file: {}", path.display());
    }
}
