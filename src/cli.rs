use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use neotestdb::process::{is_process_running, read_pid_file};
use neotestdb::{Instance, ServerVersion};
use tracing::{info, warn};

/// Delete the database directory of one instance
pub async fn clean(instance: &Instance, force: bool) -> Result<()> {
    let data_dir = instance.data_dir();
    if !data_dir.exists() {
        info!("Database directory does not exist: {}", data_dir.display());
        return Ok(());
    }

    if !force {
        println!("This will delete: {}", data_dir.display());
        println!("Are you sure? (y/N)");

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("Cleanup cancelled");
            return Ok(());
        }
    }

    instance
        .cleanup()
        .await
        .with_context(|| format!("Failed to clean up {}", data_dir.display()))?;

    Ok(())
}

/// Show status of servers started by `neotestdb start`
pub async fn status(home: &Path) -> Result<()> {
    let pid_files = pid_files(home).await?;

    if pid_files.is_empty() {
        info!("No running servers found");
        return Ok(());
    }

    println!("Server Status:");
    println!("═══════════════════════════════════════════════════════");

    for (name, path) in pid_files {
        if let Some(pid) = read_pid_file(&path).await {
            let status = if is_process_running(pid) {
                format!("✓ Running (PID: {})", pid)
            } else {
                "✗ Dead".to_string()
            };

            println!("{:<36} {}", name, status);
        }
    }

    Ok(())
}

/// Stop all servers that have a PID file
pub async fn stop(home: &Path) -> Result<()> {
    let mut stopped = 0;

    for (name, path) in pid_files(home).await? {
        if let Some(pid) = read_pid_file(&path).await {
            let signal = version_of(&name).stop_signal();
            if stop_process(pid, signal) {
                info!("Sent {} to {}", signal, name);
                stopped += 1;
            } else {
                warn!("Failed to stop {} (PID: {})", name, pid);
            }
        }

        // Remove PID file
        let _ = tokio::fs::remove_file(&path).await;
    }

    if stopped > 0 {
        info!("Stopped {} server(s)", stopped);
    } else {
        info!("No running servers to stop");
    }

    Ok(())
}

/// PID files under `<home>/run`, keyed by file stem
async fn pid_files(home: &Path) -> Result<Vec<(String, PathBuf)>> {
    let run_dir = home.join("run");
    if !run_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(&run_dir)
        .await
        .with_context(|| format!("Failed to read {}", run_dir.display()))?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) == Some("pid") {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            found.push((name, path));
        }
    }

    found.sort();
    Ok(found)
}

/// Recover the version from a `neo4j-community-<version>-<port>` stem
fn version_of(stem: &str) -> ServerVersion {
    let rest = stem.strip_prefix("neo4j-community-").unwrap_or(stem);
    let version = rest.rsplit_once('-').map(|(v, _)| v).unwrap_or(rest);
    ServerVersion::new(version)
}

#[cfg(unix)]
fn stop_process(pid: u32, signal: neotestdb::StopSignal) -> bool {
    neotestdb::process::send_signal(pid, signal).is_ok()
}

#[cfg(not(unix))]
fn stop_process(_pid: u32, _signal: neotestdb::StopSignal) -> bool {
    false
}
