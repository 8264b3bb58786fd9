//! Lifecycle controller for a single local Neo4j server
//!
//! An [`Instance`] patches the server's config file when it is built, then
//! drives the server through
//! `Constructed -> Starting -> Running -> Stopping -> Stopped`.
//! Readiness and shutdown are detected by scanning the server's stdout for
//! the ready and shutdown markers. Any stderr output, or a stdout line
//! containing ` ERROR `, fails the operation in flight.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{defaults, InstanceOptions};
use crate::error::{Error, Result};
use crate::process::{self, OutputEvent, ServerProcess};
use crate::properties;
use crate::version::ServerVersion;

/// Lifecycle state of an [`Instance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Config patched, never started
    Constructed,
    /// Spawned, waiting for the ready marker
    Starting,
    Running,
    /// Stop signal sent, waiting for the shutdown marker
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn display_name(&self) -> &str {
        match self {
            InstanceState::Constructed => "Constructed",
            InstanceState::Starting => "Starting",
            InstanceState::Running => "Running",
            InstanceState::Stopping => "Stopping",
            InstanceState::Stopped => "Stopped",
        }
    }

    pub fn can_start(&self) -> bool {
        matches!(self, InstanceState::Constructed | InstanceState::Stopped)
    }

    /// Whether a server process may be alive in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Connection details handed back by `start` and `stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub version: String,
    pub pid: u32,
    pub port: u16,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bolt_port: Option<u16>,
    #[serde(rename = "boltURL", skip_serializing_if = "Option::is_none")]
    pub bolt_url: Option<String>,
}

/// How output watching ended without error
enum Watch {
    Marker(String),
    Closed,
}

pub struct Instance {
    version: ServerVersion,
    port: u16,
    bolt_port: Option<u16>,
    home: PathBuf,
    start_timeout: Duration,
    stop_timeout: Duration,
    state: InstanceState,
    process: Option<ServerProcess>,
}

impl Instance {
    /// Build an instance and patch its config file.
    ///
    /// A port of 0 selects the default HTTP port. The bolt port only applies
    /// to 3.x servers.
    pub fn new(options: InstanceOptions) -> Result<Self> {
        let instance = Self::open(options)?;
        instance.configure()?;
        Ok(instance)
    }

    /// Build an instance without touching its config file.
    ///
    /// Enough for path queries and [`Instance::cleanup`]; the server keeps
    /// whatever ports its config already names.
    pub fn open(options: InstanceOptions) -> Result<Self> {
        let port = match options.port.ok_or(Error::PortRequired)? {
            0 => defaults::PORT,
            port => port,
        };
        let version = ServerVersion::new(options.version);
        let bolt_port = version.is_v3().then(|| match options.bolt_port {
            None | Some(0) => defaults::BOLT_PORT,
            Some(port) => port,
        });

        Ok(Self {
            start_timeout: Duration::from_secs(options.start_timeout_secs),
            stop_timeout: Duration::from_secs(options.stop_timeout_secs),
            version,
            port,
            bolt_port,
            home: options.home,
            state: InstanceState::Constructed,
            process: None,
        })
    }

    fn configure(&self) -> Result<()> {
        let config = self.config_location();
        debug!("Configuring {} in {}", self.name(), config.display());

        let mut props = self.version.security_properties();
        props.extend(self.version.http_properties(self.port));
        if let Some(bolt_port) = self.bolt_port {
            props.extend(self.version.bolt_properties(bolt_port));
        }

        for (name, value) in props {
            properties::set_property(&config, name, &value)?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("neo4j-{}:{}", self.version, self.port)
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bolt_port(&self) -> Option<u16> {
        self.bolt_port
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// PID of the server while it is active
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::pid)
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Bolt endpoint, 3.x servers only
    pub fn bolt_url(&self) -> Option<String> {
        self.bolt_port
            .map(|bolt_port| format!("bolt://localhost:{}", bolt_port))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Install directory of this server version
    pub fn server_location(&self) -> PathBuf {
        self.home.join("bin").join(self.version.install_dir_name())
    }

    pub fn config_location(&self) -> PathBuf {
        self.server_location().join(self.version.config_file())
    }

    pub fn binary_location(&self) -> PathBuf {
        self.server_location()
            .join("bin")
            .join(self.version.binary_name())
    }

    /// Database path as written to the config file
    pub fn db_location(&self) -> String {
        ServerVersion::db_location(self.port)
    }

    /// On-disk database directory removed by [`Instance::cleanup`]
    pub fn data_dir(&self) -> PathBuf {
        let server = self.server_location();
        if self.version.is_v3() {
            server
                .join("data")
                .join("databases")
                .join(self.db_location())
        } else {
            server.join(self.db_location())
        }
    }

    pub fn pid_file_location(&self) -> PathBuf {
        process::pid_file(
            &self.home.join("run"),
            &self.version.install_dir_name(),
            self.port,
        )
    }

    /// Connection details; `None` unless a server process exists
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        Some(ConnectionInfo {
            version: self.version.to_string(),
            pid: self.pid()?,
            port: self.port,
            url: self.url(),
            bolt_port: self.bolt_port,
            bolt_url: self.bolt_url(),
        })
    }

    /// Launch the server and wait for its ready marker.
    ///
    /// If the returned future is dropped before it completes, the instance
    /// stays `Starting` with its server alive; call [`Instance::kill`] to
    /// recover.
    pub async fn start(&mut self) -> Result<ConnectionInfo> {
        if !self.state.can_start() {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let binary = self.binary_location();
        process::make_executable(&binary)?;

        let process = ServerProcess::spawn(
            &self.name(),
            &binary,
            &["console"],
            self.version.is_windows(),
        )?;
        self.process = Some(process);
        self.state = InstanceState::Starting;
        info!("Waiting for {} to become ready", self.name());

        let markers = self.version.ready_markers();
        let limit = self.start_timeout;
        let watched = match self.process.as_mut() {
            Some(process) => timeout(limit, watch_output(process, markers)).await,
            None => Ok(Err(Error::Exited("start"))),
        };

        match watched {
            Ok(Ok(Watch::Marker(line))) => {
                debug!("Ready: {}", line);
                if let Some(process) = self.process.as_ref() {
                    process.set_watching(false);
                }
            }
            Ok(Ok(Watch::Closed)) => {
                self.abort().await;
                return Err(Error::Exited("start"));
            }
            Ok(Err(e)) => {
                self.abort().await;
                return Err(e);
            }
            Err(_) => {
                self.abort().await;
                return Err(Error::Timeout {
                    operation: "start",
                    after: limit,
                });
            }
        }

        self.state = InstanceState::Running;
        let info = self.connection_info().ok_or(Error::Exited("start"))?;

        let pid_file = self.pid_file_location();
        if let Err(e) = process::write_pid_file(&pid_file, info.pid).await {
            warn!("{}", e);
        }

        info!("{} is running at {} (PID: {})", self.name(), info.url, info.pid);
        Ok(info)
    }

    /// Signal the server and wait for its shutdown marker.
    ///
    /// Errors the server logged while running surface here; other output
    /// from that period is dropped.
    pub async fn stop(&mut self) -> Result<ConnectionInfo> {
        if self.state != InstanceState::Running {
            return Err(Error::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }

        let info = self.connection_info().ok_or(Error::Exited("stop"))?;
        let signal = self.version.stop_signal();
        let markers = self.version.shutdown_markers();
        let limit = self.stop_timeout;

        self.state = InstanceState::Stopping;
        info!("Stopping {} with {}", self.name(), signal);

        let watched = match self.process.as_mut() {
            Some(process) => {
                process.set_watching(true);
                match process.signal(signal) {
                    Ok(()) => timeout(limit, watch_output(process, markers)).await,
                    Err(e) => Ok(Err(e)),
                }
            }
            None => Ok(Err(Error::Exited("stop"))),
        };

        match watched {
            Ok(Ok(Watch::Marker(line))) => debug!("Shutdown: {}", line),
            Ok(Ok(Watch::Closed)) => debug!("{} closed its output", self.name()),
            Ok(Err(e)) => {
                self.abort().await;
                return Err(e);
            }
            Err(_) => {
                self.abort().await;
                return Err(Error::Timeout {
                    operation: "stop",
                    after: limit,
                });
            }
        }

        if let Some(mut process) = self.process.take() {
            match timeout(limit, process.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("{}", e),
                Err(_) => {
                    let _ = process.kill().await;
                }
            }
        }
        process::remove_pid_file(&self.pid_file_location()).await;

        self.state = InstanceState::Stopped;
        info!("{} stopped", self.name());
        Ok(info)
    }

    /// Force-kill the server, whatever state it is in
    pub async fn kill(&mut self) -> Result<()> {
        let result = match self.process.as_mut() {
            Some(process) => process.kill().await,
            None => Ok(()),
        };
        self.abort().await;
        result
    }

    async fn abort(&mut self) {
        if let Some(mut process) = self.process.take() {
            if process.is_alive() {
                let _ = process.kill().await;
            }
            process::remove_pid_file(&self.pid_file_location()).await;
        }
        self.state = InstanceState::Stopped;
    }

    /// Delete this instance's database directory.
    ///
    /// Refuses while the server is active, and refuses any path that
    /// resolves outside the install root.
    pub async fn cleanup(&self) -> Result<()> {
        if self.state.is_active() {
            return Err(Error::InvalidState {
                operation: "clean up",
                state: self.state,
            });
        }

        let dir = normalize(&self.data_dir());
        if !dir.starts_with(normalize(&self.home)) {
            return Err(Error::UnsafePath(dir));
        }

        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!("Nothing to clean up at {}", dir.display());
            return Ok(());
        }

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| Error::io(format!("Failed to remove {}", dir.display()), e))?;

        info!("Removed database directory {}", dir.display());
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            if process.is_alive() {
                // Best-effort graceful stop
                let _ = process.signal(self.version.stop_signal());
                let _ = std::fs::remove_file(self.pid_file_location());
            }
        }
    }
}

/// Read output until a marker line, a failure line, or the end of output
async fn watch_output(process: &mut ServerProcess, markers: &[&str]) -> Result<Watch> {
    while let Some(event) = process.next_event().await {
        match event {
            OutputEvent::Stderr(line) => return Err(Error::ServerOutput(line)),
            OutputEvent::Stdout(line) => {
                if process::is_failure_line(&line) {
                    return Err(Error::ServerOutput(line));
                }
                if markers.iter().any(|marker| line.contains(marker)) {
                    return Ok(Watch::Marker(line));
                }
            }
            OutputEvent::Closed => return Ok(Watch::Closed),
        }
    }
    Ok(Watch::Closed)
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(home: &Path, version: &str) -> PathBuf {
        let version = ServerVersion::new(version);
        let server = home.join("bin").join(version.install_dir_name());
        std::fs::create_dir_all(server.join("conf")).unwrap();

        let conf = if version.is_v3() {
            "#dbms.active_database=graph.db\n\
             #dbms.connector.http.address=0.0.0.0:7474\n\
             # dbms.connector.http.listen_address=:7474\n\
             dbms.connector.https.enabled=true\n\
             #dbms.security.auth_enabled=false\n\
             # dbms.connector.bolt.address=0.0.0.0:7687\n\
             #dbms.connector.bolt.listen_address=:7687\n"
        } else {
            "org.neo4j.server.database.location=data/graph.db\n\
             org.neo4j.server.webserver.port=7474\n\
             org.neo4j.server.webserver.https.enabled=true\n"
        };
        let path = server.join(version.config_file());
        std::fs::write(&path, conf).unwrap();
        path
    }

    #[test]
    fn test_port_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let options = InstanceOptions {
            port: None,
            ..InstanceOptions::default()
        }
        .home(dir.path());

        let err = Instance::new(options).err().unwrap();
        assert!(matches!(err, Error::PortRequired));
        assert!(err.to_string().contains("port is required"));
    }

    #[test]
    fn test_zero_port_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "2.3.3");

        let instance = Instance::new(InstanceOptions::new(0).home(dir.path())).unwrap();
        assert_eq!(instance.port(), 6363);
        assert_eq!(instance.url(), "http://localhost:6363");
        assert_eq!(instance.bolt_port(), None);
        assert_eq!(instance.bolt_url(), None);
    }

    #[test]
    fn test_legacy_config_is_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = install(dir.path(), "2.3.3");

        let instance = Instance::new(InstanceOptions::new(7000).home(dir.path())).unwrap();
        assert_eq!(instance.state(), InstanceState::Constructed);
        assert!(instance
            .config_location()
            .ends_with("conf/neo4j-server.properties"));

        let props = properties::read_properties(&path).unwrap();
        assert_eq!(props["org.neo4j.server.webserver.port"], "7000");
        assert_eq!(
            props["org.neo4j.server.database.location"],
            "data/graph.db.7000"
        );
        assert_eq!(props["org.neo4j.server.webserver.https.enabled"], "false");
    }

    #[test]
    fn test_v3_config_is_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = install(dir.path(), "3.0.4");

        let instance =
            Instance::new(InstanceOptions::new(7100).version("3.0.4").home(dir.path())).unwrap();
        assert!(instance.config_location().ends_with("conf/neo4j.conf"));
        assert_eq!(instance.bolt_port(), Some(6365));
        assert_eq!(
            instance.bolt_url().as_deref(),
            Some("bolt://localhost:6365")
        );

        let props = properties::read_properties(&path).unwrap();
        assert_eq!(props["dbms.connector.http.address"], "localhost:7100");
        assert_eq!(props["dbms.connector.http.listen_address"], ":7100");
        assert_eq!(props["dbms.active_database"], "data/graph.db.7100");
        assert_eq!(props["dbms.connector.https.enabled"], "false");
        assert_eq!(props["dbms.security.auth_enabled"], "false");
        assert_eq!(props["dbms.connector.bolt.address"], "localhost:6365");
        assert_eq!(props["dbms.connector.bolt.listen_address"], ":6365");
    }

    #[test]
    fn test_missing_config_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let err = Instance::new(InstanceOptions::new(7000).home(dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_locations() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "3.0.4");
        install(dir.path(), "2.3.3");

        let v3 =
            Instance::new(InstanceOptions::new(7200).version("3.0.4").home(dir.path())).unwrap();
        assert!(v3
            .binary_location()
            .ends_with("bin/neo4j-community-3.0.4/bin/neo4j"));
        assert!(v3
            .data_dir()
            .ends_with("neo4j-community-3.0.4/data/databases/data/graph.db.7200"));

        let legacy = Instance::new(InstanceOptions::new(7200).home(dir.path())).unwrap();
        assert!(legacy
            .data_dir()
            .ends_with("neo4j-community-2.3.3/data/graph.db.7200"));
        assert!(legacy
            .pid_file_location()
            .ends_with("run/neo4j-community-2.3.3-7200.pid"));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "2.3.3");

        let mut instance = Instance::new(InstanceOptions::new(7300).home(dir.path())).unwrap();
        let err = instance.stop().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "stop",
                state: InstanceState::Constructed
            }
        ));
        assert_eq!(instance.connection_info(), None);
    }

    #[tokio::test]
    async fn test_start_without_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "2.3.3");

        let mut instance = Instance::new(InstanceOptions::new(7400).home(dir.path())).unwrap();
        assert!(instance.start().await.is_err());
        assert!(instance.state().can_start());
    }

    #[tokio::test]
    async fn test_cleanup_removes_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "2.3.3");

        let instance = Instance::new(InstanceOptions::new(7500).home(dir.path())).unwrap();
        let data = instance.data_dir();
        std::fs::create_dir_all(data.join("schema")).unwrap();
        std::fs::write(data.join("neostore"), b"x").unwrap();

        instance.cleanup().await.unwrap();
        assert!(!data.exists());
        // second run has nothing to do
        instance.cleanup().await.unwrap();
    }

    #[test]
    fn test_open_leaves_config_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = install(dir.path(), "2.3.3");
        let before = std::fs::read_to_string(&path).unwrap();

        let instance = Instance::open(InstanceOptions::new(7700).home(dir.path())).unwrap();
        assert_eq!(instance.port(), 7700);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_open_cleans_up_without_config() {
        let dir = tempfile::tempdir().unwrap();

        let instance = Instance::open(InstanceOptions::new(7800).home(dir.path())).unwrap();
        let data = instance.data_dir();
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("neostore"), b"x").unwrap();

        instance.cleanup().await.unwrap();
        assert!(!data.exists());
        assert!(!instance.config_location().exists());
    }

    #[tokio::test]
    async fn test_cleanup_refuses_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        // resolves to the parent of `home`
        let version = "x/../../..";
        std::fs::create_dir_all(home.join("bin").join("neo4j-community-x")).unwrap();
        install(&home, version);

        let instance =
            Instance::new(InstanceOptions::new(7600).version(version).home(&home)).unwrap();
        assert!(!normalize(&instance.data_dir()).starts_with(&home));
        let err = instance.cleanup().await.unwrap_err();
        assert!(matches!(err, Error::UnsafePath(_)));
    }

    #[test]
    fn test_connection_info_json_shape() {
        let info = ConnectionInfo {
            version: "3.0.4".to_string(),
            pid: 42,
            port: 7474,
            url: "http://localhost:7474".to_string(),
            bolt_port: Some(7687),
            bolt_url: Some("bolt://localhost:7687".to_string()),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["boltPort"], 7687);
        assert_eq!(json["boltURL"], "bolt://localhost:7687");

        let legacy = ConnectionInfo {
            bolt_port: None,
            bolt_url: None,
            ..info
        };
        let json = serde_json::to_value(&legacy).unwrap();
        assert!(json.get("boltPort").is_none());
        assert!(json.get("boltURL").is_none());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(InstanceState::Stopping.to_string(), "Stopping");
        assert!(InstanceState::Stopped.can_start());
        assert!(!InstanceState::Running.can_start());
        assert!(InstanceState::Starting.is_active());
        assert!(!InstanceState::Constructed.is_active());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
