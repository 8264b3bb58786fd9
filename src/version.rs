//! Server version dialects
//!
//! The version string picks the install directory, the config file and its
//! key names and the launcher script. Two dialects exist:
//! 3.x servers (`neo4j.conf`, bolt connector, auth switch) and everything
//! older (`neo4j-server.properties`). A version containing `win` is a Windows
//! build, launched through a shell and stopped with `SIGTERM`.

use std::fmt;
use std::path::PathBuf;

/// Version used when none is given
pub const DEFAULT_VERSION: &str = "2.3.3";

/// 2.x form first, then 3.x
pub const READY_MARKERS: &[&str] = &[
    "Remote interface ready and available",
    "Remote interface available",
];

/// 2.x form first, then 3.x
pub const SHUTDOWN_MARKERS: &[&str] = &["Successfully shutdown database", "Stopped."];

/// Signal delivered to ask the server to shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Hangup,
    Terminate,
}

impl StopSignal {
    #[cfg(unix)]
    pub fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;

        match self {
            StopSignal::Hangup => Signal::SIGHUP,
            StopSignal::Terminate => Signal::SIGTERM,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Hangup => write!(f, "SIGHUP"),
            StopSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion(String);

impl Default for ServerVersion {
    fn default() -> Self {
        Self(DEFAULT_VERSION.to_string())
    }
}

impl ServerVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_v3(&self) -> bool {
        self.0.starts_with('3')
    }

    pub fn is_windows(&self) -> bool {
        self.0.contains("win")
    }

    /// Directory under `<home>/bin` holding this distribution
    pub fn install_dir_name(&self) -> String {
        format!("neo4j-community-{}", self.0)
    }

    /// Config file, relative to the install directory
    pub fn config_file(&self) -> PathBuf {
        if self.is_v3() {
            PathBuf::from("conf").join("neo4j.conf")
        } else {
            PathBuf::from("conf").join("neo4j-server.properties")
        }
    }

    pub fn binary_name(&self) -> &'static str {
        if self.is_windows() {
            "neo4j.bat"
        } else {
            "neo4j"
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        if self.is_windows() {
            StopSignal::Terminate
        } else {
            StopSignal::Hangup
        }
    }

    /// Stdout fragments announcing a started server.
    ///
    /// Launchers of either dialect can print either form, so both are
    /// accepted for every version.
    pub fn ready_markers(&self) -> &'static [&'static str] {
        READY_MARKERS
    }

    /// Stdout fragments announcing a completed shutdown, for every version
    pub fn shutdown_markers(&self) -> &'static [&'static str] {
        SHUTDOWN_MARKERS
    }

    /// Database directory relative to the server's data root
    pub fn db_location(port: u16) -> String {
        format!("data/graph.db.{}", port)
    }

    /// Properties that switch off HTTPS and, on 3.x, authentication
    pub fn security_properties(&self) -> Vec<(&'static str, String)> {
        if self.is_v3() {
            vec![
                ("dbms.connector.https.enabled", "false".to_string()),
                ("dbms.security.auth_enabled", "false".to_string()),
            ]
        } else {
            vec![(
                "org.neo4j.server.webserver.https.enabled",
                "false".to_string(),
            )]
        }
    }

    /// Properties binding the HTTP connector and database location to `port`
    pub fn http_properties(&self, port: u16) -> Vec<(&'static str, String)> {
        let db = Self::db_location(port);
        if self.is_v3() {
            vec![
                ("dbms.connector.http.address", format!("localhost:{}", port)),
                ("dbms.connector.http.listen_address", format!(":{}", port)),
                ("dbms.active_database", db),
            ]
        } else {
            vec![
                ("org.neo4j.server.webserver.port", port.to_string()),
                ("org.neo4j.server.database.location", db),
            ]
        }
    }

    /// Bolt connector properties; empty before 3.x
    pub fn bolt_properties(&self, bolt_port: u16) -> Vec<(&'static str, String)> {
        if !self.is_v3() {
            return Vec::new();
        }
        vec![
            (
                "dbms.connector.bolt.address",
                format!("localhost:{}", bolt_port),
            ),
            (
                "dbms.connector.bolt.listen_address",
                format!(":{}", bolt_port),
            ),
        ]
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerVersion {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}
