//! Fake Neo4j installs for lifecycle tests
//!
//! Each install is a temp dir laid out like `<home>/bin/neo4j-community-<v>/`
//! whose `bin/neo4j` is a shell script standing in for the server.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use neotestdb::{ServerVersion, READY_MARKERS, SHUTDOWN_MARKERS};
use tempfile::TempDir;

/// Serialises script writes and spawns within this test binary. Forking
/// while another thread still holds a freshly written script open makes
/// exec fail with ETXTBSY.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct FakeInstall {
    pub home: TempDir,
    pub version: ServerVersion,
}

impl FakeInstall {
    pub fn server_dir(&self) -> PathBuf {
        self.home
            .path()
            .join("bin")
            .join(self.version.install_dir_name())
    }

    /// File the script writes the name of the signal it received to
    pub fn signal_file(&self) -> PathBuf {
        self.server_dir().join("signal")
    }

    pub fn received_signal(&self) -> Option<String> {
        std::fs::read_to_string(self.signal_file())
            .ok()
            .map(|s| s.trim().to_string())
    }
}

/// A server that announces readiness and shuts down cleanly on HUP/TERM
pub fn well_behaved(version: &str) -> FakeInstall {
    let v = ServerVersion::new(version);
    // each dialect prints its own form
    let dialect = usize::from(v.is_v3());
    let ready = READY_MARKERS[dialect];
    let shutdown = SHUTDOWN_MARKERS[dialect];
    install(
        version,
        &format!(
            r#"here=$(cd "$(dirname "$0")/.." && pwd)
trap 'echo HUP > "$here/signal"; echo "2016-09-01 12:00:01.000+0000 INFO  {shutdown}"; exit 0' HUP
trap 'echo TERM > "$here/signal"; echo "2016-09-01 12:00:01.000+0000 INFO  {shutdown}"; exit 0' TERM
echo "2016-09-01 12:00:00.000+0000 INFO  Starting..."
echo "2016-09-01 12:00:00.500+0000 INFO  {ready} at http://localhost:7474/"
while true; do sleep 0.1; done
"#
        ),
    )
}

/// Install a fake server running `body` as its launcher script
pub fn install(version: &str, body: &str) -> FakeInstall {
    let home = tempfile::tempdir().expect("create temp home");
    let version = ServerVersion::new(version);
    let fake = FakeInstall { home, version };

    let server = fake.server_dir();
    std::fs::create_dir_all(server.join("bin")).unwrap();
    std::fs::create_dir_all(server.join("conf")).unwrap();

    write_config(&server, &fake.version);
    std::fs::write(
        server.join("bin").join(fake.version.binary_name()),
        format!("#!/bin/sh\n{}", body),
    )
    .unwrap();

    fake
}

fn write_config(server: &Path, version: &ServerVersion) {
    let conf = if version.is_v3() {
        "\
# Neo4j configuration
#dbms.active_database=graph.db
#dbms.security.auth_enabled=false
# dbms.connector.bolt.address=0.0.0.0:7687
#dbms.connector.bolt.listen_address=:7687
#dbms.connector.http.address=0.0.0.0:7474
# dbms.connector.http.listen_address=:7474
dbms.connector.https.enabled=true
"
    } else {
        "\
# Neo4j server configuration
org.neo4j.server.database.location=data/graph.db
org.neo4j.server.webserver.port=7474
org.neo4j.server.webserver.https.enabled=true
"
    };
    std::fs::write(server.join(version.config_file()), conf).unwrap();
}
