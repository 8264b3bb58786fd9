//! neotestdb - throwaway Neo4j servers for integration tests
//!
//! This library configures, starts and stops a Neo4j community server
//! unpacked under `<home>/bin/neo4j-community-<version>/`, giving each test
//! run its own ports and database directory.
//!
//! ```no_run
//! # async fn run() -> neotestdb::Result<()> {
//! use neotestdb::{Instance, InstanceOptions};
//!
//! let mut neo = Instance::new(InstanceOptions::new(6363).version("3.0.4"))?;
//! let info = neo.start().await?;
//! println!("{} {:?}", info.url, info.bolt_url);
//! neo.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod process;
pub mod properties;
pub mod version;

// Re-export commonly used types
pub use config::{defaults, read_config, write_config, InstanceOptions};
pub use error::{Error, Result};
pub use instance::{ConnectionInfo, Instance, InstanceState};
pub use properties::{read_properties, set_property};
pub use version::{ServerVersion, StopSignal, DEFAULT_VERSION, READY_MARKERS, SHUTDOWN_MARKERS};
