use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use neotestdb::{config, properties, Instance, InstanceOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;

#[derive(Parser)]
#[command(name = "neotestdb")]
#[command(version, about = "Throwaway Neo4j servers for integration tests", long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Install root containing bin/neo4j-community-<version>/
    #[clap(short = 'd', long, env = "NEOTESTDB_HOME")]
    home: Option<PathBuf>,

    /// Options file (TOML); command line flags take precedence
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Verbose logging, including server output
    #[clap(short = 'v', long)]
    verbose: bool,
}

#[derive(ClapArgs)]
struct ServerArgs {
    /// HTTP port (0 selects 6363)
    #[clap(short = 'p', long)]
    port: Option<u16>,

    /// Server version, e.g. 2.3.3 or 3.0.4
    #[clap(long = "server-version")]
    version: Option<String>,

    /// Bolt port, 3.x servers only
    #[clap(long)]
    bolt_port: Option<u16>,
}

#[derive(Subcommand)]
enum Command {
    /// Configure and start a server, stop it on Ctrl+C
    Start(ServerArgs),

    /// Patch the server config for the given ports without starting it
    Configure(ServerArgs),

    /// Set a single property in the server config
    SetProperty {
        /// Server version, e.g. 2.3.3 or 3.0.4
        #[clap(long = "server-version")]
        version: Option<String>,

        key: String,
        value: String,
    },

    /// Print active properties of the server config
    ShowConfig {
        /// Server version, e.g. 2.3.3 or 3.0.4
        #[clap(long = "server-version")]
        version: Option<String>,
    },

    /// Show status of servers started with `start`
    Status,

    /// Stop all servers started with `start`
    Stop,

    /// Delete the database directory of a server
    Clean {
        #[clap(flatten)]
        server: ServerArgs,

        /// Force cleanup without confirmation
        #[clap(long)]
        force: bool,
    },

    /// Write default options to a TOML file
    InitConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut base = match &args.config {
        Some(path) => {
            info!("Loading options from: {}", path.display());
            config::read_config::<InstanceOptions>(path).await?
        }
        None => InstanceOptions::default(),
    };
    if let Some(home) = args.home {
        base.home = home;
    }

    match args.command {
        Command::Start(server) => {
            let mut instance = Instance::new(server.apply(base))?;
            let info = instance.start().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);

            info!("Use Ctrl+C to stop the server");
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");

            instance.stop().await?;
        }
        Command::Configure(server) => {
            let instance = Instance::new(server.apply(base))?;
            info!("Configured {}", instance.config_location().display());
            info!("  • HTTP: {}", instance.url());
            if let Some(bolt) = instance.bolt_url() {
                info!("  • Bolt: {}", bolt);
            }
        }
        Command::SetProperty {
            version,
            key,
            value,
        } => {
            let path = config_path(&base, version);
            if !properties::set_property(&path, &key, &value)? {
                anyhow::bail!("{} has no entry for {}", path.display(), key);
            }
            info!("Set {}={} in {}", key, value, path.display());
        }
        Command::ShowConfig { version } => {
            let path = config_path(&base, version);
            let props = properties::read_properties(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            for (key, value) in props {
                println!("{}={}", key, value);
            }
        }
        Command::Status => {
            cli::status(&base.home).await?;
        }
        Command::Stop => {
            cli::stop(&base.home).await?;
        }
        Command::Clean { server, force } => {
            let instance = Instance::open(server.apply(base))?;
            cli::clean(&instance, force).await?;
        }
        Command::InitConfig { path } => {
            config::write_config(&base, &path).await?;
            info!("Wrote options to {}", path.display());
        }
    }

    Ok(())
}

impl ServerArgs {
    fn apply(self, mut options: InstanceOptions) -> InstanceOptions {
        if self.port.is_some() {
            options.port = self.port;
        }
        if let Some(version) = self.version {
            options.version = version;
        }
        if self.bolt_port.is_some() {
            options.bolt_port = self.bolt_port;
        }
        options
    }
}

fn config_path(base: &InstanceOptions, version: Option<String>) -> PathBuf {
    let version = neotestdb::ServerVersion::new(version.unwrap_or_else(|| base.version.clone()));
    base.home
        .join("bin")
        .join(version.install_dir_name())
        .join(version.config_file())
}
