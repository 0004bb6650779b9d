use std::{env, io::Read};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use spate::{
    config::{self, Config, Telemetry},
    generator::{self, Generator},
    transport::{self, Client},
};
use tokio::{runtime::Builder, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize spate config: {0}")]
    Config(#[from] config::Error),
    #[error("Spate generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Transport could not be created: {0}")]
    Transport(#[from] transport::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/spate/spate.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run spate with specified configuration
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    if let Ok(env_var_value) = env::var("SPATE_CONFIG") {
        debug!("Using config from env var 'SPATE_CONFIG'");
        Ok(env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {}", config_path);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .open(config_path)
            .map_err(|err| {
                error!("Could not read config file '{}': {}", config_path, err);
                err
            })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

fn get_config(config_path: &str) -> Result<Config, Error> {
    let contents = load_config_contents(config_path)?;
    Config::parse(&contents).map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::Config(err)
    })
}

// Everything a run needs is built here so that configuration mistakes surface
// from `config-check` as well as `run`.
fn validate_config(config_path: &str) -> Result<Config, Error> {
    let config = get_config(config_path)?;
    let transport = Client::new(&config.generator.transport)?;
    Generator::new(&config.generator, transport)?;
    info!("Configuration file is valid");
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus {
        addr,
        global_labels,
    }) = config.telemetry
    {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
    }

    let transport = Client::new(&config.generator.transport)?;
    let generator = Generator::new(&config.generator, transport)?;

    tokio::select! {
        res = generator.spin() => {
            res?;
        }
        _ = signal::ctrl_c() => {
            info!("Received interrupt, exiting.");
        }
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting spate {version} run.");

    let cli = Cli::parse();
    let config_path = match cli.command {
        Commands::Run(run_cmd) => run_cmd.config_path,
        Commands::ConfigCheck(config_check_cmd) => {
            match validate_config(&config_check_cmd.config_path) {
                Ok(_) => std::process::exit(0),
                Err(_) => std::process::exit(1),
            }
        }
    };
    let config = get_config(&config_path)?;

    let runtime = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    runtime.block_on(inner_main(config))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn run_defaults_config_path() {
        let cli = Cli::try_parse_from(["spate", "run"]).unwrap();
        let Commands::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.config_path, "/etc/spate/spate.yaml");
    }

    #[test]
    fn config_check_takes_a_path() {
        let cli = Cli::try_parse_from(["spate", "config-check", "--config-path", "/tmp/s.yaml"])
            .unwrap();
        let Commands::ConfigCheck(check) = cli.command else {
            panic!("expected config-check");
        };
        assert_eq!(check.config_path, "/tmp/s.yaml");
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["spate"]).is_err());
    }
}
