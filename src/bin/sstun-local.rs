//! sstun local endpoint
//!
//! Usage: sstun-local [OPTIONS]
//!        sstun-local <localPort> <serverAddr> <serverPort> <password>
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Print an example configuration
//!   -h, --help           Print help information

use std::env;

use sstun::config::{ClientConfigFile, DEFAULT_LOCAL_PORT, DEFAULT_SERVER_PORT};
use sstun::{ClientConfig, Listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; respects RUST_LOG env var (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-g" | "--generate" => {
            generate_config()?;
        }
        "-c" | "--config" => {
            if args.len() < 3 {
                eprintln!("Error: --config requires a file path");
                return Ok(());
            }
            let config = load_config(&args[2])?;
            run_local(config).await?;
        }
        _ if args.len() == 5 => {
            let config = config_from_args(&args[1..])?;
            run_local(config).await?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"sstun-local - SOCKS5 front-end for an encrypted tunnel

USAGE:
    sstun-local [OPTIONS]
    sstun-local <localPort> <serverAddr> <serverPort> <password>

OPTIONS:
    -c, --config <FILE>  Path to configuration file
    -g, --generate       Print an example configuration
    -h, --help           Print help information

EXAMPLES:
    Generate a configuration:
        sstun-local --generate > local.toml

    Run from a configuration file:
        sstun-local --config local.toml

    Run with positional arguments:
        sstun-local {} relay.example.com {} hahaha
"#,
        DEFAULT_LOCAL_PORT, DEFAULT_SERVER_PORT
    );
}

fn generate_config() -> anyhow::Result<()> {
    let config = ClientConfig::new("relay.example.com", DEFAULT_SERVER_PORT, "change-me");
    let file = ClientConfigFile::from_config(&config);

    println!("# sstun local configuration");
    println!();
    println!("{}", file.to_toml()?);

    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<ClientConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = ClientConfigFile::from_toml(&content)?.to_config()?;
    Ok(config)
}

fn config_from_args(args: &[String]) -> anyhow::Result<ClientConfig> {
    let local_port: u16 = args[0]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid local port {:?}: {}", args[0], e))?;
    let server_port: u16 = args[2]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server port {:?}: {}", args[2], e))?;

    let config = ClientConfig::new(args[1].as_str(), server_port, args[3].as_str())
        .with_local(sstun::config::DEFAULT_LOCAL_ADDR, local_port);
    config.validate()?;
    Ok(config)
}

async fn run_local(config: ClientConfig) -> anyhow::Result<()> {
    let listener = Listener::bind(&config).await?;
    let shutdown = listener.shutdown_handle();
    let metrics = listener.metrics();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.trigger();
        }
    });

    listener.run().await?;

    tracing::info!("\n{}", metrics.format_report());
    Ok(())
}
