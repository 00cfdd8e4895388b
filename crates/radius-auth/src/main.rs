use clap::Parser;
use radius_auth::{AuthOutcome, Config, RadiusClient};
use std::path::Path;
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_ACCEPTED: i32 = 0;
const EXIT_REJECTED: i32 = 1;
const EXIT_TIMED_OUT: i32 = 2;
const EXIT_ERROR: i32 = 3;

/// Check a username and password against the configured RADIUS servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radius_auth")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "radius-auth.json")]
    config: String,

    /// Validate configuration and exit (sends no requests)
    #[arg(short, long)]
    validate: bool,

    /// User-Name to authenticate
    #[arg(required_unless_present = "validate")]
    username: Option<String>,

    /// User-Password to authenticate
    #[arg(required_unless_present = "validate")]
    password: Option<String>,
}

/// Write an example configuration where none exists. No credentials were
/// checked, so the exit code is always an error.
fn create_example_config(path: &str) -> i32 {
    warn!("Could not find config file: {}", path);
    info!("Creating example configuration at: {}", path);
    if let Err(e) = Config::example().to_file(path) {
        error!("Error creating example config: {}", e);
        return EXIT_ERROR;
    }
    info!("Please edit {} and run again", path);
    EXIT_ERROR
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if !Path::new(&cli.config).exists() {
        tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(tracing_subscriber::fmt::layer())
            .init();

        process::exit(create_example_config(&cli.config));
    }

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration validation failed!");
            eprintln!("   Error: {}", e);
            process::exit(EXIT_ERROR);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Timeout: {} ms", config.timeout_ms);
        println!("  Attempts: {}", config.attempts);
        println!("  Retry policy: {:?}", config.retry_policy);
        println!("  Busy retry delay: {} ms", config.busy_retry_delay_ms);
        println!("  Log level: {}", config.log_level.as_deref().unwrap_or("info"));
        println!();
        println!("RADIUS servers:");
        for server in &config.servers {
            let nas = server.nas_identifier.as_deref().unwrap_or("(none)");
            println!(
                "  {} - {} (NAS-Identifier: {})",
                server.address,
                server.display_name(),
                nas
            );
        }
        process::exit(EXIT_ACCEPTED);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (Some(username), Some(password)) = (cli.username, cli.password) else {
        error!("USERNAME and PASSWORD are required");
        process::exit(EXIT_ERROR);
    };

    let client = match RadiusClient::start(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start RADIUS client: {}", e);
            process::exit(EXIT_ERROR);
        }
    };

    let outcome = client.authenticate(&username, &password).await;
    if let Err(e) = client.shutdown().await {
        warn!("Shutdown failed: {}", e);
    }

    let code = match outcome {
        Ok(AuthOutcome::Accepted) => {
            println!("Access-Accept for {}", username);
            EXIT_ACCEPTED
        }
        Ok(AuthOutcome::Rejected) => {
            println!("Access-Reject for {}", username);
            EXIT_REJECTED
        }
        Ok(AuthOutcome::TimedOut) => {
            println!("No response from any RADIUS server");
            EXIT_TIMED_OUT
        }
        Ok(outcome) => {
            println!("Authentication failed: {}", outcome);
            EXIT_ERROR
        }
        Err(e) => {
            error!("Authentication failed: {}", e);
            EXIT_ERROR
        }
    };

    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_not_an_accept() {
        let path = std::env::temp_dir().join(format!("radius-auth-example-{}.json", process::id()));
        let path = path.to_str().unwrap().to_string();

        assert_eq!(create_example_config(&path), EXIT_ERROR);
        assert_ne!(create_example_config(&path), EXIT_ACCEPTED);
        assert!(Config::from_file(&path).is_ok());

        std::fs::remove_file(&path).unwrap();
    }
}
