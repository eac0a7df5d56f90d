//! Binary entrypoint for the Twilight BBS server.
//!
//! Commands:
//! - `start [--config <path>]` - run the BBS server
//! - `init [--config <path>]` - write a default configuration file
//! - `hash-password` - read a password from stdin and print its Argon2id hash

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use twilightbbs::config::Config;
use twilightbbs::server::BbsServer;

#[derive(Parser)]
#[command(name = "twilightbbs")]
#[command(about = "A multi-node BBS server with Telnet and SSH access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS server
    Start,
    /// Write a default configuration file
    Init,
    /// Hash a password for manual account fixes (reads from stdin)
    HashPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting Twilight BBS v{}", env!("CARGO_PKG_VERSION"));

            let server = BbsServer::new(config).await?;
            server.run().await
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            if tokio::fs::metadata(&cli.config).await.is_ok() {
                eprintln!("Config file {} already exists; not overwriting.", cli.config);
                std::process::exit(1);
            }
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
            Ok(())
        }
        Commands::HashPassword => {
            let mut password = String::new();
            std::io::stdin().read_line(&mut password)?;
            let password = password.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                eprintln!("Empty password");
                std::process::exit(1);
            }
            println!("{}", twilightbbs::user::hash_password(password)?);
            Ok(())
        }
    }
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();

    let base_level = match verbosity {
        0 => config
            .map(|c| c.logging.level.parse().unwrap_or(log::LevelFilter::Info))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    // Tee to the configured log file alongside the console.
    let log_file = config.and_then(|c| c.logging.file.clone()).and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    if let Some(file) = log_file {
        let file = std::sync::Arc::new(std::sync::Mutex::new(file));
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
            writeln!(fmt, "{}", line)
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }

    let _ = builder.try_init();
}
