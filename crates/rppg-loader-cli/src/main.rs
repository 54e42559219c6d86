use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rppg_loader::{LoaderConfig, SessionRegistry, SubjectFolderDataset};

#[derive(Parser)]
#[command(name = "rppg-loader", about = "Inspect rPPG datasets")]
struct Cli {
    /// TOML configuration file; environment overrides apply either way
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered sessions and their validity
    Sessions { root: PathBuf },
    /// Print the video/reference overlap window of a session
    Window { root: PathBuf, key: String },
    /// Estimate heart rate over a sync-time window
    Hr {
        root: PathBuf,
        key: String,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long, default_value_t = 10.0)]
        duration: f64,
    },
}

fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = "rppg_loader=info".parse() {
        filter = filter.add_directive(d);
    }
    fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<LoaderConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(LoaderConfig::from_file_with_env(path)?),
        None => {
            let mut config = LoaderConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn open(root: PathBuf, config: LoaderConfig) -> SessionRegistry {
    let dataset = SubjectFolderDataset::with_ffmpeg(root, &config.video);
    SessionRegistry::new(dataset, config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.cmd {
        Commands::Sessions { root } => {
            let registry = open(root, config);
            let keys = registry.session_keys()?;
            info!("{}: {} sessions", registry.title(), keys.len());
            for key in keys {
                let escaped = registry.escaped_key(&key)?.unwrap_or_default();
                let valid = registry.session(&key)?.is_some();
                println!("{}\t{}\t{}", key, escaped, if valid { "valid" } else { "invalid" });
            }
        }
        Commands::Window { root, key } => {
            let registry = open(root, config);
            let session = registry
                .session(&key)?
                .ok_or_else(|| format!("session '{}' is missing or invalid", key))?;
            match session.cross_sync()? {
                Some(window) => println!("{}", serde_json::to_string_pretty(&window)?),
                None => warn!("session '{}' has no reference channel", key),
            }
        }
        Commands::Hr {
            root,
            key,
            start,
            duration,
        } => {
            let registry = open(root, config);
            let session = registry
                .session(&key)?
                .ok_or_else(|| format!("session '{}' is missing or invalid", key))?;
            match session.estimate_hr(start, duration)? {
                Some(bpm) => println!("{:.1}", bpm),
                None => {
                    warn!("no heart rate for [{}, {}]", start, start + duration);
                    println!("unknown");
                }
            }
        }
    }
    Ok(())
}
