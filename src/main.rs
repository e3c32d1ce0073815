use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sludre_lib::settings::{default_settings_path, load_settings};
use sludre_lib::{AppError, ModelManager};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Action,

    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hub repository id, e.g. syvai/hviske-v2
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Root folder for cached downloads
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Use (or download into) this folder instead of the cache
    #[arg(long, global = true, value_name = "DIR")]
    manual_path: Option<String>,

    /// Hub access token (falls back to HF_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Action {
    /// Find the model locally or download it, converting when needed
    Ensure,
    /// Find the model locally; never downloads
    Resolve,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            if let AppError::Model(model_err) = &err {
                eprintln!("{}", model_err.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<PathBuf, AppError> {
    let config_path = args.config.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&config_path)?;

    if let Some(repo) = args.repo {
        settings.model_repo_id = repo;
    }
    if let Some(cache_dir) = args.cache_dir {
        settings.model_cache_dir = Some(cache_dir);
    }
    if let Some(manual_path) = args.manual_path {
        settings.manual_model_path = Some(manual_path);
    }
    if let Some(token) = args.token {
        settings.hf_token = Some(token);
    }

    let identity = settings.identity();
    log::info!("Preparing model {:?}", identity);

    let manager = ModelManager::new(identity)
        .with_notifier(Arc::new(|message: &str| eprintln!("{message}")));

    let path = match args.command {
        Action::Ensure => manager.ensure_model_available()?,
        Action::Resolve => manager.resolve_existing_model_path()?,
    };
    Ok(path)
}
