use clap::{Parser, Subcommand};
use lectern::cache::{CacheManager, DownloadSession, DownloadState, Progress};
use lectern::config::Config;
use lectern::entitlement::{AccessReason, EntitlementGate};
use lectern::render::{ViewerBundle, ViewerSettings, Viewport};
use miette::{IntoDiagnostic, miette};
use std::fmt::Debug;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lectern", version, about = "Fetch, gate and bundle documents for reading")]
struct Cli {
    /// Configuration file (defaults to lectern.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a document into the cache (or report the cached copy)
    Fetch {
        url: String,
        /// Local file name to cache under instead of the URL's basename
        #[arg(long)]
        name: Option<String>,
    },
    /// Show whether a document is cached
    Cached { name: String },
    /// Delete every cached document and partial download
    ClearCache,
    /// Check whether a series is readable
    Access {
        series: String,
        /// Check for this user instead of the anonymous identity
        #[arg(long)]
        user: Option<String>,
    },
    /// Write a self-contained viewer page embedding a local document
    Bundle {
        file: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the effective configuration (JSON)
    Config,
}

fn report(err: impl Debug) -> miette::Report {
    miette!("{err:?}")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path())),
        None => Config::load(),
    }
    .map_err(report)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Command::Fetch { url, name } => {
            let cache = CacheManager::from_config(&config.cache).map_err(report)?;
            let entry = cache.ensure_cached_with_progress(&url, name.as_deref(), print_progress).await;
            eprintln!();
            let entry = entry.map_err(report)?;
            println!("{} ({} bytes)", entry.local_path.display(), entry.size_bytes);
        },
        Command::Cached { name } => {
            let cache = CacheManager::from_config(&config.cache).map_err(report)?;
            match cache.is_cached(&name).await.map_err(report)? {
                Some(entry) => println!("{} ({} bytes)", entry.local_path.display(), entry.size_bytes),
                None => {
                    println!("not cached");
                    std::process::exit(1);
                },
            }
        },
        Command::ClearCache => {
            let cache = CacheManager::from_config(&config.cache).map_err(report)?;
            cache.clear_cache().await.map_err(report)?;
            println!("cleared {}", cache.root().display());
        },
        Command::Access { series, user } => {
            let gate = EntitlementGate::from_config(&config.entitlement).map_err(report)?;
            if let Some(user) = user
                && let Err(err) = gate.login(&user).await
            {
                tracing::warn!(error = ?err, "Login lookup failed");
            }
            let decision = gate.check_access(Some(&series)).await;
            let reason = match &decision.reason {
                AccessReason::Ungated => "not part of a series".to_string(),
                AccessReason::Entitled { key } => format!("entitled by `{key}`"),
                AccessReason::NotEntitled => "no matching entitlement".to_string(),
                AccessReason::ProviderUnavailable => "entitlement provider unavailable".to_string(),
            };
            println!("series {series}: {} ({reason})", if decision.granted { "unlocked" } else { "locked" });
            if !decision.granted {
                std::process::exit(2);
            }
        },
        Command::Bundle { file, out } => {
            let document = tokio::fs::read(&file).await.into_diagnostic()?;
            let settings = ViewerSettings::new(&config.render, Viewport::default());
            let html = ViewerBundle::inline(&document, &settings).map_err(report)?;
            tokio::fs::write(&out, html).await.into_diagnostic()?;
            println!("{}", out.display());
        },
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config).into_diagnostic()?);
        },
    }
    Ok(())
}

fn print_progress(session: &DownloadSession) {
    let line = match (session.state, session.progress) {
        (DownloadState::Completed, _) => format!("{}: done, {} bytes", session.cache_key, session.received_bytes),
        (DownloadState::Failed, _) => format!("{}: failed", session.cache_key),
        (_, Progress::Fraction(fraction)) => format!("{}: {:>5.1}%", session.cache_key, fraction * 100.0),
        (_, Progress::Indeterminate) => format!("{}: {} bytes", session.cache_key, session.received_bytes),
    };
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r{line:<60}");
    let _ = stderr.flush();
}
