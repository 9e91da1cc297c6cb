//! Command line interface for operating the profile backend. Supports
//! initialization, serving the HTTP API, minting session tokens, and
//! running badge evaluation and stats from the shell.

mod config;
mod engagement;
mod model;
mod server;
mod storage;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use config::Settings;
use engagement::BadgePolicy;
use storage::Store;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "ridged",
    author,
    version,
    about = "File-backed backend for Ridge profile pages",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT`.
    Init,
    /// Launch the HTTP API.
    Serve {
        /// Log each request to stdout.
        #[arg(long)]
        verbose: bool,
    },
    /// Mint a session token for an identity and print it.
    Grant {
        /// Opaque user identity the token resolves to.
        #[arg(long)]
        identity: String,
    },
    /// Run badge evaluation for a profile and print newly earned badges.
    Award {
        /// Profile handle.
        handle: String,
    },
    /// Print engagement counters and badges for a profile.
    Stats {
        /// Profile handle.
        handle: String,
    },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init = cli.command {
        ensure_env_file(&cli.env)?;
    }
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.store_root.clone());
    let policy = BadgePolicy::from_settings(&cfg);

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("initialized store at {}", display_path(&cfg.store_root));
        }
        Commands::Serve { verbose } => {
            let addr: SocketAddr = cfg.bind_http.parse()?;
            println!("listening on http://{addr}");
            server::serve_http(
                addr,
                store,
                policy,
                cfg.top_referrers,
                verbose,
                shutdown_signal(),
            )
            .await?;
        }
        Commands::Grant { identity } => {
            let token = store.grant_session(&identity)?;
            println!("{token}");
        }
        Commands::Award { handle } => {
            let profile = store.profile_by_id(store.resolve_handle(&handle)?)?;
            let newly = engagement::evaluate_and_award(&store, &profile, &policy)?;
            if newly.is_empty() {
                println!("no new badges for {handle}");
            } else {
                for kind in newly {
                    println!("awarded {}", kind.as_str());
                }
            }
        }
        Commands::Stats { handle } => {
            let id = store.resolve_handle(&handle)?;
            let profile = store.profile_by_id(id)?;
            let stats = engagement::stats(&store, id, 0)?;
            let badges = engagement::display_badges(&store, &profile, &policy)?;
            println!("handle:          {}", profile.handle);
            println!("elements:        {}", store.element_count(id)?);
            println!("views:           {}", stats.view_count);
            println!("unique visitors: {}", stats.unique_visitors);
            println!("likes:           {}", stats.like_count);
            let names: Vec<&str> = badges.iter().map(|b| b.as_str()).collect();
            println!("badges:          {}", names.join(", "));
        }
    }
    Ok(())
}

/// Wait for Ctrl-C so `serve` can shut down gracefully.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("ridged-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("POPULAR_LIKES=10\n");
    content.push_str("TOP_REFERRERS=5\n");
    content.push_str("EXCLUSIVE_BADGES=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
