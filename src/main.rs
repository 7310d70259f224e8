use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use post_archiver::browser::chromium::ChromiumLauncher;
use post_archiver::{Archiver, ArchiverBuilder, ProxyConfig, StdinOperator};
use tracing_subscriber::EnvFilter;

/// Archive Patreon, Fanbox and Substack posts to Markdown.
#[derive(Parser, Debug)]
#[command(name = "post-archiver", version, about)]
struct Cli {
    /// Output directory
    #[arg(short, long)]
    dir: PathBuf,

    /// Feed or single post URL
    #[arg(short, long)]
    url: String,

    /// Year to extract; required for Patreon feeds
    #[arg(short, long)]
    year: Option<String>,

    /// Stop once already-archived posts show up
    #[arg(long)]
    update: bool,

    /// Restart from the last feed position after failures
    #[arg(long)]
    recover: bool,

    /// Proxy server, e.g. http://host:8080
    #[arg(long, env = "ARCHIVER_PROXY")]
    server: Option<String>,

    /// Proxy username
    #[arg(long, env = "ARCHIVER_PROXY_USER")]
    username: Option<String>,

    /// Proxy password
    #[arg(long, env = "ARCHIVER_PROXY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Chrome executable to launch
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "post_archiver=debug"
    } else {
        "post_archiver=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let proxy = cli.server.map(|server| ProxyConfig {
        server,
        username: cli.username,
        password: cli.password,
    });
    let config = match ArchiverBuilder::new(&cli.dir)
        .update_mode(cli.update)
        .proxy(proxy.clone())
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut launcher = ChromiumLauncher::new(proxy);
    if let Some(chrome) = cli.chrome {
        launcher = launcher.executable(chrome);
    }
    let archiver = Archiver::new(config, Arc::new(launcher), Arc::new(StdinOperator::new()));

    let year = cli.year.as_deref();
    let result = if cli.recover {
        archiver.run_with_recovery(&cli.url, year).await
    } else {
        archiver.run(&cli.url, year).await
    };
    match result {
        Ok(outcome) => {
            tracing::info!(
                "Archived to {}: {}",
                outcome.out_dir.display(),
                outcome.summary
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
