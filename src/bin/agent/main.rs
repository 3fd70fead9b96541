mod face;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trends_agent::{Brain, BrowserOptions, BrowserSession, Compiler, Config, Driver, Model};

#[derive(Parser)]
#[command(name = "agent")]
#[command(about = "Compile a visual trends report from an image search site")]
#[command(version)]
struct Cli {
    /// What to search for; prompted for when omitted
    query: Option<String>,

    /// Serve the web UI and take queries from it instead
    #[arg(long)]
    serve: bool,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Source site to search (overrides WEB_CRAWL_URL)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Maximum number of results to describe (overrides MAX_PAGES_FOR_CRAWLING)
    #[arg(long, value_name = "N")]
    max_pages: Option<usize>,

    /// Write the report here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Attach to a running Chrome's DevTools endpoint instead of launching one
    #[arg(long, env = "CHROME_ATTACH_URL", value_name = "URL")]
    attach: Option<String>,

    /// Chrome executable to launch
    #[arg(long, env = "CHROME_PATH", value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut config = Config::from_env()?;
    if let Some(url) = &cli.url {
        config.web_crawl_url = url.clone();
    }
    if let Some(max_pages) = cli.max_pages {
        config.max_pages_for_crawling = max_pages;
    }
    config.validate()?;

    let options = BrowserOptions {
        headless: cli.headless,
        attach_url: cli.attach.clone(),
        chrome_path: cli.chrome.clone(),
        width: config.display_width,
        height: config.display_height,
    };
    info!("[Agent] Launching Chrome...");
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&options))
        .await
        .context("browser launch panicked")??;
    info!("[Agent] Chrome ready.");

    let driver: Arc<dyn Driver> = Arc::new(session);
    let model: Arc<dyn Model> = Arc::new(Brain::new(&config)?);
    let compiler = Compiler::new(&config, driver, model);

    if cli.serve {
        return serve(compiler).await;
    }

    let query = match cli.query {
        Some(query) => query,
        None => prompt_query().await?,
    };

    tokio::select! {
        run = compiler.compile(&query) => write_report(&run.report, cli.out.as_deref())?,
        _ = tokio::signal::ctrl_c() => warn!("[Agent] Interrupted, run aborted"),
    }
    Ok(())
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn prompt_query() -> Result<String> {
    let query = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
        eprint!("Enter your trends query: ");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .context("reading the query panicked")??;

    anyhow::ensure!(!query.is_empty(), "no query given");
    Ok(query)
}

fn write_report(report: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, report)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("[Agent] Report written to {}", path.display());
        }
        None => println!("{report}"),
    }
    Ok(())
}

/// Take queries from the web UI one at a time until Ctrl-C.
async fn serve(compiler: Compiler) -> Result<()> {
    let (mut queries, events) = face::start_server().await?;
    let compiler = compiler.with_events(events);
    info!("[Agent] Waiting for queries...");

    loop {
        let query = tokio::select! {
            query = queries.recv() => match query {
                Some(query) => query,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        info!("[Agent] Received query: '{}'", query);
        tokio::select! {
            run = compiler.compile(&query) => {
                info!("[Agent] Finished '{}' with {} description(s)", query, run.analyses.len());
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("[Agent] Interrupted, run aborted");
                break;
            }
        }
    }

    info!("[Agent] Shutting down");
    Ok(())
}
