//! habsync - follow sitemap pages of a home automation server
//!
//! This is the binary entry point. All synchronization logic lives in the
//! workspace crates.

mod headless;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::eyre;
use habsync_client::Credentials;
use habsync_engine::config::{default_config_path, init_config_file};

use headless::runner::{run_headless, RunOptions};

/// habsync - keep sitemap pages in sync and print their updates as NDJSON
#[derive(Parser, Debug)]
#[command(name = "habsync")]
#[command(about = "Follow sitemap pages and print their updates as NDJSON", long_about = None)]
struct Args {
    /// Server base URL, e.g. http://openhab:8080
    #[arg(value_name = "BASE_URL", required_unless_present = "init_config")]
    base_url: Option<String>,

    /// Sitemap whose homepage to follow (default: the first one)
    #[arg(long)]
    sitemap: Option<String>,

    /// Additional page URL to follow (repeatable)
    #[arg(long = "page", value_name = "URL")]
    pages: Vec<String>,

    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Configuration file (default: <config dir>/habsync/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the server's sitemaps and exit
    #[arg(long)]
    list_sitemaps: bool,

    /// Write a commented default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if args.init_config {
        let path = args
            .config
            .or_else(default_config_path)
            .ok_or_else(|| eyre!("no configuration directory available, pass --config"))?;
        init_config_file(&path)?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    habsync_core::logging::init()?;

    let base_url = args
        .base_url
        .ok_or_else(|| eyre!("BASE_URL is required"))?;
    let credentials = args.username.map(|username| Credentials {
        username,
        password: args.password,
    });

    run_headless(RunOptions {
        base_url,
        credentials,
        sitemap: args.sitemap,
        pages: args.pages,
        config_path: args.config,
        list_sitemaps: args.list_sitemaps,
    })
    .await?;
    Ok(())
}
