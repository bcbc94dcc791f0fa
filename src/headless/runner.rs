//! Headless mode runner - main event loop
//!
//! Probes the server, registers the requested pages with a
//! [`PageConnectionHolder`] and prints every page event until stdin asks to
//! quit or Ctrl+C arrives.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use habsync_client::{fetch_server_properties, Credentials, HttpClient};
use habsync_core::prelude::*;
use habsync_core::ServerProperties;
use habsync_engine::config::load_settings_or_default;
use habsync_engine::{PageConnectionHolder, SyncSettings};

use super::HeadlessEvent;

/// What to connect to and which pages to follow
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    /// Sitemap whose homepage is followed
    pub sitemap: Option<String>,
    /// Additional page URLs
    pub pages: Vec<String>,
    pub config_path: Option<PathBuf>,
    /// Print the sitemaps and exit
    pub list_sitemaps: bool,
}

/// Commands read from stdin, one per line
#[derive(Debug, Clone, PartialEq, Eq)]
enum StdinCommand {
    /// Force a reload of one page, or of all pages
    Reload(Option<String>),
    /// Re-deliver the cached snapshot of a page
    Refresh(String),
    Open(String),
    Close(String),
    Pause,
    Resume,
    Quit,
}

/// Run in headless mode - output JSON events on stdout
pub async fn run_headless(options: RunOptions) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("habsync starting in HEADLESS mode");
    info!("Server: {}", options.base_url);
    info!("═══════════════════════════════════════════════════════");

    let settings = load_settings_or_default(options.config_path.as_deref());
    let sync = SyncSettings::from(&settings);
    let user_agent = Some(settings.connection.user_agent.as_str()).filter(|ua| !ua.is_empty());

    let client = Arc::new(
        HttpClient::new(&options.base_url, options.credentials.clone(), user_agent)
            .context("Failed to create HTTP client")?,
    );

    let server = match fetch_server_properties(&*client, sync.plain_timeout).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server probe failed: {}", e);
            HeadlessEvent::error(format!("Server probe failed: {}", e), true).emit();
            return Err(e.into());
        }
    };

    HeadlessEvent::connected(client.base_url().as_str(), &server).emit();
    for sitemap in &server.sitemaps {
        HeadlessEvent::sitemap_listed(sitemap).emit();
    }
    if options.list_sitemaps {
        return Ok(());
    }

    let mut pages = match select_pages(&server, options.sitemap.as_deref(), &options.pages) {
        Ok(pages) => pages,
        Err(e) => {
            HeadlessEvent::error(e.to_string(), e.is_fatal()).emit();
            return Err(e);
        }
    };
    info!("Following {} page(s)", pages.len());

    let (mut holder, mut events) = PageConnectionHolder::new(server, sync);
    holder.update_active_connections(pages.as_slice(), Some(Arc::clone(&client)));
    holder.start();

    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(cmd_tx);
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => HeadlessEvent::from(&event).emit(),
                None => {
                    info!("Event channel closed");
                    break;
                }
            },
            Some(command) = cmd_rx.recv() => {
                if command == StdinCommand::Quit {
                    info!("Quit requested");
                    break;
                }
                apply_command(&mut holder, &mut pages, &client, command);
            }
            _ = &mut ctrl_c => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    holder.shutdown().await;
    info!("habsync headless mode exiting");
    Ok(())
}

/// Homepage of the chosen sitemap (the first one when none is named and no
/// explicit pages are given) followed by the explicit pages.
fn select_pages(
    server: &ServerProperties,
    sitemap: Option<&str>,
    extra: &[String],
) -> Result<Vec<String>> {
    let mut pages = Vec::new();
    match sitemap {
        Some(name) => {
            let sitemap = server
                .sitemap(name)
                .ok_or_else(|| Error::config(format!("unknown sitemap '{}'", name)))?;
            pages.push(sitemap.homepage_link.clone());
        }
        None if extra.is_empty() => {
            let sitemap = server
                .sitemaps
                .first()
                .ok_or_else(|| Error::config("server has no sitemaps"))?;
            info!("No sitemap given, using '{}'", sitemap.name);
            pages.push(sitemap.homepage_link.clone());
        }
        None => {}
    }

    for page in extra {
        if !pages.contains(page) {
            pages.push(page.clone());
        }
    }
    Ok(pages)
}

fn apply_command(
    holder: &mut PageConnectionHolder<HttpClient>,
    pages: &mut Vec<String>,
    client: &Arc<HttpClient>,
    command: StdinCommand,
) {
    match command {
        StdinCommand::Reload(Some(url)) => holder.trigger_update(&url, true),
        StdinCommand::Reload(None) => {
            for url in pages.iter() {
                holder.trigger_update(url, true);
            }
        }
        StdinCommand::Refresh(url) => holder.trigger_update(&url, false),
        StdinCommand::Open(url) => {
            if !pages.contains(&url) {
                pages.push(url);
                holder.update_active_connections(pages.as_slice(), Some(Arc::clone(client)));
            }
        }
        StdinCommand::Close(url) => {
            pages.retain(|page| *page != url);
            holder.update_active_connections(pages.as_slice(), Some(Arc::clone(client)));
        }
        StdinCommand::Pause => holder.stop(false),
        StdinCommand::Resume => holder.start(),
        StdinCommand::Quit => {}
    }
}

fn parse_command(line: &str) -> Option<StdinCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let arg = parts.next().map(str::to_string);

    match (command, arg) {
        ("r" | "reload", url) => Some(StdinCommand::Reload(url)),
        ("u" | "update", Some(url)) => Some(StdinCommand::Refresh(url)),
        ("o" | "open", Some(url)) => Some(StdinCommand::Open(url)),
        ("c" | "close", Some(url)) => Some(StdinCommand::Close(url)),
        ("p" | "pause", None) => Some(StdinCommand::Pause),
        ("s" | "resume", None) => Some(StdinCommand::Resume),
        ("q" | "quit", None) => Some(StdinCommand::Quit),
        _ => {
            warn!("Unknown stdin command: {}", line.trim());
            None
        }
    }
}

/// Forward stdin commands to the event loop (blocking version)
fn spawn_stdin_reader_blocking(cmd_tx: mpsc::Sender<StdinCommand>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let Some(command) = parse_command(&line) else {
                    continue;
                };
                let quit = command == StdinCommand::Quit;
                if cmd_tx.blocking_send(command).is_err() || quit {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use habsync_core::{ServerFlags, Sitemap};

    const HOME: &str = "http://demo:8080/rest/sitemaps/demo/demo";
    const OTHER_HOME: &str = "http://demo:8080/rest/sitemaps/other/other";
    const KITCHEN: &str = "http://demo:8080/rest/sitemaps/demo/0001";

    fn sitemap(name: &str, homepage: &str) -> Sitemap {
        Sitemap {
            name: name.to_string(),
            label: name.to_string(),
            link: None,
            icon: None,
            homepage_link: homepage.to_string(),
        }
    }

    fn server() -> ServerProperties {
        ServerProperties::new(
            ServerFlags::JSON_REST_API,
            vec![sitemap("demo", HOME), sitemap("other", OTHER_HOME)],
        )
    }

    #[test]
    fn test_select_pages_defaults_to_first_sitemap() {
        let pages = select_pages(&server(), None, &[]).unwrap();
        assert_eq!(pages, vec![HOME.to_string()]);
    }

    #[test]
    fn test_select_pages_named_sitemap_and_extras() {
        let extra = vec![KITCHEN.to_string(), OTHER_HOME.to_string()];
        let pages = select_pages(&server(), Some("other"), &extra).unwrap();
        assert_eq!(pages, vec![OTHER_HOME.to_string(), KITCHEN.to_string()]);
    }

    #[test]
    fn test_select_pages_explicit_pages_only() {
        let pages = select_pages(&server(), None, &[KITCHEN.to_string()]).unwrap();
        assert_eq!(pages, vec![KITCHEN.to_string()]);
    }

    #[test]
    fn test_select_pages_errors() {
        let err = select_pages(&server(), Some("missing"), &[]).unwrap_err();
        assert!(err.to_string().contains("missing"));

        let empty = ServerProperties::new(ServerFlags::JSON_REST_API, Vec::new());
        assert!(select_pages(&empty, None, &[]).is_err());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("r"), Some(StdinCommand::Reload(None)));
        assert_eq!(
            parse_command("reload  http://x/a"),
            Some(StdinCommand::Reload(Some("http://x/a".to_string())))
        );
        assert_eq!(
            parse_command("u http://x/a"),
            Some(StdinCommand::Refresh("http://x/a".to_string()))
        );
        assert_eq!(
            parse_command("open http://x/b"),
            Some(StdinCommand::Open("http://x/b".to_string()))
        );
        assert_eq!(
            parse_command("c http://x/b"),
            Some(StdinCommand::Close("http://x/b".to_string()))
        );
        assert_eq!(parse_command("pause"), Some(StdinCommand::Pause));
        assert_eq!(parse_command("s"), Some(StdinCommand::Resume));
        assert_eq!(parse_command(" q "), Some(StdinCommand::Quit));
    }

    #[test]
    fn test_parse_command_rejects_malformed() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("open"), None);
        assert_eq!(parse_command("q now"), None);
        assert_eq!(parse_command("jump"), None);
    }
}
