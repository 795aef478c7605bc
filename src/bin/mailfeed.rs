use anyhow::{Result, anyhow};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::thread;

use mailfeed::config::{Config, load_config};
use mailfeed::daemon::run_daemon;
use mailfeed::domain::address::sanitize_feed_name;
use mailfeed::feed::publish_all;
use mailfeed::fetch::run_fetch;
use mailfeed::mail::imap_client::{ImapMailbox, Mailbox};
use mailfeed::reader::{describe_sender, find_article};
use mailfeed::server::serve;
use mailfeed::store::repo::MessageRepository;
use mailfeed::store::sqlite::SqliteRepo;

#[derive(Parser)]
#[command(name = "mailfeed")]
#[command(about = "Turn newsletters in an IMAP mailbox into RSS feeds", long_about = None)]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the mailbox and serve the feeds until interrupted
    Run,

    /// Fetch new mail once
    Fetch {
        /// Re-render the feeds afterwards even if nothing changed
        #[arg(long)]
        render: bool,
    },

    /// Render every feed and the OPML index from the store
    Render,

    /// Serve feeds and reader pages only
    Serve,

    /// Show what the store holds
    Inspect {
        /// Sender address to list
        sender: Option<String>,
        /// GUID to look up for that sender
        guid: Option<String>,
    },
}

fn open_repo(cfg: &Config) -> Result<SqliteRepo> {
    Ok(SqliteRepo::open(&cfg.db_path())?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).map_err(|e| anyhow!("Configuration error: {e}"))?;

    match cli.cmd {
        Command::Run => {
            let server_cfg = cfg.clone();
            let server_repo = open_repo(&cfg)?;
            thread::spawn(move || {
                if let Err(e) = serve(&server_cfg, Box::new(server_repo)) {
                    error!("server stopped: {e:#}");
                }
            });

            let repo = open_repo(&cfg)?;
            run_daemon(&repo, &cfg)
        }

        Command::Fetch { render } => {
            let repo = open_repo(&cfg)?;
            let mut mailbox = ImapMailbox::connect(&cfg.credentials()?)?;
            let report = run_fetch(&repo, &mut mailbox, Local::now().date_naive(), Utc::now());
            mailbox.logout();
            let report = report?;
            println!(
                "{} found, {} new, {} duplicate, {} skipped",
                report.found, report.inserted, report.duplicates, report.skipped
            );
            if render || report.has_new_messages() {
                let published = publish_all(&repo, &cfg)?;
                println!("{} feeds written", published.written.len());
            }
            Ok(())
        }

        Command::Render => {
            let repo = open_repo(&cfg)?;
            let published = publish_all(&repo, &cfg)?;
            for path in &published.written {
                println!("{}", path.display());
            }
            for sender in &published.failed {
                eprintln!("failed: {sender}");
            }
            Ok(())
        }

        Command::Serve => {
            let repo = open_repo(&cfg)?;
            serve(&cfg, Box::new(repo))
        }

        Command::Inspect { sender, guid } => {
            let repo = open_repo(&cfg)?;
            inspect(&repo, &cfg, sender.as_deref(), guid.as_deref())
        }
    }
}

fn inspect(
    repo: &dyn MessageRepository,
    cfg: &Config,
    sender: Option<&str>,
    guid: Option<&str>,
) -> Result<()> {
    let sender = sender.map(str::to_lowercase);
    match (sender.as_deref(), guid) {
        (None, _) => {
            println!("database:        {}", cfg.db_path().display());
            println!("feed directory:  {}", cfg.feed_dir().display());
            println!("server base url: {}", cfg.server_baseurl.as_deref().unwrap_or("(none)"));
            println!("internal reader: {}", cfg.enable_internal_reader);
            println!("messages:        {}", repo.count()?);
            println!("last source id:  {}", repo.last_source_id()?);
            for s in repo.sender_summaries()? {
                println!("  {:>5}  {}  {}", s.count, s.latest.format("%Y-%m-%d"), s.sender);
            }
        }
        (Some(sender), None) => {
            let lines = describe_sender(repo, sender, cfg.max_item_per_feed, cfg.server_baseurl.as_deref())?;
            if lines.is_empty() {
                println!("no messages from {sender}");
            }
            for line in lines {
                println!("{line}");
            }
        }
        (Some(sender), Some(guid)) => {
            match find_article(repo, &sanitize_feed_name(sender), guid)? {
                Some(m) => println!("found #{} from {} ({})", m.source_id, m.sender, m.subject),
                None => println!("no message {guid} for {sender}"),
            }
        }
    }
    Ok(())
}
