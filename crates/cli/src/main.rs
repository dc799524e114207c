use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sdbot::config::{self, Config};
use sdbot::dingtalk::DingTalkClient;
use sdbot::progress::ProgressReporter;
use sdbot::{IncomingMessage, MessageKind, ReplyCoordinator, ReplyState};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sdbot")]
#[command(about = "Deliver image-generation replies to DingTalk conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SDBOT_CONFIG_PATH or ~/.sdbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the card business id derived from a chatbot message.
    CardId {
        /// Chatbot callback message (JSON)
        #[arg(long, short, value_name = "FILE")]
        message: PathBuf,
    },

    /// Create or update the progress card for a chatbot message.
    Progress {
        /// Config file path (default: SDBOT_CONFIG_PATH or ~/.sdbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Chatbot callback message (JSON)
        #[arg(long, short, value_name = "FILE")]
        message: PathBuf,

        /// Progress label shown on the card (e.g. "40%")
        #[arg(long)]
        label: Option<String>,

        /// Number of placeholder images
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Create the card instead of updating it
        #[arg(long)]
        new: bool,

        /// Elapsed seconds shown in the footer
        #[arg(long, default_value_t = 0.0)]
        elapsed: f64,
    },

    /// Deliver generated images as the final reply to a chatbot message.
    Reply {
        /// Config file path (default: SDBOT_CONFIG_PATH or ~/.sdbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Chatbot callback message (JSON)
        #[arg(long, short, value_name = "FILE")]
        message: PathBuf,

        /// Image file; repeat for several images (1 or 4 for markdown replies)
        #[arg(long = "image", short, value_name = "FILE", required = true)]
        images: Vec<PathBuf>,

        /// "card" or "markdown" (default from config)
        #[arg(long)]
        kind: Option<MessageKind>,

        /// Elapsed seconds to report (default: measured from start of this command)
        #[arg(long)]
        elapsed: Option<f64>,

        /// Skip creating the progress card before a card reply (the card must already exist)
        #[arg(long)]
        no_progress: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("sdbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::CardId { message }) => run_card_id(&message),
        Some(Commands::Progress {
            config,
            message,
            label,
            count,
            new,
            elapsed,
        }) => run_progress(config, &message, label, count, new, elapsed).await,
        Some(Commands::Reply {
            config,
            message,
            images,
            kind,
            elapsed,
            no_progress,
        }) => run_reply(config, &message, &images, kind, elapsed, no_progress).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    if config::init_config(&path)? {
        println!("initialized configuration at {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

fn load_message(path: &Path) -> anyhow::Result<IncomingMessage> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading message from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing message from {}", path.display()))
}

fn run_card_id(message: &Path) -> anyhow::Result<()> {
    let msg = load_message(message)?;
    println!("{}", msg.card_biz_id());
    Ok(())
}

/// Build a coordinator from config; Ctrl-C abandons in-flight calls.
fn build_coordinator(config: &Config) -> anyhow::Result<Arc<ReplyCoordinator>> {
    let client = Arc::new(DingTalkClient::new(config).context("building dingtalk client")?);
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, abandoning pending requests");
            on_signal.cancel();
        }
    });
    Ok(Arc::new(
        ReplyCoordinator::from_client(config, client).with_cancellation(cancel),
    ))
}

fn finished(state: ReplyState) -> anyhow::Result<()> {
    match state {
        ReplyState::Aborted | ReplyState::Failed => anyhow::bail!("reply not delivered ({:?})", state),
        other => {
            println!("{:?}", other);
            Ok(())
        }
    }
}

async fn run_progress(
    config_path: Option<PathBuf>,
    message: &Path,
    label: Option<String>,
    count: usize,
    new: bool,
    elapsed: f64,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let msg = load_message(message)?;
    let coordinator = build_coordinator(&config)?;
    let state = coordinator
        .reply_progress(new, label.as_deref(), count, elapsed, &msg)
        .await;
    finished(state)
}

async fn run_reply(
    config_path: Option<PathBuf>,
    message: &Path,
    image_paths: &[PathBuf],
    kind: Option<MessageKind>,
    elapsed: Option<f64>,
    no_progress: bool,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let kind = kind.unwrap_or(config.reply.message_type);
    let msg = load_message(message)?;
    let coordinator = build_coordinator(&config)?;
    let reporter = ProgressReporter::new(coordinator.clone(), msg, 0, image_paths.len());

    if kind == MessageKind::Card && !no_progress {
        let state = reporter.start().await;
        if state != ReplyState::CardNew {
            log::warn!("progress card not created ({:?}), continuing", state);
        }
    }

    let mut images = Vec::with_capacity(image_paths.len());
    for path in image_paths {
        let img = image::open(path).with_context(|| format!("opening image {}", path.display()))?;
        images.push(img);
    }
    log::info!("loaded {} image(s), replying as {}", images.len(), kind);

    let state = match elapsed {
        Some(secs) => coordinator.reply(kind, &images, secs, reporter.message()).await,
        None => reporter.finish(kind, &images).await,
    };
    finished(state)
}
