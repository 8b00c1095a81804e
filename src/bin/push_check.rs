use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use epic_freebot::catalog::CatalogClient;
use epic_freebot::config;
use epic_freebot::formatter::Formatter;
use epic_freebot::handlers::{ChatReplier, Replier};
use epic_freebot::push::{run_push_check, PushOutcome};
use epic_freebot::push_state::PushState;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fetch free games once and push to the configured chats if anything changed"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the message instead of sending it; the push state is left untouched
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let catalog = CatalogClient::from_config(&cfg.epic)?;
    let formatter = Formatter::from_config(&cfg);
    let state = PushState::from_config(&cfg);

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let chats: Vec<ChatReplier<'_>> = cfg
        .telegram
        .push_chats
        .iter()
        .map(|chat| ChatReplier::new(&bot, ChatId(*chat)))
        .collect();
    let targets: Vec<&dyn Replier> = chats.iter().map(|c| c as &dyn Replier).collect();

    match run_push_check(&catalog, &formatter, &state, &targets, args.dry_run).await? {
        PushOutcome::Preview { reply, .. } => println!("{}", reply),
        PushOutcome::Pushed { failed, .. } if failed > 0 && failed == targets.len() => {
            anyhow::bail!("failed to push to all {} chats", failed)
        }
        _ => {}
    }
    Ok(())
}
