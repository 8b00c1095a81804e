use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::catalog::CatalogSource;
use crate::formatter::Formatter;
use crate::handlers::{compose_reply, Replier};
use crate::push_state::PushState;

/// What a single push check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The catalog came back empty; the stored bundle was left alone.
    CatalogUnavailable,
    /// The bundle matches the last push.
    Unchanged,
    /// Dry run: the message that would be sent, and whether it differs from
    /// the stored bundle.
    Preview { changed: bool, reply: String },
    /// The bundle changed and was sent to every target.
    Pushed { sent: usize, failed: usize },
}

/// Fetch once, and when the rendered bundle differs from the last push,
/// record it and send the reply to every target.
///
/// The new bundle is persisted before sending, so a run where every send
/// fails is not retried by the next run.
#[instrument(skip_all, fields(targets = targets.len(), dry_run))]
pub async fn run_push_check(
    source: &dyn CatalogSource,
    formatter: &Formatter,
    state: &PushState,
    targets: &[&dyn Replier],
    dry_run: bool,
) -> Result<PushOutcome> {
    let entries = source.fetch().await;
    if entries.is_empty() {
        warn!("catalog unavailable, skipping push check");
        return Ok(PushOutcome::CatalogUnavailable);
    }

    let formatted = formatter.format(&entries);
    let bundle = formatted.bundle();
    let reply = compose_reply(&formatted);

    if dry_run {
        let changed = state.load().await? != bundle;
        info!(changed, games = formatted.game_count(), "dry run");
        return Ok(PushOutcome::Preview { changed, reply });
    }

    if !state.should_push(&bundle).await? {
        info!("free games unchanged since last push");
        return Ok(PushOutcome::Unchanged);
    }

    if targets.is_empty() {
        warn!("push state updated but there are no push targets");
    }

    let mut failed = 0usize;
    for (idx, target) in targets.iter().enumerate() {
        if let Err(err) = target.send_text(&reply).await {
            failed += 1;
            error!(?err, target = idx, "failed to push free games");
        }
    }
    let sent = targets.len() - failed;

    if failed > 0 && sent == 0 {
        error!(
            failed,
            "every push target failed; this change is recorded and will not be pushed again"
        );
    } else {
        info!(sent, failed, games = formatted.game_count(), "push check completed");
    }
    Ok(PushOutcome::Pushed { sent, failed })
}
