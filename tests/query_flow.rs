use anyhow::{anyhow, Result};
use epic_freebot::catalog::CatalogSource;
use epic_freebot::config::{self, Config};
use epic_freebot::formatter::Formatter;
use epic_freebot::handlers::{run_query, Replier, WORKING_MESSAGE};
use epic_freebot::model::CatalogEntry;
use epic_freebot::push::{run_push_check, PushOutcome};
use epic_freebot::push_state::PushState;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

fn load_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

#[derive(Clone, Default)]
struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

#[async_trait::async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch(&self) -> Vec<CatalogEntry> {
        self.entries.clone()
    }
}

#[derive(Clone, Default)]
struct RecordingReplier {
    sent: Arc<Mutex<Vec<String>>>,
    /// Number of sends that succeed before every later send fails.
    fail_after: Option<usize>,
}

impl RecordingReplier {
    fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Replier for RecordingReplier {
    async fn send_text(&self, text: &str) -> Result<()> {
        let mut sent = self.sent.lock().await;
        if let Some(limit) = self.fail_after {
            if sent.len() >= limit {
                sent.push(format!("<failed> {}", text));
                return Err(anyhow!("chat unavailable"));
            }
        }
        sent.push(text.to_string());
        Ok(())
    }
}

fn game(title: &str, discount: &str, current: bool, date: &str) -> CatalogEntry {
    let window = if current {
        json!({ "startDate": "2024-06-13T15:00:00.000Z", "endDate": date })
    } else {
        json!({ "startDate": date, "endDate": "2024-07-04T15:00:00.000Z" })
    };
    let (current_offers, upcoming_offers): (Value, Value) = if current {
        (json!([{ "promotionalOffers": [window] }]), json!([]))
    } else {
        (json!([]), json!([{ "promotionalOffers": [window] }]))
    };
    serde_json::from_value(json!({
        "title": title,
        "description": "desc",
        "seller": { "name": "Seller" },
        "customAttributes": [
            { "key": "developerName", "value": "Foo Inc" },
            { "key": "publisherName", "value": "Foo Inc" },
            { "key": "com.epicgames.app.productSlug", "value": title.to_lowercase() }
        ],
        "price": { "totalPrice": { "fmtPrice": { "originalPrice": "¥90.00", "discountPrice": discount } } },
        "promotions": {
            "promotionalOffers": current_offers,
            "upcomingPromotionalOffers": upcoming_offers
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn query_sends_ack_then_grouped_reply() {
    let cfg = load_config();
    let catalog = StaticCatalog {
        entries: vec![
            game("Later", "¥90.00", false, "2024-06-27T15:00:00.000Z"),
            game("Now", "0", true, "2024-06-20T17:00:00.000Z"),
            game("Discounted", "499", true, "2024-06-20T17:00:00.000Z"),
        ],
    };
    let replier = RecordingReplier::default();

    assert!(run_query(&catalog, &Formatter::from_config(&cfg), &replier).await);

    let sent = replier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], WORKING_MESSAGE);
    let reply = &sent[1];
    assert!(reply.starts_with(
        "🎮 发现 2 款Epic限免游戏：\n\n🆓 1 款游戏现在免费！\n\n⏰ 1 款游戏即将免费！\n\n"
    ));
    assert!(!reply.contains("Discounted"));
    let now_at = reply.find("🎮 Now").unwrap();
    let later_at = reply.find("🎮 Later").unwrap();
    assert!(now_at < later_at);
    assert!(reply.contains("🔗 https://store.epicgames.com/zh-CN/p/now\n"));
    assert!(reply.contains("⏰ 限免至 06月21日 01:00，戳上方链接领取吧~"));
    assert!(reply.contains("⏰ 即将于 06月27日 23:00 开始限免，记得关注哦~"));
    // Developer equals publisher, so only the publisher is named.
    assert!(reply.contains("🏢 由 Foo Inc 发行，"));
}

#[tokio::test]
async fn unavailable_catalog_reports_error_header() {
    let cfg = load_config();
    let replier = RecordingReplier::default();

    run_query(
        &StaticCatalog::default(),
        &Formatter::from_config(&cfg),
        &replier,
    )
    .await;

    assert_eq!(
        replier.sent().await,
        vec![WORKING_MESSAGE.to_string(), cfg.display.error_message.clone()]
    );
}

#[tokio::test]
async fn no_qualifying_games_sends_no_games_message() {
    let cfg = load_config();
    let catalog = StaticCatalog {
        entries: vec![game("Paid", "499", true, "2024-06-20T17:00:00.000Z")],
    };
    let replier = RecordingReplier::default();

    run_query(&catalog, &Formatter::from_config(&cfg), &replier).await;

    assert_eq!(replier.sent().await[1], "暂未找到正在促销的游戏...");
}

#[tokio::test]
async fn send_failure_is_reported_not_propagated() {
    let cfg = load_config();
    let catalog = StaticCatalog {
        entries: vec![game("Now", "0", true, "2024-06-20T17:00:00.000Z")],
    };
    let replier = RecordingReplier::failing_after(1);

    let ok = run_query(&catalog, &Formatter::from_config(&cfg), &replier).await;

    assert!(!ok);
    let sent = replier.sent().await;
    assert_eq!(sent[0], WORKING_MESSAGE);
    assert!(sent[1].starts_with("<failed> 🎮 发现 1 款"));
    assert_eq!(sent[2], "<failed> 查询失败：chat unavailable");
}

#[tokio::test]
async fn push_check_only_fires_on_change() {
    let td = tempfile::tempdir().unwrap();
    let mut cfg = load_config();
    cfg.app.data_dir = td.path().to_string_lossy().to_string();
    let formatter = Formatter::from_config(&cfg);
    let state = PushState::from_config(&cfg);

    let first = vec![game("Now", "0", true, "2024-06-20T17:00:00.000Z")];
    let bundle = formatter.format(&first).bundle();
    assert!(state.should_push(&bundle).await.unwrap());
    assert!(!state.should_push(&formatter.format(&first).bundle()).await.unwrap());

    let second = vec![
        game("Now", "0", true, "2024-06-20T17:00:00.000Z"),
        game("Later", "¥90.00", false, "2024-06-27T15:00:00.000Z"),
    ];
    assert!(state.should_push(&formatter.format(&second).bundle()).await.unwrap());
    assert_eq!(state.load().await.unwrap().len(), 3);
}

fn push_setup(td: &tempfile::TempDir) -> (Formatter, PushState) {
    let mut cfg = load_config();
    cfg.app.data_dir = td.path().to_string_lossy().to_string();
    (Formatter::from_config(&cfg), PushState::from_config(&cfg))
}

#[tokio::test]
async fn push_skips_unavailable_catalog_without_touching_state() {
    let td = tempfile::tempdir().unwrap();
    let (formatter, state) = push_setup(&td);
    let chat = RecordingReplier::default();

    let outcome = run_push_check(&StaticCatalog::default(), &formatter, &state, &[&chat], false)
        .await
        .unwrap();

    assert_eq!(outcome, PushOutcome::CatalogUnavailable);
    assert!(chat.sent().await.is_empty());
    assert!(!state.path().exists());
}

#[tokio::test]
async fn push_sends_changes_to_every_chat_once() {
    let td = tempfile::tempdir().unwrap();
    let (formatter, state) = push_setup(&td);
    let catalog = StaticCatalog {
        entries: vec![
            game("Now", "0", true, "2024-06-20T17:00:00.000Z"),
            game("Later", "¥90.00", false, "2024-06-27T15:00:00.000Z"),
        ],
    };
    let (a, b) = (RecordingReplier::default(), RecordingReplier::default());

    let outcome = run_push_check(&catalog, &formatter, &state, &[&a, &b], false)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Pushed { sent: 2, failed: 0 });
    let sent = a.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("🎮 发现 2 款Epic限免游戏："));
    assert_eq!(b.sent().await, sent);
    assert_eq!(state.load().await.unwrap().len(), 3);

    // Same catalog again: nothing goes out.
    let outcome = run_push_check(&catalog, &formatter, &state, &[&a, &b], false)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Unchanged);
    assert_eq!(a.sent().await.len(), 1);
    assert_eq!(b.sent().await.len(), 1);
}

#[tokio::test]
async fn dry_run_previews_without_recording() {
    let td = tempfile::tempdir().unwrap();
    let (formatter, state) = push_setup(&td);
    let catalog = StaticCatalog {
        entries: vec![game("Now", "0", true, "2024-06-20T17:00:00.000Z")],
    };
    let chat = RecordingReplier::default();

    let outcome = run_push_check(&catalog, &formatter, &state, &[&chat], true)
        .await
        .unwrap();

    match outcome {
        PushOutcome::Preview { changed, reply } => {
            assert!(changed);
            assert!(reply.contains("🎮 Now"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(chat.sent().await.is_empty());
    assert!(!state.path().exists());
}

#[tokio::test]
async fn failed_sends_are_counted_and_change_stays_recorded() {
    let td = tempfile::tempdir().unwrap();
    let (formatter, state) = push_setup(&td);
    let catalog = StaticCatalog {
        entries: vec![game("Now", "0", true, "2024-06-20T17:00:00.000Z")],
    };
    let (down, up) = (RecordingReplier::failing_after(0), RecordingReplier::default());

    let outcome = run_push_check(&catalog, &formatter, &state, &[&down, &up], false)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Pushed { sent: 1, failed: 1 });

    let td = tempfile::tempdir().unwrap();
    let (formatter, state) = push_setup(&td);
    let (x, y) = (RecordingReplier::failing_after(0), RecordingReplier::failing_after(0));
    let outcome = run_push_check(&catalog, &formatter, &state, &[&x, &y], false)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Pushed { sent: 0, failed: 2 });
    // The bundle was recorded before sending, so the next run sees no change.
    let outcome = run_push_check(&catalog, &formatter, &state, &[&x, &y], false)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Unchanged);
}
