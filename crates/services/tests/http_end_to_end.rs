use std::sync::Arc;
use std::time::Duration;

use learn_core::model::{AnswerValue, Identity, ModuleId, ProgressDelta, QuizId, UserId};
use learn_core::time::fixed_clock;
use services::{
    AppServices, HttpProgressStore, PushOutcome, StaticCatalog, StaticIdentity, SyncConfig,
    TrackerError, ViewLifetime,
};
use storage::kv::InMemoryKeyValueStore;
use storage::repository::Storage;
use tokio::net::TcpListener;
use url::Url;

const MODULE: ModuleId = ModuleId::new(4);
const QUIZ: QuizId = QuizId::new(40);

async fn spawn_server() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve_on(listener, Storage::in_memory()));
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn client(base: &Url, user: u64) -> AppServices {
    let config = SyncConfig {
        api_base_url: Some(base.clone()),
        identity: Identity::User(UserId::new(user)),
        ..SyncConfig::default()
    };
    let http = HttpProgressStore::new(base.clone(), Duration::from_secs(5)).unwrap();
    AppServices::assemble(
        &config,
        &StaticIdentity(config.identity),
        Arc::new(InMemoryKeyValueStore::new()),
        Some(Arc::new(http.clone())),
        Some(Arc::new(http)),
        Arc::new(StaticCatalog::uniform(5).with_quiz(QUIZ, MODULE, 2)),
        fixed_clock(),
    )
}

#[tokio::test]
async fn progress_round_trips_through_the_server() {
    let base = spawn_server().await;
    let phone = client(&base, 1);
    let laptop = client(&base, 1);
    let view = ViewLifetime::new();

    let pushed = phone
        .reconciler()
        .push(MODULE, ProgressDelta::complete_section(1, 5), &view)
        .await;
    assert!(pushed.is_persisted());

    let pulled = laptop.reconciler().pull(MODULE, &view).await;
    assert_eq!(pulled.section_max(), 2);
    assert!(pulled.is_section_completed(1));

    laptop.reconciler().reset(MODULE).await;
    let after_reset = phone.reconciler().pull(MODULE, &view).await;
    // The phone's mirror still holds the old value; pull merges, never lowers.
    assert_eq!(after_reset.section_max(), 2);
    assert_eq!(
        laptop.reconciler().pull(MODULE, &view).await.section_max(),
        1
    );
}

#[tokio::test]
async fn users_do_not_see_each_other() {
    let base = spawn_server().await;
    let alice = client(&base, 1);
    let bob = client(&base, 2);
    let view = ViewLifetime::new();

    alice
        .reconciler()
        .push(MODULE, ProgressDelta::unlock_through(4), &view)
        .await;
    assert_eq!(bob.reconciler().pull(MODULE, &view).await.section_max(), 1);
}

#[tokio::test]
async fn completion_is_recorded_once_across_devices() {
    let base = spawn_server().await;
    let phone = client(&base, 1);
    let laptop = client(&base, 1);

    let tracker = phone.tracker();
    tracker
        .submit_answer(QUIZ, 0, "Q1", AnswerValue::Choice(2), AnswerValue::Choice(2))
        .unwrap();
    tracker
        .submit_answer(
            QUIZ,
            1,
            "Q2",
            AnswerValue::Text("Paris ".into()),
            AnswerValue::Text("paris".into()),
        )
        .unwrap();
    let completion = tracker.complete_quiz(QUIZ, 2).await.unwrap();
    assert_eq!(completion.total_questions(), 2);

    assert!(laptop.tracker().is_already_completed(QUIZ).await);
    match laptop.tracker().complete_quiz(QUIZ, 0).await {
        Err(TrackerError::AlreadyCompleted(summary)) => assert_eq!(summary.to_string(), "2/2"),
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }

    // The quiz closes section 2, which unlocks section 3.
    let progress = laptop.reconciler().pull(MODULE, &ViewLifetime::new()).await;
    assert!(progress.is_section_completed(2));
    assert_eq!(progress.section_max(), 3);
}

#[tokio::test]
async fn unreachable_server_keeps_local_progress() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    drop(listener);

    let services = client(&base, 1);
    let view = ViewLifetime::new();
    let outcome = services
        .reconciler()
        .push(MODULE, ProgressDelta::unlock_through(3), &view)
        .await;
    assert!(matches!(outcome, PushOutcome::Pending { .. }));
    assert_eq!(services.reconciler().pull(MODULE, &view).await.section_max(), 3);
}
