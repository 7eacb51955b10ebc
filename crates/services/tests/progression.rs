use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use learn_core::model::{
    AnswerValue, Identity, ModuleId, ProgressDelta, ProgressRecord, QuizId, UserId,
};
use learn_core::time::fixed_clock;
use services::{
    AppServices, AttentionSignal, PushOutcome, StaticCatalog, StaticIdentity, SyncConfig,
    TrackerError, ViewLifetime,
};
use storage::kv::InMemoryKeyValueStore;
use storage::repository::{InMemoryRepository, ProgressStore, StorageError};

const MODULE: ModuleId = ModuleId::new(1);
const QUIZ: QuizId = QuizId::new(10);

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::uniform(3).with_quiz(QUIZ, MODULE, 1))
}

fn config() -> SyncConfig {
    SyncConfig {
        identity: Identity::User(UserId::new(1)),
        ..SyncConfig::default()
    }
}

fn device_with(progress: Arc<dyn ProgressStore>, repo: &InMemoryRepository) -> AppServices {
    let config = config();
    AppServices::assemble(
        &config,
        &StaticIdentity(config.identity),
        Arc::new(InMemoryKeyValueStore::new()),
        Some(progress),
        Some(Arc::new(repo.clone())),
        catalog(),
        fixed_clock(),
    )
}

fn device(repo: &InMemoryRepository) -> AppServices {
    device_with(Arc::new(repo.clone()), repo)
}

fn record(max: u32, completed: &[u32]) -> ProgressRecord {
    ProgressRecord::new(max, completed.iter().copied()).unwrap()
}

/// Delays every durable call so tests can end a view mid-flight.
struct SlowStore {
    inner: InMemoryRepository,
    delay: Duration,
}

#[async_trait]
impl ProgressStore for SlowStore {
    async fn fetch_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_progress(user, module).await
    }

    async fn merge_progress(
        &self,
        user: UserId,
        module: ModuleId,
        delta: &ProgressDelta,
    ) -> Result<ProgressRecord, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.merge_progress(user, module, delta).await
    }

    async fn reset_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<ProgressRecord, StorageError> {
        self.inner.reset_progress(user, module).await
    }
}

#[tokio::test]
async fn progress_never_decreases_without_reset() {
    let repo = InMemoryRepository::new();
    let phone = device(&repo);
    let laptop = device(&repo);
    let view = ViewLifetime::new();

    let mut last = 0;
    let steps = [
        (&phone, ProgressDelta::unlock_through(3)),
        (&laptop, ProgressDelta::unlock_through(2).with_completed(1)),
        (&phone, ProgressDelta::complete_section(1, 3)),
        (&laptop, ProgressDelta::unlock_through(1)),
    ];
    for (services, delta) in steps {
        let pushed = services.reconciler().push(MODULE, delta, &view).await;
        assert!(pushed.record().section_max() >= last);
        last = pushed.record().section_max();
        let pulled = services.reconciler().pull(MODULE, &view).await;
        assert!(pulled.section_max() >= last);
        last = pulled.section_max();
    }
    assert_eq!(laptop.reconciler().pull(MODULE, &view).await, record(3, &[1]));
}

#[tokio::test]
async fn divergent_devices_converge_by_merge() {
    let repo = InMemoryRepository::new();
    let phone = device(&repo);
    let view = ViewLifetime::new();
    phone
        .reconciler()
        .push(MODULE, ProgressDelta::from(&record(3, &[1, 2])), &view)
        .await;

    let laptop = device(&repo);
    repo.set_available(false);
    let offline = laptop
        .reconciler()
        .push(MODULE, ProgressDelta::from(&record(2, &[1])), &view)
        .await;
    assert!(matches!(offline, PushOutcome::Pending { .. }));
    repo.set_available(true);

    assert_eq!(laptop.reconciler().pull(MODULE, &view).await, record(3, &[1, 2]));
}

#[tokio::test]
async fn gates_follow_pulled_progress() {
    let repo = InMemoryRepository::new();
    let services = device(&repo);
    let view = ViewLifetime::new();
    services
        .reconciler()
        .push(MODULE, ProgressDelta::from(&record(2, &[1])), &view)
        .await;

    let pulled = services.reconciler().pull(MODULE, &view).await;
    let gates = services.gates().module(MODULE, &pulled).unwrap();
    assert!(gates[0].is_completed && !gates[0].locked);
    assert!(gates[1].is_next && !gates[1].locked);
    assert!(gates[2].locked);
}

#[tokio::test]
async fn reset_wins_over_stale_mirror() {
    let repo = InMemoryRepository::new();
    let services = device(&repo);
    let view = ViewLifetime::new();
    services
        .reconciler()
        .push(MODULE, ProgressDelta::complete_section(2, 3), &view)
        .await;

    services.reconciler().reset(MODULE).await;
    assert_eq!(
        services.reconciler().pull(MODULE, &view).await,
        ProgressRecord::reset()
    );
}

#[tokio::test]
async fn failed_pull_without_mirror_serves_start_section() {
    let repo = InMemoryRepository::new();
    repo.set_available(false);
    let services = device(&repo);

    let pulled = services
        .reconciler()
        .pull(MODULE, &ViewLifetime::new())
        .await;
    assert_eq!(pulled, record(1, &[]));
}

#[tokio::test]
async fn quiz_scenario_scores_two_of_three() {
    let repo = InMemoryRepository::new();
    let services = device(&repo);
    let tracker = services.tracker();

    tracker.begin_attempt(QUIZ, Some(3)).await.unwrap();
    for (index, (given, want)) in [(true, true), (false, false), (true, false)]
        .into_iter()
        .enumerate()
    {
        tracker
            .submit_answer(
                QUIZ,
                u32::try_from(index).unwrap(),
                format!("Statement {index}"),
                AnswerValue::Flag(given),
                AnswerValue::Flag(want),
            )
            .unwrap();
    }

    let completion = tracker.complete_quiz(QUIZ, 2).await.unwrap();
    assert_eq!((completion.score(), completion.total_questions()), (2, 3));
    assert!(tracker.is_already_completed(QUIZ).await);
    assert_eq!(
        tracker.completion_summary(QUIZ).await.unwrap().to_string(),
        "2/3"
    );

    let flags = tracker.snapshot(QUIZ).unwrap().correct_flags();
    assert_eq!(flags, vec![true, true, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_completions_persist_once() {
    let repo = InMemoryRepository::new();
    let services = device(&repo);
    let tracker = services.tracker();
    tracker
        .submit_answer(QUIZ, 0, "Q", AnswerValue::Flag(true), AnswerValue::Flag(true))
        .unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.complete_quiz(QUIZ, 1).await })
        })
        .collect();

    let mut completed = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => completed += 1,
            Err(TrackerError::AlreadyCompleted(summary)) => {
                assert_eq!(summary.score, 1);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((completed, rejected), (1, 3));
    assert_eq!(repo.completion_count(), 1);
}

#[tokio::test]
async fn completion_race_between_devices_keeps_first() {
    let repo = InMemoryRepository::new();
    let phone = device(&repo);
    let laptop = device(&repo);

    // Both open the quiz before either finishes.
    phone.tracker().begin_attempt(QUIZ, Some(2)).await.unwrap();
    laptop.tracker().begin_attempt(QUIZ, Some(2)).await.unwrap();

    phone.tracker().complete_quiz(QUIZ, 2).await.unwrap();
    let second = laptop.tracker().complete_quiz(QUIZ, 0).await;
    match second {
        Err(TrackerError::AlreadyCompleted(summary)) => assert_eq!(summary.score, 2),
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }
    assert_eq!(repo.completion_count(), 1);
}

#[tokio::test]
async fn ending_the_view_discards_in_flight_pull() {
    let repo = InMemoryRepository::new();
    repo.merge_progress(UserId::new(1), MODULE, &ProgressDelta::unlock_through(3))
        .await
        .unwrap();
    let slow = Arc::new(SlowStore {
        inner: repo.clone(),
        delay: Duration::from_millis(200),
    });
    let services = device_with(slow, &repo);
    let reconciler = services.reconciler();
    let view = ViewLifetime::new();

    let pull = {
        let reconciler = Arc::clone(&reconciler);
        let view = view.clone();
        tokio::spawn(async move { reconciler.pull(MODULE, &view).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    view.end();

    let pulled = pull.await.unwrap();
    assert_eq!(pulled, record(1, &[]));
    assert_eq!(reconciler.snapshot(MODULE), None);
}

#[tokio::test]
async fn background_push_returns_optimistic_value_first() {
    let repo = InMemoryRepository::new();
    let slow = Arc::new(SlowStore {
        inner: repo.clone(),
        delay: Duration::from_millis(50),
    });
    let services = device_with(slow, &repo);
    let reconciler = services.reconciler();

    let (optimistic, task) =
        reconciler.spawn_push(MODULE, ProgressDelta::unlock_through(2), ViewLifetime::new());
    assert_eq!(optimistic, record(2, &[]));
    assert_eq!(reconciler.current(MODULE), record(2, &[]));

    assert!(task.await.unwrap().is_persisted());
    assert_eq!(
        repo.fetch_progress(UserId::new(1), MODULE).await.unwrap(),
        Some(record(2, &[]))
    );
}

#[tokio::test]
async fn attention_signal_triggers_pull() {
    let repo = InMemoryRepository::new();
    let services = device(&repo);
    let signal = AttentionSignal::new();
    let view = ViewLifetime::new();
    let handle = services
        .reconciler()
        .refresh_on(MODULE, &signal, view.clone());
    let mut updates = handle.subscribe();
    assert_eq!(handle.latest(), record(1, &[]));

    // Another session raises the durable record.
    repo.merge_progress(UserId::new(1), MODULE, &ProgressDelta::unlock_through(3))
        .await
        .unwrap();
    signal.notify();

    tokio::time::timeout(Duration::from_secs(1), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.latest().section_max(), 3);

    view.end();
    tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn push_reaches_the_store_after_its_view_ends() {
    let repo = InMemoryRepository::new();
    let slow = Arc::new(SlowStore {
        inner: repo.clone(),
        delay: Duration::from_millis(100),
    });
    let services = device_with(slow, &repo);
    let reconciler = services.reconciler();
    let view = ViewLifetime::new();

    let (optimistic, task) =
        reconciler.spawn_push(MODULE, ProgressDelta::complete_section(2, 3), view.clone());
    assert_eq!(optimistic, record(3, &[2]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.end();

    assert!(matches!(task.await.unwrap(), PushOutcome::Discarded(_)));
    assert_eq!(
        repo.fetch_progress(UserId::new(1), MODULE).await.unwrap(),
        Some(record(3, &[2]))
    );

    let laptop = device(&repo);
    let pulled = laptop.reconciler().pull(MODULE, &ViewLifetime::new()).await;
    assert_eq!(pulled, record(3, &[2]));
}

#[tokio::test]
async fn reset_waits_for_in_flight_push() {
    let repo = InMemoryRepository::new();
    let slow = Arc::new(SlowStore {
        inner: repo.clone(),
        delay: Duration::from_millis(100),
    });
    let services = device_with(slow, &repo);
    let reconciler = services.reconciler();

    let (_, task) =
        reconciler.spawn_push(MODULE, ProgressDelta::unlock_through(3), ViewLifetime::new());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(reconciler.reset(MODULE).await, ProgressRecord::reset());
    assert!(matches!(task.await.unwrap(), PushOutcome::Discarded(_)));
    assert_eq!(
        repo.fetch_progress(UserId::new(1), MODULE).await.unwrap(),
        Some(ProgressRecord::reset())
    );
    assert_eq!(
        reconciler.pull(MODULE, &ViewLifetime::new()).await,
        ProgressRecord::reset()
    );
}

#[tokio::test]
async fn push_during_pull_survives_the_merge() {
    let repo = InMemoryRepository::new();
    repo.merge_progress(
        UserId::new(1),
        MODULE,
        &ProgressDelta::unlock_through(2).with_completed(1),
    )
    .await
    .unwrap();
    let slow = Arc::new(SlowStore {
        inner: repo.clone(),
        delay: Duration::from_millis(100),
    });
    let services = device_with(slow, &repo);
    let reconciler = services.reconciler();

    let pull = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.pull(MODULE, &ViewLifetime::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (optimistic, push) =
        reconciler.spawn_push(MODULE, ProgressDelta::unlock_through(3), ViewLifetime::new());
    assert_eq!(optimistic, record(3, &[]));

    assert_eq!(pull.await.unwrap(), record(3, &[1]));
    assert!(push.await.unwrap().is_persisted());
    assert_eq!(reconciler.current(MODULE), record(3, &[1]));
    assert_eq!(
        repo.fetch_progress(UserId::new(1), MODULE).await.unwrap(),
        Some(record(3, &[1]))
    );
}
