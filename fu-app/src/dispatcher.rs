//! Delivers due follow-ups.
//!
//! One pass selects due records oldest promise first, claims each one with a
//! lease, and runs answer generation, composition and delivery per record with
//! bounded parallelism. Per-record failures are isolated; a failed store query
//! aborts the pass with a zeroed report.
//!
//! Every per-record write reads the clock when it happens. The lease is
//! renewed right before delivery, which also drops records cancelled while
//! their message was being prepared.

use crate::answer::{AnswerGenerator, AnswerRequest};
use crate::composer::Composer;
use crate::config::DispatchConfig;
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use fu_store::{
    FollowUpMetadata, FollowUpRecord, FollowUpStatus, FollowUpStore, MessageSink,
    OutboundMessage, ProfileDirectory,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// One dispatch pass. The scheduler loop only knows this seam.
#[async_trait::async_trait]
pub trait DispatchPass: Send + Sync {
    async fn run_pass(&self) -> DispatchReport;
}

/// Time source for selection, leases and delivery stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub batch_limit: usize,
    pub concurrency: usize,
    pub claim_lease: Duration,
}

impl DispatchSettings {
    pub fn from_config(cfg: &DispatchConfig) -> Self {
        Self {
            batch_limit: cfg.batch_limit.max(1),
            concurrency: cfg.concurrency.max(1),
            claim_lease: Duration::seconds(
                i64::try_from(cfg.claim_lease_seconds)
                    .unwrap_or(300)
                    .min(86_400),
            ),
        }
    }

    /// Upper bound for preparing one message; half the lease leaves room to deliver.
    fn preparation_budget(&self) -> std::time::Duration {
        (self.claim_lease / 2)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(150))
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Failed,
    Skipped,
}

pub struct Dispatcher {
    store: Arc<dyn FollowUpStore>,
    profiles: Arc<dyn ProfileDirectory>,
    sink: Arc<dyn MessageSink>,
    answers: Arc<AnswerGenerator>,
    composer: Composer,
    settings: DispatchSettings,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn FollowUpStore>,
        profiles: Arc<dyn ProfileDirectory>,
        sink: Arc<dyn MessageSink>,
        answers: Arc<AnswerGenerator>,
        composer: Composer,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            profiles,
            sink,
            answers,
            composer,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn dispatch_due(&self) -> DispatchReport {
        let now = self.clock.now();
        let due = match self
            .store
            .due_follow_ups(now, self.settings.batch_limit)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "due follow-up query failed; skipping pass");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport {
            processed: due.len(),
            ..DispatchReport::default()
        };
        if due.is_empty() {
            tracing::debug!("no due follow-ups");
            return report;
        }

        let outcomes: Vec<Outcome> =
            futures_util::stream::iter(due.into_iter().map(|record| self.process_one(record)))
                .buffered(self.settings.concurrency)
                .collect()
                .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Sent => report.sent = report.sent.saturating_add(1),
                Outcome::Failed => report.failed = report.failed.saturating_add(1),
                Outcome::Skipped => report.skipped = report.skipped.saturating_add(1),
            }
        }

        tracing::info!(
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "dispatch pass finished"
        );
        report
    }

    #[tracing::instrument(level = "debug", skip_all, fields(follow_up_id = %record.id))]
    async fn process_one(&self, record: FollowUpRecord) -> Outcome {
        let token = uuid::Uuid::new_v4().to_string();
        let claimed_at = self.clock.now();
        let lease_until = claimed_at + self.settings.claim_lease;
        match self
            .store
            .claim(&record.id, &token, claimed_at, lease_until)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("record claimed elsewhere or no longer pending");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(error = %e, "claim failed; leaving record for the next pass");
                return Outcome::Skipped;
            }
        }

        let budget = self.settings.preparation_budget();
        let content = match tokio::time::timeout(budget, self.build_message(&record)).await {
            Ok(Ok(content)) => content,
            Ok(Err(reason)) => return self.fail(&record, &token, &reason).await,
            Err(_) => {
                let reason = format!("message preparation timed out after {budget:?}");
                return self.fail(&record, &token, &reason).await;
            }
        };

        let renewed_at = self.clock.now();
        match self
            .store
            .renew_claim(
                &record.id,
                &token,
                renewed_at,
                renewed_at + self.settings.claim_lease,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("record cancelled or taken over before delivery; not sent");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(error = %e, "lease renewal failed; leaving record for the next pass");
                return Outcome::Skipped;
            }
        }

        let message = OutboundMessage {
            content,
            metadata: FollowUpMetadata::for_record(&record),
        };
        let message_id = match self.sink.deliver(&record.conversation_id, message).await {
            Ok(id) => id,
            Err(e) => {
                let reason = format!("delivery failed: {e}");
                return self.fail(&record, &token, &reason).await;
            }
        };

        match self
            .store
            .mark_sent(&record.id, &token, &message_id, self.clock.now())
            .await
        {
            Ok(true) => {
                tracing::info!(message_id = %message_id, "follow-up sent");
                Outcome::Sent
            }
            Ok(false) => {
                tracing::warn!(
                    message_id = %message_id,
                    "follow-up delivered but record left pending state concurrently"
                );
                Outcome::Skipped
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message_id,
                    error = %e,
                    "follow-up delivered but status update failed"
                );
                Outcome::Failed
            }
        }
    }

    async fn build_message(&self, record: &FollowUpRecord) -> Result<String, String> {
        let profile = self
            .profiles
            .recipient(&record.conversation_id, &record.user_id)
            .await
            .map_err(|e| format!("recipient lookup failed: {e}"))?
            .ok_or_else(|| "recipient profile not found".to_string())?;

        let request = AnswerRequest {
            question_summary: record.user_question_summary.clone(),
            topic: record.detected_topic,
            urgency: record.urgency_level,
        };
        let answer = self.answers.generate(&request).await;
        let first_name = profile.greeting_name().unwrap_or_default();
        Ok(self
            .composer
            .compose(record, first_name, &answer, self.clock.now()))
    }

    async fn fail(&self, record: &FollowUpRecord, token: &str, reason: &str) -> Outcome {
        match self
            .store
            .record_failure(&record.id, token, reason, self.clock.now())
            .await
        {
            Ok(Some(outcome)) => {
                if outcome.status == FollowUpStatus::Failed {
                    tracing::error!(
                        retry_count = outcome.retry_count,
                        reason,
                        "follow-up failed permanently"
                    );
                } else {
                    tracing::warn!(
                        retry_count = outcome.retry_count,
                        reason,
                        "follow-up attempt failed; will retry"
                    );
                }
                Outcome::Failed
            }
            Ok(None) => {
                tracing::debug!(reason, "failure not recorded; record left pending state");
                Outcome::Skipped
            }
            Err(e) => {
                tracing::error!(error = %e, reason, "could not record follow-up failure");
                Outcome::Failed
            }
        }
    }
}

#[async_trait::async_trait]
impl DispatchPass for Dispatcher {
    async fn run_pass(&self) -> DispatchReport {
        self.dispatch_due().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::BusinessHours;
    use chrono::TimeZone;
    use fu_store::{
        CancelOutcome, ConversationId, FailureOutcome, FollowUpId, FollowUpStats, MAX_RETRIES,
        MessageId, NewFollowUp, Profile, SqliteStore, StoreError, Topic, Urgency, UserId,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    /// Records delivery order and fails the first `fail_first` calls.
    struct TestSink {
        inner: SqliteStore,
        fail_first: usize,
        calls: AtomicUsize,
        delivered: Mutex<Vec<FollowUpId>>,
    }

    impl TestSink {
        fn new(inner: SqliteStore, fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_first,
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<FollowUpId> {
            self.delivered.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl MessageSink for TestSink {
        async fn deliver(
            &self,
            conversation_id: &ConversationId,
            message: OutboundMessage,
        ) -> fu_store::Result<MessageId> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(StoreError::Join("message log unavailable".into()));
            }
            self.delivered
                .lock()
                .expect("lock")
                .push(message.metadata.follow_up_id.clone());
            self.inner.deliver(conversation_id, message).await
        }
    }

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("store");
        store
            .upsert_profile(Profile {
                user_id: UserId::new("user-1"),
                first_name: "Anna".into(),
                display_name: None,
            })
            .await
            .expect("profile");
        for conv in ["conv-1", "conv-2", "conv-3"] {
            store
                .add_participant(&ConversationId::new(conv), &UserId::new("user-1"))
                .await
                .expect("participant");
        }
        store
    }

    async fn insert(store: &SqliteStore, conv: &str, promised: DateTime<Utc>) -> FollowUpRecord {
        store
            .insert(NewFollowUp {
                conversation_id: ConversationId::new(conv),
                user_id: UserId::new("user-1"),
                original_message_id: MessageId::new("orig"),
                auto_reply_message_id: MessageId::new("auto"),
                user_question_summary: "App startet nicht".into(),
                detected_topic: Topic::Technical,
                urgency_level: Urgency::Normal,
                promised_return_time: promised,
                created_at: promised - Duration::hours(3),
            })
            .await
            .expect("insert")
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new(now: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(now)))
        }

        fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().expect("lock") = now;
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().expect("lock");
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("lock")
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        async fn pass_at(&self, now: DateTime<Utc>) -> DispatchReport {
            self.clock.set(now);
            self.dispatcher.dispatch_due().await
        }
    }

    fn harness(
        store: &SqliteStore,
        profiles: Arc<dyn ProfileDirectory>,
        sink: Arc<dyn MessageSink>,
        clock: Arc<ManualClock>,
        settings: DispatchSettings,
    ) -> Harness {
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            profiles,
            sink,
            Arc::new(AnswerGenerator::new(None)),
            Composer::new(BusinessHours::default()),
            settings,
        )
        .with_clock(clock.clone());
        Harness { dispatcher, clock }
    }

    fn dispatcher(
        store: &SqliteStore,
        sink: Arc<dyn MessageSink>,
        concurrency: usize,
        batch_limit: usize,
    ) -> Harness {
        harness(
            store,
            Arc::new(store.clone()),
            sink,
            ManualClock::new(at(0, 0)),
            DispatchSettings {
                batch_limit,
                concurrency,
                claim_lease: Duration::minutes(5),
            },
        )
    }

    #[tokio::test]
    async fn due_record_is_sent_with_follow_up_metadata() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        let d = dispatcher(&store, Arc::new(store.clone()), 4, 50);

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(
            report,
            DispatchReport {
                processed: 1,
                sent: 1,
                failed: 0,
                skipped: 0
            }
        );

        let sent = store.get(&rec.id).await.expect("get").expect("exists");
        assert_eq!(sent.status, FollowUpStatus::Sent);
        assert_eq!(sent.actual_return_time, Some(at(10, 0)));
        let log = store
            .conversation_messages(&rec.conversation_id)
            .await
            .expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(Some(log[0].id.clone()), sent.follow_up_message_id);
        assert!(log[0].content.starts_with("Hallo Anna! Bin wieder da."));
        assert_eq!(log[0].metadata["follow_up_id"], rec.id.as_str());
        assert_eq!(log[0].metadata["original_topic"], "technical");

        let again = d.pass_at(at(10, 1)).await;
        assert_eq!(again, DispatchReport::default());
    }

    #[tokio::test]
    async fn concurrent_passes_deliver_exactly_once() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        let sink = TestSink::new(store.clone(), 0);
        let d = dispatcher(&store, sink.clone(), 4, 50);

        let (a, b) = tokio::join!(d.pass_at(at(10, 0)), d.pass_at(at(10, 0)));
        assert_eq!(a.sent + b.sent, 1);
        assert_eq!(a.failed + b.failed, 0);
        assert_eq!(sink.delivered(), vec![rec.id.clone()]);
        let log = store
            .conversation_messages(&rec.conversation_id)
            .await
            .expect("log");
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn failures_retry_until_the_limit_then_stop() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        let sink = TestSink::new(store.clone(), usize::MAX);
        let d = dispatcher(&store, sink.clone(), 1, 50);

        for attempt in 1..=MAX_RETRIES {
            let report = d.pass_at(at(10, attempt)).await;
            assert_eq!(report.processed, 1, "attempt {attempt} re-selects the record");
            assert_eq!(report.failed, 1);
            let current = store.get(&rec.id).await.expect("get").expect("exists");
            assert_eq!(current.retry_count, attempt);
            let expected = if attempt < MAX_RETRIES {
                FollowUpStatus::Pending
            } else {
                FollowUpStatus::Failed
            };
            assert_eq!(current.status, expected);
        }

        let failed = store.get(&rec.id).await.expect("get").expect("exists");
        assert!(
            failed
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("message log unavailable"))
        );
        assert_eq!(
            d.pass_at(at(11, 0)).await,
            DispatchReport::default()
        );
    }

    #[tokio::test]
    async fn one_failing_record_does_not_block_the_others() {
        let store = seeded_store().await;
        let first = insert(&store, "conv-1", at(8, 0)).await;
        let second = insert(&store, "conv-2", at(9, 0)).await;
        let sink = TestSink::new(store.clone(), 1);
        let d = dispatcher(&store, sink.clone(), 1, 50);

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(report.processed, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);

        let first = store.get(&first.id).await.expect("get").expect("exists");
        assert_eq!(first.status, FollowUpStatus::Pending);
        assert_eq!(first.retry_count, 1);
        let second = store.get(&second.id).await.expect("get").expect("exists");
        assert_eq!(second.status, FollowUpStatus::Sent);
    }

    #[tokio::test]
    async fn oldest_promise_is_selected_and_delivered_first() {
        let store = seeded_store().await;
        let c = insert(&store, "conv-3", at(9, 30)).await;
        let a = insert(&store, "conv-1", at(8, 0)).await;
        let b = insert(&store, "conv-2", at(9, 0)).await;
        let sink = TestSink::new(store.clone(), 0);

        let d = dispatcher(&store, sink.clone(), 1, 2);
        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(report.processed, 2);
        assert_eq!(sink.delivered(), vec![a.id.clone(), b.id.clone()]);

        d.pass_at(at(10, 1)).await;
        assert_eq!(sink.delivered(), vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn cancelled_record_is_skipped_without_retry() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        assert_eq!(
            store.cancel(&rec.id, at(9, 30)).await.expect("cancel"),
            CancelOutcome::Cancelled
        );
        let sink = TestSink::new(store.clone(), 0);
        let d = dispatcher(&store, sink.clone(), 4, 50);

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(report, DispatchReport::default());
        assert!(sink.delivered().is_empty());
        let after = store.get(&rec.id).await.expect("get").expect("exists");
        assert_eq!(after.status, FollowUpStatus::Cancelled);
        assert_eq!(after.retry_count, 0);
    }

    #[tokio::test]
    async fn missing_profile_counts_as_failure() {
        let store = SqliteStore::open_in_memory().expect("store");
        let rec = insert(&store, "conv-9", at(9, 0)).await;
        let d = dispatcher(&store, Arc::new(store.clone()), 4, 50);

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(report.failed, 1);
        let after = store.get(&rec.id).await.expect("get").expect("exists");
        assert_eq!(after.retry_count, 1);
        assert_eq!(
            after.error_message.as_deref(),
            Some("recipient profile not found")
        );
    }

    /// Delivers into the store. The first delivery takes six minutes of clock
    /// time; the second waits for `release`.
    struct GatedSink {
        inner: SqliteStore,
        clock: Arc<ManualClock>,
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl MessageSink for GatedSink {
        async fn deliver(
            &self,
            conversation_id: &ConversationId,
            message: OutboundMessage,
        ) -> fu_store::Result<MessageId> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => self.clock.advance(Duration::minutes(6)),
                1 => {
                    self.entered.notify_one();
                    self.release.notified().await;
                }
                _ => {}
            }
            self.inner.deliver(conversation_id, message).await
        }
    }

    #[tokio::test]
    async fn late_records_in_a_long_pass_get_fresh_leases_and_stamps() {
        let store = seeded_store().await;
        let first = insert(&store, "conv-1", at(8, 0)).await;
        let second = insert(&store, "conv-2", at(9, 0)).await;
        let clock = ManualClock::new(at(10, 0));
        let sink = Arc::new(GatedSink {
            inner: store.clone(),
            clock: clock.clone(),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let d = harness(
            &store,
            Arc::new(store.clone()),
            sink.clone(),
            clock,
            DispatchSettings {
                batch_limit: 50,
                concurrency: 1,
                claim_lease: Duration::minutes(5),
            },
        );

        let held = d.pass_at(at(10, 0));
        let overlapping = async {
            sink.entered.notified().await;
            let report = d.pass_at(at(10, 7)).await;
            sink.release.notify_one();
            report
        };
        let (a, b) = tokio::join!(held, overlapping);

        assert_eq!(a.sent, 2, "{a:?}");
        assert_eq!(b, DispatchReport::default(), "second record was still leased");
        let log = store
            .conversation_messages(&second.conversation_id)
            .await
            .expect("log");
        assert_eq!(log.len(), 1);

        let first = store.get(&first.id).await.expect("get").expect("exists");
        assert_eq!(first.actual_return_time, Some(at(10, 6)));
        let second = store.get(&second.id).await.expect("get").expect("exists");
        assert_eq!(second.status, FollowUpStatus::Sent);
        assert_eq!(second.follow_up_sent_at, Some(at(10, 7)));
        assert_eq!(second.actual_return_time, Some(at(10, 7)));
    }

    /// Cancels `target` while its recipient is being looked up.
    struct CancellingDirectory {
        inner: SqliteStore,
        target: Mutex<Option<FollowUpId>>,
    }

    #[async_trait::async_trait]
    impl ProfileDirectory for CancellingDirectory {
        async fn recipient(
            &self,
            conversation_id: &ConversationId,
            user_id: &UserId,
        ) -> fu_store::Result<Option<Profile>> {
            let target = self.target.lock().expect("lock").take();
            if let Some(id) = target {
                self.inner.cancel(&id, at(10, 0)).await?;
            }
            self.inner.recipient(conversation_id, user_id).await
        }
    }

    #[tokio::test]
    async fn record_cancelled_while_preparing_is_not_delivered() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        let directory = Arc::new(CancellingDirectory {
            inner: store.clone(),
            target: Mutex::new(Some(rec.id.clone())),
        });
        let sink = TestSink::new(store.clone(), 0);
        let d = harness(
            &store,
            directory,
            sink.clone(),
            ManualClock::new(at(10, 0)),
            DispatchSettings {
                batch_limit: 50,
                concurrency: 1,
                claim_lease: Duration::minutes(5),
            },
        );

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(
            report,
            DispatchReport {
                processed: 1,
                sent: 0,
                failed: 0,
                skipped: 1
            }
        );
        assert!(sink.delivered().is_empty());
        assert!(
            store
                .conversation_messages(&rec.conversation_id)
                .await
                .expect("log")
                .is_empty()
        );
        let after = store.get(&rec.id).await.expect("get").expect("exists");
        assert_eq!(after.status, FollowUpStatus::Cancelled);
        assert_eq!(after.retry_count, 0);
    }

    struct SlowDirectory {
        inner: SqliteStore,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl ProfileDirectory for SlowDirectory {
        async fn recipient(
            &self,
            conversation_id: &ConversationId,
            user_id: &UserId,
        ) -> fu_store::Result<Option<Profile>> {
            tokio::time::sleep(self.delay).await;
            self.inner.recipient(conversation_id, user_id).await
        }
    }

    #[tokio::test]
    async fn slow_preparation_fails_the_attempt_inside_the_lease() {
        let store = seeded_store().await;
        let rec = insert(&store, "conv-1", at(9, 0)).await;
        let directory = Arc::new(SlowDirectory {
            inner: store.clone(),
            delay: std::time::Duration::from_millis(400),
        });
        let sink = TestSink::new(store.clone(), 0);
        let d = harness(
            &store,
            directory,
            sink.clone(),
            ManualClock::new(at(10, 0)),
            DispatchSettings {
                batch_limit: 50,
                concurrency: 1,
                claim_lease: Duration::milliseconds(200),
            },
        );

        let report = d.pass_at(at(10, 0)).await;
        assert_eq!(report.failed, 1);
        assert!(sink.delivered().is_empty());
        let after = store.get(&rec.id).await.expect("get").expect("exists");
        assert_eq!(after.status, FollowUpStatus::Pending);
        assert_eq!(after.retry_count, 1);
        assert!(
            after
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("timed out")),
            "{:?}",
            after.error_message
        );
    }

    struct OfflineStore;

    #[async_trait::async_trait]
    impl FollowUpStore for OfflineStore {
        async fn insert(&self, _new: NewFollowUp) -> fu_store::Result<FollowUpRecord> {
            Err(StoreError::Join("offline".into()))
        }
        async fn get(&self, _id: &FollowUpId) -> fu_store::Result<Option<FollowUpRecord>> {
            Err(StoreError::Join("offline".into()))
        }
        async fn list(
            &self,
            _status: Option<FollowUpStatus>,
            _limit: usize,
        ) -> fu_store::Result<Vec<FollowUpRecord>> {
            Err(StoreError::Join("offline".into()))
        }
        async fn due_follow_ups(
            &self,
            _now: DateTime<Utc>,
            _limit: usize,
        ) -> fu_store::Result<Vec<FollowUpRecord>> {
            Err(StoreError::Join("offline".into()))
        }
        async fn claim(
            &self,
            _id: &FollowUpId,
            _token: &str,
            _now: DateTime<Utc>,
            _lease_until: DateTime<Utc>,
        ) -> fu_store::Result<bool> {
            Err(StoreError::Join("offline".into()))
        }
        async fn renew_claim(
            &self,
            _id: &FollowUpId,
            _token: &str,
            _now: DateTime<Utc>,
            _lease_until: DateTime<Utc>,
        ) -> fu_store::Result<bool> {
            Err(StoreError::Join("offline".into()))
        }
        async fn mark_sent(
            &self,
            _id: &FollowUpId,
            _token: &str,
            _message_id: &MessageId,
            _now: DateTime<Utc>,
        ) -> fu_store::Result<bool> {
            Err(StoreError::Join("offline".into()))
        }
        async fn record_failure(
            &self,
            _id: &FollowUpId,
            _token: &str,
            _error: &str,
            _now: DateTime<Utc>,
        ) -> fu_store::Result<Option<FailureOutcome>> {
            Err(StoreError::Join("offline".into()))
        }
        async fn cancel(
            &self,
            _id: &FollowUpId,
            _now: DateTime<Utc>,
        ) -> fu_store::Result<CancelOutcome> {
            Err(StoreError::Join("offline".into()))
        }
        async fn stats(&self, _now: DateTime<Utc>) -> fu_store::Result<FollowUpStats> {
            Err(StoreError::Join("offline".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_store_yields_zeroed_report() {
        let profiles = Arc::new(SqliteStore::open_in_memory().expect("store"));
        let d = Dispatcher::new(
            Arc::new(OfflineStore),
            profiles.clone(),
            profiles,
            Arc::new(AnswerGenerator::new(None)),
            Composer::new(BusinessHours::default()),
            DispatchSettings::default(),
        );
        assert_eq!(d.dispatch_due().await, DispatchReport::default());
    }
}
