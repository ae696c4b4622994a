//! Single-flight credential renewal.
//!
//! When several calls discover an expired credential at once, exactly one
//! renewal reaches the server. The first caller leads it; later callers queue
//! as waiters (up to a fixed bound) and receive the leader's outcome in
//! arrival order. Every caller, the leader included, gives up on its own after
//! `refresh_timeout`.
//!
//! The renewal runs in its own task bounded by `renewal_timeout`, so dropping
//! or timing out the call that started it does not abandon the renewal for
//! everyone else.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

use crate::infra::http::{ErrorReporter, SESSION_EXPIRED_MESSAGE, TransportError};
use crate::util::clock::Clock;
use crate::util::lock::mutex_lock;

use super::credential::{Credential, CredentialStore};
use super::renewer::{CredentialRenewer, RenewError};

const SOURCE: &str = "auth::refresh";

pub(crate) const METRIC_REFRESH_WAITERS: &str = "nebula_refresh_waiters";
pub(crate) const METRIC_REFRESH_TOTAL: &str = "nebula_refresh_total";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("too many requests are waiting for credential renewal")]
    QueueFull,
    #[error("timed out waiting for credential renewal")]
    TimedOut,
    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),
    #[error("not signed in")]
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// How long any caller waits for a renewal outcome.
    pub refresh_timeout: Duration,
    /// Hard bound on the renewal call itself.
    pub renewal_timeout: Duration,
    /// Waiters allowed behind an in-flight renewal.
    pub max_queue_size: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_millis(10_000),
            renewal_timeout: Duration::from_millis(30_000),
            max_queue_size: 50,
        }
    }
}

/// A caller parked behind the in-flight renewal.
struct RefreshWaiter {
    id: u64,
    stale: Option<String>,
    deliver: oneshot::Sender<Option<Credential>>,
}

impl RefreshWaiter {
    /// `credential` is already newer than the one this caller saw expire.
    fn satisfied_by(&self, credential: &Credential, now: OffsetDateTime) -> bool {
        self.stale
            .as_deref()
            .is_some_and(|stale| stale != credential.token && !credential.is_expired(now))
    }
}

/// `refreshing` belongs to the renewal task: only the task (or its death)
/// clears it, so at most one renewal call is ever outstanding.
#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<RefreshWaiter>,
    next_waiter: u64,
}

impl RefreshState {
    fn publish_queue_len(&self) {
        gauge!(METRIC_REFRESH_WAITERS).set(self.waiters.len() as f64);
    }

    fn take_waiters(&mut self) -> VecDeque<RefreshWaiter> {
        let waiters = std::mem::take(&mut self.waiters);
        self.publish_queue_len();
        waiters
    }
}

/// What the renewal task does after applying an attempt.
enum Settled {
    Done(Result<Credential, RefreshError>),
    /// The session was replaced mid-flight and callers still wait on the
    /// replacement; renew that one.
    Again(String),
}

struct Inner {
    credentials: Arc<CredentialStore>,
    renewer: Arc<dyn CredentialRenewer>,
    reporter: Arc<ErrorReporter>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    state: Mutex<RefreshState>,
}

enum Role {
    Leader(String),
    Waiter(u64, oneshot::Receiver<Option<Credential>>),
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        renewer: Arc<dyn CredentialRenewer>,
        reporter: Arc<ErrorReporter>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                renewer,
                reporter,
                clock,
                settings,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.settings
    }

    pub fn is_refreshing(&self) -> bool {
        mutex_lock(&self.inner.state, SOURCE, "is_refreshing").refreshing
    }

    pub fn waiting(&self) -> usize {
        mutex_lock(&self.inner.state, SOURCE, "waiting").waiters.len()
    }

    /// Obtain a credential newer than `stale_token`.
    ///
    /// Starts a renewal when none is running, otherwise waits for the running
    /// one. If the store already holds a different token, that token is
    /// returned without renewing.
    pub async fn renew(&self, stale_token: Option<&str>) -> Result<Credential, RefreshError> {
        match self.enroll(stale_token)? {
            Enrollment::Fresh(credential) => Ok(credential),
            Enrollment::Role(Role::Leader(token)) => self.lead(token).await,
            Enrollment::Role(Role::Waiter(id, receiver)) => self.wait(id, receiver).await,
        }
    }

    fn enroll(&self, stale_token: Option<&str>) -> Result<Enrollment, RefreshError> {
        let inner = &self.inner;
        let mut state = mutex_lock(&inner.state, SOURCE, "enroll");

        let Some(current) = inner.credentials.current() else {
            return Err(RefreshError::NotAuthenticated);
        };
        if let Some(stale) = stale_token
            && stale != current.token
            && !current.is_expired(inner.clock.now())
        {
            debug!("Credential already renewed by another caller");
            return Ok(Enrollment::Fresh(current));
        }

        if !state.refreshing {
            state.refreshing = true;
            return Ok(Enrollment::Role(Role::Leader(current.token)));
        }

        if state.waiters.len() >= inner.settings.max_queue_size {
            warn!(
                max_queue_size = inner.settings.max_queue_size,
                "Renewal queue full; rejecting caller"
            );
            return Err(RefreshError::QueueFull);
        }

        let id = state.next_waiter;
        state.next_waiter = id.wrapping_add(1);
        let (deliver, receiver) = oneshot::channel();
        state.waiters.push_back(RefreshWaiter {
            id,
            stale: stale_token.map(str::to_owned),
            deliver,
        });
        state.publish_queue_len();
        debug!(waiter = id, queued = state.waiters.len(), "Waiting for in-flight renewal");
        Ok(Enrollment::Role(Role::Waiter(id, receiver)))
    }

    async fn lead(&self, token: String) -> Result<Credential, RefreshError> {
        let inner = Arc::clone(&self.inner);
        let renewal = tokio::spawn(async move { inner.run_renewal(token).await });
        match timeout(self.inner.settings.refresh_timeout, renewal).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(error = %err, "Renewal task died");
                self.inner.abandon();
                Err(RefreshError::RenewalFailed(format!("renewal task failed: {err}")))
            }
            Err(_) => {
                debug!("Renewal still running after refresh timeout");
                Err(RefreshError::TimedOut)
            }
        }
    }

    async fn wait(
        &self,
        id: u64,
        receiver: oneshot::Receiver<Option<Credential>>,
    ) -> Result<Credential, RefreshError> {
        match timeout(self.inner.settings.refresh_timeout, receiver).await {
            Ok(Ok(Some(credential))) => Ok(credential),
            Ok(Ok(None)) => Err(RefreshError::RenewalFailed(
                "session could not be renewed".to_string(),
            )),
            Ok(Err(_)) => Err(RefreshError::RenewalFailed(
                "renewal abandoned".to_string(),
            )),
            Err(_) => {
                let mut state = mutex_lock(&self.inner.state, SOURCE, "wait.timeout");
                state.waiters.retain(|waiter| waiter.id != id);
                state.publish_queue_len();
                debug!(waiter = id, "Gave up waiting for renewal");
                Err(RefreshError::TimedOut)
            }
        }
    }

    /// End the session without renewing: the renewal endpoint itself
    /// rejected the credential, or a freshly renewed one was refused.
    ///
    /// Waiters are released at once. A renewal already in flight keeps the
    /// refreshing phase until it returns, and its result is then discarded.
    pub fn terminate_session(&self) {
        warn!("Session terminated by server");
        let waiters = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "terminate_session");
            self.inner.credentials.clear();
            state.take_waiters()
        };
        counter!(METRIC_REFRESH_TOTAL, "outcome" => "terminated").increment(1);
        release(waiters, None);
        self.inner.reporter.warning(SESSION_EXPIRED_MESSAGE);
    }

    /// Renew now if the credential expires within `threshold`.
    ///
    /// Returns `None` when no renewal was needed.
    pub async fn refresh_if_expiring(
        &self,
        threshold: Duration,
    ) -> Option<Result<Credential, RefreshError>> {
        let now = self.inner.clock.now();
        if !self.inner.credentials.is_expiring(now, threshold) {
            return None;
        }
        let token = self.inner.credentials.token()?;
        debug!("Credential close to expiry; renewing ahead of time");
        Some(self.renew(Some(&token)).await)
    }

    /// Check every `interval` and renew ahead of expiry.
    pub fn spawn_proactive_refresh(&self, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(Err(err)) = coordinator.refresh_if_expiring(threshold).await {
                    warn!(error = %err, "Proactive renewal failed");
                }
            }
        })
    }
}

enum Enrollment {
    Fresh(Credential),
    Role(Role),
}

impl Inner {
    async fn run_renewal(&self, mut token: String) -> Result<Credential, RefreshError> {
        loop {
            let outcome = self.attempt(&token).await;
            match self.settle(&token, outcome) {
                Settled::Done(result) => return result,
                Settled::Again(current) => token = current,
            }
        }
    }

    async fn attempt(&self, token: &str) -> Result<Credential, RenewError> {
        info!("Renewing credential");
        match timeout(self.settings.renewal_timeout, self.renewer.renew(token)).await {
            Ok(Ok(renewed)) => Ok(Credential::from_lifetime(
                renewed.token,
                renewed.expires_in,
                self.clock.now(),
            )),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RenewError::Transport(TransportError::Timeout)),
        }
    }

    /// Apply one attempt's outcome.
    ///
    /// The store is checked and written under the state lock, and only when
    /// it still holds the token the attempt started from. Otherwise the
    /// session ended or was replaced meanwhile and the outcome is dropped.
    fn settle(&self, started_from: &str, outcome: Result<Credential, RenewError>) -> Settled {
        let mut state = mutex_lock(&self.state, SOURCE, "settle");
        let current = self.credentials.current();
        if current.as_ref().map(|credential| credential.token.as_str()) != Some(started_from) {
            return self.supersede(state, current);
        }

        state.refreshing = false;
        let waiters = state.take_waiters();
        match outcome {
            Ok(credential) => {
                self.credentials.set(credential.clone());
                drop(state);
                info!(released = waiters.len(), "Credential renewed");
                counter!(METRIC_REFRESH_TOTAL, "outcome" => "success").increment(1);
                release(waiters, Some(&credential));
                Settled::Done(Ok(credential))
            }
            Err(err) => {
                self.credentials.clear();
                drop(state);
                warn!(error = %err, expiry = err.is_expiry(), "Credential renewal failed");
                counter!(METRIC_REFRESH_TOTAL, "outcome" => "failure").increment(1);
                release(waiters, None);
                self.reporter.warning(SESSION_EXPIRED_MESSAGE);
                Settled::Done(Err(RefreshError::RenewalFailed(err.to_string())))
            }
        }
    }

    fn supersede(
        &self,
        mut state: MutexGuard<'_, RefreshState>,
        current: Option<Credential>,
    ) -> Settled {
        counter!(METRIC_REFRESH_TOTAL, "outcome" => "discarded").increment(1);
        let Some(current) = current else {
            debug!("Session ended during renewal; discarding result");
            state.refreshing = false;
            let waiters = state.take_waiters();
            drop(state);
            release(waiters, None);
            return Settled::Done(Err(RefreshError::NotAuthenticated));
        };

        let now = self.clock.now();
        let (satisfied, pending): (VecDeque<_>, VecDeque<_>) = state
            .take_waiters()
            .into_iter()
            .partition(|waiter| waiter.satisfied_by(&current, now));
        state.waiters = pending;
        state.publish_queue_len();
        let again = !state.waiters.is_empty();
        if !again {
            state.refreshing = false;
        }
        drop(state);

        debug!(
            released = satisfied.len(),
            renew_again = again,
            "Credential replaced during renewal; discarding result"
        );
        release(satisfied, Some(&current));
        if again {
            Settled::Again(current.token)
        } else {
            Settled::Done(Ok(current))
        }
    }

    /// The renewal task is gone without settling.
    fn abandon(&self) {
        let waiters = {
            let mut state = mutex_lock(&self.state, SOURCE, "abandon");
            self.credentials.clear();
            state.refreshing = false;
            state.take_waiters()
        };
        counter!(METRIC_REFRESH_TOTAL, "outcome" => "failure").increment(1);
        release(waiters, None);
        self.reporter.warning(SESSION_EXPIRED_MESSAGE);
    }
}

/// Hand every waiter the outcome, in arrival order.
fn release(waiters: VecDeque<RefreshWaiter>, outcome: Option<&Credential>) {
    for waiter in waiters {
        let _ = waiter.deliver.send(outcome.cloned());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::infra::http::{NotifyLevel, Notifier};
    use crate::infra::storage::MemoryStore;
    use crate::util::clock::ManualClock;

    use super::super::renewer::RenewedCredential;
    use super::*;

    const START: i64 = 1_772_366_400_000;

    /// Blocks each renewal until released, then answers with the next scripted result.
    struct GatedRenewer {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        gate: Notify,
        answers: Mutex<VecDeque<Result<RenewedCredential, RenewError>>>,
    }

    impl GatedRenewer {
        fn new(answer: Result<RenewedCredential, RenewError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                gate: Notify::new(),
                answers: Mutex::new(VecDeque::from([answer])),
            })
        }

        fn then_answer(&self, answer: Result<RenewedCredential, RenewError>) {
            self.answers.lock().expect("answers lock").push_back(answer);
        }
    }

    #[async_trait]
    impl CredentialRenewer for GatedRenewer {
        async fn renew(&self, _current: &str) -> Result<RenewedCredential, RenewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.gate.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.answers
                .lock()
                .expect("answers lock")
                .pop_front()
                .unwrap_or_else(|| Err(RenewError::Malformed("answered twice".into())))
        }
    }

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl Notifier for CountingNotifier {
        fn notify(&self, _level: NotifyLevel, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        coordinator: RefreshCoordinator,
        renewer: Arc<GatedRenewer>,
        notices: Arc<CountingNotifier>,
    }

    fn harness(answer: Result<RenewedCredential, RenewError>, max_queue_size: usize) -> Harness {
        let clock = Arc::new(ManualClock::new(START));
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        credentials.set(Credential::from_lifetime("T1", 60, clock.now()));
        let notices = Arc::new(CountingNotifier::default());
        let reporter = Arc::new(ErrorReporter::new(
            notices.clone(),
            clock.clone(),
            ErrorReporter::DEFAULT_WINDOW,
        ));
        let renewer = GatedRenewer::new(answer);
        let coordinator = RefreshCoordinator::new(
            credentials,
            renewer.clone(),
            reporter,
            clock,
            RefreshSettings {
                refresh_timeout: Duration::from_secs(10),
                renewal_timeout: Duration::from_secs(30),
                max_queue_size,
            },
        );
        Harness {
            coordinator,
            renewer,
            notices,
        }
    }

    fn renewed(token: &str) -> Result<RenewedCredential, RenewError> {
        Ok(RenewedCredential {
            token: token.to_string(),
            expires_in: 3_600,
        })
    }

    async fn settle_tasks() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_renewal() {
        let h = harness(renewed("T2"), 8);

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = h.coordinator.clone();
                tokio::spawn(async move { coordinator.renew(Some("T1")).await })
            })
            .collect();
        settle_tasks().await;
        assert_eq!(h.coordinator.waiting(), 3);

        h.renewer.gate.notify_one();
        for call in calls {
            let credential = call.await.expect("join").expect("renewed");
            assert_eq!(credential.token, "T2");
        }

        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T2"));
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_bound_rejects_extra_waiter() {
        let h = harness(renewed("T2"), 1);

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        let waiter = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        assert_eq!(
            h.coordinator.renew(Some("T1")).await,
            Err(RefreshError::QueueFull)
        );

        h.renewer.gate.notify_one();
        assert!(leader.await.expect("join").is_ok());
        assert!(waiter.await.expect("join").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_notifies_once() {
        let h = harness(Err(RenewError::Malformed("no token".into())), 8);

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = h.coordinator.clone();
                tokio::spawn(async move { coordinator.renew(Some("T1")).await })
            })
            .collect();
        settle_tasks().await;
        h.renewer.gate.notify_one();

        for call in calls {
            assert!(matches!(
                call.await.expect("join"),
                Err(RefreshError::RenewalFailed(_))
            ));
        }
        assert!(h.coordinator.credentials().current().is_none());
        assert_eq!(h.notices.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_and_leaves_queue() {
        let h = harness(renewed("T2"), 8);

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        let waiter = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;
        assert_eq!(h.coordinator.waiting(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(waiter.await.expect("join"), Err(RefreshError::TimedOut));
        assert_eq!(leader.await.expect("join"), Err(RefreshError::TimedOut));
        assert_eq!(h.coordinator.waiting(), 0);
        assert!(h.coordinator.is_refreshing());

        // The renewal outlives its callers and still lands.
        h.renewer.gate.notify_one();
        settle_tasks().await;
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T2"));
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_leader_does_not_cancel_renewal() {
        let h = harness(renewed("T2"), 8);

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        let waiter = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        leader.abort();
        settle_tasks().await;
        h.renewer.gate.notify_one();

        assert_eq!(waiter.await.expect("join").expect("renewed").token, "T2");
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T2"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_returns_current_credential() {
        let h = harness(renewed("T2"), 8);
        let credential = h.coordinator.renew(Some("T0")).await.expect("current");
        assert_eq!(credential.token, "T1");
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn signed_out_caller_is_rejected_quietly() {
        let h = harness(renewed("T2"), 8);
        h.coordinator.credentials().clear();

        assert_eq!(
            h.coordinator.renew(Some("T1")).await,
            Err(RefreshError::NotAuthenticated)
        );
        assert_eq!(h.notices.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_session_releases_waiters_without_renewing() {
        let h = harness(renewed("T2"), 8);
        h.coordinator.terminate_session();

        assert!(h.coordinator.credentials().current().is_none());
        assert_eq!(h.notices.0.load(Ordering::SeqCst), 1);
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn termination_mid_renewal_keeps_one_renewal_in_flight() {
        let h = harness(renewed("T2"), 8);
        h.renewer.then_answer(renewed("T6"));
        let now = OffsetDateTime::from_unix_timestamp(START / 1_000).expect("start");

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        h.coordinator.terminate_session();
        assert!(h.coordinator.is_refreshing());
        assert!(h.coordinator.credentials().current().is_none());

        // A new sign-in expires while the old renewal is still out.
        h.coordinator
            .credentials()
            .set(Credential::from_lifetime("T5", 0, now));
        let next = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T5")).await })
        };
        settle_tasks().await;
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.waiting(), 1);

        // The old session's token never lands; the new one is renewed next.
        h.renewer.gate.notify_one();
        settle_tasks().await;
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T5"));
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 2);
        assert!(h.coordinator.is_refreshing());

        h.renewer.gate.notify_one();
        assert_eq!(next.await.expect("join").expect("renewed").token, "T6");
        assert_eq!(leader.await.expect("join").expect("renewed").token, "T6");
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T6"));
        assert_eq!(h.renewer.peak.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_during_renewal_is_not_undone() {
        let h = harness(renewed("T2"), 8);

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        h.coordinator.credentials().clear();
        h.renewer.gate.notify_one();

        assert_eq!(
            leader.await.expect("join"),
            Err(RefreshError::NotAuthenticated)
        );
        assert!(h.coordinator.credentials().current().is_none());
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(h.notices.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_during_renewal_wins() {
        let h = harness(renewed("T2"), 8);
        let now = OffsetDateTime::from_unix_timestamp(START / 1_000).expect("start");

        let leader = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        let waiter = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.renew(Some("T1")).await })
        };
        settle_tasks().await;

        h.coordinator
            .credentials()
            .set(Credential::from_lifetime("T5", 3_600, now));
        h.renewer.gate.notify_one();

        assert_eq!(waiter.await.expect("join").expect("current").token, "T5");
        assert_eq!(leader.await.expect("join").expect("current").token, "T5");
        assert_eq!(h.coordinator.credentials().token().as_deref(), Some("T5"));
        assert_eq!(h.renewer.calls.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn proactive_refresh_waits_for_threshold() {
        let h = harness(renewed("T2"), 8);

        assert!(
            h.coordinator
                .refresh_if_expiring(Duration::from_secs(30))
                .await
                .is_none()
        );

        let pending = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .refresh_if_expiring(Duration::from_secs(300))
                    .await
            })
        };
        settle_tasks().await;
        h.renewer.gate.notify_one();

        let outcome = pending.await.expect("join").expect("renewal attempted");
        assert_eq!(outcome.expect("renewed").token, "T2");
    }
}
