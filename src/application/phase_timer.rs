use crate::domain::announcements::{
    END_OF_DAY_MESSAGE, completion_message, milestone_message, start_message,
};
use crate::domain::schedule::{LAST_PHASE_INDEX, PhaseKind, SCHEDULE, TimerState};
use crate::infrastructure::announcer::AnnouncementSink;
use crate::infrastructure::config::{AnnouncementBackend, AppConfig};
use crate::infrastructure::storage::TimerStateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Token for one scheduled tick. A tick only counts when it carries the
/// handle the timer is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

pub trait TickScheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration) -> TickHandle;
    fn cancel(&self, handle: TickHandle);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub phase_name: &'static str,
    pub phase_kind: PhaseKind,
    pub time_remaining: String,
    pub day_ended: bool,
    pub finished: bool,
}

impl From<&TimerState> for TimerSnapshot {
    fn from(state: &TimerState) -> Self {
        Self {
            state: state.clone(),
            phase_name: state.phase_name(),
            phase_kind: state.phase_kind(),
            time_remaining: state.format_time_remaining(),
            day_ended: state.day_ended,
            finished: state.is_finished(),
        }
    }
}

/// Countdown over the fixed schedule.
///
/// Every transition saves the new state before the snapshot goes out to the
/// observer, and announcements are sent last so a slow or failing sink can
/// never hold up a transition. At most one tick is pending at any time; a
/// tick carrying any other handle is ignored.
pub struct PhaseTimer<S, A, T>
where
    S: TimerStateStore + ?Sized,
    A: AnnouncementSink + ?Sized,
    T: TickScheduler + ?Sized,
{
    state: TimerState,
    store: Arc<S>,
    announcer: Arc<A>,
    scheduler: Arc<T>,
    warning_thresholds: Vec<u32>,
    announcements_ready: bool,
    pending: Option<TickHandle>,
    observer: Option<UnboundedSender<TimerSnapshot>>,
    now_provider: NowProvider,
}

impl<S, A, T> PhaseTimer<S, A, T>
where
    S: TimerStateStore + ?Sized,
    A: AnnouncementSink + ?Sized,
    T: TickScheduler + ?Sized,
{
    pub fn new(config: &AppConfig, store: Arc<S>, announcer: Arc<A>, scheduler: Arc<T>) -> Self {
        let announcements_ready = config.timer.enable_announcements
            && match config.announcements.backend {
                AnnouncementBackend::Voice => config.voice_endpoint().is_some(),
                AnnouncementBackend::Local => true,
                AnnouncementBackend::Log => false,
            };
        Self {
            state: TimerState::initial(),
            store,
            announcer,
            scheduler,
            warning_thresholds: config.timer.warning_thresholds(),
            announcements_ready,
            pending: None,
            observer: None,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_observer(mut self, observer: UnboundedSender<TimerSnapshot>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Picks up the persisted state. A state saved while running comes back
    /// paused; a missing or unusable one is replaced by the fresh planning
    /// state.
    pub fn restore(&mut self) {
        let restored = match self.store.load() {
            Ok(Some(mut state)) => match state.validate() {
                Ok(()) => {
                    if state.is_running {
                        state.is_running = false;
                        state.paused_at = Some(self.now());
                    }
                    state
                }
                Err(reason) => {
                    tracing::warn!(%reason, "persisted timer state rejected, starting fresh");
                    TimerState::initial()
                }
            },
            Ok(None) => TimerState::initial(),
            Err(error) => {
                tracing::warn!(%error, "timer state unreadable, starting fresh");
                TimerState::initial()
            }
        };
        self.cancel_pending();
        self.state = restored;
        self.commit();
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::from(&self.state)
    }

    pub fn pending_tick(&self) -> Option<TickHandle> {
        self.pending
    }

    /// Whether the configured sink can actually be heard.
    pub fn validate_announcements(&self) -> bool {
        self.announcements_ready
    }

    pub fn start(&mut self) {
        if self.state.is_running || self.state.day_ended || self.state.is_finished() {
            return;
        }
        self.state.is_running = true;
        self.state.started_at = Some(self.now());
        self.state.paused_at = None;
        let message = start_message(self.state.phase());

        self.commit();
        self.announce(&message);
        self.schedule_tick();
    }

    pub fn pause(&mut self) {
        if !self.state.is_running {
            return;
        }
        self.cancel_pending();
        self.state.is_running = false;
        self.state.paused_at = Some(self.now());
        self.commit();
    }

    pub fn tick(&mut self, handle: TickHandle) {
        if self.pending != Some(handle) {
            tracing::debug!(tick = handle.id(), "stale tick ignored");
            return;
        }
        self.pending = None;
        if !self.state.is_running || self.state.day_ended {
            return;
        }

        self.state.time_remaining_seconds = self.state.time_remaining_seconds.saturating_sub(1);
        let remaining = self.state.time_remaining_seconds;
        let mut messages = Vec::new();

        if remaining == 0 {
            messages.push(completion_message(self.state.current_phase_index));
            messages.extend(self.advance());
        } else if self.warning_thresholds.contains(&remaining) {
            messages.push(milestone_message(self.state.phase(), remaining / 60));
        }

        self.commit();
        for message in &messages {
            self.announce(message);
        }
        if self.state.is_running {
            self.schedule_tick();
        }
    }

    /// Jumps to the next phase without the completion message. Skipping the
    /// last phase finishes the day.
    pub fn skip_to_next(&mut self) {
        if self.state.day_ended || self.state.is_finished() {
            return;
        }
        self.cancel_pending();
        let message = self
            .advance()
            .unwrap_or_else(|| END_OF_DAY_MESSAGE.to_string());

        self.commit();
        self.announce(&message);
        if self.state.is_running {
            self.schedule_tick();
        }
    }

    pub fn reset(&mut self) {
        self.cancel_pending();
        self.state = TimerState::initial();
        self.commit();
    }

    /// Stops for the rest of the day. Nothing ticks or speaks again until
    /// `reset`.
    pub fn end_day(&mut self) {
        if self.state.day_ended {
            return;
        }
        self.cancel_pending();
        self.state.is_running = false;
        self.state.paused_at = Some(self.now());
        self.state.day_ended = true;
        tracing::info!(phase = self.state.phase_name(), "day ended early");
        self.commit();
    }

    /// Moves to the next phase and keeps running. Returns its start message,
    /// or `None` when the schedule is exhausted and the timer is finished.
    fn advance(&mut self) -> Option<String> {
        let now = self.now();
        let next_index = self.state.current_phase_index + 1;
        let Some(next) = SCHEDULE.get(next_index) else {
            self.state.current_phase_index = LAST_PHASE_INDEX;
            self.state.time_remaining_seconds = 0;
            self.state.is_running = false;
            self.state.paused_at = Some(now);
            tracing::info!("schedule complete");
            return None;
        };

        self.state.current_phase_index = next_index;
        self.state.time_remaining_seconds = next.duration_seconds;
        self.state.is_running = true;
        self.state.started_at = Some(now);
        self.state.paused_at = None;
        tracing::info!(phase = next.name, index = next_index, "phase started");
        Some(start_message(next))
    }

    fn schedule_tick(&mut self) {
        self.cancel_pending();
        self.pending = Some(self.scheduler.schedule_once(TICK_INTERVAL));
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn commit(&mut self) {
        if let Err(error) = self.store.save(&self.state) {
            tracing::error!(%error, "failed to persist timer state");
        }
        let delivered = match &self.observer {
            Some(observer) => observer.send(self.snapshot()).is_ok(),
            None => true,
        };
        if !delivered {
            tracing::debug!("timer observer went away");
            self.observer = None;
        }
    }

    fn announce(&self, message: &str) {
        if !self.announcer.announce(message) {
            tracing::warn!(%message, "announcement not delivered");
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryTimerStateStore;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct ManualScheduler {
        next_id: AtomicU64,
        scheduled: Mutex<Vec<TickHandle>>,
        cancelled: Mutex<Vec<TickHandle>>,
    }

    impl ManualScheduler {
        fn scheduled_count(&self) -> usize {
            self.scheduled.lock().expect("scheduled lock").len()
        }

        fn cancelled(&self) -> Vec<TickHandle> {
            self.cancelled.lock().expect("cancelled lock").clone()
        }
    }

    impl TickScheduler for ManualScheduler {
        fn schedule_once(&self, _delay: Duration) -> TickHandle {
            let handle = TickHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.scheduled.lock().expect("scheduled lock").push(handle);
            handle
        }

        fn cancel(&self, handle: TickHandle) {
            self.cancelled.lock().expect("cancelled lock").push(handle);
        }
    }

    #[derive(Default)]
    struct RecordingAnnouncer {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingAnnouncer {
        fn failing() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.messages.lock().expect("messages lock"))
        }
    }

    impl AnnouncementSink for RecordingAnnouncer {
        fn announce(&self, message: &str) -> bool {
            self.messages
                .lock()
                .expect("messages lock")
                .push(message.to_string());
            !self.fail
        }
    }

    type TestTimer = PhaseTimer<InMemoryTimerStateStore, RecordingAnnouncer, ManualScheduler>;

    struct Harness {
        timer: TestTimer,
        store: Arc<InMemoryTimerStateStore>,
        announcer: Arc<RecordingAnnouncer>,
        scheduler: Arc<ManualScheduler>,
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn harness_with(store: InMemoryTimerStateStore, announcer: RecordingAnnouncer) -> Harness {
        let store = Arc::new(store);
        let announcer = Arc::new(announcer);
        let scheduler = Arc::new(ManualScheduler::default());
        let mut timer = PhaseTimer::new(
            &AppConfig::default(),
            Arc::clone(&store),
            Arc::clone(&announcer),
            Arc::clone(&scheduler),
        )
        .with_now_provider(Arc::new(fixed_time));
        timer.restore();
        Harness {
            timer,
            store,
            announcer,
            scheduler,
        }
    }

    fn harness() -> Harness {
        harness_with(InMemoryTimerStateStore::default(), RecordingAnnouncer::default())
    }

    fn harness_at(index: usize, remaining: u32) -> Harness {
        let mut state = TimerState::initial();
        state.current_phase_index = index;
        state.time_remaining_seconds = remaining;
        harness_with(
            InMemoryTimerStateStore::with_state(state),
            RecordingAnnouncer::default(),
        )
    }

    fn tick_once(timer: &mut TestTimer) {
        let handle = timer.pending_tick().expect("a tick should be pending");
        timer.tick(handle);
    }

    #[test]
    fn start_announces_phase_and_schedules_one_tick() {
        let mut h = harness();
        h.timer.start();
        assert!(h.timer.state().is_running);
        assert_eq!(h.timer.state().started_at, Some(fixed_time()));
        assert_eq!(
            h.announcer.take(),
            vec!["Starting planning phase. 20 minutes to organize your day."]
        );
        assert_eq!(h.scheduler.scheduled_count(), 1);

        h.timer.start();
        assert!(h.announcer.take().is_empty());
        assert_eq!(h.scheduler.scheduled_count(), 1);
    }

    #[test]
    fn five_minute_warning_fires_exactly_once() {
        let mut h = harness_at(4, 301);
        h.timer.start();
        assert_eq!(h.announcer.take(), vec!["Starting Block 2. Time to focus."]);

        tick_once(&mut h.timer);
        assert_eq!(h.timer.state().time_remaining_seconds, 300);
        assert_eq!(h.announcer.take(), vec!["5 minutes remaining in Block 2"]);

        tick_once(&mut h.timer);
        assert_eq!(h.timer.state().time_remaining_seconds, 299);
        assert!(h.announcer.take().is_empty());
    }

    #[test]
    fn break_warning_uses_break_wording() {
        let mut h = harness_at(3, 121);
        h.timer.start();
        h.announcer.take();
        tick_once(&mut h.timer);
        assert_eq!(h.announcer.take(), vec!["Break ending in 2 minutes"]);
    }

    #[test]
    fn completing_a_break_announces_then_starts_next_block() {
        let mut h = harness_at(1, 1);
        h.timer.start();
        h.announcer.take();

        tick_once(&mut h.timer);
        let state = h.timer.state();
        assert_eq!(state.current_phase_index, 2);
        assert_eq!(state.time_remaining_seconds, 2700);
        assert!(state.is_running);
        assert_eq!(
            h.announcer.take(),
            vec![
                "Break is over. Starting Block 1. Time to focus.",
                "Starting Block 1. Time to focus."
            ]
        );
        assert!(h.timer.pending_tick().is_some());
    }

    #[test]
    fn last_phase_completion_finishes_the_day() {
        let mut h = harness_at(LAST_PHASE_INDEX, 1);
        h.timer.start();
        h.announcer.take();

        tick_once(&mut h.timer);
        let state = h.timer.state();
        assert!(state.is_finished());
        assert_eq!(state.current_phase_index, LAST_PHASE_INDEX);
        assert_eq!(h.announcer.take(), vec![END_OF_DAY_MESSAGE]);
        assert!(h.timer.pending_tick().is_none());

        h.timer.start();
        h.timer.skip_to_next();
        assert!(h.timer.state().is_finished());
        assert!(h.announcer.take().is_empty());
    }

    #[test]
    fn pause_cancels_pending_tick_and_stale_ticks_are_ignored() {
        let mut h = harness();
        h.timer.start();
        let handle = h.timer.pending_tick().expect("pending tick");

        h.timer.pause();
        assert!(!h.timer.state().is_running);
        assert_eq!(h.timer.state().paused_at, Some(fixed_time()));
        assert_eq!(h.scheduler.cancelled(), vec![handle]);

        h.timer.tick(handle);
        assert_eq!(h.timer.state().time_remaining_seconds, 1200);

        h.timer.start();
        h.timer.tick(handle);
        assert_eq!(h.timer.state().time_remaining_seconds, 1200);
        tick_once(&mut h.timer);
        assert_eq!(h.timer.state().time_remaining_seconds, 1199);
    }

    #[test]
    fn skip_while_paused_starts_next_phase_running() {
        let mut h = harness_at(0, 600);
        h.timer.skip_to_next();
        let state = h.timer.state();
        assert_eq!(state.current_phase_index, 1);
        assert_eq!(state.time_remaining_seconds, 900);
        assert!(state.is_running);
        assert_eq!(h.announcer.take(), vec!["Starting 15 minute break."]);
        assert!(h.timer.pending_tick().is_some());
    }

    #[test]
    fn skip_on_last_phase_finishes_with_end_of_day_message() {
        let mut h = harness_at(LAST_PHASE_INDEX, 900);
        h.timer.start();
        h.announcer.take();
        h.timer.skip_to_next();
        assert!(h.timer.state().is_finished());
        assert_eq!(h.announcer.take(), vec![END_OF_DAY_MESSAGE]);
        assert!(h.timer.pending_tick().is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut h = harness_at(6, 100);
        h.timer.start();
        tick_once(&mut h.timer);

        h.timer.reset();
        let first = h.timer.state().clone();
        h.timer.reset();
        assert_eq!(h.timer.state(), &first);
        assert_eq!(first, TimerState::initial());
        assert!(h.timer.pending_tick().is_none());
    }

    #[test]
    fn end_day_silences_timer_until_reset() {
        let mut h = harness();
        h.timer.start();
        let handle = h.timer.pending_tick().expect("pending tick");
        h.announcer.take();

        h.timer.end_day();
        assert!(h.timer.state().day_ended);
        assert!(!h.timer.state().is_running);
        assert!(h.timer.pending_tick().is_none());

        h.timer.tick(handle);
        h.timer.start();
        h.timer.skip_to_next();
        assert!(h.announcer.take().is_empty());
        assert_eq!(h.timer.state().current_phase_index, 0);

        h.timer.reset();
        assert!(!h.timer.state().day_ended);
        h.timer.start();
        assert!(h.timer.state().is_running);
    }

    #[test]
    fn failing_announcer_does_not_stop_progression() {
        let mut state = TimerState::initial();
        state.time_remaining_seconds = 1;
        let mut h = harness_with(
            InMemoryTimerStateStore::with_state(state),
            RecordingAnnouncer::failing(),
        );
        h.timer.start();
        tick_once(&mut h.timer);
        assert_eq!(h.timer.state().current_phase_index, 1);
        assert!(h.timer.state().is_running);
        assert_eq!(h.announcer.take().len(), 3);
    }

    #[test]
    fn every_transition_is_saved_before_it_is_published() {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let store = Arc::new(InMemoryTimerStateStore::default());
        let mut timer = PhaseTimer::new(
            &AppConfig::default(),
            Arc::clone(&store),
            Arc::new(RecordingAnnouncer::default()),
            Arc::new(ManualScheduler::default()),
        )
        .with_now_provider(Arc::new(fixed_time))
        .with_observer(sender);

        timer.restore();
        timer.start();
        tick_once(&mut timer);
        timer.pause();

        let mut published = 0;
        while let Ok(snapshot) = receiver.try_recv() {
            published += 1;
            assert_eq!(snapshot.phase_name, "Planning");
        }
        assert_eq!(published, 4);
        assert_eq!(store.save_count(), 4);
        let saved = store.load().expect("load").expect("saved state");
        assert_eq!(&saved, timer.state());
        assert_eq!(timer.snapshot().time_remaining, "19:59");
    }

    #[test]
    fn restore_pauses_a_state_saved_while_running() {
        let mut state = TimerState::initial();
        state.current_phase_index = 8;
        state.time_remaining_seconds = 42;
        state.is_running = true;
        let h = harness_with(
            InMemoryTimerStateStore::with_state(state),
            RecordingAnnouncer::default(),
        );
        let restored = h.timer.state();
        assert_eq!(restored.current_phase_index, 8);
        assert_eq!(restored.time_remaining_seconds, 42);
        assert!(!restored.is_running);
        assert_eq!(restored.paused_at, Some(fixed_time()));
        assert_eq!(h.store.load().expect("load").as_ref(), Some(restored));
    }

    #[test]
    fn restore_replaces_out_of_range_state() {
        let mut state = TimerState::initial();
        state.current_phase_index = 40;
        let h = harness_with(
            InMemoryTimerStateStore::with_state(state),
            RecordingAnnouncer::default(),
        );
        assert_eq!(h.timer.state(), &TimerState::initial());
    }

    #[test]
    fn announcements_need_a_reachable_backend() {
        let h = harness();
        assert!(!h.timer.validate_announcements());

        let mut config = AppConfig::default();
        config.announcements.voice_api_url = "https://api.example.com/announce".to_string();
        let timer: TestTimer = PhaseTimer::new(
            &config,
            Arc::new(InMemoryTimerStateStore::default()),
            Arc::new(RecordingAnnouncer::default()),
            Arc::new(ManualScheduler::default()),
        );
        assert!(timer.validate_announcements());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn full_countdown_advances_exactly_one_phase(index in 0usize..SCHEDULE.len()) {
            let duration = SCHEDULE[index].duration_seconds;
            let mut h = harness_at(index, duration);
            h.timer.start();
            for _ in 0..duration {
                tick_once(&mut h.timer);
            }
            let state = h.timer.state();
            if index == LAST_PHASE_INDEX {
                prop_assert!(state.is_finished());
            } else {
                prop_assert_eq!(state.current_phase_index, index + 1);
                prop_assert_eq!(state.time_remaining_seconds, SCHEDULE[index + 1].duration_seconds);
                prop_assert!(state.is_running);
            }
        }

        #[test]
        fn skip_lands_on_next_phase_with_one_start_message(index in 0usize..LAST_PHASE_INDEX, elapsed in 0u32..900u32) {
            let remaining = SCHEDULE[index].duration_seconds - elapsed;
            let mut h = harness_at(index, remaining);
            h.timer.start();
            h.announcer.take();

            h.timer.skip_to_next();
            let state = h.timer.state();
            prop_assert_eq!(state.current_phase_index, index + 1);
            prop_assert_eq!(state.time_remaining_seconds, SCHEDULE[index + 1].duration_seconds);
            prop_assert_eq!(h.announcer.take(), vec![start_message(&SCHEDULE[index + 1])]);
            prop_assert!(h.timer.pending_tick().is_some());
        }
    }
}
