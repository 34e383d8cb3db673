use crate::application::phase_timer::{PhaseTimer, TickHandle, TickScheduler, TimerSnapshot};
use crate::domain::schedule::TimerState;
use crate::infrastructure::announcer::AnnouncementSink;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::TimerStateStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

const COMMAND_BUFFER: usize = 32;

/// Remembers the single tick the timer is waiting for. The driver loop asks
/// for its deadline and sleeps until then.
#[derive(Debug, Default)]
pub struct TokioTickScheduler {
    next_id: AtomicU64,
    pending: Mutex<Option<(TickHandle, Instant)>>,
}

impl TokioTickScheduler {
    pub fn next_due(&self) -> Option<(TickHandle, Instant)> {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `handle` if it is still the pending tick.
    pub fn take(&self, handle: TickHandle) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match *pending {
            Some((current, _)) if current == handle => {
                *pending = None;
                true
            }
            _ => false,
        }
    }
}

impl TickScheduler for TokioTickScheduler {
    fn schedule_once(&self, delay: Duration) -> TickHandle {
        let handle = TickHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Some((handle, Instant::now() + delay));
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*pending, Some((current, _)) if current == handle) {
            *pending = None;
        }
    }
}

#[derive(Debug)]
pub enum TimerCommand {
    Start,
    Pause,
    Skip,
    Reset,
    EndDay,
    Snapshot(oneshot::Sender<TimerSnapshot>),
}

/// Owns the timer on one task: commands and ticks are handled strictly one
/// after the other. Returns the final state once every command sender is gone.
pub async fn run_timer_loop<S, A>(
    mut timer: PhaseTimer<S, A, TokioTickScheduler>,
    scheduler: Arc<TokioTickScheduler>,
    mut commands: mpsc::Receiver<TimerCommand>,
) -> TimerState
where
    S: TimerStateStore + ?Sized,
    A: AnnouncementSink + ?Sized,
{
    loop {
        let due = scheduler.next_due();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply_command(&mut timer, command),
                None => break,
            },
            handle = wait_for_tick(due) => {
                if scheduler.take(handle) {
                    timer.tick(handle);
                }
            }
        }
    }
    tracing::debug!("timer loop stopped");
    timer.state().clone()
}

fn apply_command<S, A>(timer: &mut PhaseTimer<S, A, TokioTickScheduler>, command: TimerCommand)
where
    S: TimerStateStore + ?Sized,
    A: AnnouncementSink + ?Sized,
{
    match command {
        TimerCommand::Start => timer.start(),
        TimerCommand::Pause => timer.pause(),
        TimerCommand::Skip => timer.skip_to_next(),
        TimerCommand::Reset => timer.reset(),
        TimerCommand::EndDay => timer.end_day(),
        TimerCommand::Snapshot(reply) => {
            let _ = reply.send(timer.snapshot());
        }
    }
}

async fn wait_for_tick(due: Option<(TickHandle, Instant)>) -> TickHandle {
    match due {
        Some((handle, deadline)) => {
            sleep_until(deadline).await;
            handle
        }
        None => std::future::pending().await,
    }
}

#[derive(Debug, Clone)]
pub struct TimerHandle {
    commands: mpsc::Sender<TimerCommand>,
}

impl TimerHandle {
    pub async fn send(&self, command: TimerCommand) -> Result<(), InfraError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| InfraError::InvalidConfig("timer loop is not running".to_string()))
    }

    pub async fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        let (reply, response) = oneshot::channel();
        self.send(TimerCommand::Snapshot(reply)).await?;
        response
            .await
            .map_err(|_| InfraError::InvalidConfig("timer loop dropped snapshot request".to_string()))
    }
}

/// Spawns the timer loop on the current runtime.
pub fn spawn_timer<S, A>(
    timer: PhaseTimer<S, A, TokioTickScheduler>,
    scheduler: Arc<TokioTickScheduler>,
) -> (TimerHandle, JoinHandle<TimerState>)
where
    S: TimerStateStore + ?Sized + 'static,
    A: AnnouncementSink + ?Sized + 'static,
{
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run_timer_loop(timer, scheduler, receiver));
    (TimerHandle { commands }, task)
}
