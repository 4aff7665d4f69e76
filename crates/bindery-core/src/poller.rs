// ── Poll scheduler ──
//
// One task per device. Cycles never overlap: the next one starts a full
// interval after the previous one completes (fixed delay). Cancellation
// is checked before every cycle; a cycle already in flight is allowed
// to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Observable scheduler state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PollState {
    /// Terminal: disposed or shut down.
    Stopped,
    /// Waiting for the next fixed-delay tick.
    Scheduled,
    /// A cycle is in flight.
    Running,
    /// No recurring timer (interval 0); only explicit refreshes run.
    Idle,
    /// Stopped after an auth or configuration failure until the device
    /// is re-initialized.
    Suspended,
}

/// What the scheduler should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    Continue,
    Suspend,
}

/// One unit of polling work.
#[async_trait]
pub trait PollCycle: Send + Sync {
    async fn run(&self) -> CycleVerdict;
}

/// Result of an out-of-band refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A cycle will start as soon as the scheduler wakes.
    Accepted,
    /// A cycle is already running; nothing was queued.
    SkippedRunning,
    /// Polling is suspended or stopped.
    Inactive,
}

/// Handle to a running poll task.
pub struct Poller {
    cancel: CancellationToken,
    state: watch::Receiver<PollState>,
    trigger: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Spawn the poll task. The first cycle runs immediately.
    pub fn spawn(cycle: Arc<dyn PollCycle>, interval: Duration, cancel: CancellationToken) -> Self {
        let (state_tx, state) = watch::channel(PollState::Scheduled);
        let (trigger, trigger_rx) = mpsc::channel(1);
        let handle = tokio::spawn(poll_loop(
            cycle,
            interval,
            cancel.clone(),
            state_tx,
            trigger_rx,
        ));
        Self {
            cancel,
            state,
            trigger,
            handle,
        }
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// Ask for an immediate cycle. Skipped while one is running.
    pub fn refresh_now(&self) -> RefreshRequest {
        match self.state() {
            PollState::Running => return RefreshRequest::SkippedRunning,
            PollState::Stopped | PollState::Suspended => return RefreshRequest::Inactive,
            PollState::Scheduled | PollState::Idle => {}
        }
        match self.trigger.try_send(()) {
            // Full: a request is already pending, which is the same outcome.
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => RefreshRequest::Accepted,
            Err(mpsc::error::TrySendError::Closed(())) => RefreshRequest::Inactive,
        }
    }

    /// Cancel future cycles without waiting for the task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit, including any in-flight
    /// cycle.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn poll_loop(
    cycle: Arc<dyn PollCycle>,
    interval: Duration,
    cancel: CancellationToken,
    state: watch::Sender<PollState>,
    mut trigger: mpsc::Receiver<()>,
) {
    let delay = (!interval.is_zero()).then_some(interval);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        state.send_replace(PollState::Running);
        let verdict = cycle.run().await;
        // requests that raced with the cycle are dropped, not queued
        while trigger.try_recv().is_ok() {}

        if cancel.is_cancelled() {
            break;
        }
        if verdict == CycleVerdict::Suspend {
            debug!("poll task suspended");
            state.send_replace(PollState::Suspended);
            return;
        }

        state.send_replace(match delay {
            Some(_) => PollState::Scheduled,
            None => PollState::Idle,
        });

        let tick = async {
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(()) = trigger.recv() => debug!("refresh requested"),
            () = tick => {}
        }
    }

    state.send_replace(PollState::Stopped);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    /// Records start and end instants; each run takes `work`.
    struct Recorder {
        work: Duration,
        runs: Mutex<Vec<(Instant, Instant)>>,
        suspend_after: Option<usize>,
    }

    impl Recorder {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                runs: Mutex::new(Vec::new()),
                suspend_after: None,
            })
        }

        fn count(&self) -> usize {
            self.runs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PollCycle for Recorder {
        async fn run(&self) -> CycleVerdict {
            let start = Instant::now();
            tokio::time::sleep(self.work).await;
            let mut runs = self.runs.lock().unwrap();
            runs.push((start, Instant::now()));
            match self.suspend_after {
                Some(n) if runs.len() >= n => CycleVerdict::Suspend,
                _ => CycleVerdict::Continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_between_completion_and_next_start() {
        let recorder = Recorder::new(Duration::from_secs(3));
        let poller = Poller::spawn(
            recorder.clone(),
            Duration::from_secs(10),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        poller.stop().await;

        let runs = recorder.runs.lock().unwrap().clone();
        assert!(runs.len() >= 4, "got {} runs", runs.len());
        for pair in runs.windows(2) {
            let (_, end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start.duration_since(end) >= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_runs_once() {
        let recorder = Recorder::new(Duration::from_millis(10));
        let poller = Poller::spawn(recorder.clone(), Duration::ZERO, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(recorder.count(), 1);
        assert_eq!(poller.state(), PollState::Idle);

        // explicit refresh still works without a timer
        assert_eq!(poller.refresh_now(), RefreshRequest::Accepted);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_skipped_while_running() {
        let recorder = Recorder::new(Duration::from_secs(5));
        let poller = Poller::spawn(
            recorder.clone(),
            Duration::from_secs(30),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(poller.state(), PollState::Running);
        assert_eq!(poller.refresh_now(), RefreshRequest::SkippedRunning);

        // after the first cycle, only the regular schedule applies
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.count(), 1);
        assert_eq!(poller.state(), PollState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_early_and_resets_delay() {
        let recorder = Recorder::new(Duration::ZERO);
        let poller = Poller::spawn(
            recorder.clone(),
            Duration::from_secs(100),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.count(), 1);
        assert_eq!(poller.refresh_now(), RefreshRequest::Accepted);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.count(), 2);

        // next regular cycle is 100s after the refresh, not after the first run
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(recorder.count(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_in_flight_cycle_finish() {
        let recorder = Recorder::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let poller = Poller::spawn(recorder.clone(), Duration::from_secs(10), cancel.clone());
        let mut state = poller.watch_state();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(poller.state(), PollState::Running);
        poller.cancel();

        state
            .wait_for(|s| *s == PollState::Stopped)
            .await
            .unwrap();
        assert_eq!(recorder.count(), 1, "in-flight cycle completed");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.count(), 1, "no further cycles");
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_stops_polling() {
        let recorder = Arc::new(Recorder {
            work: Duration::ZERO,
            runs: Mutex::new(Vec::new()),
            suspend_after: Some(1),
        });
        let poller = Poller::spawn(
            recorder.clone(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.count(), 1);
        assert_eq!(poller.state(), PollState::Suspended);
        assert_eq!(poller.refresh_now(), RefreshRequest::Inactive);
    }
}
