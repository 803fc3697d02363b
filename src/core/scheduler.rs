use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Work run on every poll tick.
#[async_trait]
pub trait PollTask: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Advisory "should run now" signal from the host (backgrounded, idle, ...).
/// Suspension only skips timer ticks; it is not a correctness guarantee.
pub trait SuspensionGate: Send + Sync {
    fn should_run(&self) -> bool;
}

impl<F> SuspensionGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_run(&self) -> bool {
        self()
    }
}

pub struct AlwaysRun;

impl SuspensionGate for AlwaysRun {
    fn should_run(&self) -> bool {
        true
    }
}

/// Shared suspend switch the host flips when it goes idle.
#[derive(Debug, Clone, Default)]
pub struct SuspendFlag(Arc<AtomicBool>);

impl SuspendFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl SuspensionGate for SuspendFlag {
    fn should_run(&self) -> bool {
        !self.is_suspended()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub skip_when_suspended: bool,
    pub run_immediately: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            skip_when_suspended: true,
            run_immediately: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    pub interval: Duration,
    pub last_tick: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub is_running: bool,
}

/// Notify of the currently armed worker. Empty while stopped, so a fire that
/// lands then is dropped instead of carried into the next start.
type TriggerSlot = Arc<RwLock<Option<Arc<Notify>>>>;

/// Cloneable handle that requests an immediate out-of-cadence run. Handles
/// outlive restarts and always reach the worker armed at fire time.
#[derive(Debug, Clone)]
pub struct PollTrigger(TriggerSlot);

impl PollTrigger {
    pub fn fire(&self) {
        if let Some(notify) = self.0.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            notify.notify_one();
        }
    }
}

struct Armed {
    task: Arc<dyn PollTask>,
    options: PollOptions,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
}

/// Interval driver for one poll task.
///
/// At most one run of the task is in flight at a time, across timer ticks,
/// manual triggers and re-arms. A trigger that lands during a run is kept and
/// served once the run finishes; a timer tick that lands during a run is
/// dropped. Stopping discards pending triggers and the results of any run
/// still in flight.
pub struct PollScheduler {
    name: String,
    gate: Arc<dyn SuspensionGate>,
    trigger: TriggerSlot,
    generation: Arc<AtomicU64>,
    in_flight: Arc<AtomicBool>,
    state: Arc<RwLock<PollState>>,
    armed: Option<Armed>,
}

impl PollScheduler {
    pub fn new(name: &str, gate: Arc<dyn SuspensionGate>) -> Self {
        Self {
            name: name.to_string(),
            gate,
            trigger: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
            state: Arc::new(RwLock::new(PollState::default())),
            armed: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arms the timer. Starting an already running scheduler replaces its task.
    pub fn start(&mut self, task: Arc<dyn PollTask>, interval: Duration, options: PollOptions) {
        self.stop();
        self.arm(task, interval, options, Arc::new(Notify::new()));
    }

    /// Cancels the timer. Safe to call any number of times. A run already in
    /// flight completes, but nothing further is scheduled.
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.trigger.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(armed) = self.armed.take() {
            let _ = armed.shutdown.send(true);
            debug!("{} poller stopped", self.name);
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = PollState::default();
    }

    /// Tears down and re-arms the timer with a new cadence.
    pub fn set_interval(&mut self, interval: Duration) {
        if let Some(armed) = self.armed.take() {
            let _ = armed.shutdown.send(true);
            // Pending triggers carry over to the new cadence
            self.arm(armed.task, interval, armed.options, armed.trigger);
        }
    }

    pub fn trigger(&self) {
        self.trigger_handle().fire();
    }

    pub fn trigger_handle(&self) -> PollTrigger {
        PollTrigger(self.trigger.clone())
    }

    pub fn is_active(&self) -> bool {
        self.armed.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PollState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn arm(
        &mut self,
        task: Arc<dyn PollTask>,
        interval: Duration,
        options: PollOptions,
        trigger: Arc<Notify>,
    ) {
        let interval = interval.max(MIN_INTERVAL);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.trigger.write().unwrap_or_else(PoisonError::into_inner) = Some(trigger.clone());
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.interval = interval;
            state.is_running = true;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            name: self.name.clone(),
            task: task.clone(),
            gate: self.gate.clone(),
            trigger: trigger.clone(),
            in_flight: self.in_flight.clone(),
            state: self.state.clone(),
            generation,
            current_generation: self.generation.clone(),
            options,
        };
        tokio::spawn(worker.drive(interval, shutdown_rx));
        debug!("{} poller armed every {:?}", self.name, interval);

        self.armed = Some(Armed {
            task,
            options,
            trigger,
            shutdown,
        });
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    name: String,
    task: Arc<dyn PollTask>,
    gate: Arc<dyn SuspensionGate>,
    trigger: Arc<Notify>,
    in_flight: Arc<AtomicBool>,
    state: Arc<RwLock<PollState>>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    options: PollOptions,
}

impl Worker {
    async fn drive(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let start = if self.options.run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let manual = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = self.trigger.notified() => true,
                _ = ticker.tick() => false,
            };

            if !manual && self.options.skip_when_suspended && !self.gate.should_run() {
                debug!("{}: host suspended, skipping tick", self.name);
                continue;
            }

            self.run_once().await;
        }
    }

    async fn run_once(&self) {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("{}: previous run still in flight, skipping", self.name);
            return;
        };

        let result = self.task.run().await;

        let failures = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if self.current_generation.load(Ordering::SeqCst) != self.generation {
                debug!("{}: discarding result of a run outlived by stop", self.name);
                return;
            }
            state.last_tick = Some(Utc::now());
            match result {
                Ok(()) => state.consecutive_failures = 0,
                Err(_) => state.consecutive_failures += 1,
            }
            state.consecutive_failures
        };

        if let Err(e) = result {
            warn!("{} tick failed ({} in a row): {:#}", self.name, failures, e);
        }
    }
}
