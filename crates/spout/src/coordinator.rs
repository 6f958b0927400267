//! The coordinator: supervises virtual spouts on parallel workers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use spout_core::{Error, MessageId, Result, StreamMessage};
use telemetry::metrics;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SpoutConfig;
use crate::virtual_spout::VirtualSpout;

/// Consecutive poll failures before a worker gives up on its spout.
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 10;

type Mailboxes = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<MessageId>>>>;

/// Supervises many virtual spouts: runs each on its own worker, fans their
/// messages into one output queue, routes acks and fails back to the
/// originating spout, and drives the periodic offset flush.
///
/// Cloning shares the underlying state; the monitor worker runs on a clone.
#[derive(Clone)]
pub struct SpoutCoordinator {
    config: SpoutConfig,
    /// Spouts awaiting start, picked up by the next monitor sweep
    pending: Arc<Mutex<VecDeque<VirtualSpout>>>,
    /// Stop flags of live spouts, keyed by consumer id
    running: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
    ack_boxes: Mailboxes,
    fail_boxes: Mailboxes,
    running_flag: Arc<AtomicBool>,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SpoutCoordinator {
    /// Builds a coordinator seeded with the firehose spout.
    pub fn new(firehose: VirtualSpout, config: SpoutConfig) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(firehose);

        Self {
            config,
            pending: Arc::new(Mutex::new(pending)),
            running: Arc::new(RwLock::new(HashMap::new())),
            ack_boxes: Arc::new(RwLock::new(HashMap::new())),
            fail_boxes: Arc::new(RwLock::new(HashMap::new())),
            running_flag: Arc::new(AtomicBool::new(false)),
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the monitor worker and blocks until every initially-pending
    /// spout has completed its open.
    pub async fn open(&self, output: mpsc::Sender<StreamMessage>) -> Result<()> {
        if self.running_flag.swap(true, Ordering::SeqCst) {
            return Err(Error::illegal_state("coordinator is already open"));
        }

        let initial = self.pending.lock().len();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<()>();

        let monitor = {
            let coordinator = self.clone();
            tokio::spawn(coordinator.run_monitor(output, ready_tx))
        };
        *self.monitor.lock() = Some(monitor);

        // Startup latch: one readiness signal per initially-pending spout.
        for _ in 0..initial {
            if ready_rx.recv().await.is_none() {
                return Err(Error::illegal_state("monitor worker terminated during startup"));
            }
        }

        info!(spouts = initial, "Coordinator open");
        Ok(())
    }

    /// Queues a dynamically created spout; the next monitor sweep starts
    /// it.
    pub fn add_sideline_spout(&self, spout: VirtualSpout) {
        info!(consumer_id = %spout.consumer_id(), "Queueing virtual spout");
        self.pending.lock().push_back(spout);
    }

    /// Routes an ack to the originating spout's mailbox. Acks for spouts
    /// that have already been torn down are dropped.
    pub fn ack(&self, id: MessageId) {
        match self.ack_boxes.read().get(id.consumer_id()) {
            Some(tx) => {
                let _ = tx.send(id);
            }
            None => {
                debug!(consumer_id = %id.consumer_id(), "Ack for unknown consumer dropped");
            }
        }
    }

    /// Routes a fail to the originating spout's mailbox.
    pub fn fail(&self, id: MessageId) {
        match self.fail_boxes.read().get(id.consumer_id()) {
            Some(tx) => {
                let _ = tx.send(id);
            }
            None => {
                debug!(consumer_id = %id.consumer_id(), "Fail for unknown consumer dropped");
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.read().len()
    }

    pub fn is_open(&self) -> bool {
        self.running_flag.load(Ordering::SeqCst)
    }

    /// Requests stop on every live spout, waits up to the configured
    /// deadline for them to drain, then signals the monitor to exit.
    pub async fn close(&self) {
        info!("Coordinator closing");

        for stop in self.running.read().values() {
            stop.store(true, Ordering::SeqCst);
        }

        let deadline = Instant::now() + self.config.max_stop_wait();
        while !self.running.read().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.running.read().len();
        if remaining > 0 {
            warn!(
                remaining = remaining,
                "Shutdown deadline elapsed; abandoning wait"
            );
        }

        self.running_flag.store(false, Ordering::SeqCst);

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                error!(error = %e, "Monitor worker failed");
            }
        }

        info!("Coordinator closed");
    }

    /// Monitor loop: drains the pending queue and sleeps between sweeps.
    async fn run_monitor(
        self,
        output: mpsc::Sender<StreamMessage>,
        ready_tx: mpsc::UnboundedSender<()>,
    ) {
        info!("Spout monitor started");

        while self.running_flag.load(Ordering::SeqCst) {
            loop {
                let next = self.pending.lock().pop_front();
                let Some(spout) = next else {
                    break;
                };
                self.launch_spout(spout, output.clone(), ready_tx.clone());
            }

            debug!(snapshot = ?metrics().snapshot(), "Coordinator sweep");
            tokio::time::sleep(self.config.monitor_interval()).await;
        }

        info!("Spout monitor stopped");
    }

    /// Spawns the worker owning one virtual spout.
    fn launch_spout(
        &self,
        mut spout: VirtualSpout,
        output: mpsc::Sender<StreamMessage>,
        ready_tx: mpsc::UnboundedSender<()>,
    ) {
        let coordinator = self.clone();
        let flush_interval = self.config.flush_interval();
        let idle_wait = self.config.idle_wait();

        tokio::spawn(async move {
            let consumer_id = spout.consumer_id().to_string();

            if let Err(e) = spout.open().await {
                error!(consumer_id = %consumer_id, error = %e, "Failed to open virtual spout");
                let _ = ready_tx.send(());
                return;
            }

            let (ack_tx, ack_rx) = mpsc::unbounded_channel();
            let (fail_tx, fail_rx) = mpsc::unbounded_channel();
            coordinator.ack_boxes.write().insert(consumer_id.clone(), ack_tx);
            coordinator.fail_boxes.write().insert(consumer_id.clone(), fail_tx);
            coordinator
                .running
                .write()
                .insert(consumer_id.clone(), spout.stop_handle());
            metrics().running_spouts.inc();
            let _ = ready_tx.send(());
            drop(ready_tx);

            run_spout_loop(&mut spout, &output, ack_rx, fail_rx, flush_interval, idle_wait).await;

            if let Err(e) = spout.close().await {
                warn!(consumer_id = %consumer_id, error = %e, "Error closing virtual spout");
            }

            coordinator.ack_boxes.write().remove(&consumer_id);
            coordinator.fail_boxes.write().remove(&consumer_id);
            coordinator.running.write().remove(&consumer_id);
            metrics().running_spouts.dec();
            info!(consumer_id = %consumer_id, "Virtual spout terminated");
        });
    }
}

/// Per-spout worker loop. Each iteration emits at most one message, drains
/// both mailboxes, and flushes state on the configured cadence, strictly in
/// that order.
async fn run_spout_loop(
    spout: &mut VirtualSpout,
    output: &mpsc::Sender<StreamMessage>,
    mut ack_rx: mpsc::UnboundedReceiver<MessageId>,
    mut fail_rx: mpsc::UnboundedReceiver<MessageId>,
    flush_interval: Duration,
    idle_wait: Duration,
) {
    let consumer_id = spout.consumer_id().to_string();
    let mut last_flush = Instant::now();
    let mut consecutive_errors = 0u32;

    while !spout.is_stop_requested() {
        match spout.next_message().await {
            Ok(Some(message)) => {
                consecutive_errors = 0;
                // Blocks when the queue is full: downstream backpressure.
                if output.send(message).await.is_err() {
                    warn!(consumer_id = %consumer_id, "Output queue closed; stopping");
                    break;
                }
            }
            Ok(None) => {
                consecutive_errors = 0;
                tokio::time::sleep(idle_wait).await;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    consumer_id = %consumer_id,
                    error = %e,
                    consecutive = consecutive_errors,
                    "Poll failed; retrying next iteration"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                    error!(consumer_id = %consumer_id, "Persistent poll failures; stopping spout");
                    break;
                }
                tokio::time::sleep(idle_wait).await;
            }
        }

        while let Ok(id) = ack_rx.try_recv() {
            if let Err(e) = spout.ack(Some(id)).await {
                warn!(consumer_id = %consumer_id, error = %e, "Ack failed");
            }
        }

        while let Ok(id) = fail_rx.try_recv() {
            if let Err(e) = spout.fail(Some(id)).await {
                warn!(consumer_id = %consumer_id, error = %e, "Fail handling failed");
            }
        }

        if last_flush.elapsed() >= flush_interval {
            // Offsets are monotone, so a failed flush simply retries on the
            // next tick.
            if let Err(e) = spout.flush_state().await {
                metrics().flush_errors.inc();
                warn!(consumer_id = %consumer_id, error = %e, "State flush failed");
            }
            last_flush = Instant::now();
        }
    }
}
