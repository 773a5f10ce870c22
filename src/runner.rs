//! Per-module execution: one worker per active module instance.
//!
//! Input workers drive their own acquisition loop; processor and output
//! workers consume from a dedicated inbound queue so a slow consumer can
//! never block its producer beyond that queue's capacity (processors) or
//! the drop policy (outputs). Workers gate on the module's started flag,
//! call the instance's `stop()` on the way out, and poll the shutdown
//! signal cooperatively.
//!
//! Failure policy is layered per the engine contract: per-record failures
//! are logged and the record dropped (processors) or buffered (outputs);
//! transient output connection failures flip the worker into a
//! backoff-reconnect loop that replays buffered records in FIFO order
//! before live consumption resumes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::{Backoff, BackoffPolicy, BufferedDelivery, ReplayBuffer};
use crate::dispatch::{Delivery, LinkDispatcher};
use crate::module::{RunContext, SharedEntries, SharedModule};
use crate::record::Record;

/// Live view of a module's outbound links, shared with the graph so that
/// pruning an evicted id takes effect on the running worker.
pub(crate) type SharedLinks = Arc<parking_lot::RwLock<Vec<String>>>;

/// Everything a worker needs about its module, captured at spawn.
pub(crate) struct WorkerSeed {
    pub id: String,
    pub module: SharedModule,
    pub links: SharedLinks,
    pub dispatcher: Arc<LinkDispatcher>,
    pub entries: SharedEntries,
    pub started: watch::Receiver<bool>,
}

/// Handle on one module's worker task.
pub(crate) struct ModuleRunner {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ModuleRunner {
    /// Ask the worker to wind down; it stops the module instance itself.
    pub(crate) fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Take the join handle for the bounded join during stop.
    pub(crate) fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

/// Spawn the acquisition worker for an input module.
pub(crate) fn spawn_input(seed: WorkerSeed, idle_interval: Duration) -> ModuleRunner {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(input_loop(seed, idle_interval, shutdown_rx));
    ModuleRunner {
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

/// Spawn the queue-consuming worker for a processor module.
pub(crate) fn spawn_processor(seed: WorkerSeed, queue: flume::Receiver<Delivery>) -> ModuleRunner {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(processor_loop(seed, queue, shutdown_rx));
    ModuleRunner {
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

/// Spawn the persisting worker for an output module.
pub(crate) fn spawn_output(
    seed: WorkerSeed,
    queue: flume::Receiver<Delivery>,
    buffer_capacity: usize,
    backoff_policy: BackoffPolicy,
) -> ModuleRunner {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(output_loop(
        seed,
        queue,
        buffer_capacity,
        backoff_policy,
        shutdown_rx,
    ));
    ModuleRunner {
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

/// Block until the module's start succeeded, or shutdown was requested.
/// Returns false when the worker should exit without running.
async fn wait_started(
    started: &mut watch::Receiver<bool>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if *shutdown.borrow() {
            return false;
        }
        if *started.borrow() {
            return true;
        }
        tokio::select! {
            changed = started.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            _ = shutdown.changed() => {}
        }
    }
}

async fn input_loop(mut seed: WorkerSeed, idle_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    if wait_started(&mut seed.started, &mut shutdown).await {
        tracing::debug!(module = %seed.id, "input worker running");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let produced = {
                let cx = RunContext::source(seed.entries.clone());
                seed.module.lock().await.run(Record::sentinel(), cx).await
            };
            match produced {
                Ok(record) if record.is_sentinel() => {
                    idle(idle_interval, &mut shutdown).await;
                }
                Ok(mut record) => {
                    seed.dispatcher
                        .decorate(&seed.id, &mut record, &seed.entries)
                        .await;
                    let links = seed.links.read().clone();
                    seed.dispatcher.dispatch(&seed.id, record, &links).await;
                }
                Err(error) => {
                    tracing::warn!(module = %seed.id, %error, "input poll failed");
                    idle(idle_interval, &mut shutdown).await;
                }
            }
        }
    }
    seed.module.lock().await.stop().await;
    tracing::debug!(module = %seed.id, "input worker stopped");
}

async fn idle(interval: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = shutdown.changed() => {}
    }
}

async fn processor_loop(
    mut seed: WorkerSeed,
    queue: flume::Receiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
) {
    if wait_started(&mut seed.started, &mut shutdown).await {
        tracing::debug!(module = %seed.id, "processor worker running");
        loop {
            let delivery = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = queue.recv_async() => match received {
                    Ok(delivery) => delivery,
                    Err(_) => break,
                },
            };

            let cx = RunContext::delivery(delivery.link, seed.entries.clone());
            let result = seed.module.lock().await.run(delivery.record, cx).await;
            match result {
                Ok(record) if record.is_sentinel() => {}
                Ok(record) => {
                    let links = seed.links.read().clone();
                    seed.dispatcher.dispatch(&seed.id, record, &links).await;
                }
                Err(error) => {
                    tracing::warn!(
                        module = %seed.id,
                        %error,
                        "processor failed on record, dropping it"
                    );
                }
            }
        }
    }
    seed.module.lock().await.stop().await;
    tracing::debug!(module = %seed.id, "processor worker stopped");
}

async fn output_loop(
    mut seed: WorkerSeed,
    queue: flume::Receiver<Delivery>,
    buffer_capacity: usize,
    backoff_policy: BackoffPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    if wait_started(&mut seed.started, &mut shutdown).await {
        tracing::debug!(module = %seed.id, "output worker running");
        let mut buffer = ReplayBuffer::new(buffer_capacity);
        let mut backoff = Backoff::new(backoff_policy);
        let mut connected = true;

        loop {
            if !connected {
                // Disconnected: leave the queue alone so live data keeps its
                // order behind the buffered entries, and reconnect with
                // linear backoff.
                let delay = backoff.next_delay();
                let proceed = tokio::select! {
                    _ = shutdown.changed() => !*shutdown.borrow(),
                    _ = tokio::time::sleep(delay) => true,
                };
                if !proceed {
                    break;
                }
                let reconnected = seed.module.lock().await.start().await;
                match reconnected {
                    Ok(()) => {
                        if replay(&seed, &mut buffer).await {
                            connected = true;
                            backoff.reset();
                            tracing::info!(module = %seed.id, "output reconnected");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(module = %seed.id, %error, "reconnect attempt failed");
                    }
                }
                continue;
            }

            let delivery = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = queue.recv_async() => match received {
                    Ok(delivery) => delivery,
                    Err(_) => break,
                },
            };

            let cx = RunContext::delivery(delivery.link.clone(), seed.entries.clone());
            let result = seed
                .module
                .lock()
                .await
                .run(delivery.record.clone(), cx)
                .await;
            match result {
                Ok(_) => {}
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        module = %seed.id,
                        %error,
                        "output connection lost, buffering record for replay"
                    );
                    buffer.push(delivery, false);
                    connected = false;
                }
                Err(error) => {
                    tracing::warn!(
                        module = %seed.id,
                        %error,
                        "output rejected record, buffering as invalid"
                    );
                    buffer.push(delivery, true);
                }
            }
        }
    }
    seed.module.lock().await.stop().await;
    tracing::debug!(module = %seed.id, "output worker stopped");
}

/// Replay buffered non-invalid deliveries in original FIFO order, each
/// under the link it originally traveled. Returns true when the buffer was
/// fully replayed; on a transient failure the unreplayed tail is re-queued
/// at the front and false is returned so the caller stays disconnected.
async fn replay(seed: &WorkerSeed, buffer: &mut ReplayBuffer) -> bool {
    let mut pending: VecDeque<Delivery> = buffer.drain_replayable().into();
    while let Some(delivery) = pending.pop_front() {
        let cx = RunContext::delivery(delivery.link.clone(), seed.entries.clone());
        let result = seed
            .module
            .lock()
            .await
            .run(delivery.record.clone(), cx)
            .await;
        match result {
            Ok(_) => {}
            Err(error) if error.is_transient() => {
                tracing::warn!(module = %seed.id, %error, "replay interrupted, keeping buffer");
                let mut rest = vec![BufferedDelivery {
                    delivery,
                    invalid: false,
                }];
                rest.extend(pending.into_iter().map(|delivery| BufferedDelivery {
                    delivery,
                    invalid: false,
                }));
                buffer.requeue_front(rest);
                return false;
            }
            Err(error) => {
                tracing::warn!(module = %seed.id, %error, "record invalid on replay, discarding");
                buffer.push(delivery, true);
            }
        }
    }
    true
}
