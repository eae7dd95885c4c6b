//! The reconciler: queue drain, pull merge, and dedup convergence.

use crate::cancel::CancellationToken;
use crate::config::{RetryConfig, SyncConfig};
use crate::dedup::flag_duplicate_groups;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use carnet_remote::{ChangePage, RemoteClient, RemoteError, RemoteTransport};
use carnet_store::{
    EntityId, LocalStore, OpKind, PendingOperation, RemoteSnapshot,
};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Cumulative statistics across all sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Full cycles completed.
    pub cycles_completed: u64,
    /// Operations uploaded and committed.
    pub operations_pushed: u64,
    /// Remote records merged by pulls.
    pub records_pulled: u64,
    /// Conflicts surfaced for manual resolution.
    pub conflicts_detected: u64,
    /// Entities flagged as dedup-key duplicates.
    pub duplicates_flagged: u64,
    /// Entities settled in the error state.
    pub entities_errored: u64,
    /// Transient-failure retries performed.
    pub retries: u64,
    /// Most recent cycle-level error message.
    pub last_error: Option<String>,
}

/// Result of one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Operations uploaded and committed.
    pub pushed: u64,
    /// Remote records merged.
    pub pulled: u64,
    /// Conflicts surfaced for manual resolution.
    pub conflicts: u64,
    /// Entities flagged as duplicates by the dedup pass.
    pub duplicates_flagged: u64,
    /// Entities settled in the error state.
    pub errors: u64,
    /// True when the connectivity probe reported offline and the queue
    /// was left untouched.
    pub offline: bool,
    /// Set when an auth or quota failure stopped the queue.
    pub halted: Option<String>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

/// How one queued operation settled.
enum OpOutcome {
    Pushed,
    Conflicted,
    Errored,
    Halted,
    Skipped,
}

/// Shared context for upload workers.
struct PushCtx<T: RemoteTransport> {
    store: Arc<LocalStore>,
    remote: Arc<RemoteClient<T>>,
    events: Arc<EventBus>,
    retry: RetryConfig,
    timeout: Duration,
    total: usize,
    done: AtomicUsize,
    retries: AtomicU64,
    halt: Mutex<Option<String>>,
}

type PublishedReport = Option<Result<SyncReport, String>>;

/// Drives reconciliation between the local store and the remote API.
///
/// The reconciler owns the only "sync is running" flag in the system:
/// concurrent `full_sync` triggers coalesce onto the in-flight cycle and
/// receive its result instead of starting a parallel run.
pub struct Reconciler<T: RemoteTransport> {
    store: Arc<LocalStore>,
    remote: Arc<RemoteClient<T>>,
    config: SyncConfig,
    events: Arc<EventBus>,
    stats: RwLock<SyncStats>,
    in_flight: Mutex<Option<watch::Receiver<PublishedReport>>>,
}

impl<T: RemoteTransport> Reconciler<T> {
    /// Creates a reconciler.
    pub fn new(store: Arc<LocalStore>, remote: RemoteClient<T>, config: SyncConfig) -> Self {
        Self {
            store,
            remote: Arc::new(remote),
            config,
            events: Arc::new(EventBus::new()),
            stats: RwLock::new(SyncStats::default()),
            in_flight: Mutex::new(None),
        }
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &Arc<RemoteClient<T>> {
        &self.remote
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Drains the pending-operation queue.
    pub async fn sync_pending(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();
        self.drain_queue(cancel, &mut report).await?;
        report.duration = start.elapsed();
        self.absorb(&report);
        Ok(report)
    }

    /// Pulls remote changes since the stored cursor and merges them.
    pub async fn pull_remote(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();
        self.pull_inner(&mut report).await?;
        report.duration = start.elapsed();
        self.absorb(&report);
        Ok(report)
    }

    /// Runs a full cycle: drain, pull, dedup.
    ///
    /// A second trigger while a cycle is in flight does not start a
    /// parallel run; it waits for the current one and returns its result.
    pub async fn full_sync(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        enum Role {
            Leader(watch::Sender<PublishedReport>),
            Follower(watch::Receiver<PublishedReport>),
        }

        let role = {
            let mut slot = self.in_flight.lock();
            match &*slot {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                debug!("sync already in flight; waiting for its result");
                loop {
                    let published = rx.borrow().clone();
                    if let Some(result) = published {
                        return result.map_err(SyncError::CoalescedCycleFailed);
                    }
                    if rx.changed().await.is_err() {
                        return Err(SyncError::CoalescedCycleFailed(
                            "in-flight cycle dropped without a result".into(),
                        ));
                    }
                }
            }
            Role::Leader(tx) => {
                let result = self.run_cycle(cancel).await;
                *self.in_flight.lock() = None;
                let published = match &result {
                    Ok(report) => Ok(report.clone()),
                    Err(e) => Err(e.to_string()),
                };
                let _ = tx.send(Some(published));
                result
            }
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let start = Instant::now();
        self.events.emit(SyncEvent::Started);

        let mut report = SyncReport::default();
        let outcome = self.run_phases(cancel, &mut report).await;
        report.duration = start.elapsed();

        match outcome {
            Ok(()) => {
                self.absorb(&report);
                self.stats.write().cycles_completed += 1;
                info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    duplicates = report.duplicates_flagged,
                    errors = report.errors,
                    "sync cycle complete"
                );
                self.events.emit(SyncEvent::Completed(report.clone()));
                Ok(report)
            }
            Err(e) => {
                self.stats.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        self.drain_queue(cancel, report).await?;
        if report.halted.is_some() || report.offline {
            return Ok(());
        }

        cancel.check()?;
        self.pull_inner(report).await?;

        cancel.check()?;
        report.duplicates_flagged += flag_duplicate_groups(&self.store)? as u64;
        Ok(())
    }

    /// Uploads queued operations.
    ///
    /// Every entity has at most one coalesced operation, so per-entity
    /// submission order holds by construction; the semaphore only bounds
    /// how many distinct entities upload at once.
    async fn drain_queue(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let ops = self.store.get_pending();
        let total = ops.len();
        if total == 0 {
            return Ok(());
        }

        if !self.remote.is_online() {
            debug!(queued = total, "offline; queue left untouched");
            report.offline = true;
            return Ok(());
        }

        let ctx = Arc::new(PushCtx {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
            events: Arc::clone(&self.events),
            retry: self.config.retry.clone(),
            timeout: self.config.request_timeout,
            total,
            done: AtomicUsize::new(0),
            retries: AtomicU64::new(0),
            halt: Mutex::new(None),
        });

        self.events.emit(SyncEvent::Progress { done: 0, total });

        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut workers: JoinSet<OpOutcome> = JoinSet::new();
        let mut cancelled = false;

        for op in ops {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if ctx.halt.lock().is_some() {
                break;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move {
                let _permit = permit;
                process_operation(ctx, op).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(OpOutcome::Pushed) => report.pushed += 1,
                Ok(OpOutcome::Conflicted) => report.conflicts += 1,
                Ok(OpOutcome::Errored) => report.errors += 1,
                Ok(OpOutcome::Halted | OpOutcome::Skipped) => {}
                Err(e) => {
                    warn!(error = %e, "upload worker failed");
                    report.errors += 1;
                }
            }
        }

        self.stats.write().retries += ctx.retries.load(Ordering::SeqCst);
        if let Some(reason) = ctx.halt.lock().clone() {
            warn!(reason = %reason, "upload queue halted");
            report.halted = Some(reason);
        }
        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn pull_inner(&self, report: &mut SyncReport) -> SyncResult<()> {
        if !self.remote.is_online() {
            report.offline = true;
            return Ok(());
        }

        loop {
            let cursor = self.store.pull_cursor();
            let page = self.fetch_page_with_retry(cursor).await?;
            let has_more = page.has_more;
            let next_cursor = page.next_cursor;

            for record in page.records {
                self.store.merge_remote(record)?;
                report.pulled += 1;
            }

            // The cursor only advances once the whole page is merged.
            self.store.set_pull_cursor(next_cursor);
            debug!(cursor = next_cursor, "pull page merged");

            if !has_more {
                break;
            }
        }
        Ok(())
    }

    async fn fetch_page_with_retry(&self, cursor: u64) -> SyncResult<ChangePage> {
        let mut attempt: u32 = 0;
        loop {
            let call = self
                .remote
                .list_changed_since(cursor, self.config.pull_batch_size);
            match with_deadline(self.config.request_timeout, call).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.max_attempts => {
                    attempt += 1;
                    self.stats.write().retries += 1;
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "pull retry");
                    sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn absorb(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        stats.operations_pushed += report.pushed;
        stats.records_pulled += report.pulled;
        stats.conflicts_detected += report.conflicts;
        stats.duplicates_flagged += report.duplicates_flagged;
        stats.entities_errored += report.errors;
        if let Some(reason) = &report.halted {
            stats.last_error = Some(reason.clone());
        }
    }
}

/// Applies a per-call deadline; elapsing is a retryable timeout.
async fn with_deadline<F, O>(timeout: Duration, call: F) -> Result<O, RemoteError>
where
    F: Future<Output = Result<O, RemoteError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

async fn process_operation<T: RemoteTransport>(
    ctx: Arc<PushCtx<T>>,
    op: PendingOperation,
) -> OpOutcome {
    // A halt raised by an earlier worker stops everything behind it.
    let outcome = if ctx.halt.lock().is_some() {
        OpOutcome::Skipped
    } else {
        upload_operation(&ctx, op).await
    };
    let done = ctx.done.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.events.emit(SyncEvent::Progress {
        done,
        total: ctx.total,
    });
    outcome
}

/// What one raw submission produced.
enum Submitted {
    Ack(carnet_remote::RemoteAck),
    /// The delete needed no network call (or the entity vanished); it
    /// resolves locally.
    PurgedLocally,
}

async fn submit_once<T: RemoteTransport>(
    ctx: &PushCtx<T>,
    op: &PendingOperation,
) -> Result<Submitted, RemoteError> {
    let Some(record) = ctx.store.get(&op.entity_local_id) else {
        return Ok(Submitted::PurgedLocally);
    };

    match op.kind {
        OpKind::Create => {
            let payload = snapshot_payload(op)?;
            with_deadline(
                ctx.timeout,
                ctx.remote.create_remote(payload, &op.idempotency_key),
            )
            .await
            .map(Submitted::Ack)
        }
        OpKind::Update => {
            let payload = snapshot_payload(op)?;
            match record.remote_id {
                Some(remote_id) => with_deadline(
                    ctx.timeout,
                    ctx.remote.update_remote(
                        remote_id,
                        payload,
                        record.remote_version,
                        &op.idempotency_key,
                    ),
                )
                .await
                .map(Submitted::Ack),
                // No identity yet: the server has never seen this entity.
                None => with_deadline(
                    ctx.timeout,
                    ctx.remote.create_remote(payload, &op.idempotency_key),
                )
                .await
                .map(Submitted::Ack),
            }
        }
        OpKind::Delete => match record.remote_id {
            Some(remote_id) => with_deadline(
                ctx.timeout,
                ctx.remote.delete_remote(remote_id, &op.idempotency_key),
            )
            .await
            .map(Submitted::Ack),
            None => Ok(Submitted::PurgedLocally),
        },
    }
}

fn snapshot_payload(op: &PendingOperation) -> Result<&carnet_store::EntryPayload, RemoteError> {
    op.payload_snapshot
        .as_ref()
        .ok_or_else(|| RemoteError::Validation(format!("{} operation without a snapshot", op.kind)))
}

async fn upload_operation<T: RemoteTransport>(
    ctx: &PushCtx<T>,
    mut op: PendingOperation,
) -> OpOutcome {
    let entity_id = op.entity_local_id;
    let mut attempt: u32 = 0;
    let mut adopted = false;

    loop {
        match submit_once(ctx, &op).await {
            Ok(Submitted::PurgedLocally) => {
                if let Err(e) = ctx.store.commit_deleted(&entity_id, &op.idempotency_key) {
                    warn!(entity = %entity_id, error = %e, "local purge commit failed");
                }
                return OpOutcome::Pushed;
            }
            Ok(Submitted::Ack(ack)) => {
                let commit = match op.kind {
                    OpKind::Delete => ctx.store.commit_deleted(&entity_id, &op.idempotency_key),
                    _ => ctx.store.commit_synced(
                        &entity_id,
                        ack.remote_id,
                        ack.version,
                        &op.idempotency_key,
                    ),
                };
                return match commit {
                    Ok(_) => OpOutcome::Pushed,
                    Err(e) => {
                        warn!(entity = %entity_id, error = %e, "commit failed after acknowledgement");
                        OpOutcome::Errored
                    }
                };
            }
            Err(RemoteError::Conflict { current }) => {
                let Some(record) = ctx.store.get(&entity_id) else {
                    return OpOutcome::Skipped;
                };
                match current {
                    Some(cur)
                        if !adopted
                            && record.remote_id.is_none()
                            && cur.dedup_key() == record.dedup_key() =>
                    {
                        // The server already owns this record; adopt its
                        // identity and replay the upload as an update.
                        match ctx
                            .store
                            .adopt_remote_id(&entity_id, cur.remote_id, Some(cur.version))
                        {
                            Ok(reshaped) => {
                                debug!(entity = %entity_id, remote_id = %cur.remote_id, "adopted remote identity");
                                adopted = true;
                                op = reshaped;
                                continue;
                            }
                            Err(e) => {
                                warn!(entity = %entity_id, error = %e, "identity adoption failed");
                                settle_conflict(ctx, &entity_id, Some(*cur));
                                return OpOutcome::Conflicted;
                            }
                        }
                    }
                    other => {
                        settle_conflict(ctx, &entity_id, other.map(|boxed| *boxed));
                        return OpOutcome::Conflicted;
                    }
                }
            }
            Err(e) if e.halts_queue() => {
                *ctx.halt.lock() = Some(e.to_string());
                return OpOutcome::Halted;
            }
            Err(e) if e.is_retryable() => {
                attempt += 1;
                if attempt >= ctx.retry.max_attempts {
                    settle_error(ctx, &entity_id, &e);
                    return OpOutcome::Errored;
                }
                ctx.retries.fetch_add(1, Ordering::SeqCst);
                let delay = ctx.retry.delay_for_attempt(attempt);
                debug!(
                    entity = %entity_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure; backing off"
                );
                sleep(delay).await;
            }
            Err(e) => {
                settle_error(ctx, &entity_id, &e);
                return OpOutcome::Errored;
            }
        }
    }
}

/// Records a terminal per-entity failure; operation and entity stay put.
fn settle_error<T: RemoteTransport>(ctx: &PushCtx<T>, id: &EntityId, error: &RemoteError) {
    if let Err(e) = ctx.store.mark_error(id, error.to_string()) {
        warn!(entity = %id, error = %e, "failed to record entity error");
    }
    ctx.events.emit(SyncEvent::EntityError {
        entity_id: *id,
        reason: error.to_string(),
    });
}

/// Surfaces a divergence for manual resolution, retaining both sides.
fn settle_conflict<T: RemoteTransport>(
    ctx: &PushCtx<T>,
    id: &EntityId,
    remote: Option<RemoteSnapshot>,
) {
    if let Err(e) = ctx.store.mark_conflict(id, remote) {
        warn!(entity = %id, error = %e, "failed to record conflict");
    }
    ctx.events.emit(SyncEvent::EntityError {
        entity_id: *id,
        reason: "conflict requires manual resolution".into(),
    });
}
