//! One partition: the connections that share a single [`PartitionKey`].
//!
//! Capacity is a [`Semaphore`] with `max_size` permits. Every lease, and every
//! connection being created, holds one permit; because tokio's semaphore
//! queues waiters in arrival order, a waiting acquire is never overtaken by
//! later arrivals. Slot bookkeeping lives behind a `std::sync::Mutex` that is
//! never held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::{Lease, LeaseOwner, PooledConnection};
use super::key::PartitionKey;
use super::slot::{ConnectionSlot, SlotCounts, SlotSet, SlotState};
use crate::config::PoolConfig;
use crate::error::ConnectorPoolError;
use crate::factory::ConnectionFactory;
use crate::statistics::SubPoolStatistics;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of one idle sweep over a partition.
#[derive(Debug, Default)]
pub struct EvictionReport {
    /// Idle connections destroyed for exceeding the idle timeout
    pub evicted: usize,
    /// Connections created afterwards to get back to `min_size`
    pub refilled: usize,
    /// Destroy and refill failures, already logged
    pub errors: Vec<ConnectorPoolError>,
}

impl EvictionReport {
    pub fn merge(&mut self, other: EvictionReport) {
        self.evicted += other.evicted;
        self.refilled += other.refilled;
        self.errors.extend(other.errors);
    }
}

/// Outcome of shutting down one or more partitions.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Idle connections destroyed immediately
    pub destroyed: usize,
    /// Leased connections that will be destroyed when released or dropped
    pub deferred: usize,
    pub errors: Vec<ConnectorPoolError>,
}

impl ShutdownReport {
    pub fn merge(&mut self, other: ShutdownReport) {
        self.destroyed += other.destroyed;
        self.deferred += other.deferred;
        self.errors.extend(other.errors);
    }
}

enum Checkout<C> {
    Idle(ConnectionSlot<C>),
    Create,
    Closed,
    Full,
}

/// Undoes a half-finished acquire or release if its future is dropped or
/// fails: gives back the permit, un-counts a pending creation and disposes of
/// the slot it was working on.
///
/// A connection parked in the guard (one being validated) is handed to a
/// spawned destroy. A connection already inside `ConnectionFactory::destroy`
/// when the future is dropped is dropped with that call; its slot is still
/// forgotten and counted destroyed.
struct SlotGuard<'a, F: ConnectionFactory> {
    pool: &'a SubPool<F>,
    permit: bool,
    creating: bool,
    slot: Option<(u64, u64)>,
    conn: Option<F::Connection>,
}

impl<'a, F: ConnectionFactory> SlotGuard<'a, F> {
    fn new(pool: &'a SubPool<F>) -> Self {
        Self {
            pool,
            permit: true,
            creating: false,
            slot: None,
            conn: None,
        }
    }

    fn release_permit(&mut self) {
        if std::mem::take(&mut self.permit) {
            self.pool.permits.add_permits(1);
        }
    }

    /// The lease now owns the permit.
    fn keep_permit(&mut self) {
        self.permit = false;
    }

    fn park(&mut self, id: u64, epoch: u64, conn: F::Connection) {
        self.slot = Some((id, epoch));
        self.conn = Some(conn);
    }

    /// Ask the factory whether the parked connection is still usable.
    async fn validate_parked(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => self.pool.factory.validate(conn).await,
            None => false,
        }
    }
}

impl<F: ConnectionFactory> Drop for SlotGuard<'_, F> {
    fn drop(&mut self) {
        if self.creating {
            let mut slots = self.pool.lock_slots();
            slots.creating = slots.creating.saturating_sub(1);
        }
        if let Some((id, epoch)) = self.slot.take() {
            match self.conn.take() {
                Some(conn) => {
                    debug!(
                        partition = %self.pool.key,
                        slot = id,
                        "operation cancelled, destroying connection"
                    );
                    self.pool.destroy_detached(id, epoch, conn);
                }
                None => {
                    if self.pool.lock_slots().out.remove(&id).is_some() {
                        debug!(
                            partition = %self.pool.key,
                            slot = id,
                            "connection dropped mid-operation"
                        );
                        self.pool.statistics.record_destroyed(epoch);
                    }
                }
            }
        }
        self.release_permit();
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts an acquire in flight; a partition with one is never removed.
#[derive(Debug)]
pub struct PendingAcquire<F: ConnectionFactory> {
    pool: Arc<SubPool<F>>,
}

impl<F: ConnectionFactory> PendingAcquire<F> {
    #[must_use]
    pub fn pool(&self) -> &Arc<SubPool<F>> {
        &self.pool
    }
}

impl<F: ConnectionFactory> Drop for PendingAcquire<F> {
    fn drop(&mut self) {
        self.pool.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The set of connections of one partition plus its statistics.
pub struct SubPool<F: ConnectionFactory> {
    id: u64,
    key: PartitionKey,
    config: Arc<PoolConfig>,
    factory: Arc<F>,
    permits: Semaphore,
    slots: Mutex<SlotSet<F::Connection>>,
    statistics: SubPoolStatistics,
    pending: AtomicUsize,
    next_slot_id: AtomicU64,
    shut_down: AtomicBool,
    this: Weak<SubPool<F>>,
}

impl<F: ConnectionFactory> std::fmt::Debug for SubPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubPool")
            .field("key", &self.key)
            .field("slots", &self.slot_counts())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> SubPool<F> {
    pub(crate) fn new(
        key: PartitionKey,
        config: Arc<PoolConfig>,
        factory: Arc<F>,
        statistics_enabled: bool,
    ) -> Arc<Self> {
        let max = config.max_size;
        Arc::new_cyclic(|this| Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            key,
            config,
            factory,
            permits: Semaphore::new(max),
            slots: Mutex::new(SlotSet::new()),
            statistics: SubPoolStatistics::new(statistics_enabled),
            pending: AtomicUsize::new(0),
            next_slot_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    #[must_use]
    pub fn statistics(&self) -> &SubPoolStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn slot_counts(&self) -> SlotCounts {
        SlotCounts::of(&self.lock_slots())
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Acquires currently in flight.
    #[must_use]
    pub fn pending_acquires(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn lock_slots(&self) -> MutexGuard<'_, SlotSet<F::Connection>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an acquire in flight. The manager calls this while it still
    /// holds the partition map entry.
    pub(crate) fn begin_acquire(self: &Arc<Self>) -> PendingAcquire<F> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingAcquire {
            pool: Arc::clone(self),
        }
    }

    /// Lease a connection, waiting at most `timeout` for capacity.
    ///
    /// # Errors
    /// `TimedOut` when no permit frees up in time, `ExhaustedError` when
    /// creation or validation keeps failing, `ShutdownError` once the
    /// partition is shut down.
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, ConnectorPoolError> {
        let _in_flight = InFlight::enter(&self.pending);
        self.acquire_inner(timeout).await
    }

    async fn acquire_inner(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, ConnectorPoolError> {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }
        self.lock_slots().touch();

        let started = Instant::now();
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(self.shut_down_error()),
            Err(_elapsed) => {
                let waited = started.elapsed();
                self.statistics.record_timed_out();
                debug!(partition = %self.key, ?waited, "acquire timed out");
                return Err(ConnectorPoolError::TimedOut {
                    partition: self.key.to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };
        let waited = started.elapsed();
        permit.forget();

        let mut guard = SlotGuard::new(self);
        let (slot_id, slot_epoch, conn) = self.checkout(&mut guard).await?;
        guard.keep_permit();
        drop(guard);

        let lease = Lease {
            pool_id: self.id,
            slot_id,
            slot_epoch,
            lease_epoch: self.statistics.record_leased(waited),
        };
        let owner: Weak<dyn LeaseOwner<F::Connection>> = self.this.clone();
        Ok(PooledConnection::new(self.key.clone(), lease, conn, owner))
    }

    /// With a permit in hand: take an idle connection or create one.
    async fn checkout(
        &self,
        guard: &mut SlotGuard<'_, F>,
    ) -> Result<(u64, u64, F::Connection), ConnectorPoolError> {
        let mut validation_failures = 0usize;
        let mut create_failures = 0u32;

        loop {
            let next = {
                let mut slots = self.lock_slots();
                slots.touch();
                if self.is_shut_down() {
                    Checkout::Closed
                } else if let Some(slot) = slots.idle.pop_back() {
                    let state = if self.config.validate_on_match {
                        SlotState::Validating
                    } else {
                        SlotState::Active
                    };
                    slots.out.insert(slot.id, state);
                    Checkout::Idle(slot)
                } else if slots.live_total() < self.config.max_size {
                    slots.creating += 1;
                    Checkout::Create
                } else {
                    Checkout::Full
                }
            };

            match next {
                Checkout::Closed => return Err(self.shut_down_error()),
                Checkout::Full => {
                    return Err(ConnectorPoolError::ExhaustedError(format!(
                        "partition {} holds {} connections",
                        self.key, self.config.max_size
                    )));
                }
                Checkout::Idle(slot) => {
                    let (slot_id, slot_epoch) = (slot.id, slot.epoch);
                    guard.park(slot_id, slot_epoch, slot.conn);
                    let valid = !self.config.validate_on_match || guard.validate_parked().await;
                    if valid {
                        if let Some(conn) = guard.conn.take() {
                            self.lock_slots().set_state(slot_id, SlotState::Active);
                            guard.slot = None;
                            return Ok((slot_id, slot_epoch, conn));
                        }
                    }

                    debug!(
                        partition = %self.key,
                        slot = slot_id,
                        "idle connection failed validation"
                    );
                    self.lock_slots().set_state(slot_id, SlotState::Destroying);
                    if let Some(conn) = guard.conn.take() {
                        if let Err(e) = self.destroy_slot(slot_id, slot_epoch, conn).await {
                            warn!(
                                partition = %self.key,
                                "failed to destroy invalid connection: {e}"
                            );
                        }
                    }
                    guard.slot = None;

                    validation_failures += 1;
                    if validation_failures > self.config.max_size {
                        return Err(ConnectorPoolError::ExhaustedError(format!(
                            "partition {}: {validation_failures} connections failed validation",
                            self.key
                        )));
                    }
                }
                Checkout::Create => {
                    guard.creating = true;
                    let e = match self.factory.create(&self.key).await {
                        Ok(conn) => {
                            let (id, epoch) = {
                                let mut slots = self.lock_slots();
                                slots.creating = slots.creating.saturating_sub(1);
                                guard.creating = false;
                                let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
                                let epoch = self.statistics.record_created();
                                slots.out.insert(id, SlotState::Active);
                                (id, epoch)
                            };
                            debug!(partition = %self.key, slot = id, "created connection");
                            return Ok((id, epoch, conn));
                        }
                        Err(e) => {
                            let mut slots = self.lock_slots();
                            slots.creating = slots.creating.saturating_sub(1);
                            guard.creating = false;
                            e
                        }
                    };

                    if create_failures >= self.config.allocation_retry {
                        warn!(partition = %self.key, "connection allocation failed: {e}");
                        return Err(ConnectorPoolError::ExhaustedError(format!(
                            "partition {}: could not create a connection after {} attempts: {e}",
                            self.key,
                            create_failures + 1
                        )));
                    }
                    create_failures += 1;
                    debug!(
                        partition = %self.key,
                        attempt = create_failures,
                        "connection allocation failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.config.allocation_retry_wait).await;
                }
            }
        }
    }

    /// Return a leased connection. Valid connections go back to the idle set,
    /// invalid ones (and every connection after shutdown) are destroyed.
    ///
    /// # Errors
    /// `NotFoundError` if the handle was leased from another partition; its
    /// connection is destroyed.
    pub async fn release(
        &self,
        handle: PooledConnection<F::Connection>,
    ) -> Result<(), ConnectorPoolError> {
        let Some((key, lease, conn)) = handle.into_parts() else {
            return Ok(());
        };
        if lease.pool_id != self.id {
            if let Err(e) = self.factory.destroy(conn).await {
                warn!(partition = %key, "failed to destroy foreign connection: {e}");
            }
            return Err(ConnectorPoolError::NotFoundError(format!(
                "connection of partition {key} does not belong to this pool"
            )));
        }
        self.return_lease(lease, conn).await;
        Ok(())
    }

    async fn return_lease(&self, lease: Lease, conn: F::Connection) {
        self.statistics.record_returned(lease.lease_epoch);
        {
            let mut slots = self.lock_slots();
            slots.touch();
            slots.set_state(lease.slot_id, SlotState::Validating);
        }
        let mut guard = SlotGuard::new(self);
        guard.park(lease.slot_id, lease.slot_epoch, conn);

        let valid = !self.is_shut_down() && guard.validate_parked().await;
        if !valid {
            debug!(
                partition = %self.key,
                slot = lease.slot_id,
                "returned connection is not reusable"
            );
        }
        let leftover = {
            let mut slots = self.lock_slots();
            match guard.conn.take() {
                Some(conn) if valid && !self.is_shut_down() => {
                    slots.out.remove(&lease.slot_id);
                    slots.idle.push_back(ConnectionSlot {
                        id: lease.slot_id,
                        conn,
                        last_used: Instant::now(),
                        epoch: lease.slot_epoch,
                    });
                    guard.slot = None;
                    None
                }
                conn => {
                    slots.set_state(lease.slot_id, SlotState::Destroying);
                    conn
                }
            }
        };
        guard.release_permit();

        if let Some(conn) = leftover {
            if let Err(e) = self.destroy_slot(lease.slot_id, lease.slot_epoch, conn).await {
                warn!(partition = %self.key, "failed to destroy connection: {e}");
            }
        }
        guard.slot = None;
    }

    /// Close a connection whose slot is already marked `Destroying`, then
    /// forget the slot.
    async fn destroy_slot(
        &self,
        id: u64,
        epoch: u64,
        conn: F::Connection,
    ) -> Result<(), ConnectorPoolError> {
        let result = self.factory.destroy(conn).await;
        if self.lock_slots().out.remove(&id).is_some() {
            self.statistics.record_destroyed(epoch);
        }
        result
    }

    /// Destroy a connection from synchronous code: on a spawned task when a
    /// runtime is around, otherwise by dropping it in place.
    fn destroy_detached(&self, id: u64, epoch: u64, conn: F::Connection) {
        self.lock_slots().set_state(id, SlotState::Destroying);
        match (tokio::runtime::Handle::try_current(), self.this.upgrade()) {
            (Ok(runtime), Some(pool)) => {
                runtime.spawn(async move {
                    if let Err(e) = pool.destroy_slot(id, epoch, conn).await {
                        warn!(partition = %pool.key, "failed to destroy detached connection: {e}");
                    }
                });
            }
            _ => {
                drop(conn);
                if self.lock_slots().out.remove(&id).is_some() {
                    self.statistics.record_destroyed(epoch);
                }
            }
        }
    }

    /// Destroy idle connections unused for longer than the idle timeout,
    /// then create connections until the partition holds `min_size` again.
    pub async fn evict_idle(&self) -> EvictionReport {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<ConnectionSlot<F::Connection>> = {
            let mut slots = self.lock_slots();
            let now = Instant::now();
            let (expired, keep): (Vec<_>, Vec<_>) = slots
                .idle
                .drain(..)
                .partition(|slot| now.duration_since(slot.last_used) > idle_timeout);
            slots.idle = keep.into();
            for slot in &expired {
                slots.out.insert(slot.id, SlotState::Destroying);
            }
            expired
        };

        let mut report = EvictionReport {
            evicted: expired.len(),
            ..EvictionReport::default()
        };
        let results = join_all(
            expired
                .into_iter()
                .map(|slot| self.destroy_slot(slot.id, slot.epoch, slot.conn)),
        )
        .await;
        for e in results.into_iter().filter_map(Result::err) {
            warn!(partition = %self.key, "failed to destroy idle connection: {e}");
            report.errors.push(e);
        }
        if report.evicted > 0 {
            debug!(partition = %self.key, evicted = report.evicted, "evicted idle connections");
        }

        match self.fill_to_min().await {
            Ok(created) => report.refilled = created,
            Err(e) => {
                warn!(partition = %self.key, "failed to refill partition: {e}");
                report.errors.push(e);
            }
        }
        report
    }

    /// Create idle connections until the partition holds `min_size`.
    /// Stops early, without error, when every permit is in use.
    ///
    /// # Errors
    /// The first factory error; connections created before it stay pooled.
    pub async fn fill_to_min(&self) -> Result<usize, ConnectorPoolError> {
        let mut created = 0;
        while !self.is_shut_down() {
            let Ok(permit) = self.permits.try_acquire() else {
                break;
            };
            {
                let mut slots = self.lock_slots();
                if slots.live_total() >= self.config.min_size {
                    break;
                }
                slots.creating += 1;
            }
            permit.forget();
            let mut guard = SlotGuard::new(self);
            guard.creating = true;

            let conn = self.factory.create(&self.key).await?;
            let epoch = self.statistics.record_created();
            let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
            let leftover = {
                let mut slots = self.lock_slots();
                slots.creating = slots.creating.saturating_sub(1);
                guard.creating = false;
                if self.is_shut_down() {
                    slots.out.insert(id, SlotState::Destroying);
                    Some(conn)
                } else {
                    slots.idle.push_back(ConnectionSlot {
                        id,
                        conn,
                        last_used: Instant::now(),
                        epoch,
                    });
                    None
                }
            };
            guard.release_permit();
            drop(guard);
            if let Some(conn) = leftover {
                self.destroy_slot(id, epoch, conn).await?;
                break;
            }
            created += 1;
        }
        Ok(created)
    }

    /// Stop handing out connections and destroy every idle one. Leased
    /// connections are destroyed as they come back. Waiting acquires fail
    /// with `ShutdownError`.
    pub async fn shutdown(&self) -> ShutdownReport {
        let (idle, deferred) = {
            let mut slots = self.lock_slots();
            self.shut_down.store(true, Ordering::Release);
            let idle: Vec<_> = slots.idle.drain(..).collect();
            for slot in &idle {
                slots.out.insert(slot.id, SlotState::Destroying);
            }
            let deferred =
                slots.count(SlotState::Active) + slots.count(SlotState::Validating);
            (idle, deferred)
        };
        self.permits.close();

        let mut report = ShutdownReport {
            destroyed: idle.len(),
            deferred,
            ..ShutdownReport::default()
        };
        let results = join_all(
            idle.into_iter()
                .map(|slot| self.destroy_slot(slot.id, slot.epoch, slot.conn)),
        )
        .await;
        for e in results.into_iter().filter_map(Result::err) {
            warn!(partition = %self.key, "failed to destroy connection during shutdown: {e}");
            report.errors.push(e);
        }
        info!(
            partition = %self.key,
            destroyed = report.destroyed,
            deferred = report.deferred,
            "partition shut down"
        );
        report
    }

    /// Retire the partition if it holds nothing, has no acquire in flight
    /// and has seen no activity for `window`. A retired partition refuses
    /// every further acquire.
    pub(crate) fn retire_if_idle(&self, window: Duration) -> bool {
        if self.pending.load(Ordering::Acquire) > 0 {
            return false;
        }
        let slots = self.lock_slots();
        if !slots.is_empty() || slots.last_activity.elapsed() < window {
            return false;
        }
        self.shut_down.store(true, Ordering::Release);
        self.permits.close();
        true
    }

    /// Cheap pre-check for [`Self::retire_if_idle`] without side effects.
    pub(crate) fn looks_idle(&self, window: Duration) -> bool {
        if self.pending.load(Ordering::Acquire) > 0 {
            return false;
        }
        let slots = self.lock_slots();
        slots.is_empty() && slots.last_activity.elapsed() >= window
    }

    fn shut_down_error(&self) -> ConnectorPoolError {
        ConnectorPoolError::ShutdownError(format!("partition {} is shut down", self.key))
    }
}

impl<F: ConnectionFactory> LeaseOwner<F::Connection> for SubPool<F> {
    fn abandon(&self, lease: Lease, conn: F::Connection) {
        warn!(
            partition = %self.key,
            slot = lease.slot_id,
            "connection dropped without release, destroying it"
        );
        self.statistics.record_returned(lease.lease_epoch);
        self.destroy_detached(lease.slot_id, lease.slot_epoch, conn);
        self.permits.add_permits(1);
    }
}
