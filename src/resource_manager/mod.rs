//! # Resource manager
//!
//! A central worker pool with global `(max_threads, max_memory)` caps and
//! per-tenant quotas. Each [`allocate`](ResourceManager::allocate) call
//! returns a [`ResourceHandle`] wrapping a bounded task queue; background
//! workers drain live handles round-robin, running each task to completion
//! (cooperative, no preemption).
//!
//! Shaped after worker-pool-with-bounded-per-handle-queues designs (`tikv`'s
//! `sched_pool.rs`, `LocustDB`'s scheduler), expressed with `thiserror`/
//! `tracing` for errors and logging and `crossbeam::channel` for the queues
//! instead of a custom future-pool executor.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Below this, a memory grant is considered too small to be useful and the
/// allocation is refused outright.
const MIN_MEMORY_FLOOR_BYTES: u64 = 1024 * 1024;
const TASK_QUEUE_CAPACITY: usize = 256;
const WORKER_IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("tenant '{0}' already has an allocation")]
    AlreadyAllocated(String),

    #[error("no allocation found for tenant '{0}'")]
    NotFound(String),

    #[error("thread count adjustments are not supported, only memory quota")]
    ThreadAdjustmentUnsupported,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceRequest {
    pub threads: u64,
    pub memory_bytes: u64,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceGrant {
    pub tenant_threads: u64,
    pub memory_quota_bytes: u64,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceUsage {
    pub threads_used: u64,
    pub memory_used: u64,
    pub max_threads: u64,
    pub max_memory: u64,
}

impl ResourceUsage {
    pub fn thread_fraction(&self) -> f64 {
        if self.max_threads == 0 {
            0.0
        } else {
            self.threads_used as f64 / self.max_threads as f64
        }
    }

    pub fn memory_fraction(&self) -> f64 {
        if self.max_memory == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.max_memory as f64
        }
    }
}

struct HandleState {
    tenant: String,
    grant: Mutex<ResourceGrant>,
    sender: crossbeam::channel::Sender<Task>,
    receiver: crossbeam::channel::Receiver<Task>,
    valid: AtomicBool,
    /// `< 1.0` slows dispatch by sleeping `task_cost * (1/factor - 1)`
    /// after each task runs on this handle.
    throttle_factor_bits: AtomicU64,
}

impl HandleState {
    fn throttle_factor(&self) -> f64 {
        f64::from_bits(self.throttle_factor_bits.load(Ordering::Relaxed))
    }

    fn set_throttle_factor(&self, factor: f64) {
        self.throttle_factor_bits.store(factor.to_bits(), Ordering::Relaxed);
    }
}

/// A submission point bound to one tenant's allocation.
pub struct ResourceHandle {
    state: Arc<HandleState>,
}

impl ResourceHandle {
    pub fn tenant(&self) -> &str {
        &self.state.tenant
    }

    /// Enqueues `f`. Returns `false` if the handle was released or the
    /// queue is full.
    pub fn submit_task(&self, f: impl FnOnce() + Send + 'static) -> bool {
        if !self.state.valid.load(Ordering::Acquire) {
            return false;
        }
        self.state.sender.try_send(Box::new(f)).is_ok()
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid.load(Ordering::Acquire)
    }
}

struct Pool {
    limits: Mutex<(u64, u64)>, // (max_threads, max_memory)
    threads_used: AtomicU64,
    memory_used: AtomicU64,
    handles: RwLock<HashMap<String, Arc<HandleState>>>,
    order: Mutex<VecDeque<Arc<HandleState>>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,
    shutdown: AtomicBool,
}

impl Pool {
    fn new(max_threads: u64, max_memory: u64) -> Self {
        Self {
            limits: Mutex::new((max_threads, max_memory)),
            threads_used: AtomicU64::new(0),
            memory_used: AtomicU64::new(0),
            handles: RwLock::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    fn set_limits(&self, max_threads: u64, max_memory: u64) {
        *self.limits.lock().expect("pool lock poisoned") = (max_threads, max_memory);
    }

    fn usage(&self) -> ResourceUsage {
        let (max_threads, max_memory) = *self.limits.lock().expect("pool lock poisoned");
        ResourceUsage {
            threads_used: self.threads_used.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
            max_threads,
            max_memory,
        }
    }

    fn is_under_pressure(&self) -> bool {
        let usage = self.usage();
        usage.thread_fraction() >= 0.9 || usage.memory_fraction() >= 0.9
    }

    fn allocate(&self, tenant: &str, request: ResourceRequest) -> Option<Arc<HandleState>> {
        let mut handles = self.handles.write().expect("pool lock poisoned");
        if handles.contains_key(tenant) {
            return None;
        }
        let (max_threads, max_memory) = *self.limits.lock().expect("pool lock poisoned");
        let remaining_threads = max_threads.saturating_sub(self.threads_used.load(Ordering::Relaxed));
        let remaining_memory = max_memory.saturating_sub(self.memory_used.load(Ordering::Relaxed));

        let granted_threads = request.threads.min(remaining_threads);
        let granted_memory = request.memory_bytes.min(remaining_memory);
        if granted_threads == 0 || granted_memory < MIN_MEMORY_FLOOR_BYTES {
            return None;
        }

        let (sender, receiver) = crossbeam::channel::bounded(TASK_QUEUE_CAPACITY);
        let state = Arc::new(HandleState {
            tenant: tenant.to_string(),
            grant: Mutex::new(ResourceGrant {
                tenant_threads: granted_threads,
                memory_quota_bytes: granted_memory,
                priority: request.priority,
            }),
            sender,
            receiver,
            valid: AtomicBool::new(true),
            throttle_factor_bits: AtomicU64::new(1.0_f64.to_bits()),
        });

        self.threads_used.fetch_add(granted_threads, Ordering::Relaxed);
        self.memory_used.fetch_add(granted_memory, Ordering::Relaxed);
        handles.insert(tenant.to_string(), state.clone());
        self.order.lock().expect("pool lock poisoned").push_back(state.clone());
        drop(handles);
        self.cv.notify_all();
        Some(state)
    }

    fn release(&self, tenant: &str) -> Result<(), ResourceError> {
        let mut handles = self.handles.write().expect("pool lock poisoned");
        let state = handles
            .remove(tenant)
            .ok_or_else(|| ResourceError::NotFound(tenant.to_string()))?;
        state.valid.store(false, Ordering::Release);
        let grant = *state.grant.lock().expect("grant lock poisoned");
        self.threads_used.fetch_sub(grant.tenant_threads, Ordering::Relaxed);
        self.memory_used.fetch_sub(grant.memory_quota_bytes, Ordering::Relaxed);
        // Discard queued-but-unexecuted tasks.
        while state.receiver.try_recv().is_ok() {}
        self.order
            .lock()
            .expect("pool lock poisoned")
            .retain(|h| !Arc::ptr_eq(h, &state));
        Ok(())
    }

    fn adjust_quota(&self, tenant: &str, request: ResourceRequest) -> Result<(), ResourceError> {
        if request.threads != 0 {
            return Err(ResourceError::ThreadAdjustmentUnsupported);
        }
        let handles = self.handles.read().expect("pool lock poisoned");
        let state = handles
            .get(tenant)
            .ok_or_else(|| ResourceError::NotFound(tenant.to_string()))?;
        let mut grant = state.grant.lock().expect("grant lock poisoned");
        let delta = request.memory_bytes as i64 - grant.memory_quota_bytes as i64;
        if delta > 0 {
            self.memory_used.fetch_add(delta as u64, Ordering::Relaxed);
        } else if delta < 0 {
            self.memory_used.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
        grant.memory_quota_bytes = request.memory_bytes;
        Ok(())
    }

    fn usage_for(&self, tenant: &str) -> Option<ResourceGrant> {
        let handles = self.handles.read().expect("pool lock poisoned");
        handles.get(tenant).map(|h| *h.grant.lock().expect("grant lock poisoned"))
    }

    /// Round-robins through live handles, running at most one task.
    /// Returns whether any task ran.
    fn run_one(&self) -> bool {
        let snapshot: Vec<Arc<HandleState>> = {
            let order = self.order.lock().expect("pool lock poisoned");
            order.iter().cloned().collect()
        };
        for state in &snapshot {
            if !state.valid.load(Ordering::Acquire) {
                continue;
            }
            if let Ok(task) = state.receiver.try_recv() {
                let started = Instant::now();
                task();
                let factor = state.throttle_factor();
                if factor > 0.0 && factor < 1.0 {
                    let cost = started.elapsed();
                    let delay = cost.mul_f64(1.0 / factor - 1.0);
                    std::thread::sleep(delay);
                }
                // Rotate this handle to the back for fairness.
                let mut order = self.order.lock().expect("pool lock poisoned");
                if let Some(pos) = order.iter().position(|h| Arc::ptr_eq(h, state)) {
                    if let Some(h) = order.remove(pos) {
                        order.push_back(h);
                    }
                }
                return true;
            }
        }
        false
    }

    fn worker_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::Acquire) {
            if !self.run_one() {
                let guard = self.cv_mutex.lock().expect("cv lock poisoned");
                let _ = self.cv.wait_timeout(guard, WORKER_IDLE_POLL);
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.cv.notify_all();
    }
}

/// Bounds threads/memory per tenant and owns the worker pool used by the
/// scheduler. A separate pool instance isolates compute-engine (plugin)
/// work so a misbehaving plugin cannot starve scheduler tasks.
pub struct ResourceManager {
    main: Arc<Pool>,
    compute: Arc<Pool>,
    main_workers: Mutex<Vec<JoinHandle<()>>>,
    compute_workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceManager {
    pub fn new(worker_count: usize) -> Self {
        let mgr = Self {
            main: Arc::new(Pool::new(u64::MAX, u64::MAX)),
            compute: Arc::new(Pool::new(u64::MAX, u64::MAX)),
            main_workers: Mutex::new(Vec::new()),
            compute_workers: Mutex::new(Vec::new()),
        };
        mgr.spawn_workers(worker_count);
        mgr
    }

    fn spawn_workers(&self, worker_count: usize) {
        let mut main_workers = self.main_workers.lock().expect("worker lock poisoned");
        let mut compute_workers = self.compute_workers.lock().expect("worker lock poisoned");
        for _ in 0..worker_count.max(1) {
            let pool = self.main.clone();
            main_workers.push(std::thread::spawn(move || pool.worker_loop()));
            let pool = self.compute.clone();
            compute_workers.push(std::thread::spawn(move || pool.worker_loop()));
        }
    }

    pub fn set_global_limits(&self, max_threads: u64, max_memory: u64) {
        self.main.set_limits(max_threads, max_memory);
    }

    pub fn set_compute_limits(&self, max_threads: u64, max_memory: u64) {
        self.compute.set_limits(max_threads, max_memory);
    }

    pub fn allocate(&self, tenant: &str, request: ResourceRequest) -> Option<ResourceHandle> {
        let state = self.main.allocate(tenant, request)?;
        debug!(tenant, "resource allocation granted");
        Some(ResourceHandle { state })
    }

    pub fn allocate_for_compute(&self, tenant: &str, request: ResourceRequest) -> Option<ResourceHandle> {
        let state = self.compute.allocate(tenant, request)?;
        Some(ResourceHandle { state })
    }

    pub fn release(&self, tenant: &str) -> Result<(), ResourceError> {
        self.main.release(tenant).or_else(|_| self.compute.release(tenant))
    }

    pub fn adjust_quota(&self, tenant: &str, request: ResourceRequest) -> Result<(), ResourceError> {
        self.main
            .adjust_quota(tenant, request)
            .or_else(|_| self.compute.adjust_quota(tenant, request))
    }

    pub fn query_usage(&self, tenant: &str) -> Option<ResourceGrant> {
        self.main.usage_for(tenant).or_else(|| self.compute.usage_for(tenant))
    }

    pub fn get_total_usage(&self) -> ResourceUsage {
        self.main.usage()
    }

    pub fn is_under_pressure(&self) -> bool {
        self.main.is_under_pressure() || self.compute.is_under_pressure()
    }

    /// Sets a dispatch throttle factor (`0.0 < factor <= 1.0`) for a
    /// compute-pool tenant; `factor < 1.0` slows task dispatch.
    pub fn throttle_compute(&self, tenant: &str, factor: f64) -> Result<(), ResourceError> {
        let handles = self.compute.handles.read().expect("pool lock poisoned");
        let state = handles
            .get(tenant)
            .ok_or_else(|| ResourceError::NotFound(tenant.to_string()))?;
        state.set_throttle_factor(factor.clamp(0.01, 1.0));
        Ok(())
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.main.shutdown();
        self.compute.shutdown();
        for w in self.main_workers.lock().expect("worker lock poisoned").drain(..) {
            if w.join().is_err() {
                warn!("resource manager worker thread panicked during shutdown");
            }
        }
        for w in self.compute_workers.lock().expect("worker lock poisoned").drain(..) {
            if w.join().is_err() {
                warn!("resource manager compute worker thread panicked during shutdown");
            }
        }
    }
}
