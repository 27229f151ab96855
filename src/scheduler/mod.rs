//! # Window scheduler
//!
//! The hard engineering core: decides which time windows exist, maintains a
//! watermark, decides when each window is ready to trigger, dispatches
//! window computation through the resource manager without overlap, and
//! surfaces results/failures via callbacks.
//!
//! One background thread blocks on a condition variable, woken on every
//! data insertion and timer tick, and re-evaluates trigger predicates
//! against the current watermark; dispatch follows `tikv`'s
//! `sched_pool.rs` worker-dispatch idiom. The scheduler holds non-owning
//! `Arc` back-references to its tables and resource handle rather than raw
//! pointers.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::join_result_table::{JoinMetrics, JoinRecord, JoinResultTable};
use crate::resource_manager::ResourceHandle;
use crate::stream_table::StreamTable;
use crate::tuple::{Tags, TimeRange, Tuple};
use tracing::{error, warn};

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Tumbling,
    Sliding,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    TimeBased,
    CountBased,
    Hybrid,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub window_type: WindowType,
    pub window_len_us: i64,
    pub slide_len_us: i64,
    pub trigger_policy: TriggerPolicy,
    pub trigger_interval_us: u64,
    pub trigger_count_threshold: u64,
    pub max_delay_us: i64,
    pub watermark_slack_us: i64,
    pub allow_late_data: bool,
    pub max_pending_windows: usize,
    pub max_concurrent_windows: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_type: WindowType::Sliding,
            window_len_us: 1_000_000,
            slide_len_us: 500_000,
            trigger_policy: TriggerPolicy::Hybrid,
            trigger_interval_us: 100_000,
            trigger_count_threshold: 1000,
            max_delay_us: 100_000,
            watermark_slack_us: 50_000,
            allow_late_data: true,
            max_pending_windows: 10,
            max_concurrent_windows: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Pending,
    Ready,
    Computing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub window_id: u64,
    pub range: TimeRange,
    pub watermark_snapshot: i64,
    pub state: WindowState,
    pub s_count: u64,
    pub r_count: u64,
    pub created_ts: i64,
    pub triggered_ts: i64,
    pub completed_ts: i64,
    pub has_late_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    S,
    R,
}

/// What the external join function returns, minus the `window_id`/`ts`
/// fields the scheduler itself supplies when writing the `JoinRecord`.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub join_count: u64,
    pub aqp_estimate: f64,
    pub selectivity: f64,
    pub payload: Vec<u8>,
    pub metrics: JoinMetrics,
    pub tags: Tags,
}

pub type JoinFn = dyn Fn(&[Tuple], &[Tuple], u64, TimeRange) -> Result<JoinOutcome, String> + Send + Sync;

#[derive(Debug, Clone)]
pub enum ComputeStatus {
    Completed { window_id: u64, join_count: u64 },
    Failed { window_id: u64, error: String },
}

pub type WindowCallback = dyn Fn(&WindowInfo, &ComputeStatus) + Send + Sync;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerMetrics {
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub pending: usize,
    pub active: usize,
    pub avg_completion_ms: f64,
    pub max_completion_ms: f64,
    pub windows_per_sec_ewma: f64,
    pub late_data_count: u64,
    pub late_windows_recomputed: u64,
}

/// Bounded history used for `avg`/`max` completion latency; old samples are
/// dropped rather than kept forever.
const COMPLETION_HISTORY_CAP: usize = 256;
const EWMA_ALPHA: f64 = 0.2;

struct MetricsInner {
    total_scheduled: u64,
    total_completed: u64,
    total_failed: u64,
    late_data_count: u64,
    late_windows_recomputed: u64,
    completion_times_ms: VecDeque<f64>,
    windows_per_sec_ewma: f64,
    last_completion_at: Option<Instant>,
}

impl MetricsInner {
    fn new() -> Self {
        Self {
            total_scheduled: 0,
            total_completed: 0,
            total_failed: 0,
            late_data_count: 0,
            late_windows_recomputed: 0,
            completion_times_ms: VecDeque::new(),
            windows_per_sec_ewma: 0.0,
            last_completion_at: None,
        }
    }

    fn record_completion(&mut self, elapsed_ms: f64) {
        self.total_completed += 1;
        self.completion_times_ms.push_back(elapsed_ms);
        if self.completion_times_ms.len() > COMPLETION_HISTORY_CAP {
            self.completion_times_ms.pop_front();
        }
        let now = Instant::now();
        if let Some(prev) = self.last_completion_at {
            let dt = now.duration_since(prev).as_secs_f64().max(1e-6);
            let rate = 1.0 / dt;
            self.windows_per_sec_ewma = EWMA_ALPHA * rate + (1.0 - EWMA_ALPHA) * self.windows_per_sec_ewma;
        }
        self.last_completion_at = Some(now);
    }

    fn record_failure(&mut self) {
        self.total_failed += 1;
    }
}

struct Windows {
    by_id: HashMap<u64, WindowInfo>,
    start_index: BTreeMap<i64, u64>,
    pending: BTreeSet<u64>,
}

/// Owns one window-join query's scheduling state: tumbling/sliding/session
/// window materialization, watermark tracking, trigger evaluation, and
/// dispatch to a resource handle.
pub struct Scheduler {
    config: SchedulerConfig,
    stream_s: Arc<StreamTable>,
    stream_r: Arc<StreamTable>,
    results: Arc<JoinResultTable>,
    resource_handle: ResourceHandle,
    join_fn: Arc<JoinFn>,

    windows: Mutex<Windows>,
    watermark_us: AtomicI64,
    max_timestamp_seen: AtomicI64,
    next_window_id: AtomicU64,
    active_count: AtomicU64,

    running: AtomicBool,
    stop_requested: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,

    completion_callbacks: Mutex<Vec<Box<WindowCallback>>>,
    failure_callbacks: Mutex<Vec<Box<WindowCallback>>>,
    metrics: Mutex<MetricsInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        stream_s: Arc<StreamTable>,
        stream_r: Arc<StreamTable>,
        results: Arc<JoinResultTable>,
        resource_handle: ResourceHandle,
        join_fn: Arc<JoinFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            stream_s,
            stream_r,
            results,
            resource_handle,
            join_fn,
            windows: Mutex::new(Windows {
                by_id: HashMap::new(),
                start_index: BTreeMap::new(),
                pending: BTreeSet::new(),
            }),
            watermark_us: AtomicI64::new(i64::MIN),
            max_timestamp_seen: AtomicI64::new(i64::MIN),
            next_window_id: AtomicU64::new(1),
            active_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            thread: Mutex::new(None),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            completion_callbacks: Mutex::new(Vec::new()),
            failure_callbacks: Mutex::new(Vec::new()),
            metrics: Mutex::new(MetricsInner::new()),
        })
    }

    pub fn on_window_completed(&self, callback: impl Fn(&WindowInfo, &ComputeStatus) + Send + Sync + 'static) {
        self.completion_callbacks.lock().expect("callback lock poisoned").push(Box::new(callback));
    }

    pub fn on_window_failed(&self, callback: impl Fn(&WindowInfo, &ComputeStatus) + Send + Sync + 'static) {
        self.failure_callbacks.lock().expect("callback lock poisoned").push(Box::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn watermark(&self) -> i64 {
        self.watermark_us.load(Ordering::Acquire)
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let mut thread = self.thread.lock().expect("thread lock poisoned");
        if thread.is_some() {
            return false;
        }
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        let this = self.clone();
        *thread = Some(std::thread::spawn(move || this.scheduler_loop()));
        true
    }

    pub fn stop(&self, wait_completion: bool) {
        self.stop_requested.store(true, Ordering::Release);
        self.cv.notify_all();
        if wait_completion {
            while self.active_count.load(Ordering::Acquire) > 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if let Some(handle) = self.thread.lock().expect("thread lock poisoned").take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
    }

    fn scheduler_loop(self: Arc<Self>) {
        let interval = Duration::from_micros(self.config.trigger_interval_us);
        while !self.stop_requested.load(Ordering::Acquire) {
            self.dispatch_ready_windows();
            self.cleanup_old_windows();
            let guard = self.cv_mutex.lock().expect("cv lock poisoned");
            let _ = self.cv.wait_timeout(guard, interval);
        }
    }

    // ---------------------------------------------------------------------
    // Window materialization
    // ---------------------------------------------------------------------

    fn tumbling_start(&self, ts: i64) -> i64 {
        ts.div_euclid(self.config.window_len_us) * self.config.window_len_us
    }

    fn sliding_starts(&self, ts: i64) -> Vec<i64> {
        let slide = self.config.slide_len_us;
        let window_len = self.config.window_len_us;
        let k_max = ts.div_euclid(slide);
        let span = (window_len + slide - 1) / slide;
        let mut starts = Vec::new();
        for i in 0..=span {
            let k = k_max - i;
            let start = k * slide;
            if start <= ts && ts < start + window_len {
                starts.push(start);
            }
        }
        starts
    }

    fn get_or_create_window(&self, windows: &mut Windows, start: i64, end: i64) -> u64 {
        if let Some(&id) = windows.start_index.get(&start) {
            return id;
        }
        let id = self.next_window_id.fetch_add(1, Ordering::SeqCst);
        windows.start_index.insert(start, id);
        windows.by_id.insert(
            id,
            WindowInfo {
                window_id: id,
                range: TimeRange::new(start, end),
                watermark_snapshot: self.watermark(),
                state: WindowState::Pending,
                s_count: 0,
                r_count: 0,
                created_ts: now_micros(),
                triggered_ts: 0,
                completed_ts: 0,
                has_late_data: false,
            },
        );
        id
    }

    fn materialize_windows_for(&self, windows: &mut Windows, ts: i64) -> Vec<u64> {
        match self.config.window_type {
            WindowType::Tumbling => {
                let start = self.tumbling_start(ts);
                vec![self.get_or_create_window(windows, start, start + self.config.window_len_us)]
            }
            WindowType::Sliding => self
                .sliding_starts(ts)
                .into_iter()
                .map(|start| self.get_or_create_window(windows, start, start + self.config.window_len_us))
                .collect(),
            WindowType::Session => {
                let id = self.next_window_id.fetch_add(1, Ordering::SeqCst);
                windows.by_id.insert(
                    id,
                    WindowInfo {
                        window_id: id,
                        range: TimeRange::new(ts, ts + self.config.window_len_us),
                        watermark_snapshot: self.watermark(),
                        state: WindowState::Pending,
                        s_count: 0,
                        r_count: 0,
                        created_ts: now_micros(),
                        triggered_ts: 0,
                        completed_ts: 0,
                        has_late_data: false,
                    },
                );
                vec![id]
            }
        }
    }

    fn predicate_holds(&self, window: &WindowInfo, watermark: i64) -> bool {
        let time_based = watermark >= window.range.end + self.config.watermark_slack_us;
        let count_based = window.s_count + window.r_count >= self.config.trigger_count_threshold;
        match self.config.trigger_policy {
            TriggerPolicy::TimeBased => time_based,
            TriggerPolicy::CountBased => count_based,
            TriggerPolicy::Hybrid => time_based || count_based,
            TriggerPolicy::Manual => false,
        }
    }

    // ---------------------------------------------------------------------
    // Event-driven entry points
    // ---------------------------------------------------------------------

    /// Called by `StreamTable::insert`/`insert_batch` after a successful
    /// write. Updates the watermark, materializes windows touching `ts`,
    /// bumps per-window counters, and promotes windows whose trigger
    /// predicate now holds.
    pub fn on_data_inserted(&self, stream: StreamId, ts: i64, count: u64) {
        self.max_timestamp_seen.fetch_max(ts, Ordering::SeqCst);
        let candidate_watermark = ts - self.config.max_delay_us;
        self.watermark_us.fetch_max(candidate_watermark, Ordering::SeqCst);
        let watermark = self.watermark();

        let mut windows = self.windows.lock().expect("window lock poisoned");
        let window_ids = self.materialize_windows_for(&mut windows, ts);

        for id in window_ids {
            let is_late_into_completed = {
                let w = windows.by_id.get(&id).expect("window just materialized");
                w.state == WindowState::Completed && ts < watermark
            };

            if is_late_into_completed && self.config.allow_late_data {
                let w = windows.by_id.get_mut(&id).unwrap();
                w.has_late_data = true;
                w.state = WindowState::Ready;
                {
                    let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
                    metrics.late_data_count += 1;
                    metrics.late_windows_recomputed += 1;
                }
                Self::enqueue_pending(&mut windows, id, self.config.max_pending_windows);
                continue;
            }

            let w = windows.by_id.get_mut(&id).unwrap();
            match w.state {
                WindowState::Pending | WindowState::Ready => match stream {
                    StreamId::S => w.s_count += count,
                    StreamId::R => w.r_count += count,
                },
                _ => {}
            }
        }

        self.promote_pending_windows_by_watermark(&mut windows, watermark);
        drop(windows);
        self.cv.notify_all();
    }

    /// Re-evaluates every still-`Pending` window against the current
    /// watermark, not just the one(s) `ts` landed in. A time-based trigger
    /// depends only on the watermark, so a window with no new data of its
    /// own still needs to fire once later data elsewhere pushes the
    /// watermark past its end.
    fn promote_pending_windows_by_watermark(&self, windows: &mut Windows, watermark: i64) {
        let ready_ids: Vec<u64> = windows
            .by_id
            .iter()
            .filter(|(_, w)| w.state == WindowState::Pending && self.predicate_holds(w, watermark))
            .map(|(id, _)| *id)
            .collect();
        for id in ready_ids {
            windows.by_id.get_mut(&id).unwrap().state = WindowState::Ready;
            Self::enqueue_pending(windows, id, self.config.max_pending_windows);
        }
    }

    fn enqueue_pending(windows: &mut Windows, id: u64, max_pending: usize) {
        if windows.pending.len() >= max_pending {
            warn!(window_id = id, "pending window queue at capacity, window stays Ready but unqueued");
            return;
        }
        windows.pending.insert(id);
    }

    /// Manually registers and immediately queues a window, bypassing
    /// trigger-predicate evaluation. Used by `Manual` trigger policy and by
    /// callers that want explicit control.
    pub fn schedule_window(&self, window_id: u64, range: TimeRange) -> bool {
        let mut windows = self.windows.lock().expect("window lock poisoned");
        if windows.by_id.contains_key(&window_id) {
            return false;
        }
        windows.by_id.insert(
            window_id,
            WindowInfo {
                window_id,
                range,
                watermark_snapshot: self.watermark(),
                state: WindowState::Ready,
                s_count: 0,
                r_count: 0,
                created_ts: now_micros(),
                triggered_ts: 0,
                completed_ts: 0,
                has_late_data: false,
            },
        );
        windows.pending.insert(window_id);
        drop(windows);
        self.cv.notify_all();
        true
    }

    /// Force-promotes every still-Pending window to Ready, regardless of
    /// its trigger predicate. Returns the number promoted.
    pub fn trigger_pending_windows(&self) -> usize {
        let mut windows = self.windows.lock().expect("window lock poisoned");
        let ids: Vec<u64> = windows
            .by_id
            .iter()
            .filter(|(_, w)| w.state == WindowState::Pending)
            .map(|(id, _)| *id)
            .collect();
        let max_pending = self.config.max_pending_windows;
        for id in &ids {
            windows.by_id.get_mut(id).unwrap().state = WindowState::Ready;
            Self::enqueue_pending(&mut windows, *id, max_pending);
        }
        drop(windows);
        self.cv.notify_all();
        ids.len()
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn dispatch_ready_windows(self: &Arc<Self>) {
        loop {
            if self.active_count.load(Ordering::SeqCst) as usize >= self.config.max_concurrent_windows {
                break;
            }
            let window_id = {
                let mut windows = self.windows.lock().expect("window lock poisoned");
                let id = match windows.pending.iter().next().copied() {
                    Some(id) => id,
                    None => break,
                };
                windows.pending.remove(&id);
                if let Some(w) = windows.by_id.get_mut(&id) {
                    w.state = WindowState::Computing;
                    w.triggered_ts = now_micros();
                }
                id
            };

            self.active_count.fetch_add(1, Ordering::SeqCst);
            self.metrics.lock().expect("metrics lock poisoned").total_scheduled += 1;

            let this = self.clone();
            let submitted = self.resource_handle.submit_task(move || this.execute_window(window_id));
            if !submitted {
                self.active_count.fetch_sub(1, Ordering::SeqCst);
                let mut windows = self.windows.lock().expect("window lock poisoned");
                if let Some(w) = windows.by_id.get_mut(&window_id) {
                    w.state = WindowState::Ready;
                }
                windows.pending.insert(window_id);
                warn!(window_id, "resource handle rejected window task, requeued");
                break;
            }
        }
    }

    fn execute_window(self: Arc<Self>, window_id: u64) {
        let range = {
            let windows = self.windows.lock().expect("window lock poisoned");
            match windows.by_id.get(&window_id) {
                Some(w) => w.range,
                None => return,
            }
        };

        let s_tuples = self.stream_s.query(range, &[]).unwrap_or_default();
        let r_tuples = self.stream_r.query(range, &[]).unwrap_or_default();

        let started = Instant::now();
        let outcome = (self.join_fn)(&s_tuples, &r_tuples, window_id, range);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = match outcome {
            Ok(out) => {
                let record = JoinRecord {
                    window_id,
                    ts: range.start,
                    join_count: out.join_count,
                    aqp_estimate: out.aqp_estimate,
                    selectivity: out.selectivity,
                    payload: out.payload,
                    metrics: out.metrics,
                    tags: out.tags,
                    error_message: None,
                };
                let join_count = record.join_count;
                if let Err(e) = self.results.insert(record) {
                    error!(window_id, error = %e, "failed to persist join record");
                }
                let mut windows = self.windows.lock().expect("window lock poisoned");
                if let Some(w) = windows.by_id.get_mut(&window_id) {
                    w.state = WindowState::Completed;
                    w.completed_ts = now_micros();
                }
                drop(windows);
                self.metrics.lock().expect("metrics lock poisoned").record_completion(elapsed_ms);
                ComputeStatus::Completed { window_id, join_count }
            }
            Err(error_message) => {
                let mut windows = self.windows.lock().expect("window lock poisoned");
                if let Some(w) = windows.by_id.get_mut(&window_id) {
                    w.state = WindowState::Failed;
                    w.completed_ts = now_micros();
                }
                drop(windows);
                self.metrics.lock().expect("metrics lock poisoned").record_failure();
                ComputeStatus::Failed { window_id, error: error_message }
            }
        };

        self.fire_callbacks(window_id, &status);
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.cv.notify_all();
    }

    fn fire_callbacks(&self, window_id: u64, status: &ComputeStatus) {
        let info = {
            let windows = self.windows.lock().expect("window lock poisoned");
            windows.by_id.get(&window_id).cloned()
        };
        let Some(info) = info else { return };
        let callbacks = match status {
            ComputeStatus::Completed { .. } => &self.completion_callbacks,
            ComputeStatus::Failed { .. } => &self.failure_callbacks,
        };
        for cb in callbacks.lock().expect("callback lock poisoned").iter() {
            cb(&info, status);
        }
    }

    fn cleanup_old_windows(&self) {
        let watermark = self.watermark();
        let horizon = 10 * self.config.window_len_us;
        let mut windows = self.windows.lock().expect("window lock poisoned");
        let stale: Vec<u64> = windows
            .by_id
            .iter()
            .filter(|(_, w)| w.state == WindowState::Completed && watermark - w.range.end > horizon)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(w) = windows.by_id.remove(&id) {
                windows.start_index.remove(&w.range.start);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn all_windows(&self) -> Vec<WindowInfo> {
        self.windows.lock().expect("window lock poisoned").by_id.values().cloned().collect()
    }

    pub fn window_info(&self, window_id: u64) -> Option<WindowInfo> {
        self.windows.lock().expect("window lock poisoned").by_id.get(&window_id).cloned()
    }

    pub fn pending_window_count(&self) -> usize {
        self.windows.lock().expect("window lock poisoned").pending.len()
    }

    pub fn active_window_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire) as usize
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let m = self.metrics.lock().expect("metrics lock poisoned");
        let avg = if m.completion_times_ms.is_empty() {
            0.0
        } else {
            m.completion_times_ms.iter().sum::<f64>() / m.completion_times_ms.len() as f64
        };
        let max = m.completion_times_ms.iter().cloned().fold(0.0, f64::max);
        SchedulerMetrics {
            total_scheduled: m.total_scheduled,
            total_completed: m.total_completed,
            total_failed: m.total_failed,
            pending: self.pending_window_count(),
            active: self.active_window_count(),
            avg_completion_ms: avg,
            max_completion_ms: max,
            windows_per_sec_ewma: m.windows_per_sec_ewma,
            late_data_count: m.late_data_count,
            late_windows_recomputed: m.late_windows_recomputed,
        }
    }

    pub fn reset(&self) {
        let mut windows = self.windows.lock().expect("window lock poisoned");
        windows.by_id.clear();
        windows.start_index.clear();
        windows.pending.clear();
        self.watermark_us.store(i64::MIN, Ordering::SeqCst);
        self.max_timestamp_seen.store(i64::MIN, Ordering::SeqCst);
    }
}
