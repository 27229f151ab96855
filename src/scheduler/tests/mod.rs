use crate::join_result_table::{JoinMetrics, JoinResultTable};
use crate::lsm::EngineConfig;
use crate::resource_manager::{ResourceManager, ResourceRequest};
use crate::scheduler::{
    ComputeStatus, JoinOutcome, Scheduler, SchedulerConfig, StreamId, TriggerPolicy, WindowState, WindowType,
};
use crate::stream_table::StreamTable;
use crate::tuple::{Tags, TimeRange};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn noop_join_fn() -> Arc<crate::scheduler::JoinFn> {
    Arc::new(|s, r, _window_id, _range| {
        Ok(JoinOutcome {
            join_count: (s.len() + r.len()) as u64,
            aqp_estimate: 0.0,
            selectivity: 1.0,
            payload: Vec::new(),
            metrics: JoinMetrics {
                computation_ms: 0.0,
                memory_bytes: 0,
                threads: 1,
                cpu_pct: 0.0,
                used_aqp: false,
                algorithm_tag: "test".to_string(),
            },
            tags: Tags::new(),
        })
    })
}

fn build_scheduler(config: SchedulerConfig) -> (Arc<Scheduler>, Arc<ResourceManager>) {
    let dir = tempdir().unwrap();
    let stream_s = Arc::new(StreamTable::open(dir.path().join("s"), EngineConfig::default()).unwrap());
    let stream_r = Arc::new(StreamTable::open(dir.path().join("r"), EngineConfig::default()).unwrap());
    let results = Arc::new(JoinResultTable::open(dir.path().join("results"), EngineConfig::default()).unwrap());
    let resource_mgr = Arc::new(ResourceManager::new(2));
    resource_mgr.set_global_limits(8, 1024 * 1024 * 1024);
    let handle = resource_mgr
        .allocate("scheduler", ResourceRequest { threads: 2, memory_bytes: 4 * 1024 * 1024, priority: 0 })
        .unwrap();

    let scheduler = Scheduler::new(config, stream_s, stream_r, results, handle, noop_join_fn());
    (scheduler, resource_mgr)
}

#[test]
fn tumbling_window_materializes_single_window_per_bucket() {
    let config = SchedulerConfig {
        window_type: WindowType::Tumbling,
        window_len_us: 1000,
        slide_len_us: 1000,
        trigger_policy: TriggerPolicy::Manual,
        ..SchedulerConfig::default()
    };
    let (scheduler, _mgr) = build_scheduler(config);
    scheduler.on_data_inserted(StreamId::S, 100, 1);
    scheduler.on_data_inserted(StreamId::S, 900, 1);
    scheduler.on_data_inserted(StreamId::S, 1500, 1);

    let windows = scheduler.all_windows();
    assert_eq!(windows.len(), 2);
}

#[test]
fn sliding_window_materializes_overlapping_windows() {
    let config = SchedulerConfig {
        window_type: WindowType::Sliding,
        window_len_us: 1000,
        slide_len_us: 500,
        trigger_policy: TriggerPolicy::Manual,
        ..SchedulerConfig::default()
    };
    let (scheduler, _mgr) = build_scheduler(config);
    scheduler.on_data_inserted(StreamId::S, 700, 1);

    let windows = scheduler.all_windows();
    // ts=700 falls in windows starting at 0 ([0,1000)) and 500 ([500,1500)).
    assert_eq!(windows.len(), 2);
}

#[test]
fn count_based_trigger_promotes_window_to_ready() {
    let config = SchedulerConfig {
        window_type: WindowType::Tumbling,
        window_len_us: 1_000_000,
        slide_len_us: 1_000_000,
        trigger_policy: TriggerPolicy::CountBased,
        trigger_count_threshold: 3,
        ..SchedulerConfig::default()
    };
    let (scheduler, _mgr) = build_scheduler(config);
    scheduler.on_data_inserted(StreamId::S, 100, 2);
    assert_eq!(scheduler.pending_window_count(), 0);
    scheduler.on_data_inserted(StreamId::R, 200, 1);
    assert_eq!(scheduler.pending_window_count(), 1);
}

#[test]
fn manual_schedule_window_runs_and_completes() {
    let config = SchedulerConfig { trigger_policy: TriggerPolicy::Manual, ..SchedulerConfig::default() };
    let (scheduler, _mgr) = build_scheduler(config);

    let completed = Arc::new(AtomicU64::new(0));
    let completed_clone = completed.clone();
    scheduler.on_window_completed(move |_info, status| {
        if matches!(status, ComputeStatus::Completed { .. }) {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(scheduler.start());
    assert!(scheduler.schedule_window(1, TimeRange::new(0, 1000)));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while completed.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    scheduler.stop(true);

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    let info = scheduler.window_info(1).unwrap();
    assert_eq!(info.state, WindowState::Completed);
}

#[test]
fn late_data_reopens_completed_window_when_allowed() {
    let config = SchedulerConfig {
        window_type: WindowType::Tumbling,
        window_len_us: 1000,
        slide_len_us: 1000,
        trigger_policy: TriggerPolicy::CountBased,
        trigger_count_threshold: 1,
        allow_late_data: true,
        max_delay_us: 0,
        ..SchedulerConfig::default()
    };
    let (scheduler, _mgr) = build_scheduler(config);
    assert!(scheduler.start());

    scheduler.on_data_inserted(StreamId::S, 100, 1);
    let window_id = scheduler.all_windows()[0].window_id;

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while scheduler.window_info(window_id).unwrap().state != WindowState::Completed
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(scheduler.window_info(window_id).unwrap().state, WindowState::Completed);

    // Advances the watermark well past window 0's end, then a late tuple
    // lands back inside the already-completed window's range.
    scheduler.on_data_inserted(StreamId::S, 5000, 1);
    scheduler.on_data_inserted(StreamId::S, 100, 1);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !scheduler.window_info(window_id).unwrap().has_late_data && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    scheduler.stop(true);

    assert!(scheduler.window_info(window_id).unwrap().has_late_data);
}

#[test]
fn pending_queue_respects_capacity() {
    let config = SchedulerConfig {
        window_type: WindowType::Tumbling,
        window_len_us: 1000,
        slide_len_us: 1000,
        trigger_policy: TriggerPolicy::CountBased,
        trigger_count_threshold: 1,
        max_pending_windows: 1,
        ..SchedulerConfig::default()
    };
    let (scheduler, _mgr) = build_scheduler(config);
    scheduler.on_data_inserted(StreamId::S, 100, 1);
    scheduler.on_data_inserted(StreamId::S, 2000, 1);
    assert!(scheduler.pending_window_count() <= 1);
}
