use crate::resource_manager::{ResourceManager, ResourceRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn allocate_then_release_reclaims_capacity() {
    let mgr = ResourceManager::new(2);
    mgr.set_global_limits(4, 1024 * 1024 * 1024);

    let handle = mgr
        .allocate("tenant-a", ResourceRequest { threads: 2, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();
    assert!(handle.is_valid());
    assert_eq!(mgr.get_total_usage().threads_used, 2);

    mgr.release("tenant-a").unwrap();
    assert_eq!(mgr.get_total_usage().threads_used, 0);
}

#[test]
fn duplicate_tenant_allocation_is_rejected() {
    let mgr = ResourceManager::new(1);
    mgr.set_global_limits(4, 1024 * 1024 * 1024);
    mgr.allocate("tenant-a", ResourceRequest { threads: 1, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();
    assert!(mgr
        .allocate("tenant-a", ResourceRequest { threads: 1, memory_bytes: 1024 * 1024, priority: 0 })
        .is_none());
}

#[test]
fn allocation_exceeding_capacity_is_refused() {
    let mgr = ResourceManager::new(1);
    mgr.set_global_limits(2, 1024 * 1024 * 1024);
    mgr.allocate("tenant-a", ResourceRequest { threads: 2, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();
    assert!(mgr
        .allocate("tenant-b", ResourceRequest { threads: 1, memory_bytes: 1024 * 1024, priority: 0 })
        .is_none());
}

#[test]
fn submitted_task_eventually_runs() {
    let mgr = ResourceManager::new(2);
    mgr.set_global_limits(4, 1024 * 1024 * 1024);
    let handle = mgr
        .allocate("tenant-a", ResourceRequest { threads: 1, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();

    let ran = Arc::new(AtomicU64::new(0));
    let ran_clone = ran.clone();
    assert!(handle.submit_task(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while ran.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn released_handle_rejects_new_submissions() {
    let mgr = ResourceManager::new(1);
    mgr.set_global_limits(4, 1024 * 1024 * 1024);
    let handle = mgr
        .allocate("tenant-a", ResourceRequest { threads: 1, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();
    mgr.release("tenant-a").unwrap();
    assert!(!handle.submit_task(|| {}));
}

#[test]
fn is_under_pressure_reports_near_capacity() {
    let mgr = ResourceManager::new(1);
    mgr.set_global_limits(10, 1024 * 1024 * 1024);
    mgr.allocate("tenant-a", ResourceRequest { threads: 9, memory_bytes: 1024 * 1024, priority: 0 })
        .unwrap();
    assert!(mgr.is_under_pressure());
}
