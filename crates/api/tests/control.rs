use loopforge::*;
use parking_lot::{const_mutex, Mutex, MutexGuard};

static RUNTIME_LOCK: Mutex<()> = const_mutex(());

fn setup() -> MutexGuard<'static, ()> {
    let guard = RUNTIME_LOCK.lock();
    initialize_with(RuntimeOptions {
        default_workers: Some(4),
        ..RuntimeOptions::default()
    });
    enable();
    atop_enable();
    thread_enable();
    ledger_disable();
    recycler_disable();
    thread_setworkers(4);
    guard
}

#[test]
fn initialize_runs_once() {
    let _guard = setup();
    assert!(!initialize());
    #[allow(deprecated)]
    let again = oldinit();
    assert!(!again);
    assert!(runtime().is_some());
}

#[test]
fn toggles_round_trip() {
    let _guard = setup();
    let toggles: [(fn() -> bool, fn() -> bool, fn() -> bool); 5] = [
        (enable, disable, isenabled),
        (atop_enable, atop_disable, atop_isenabled),
        (thread_enable, thread_disable, thread_isenabled),
        (ledger_enable, ledger_disable, ledger_isenabled),
        (recycler_enable, recycler_disable, recycler_isenabled),
    ];
    for (on, off, is_on) in toggles {
        off();
        assert!(!is_on());
        assert!(!on(), "enable reports the previous state");
        assert!(is_on());
        assert!(on());
        assert!(off());
        assert!(!is_on());
        assert!(!off());
    }
}

#[test]
fn toggles_leave_the_other_flags_alone() {
    let _guard = setup();
    atop_disable();
    let state = control_state();
    assert!(state.master_enabled);
    assert!(!state.atop_enabled);
    assert!(state.thread_enabled);
    assert_eq!(state.worker_count, 4);
}

#[test]
fn worker_count_is_clamped_to_one() {
    let _guard = setup();
    assert_eq!(thread_setworkers(0), 4);
    assert_eq!(thread_getworkers(), 1);
    assert_eq!(thread_setworkers(-7), 1);
    assert_eq!(thread_getworkers(), 1);
    assert_eq!(thread_setworkers(6), 1);
    assert_eq!(thread_getworkers(), 6);
}

#[test]
fn recycler_flag_drives_the_pool() {
    let _guard = setup();
    recycler_enable();
    assert!(recycler_info().enabled);
    recycler_disable();
    let info = recycler_info();
    assert!(!info.enabled);
    assert_eq!(info.pooled_buffers, 0);
}

#[test]
fn timers_and_cpu_description() {
    let _guard = setup();
    let first = timer_gettsc();
    let second = timer_gettsc();
    assert!(second >= first);
    // 2020-09-13 in Unix nanoseconds.
    assert!(timer_getutc() > 1_600_000_000_000_000_000);
    assert!(!cpustring().is_empty());
}
