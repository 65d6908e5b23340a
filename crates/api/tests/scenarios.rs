use loopforge::ufunc;
use loopforge::*;
use ndarray::Array2;
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

fn add_key(dtype: DataType) -> LoopKey {
    LoopKey::new(LoopOp::Add, &[dtype, dtype], dtype)
}

#[test]
fn ten_by_ten_int_matrix_add() {
    let _guard = setup();
    let lhs = Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j) as i32);
    let rhs = Array2::from_shape_fn((10, 10), |(i, j)| (j * 10 + i) as i32);
    let expected = Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j + j * 10 + i) as i32);

    for (atop, threads) in [(false, false), (true, false), (false, true), (true, true)] {
        if atop {
            atop_enable();
        } else {
            atop_disable();
        }
        if threads {
            thread_enable();
        } else {
            thread_disable();
        }
        let sum = ufunc::add(&lhs, &rhs).unwrap();
        assert_eq!(sum, expected, "atop={atop} threads={threads}");
    }

    disable();
    assert_eq!(ufunc::add(&lhs, &rhs).unwrap(), expected);
}

#[test]
fn large_add_matches_across_worker_counts() {
    let _guard = setup();
    let n = 100_000;
    let lhs: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
    let rhs: Vec<f64> = (0..n).map(|i| 1.0 / (i as f64 + 1.0)).collect();
    let key = add_key(DataType::Float64);

    let mut four = vec![0.0f64; n];
    let report = dispatch(&key, &[f64::operand(&lhs), f64::operand(&rhs)], f64::operand_mut(&mut four)).unwrap();
    assert_eq!(report.workers_used, 4);
    assert!(!report.from_host);

    thread_setworkers(1);
    let mut one = vec![0.0f64; n];
    let report = dispatch(&key, &[f64::operand(&lhs), f64::operand(&rhs)], f64::operand_mut(&mut one)).unwrap();
    assert_eq!(report.workers_used, 1);

    let mismatched = four
        .iter()
        .zip(&one)
        .filter(|(a, b)| a.to_bits() != b.to_bits())
        .count();
    assert_eq!(mismatched, 0);
    assert_eq!(one[99_999], 99_999.0 * 0.5 + 1.0 / 100_000.0);
}

#[test]
fn unknown_signatures_fail_lookup() {
    let _guard = setup();
    let key = LoopKey::new(LoopOp::Divide, &[DataType::Int32, DataType::Int32], DataType::Int32);
    let values = [1i32, 2];
    let mut out = [0i32; 2];
    let err = dispatch(&key, &[i32::operand(&values), i32::operand(&values)], i32::operand_mut(&mut out))
        .unwrap_err();
    assert!(matches!(err, LoopError::Lookup { ref signature } if signature == "divide:ii->i"));
}

#[test]
fn ledger_records_one_entry_per_call() {
    let _guard = setup();
    let key = add_key(DataType::Int64);
    let values: Vec<i64> = (0..256).collect();

    ledger_enable();
    for _ in 0..7 {
        apply(&key, &[i64::operand(&values), i64::operand(&values)]).unwrap();
    }
    let info = ledger_info();
    assert_eq!(info.records.len(), 7);
    assert!(info.records.iter().all(|record| record.key == key && record.elements == 256));
    assert_eq!(info.summary("add:ll->l").map(|summary| summary.calls), Some(7));

    ledger_disable();
    for _ in 0..3 {
        apply(&key, &[i64::operand(&values), i64::operand(&values)]).unwrap();
    }
    assert_eq!(ledger_info().records.len(), 7);

    ledger_enable();
    assert!(ledger_info().records.is_empty());
    ledger_disable();
}

#[test]
fn recycled_buffers_are_never_shared() {
    let _guard = setup();
    recycler_enable();
    let key = add_key(DataType::Int32);
    let lhs: Vec<i32> = (0..100).collect();
    let rhs = vec![1i32; 100];
    let inputs = [i32::operand(&lhs), i32::operand(&rhs)];
    let before = recycler_info();

    let mut first = apply(&key, &inputs).unwrap();
    let second = apply(&key, &inputs).unwrap();
    assert_eq!(recycler_info().checked_out, before.checked_out + 2);

    first.as_mut_slice::<i32>().unwrap().fill(-999);
    assert!(second.as_slice::<i32>().unwrap().iter().all(|&v| v != -999));
    drop(first);

    let third = apply(&key, &inputs).unwrap();
    assert!(recycler_info().hits > before.hits);
    let expected: Vec<i32> = (1..=100).collect();
    assert_eq!(third.as_slice::<i32>().unwrap(), expected.as_slice());

    drop((second, third));
    assert!(recycler_info().pooled_buffers >= 1);
    recycler_disable();
    assert_eq!(recycler_info().pooled_buffers, 0);
}

#[test]
fn recycler_follows_the_control_panel() {
    let _guard = setup();
    let panel = runtime().unwrap().control();
    assert!(!panel.enable(Toggle::Recycler));
    assert!(recycler_isenabled());

    let key = add_key(DataType::Int16);
    let values = [1i16, 2, 3];
    let out = apply(&key, &[i16::operand(&values), i16::operand(&values)]).unwrap();
    assert!(out.is_pooled());
    drop(out);
    let info = recycler_info();
    assert!(info.enabled);
    assert!(info.pooled_buffers >= 1);

    panel.disable(Toggle::Recycler);
    let info = recycler_info();
    assert!(!info.enabled);
    assert_eq!(info.pooled_buffers, 0);
    assert!(!apply(&key, &[i16::operand(&values), i16::operand(&values)]).unwrap().is_pooled());
}

#[test]
fn concurrent_applies_keep_their_outputs_apart() {
    let _guard = setup();
    recycler_enable();
    let key = add_key(DataType::Int32);
    let threads = 6i32;

    std::thread::scope(|scope| {
        for id in 0..threads {
            let key = &key;
            scope.spawn(move || {
                let lhs = vec![id * 1_000; 300];
                let rhs = vec![7i32; 300];
                for round in 0..100 {
                    let mut out = apply(key, &[i32::operand(&lhs), i32::operand(&rhs)]).unwrap();
                    let values = out.as_mut_slice::<i32>().unwrap();
                    assert!(values.iter().all(|&v| v == id * 1_000 + 7), "thread {id} round {round}");
                    values.fill(-id);
                    std::thread::yield_now();
                    assert!(values.iter().all(|&v| v == -id), "thread {id} round {round}");
                }
            });
        }
    });

    let info = recycler_info();
    assert_eq!(info.checked_out, 0);
    assert!(info.hits > 0);
    recycler_disable();
}

#[test]
fn getitem_maps_out_of_range_indices() {
    let _guard = setup();
    let values = [10u16, 20, 30, 40];
    let indices = [0i64, 3, -1, 4, -5, 2];
    let out = getitem(&values, i64::operand(&indices), None).unwrap();
    assert_eq!(out, vec![10, 40, 40, u16::MAX, u16::MAX, 30]);

    let out = getitem(&values, i64::operand(&indices), Some(7)).unwrap();
    assert_eq!(out, vec![10, 40, 40, 7, 7, 30]);

    let floats = [1.5f32, 2.5];
    let out = getitem(&floats, u8::operand(&[1, 9]), None).unwrap();
    assert_eq!(out[0], 2.5);
    assert!(out[1].is_nan());

    let err = getitem(&values, f32::operand(&[0.0]), None).unwrap_err();
    assert!(matches!(err, LoopError::InvalidIndex(_)));
}

#[test]
fn large_gathers_and_masks_match_sequential_results() {
    let _guard = setup();
    let n = 200_000;
    let values: Vec<i32> = (0..n as i32).collect();
    let indices: Vec<u32> = (0..n as u32).map(|i| (i * 7919) % (n as u32 + 100)).collect();
    let mask: Vec<bool> = (0..n).map(|i| i % 3 == 0 || i % 7 == 0).collect();

    let threaded = getitem(&values, u32::operand(&indices), Some(-1)).unwrap();
    let selected = boolean_index(&values, &mask).unwrap();
    let counted = mask_count(&mask).unwrap();

    thread_disable();
    assert_eq!(getitem(&values, u32::operand(&indices), Some(-1)).unwrap(), threaded);
    assert_eq!(boolean_index(&values, &mask).unwrap(), selected);

    let expected: Vec<i32> = values
        .iter()
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|(&v, _)| v)
        .collect();
    assert_eq!(selected, expected);
    assert_eq!(counted, expected.len());

    let err = boolean_index(&values, &mask[..10]).unwrap_err();
    assert!(matches!(err, LoopError::ShapeMismatch { .. }));
}
