use twilightbbs::node::NodeManager;

// Capacity invariants: held ids never exceed the limit, released ids come
// back, and after all releases the live set is empty.
#[test]
fn acquire_release_sweep_respects_capacity() {
    let mgr = NodeManager::new(4, "Test", "Sysop");
    let mut held = Vec::new();

    for round in 0..3 {
        while let Some(id) = mgr.acquire() {
            assert!(id >= 1 && id <= 4, "id {} out of range", id);
            assert!(!held.contains(&id), "id {} double-allocated", id);
            held.push(id);
        }
        assert_eq!(held.len(), 4, "round {}: capacity not reached", round);
        assert_eq!(mgr.count(), 4);

        for id in held.drain(..) {
            mgr.release(id);
        }
        assert_eq!(mgr.count(), 0, "round {}: live set not empty", round);
    }
}

#[test]
fn interleaved_release_reuses_lowest() {
    let mgr = NodeManager::new(3, "Test", "Sysop");
    let a = mgr.acquire().unwrap();
    let b = mgr.acquire().unwrap();
    let c = mgr.acquire().unwrap();
    assert_eq!((a, b, c), (1, 2, 3));

    mgr.release(b);
    assert_eq!(mgr.acquire(), Some(2));

    mgr.release(a);
    mgr.release(c);
    assert_eq!(mgr.acquire(), Some(1));
    assert_eq!(mgr.acquire(), Some(3));
    assert_eq!(mgr.acquire(), None);
}

#[test]
fn concurrent_acquire_never_exceeds_capacity() {
    use std::sync::Arc;

    let mgr = Arc::new(NodeManager::new(8, "Test", "Sysop"));
    let mut handles = Vec::new();

    for _ in 0..16 {
        let mgr = mgr.clone();
        handles.push(std::thread::spawn(move || mgr.acquire()));
    }

    let granted: Vec<u32> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(granted.len(), 8);
    let mut unique = granted.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 8, "duplicate ids granted: {:?}", granted);
}
