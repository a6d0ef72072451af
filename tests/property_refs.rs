/// Property-based tests for reference accounting
///
/// Random sequences of acquire / release / drop / invalidate must keep the
/// registry's counters consistent with a simple model.

use ferrous_refs::{Container, Provider, RefRegistry, ServiceRef, Token};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize),
    Drop(usize),
    InvalidateAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..3).prop_map(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        2 => any::<usize>().prop_map(Op::Drop),
        1 => Just(Op::InvalidateAll),
    ]
}

proptest! {
    #[test]
    fn counters_match_model(ops in prop::collection::vec(op(), 0..60)) {
        let tokens = [
            Token::<u32>::new("T0"),
            Token::<u32>::new("T1"),
            Token::<u32>::new("T2"),
        ];
        let registry = RefRegistry::new();
        let mut held: Vec<(usize, ServiceRef<u32>)> = Vec::new();
        let mut acquired = 0u64;
        let mut leaked = 0u64;
        let mut peak = 0usize;
        let mut last_id = 0u64;

        for op in ops {
            match op {
                Op::Acquire(t) => {
                    let r = registry.acquire(&tokens[t], Arc::new(t as u32));
                    prop_assert!(r.id() > last_id);
                    last_id = r.id();
                    held.push((t, r));
                    acquired += 1;
                }
                Op::Release(i) if !held.is_empty() => {
                    let (_, r) = &held[i % held.len()];
                    let was_alive = r.is_alive();
                    prop_assert_eq!(r.release(), was_alive);
                }
                Op::Drop(i) if !held.is_empty() => {
                    let (_, r) = held.remove(i % held.len());
                    if r.is_alive() {
                        leaked += 1;
                    }
                    drop(r);
                }
                Op::InvalidateAll => {
                    let alive = held.iter().filter(|(_, r)| r.is_alive()).count();
                    prop_assert_eq!(registry.invalidate_all(), alive);
                }
                _ => {}
            }

            let alive: Vec<usize> = held.iter().filter(|(_, r)| r.is_alive()).map(|(t, _)| *t).collect();
            peak = peak.max(alive.len());
            for (t, token) in tokens.iter().enumerate() {
                prop_assert_eq!(registry.ref_count(token), alive.iter().filter(|x| **x == t).count());
            }

            let stats = registry.stats();
            prop_assert_eq!(stats.active, alive.len());
            prop_assert_eq!(stats.total_acquired, acquired);
            prop_assert_eq!(stats.total_released, acquired - alive.len() as u64);
            prop_assert_eq!(stats.leaked, leaked);
            prop_assert_eq!(stats.peak_active, peak);
            prop_assert_eq!(stats.by_token.values().sum::<usize>(), alive.len());
        }
    }
}

proptest! {
    #[test]
    fn scope_disposal_releases_everything(per_scope in prop::collection::vec(0usize..6, 1..5)) {
        let token = Token::<String>::new("SESSION");
        let root = Container::new();
        root.register(&token, Provider::factory(|c| Ok(c.id().to_string())).scoped()).unwrap();

        let mut scopes = Vec::new();
        let mut handles = Vec::new();
        for count in &per_scope {
            let scope = root.create_scope().unwrap();
            for _ in 0..*count {
                handles.push(scope.acquire_ref(&token).unwrap());
            }
            prop_assert_eq!(scope.refs().ref_count(&token), *count);
            scopes.push(scope);
        }

        root.dispose();
        prop_assert!(handles.iter().all(|h| !h.is_alive()));
        for (scope, count) in scopes.iter().zip(&per_scope) {
            let stats = scope.refs().stats();
            prop_assert_eq!(stats.active, 0);
            prop_assert_eq!(stats.total_released, *count as u64);
            prop_assert_eq!(stats.leaked, 0);
        }
    }
}

proptest! {
    #[test]
    fn check_leaks_is_sorted_and_read_only(count in 0usize..20) {
        let token = Token::<usize>::new("AGED");
        let registry = RefRegistry::new();
        let handles: Vec<_> = (0..count).map(|i| registry.acquire(&token, Arc::new(i))).collect();

        let leaks = registry.check_leaks(std::time::Duration::ZERO);
        prop_assert!(leaks.len() <= count);
        prop_assert!(leaks.windows(2).all(|w| w[0].age >= w[1].age && w[0].ref_id < w[1].ref_id));
        prop_assert_eq!(registry.total_active(), count);
        for h in &handles {
            h.release();
        }
    }
}
