// SPDX-License-Identifier: GPL-3.0-or-later

//! Property-based invariant checks for the pool allocator, in the style
//! of the teacher workspace's `proptest` dev-dependency usage.

#![cfg(test)]

use crate::pool::Pool;
use proptest::prelude::*;

proptest! {
    #[test]
    fn balanced_alloc_free_never_leaks(sizes in proptest::collection::vec(1usize..64, 1..20)) {
        let mut buf = vec![0u8; 8192];
        let mut pool = Pool::new(&mut buf);
        let mut handles = Vec::new();
        for &size in &sizes {
            if let Some(addr) = pool.alloc(0, size) {
                handles.push(addr);
            }
        }
        for addr in handles {
            pool.free(addr);
        }
        let stats = pool.statistics();
        prop_assert_eq!(stats.used, 0);
    }

    #[test]
    fn statistics_used_plus_free_is_total(sizes in proptest::collection::vec(1usize..64, 0..20)) {
        let mut buf = vec![0u8; 8192];
        let mut pool = Pool::new(&mut buf);
        for &size in &sizes {
            let _ = pool.alloc(0, size);
        }
        let stats = pool.statistics();
        prop_assert_eq!(stats.used + stats.free, stats.total);
    }
}
