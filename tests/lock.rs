//! The distributed lock: mutual exclusion, handoff, and test_lock.

use ironmem::testing::run_spmd;
use mark_flaky_tests::flaky;

#[test]
fn lock_protects_a_read_modify_write() {
    run_spmd(4, |shmem| {
        let lock = shmem.alloc_array::<i64>(1)?;
        let total = shmem.alloc_array::<i64>(1)?;
        shmem.barrier_all()?;

        // A non-atomic remote increment, made safe only by the lock.
        for _ in 0..8 {
            shmem.set_lock(lock)?;
            let cur = shmem.g(total, 0)?;
            shmem.p(total, cur + 1, 0)?;
            shmem.quiet()?;
            shmem.clear_lock(lock)?;
        }

        shmem.barrier_all()?;
        if shmem.my_pe() == 0 {
            assert_eq!(total.read(), 4 * 8);
        }
        shmem.barrier_all()?;
        shmem.free_array(total)?;
        shmem.free_array(lock)?;

        Ok(())
    });
}

#[test]
fn test_lock_does_not_block() {
    run_spmd(2, |shmem| {
        let lock = shmem.alloc_array::<i64>(1)?;
        let flag = shmem.alloc_array::<i64>(1)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            assert!(shmem.test_lock(lock)?);
            // Holder signals, then waits for the peer's probe to finish.
            shmem.atomic_set(flag, 1i64, 1)?;
            shmem.wait_until(flag, ironmem::Cmp::Eq, 2i64)?;
            shmem.clear_lock(lock)?;
        } else {
            shmem.wait_until(flag, ironmem::Cmp::Eq, 1i64)?;
            assert!(!shmem.test_lock(lock)?, "lock is held by PE 0");
            shmem.atomic_set(flag, 2i64, 0)?;
            // Once released it is acquirable again.
            shmem.set_lock(lock)?;
            shmem.clear_lock(lock)?;
        }
        shmem.barrier_all()?;
        shmem.free_array(flag)?;
        shmem.free_array(lock)?;

        Ok(())
    });
}

#[flaky]
#[test]
fn lock_contention_stress() {
    run_spmd(4, |shmem| {
        let lock = shmem.alloc_array::<i64>(1)?;
        let log = shmem.alloc_array::<i64>(2)?;
        shmem.barrier_all()?;

        // log[0] counts entries, log[1] flags overlap: both mutated inside
        // the critical section without atomics.
        for _ in 0..50 {
            shmem.set_lock(lock)?;
            let inside = shmem.g(log.add(1), 0)?;
            assert_eq!(inside, 0, "two holders inside the critical section");
            shmem.p(log.add(1), 1i64, 0)?;
            shmem.quiet()?;
            let c = shmem.g(log, 0)?;
            shmem.p(log, c + 1, 0)?;
            shmem.p(log.add(1), 0i64, 0)?;
            shmem.quiet()?;
            shmem.clear_lock(lock)?;
        }

        shmem.barrier_all()?;
        if shmem.my_pe() == 0 {
            assert_eq!(log.read(), 4 * 50);
        }
        shmem.barrier_all()?;
        shmem.free_array(log)?;
        shmem.free_array(lock)?;

        Ok(())
    });
}
