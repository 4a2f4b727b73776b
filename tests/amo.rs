//! Remote atomics: pre-images, races, and the bitwise family.

use ironmem::testing::run_spmd;
use std::sync::Mutex;

#[test]
fn fetch_inc_race_yields_a_permutation() {
    let seen = Mutex::new(Vec::new());
    run_spmd(4, |shmem| {
        let counter = shmem.alloc_array::<i64>(1)?;
        shmem.barrier_all()?;

        let ticket = shmem.atomic_fetch_inc(counter, 0)?;
        seen.lock().unwrap().push(ticket);

        shmem.barrier_all()?;
        if shmem.my_pe() == 0 {
            assert_eq!(counter.read(), 4);
        }
        shmem.barrier_all()?;
        shmem.free_array(counter)?;

        Ok(())
    });
    let mut tickets = seen.into_inner().unwrap();
    tickets.sort();
    assert_eq!(tickets, vec![0, 1, 2, 3]);
}

#[test]
fn pre_image_plus_delta_equals_post_image() {
    run_spmd(2, |shmem| {
        let v = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            let pre = shmem.atomic_fetch_add(v, 17u64, 1)?;
            let post = shmem.atomic_fetch(v, 1)?;
            assert_eq!(pre + 17, post);

            let pre = shmem.atomic_fetch_or(v, 0xff00u64, 1)?;
            let post = shmem.atomic_fetch(v, 1)?;
            assert_eq!(pre | 0xff00, post);

            let pre = shmem.atomic_fetch_and(v, 0x00ffu64, 1)?;
            let post = shmem.atomic_fetch(v, 1)?;
            assert_eq!(pre & 0x00ff, post);

            let pre = shmem.atomic_fetch_xor(v, 0xabu64, 1)?;
            let post = shmem.atomic_fetch(v, 1)?;
            assert_eq!(pre ^ 0xab, post);
        }
        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}

#[test]
fn compare_swap_returns_pre_image_and_respects_mismatch() {
    run_spmd(2, |shmem| {
        let v = shmem.alloc_array::<i32>(1)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            assert_eq!(shmem.atomic_compare_swap(v, 0, 10, 1)?, 0);
            // Mismatch: memory unchanged, pre-image still returned.
            assert_eq!(shmem.atomic_compare_swap(v, 99, 20, 1)?, 10);
            assert_eq!(shmem.atomic_fetch(v, 1)?, 10);
        }
        shmem.barrier_all()?;
        if shmem.my_pe() == 1 {
            assert_eq!(v.read(), 10);
        }
        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}

#[test]
fn swap_set_fetch_on_floats() {
    run_spmd(2, |shmem| {
        let f = shmem.alloc_array::<f64>(1)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            shmem.atomic_set(f, 2.5f64, 1)?;
            assert_eq!(shmem.atomic_fetch(f, 1)?, 2.5);
            assert_eq!(shmem.atomic_swap(f, -1.25f64, 1)?, 2.5);
            assert_eq!(shmem.atomic_fetch(f, 1)?, -1.25);
        }
        shmem.barrier_all()?;
        shmem.free_array(f)?;

        Ok(())
    });
}

#[test]
fn signed_add_wraps_two_complement() {
    run_spmd(2, |shmem| {
        let v = shmem.alloc_array::<i32>(1)?;
        shmem.barrier_all()?;
        if shmem.my_pe() == 0 {
            shmem.atomic_set(v, i32::MAX, 1)?;
            shmem.atomic_add(v, 1i32, 1)?;
            assert_eq!(shmem.atomic_fetch(v, 1)?, i32::MIN);
        }
        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}

#[test]
fn nbi_fetch_lands_after_quiet() {
    run_spmd(2, |shmem| {
        let v = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            let mut pre = 0u64;
            shmem.atomic_fetch_add_nbi(&mut pre, v, 5u64, 1)?;
            shmem.quiet()?;
            assert_eq!(pre, 0);

            let mut fetched = 0u64;
            shmem.atomic_fetch_nbi(&mut fetched, v, 1)?;
            shmem.quiet()?;
            assert_eq!(fetched, 5);

            let mut swapped = 0u64;
            shmem.atomic_swap_nbi(&mut swapped, v, 11u64, 1)?;
            shmem.quiet()?;
            assert_eq!(swapped, 5);

            let mut cas = 0u64;
            shmem
                .atomic_compare_swap_nbi(&mut cas, v, 11u64, 13u64, 1)?;
            shmem.quiet()?;
            assert_eq!(cas, 11);
        }
        shmem.barrier_all()?;
        if shmem.my_pe() == 1 {
            assert_eq!(v.read(), 13);
        }
        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}

#[test]
fn concurrent_bitwise_or_builds_a_mask() {
    run_spmd(4, |shmem| {
        let mask = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        shmem
            .atomic_or(mask, 1u64 << shmem.my_pe(), 0)?;
        shmem.barrier_all()?;

        if shmem.my_pe() == 0 {
            assert_eq!(mask.read(), 0b1111);
        }
        shmem.barrier_all()?;
        shmem.free_array(mask)?;

        Ok(())
    });
}
