//! Symmetric heap behaviour across a live world.

use ironmem::testing::run_spmd;
use ironmem::{MallocHints, RtError, SymPtr};

#[test]
fn allocations_land_at_the_same_offset_on_every_pe() {
    run_spmd(4, |shmem| {
        let a = shmem.malloc(100)?;
        let b = shmem.malloc(200)?;

        // Identical call sequence, identical offsets: the distance between
        // two allocations must agree everywhere. Verify by exchanging the
        // deltas through the heap itself.
        let delta = (b.addr() - a.addr()) as i64;
        let slot = shmem.alloc_array::<i64>(1)?;
        slot.write(delta);
        shmem.barrier_all()?;

        let n = shmem.n_pes();
        for pe in 0..n {
            let remote = shmem.g(slot, pe)?;
            assert_eq!(remote, delta, "offset layout diverged on PE {pe}");
        }

        shmem.barrier_all()?;
        shmem.free_array(slot)?;
        shmem.free(b)?;
        shmem.free(a)?;

        Ok(())
    });
}

#[test]
fn put_then_get_round_trips_a_unique_pattern() {
    run_spmd(4, |shmem| {
        let me = shmem.my_pe();
        let n = shmem.n_pes();
        let buf = shmem.alloc_array::<u32>(8)?;
        shmem.barrier_all()?;

        // Everyone stamps its right neighbour.
        let right = (me + 1) % n;
        let pattern: Vec<u32> = (0..8).map(|i| (me as u32) << 16 | i).collect();
        shmem.put(buf, &pattern, right)?;
        shmem.barrier_all()?;

        let left = (me + n - 1) % n;
        let expect: Vec<u32> = (0..8).map(|i| (left as u32) << 16 | i).collect();
        assert_eq!(buf.to_vec(8), expect);

        // And reading it back over the wire sees the same bytes.
        let mut fetched = vec![0u32; 8];
        shmem.get(&mut fetched, buf, me)?;
        assert_eq!(fetched, expect);

        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn calloc_zeroes_and_alignment_is_honoured() {
    run_spmd(2, |shmem| {
        let z = shmem.calloc(16, 4)?;
        let zeros = z.cast::<u32>().to_vec(16);
        assert!(zeros.iter().all(|&v| v == 0));

        let aligned = shmem.malloc_align(4096, 64)?;
        assert_eq!(aligned.addr() % 4096, 0);

        let hinted = shmem
            .malloc_with_hints(32, MallocHints::ATOMICS_REMOTE | MallocHints::SIGNAL_REMOTE)?;

        shmem.free(hinted)?;
        shmem.free(aligned)?;
        shmem.free(z)?;

        Ok(())
    });
}

#[test]
fn realloc_preserves_contents_and_stays_symmetric() {
    run_spmd(2, |shmem| {
        let p = shmem.malloc(64)?;
        let data: Vec<u8> = (0..64).collect();
        p.write_slice(&data);

        let grown = shmem.realloc(p, 4096)?;
        assert_eq!(grown.to_vec(64), data);

        // Still remotely addressable after the move.
        shmem.barrier_all()?;
        let mut remote = vec![0u8; 64];
        let peer = (shmem.my_pe() + 1) % shmem.n_pes();
        shmem.getmem(&mut remote, grown, peer)?;
        assert_eq!(remote, data);

        let shrunk = shmem.realloc(grown, 16)?;
        assert_eq!(shrunk, grown, "shrinking must not relocate");

        shmem.barrier_all()?;
        shmem.free(shrunk)?;

        Ok(())
    });
}

#[test]
fn exhaustion_is_collective_and_recoverable() {
    run_spmd(2, |shmem| {
        // Far more than the test heap holds.
        let res = shmem.malloc(1 << 30);
        assert!(matches!(res, Err(RtError::OutOfMemory)));

        // The failed call must not have corrupted the allocator.
        let ok = shmem.malloc(128)?;
        shmem.free(ok)?;

        Ok(())
    });
}

#[test]
fn rma_rejects_non_symmetric_addresses() {
    run_spmd(2, |shmem| {
        let mut local: i64 = 7;
        let bogus = SymPtr::from_raw(&mut local as *mut i64);
        let err = shmem.p(bogus, 1i64, 0).unwrap_err();
        assert!(matches!(err, RtError::NotSymmetric { .. }), "{err}");

        // Offsets past the heap end are equally non-symmetric.
        let real = shmem.alloc_array::<i64>(1)?;
        let past = real.byte_add(1 << 28);
        assert!(shmem.p(past, 1i64, 0).is_err());
        shmem.free_array(real)?;

        Ok(())
    });
}

#[test]
fn zero_size_allocations_are_invalid() {
    run_spmd(1, |shmem| {
        assert!(shmem.malloc(0).is_err());
        assert!(shmem.calloc(0, 8).is_err());
        assert!(shmem.alloc_array::<u64>(0).is_err());

        Ok(())
    });
}

#[test]
fn accessibility_probes_and_direct_pointers() {
    run_spmd(2, |shmem| {
        let v = shmem.alloc_array::<u64>(1)?;
        let me = shmem.my_pe();
        let peer = 1 - me;

        assert!(shmem.pe_accessible(peer));
        assert!(!shmem.pe_accessible(99));
        assert!(shmem.addr_accessible(v, peer));

        let mut local: u64 = 0;
        assert!(!shmem.addr_accessible(SymPtr::from_raw(&mut local as *mut u64), peer));

        // The thread transport maps every heap, so ptr() must alias.
        let alias = shmem.ptr(v, peer)?.expect("same-node alias");
        if me == 0 {
            unsafe { alias.as_ptr().write_volatile(0xfeed) };
        }
        shmem.barrier_all()?;
        if me == 1 {
            assert_eq!(v.read(), 0xfeed);
        }
        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}
