//! Signalled puts: payload visibility and the two signal update modes.

use ironmem::testing::run_spmd;
use ironmem::{Cmp, SignalOp};

#[test]
fn payload_is_visible_once_the_signal_is() {
    run_spmd(2, |shmem| {
        let me = shmem.my_pe();
        let data = shmem.alloc_array::<u8>(4096)?;
        let sig = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        if me == 0 {
            let payload = vec![0xe7u8; 4096];
            shmem
                .put_signal(data, &payload, sig, 1, SignalOp::Set, 1)?;
        } else {
            let observed = shmem.signal_wait_until(sig, Cmp::Eq, 1)?;
            assert_eq!(observed, 1);
            assert!(data.to_vec(4096).iter().all(|&b| b == 0xe7));
        }
        shmem.barrier_all()?;
        shmem.free_array(sig)?;
        shmem.free_array(data)?;

        Ok(())
    });
}

#[test]
fn signal_add_accumulates_across_senders() {
    run_spmd(4, |shmem| {
        let me = shmem.my_pe();
        let n = shmem.n_pes() as usize;
        let data = shmem.alloc_array::<i64>(4)?;
        let sig = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        if me != 0 {
            let block = [me as i64; 1];
            shmem
                .put_signal_nbi(data.add(me as usize), &block, sig, 1, SignalOp::Add, 0)?;
            shmem.quiet()?;
        } else {
            // Three senders, one ADD each.
            let total = shmem
                .signal_wait_until(sig, Cmp::Eq, (n - 1) as u64)?;
            assert_eq!(total, 3);
            let got = data.to_vec(4);
            assert_eq!(&got[1..], &[1, 2, 3]);
        }
        shmem.barrier_all()?;
        shmem.free_array(sig)?;
        shmem.free_array(data)?;

        Ok(())
    });
}

#[test]
fn signal_fetch_reads_the_local_word() {
    run_spmd(2, |shmem| {
        let sig = shmem.alloc_array::<u64>(1)?;
        shmem.barrier_all()?;

        assert_eq!(shmem.signal_fetch(sig)?, 0);
        if shmem.my_pe() == 0 {
            let empty: [u8; 0] = [];
            // A pure signal: empty payload, SET delivery.
            shmem
                .put_signal(sig.cast::<u8>(), &empty, sig, 0xbeef, SignalOp::Set, 1)?;
        } else {
            shmem.signal_wait_until(sig, Cmp::Ne, 0)?;
            assert_eq!(shmem.signal_fetch(sig)?, 0xbeef);
        }
        shmem.barrier_all()?;
        shmem.free_array(sig)?;

        Ok(())
    });
}
