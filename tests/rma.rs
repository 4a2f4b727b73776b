//! RMA semantics: typed, byte, scalar, strided and non-blocking forms,
//! plus context ordering points.

use ironmem::testing::run_spmd;
use ironmem::{CtxOptions, RtError};

#[test]
fn scalar_p_and_g() {
    run_spmd(3, |shmem| {
        let me = shmem.my_pe();
        let n = shmem.n_pes();
        let v = shmem.alloc_array::<i64>(1)?;

        let right = (me + 1) % n;
        shmem.p(v, 1000 + me as i64, right)?;
        shmem.barrier_all()?;

        let left = (me + n - 1) % n;
        assert_eq!(v.read(), 1000 + left as i64);
        assert_eq!(shmem.g(v, left)?, 1000 + ((left + n - 1) % n) as i64);

        shmem.barrier_all()?;
        shmem.free_array(v)?;

        Ok(())
    });
}

#[test]
fn strided_iput_and_iget() {
    run_spmd(2, |shmem| {
        let me = shmem.my_pe();
        let peer = 1 - me;
        let buf = shmem.alloc_array::<i32>(16)?;

        // Write every second remote element from a stride-3 source.
        let src: Vec<i32> = (0..12).map(|i| i * 10 + me).collect();
        shmem.iput(buf, &src, 2, 3, 4, peer)?;
        shmem.barrier_all()?;

        let got = buf.to_vec(16);
        for i in 0..4 {
            assert_eq!(got[2 * i], (3 * i as i32) * 10 + peer);
        }

        // And gather them back with the mirrored strides.
        let mut out = vec![-1i32; 8];
        shmem.iget(&mut out, buf, 2, 2, 4, me)?;
        for i in 0..4 {
            assert_eq!(out[2 * i], got[2 * i]);
        }

        // Zero strides are malformed.
        assert!(matches!(
            shmem.iput(buf, &src, 0, 1, 4, peer),
            Err(RtError::Invalid(_))
        ));

        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn bytewise_putmem_getmem() {
    run_spmd(2, |shmem| {
        let me = shmem.my_pe();
        let peer = 1 - me;
        let buf = shmem.malloc(64)?;

        let msg = [0x5au8; 48];
        shmem.putmem(buf, &msg, peer)?;
        shmem.barrier_all()?;

        let mut readback = [0u8; 48];
        shmem.getmem(&mut readback, buf, me)?;
        assert_eq!(readback, msg);

        shmem.barrier_all()?;
        shmem.free(buf)?;

        Ok(())
    });
}

#[test]
fn nbi_forms_complete_by_quiet() {
    run_spmd(2, |shmem| {
        let me = shmem.my_pe();
        let peer = 1 - me;
        let buf = shmem.alloc_array::<u64>(4)?;

        let data = [9u64, 8, 7, 6];
        shmem.put_nbi(buf, &data, peer)?;
        shmem.quiet()?;
        shmem.barrier_all()?;
        assert_eq!(buf.to_vec(4), data);

        let mut out = [0u64; 4];
        shmem.get_nbi(&mut out, buf, peer)?;
        shmem.quiet()?;
        assert_eq!(out, data);

        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn zero_elements_is_a_successful_noop() {
    run_spmd(2, |shmem| {
        let buf = shmem.alloc_array::<u32>(1)?;
        let empty: [u32; 0] = [];
        shmem.put(buf, &empty, 0)?;
        shmem.put_nbi(buf, &empty, 1)?;
        let mut sink: [u32; 0] = [];
        shmem.get(&mut sink, buf, 1)?;
        shmem.iput(buf, &empty, 3, 3, 0, 0)?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn bad_pe_ids_are_rejected() {
    run_spmd(2, |shmem| {
        let buf = shmem.alloc_array::<u32>(1)?;
        assert!(matches!(
            shmem.p(buf, 1u32, -1),
            Err(RtError::Invalid(_))
        ));
        assert!(matches!(shmem.p(buf, 1u32, 7), Err(RtError::Invalid(_))));
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn fence_and_quiet_are_idempotent() {
    run_spmd(2, |shmem| {
        let buf = shmem.alloc_array::<u64>(1)?;
        shmem.p(buf, 1u64, 1 - shmem.my_pe())?;
        shmem.fence()?;
        shmem.fence()?;
        shmem.quiet()?;
        shmem.quiet()?;
        shmem.barrier_all()?;
        assert_eq!(buf.read(), 1);
        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn contexts_create_destroy_and_carry_rma() {
    run_spmd(2, |shmem| {
        let me = shmem.my_pe();
        let peer = 1 - me;
        let buf = shmem.alloc_array::<i64>(1)?;

        let ctx = shmem.ctx_create(CtxOptions::SERIALIZED)?;
        assert_eq!(ctx.options(), CtxOptions::SERIALIZED);
        ctx.p(buf, 55i64, peer)?;
        ctx.quiet()?;
        shmem.barrier_all()?;
        assert_eq!(buf.read(), 55);

        shmem.ctx_destroy(ctx)?;

        // The default context is indestructible.
        let default = shmem.default_ctx();
        assert!(default.is_default());
        assert!(shmem.ctx_destroy(default).is_err());

        // Unknown option bits are malformed.
        assert!(matches!(
            shmem.ctx_create_from_bits(0x40),
            Err(RtError::Invalid(_))
        ));
        let nostore = shmem.ctx_create_from_bits(4)?;
        nostore.fence()?; // allowed to be a no-op, must not fail
        shmem.ctx_destroy(nostore)?;

        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

#[test]
fn runtime_identity_and_lifecycle() {
    run_spmd(3, |shmem| {
        assert!(shmem.initialized());
        assert!(!shmem.finalized());
        assert!((0..3).contains(&shmem.my_pe()));
        assert_eq!(shmem.n_pes(), 3);

        let (major, minor) = shmem.info_get_version();
        assert_eq!((major, minor), (1, 5));
        assert!(shmem.info_get_name().contains("ironmem"));

        Ok(())
    });
}
