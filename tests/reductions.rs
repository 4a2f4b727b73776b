//! Reductions: operators, algorithms, chunked streaming, custom folds.

use ironmem::testing::run_spmd;
use ironmem::{AlgorithmConfig, ReduceAlg, ReduceFn};

const REDUCE_ALGS: &[ReduceAlg] = &[
    ReduceAlg::Linear,
    ReduceAlg::TreeBroadcast,
    ReduceAlg::RecursiveDoubling,
];

fn with_alg(alg: ReduceAlg) -> AlgorithmConfig {
    AlgorithmConfig {
        reduce: alg,
        ..AlgorithmConfig::default()
    }
}

#[test]
fn sum_reduce_across_all_algorithms() {
    run_spmd(4, |shmem| {
        let me = shmem.my_pe() as i64;
        let world = shmem.team_world();
        let src = shmem.alloc_array::<i64>(5)?;
        let dst = shmem.alloc_array::<i64>(5)?;

        for &alg in REDUCE_ALGS {
            world.set_algorithms(with_alg(alg));
            let mine: Vec<i64> = (0..5).map(|j| me * 10 + j).collect();
            src.write_slice(&mine);
            shmem.sum_reduce(&world, dst, src, 5)?;
            // Sum over p of (10p + j) = 60 + 4j.
            let got = dst.to_vec(5);
            for (j, v) in got.iter().enumerate() {
                assert_eq!(*v, 60 + 4 * j as i64, "{alg:?}");
            }
        }

        shmem.barrier_all()?;
        shmem.free_array(dst)?;
        shmem.free_array(src)?;

        Ok(())
    });
}

#[test]
fn min_max_prod_and_bitwise_operators() {
    run_spmd(4, |shmem| {
        let me = shmem.my_pe();
        let world = shmem.team_world();
        let src_i = shmem.alloc_array::<i32>(2)?;
        let dst_i = shmem.alloc_array::<i32>(2)?;
        let src_u = shmem.alloc_array::<u64>(1)?;
        let dst_u = shmem.alloc_array::<u64>(1)?;

        src_i.write_slice(&[me - 1, 10 - me]);
        shmem.min_reduce(&world, dst_i, src_i, 2)?;
        assert_eq!(dst_i.to_vec(2), vec![-1, 7]);

        shmem.max_reduce(&world, dst_i, src_i, 2)?;
        assert_eq!(dst_i.to_vec(2), vec![2, 10]);

        src_i.write_slice(&[me + 1, 2]);
        shmem.prod_reduce(&world, dst_i, src_i, 2)?;
        assert_eq!(dst_i.to_vec(2), vec![24, 16]);

        src_u.write(1u64 << (me * 4));
        shmem.or_reduce(&world, dst_u, src_u, 1)?;
        assert_eq!(dst_u.read(), 0x1111);

        src_u.write(0xff00 | me as u64);
        shmem.and_reduce(&world, dst_u, src_u, 1)?;
        assert_eq!(dst_u.read(), 0xff00);

        src_u.write(me as u64);
        shmem.xor_reduce(&world, dst_u, src_u, 1)?;
        assert_eq!(dst_u.read(), 0 ^ 1 ^ 2 ^ 3);

        shmem.barrier_all()?;
        shmem.free_array(dst_u)?;
        shmem.free_array(src_u)?;
        shmem.free_array(dst_i)?;
        shmem.free_array(src_i)?;

        Ok(())
    });
}

#[test]
fn long_vectors_stream_through_the_bounce_buffer() {
    // 1500 i64 = 12 KB per contribution, far beyond one 2 KB chunk, so the
    // double-buffered protocol takes several laps.
    run_spmd(4, |shmem| {
        let me = shmem.my_pe() as i64;
        let world = shmem.team_world();
        let src = shmem.alloc_array::<i64>(1500)?;
        let dst = shmem.alloc_array::<i64>(1500)?;

        for &alg in REDUCE_ALGS {
            world.set_algorithms(with_alg(alg));
            let mine: Vec<i64> = (0..1500).map(|j| me + j).collect();
            src.write_slice(&mine);
            shmem.sum_reduce(&world, dst, src, 1500)?;
            let got = dst.to_vec(1500);
            for (j, v) in got.iter().enumerate() {
                assert_eq!(*v, 6 + 4 * j as i64, "{alg:?} at element {j}");
            }
        }

        shmem.barrier_all()?;
        shmem.free_array(dst)?;
        shmem.free_array(src)?;

        Ok(())
    });
}

#[test]
fn float_sum_with_exactly_representable_values() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        let src = shmem.alloc_array::<f64>(3)?;
        let dst = shmem.alloc_array::<f64>(3)?;

        for &alg in REDUCE_ALGS {
            world.set_algorithms(with_alg(alg));
            src.write_slice(&[1.0, 0.5, 2.0_f64.powi(shmem.my_pe())]);
            shmem.sum_reduce(&world, dst, src, 3)?;
            let got = dst.to_vec(3);
            assert_eq!(got[0], 4.0);
            assert_eq!(got[1], 2.0);
            assert_eq!(got[2], 1.0 + 2.0 + 4.0 + 8.0);
        }

        shmem.barrier_all()?;
        shmem.free_array(dst)?;
        shmem.free_array(src)?;

        Ok(())
    });
}

#[test]
fn float_min_max_are_total_ordered() {
    run_spmd(2, |shmem| {
        let world = shmem.team_world();
        let src = shmem.alloc_array::<f32>(1)?;
        let dst = shmem.alloc_array::<f32>(1)?;

        src.write(if shmem.my_pe() == 0 { -3.5 } else { 1.25 });
        shmem.min_reduce(&world, dst, src, 1)?;
        assert_eq!(dst.read(), -3.5);
        shmem.max_reduce(&world, dst, src, 1)?;
        assert_eq!(dst.read(), 1.25);

        shmem.barrier_all()?;
        shmem.free_array(dst)?;
        shmem.free_array(src)?;

        Ok(())
    });
}

#[test]
fn in_place_reduction_with_dest_equal_to_src() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        let buf = shmem.alloc_array::<i64>(4)?;

        for &alg in REDUCE_ALGS {
            world.set_algorithms(with_alg(alg));
            let me = shmem.my_pe() as i64;
            buf.write_slice(&[me, me, me, me]);
            shmem.sum_reduce(&world, buf, buf, 4)?;
            assert_eq!(buf.to_vec(4), vec![6, 6, 6, 6], "{alg:?}");
        }

        shmem.barrier_all()?;
        shmem.free_array(buf)?;

        Ok(())
    });
}

/// Modular sum: commutative and associative, unlike anything built in.
struct ModSum(i64);

impl ReduceFn<i64> for ModSum {
    fn identity(&self) -> i64 {
        0
    }

    fn combine(&self, acc: &mut i64, v: i64) {
        *acc = (*acc + v).rem_euclid(self.0);
    }
}

#[test]
fn caller_supplied_operators_plug_in() {
    run_spmd(4, |shmem| {
        let world = shmem.team_world();
        let src = shmem.alloc_array::<i64>(1)?;
        let dst = shmem.alloc_array::<i64>(1)?;

        src.write(7 * (shmem.my_pe() as i64 + 1));
        shmem.reduce_with(&world, &ModSum(10), dst, src, 1)?;
        // 7 + 14 + 21 + 28 = 70 ≡ 0 (mod 10).
        assert_eq!(dst.read(), 0);

        shmem.barrier_all()?;
        shmem.free_array(dst)?;
        shmem.free_array(src)?;

        Ok(())
    });
}
