//! Ring ping-pong: a token circles the world with put + wait_until,
//! measuring per-hop latency of the in-process transport.
//!
//! ```sh
//! cargo run --example ring_latency
//! ```

use ironmem::testing::run_spmd_config;
use ironmem::{Cmp, Config};
use std::time::Instant;

const PES: usize = 4;
const LAPS: i64 = 10_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_spmd_config(PES, Config::default(), |shmem| {
        let me = shmem.my_pe();
        let n = shmem.n_pes();
        let token = shmem.alloc_array::<i64>(1)?;
        shmem.barrier_all()?;

        let right = (me + 1) % n;
        let started = Instant::now();

        for lap in 1..=LAPS {
            if me == 0 {
                // Kick the lap, then wait for the token to come home.
                shmem.p(token, lap, right)?;
                shmem.wait_until(token, Cmp::Eq, lap)?;
            } else {
                shmem.wait_until(token, Cmp::Eq, lap)?;
                shmem.p(token, lap, right)?;
            }
        }

        shmem.barrier_all()?;
        if me == 0 {
            let hops = LAPS as u128 * n as u128;
            let per_hop = started.elapsed().as_nanos() / hops;
            println!("{LAPS} laps over {n} PEs: ~{per_hop} ns per hop");
        }

        shmem.barrier_all()?;
        shmem.free_array(token)?;

        Ok(())
    });
}
