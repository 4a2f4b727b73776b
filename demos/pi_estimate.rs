//! Monte-Carlo π over an in-process world: every PE samples, a sum
//! reduction combines, PE 0 reports.
//!
//! ```sh
//! cargo run --example pi_estimate
//! ```

use ironmem::testing::run_spmd_config;
use ironmem::Config;

const PES: usize = 4;
const SAMPLES_PER_PE: u64 = 200_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_spmd_config(PES, Config::default(), |shmem| {
        let me = shmem.my_pe();
        let world = shmem.team_world();

        let hits = shmem.alloc_array::<u64>(1)?;
        let total = shmem.alloc_array::<u64>(1)?;

        // A tiny deterministic xorshift, seeded per PE.
        let mut state = 0x9e3779b9u64.wrapping_mul(me as u64 + 1);
        let mut inside = 0u64;
        for _ in 0..SAMPLES_PER_PE {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let x = (state >> 32) as f64 / u32::MAX as f64;
            let y = (state & 0xffff_ffff) as f64 / u32::MAX as f64;
            if x * x + y * y <= 1.0 {
                inside += 1;
            }
        }
        hits.write(inside);

        shmem.sum_reduce(&world, total, hits, 1)?;

        if me == 0 {
            let samples = PES as u64 * SAMPLES_PER_PE;
            let pi = 4.0 * total.read() as f64 / samples as f64;
            println!("pi ≈ {pi:.5} from {samples} samples across {PES} PEs");
        }

        shmem.barrier_all()?;
        shmem.free_array(total)?;
        shmem.free_array(hits)?;

        Ok(())
    });
}
