//! Test harness: run an SPMD closure over an in-process world.
//!
//! [`run_spmd`] spins up one OS thread per PE, wires them through a
//! [`ThreadWorld`], initializes a runtime on each, runs the same closure
//! everywhere (the SPMD model), finalizes, and propagates the first panic
//! or error with its PE attached. Closures speak `anyhow::Result`, so `?`
//! works on every runtime call. A failing PE can leave siblings blocked in
//! a collective, so a broken test may show up as one PE's failure while the
//! harness is torn down.
//!
//! ```no_run
//! use ironmem::testing::run_spmd;
//!
//! run_spmd(4, |shmem| {
//!     let x = shmem.alloc_array::<i64>(1)?;
//!     x.write(shmem.my_pe() as i64);
//!     shmem.barrier_all()?;
//!     shmem.free_array(x)?;
//!     Ok(())
//! });
//! ```

use crate::config::Config;
use crate::runtime::Shmem;
use crate::transport::thread::ThreadWorld;
use std::sync::Arc;

/// Run `f` as an SPMD program over `npes` thread-PEs with the test
/// configuration ([`Config::small`]: small heap, debug checks on).
///
/// Panics if any PE panics or returns an error, naming the PE.
pub fn run_spmd<F>(npes: usize, f: F)
where
    F: Fn(&Shmem) -> anyhow::Result<()> + Send + Sync,
{
    run_spmd_config(npes, Config::small(), f)
}

/// [`run_spmd`] with an explicit configuration.
pub fn run_spmd_config<F>(npes: usize, config: Config, f: F)
where
    F: Fn(&Shmem) -> anyhow::Result<()> + Send + Sync,
{
    assert!(npes > 0, "an SPMD run needs at least one PE");
    let world = ThreadWorld::new(npes);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..npes)
            .map(|pe| {
                let world = Arc::clone(&world);
                let config = config.clone();
                s.spawn(move || -> anyhow::Result<()> {
                    let transport = Arc::new(world.endpoint(pe));
                    let shmem = Shmem::init(transport, config)?;
                    f(&shmem)?;
                    shmem.finalize()?;
                    Ok(())
                })
            })
            .collect();
        for (pe, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => panic!("PE {pe} failed: {err:#}"),
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| payload.downcast_ref::<&str>().copied())
                        .unwrap_or("non-string panic payload");
                    panic!("PE {pe} panicked: {msg}");
                }
            }
        }
    });
}
