//! # Ironmem
//!
//! An **OpenSHMEM-style PGAS runtime** for Rust: a fixed set of peer
//! processes (PEs), each owning a symmetric heap, communicating through
//! one-sided remote memory access, remote atomics, signalled puts,
//! point-to-point waits, teams, and a library of collective algorithms.
//!
//! ## Key pieces
//!
//! - **Symmetric heap** — collective allocation with identical layout on
//!   every PE; a [`SymPtr`] is valid at the same offset everywhere
//! - **RMA** — typed and byte-granular `put`/`get`, strided `iput`/`iget`,
//!   scalar `p`/`g`, non-blocking `_nbi` forms, `fence`/`quiet` ordering
//! - **Atomics** — swap, compare-swap, fetch-add/inc, set/fetch and the
//!   bitwise family, over 32/64-bit integers and floats
//! - **Signalled puts** — payload plus an atomic signal update the target
//!   can wait on, with the payload-visibility guarantee
//! - **Point-to-point sync** — `wait_until`/`test` and their
//!   all/any/some/vector variants with adaptive backoff
//! - **Teams & collectives** — strided and 2D team splits, and multiple
//!   interchangeable algorithms per collective (barrier, broadcast,
//!   collect/fcollect, alltoall(s), reductions), selectable per team
//! - **Distributed lock** — FIFO queue lock over a symmetric `long`
//!
//! ## Quick start
//!
//! The `thread-transport` feature (default) runs a whole job as threads of
//! one process, which is how the test suite and demos work:
//!
//! ```no_run
//! use ironmem::testing::run_spmd;
//!
//! run_spmd(4, |shmem| {
//!     let me = shmem.my_pe();
//!     let n = shmem.n_pes();
//!
//!     // One symmetric i64 per PE.
//!     let counter = shmem.alloc_array::<i64>(1)?;
//!
//!     // Everybody increments PE 0's counter.
//!     shmem.atomic_fetch_inc(counter, 0)?;
//!     shmem.barrier_all()?;
//!
//!     if me == 0 {
//!         assert_eq!(counter.read(), n as i64);
//!     }
//!     shmem.free_array(counter)?;
//!     Ok(())
//! });
//! ```
//!
//! A real deployment provides its own [`Transport`] (RDMA verbs, sockets,
//! a shared-memory segment, …) and hands one endpoint per process to
//! [`Shmem::init`]. The core never talks to the network itself; it
//! validates, translates symmetric addresses to heap offsets, and drives
//! the transport's put/get/amo/signal primitives.
//!
//! ## The SPMD contract
//!
//! Collective calls (allocation, teams, collectives) must be made by every
//! PE of the team with compatible arguments; the runtime does not referee
//! mismatched collectives, it deadlocks like any SPMD library would.
//! Blocking waits poll forever; there are no timeouts. PE death is fatal
//! to the job.
//!
//! ## Module overview
//!
//! - [`heap`] — symmetric allocator, [`SymPtr`], allocation hints
//! - [`context`] — ordered communication contexts and their options
//! - [`rma`] — put/get families and ordering points
//! - [`signal`] — signalled puts and signal words
//! - [`amo`] — remote atomics
//! - [`sync`] — comparison codes and the wait/test engine
//! - [`lock`] — the distributed lock
//! - [`team`] — teams, splits, and per-team collective scratch
//! - [`collectives`] — the collective algorithm library
//! - [`transport`] — the byte-level transport seam ([`Transport`]) and the
//!   in-process thread transport
//! - [`config`] — runtime configuration and algorithm selection
//! - [`stats`] — operation counters (feature `stats`)
//! - [`testing`] — the SPMD test harness (feature `thread-transport`)

pub mod amo;
pub mod collectives;
pub mod config;
pub mod context;
pub mod elem;
pub mod error;
pub mod heap;
pub mod lock;
pub mod rma;
pub mod runtime;
pub mod signal;
pub mod stats;
pub mod sync;
pub mod team;
pub mod translate;
pub mod transport;

#[cfg(feature = "thread-transport")]
pub mod testing;

// General re-exports
pub use config::{
    AlgorithmConfig, AlltoallAlg, BarrierAlg, BcastAlg, CollectAlg, Config, FcollectAlg,
    ReduceAlg, SyncDiscipline, ThreadLevel,
};
pub use context::{Ctx, CtxOptions};
pub use elem::{
    And, AtomicElement, BitwiseAtomicElement, Element, IntAtomicElement, Max, Min, Or, Prod,
    ReduceFn, Sum, Xor,
};
pub use error::{Result, RtError};
pub use heap::{MallocHints, SymPtr};
pub use runtime::{MAJOR_VERSION, MINOR_VERSION, NAME, Shmem};
pub use sync::Cmp;
pub use team::{Team, TeamConfig};
pub use transport::{AmoOp, AmoWidth, Pe, SignalOp, StreamId, Transport};

#[cfg(feature = "stats")]
pub use stats::StatsSnapshot;

#[cfg(feature = "thread-transport")]
pub use transport::thread::{ThreadTransport, ThreadWorld};

/// The resting value of every collective scratch word. Collectives find
/// their scratch at this value and put it back before returning; it is
/// never a legal in-protocol payload.
pub const SYNC_VALUE: i64 = -1;

// Stable integer codes, exported for bindings. The typed equivalents are
// `Cmp`, `SignalOp` and `CtxOptions`.

pub const CMP_EQ: i32 = 0;
pub const CMP_NE: i32 = 1;
pub const CMP_GT: i32 = 2;
pub const CMP_LE: i32 = 3;
pub const CMP_LT: i32 = 4;
pub const CMP_GE: i32 = 5;

pub const SIGNAL_SET: i32 = 0;
pub const SIGNAL_ADD: i32 = 1;

pub const CTX_SERIALIZED: u32 = 1;
pub const CTX_PRIVATE: u32 = 2;
pub const CTX_NOSTORE: u32 = 4;
