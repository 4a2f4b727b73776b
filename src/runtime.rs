//! The runtime handle and its lifecycle.
//!
//! [`Shmem`] is a cheaply cloneable handle over one PE's runtime state: the
//! transport endpoint, the symmetric heap, the context and team registries,
//! and the predefined teams. A process binding that wants the classic
//! free-function API pins one handle in a global; the core itself is
//! handle-based so several PEs can coexist in one process (which is exactly
//! how the test harness runs).
//!
//! Lifecycle is one-way: a handle is created initialized and can only move
//! to finalized. Every entry point checks the state and fails with a
//! lifecycle error after finalize.

use crate::config::{Config, ThreadLevel};
use crate::context::{CtxRegistry, CtxState, DEFAULT_CTX};
use crate::error::{Result, RtError};
use crate::heap::{Arena, SymHeap, SymPtr};
use crate::stats::Stats;
use crate::team::{PsyncLayout, Team, TeamInner, TeamRegistry};
use crate::translate::HeapExtent;
use crate::transport::{Pe, Transport};
use once_cell::sync::Lazy;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Library name reported by [`Shmem::info_get_name`].
pub const NAME: &str = "ironmem";

/// Specification version reported by [`Shmem::info_get_version`].
pub const MAJOR_VERSION: i32 = 1;
pub const MINOR_VERSION: i32 = 5;

static VENDOR_STRING: Lazy<String> =
    Lazy::new(|| format!("{NAME} {MAJOR_VERSION}.{MINOR_VERSION}"));

const ST_INITIALIZED: u8 = 1;
const ST_FINALIZED: u8 = 2;

/// One PE's runtime. Clone freely; all clones are the same PE.
#[derive(Clone)]
pub struct Shmem {
    pub(crate) inner: Arc<RtInner>,
}

pub(crate) struct RtInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: Config,
    pub(crate) me: Pe,
    pub(crate) npes: Pe,
    state: AtomicU8,
    thread_level: ThreadLevel,
    /// Keeps the heap memory alive; `extent` below is its address range.
    #[allow(dead_code)]
    arena: Arena,
    pub(crate) extent: HeapExtent,
    pub(crate) heap: Mutex<SymHeap>,
    pub(crate) ctxs: Mutex<CtxRegistry>,
    pub(crate) teams: Mutex<TeamRegistry>,
    pub(crate) psync: PsyncLayout,
    pub(crate) world: Arc<TeamInner>,
    pub(crate) shared: Arc<TeamInner>,
    pub(crate) node: Arc<TeamInner>,
    pub(crate) default_ctx: Arc<CtxState>,
    pub(crate) stats: Stats,
}

impl RtInner {
    /// Fail unless the runtime is live.
    pub(crate) fn check_ready(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            ST_INITIALIZED => Ok(()),
            _ => Err(RtError::State("runtime is finalized")),
        }
    }

    /// Validate a target PE id.
    pub(crate) fn check_pe(&self, pe: Pe) -> Result<()> {
        if pe < 0 || pe >= self.npes {
            return Err(RtError::invalid(format!(
                "PE {pe} out of range [0, {})",
                self.npes
            )));
        }
        if !self.transport.pe_reachable(pe) {
            return Err(RtError::Unreachable(pe));
        }
        Ok(())
    }

    /// Translate a symmetric pointer spanning `nelems` elements to its heap
    /// offset.
    pub(crate) fn sym_offset<T>(&self, p: SymPtr<T>, nelems: usize) -> Result<usize> {
        let bytes = nelems
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(RtError::NotSymmetric { addr: p.addr() })?;
        self.extent.offset_of(p.addr(), bytes)
    }
}

impl Shmem {
    /// Collective initialization with the configured thread level.
    pub fn init(transport: Arc<dyn Transport>, config: Config) -> Result<Shmem> {
        Self::init_inner(transport, config)
    }

    /// Collective initialization requesting a thread-safety level. Returns
    /// the handle and the provided level, which is never below the request.
    pub fn init_thread(
        transport: Arc<dyn Transport>,
        mut config: Config,
        requested: ThreadLevel,
    ) -> Result<(Shmem, ThreadLevel)> {
        config.thread_level = requested;
        let rt = Self::init_inner(transport, config)?;
        Ok((rt, requested))
    }

    fn init_inner(transport: Arc<dyn Transport>, config: Config) -> Result<Shmem> {
        let npes = transport.n_pes();
        let me = transport.my_pe();
        if npes < 1 || me < 0 || me >= npes {
            return Err(RtError::Transport(format!(
                "transport reports PE {me} of {npes}"
            )));
        }
        if !(3..=64).contains(&config.max_teams) {
            return Err(RtError::invalid(format!(
                "max_teams {} outside [3, 64]",
                config.max_teams
            )));
        }
        if config.algorithms.tree_degree < 2 {
            return Err(RtError::invalid("tree_degree must be at least 2"));
        }
        if config.reduce_chunk < 64 || config.reduce_chunk % 16 != 0 {
            return Err(RtError::invalid(
                "reduce_chunk must be a multiple of 16, at least 64 bytes",
            ));
        }

        let arena = Arena::new(config.heap_size)?;
        let extent = HeapExtent::new(arena.base() as usize, arena.len());

        let mut heap = SymHeap::new(arena.len());
        let mut psync = PsyncLayout::new(npes as usize, &config);
        let pool_off = heap
            .alloc(psync.pool_bytes(), 64)
            .ok_or(RtError::OutOfMemory)?;
        psync.set_pool(pool_off);
        // The pool must be at its resting state before the heap is
        // published: a fast peer's wire-up barrier signals would otherwise
        // race the reset below.
        psync.reset_all_slots(&extent);

        // Safety: the arena lives inside RtInner and outlives the transport
        // registration; peers stop addressing it once finalize's barrier
        // completes.
        unsafe { transport.register_heap(arena.base(), arena.len())? };

        let (world, shared, node) = Self::predefined_teams(&*transport, npes, me, &config);

        let inner = RtInner {
            me,
            npes,
            state: AtomicU8::new(ST_INITIALIZED),
            thread_level: config.thread_level,
            extent,
            heap: Mutex::new(heap),
            ctxs: Mutex::new(CtxRegistry::new()),
            teams: Mutex::new(TeamRegistry::predefined()),
            psync,
            world: Arc::new(world),
            shared: Arc::new(shared),
            node: Arc::new(node),
            default_ctx: Arc::new(CtxState {
                id: DEFAULT_CTX,
                options: Default::default(),
            }),
            stats: Stats::default(),
            arena,
            config,
            transport,
        };
        let rt = Shmem {
            inner: Arc::new(inner),
        };
        tracing::debug!(pe = me, npes, heap = rt.inner.extent.len(), "runtime initialized");

        // Wire-up barrier: returns once every peer has registered its heap
        // and reset its pSync pool.
        rt.barrier_all()?;
        Ok(rt)
    }

    /// Build WORLD, SHARED and NODE from transport topology. SHARED/NODE
    /// membership must form an arithmetic progression to be a team; when a
    /// transport reports something irregular, they fall back to just the
    /// calling PE.
    fn predefined_teams(
        transport: &dyn Transport,
        npes: Pe,
        me: Pe,
        config: &Config,
    ) -> (TeamInner, TeamInner, TeamInner) {
        let world = TeamInner::predefined(0, crate::team::WORLD_SLOT, 0, 1, npes, me, config);

        let nodemates: Vec<Pe> = (0..npes).filter(|&p| transport.same_node(p)).collect();
        let progression = |pes: &[Pe]| -> Option<(Pe, i32, i32, i32)> {
            let my_rank = pes.iter().position(|&p| p == me)? as i32;
            if pes.len() == 1 {
                return Some((me, 1, 1, 0));
            }
            let stride = pes[1] - pes[0];
            if stride < 1 || pes.windows(2).any(|w| w[1] - w[0] != stride) {
                return None;
            }
            Some((pes[0], stride, pes.len() as i32, my_rank))
        };
        let (start, stride, size, rank) = progression(&nodemates).unwrap_or((me, 1, 1, 0));

        let shared = TeamInner::predefined(
            1,
            crate::team::SHARED_SLOT,
            start,
            stride,
            size,
            rank,
            config,
        );
        let node = TeamInner::predefined(
            2,
            crate::team::NODE_SLOT,
            start,
            stride,
            size,
            rank,
            config,
        );
        (world, shared, node)
    }

    /// Collective teardown. Completes outstanding communication, then marks
    /// the runtime finalized; further calls fail with a lifecycle error.
    pub fn finalize(&self) -> Result<()> {
        self.inner.check_ready()?;
        self.barrier_all()?;
        self.inner.transport.quiet(DEFAULT_CTX)?;
        self.inner.state.store(ST_FINALIZED, Ordering::Release);
        tracing::debug!(pe = self.inner.me, "runtime finalized");
        Ok(())
    }

    /// This PE's identity in `[0, n_pes)`.
    pub fn my_pe(&self) -> Pe {
        self.inner.me
    }

    /// World size.
    pub fn n_pes(&self) -> Pe {
        self.inner.npes
    }

    /// Whether the runtime is live.
    pub fn initialized(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ST_INITIALIZED
    }

    /// Whether finalize has run.
    pub fn finalized(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ST_FINALIZED
    }

    /// The provided thread-safety level.
    pub fn query_thread(&self) -> ThreadLevel {
        self.inner.thread_level
    }

    /// Specification version implemented.
    pub fn info_get_version(&self) -> (i32, i32) {
        (MAJOR_VERSION, MINOR_VERSION)
    }

    /// Vendor identification string.
    pub fn info_get_name(&self) -> &'static str {
        &VENDOR_STRING
    }

    /// Terminate the whole job. Local teardown is skipped by design; peers
    /// learn of the exit from the launcher, not from us.
    pub fn global_exit(&self, status: i32) -> ! {
        tracing::error!(pe = self.inner.me, status, "global_exit");
        std::process::exit(status)
    }

    /// Whether `pe` can be targeted by RMA at all.
    pub fn pe_accessible(&self, pe: Pe) -> bool {
        self.inner.transport.pe_reachable(pe)
    }

    /// Whether `addr` on `pe` can be targeted by RMA: it must be symmetric
    /// here and reachable there.
    pub fn addr_accessible<T>(&self, addr: SymPtr<T>, pe: Pe) -> bool {
        match self.inner.sym_offset(addr, 1) {
            Ok(off) => self.inner.transport.addr_reachable(off, pe),
            Err(_) => false,
        }
    }

    /// A local alias for the object at `addr` on `pe`, when the transport
    /// can map the remote heap for loads and stores. `None` otherwise.
    pub fn ptr<T>(&self, addr: SymPtr<T>, pe: Pe) -> Result<Option<NonNull<T>>> {
        self.inner.check_ready()?;
        self.inner.check_pe(pe)?;
        let off = self.inner.sym_offset(addr, 1)?;
        Ok(self
            .inner
            .transport
            .direct_pointer(off, pe)
            .map(NonNull::cast))
    }

    /// The team of all PEs.
    pub fn team_world(&self) -> Team {
        Team::from_inner(self.clone(), Arc::clone(&self.inner.world))
    }

    /// The team of PEs sharing memory with this one.
    pub fn team_shared(&self) -> Team {
        Team::from_inner(self.clone(), Arc::clone(&self.inner.shared))
    }

    /// The team of PEs on this node.
    pub fn team_node(&self) -> Team {
        Team::from_inner(self.clone(), Arc::clone(&self.inner.node))
    }

    /// Snapshot of the runtime's operation counters.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> crate::stats::StatsSnapshot {
        self.inner.stats.snapshot(self.inner.me)
    }
}
