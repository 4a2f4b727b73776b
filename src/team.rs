//! Teams and their collective scratch.
//!
//! A [`Team`] names a subset of PEs laid out as an arithmetic progression of
//! world ranks (`start`, `stride`, `size`). Teams form a tree rooted at
//! WORLD via [`Team::split_strided`] and [`Team::split_2d`].
//!
//! Every team owns a **slot** in the pSync pool: a fixed region of the
//! symmetric heap reserved at init, holding the scratch words each
//! collective family signals through plus the reduction bounce buffer. The
//! pool is symmetric, so slot agreement is the only thing team creation has
//! to negotiate: members AND their free-slot masks together over the parent
//! team and take the lowest commonly free bit. Two teams may share a slot
//! only if they share no PE, which the mask protocol guarantees.
//!
//! All scratch words rest at [`SYNC_VALUE`]; every collective that raises a
//! word puts it back before returning.

use crate::SYNC_VALUE;
use crate::collectives;
use crate::config::{AlgorithmConfig, Config};
use crate::error::{Result, RtError};
use crate::runtime::Shmem;
use crate::translate::HeapExtent;
use crate::transport::Pe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const WORLD_SLOT: usize = 0;
pub(crate) const SHARED_SLOT: usize = 1;
pub(crate) const NODE_SLOT: usize = 2;

/// Team creation parameters. `num_contexts` is recorded for bindings that
/// preallocate contexts per team; this runtime creates contexts lazily.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeamConfig {
    pub num_contexts: usize,
}

/// A contiguous run of 64-bit scratch words in the symmetric heap.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Region {
    pub(crate) base: usize,
    pub(crate) words: usize,
}

impl Region {
    /// Heap byte offset of word `i`.
    pub(crate) fn word(&self, i: usize) -> usize {
        debug_assert!(i < self.words);
        self.base + i * 8
    }
}

/// Placement of per-team scratch inside the symmetric heap.
///
/// Layout of one slot, in 64-bit words, banks first:
/// `[barrier×2 | bcast×2 | collect | alltoall | reduce]` followed by the
/// byte-addressed reduction bounce buffer. Barrier and broadcast carry two
/// parity banks so back-to-back calls never reuse a word a slow peer may
/// still signal.
pub(crate) struct PsyncLayout {
    pool_off: usize,
    slot_bytes: usize,
    sync_words: usize,
    barrier_words: usize,
    bcast_words: usize,
    collect_words: usize,
    alltoall_words: usize,
    reduce_words: usize,
    pwrk_bytes: usize,
    max_slots: usize,
}

fn ceil_log2(n: usize) -> usize {
    (n.max(1).next_power_of_two().trailing_zeros() as usize).max(1)
}

impl PsyncLayout {
    pub(crate) fn new(npes: usize, config: &Config) -> Self {
        let rounds = ceil_log2(npes);
        let barrier_words = rounds + 2;
        let bcast_words = rounds + 2;
        let collect_words = npes + 2;
        let alltoall_words = npes + 2;
        let reduce_words = npes + 2;
        let sync_words =
            2 * barrier_words + 2 * bcast_words + collect_words + alltoall_words + reduce_words;
        let pwrk_bytes = 2 * config.reduce_chunk;
        // The bounce buffer starts 16-aligned so any element type streams
        // through it without misalignment.
        let slot_bytes = ((sync_words * 8).div_ceil(16) * 16 + pwrk_bytes).div_ceil(64) * 64;
        Self {
            pool_off: 0,
            slot_bytes,
            sync_words,
            barrier_words,
            bcast_words,
            collect_words,
            alltoall_words,
            reduce_words,
            pwrk_bytes,
            max_slots: config.max_teams,
        }
    }

    pub(crate) fn pool_bytes(&self) -> usize {
        self.slot_bytes * self.max_slots
    }

    pub(crate) fn set_pool(&mut self, off: usize) {
        self.pool_off = off;
    }

    pub(crate) fn max_slots(&self) -> usize {
        self.max_slots
    }

    fn slot_off(&self, slot: usize) -> usize {
        debug_assert!(slot < self.max_slots);
        self.pool_off + slot * self.slot_bytes
    }

    pub(crate) fn barrier(&self, slot: usize, bank: usize) -> Region {
        debug_assert!(bank < 2);
        Region {
            base: self.slot_off(slot) + bank * self.barrier_words * 8,
            words: self.barrier_words,
        }
    }

    pub(crate) fn bcast(&self, slot: usize, bank: usize) -> Region {
        debug_assert!(bank < 2);
        Region {
            base: self.slot_off(slot) + (2 * self.barrier_words + bank * self.bcast_words) * 8,
            words: self.bcast_words,
        }
    }

    pub(crate) fn collect(&self, slot: usize) -> Region {
        Region {
            base: self.slot_off(slot) + (2 * self.barrier_words + 2 * self.bcast_words) * 8,
            words: self.collect_words,
        }
    }

    pub(crate) fn alltoall(&self, slot: usize) -> Region {
        Region {
            base: self.collect(slot).base + self.collect_words * 8,
            words: self.alltoall_words,
        }
    }

    pub(crate) fn reduce(&self, slot: usize) -> Region {
        Region {
            base: self.alltoall(slot).base + self.alltoall_words * 8,
            words: self.reduce_words,
        }
    }

    /// The reduction bounce buffer: heap byte offset and total length.
    pub(crate) fn pwrk(&self, slot: usize) -> (usize, usize) {
        (
            self.slot_off(slot) + (self.sync_words * 8).div_ceil(16) * 16,
            self.pwrk_bytes,
        )
    }

    /// Write every scratch word of every slot to its resting value. Only
    /// called before the heap is published to peers.
    pub(crate) fn reset_all_slots(&self, extent: &HeapExtent) {
        for slot in 0..self.max_slots {
            let base = self.slot_off(slot);
            for w in 0..self.sync_words {
                unsafe {
                    std::ptr::write_volatile(extent.addr_at(base + w * 8) as *mut i64, SYNC_VALUE)
                }
            }
        }
    }
}

pub(crate) struct TeamInner {
    pub(crate) id: u64,
    pub(crate) my_rank: i32,
    pub(crate) nranks: i32,
    pub(crate) start: Pe,
    pub(crate) stride: i32,
    pub(crate) slot: usize,
    pub(crate) predefined: bool,
    pub(crate) config: TeamConfig,
    pub(crate) algorithms: Mutex<AlgorithmConfig>,
    pub(crate) barrier_epoch: AtomicU64,
    pub(crate) bcast_epoch: AtomicU64,
    pub(crate) destroyed: AtomicBool,
}

impl TeamInner {
    pub(crate) fn predefined(
        id: u64,
        slot: usize,
        start: Pe,
        stride: i32,
        nranks: i32,
        my_rank: i32,
        config: &Config,
    ) -> Self {
        Self {
            id,
            my_rank,
            nranks,
            start,
            stride,
            slot,
            predefined: true,
            config: TeamConfig::default(),
            algorithms: Mutex::new(config.algorithms),
            barrier_epoch: AtomicU64::new(0),
            bcast_epoch: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// World PE of team rank `rank`.
    pub(crate) fn world_pe(&self, rank: i32) -> Pe {
        debug_assert!((0..self.nranks).contains(&rank));
        self.start + rank * self.stride
    }

    /// Team rank of world PE `pe`, if a member.
    pub(crate) fn rank_of_world(&self, pe: Pe) -> Option<i32> {
        let rel = pe - self.start;
        if rel >= 0 && rel % self.stride == 0 && rel / self.stride < self.nranks {
            Some(rel / self.stride)
        } else {
            None
        }
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RtError::Team(format!("team {} is destroyed", self.id)));
        }
        Ok(())
    }
}

pub(crate) struct TeamRegistry {
    pub(crate) used_slots: u64,
    pub(crate) next_id: u64,
}

impl TeamRegistry {
    pub(crate) fn predefined() -> Self {
        Self {
            used_slots: 0b111,
            next_id: 3,
        }
    }
}

/// A handle to a team this PE belongs to. Cheap to clone.
#[derive(Clone)]
pub struct Team {
    pub(crate) rt: Shmem,
    pub(crate) inner: Arc<TeamInner>,
}

impl Team {
    pub(crate) fn from_inner(rt: Shmem, inner: Arc<TeamInner>) -> Self {
        Self { rt, inner }
    }

    /// The calling PE's rank within the team.
    pub fn my_pe(&self) -> i32 {
        self.inner.my_rank
    }

    /// Number of members.
    pub fn n_pes(&self) -> i32 {
        self.inner.nranks
    }

    /// World PE of team rank `rank`.
    pub fn world_pe(&self, rank: i32) -> Result<Pe> {
        if !(0..self.inner.nranks).contains(&rank) {
            return Err(RtError::invalid(format!(
                "rank {rank} out of range [0, {})",
                self.inner.nranks
            )));
        }
        Ok(self.inner.world_pe(rank))
    }

    /// Synchronize the team's members (no remote-completion guarantee; see
    /// [`Shmem::barrier`] for that).
    pub fn sync(&self) -> Result<()> {
        self.rt.sync(self)
    }

    /// The configuration the team was created with.
    pub fn config(&self) -> TeamConfig {
        self.inner.config
    }

    /// The team's current collective algorithm selection.
    pub fn algorithms(&self) -> AlgorithmConfig {
        *self.inner.algorithms.lock().unwrap()
    }

    /// Replace the team's collective algorithm selection. Takes effect for
    /// the next collective; callers on every member should agree.
    pub fn set_algorithms(&self, algorithms: AlgorithmConfig) {
        *self.inner.algorithms.lock().unwrap() = algorithms;
    }

    /// Collective: create the child team of parent ranks `start`,
    /// `start + stride`, … Every parent member calls with identical
    /// arguments; members of the child get `Some`, the rest `None`.
    pub fn split_strided(
        &self,
        start: i32,
        stride: i32,
        size: i32,
        config: &TeamConfig,
    ) -> Result<Option<Team>> {
        let rt = &self.rt;
        rt.inner.check_ready()?;
        self.inner.check_live()?;
        if start < 0 || stride < 1 || size < 1 {
            return Err(RtError::invalid(format!(
                "bad split: start {start}, stride {stride}, size {size}"
            )));
        }
        if start + (size - 1) * stride >= self.inner.nranks {
            return Err(RtError::invalid(format!(
                "split of {} ranks exceeds parent size {}",
                size, self.inner.nranks
            )));
        }
        create_subteam(rt, &self.inner, start, stride, size, config)
    }

    /// Collective: split the team into a row team and a column team of a
    /// `xrange`-wide grid. Returns `(x_team, y_team)`.
    pub fn split_2d(
        &self,
        xrange: i32,
        config_x: &TeamConfig,
        config_y: &TeamConfig,
    ) -> Result<(Option<Team>, Option<Team>)> {
        let rt = &self.rt;
        rt.inner.check_ready()?;
        self.inner.check_live()?;
        if xrange < 1 {
            return Err(RtError::invalid(format!("xrange {xrange} must be >= 1")));
        }
        let n = self.inner.nranks;
        let xr = xrange.min(n);
        let me = self.inner.my_rank;

        let row_start = (me / xr) * xr;
        let row_size = xr.min(n - row_start);
        let x = create_subteam(rt, &self.inner, row_start, 1, row_size, config_x)?;

        let col_start = me % xr;
        let col_size = (n - 1 - col_start) / xr + 1;
        let y = create_subteam(rt, &self.inner, col_start, xr, col_size, config_y)?;

        Ok((x, y))
    }

    /// Collective: destroy the team. The slot returns to the pool; further
    /// use of surviving clones fails.
    pub fn destroy(self) -> Result<()> {
        let rt = &self.rt;
        rt.inner.check_ready()?;
        self.inner.check_live()?;
        if self.inner.predefined {
            return Err(RtError::Team("predefined teams cannot be destroyed".into()));
        }
        collectives::sync_team(&rt.inner, &self.inner)?;
        self.inner.destroyed.store(true, Ordering::Release);
        rt.inner.teams.lock().unwrap().used_slots &= !(1u64 << self.inner.slot);
        tracing::trace!(team = self.inner.id, "team destroyed");
        Ok(())
    }
}

impl Shmem {
    /// The calling PE's rank within `team`.
    pub fn team_my_pe(&self, team: &Team) -> Result<i32> {
        self.inner.check_ready()?;
        team.inner.check_live()?;
        Ok(team.inner.my_rank)
    }

    /// The number of members of `team`.
    pub fn team_n_pes(&self, team: &Team) -> Result<i32> {
        self.inner.check_ready()?;
        team.inner.check_live()?;
        Ok(team.inner.nranks)
    }

    /// Translate `src_pe` (a rank in `src`) into the corresponding rank in
    /// `dst`, or `-1` when the PE is not a member of `dst`.
    pub fn team_translate_pe(&self, src: &Team, src_pe: i32, dst: &Team) -> Result<i32> {
        self.inner.check_ready()?;
        src.inner.check_live()?;
        dst.inner.check_live()?;
        if !(0..src.inner.nranks).contains(&src_pe) {
            return Err(RtError::invalid(format!(
                "rank {src_pe} out of range [0, {})",
                src.inner.nranks
            )));
        }
        let world = src.inner.world_pe(src_pe);
        Ok(dst.inner.rank_of_world(world).unwrap_or(-1))
    }
}

/// The collective heart of team creation: agree on a pool slot across the
/// parent, then members materialize the child.
///
/// Slot agreement rides three words of the parent's REDUCE scratch:
/// word 0 accumulates the AND of every member's free mask (its resting
/// value, `SYNC_VALUE`, is all ones — the AND identity), word 1 counts
/// arrivals, word 2 broadcasts rank 0's choice.
fn create_subteam(
    rt: &Shmem,
    parent: &TeamInner,
    start: i32,
    stride: i32,
    size: i32,
    config: &TeamConfig,
) -> Result<Option<Team>> {
    let inner = &rt.inner;
    collectives::sync_team(inner, parent)?;

    let free_mask = {
        let teams = inner.teams.lock().unwrap();
        let all = if inner.psync.max_slots() == 64 {
            u64::MAX
        } else {
            (1u64 << inner.psync.max_slots()) - 1
        };
        !teams.used_slots & all
    };

    let chosen = if parent.nranks == 1 {
        lowest_bit(free_mask)
    } else {
        let region = inner.psync.reduce(parent.slot);
        let root = parent.world_pe(0);
        collectives::and_word(inner, root, region.word(0), free_mask as i64)?;
        collectives::add_word(inner, root, region.word(1), 1)?;
        if parent.my_rank == 0 {
            collectives::wait_word(inner, region.word(1), |v| {
                v == SYNC_VALUE + parent.nranks as i64
            })?;
            let agreed = collectives::local_word(inner, region.word(0)) as u64;
            collectives::store_local_word(inner, region.word(0), SYNC_VALUE);
            collectives::store_local_word(inner, region.word(1), SYNC_VALUE);
            let encoded = match lowest_bit(agreed) {
                Some(slot) => slot as i64 + 1,
                None => 0,
            };
            for r in 0..parent.nranks {
                collectives::set_word(inner, parent.world_pe(r), region.word(2), encoded)?;
            }
        }
        let encoded = collectives::wait_word(inner, region.word(2), |v| v != SYNC_VALUE)?;
        collectives::store_local_word(inner, region.word(2), SYNC_VALUE);
        if encoded == 0 {
            None
        } else {
            Some((encoded - 1) as usize)
        }
    };

    let Some(slot) = chosen else {
        return Err(RtError::Team("no free team slots in the pSync pool".into()));
    };

    let rel = parent.my_rank - start;
    let member = rel >= 0 && rel % stride == 0 && rel / stride < size;
    if !member {
        return Ok(None);
    }

    let mut teams = inner.teams.lock().unwrap();
    teams.used_slots |= 1u64 << slot;
    let id = teams.next_id;
    teams.next_id += 1;
    drop(teams);

    let child = TeamInner {
        id,
        my_rank: rel / stride,
        nranks: size,
        start: parent.world_pe(start),
        stride: parent.stride * stride,
        slot,
        predefined: false,
        config: *config,
        algorithms: Mutex::new(*parent.algorithms.lock().unwrap()),
        barrier_epoch: AtomicU64::new(0),
        bcast_epoch: AtomicU64::new(0),
        destroyed: AtomicBool::new(false),
    };
    tracing::trace!(team = id, slot, size, "team created");
    Ok(Some(Team::from_inner(rt.clone(), Arc::new(child))))
}

fn lowest_bit(mask: u64) -> Option<usize> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as usize)
    }
}
