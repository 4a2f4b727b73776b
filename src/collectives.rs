//! The collective engine.
//!
//! One submodule per collective family; this module holds what they share:
//! the scratch-word primitives over a team's pSync slot, the dispatch for
//! barrier/sync, and the debug-mode validation of the pSync resting state.
//!
//! Signalling convention: scratch words rest at [`SYNC_VALUE`] and are only
//! ever raised by remote **atomics** (Set/Add/And), which the transport
//! applies remotely before returning — a raised word is a delivered word,
//! no quiet required. Counters count up from `SYNC_VALUE`; one-shot slots
//! are raised to `SYNC_VALUE + 1`. Whoever owns a word resets it before
//! leaving the collective, and the next collective's entry synchronization
//! keeps peers from raising it again any earlier.
//!
//! Barrier and broadcast run out of two parity banks selected by a per-team
//! epoch, so even their own back-to-back calls cannot race a straggler's
//! final signal.

pub(crate) mod alltoall;
pub(crate) mod barrier;
pub(crate) mod broadcast;
pub(crate) mod collect;
pub(crate) mod reduce;

use crate::SYNC_VALUE;
use crate::config::BarrierAlg;
use crate::context::DEFAULT_CTX;
use crate::error::{Result, RtError};
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::sync;
use crate::team::{Region, Team, TeamInner};
use crate::transport::{AmoOp, AmoWidth, Pe};
use std::sync::atomic::{AtomicI64, Ordering};

/// Remotely store `v` into the scratch word at heap offset `off` on `pe`.
pub(crate) fn set_word(rt: &RtInner, pe: Pe, off: usize, v: i64) -> Result<()> {
    rt.transport
        .amo(DEFAULT_CTX, pe, off, AmoOp::Set, AmoWidth::W64, v as u64, 0)?;
    Ok(())
}

/// Remotely add `delta` to the scratch word at heap offset `off` on `pe`.
pub(crate) fn add_word(rt: &RtInner, pe: Pe, off: usize, delta: i64) -> Result<()> {
    rt.transport.amo(
        DEFAULT_CTX,
        pe,
        off,
        AmoOp::Add,
        AmoWidth::W64,
        delta as u64,
        0,
    )?;
    Ok(())
}

/// Remotely AND `mask` into the scratch word at heap offset `off` on `pe`.
pub(crate) fn and_word(rt: &RtInner, pe: Pe, off: usize, mask: i64) -> Result<()> {
    rt.transport.amo(
        DEFAULT_CTX,
        pe,
        off,
        AmoOp::And,
        AmoWidth::W64,
        mask as u64,
        0,
    )?;
    Ok(())
}

/// Acquire-load the local scratch word at heap offset `off`.
pub(crate) fn local_word(rt: &RtInner, off: usize) -> i64 {
    unsafe { (*(rt.extent.addr_at(off) as *const AtomicI64)).load(Ordering::Acquire) }
}

/// Release-store the local scratch word at heap offset `off`.
pub(crate) fn store_local_word(rt: &RtInner, off: usize, v: i64) {
    unsafe { (*(rt.extent.addr_at(off) as *const AtomicI64)).store(v, Ordering::Release) }
}

/// Poll the local scratch word at `off` until `pred` holds; returns the
/// observed value.
pub(crate) fn wait_word(rt: &RtInner, off: usize, pred: impl Fn(i64) -> bool) -> Result<i64> {
    sync::poll_until(rt, || {
        let v = local_word(rt, off);
        Ok(pred(v).then_some(v))
    })
}

/// A raw view of local heap bytes, for feeding the transport.
///
/// The aliasing discipline is the collective protocols': a region handed to
/// a put is not concurrently written locally.
pub(crate) fn local_bytes(rt: &RtInner, off: usize, len: usize) -> &[u8] {
    unsafe { std::slice::from_raw_parts(rt.extent.addr_at(off) as *const u8, len) }
}

/// Debug-mode validation: a region must be at its resting state on entry.
/// A word that is not means some previous collective leaked state — a bug
/// worth failing loudly for.
pub(crate) fn check_resting(rt: &RtInner, region: &Region, family: &str) {
    if !rt.config.debug_checks {
        return;
    }
    for i in 0..region.words {
        let v = local_word(rt, region.word(i));
        assert!(
            v == SYNC_VALUE,
            "pSync poisoned: {family} word {i} holds {v}, expected SYNC_VALUE"
        );
    }
}

/// Team-internal synchronization: members arrive, members leave, local
/// loads/stores on each member are ordered across it.
pub(crate) fn sync_team(rt: &RtInner, team: &TeamInner) -> Result<()> {
    team.check_live()?;
    rt.stats.bump(Op::Collective);
    if team.nranks <= 1 {
        return Ok(());
    }
    let alg = {
        let a = team.algorithms.lock().unwrap();
        (a.barrier, a.tree_degree)
    };
    let epoch = team.barrier_epoch.fetch_add(1, Ordering::AcqRel);
    let region = rt.psync.barrier(team.slot, (epoch & 1) as usize);
    check_resting(rt, &region, "barrier");
    match alg.0 {
        BarrierAlg::Linear => barrier::linear(rt, team, &region),
        BarrierAlg::CompleteTree => barrier::complete_tree(rt, team, &region, alg.1),
        BarrierAlg::BinomialTree => barrier::knomial_tree(rt, team, &region, 2),
        BarrierAlg::KnomialTree => barrier::knomial_tree(rt, team, &region, alg.1),
        BarrierAlg::Dissemination => barrier::dissemination(rt, team, &region),
    }
}

/// [`sync_team`] plus remote completion of the caller's outstanding
/// operations on the default context.
pub(crate) fn barrier_team(rt: &RtInner, team: &TeamInner) -> Result<()> {
    rt.transport.quiet(DEFAULT_CTX)?;
    sync_team(rt, team)
}

impl Shmem {
    /// Synchronize `team`: every member has entered before any member
    /// leaves. Orders local memory, not outstanding RMA; see
    /// [`Shmem::barrier`].
    pub fn sync(&self, team: &Team) -> Result<()> {
        self.inner.check_ready()?;
        sync_team(&self.inner, &team.inner)
    }

    /// [`Shmem::sync`] over the world team.
    pub fn sync_all(&self) -> Result<()> {
        self.inner.check_ready()?;
        sync_team(&self.inner, &self.inner.world)
    }

    /// Synchronize `team` and complete all of the caller's outstanding
    /// communication first: after the barrier, every member's prior puts
    /// and AMOs are remotely visible.
    pub fn barrier(&self, team: &Team) -> Result<()> {
        self.inner.check_ready()?;
        barrier_team(&self.inner, &team.inner)
    }

    /// [`Shmem::barrier`] over the world team.
    pub fn barrier_all(&self) -> Result<()> {
        self.inner.check_ready()?;
        barrier_team(&self.inner, &self.inner.world)
    }
}

/// Reject algorithms whose peer schedule needs a power-of-two team.
pub(crate) fn require_power_of_two(team: &TeamInner, what: &str) -> Result<()> {
    let n = team.nranks as usize;
    if !n.is_power_of_two() {
        return Err(RtError::invalid(format!(
            "{what} requires a power-of-two team, got {n} ranks"
        )));
    }
    Ok(())
}

/// Reject algorithms whose pairing needs an even team.
pub(crate) fn require_even(team: &TeamInner, what: &str) -> Result<()> {
    if team.nranks % 2 != 0 {
        return Err(RtError::invalid(format!(
            "{what} requires an even team, got {} ranks",
            team.nranks
        )));
    }
    Ok(())
}
