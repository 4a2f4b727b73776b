//! Broadcast algorithms.
//!
//! One parity bank of the team's BCAST region per call: word 0 collects
//! arrivals (so a fast root cannot overwrite a destination buffer a slow
//! member is still reading from the previous call), word 1 is the data
//! signal, word 2 is the ring counter of the scatter-collect variant.
//!
//! Trees are laid out over virtual ranks with the root shifted to 0, so any
//! member may be the root without reshaping the tree.

use super::{add_word, check_resting, local_bytes, set_word, store_local_word, sync_team, wait_word};
use crate::SYNC_VALUE;
use crate::collectives::barrier::knomial_shape;
use crate::config::BcastAlg;
use crate::context::DEFAULT_CTX;
use crate::elem::Element;
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::team::{Region, Team, TeamInner};
use crate::transport::SignalOp;
use std::sync::atomic::Ordering;

const ARRIVE: usize = 0;
const DATA: usize = 1;
const RING: usize = 2;

impl Shmem {
    /// Collective: copy `nelems` elements from `src` on the team's `root`
    /// rank into `dest` on every member, root included.
    pub fn broadcast<T: Element>(
        &self,
        team: &Team,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        nelems: usize,
        root: i32,
    ) -> Result<()> {
        self.broadcastmem(
            team,
            dest.cast(),
            src.cast(),
            nelems * std::mem::size_of::<T>(),
            root,
        )
    }

    /// Byte-granular [`Shmem::broadcast`].
    pub fn broadcastmem(
        &self,
        team: &Team,
        dest: SymPtr<u8>,
        src: SymPtr<u8>,
        nbytes: usize,
        root: i32,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        team.inner.check_live()?;
        if !(0..team.inner.nranks).contains(&root) {
            return Err(RtError::invalid(format!(
                "root {root} out of range [0, {})",
                team.inner.nranks
            )));
        }
        let dest_off = rt.sym_offset(dest, nbytes)?;
        let src_off = if team.inner.my_rank == root {
            rt.sym_offset(src, nbytes)?
        } else {
            // Non-roots never read src, but it must still be a valid
            // symmetric address for the call to have been collective.
            rt.sym_offset(src, 0)?
        };
        bcast_impl(rt, &team.inner, dest_off, src_off, nbytes, root)
    }
}

/// Offset-level broadcast, shared with the reduction engine's final phase.
pub(crate) fn bcast_impl(
    rt: &RtInner,
    team: &TeamInner,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
    root: i32,
) -> Result<()> {
    rt.stats.bump(Op::Collective);
    if team.nranks <= 1 {
        copy_local(rt, dest_off, src_off, nbytes);
        return Ok(());
    }

    let (alg, degree) = {
        let a = team.algorithms.lock().unwrap();
        (a.broadcast, a.tree_degree)
    };
    let epoch = team.bcast_epoch.fetch_add(1, Ordering::AcqRel);
    let region = rt.psync.bcast(team.slot, (epoch & 1) as usize);
    check_resting(rt, &region, "broadcast");

    match alg {
        BcastAlg::Linear => linear(rt, team, &region, dest_off, src_off, nbytes, root),
        BcastAlg::CompleteTree => {
            let shape = |vrank: i32| complete_shape(vrank, team.nranks, degree as i32);
            tree(rt, team, &region, dest_off, src_off, nbytes, root, shape, false)
        }
        BcastAlg::BinomialTree => {
            let shape = |vrank: i32| knomial_shape(vrank, team.nranks, 2);
            tree(rt, team, &region, dest_off, src_off, nbytes, root, shape, false)
        }
        BcastAlg::KnomialTree => {
            let shape = |vrank: i32| knomial_shape(vrank, team.nranks, degree.max(2) as i32);
            tree(rt, team, &region, dest_off, src_off, nbytes, root, shape, false)
        }
        BcastAlg::KnomialSignal => {
            let shape = |vrank: i32| knomial_shape(vrank, team.nranks, degree.max(2) as i32);
            tree(rt, team, &region, dest_off, src_off, nbytes, root, shape, true)
        }
        BcastAlg::ScatterCollect => {
            scatter_collect(rt, team, &region, dest_off, src_off, nbytes, root)
        }
    }
}

fn copy_local(rt: &RtInner, dest_off: usize, src_off: usize, nbytes: usize) {
    if dest_off != src_off && nbytes > 0 {
        let src = rt.extent.addr_at(src_off) as *const u8;
        let dst = rt.extent.addr_at(dest_off) as *mut u8;
        unsafe { std::ptr::copy(src, dst, nbytes) }
    }
}

/// Root waits for all arrivals, then puts payload + signal to every member.
fn linear(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
    root: i32,
) -> Result<()> {
    let n = team.nranks;
    if team.my_rank == root {
        wait_word(rt, r.word(ARRIVE), |v| v == SYNC_VALUE + (n - 1) as i64)?;
        store_local_word(rt, r.word(ARRIVE), SYNC_VALUE);
        let payload = local_bytes(rt, src_off, nbytes);
        for rank in 0..n {
            if rank == root {
                continue;
            }
            rt.transport.put_signal(
                DEFAULT_CTX,
                team.world_pe(rank),
                dest_off,
                payload,
                r.word(DATA),
                (SYNC_VALUE + 1) as u64,
                SignalOp::Set,
            )?;
        }
        copy_local(rt, dest_off, src_off, nbytes);
    } else {
        add_word(rt, team.world_pe(root), r.word(ARRIVE), 1)?;
        wait_word(rt, r.word(DATA), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(DATA), SYNC_VALUE);
    }
    Ok(())
}

/// Children of `vrank` in a complete tree of the given degree.
fn complete_shape(vrank: i32, n: i32, degree: i32) -> (Option<i32>, Vec<i32>) {
    let d = degree.max(2);
    let first = vrank * d + 1;
    let children = (first..(first + d).min(n)).collect();
    let parent = (vrank > 0).then(|| (vrank - 1) / d);
    (parent, children)
}

/// Top-down tree propagation. `signal_merged` folds the data put and the
/// release into one signalled put; otherwise the put, a fence and the
/// release word are issued separately.
#[allow(clippy::too_many_arguments)]
fn tree(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
    root: i32,
    shape: impl Fn(i32) -> (Option<i32>, Vec<i32>),
    signal_merged: bool,
) -> Result<()> {
    let n = team.nranks;
    let me = team.my_rank;
    let vrank = (me - root + n) % n;
    let actual = |v: i32| team.world_pe((v + root) % n);
    let (parent, children) = shape(vrank);

    // Arrival sweeps leaf-to-root so no one sends into a buffer whose owner
    // has not entered the collective yet.
    if !children.is_empty() {
        wait_word(rt, r.word(ARRIVE), |v| v == SYNC_VALUE + children.len() as i64)?;
        store_local_word(rt, r.word(ARRIVE), SYNC_VALUE);
    }
    if let Some(p) = parent {
        add_word(rt, actual(p), r.word(ARRIVE), 1)?;
        wait_word(rt, r.word(DATA), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(DATA), SYNC_VALUE);
    } else {
        copy_local(rt, dest_off, src_off, nbytes);
    }

    // From here my dest holds the payload; forward it downward.
    for &c in &children {
        let pe = actual(c);
        let payload = local_bytes(rt, dest_off, nbytes);
        if signal_merged {
            rt.transport.put_signal(
                DEFAULT_CTX,
                pe,
                dest_off,
                payload,
                r.word(DATA),
                (SYNC_VALUE + 1) as u64,
                SignalOp::Set,
            )?;
        } else {
            rt.transport.put(DEFAULT_CTX, pe, dest_off, payload)?;
            rt.transport.fence(DEFAULT_CTX)?;
            set_word(rt, pe, r.word(DATA), SYNC_VALUE + 1)?;
        }
    }
    Ok(())
}

/// Root scatters N pieces, then a ring all-gather completes every member.
/// Worth its extra latency only for large payloads.
fn scatter_collect(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
    root: i32,
) -> Result<()> {
    let n = team.nranks as usize;
    sync_team(rt, team)?;

    let base = nbytes / n;
    let rem = nbytes % n;
    let piece_off = |rank: usize| rank * base + rank.min(rem);
    let piece_len = |rank: usize| base + usize::from(rank < rem);

    if team.my_rank == root {
        for rank in 0..n {
            if rank as i32 == root {
                continue;
            }
            let payload = local_bytes(rt, src_off + piece_off(rank), piece_len(rank));
            rt.transport.put_signal(
                DEFAULT_CTX,
                team.world_pe(rank as i32),
                dest_off + piece_off(rank),
                payload,
                r.word(DATA),
                (SYNC_VALUE + 1) as u64,
                SignalOp::Set,
            )?;
        }
        copy_local(rt, dest_off, src_off, nbytes);
    } else {
        wait_word(rt, r.word(DATA), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(DATA), SYNC_VALUE);
    }

    // Ring all-gather of the pieces. The root already holds everything but
    // keeps the ring uniform; rewrites carry identical bytes.
    let me = team.my_rank as usize;
    let right = team.world_pe(((me + 1) % n) as i32);
    for round in 0..n - 1 {
        let send = (me + n - round) % n;
        let payload = local_bytes(rt, dest_off + piece_off(send), piece_len(send));
        rt.transport
            .put(DEFAULT_CTX, right, dest_off + piece_off(send), payload)?;
        rt.transport.fence(DEFAULT_CTX)?;
        add_word(rt, right, r.word(RING), 1)?;
        wait_word(rt, r.word(RING), |v| v >= SYNC_VALUE + (round + 1) as i64)?;
    }
    store_local_word(rt, r.word(RING), SYNC_VALUE);
    Ok(())
}
