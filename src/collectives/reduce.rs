//! Reductions.
//!
//! `<op>_reduce` folds `nreduce` elements from every member's `src` into
//! every member's `dest`, element-wise, with one of the operators from
//! [`crate::elem`]. Large vectors stream through the team's bounce buffer
//! (`pwrk`, two halves of `reduce_chunk` bytes each) in a double-buffered
//! chunk protocol: the sender may run one chunk ahead of the receiver's
//! acknowledgements, never two.
//!
//! Scratch usage (REDUCE region): the tree algorithm uses words 0..3
//! (go / ack / data); recursive doubling uses a pair of words per round
//! (ready+ack / data). All monotonic values count up from `SYNC_VALUE` and
//! every word is reset before the collective returns.
//!
//! Floating-point note: the combining order depends on the algorithm, so
//! run-to-run results may differ by rounding, as reductions over
//! non-associative types always do.

use super::{check_resting, set_word, store_local_word, sync_team, wait_word};
use crate::SYNC_VALUE;
use crate::collectives::barrier::knomial_shape;
use crate::collectives::broadcast::bcast_impl;
use crate::config::ReduceAlg;
use crate::context::DEFAULT_CTX;
use crate::elem::{self, And, Element, Max, Min, Or, Prod, ReduceFn, Sum, Xor};
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::team::{Region, Team, TeamInner};
use crate::transport::SignalOp;

const GO: usize = 0;
const ACK: usize = 1;
const DATA: usize = 2;

macro_rules! reduce_entry {
    ($($name:ident => $op:ident, $doc:literal);* $(;)?) => {
        $(
            #[doc = $doc]
            pub fn $name<T: Element>(
                &self,
                team: &Team,
                dest: SymPtr<T>,
                src: SymPtr<T>,
                nreduce: usize,
            ) -> Result<()>
            where
                $op<T>: ReduceFn<T>,
            {
                self.reduce_with(team, &$op::new(), dest, src, nreduce)
            }
        )*
    };
}

impl Shmem {
    reduce_entry!(
        sum_reduce => Sum, "Collective element-wise sum across the team.";
        prod_reduce => Prod, "Collective element-wise product across the team.";
        min_reduce => Min, "Collective element-wise minimum across the team.";
        max_reduce => Max, "Collective element-wise maximum across the team.";
        and_reduce => And, "Collective element-wise bitwise AND across the team.";
        or_reduce => Or, "Collective element-wise bitwise OR across the team.";
        xor_reduce => Xor, "Collective element-wise bitwise XOR across the team.";
    );

    /// Collective reduction with a caller-supplied operator.
    pub fn reduce_with<T: Element, R: ReduceFn<T>>(
        &self,
        team: &Team,
        op: &R,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        nreduce: usize,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        team.inner.check_live()?;
        let dest_off = rt.sym_offset(dest, nreduce)?;
        let src_off = rt.sym_offset(src, nreduce)?;
        reduce_impl(rt, &team.inner, op, dest_off, src_off, nreduce)
    }
}

fn reduce_impl<T: Element, R: ReduceFn<T>>(
    rt: &RtInner,
    team: &TeamInner,
    op: &R,
    dest_off: usize,
    src_off: usize,
    nreduce: usize,
) -> Result<()> {
    rt.stats.bump(Op::Collective);

    if team.nranks == 1 {
        if dest_off != src_off && nreduce > 0 {
            unsafe {
                std::ptr::copy(
                    rt.extent.addr_at(src_off) as *const T,
                    rt.extent.addr_at(dest_off) as *mut T,
                    nreduce,
                )
            }
        }
        return Ok(());
    }

    let (alg, degree) = {
        let a = team.algorithms.lock().unwrap();
        (a.reduce, a.tree_degree)
    };
    if alg == ReduceAlg::RecursiveDoubling {
        super::require_power_of_two(team, "reduce/recursive-doubling")?;
    }
    let (_, pwrk_len) = rt.psync.pwrk(team.slot);
    let chunk_elems = (pwrk_len / 2) / std::mem::size_of::<T>();
    if chunk_elems == 0 {
        return Err(RtError::invalid(format!(
            "element of {} bytes exceeds the reduction chunk",
            std::mem::size_of::<T>()
        )));
    }

    sync_team(rt, team)?;
    if nreduce == 0 {
        return Ok(());
    }
    let region = rt.psync.reduce(team.slot);
    check_resting(rt, &region, "reduce");

    match alg {
        ReduceAlg::Linear => linear(rt, team, op, dest_off, src_off, nreduce),
        ReduceAlg::TreeBroadcast => tree_broadcast(
            rt,
            team,
            op,
            &region,
            dest_off,
            src_off,
            nreduce,
            chunk_elems,
            degree.max(2),
        ),
        ReduceAlg::RecursiveDoubling => recursive_doubling(
            rt,
            team,
            op,
            &region,
            dest_off,
            src_off,
            nreduce,
            chunk_elems,
        ),
    }
}

fn read_local<T: Element>(rt: &RtInner, off: usize, n: usize) -> Vec<T> {
    let mut out = vec![T::default(); n];
    unsafe {
        std::ptr::copy_nonoverlapping(rt.extent.addr_at(off) as *const T, out.as_mut_ptr(), n)
    }
    out
}

fn write_local<T: Element>(rt: &RtInner, off: usize, vals: &[T]) {
    unsafe {
        std::ptr::copy_nonoverlapping(
            vals.as_ptr(),
            rt.extent.addr_at(off) as *mut T,
            vals.len(),
        )
    }
}

/// Rank 0 pulls every contribution, folds, and broadcasts the result.
fn linear<T: Element, R: ReduceFn<T>>(
    rt: &RtInner,
    team: &TeamInner,
    op: &R,
    dest_off: usize,
    src_off: usize,
    nreduce: usize,
) -> Result<()> {
    if team.my_rank == 0 {
        let mut acc: Vec<T> = read_local(rt, src_off, nreduce);
        let mut tmp = vec![T::default(); nreduce];
        for rank in 1..team.nranks {
            rt.transport.get(
                DEFAULT_CTX,
                team.world_pe(rank),
                src_off,
                elem::as_bytes_mut(&mut tmp),
            )?;
            elem::fold_slices(op, &mut acc, &tmp);
        }
        write_local(rt, dest_off, &acc);
    }
    bcast_impl(
        rt,
        team,
        dest_off,
        dest_off,
        nreduce * std::mem::size_of::<T>(),
        0,
    )
}

/// K-nomial reduce tree into rank 0, then a broadcast of the result.
#[allow(clippy::too_many_arguments)]
fn tree_broadcast<T: Element, R: ReduceFn<T>>(
    rt: &RtInner,
    team: &TeamInner,
    op: &R,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nreduce: usize,
    chunk_elems: usize,
    radix: usize,
) -> Result<()> {
    let (parent, children) = knomial_shape(team.my_rank, team.nranks, radix as i32);
    let (pwrk_off, pwrk_len) = rt.psync.pwrk(team.slot);
    let half = pwrk_len / 2;
    let nchunks = nreduce.div_ceil(chunk_elems);
    let chunk_span = |c: usize| -> (usize, usize) {
        let lo = c * chunk_elems;
        (lo, (nreduce - lo).min(chunk_elems))
    };

    let mut acc: Vec<T> = read_local(rt, src_off, nreduce);

    // Drain each child in turn through my bounce buffer.
    for &child in &children {
        let child_pe = team.world_pe(child);
        set_word(rt, child_pe, r.word(GO), SYNC_VALUE + 1)?;
        for c in 0..nchunks {
            wait_word(rt, r.word(DATA), |v| v >= SYNC_VALUE + 1 + c as i64)?;
            let (lo, len) = chunk_span(c);
            let chunk = unsafe {
                std::slice::from_raw_parts(
                    rt.extent.addr_at(pwrk_off + (c % 2) * half) as *const T,
                    len,
                )
            };
            elem::fold_slices(op, &mut acc[lo..lo + len], chunk);
            set_word(rt, child_pe, r.word(ACK), SYNC_VALUE + 1 + c as i64)?;
        }
        store_local_word(rt, r.word(DATA), SYNC_VALUE);
    }

    if let Some(p) = parent {
        let parent_pe = team.world_pe(p);
        wait_word(rt, r.word(GO), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(GO), SYNC_VALUE);
        for c in 0..nchunks {
            if c >= 2 {
                wait_word(rt, r.word(ACK), |v| v >= SYNC_VALUE + 1 + (c - 2) as i64)?;
            }
            let (lo, len) = chunk_span(c);
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    acc[lo..].as_ptr().cast::<u8>(),
                    len * std::mem::size_of::<T>(),
                )
            };
            rt.transport.put_signal(
                DEFAULT_CTX,
                parent_pe,
                pwrk_off + (c % 2) * half,
                bytes,
                r.word(DATA),
                (SYNC_VALUE + 1 + c as i64) as u64,
                SignalOp::Set,
            )?;
        }
        wait_word(rt, r.word(ACK), |v| v >= SYNC_VALUE + nchunks as i64)?;
        store_local_word(rt, r.word(ACK), SYNC_VALUE);
    } else {
        write_local(rt, dest_off, &acc);
    }

    bcast_impl(
        rt,
        team,
        dest_off,
        dest_off,
        nreduce * std::mem::size_of::<T>(),
        0,
    )
}

/// XOR-partner all-reduce: every round exchanges and folds full vectors, so
/// no broadcast is needed afterwards. Power-of-two teams only.
#[allow(clippy::too_many_arguments)]
fn recursive_doubling<T: Element, R: ReduceFn<T>>(
    rt: &RtInner,
    team: &TeamInner,
    op: &R,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nreduce: usize,
    chunk_elems: usize,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    let (pwrk_off, pwrk_len) = rt.psync.pwrk(team.slot);
    let half = pwrk_len / 2;
    let nchunks = nreduce.div_ceil(chunk_elems);
    let chunk_span = |c: usize| -> (usize, usize) {
        let lo = c * chunk_elems;
        (lo, (nreduce - lo).min(chunk_elems))
    };

    let mut acc: Vec<T> = read_local(rt, src_off, nreduce);
    let mut dist = 1usize;
    let mut round = 0usize;
    while dist < n {
        let partner_pe = team.world_pe((me ^ dist) as i32);
        let ready_ack = r.word(2 * round);
        let data = r.word(2 * round + 1);

        // Announce this round; the partner's bounce buffer is free once it
        // has done the same.
        set_word(rt, partner_pe, ready_ack, SYNC_VALUE + 1)?;
        wait_word(rt, ready_ack, |v| v >= SYNC_VALUE + 1)?;

        for c in 0..nchunks {
            if c >= 2 {
                wait_word(rt, ready_ack, |v| v >= SYNC_VALUE + 2 + (c - 2) as i64)?;
            }
            let (lo, len) = chunk_span(c);
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    acc[lo..].as_ptr().cast::<u8>(),
                    len * std::mem::size_of::<T>(),
                )
            };
            rt.transport.put_signal(
                DEFAULT_CTX,
                partner_pe,
                pwrk_off + (c % 2) * half,
                bytes,
                data,
                (SYNC_VALUE + 1 + c as i64) as u64,
                SignalOp::Set,
            )?;

            wait_word(rt, data, |v| v >= SYNC_VALUE + 1 + c as i64)?;
            let chunk = unsafe {
                std::slice::from_raw_parts(
                    rt.extent.addr_at(pwrk_off + (c % 2) * half) as *const T,
                    len,
                )
            };
            elem::fold_slices(op, &mut acc[lo..lo + len], chunk);
            set_word(rt, partner_pe, ready_ack, SYNC_VALUE + 2 + c as i64)?;
        }

        wait_word(rt, ready_ack, |v| v >= SYNC_VALUE + 1 + nchunks as i64)?;
        store_local_word(rt, ready_ack, SYNC_VALUE);
        store_local_word(rt, data, SYNC_VALUE);
        dist <<= 1;
        round += 1;
    }

    write_local(rt, dest_off, &acc);
    Ok(())
}
