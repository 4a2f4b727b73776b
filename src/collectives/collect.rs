//! Collect and fcollect: all-gather in ascending team-rank order.
//!
//! `fcollect` takes a fixed contribution per PE; `collect` lets every PE
//! contribute a different amount and therefore runs a size-exchange phase
//! first. Both families share the team's COLLECT scratch region: word 0 is
//! the arrival/round counter, word 1 is spare, words `2..2+N` carry either
//! per-round signals or the exchanged sizes.
//!
//! Every algorithm begins with a team sync: it protects the destination
//! buffers (no peer writes into a buffer whose owner is still in the
//! previous collective) and makes the single-bank scratch reuse safe.

use super::{
    add_word, check_resting, local_bytes, require_even, require_power_of_two, set_word,
    store_local_word, sync_team, wait_word,
};
use crate::SYNC_VALUE;
use crate::collectives::barrier_team;
use crate::config::{CollectAlg, FcollectAlg};
use crate::context::DEFAULT_CTX;
use crate::elem::Element;
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::team::{Region, Team, TeamInner};
use crate::transport::SignalOp;

const COUNTER: usize = 0;
const SIZES: usize = 2;

/// Per-round signal words live after the counter pair.
fn round_word(r: &Region, round: usize) -> usize {
    r.word(SIZES + round)
}

impl Shmem {
    /// Collective: concatenate `nelems` elements from every member's `src`
    /// into every member's `dest`, in ascending team-rank order.
    pub fn fcollect<T: Element>(
        &self,
        team: &Team,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        nelems: usize,
    ) -> Result<()> {
        self.fcollectmem(
            team,
            dest.cast(),
            src.cast(),
            nelems * std::mem::size_of::<T>(),
        )
    }

    /// Byte-granular [`Shmem::fcollect`].
    pub fn fcollectmem(
        &self,
        team: &Team,
        dest: SymPtr<u8>,
        src: SymPtr<u8>,
        nbytes: usize,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        team.inner.check_live()?;
        let n = team.inner.nranks as usize;
        let dest_off = rt.sym_offset(dest, n * nbytes)?;
        let src_off = rt.sym_offset(src, nbytes)?;
        fcollect_impl(rt, &team.inner, dest_off, src_off, nbytes)
    }

    /// Collective: concatenate a **variable** contribution from every member
    /// into every member's `dest`. `dest` must hold the sum of all
    /// contributions; a size-exchange round precedes the data movement.
    pub fn collect<T: Element>(
        &self,
        team: &Team,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        nelems: usize,
    ) -> Result<()> {
        self.collectmem(
            team,
            dest.cast(),
            src.cast(),
            nelems * std::mem::size_of::<T>(),
        )
    }

    /// Byte-granular [`Shmem::collect`].
    pub fn collectmem(
        &self,
        team: &Team,
        dest: SymPtr<u8>,
        src: SymPtr<u8>,
        nbytes: usize,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        team.inner.check_live()?;
        let src_off = rt.sym_offset(src, nbytes)?;
        // The destination extent is only known after the size exchange;
        // validate the base address here and the full span then.
        let dest_off = rt.sym_offset(dest, 0)?;
        collect_impl(rt, &team.inner, dest, dest_off, src_off, nbytes)
    }
}

pub(crate) fn fcollect_impl(
    rt: &RtInner,
    team: &TeamInner,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    rt.stats.bump(Op::Collective);
    if team.nranks == 1 {
        copy_block(rt, dest_off, src_off, nbytes);
        return Ok(());
    }

    let alg = team.algorithms.lock().unwrap().fcollect;
    match alg {
        FcollectAlg::RecursiveDoubling => require_power_of_two(team, "fcollect/recursive-doubling")?,
        FcollectAlg::NeighborExchange => require_even(team, "fcollect/neighbour-exchange")?,
        _ => {}
    }

    sync_team(rt, team)?;
    if nbytes == 0 {
        return Ok(());
    }
    let region = rt.psync.collect(team.slot);
    check_resting(rt, &region, "fcollect");

    match alg {
        FcollectAlg::Linear => linear(rt, team, &region, dest_off, src_off, nbytes),
        FcollectAlg::AllLinear => all_linear(rt, team, dest_off, src_off, nbytes),
        FcollectAlg::Ring => ring(rt, team, &region, dest_off, src_off, nbytes),
        FcollectAlg::RecursiveDoubling => {
            recursive_doubling(rt, team, &region, dest_off, src_off, nbytes)
        }
        FcollectAlg::Bruck => bruck(rt, team, &region, dest_off, src_off, nbytes, true),
        FcollectAlg::BruckNoRotate => bruck(rt, team, &region, dest_off, src_off, nbytes, false),
        FcollectAlg::NeighborExchange => {
            neighbor_exchange(rt, team, &region, dest_off, src_off, nbytes)
        }
    }
}

fn copy_block(rt: &RtInner, dest_off: usize, src_off: usize, nbytes: usize) {
    if nbytes > 0 && dest_off != src_off {
        unsafe {
            std::ptr::copy(
                rt.extent.addr_at(src_off) as *const u8,
                rt.extent.addr_at(dest_off) as *mut u8,
                nbytes,
            )
        }
    }
}

/// Everyone puts its block to everyone; arrival counters complete.
fn linear(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    let n = team.nranks;
    let me = team.my_rank;
    copy_block(rt, dest_off + me as usize * nbytes, src_off, nbytes);
    let payload = local_bytes(rt, src_off, nbytes);
    for rank in 0..n {
        if rank == me {
            continue;
        }
        let pe = team.world_pe(rank);
        rt.transport
            .put(DEFAULT_CTX, pe, dest_off + me as usize * nbytes, payload)?;
        rt.transport.fence(DEFAULT_CTX)?;
        add_word(rt, pe, r.word(COUNTER), 1)?;
    }
    wait_word(rt, r.word(COUNTER), |v| v == SYNC_VALUE + (n - 1) as i64)?;
    store_local_word(rt, r.word(COUNTER), SYNC_VALUE);
    Ok(())
}

/// Everyone puts its block to everyone; a trailing barrier completes.
fn all_linear(
    rt: &RtInner,
    team: &TeamInner,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    let n = team.nranks;
    let me = team.my_rank;
    copy_block(rt, dest_off + me as usize * nbytes, src_off, nbytes);
    let payload = local_bytes(rt, src_off, nbytes);
    for rank in 0..n {
        if rank == me {
            continue;
        }
        rt.transport.put(
            DEFAULT_CTX,
            team.world_pe(rank),
            dest_off + me as usize * nbytes,
            payload,
        )?;
    }
    barrier_team(rt, team)
}

/// N-1 pass-along rounds over the ring; a single monotonic counter tracks
/// progress.
fn ring(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    let right = team.world_pe(((me + 1) % n) as i32);
    copy_block(rt, dest_off + me * nbytes, src_off, nbytes);
    for round in 0..n - 1 {
        let block = (me + n - round) % n;
        let payload = local_bytes(rt, dest_off + block * nbytes, nbytes);
        rt.transport
            .put(DEFAULT_CTX, right, dest_off + block * nbytes, payload)?;
        rt.transport.fence(DEFAULT_CTX)?;
        add_word(rt, right, r.word(COUNTER), 1)?;
        wait_word(rt, r.word(COUNTER), |v| v >= SYNC_VALUE + (round + 1) as i64)?;
    }
    store_local_word(rt, r.word(COUNTER), SYNC_VALUE);
    Ok(())
}

/// Round k swaps the accumulated half with the partner at distance 2^k.
/// Power-of-two teams only.
fn recursive_doubling(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    copy_block(rt, dest_off + me * nbytes, src_off, nbytes);
    let mut dist = 1usize;
    let mut round = 0usize;
    while dist < n {
        let partner = me ^ dist;
        // My accumulated run before round k covers the 2^k blocks aligned
        // at me with the low k bits cleared.
        let base = me & !(dist - 1);
        let payload = local_bytes(rt, dest_off + base * nbytes, dist * nbytes);
        rt.transport.put_signal(
            DEFAULT_CTX,
            team.world_pe(partner as i32),
            dest_off + base * nbytes,
            payload,
            round_word(r, round),
            (SYNC_VALUE + 1) as u64,
            SignalOp::Set,
        )?;
        wait_word(rt, round_word(r, round), |v| v != SYNC_VALUE)?;
        store_local_word(rt, round_word(r, round), SYNC_VALUE);
        dist <<= 1;
        round += 1;
    }
    Ok(())
}

/// Doubling-distance shifts; a final rotation restores rank order unless
/// the caller opted out.
fn bruck(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
    rotate: bool,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    copy_block(rt, dest_off, src_off, nbytes);
    let mut dist = 1usize;
    let mut round = 0usize;
    while dist < n {
        let count = dist.min(n - dist);
        let target = team.world_pe(((me + n - dist) % n) as i32);
        let payload = local_bytes(rt, dest_off, count * nbytes);
        rt.transport.put_signal(
            DEFAULT_CTX,
            target,
            dest_off + dist * nbytes,
            payload,
            round_word(r, round),
            (SYNC_VALUE + 1) as u64,
            SignalOp::Set,
        )?;
        wait_word(rt, round_word(r, round), |v| v != SYNC_VALUE)?;
        store_local_word(rt, round_word(r, round), SYNC_VALUE);
        dist <<= 1;
        round += 1;
    }
    if rotate && me > 0 {
        // Position i holds block (me + i) mod n; rotate right by me to get
        // canonical rank order.
        let all = unsafe {
            std::slice::from_raw_parts_mut(rt.extent.addr_at(dest_off) as *mut u8, n * nbytes)
        };
        all.rotate_right(me * nbytes);
    }
    Ok(())
}

/// Pairs exchange their freshest blocks, alternating pairing each round.
/// Even teams only.
fn neighbor_exchange(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    let base = me & !1;
    copy_block(rt, dest_off + me * nbytes, src_off, nbytes);

    // Circular run of `count` blocks starting at `lo`, as at most two
    // contiguous puts, the last one carrying the round signal.
    let send_run = |lo: usize, count: usize, pe, round: usize| -> Result<()> {
        let first = count.min(n - lo);
        let head = local_bytes(rt, dest_off + lo * nbytes, first * nbytes);
        if first == count {
            rt.transport.put_signal(
                DEFAULT_CTX,
                pe,
                dest_off + lo * nbytes,
                head,
                round_word(r, round),
                (SYNC_VALUE + 1) as u64,
                SignalOp::Set,
            )?;
        } else {
            rt.transport.put(DEFAULT_CTX, pe, dest_off + lo * nbytes, head)?;
            let tail = local_bytes(rt, dest_off, (count - first) * nbytes);
            rt.transport.put_signal(
                DEFAULT_CTX,
                pe,
                dest_off,
                tail,
                round_word(r, round),
                (SYNC_VALUE + 1) as u64,
                SignalOp::Set,
            )?;
        }
        Ok(())
    };

    for round in 0..n / 2 {
        let partner = if round == 0 || round % 2 == 0 {
            me ^ 1
        } else if me % 2 == 1 {
            (me + 1) % n
        } else {
            (me + n - 1) % n
        };
        let (lo, count) = if round == 0 {
            (me, 1)
        } else if round == 1 {
            (base, 2)
        } else {
            acquired_run(me, base, round - 1, n)
        };
        send_run(lo, count, team.world_pe(partner as i32), round)?;
        wait_word(rt, round_word(r, round), |v| v != SYNC_VALUE)?;
        store_local_word(rt, round_word(r, round), SYNC_VALUE);
    }
    Ok(())
}

/// The two blocks a PE acquired in exchange round `round` (round >= 1): the
/// run walks outward from the pair base, alternating direction.
fn acquired_run(me: usize, base: usize, round: usize, n: usize) -> (usize, usize) {
    let k = 2 * round.div_ceil(2);
    let left_first = me % 2 == 0;
    let go_left = if left_first { round % 2 == 1 } else { round % 2 == 0 };
    let lo = if go_left {
        (base + n - k) % n
    } else {
        (base + k) % n
    };
    (lo, 2)
}

pub(crate) fn collect_impl(
    rt: &RtInner,
    team: &TeamInner,
    dest: SymPtr<u8>,
    dest_off: usize,
    src_off: usize,
    nbytes: usize,
) -> Result<()> {
    rt.stats.bump(Op::Collective);
    let n = team.nranks as usize;
    let me = team.my_rank as usize;

    if n == 1 {
        rt.sym_offset(dest, nbytes)?;
        copy_block(rt, dest_off, src_off, nbytes);
        return Ok(());
    }

    let alg = team.algorithms.lock().unwrap().collect;
    sync_team(rt, team)?;
    let region = rt.psync.collect(team.slot);
    check_resting(rt, &region, "collect");

    // Size exchange: everyone tells everyone its byte count.
    for rank in 0..n {
        if rank == me {
            store_local_word(rt, r_size(&region, me), nbytes as i64);
        } else {
            set_word(rt, team.world_pe(rank as i32), r_size(&region, me), nbytes as i64)?;
        }
    }
    let mut sizes = vec![0usize; n];
    for (rank, size) in sizes.iter_mut().enumerate() {
        *size = wait_word(rt, r_size(&region, rank), |v| v != SYNC_VALUE)? as usize;
    }
    let total: usize = sizes.iter().sum();
    let my_off: usize = sizes[..me].iter().sum();
    rt.sym_offset(dest, total)?;

    match alg {
        CollectAlg::Linear => {
            copy_block(rt, dest_off + my_off, src_off, nbytes);
            let payload = local_bytes(rt, src_off, nbytes);
            for rank in 0..n {
                if rank == me {
                    continue;
                }
                let pe = team.world_pe(rank as i32);
                rt.transport
                    .put(DEFAULT_CTX, pe, dest_off + my_off, payload)?;
                rt.transport.fence(DEFAULT_CTX)?;
                add_word(rt, pe, region.word(COUNTER), 1)?;
            }
            wait_word(rt, region.word(COUNTER), |v| v == SYNC_VALUE + (n - 1) as i64)?;
        }
        CollectAlg::Ring => {
            let right = team.world_pe(((me + 1) % n) as i32);
            let offset_of = |rank: usize| -> usize { sizes[..rank].iter().sum() };
            copy_block(rt, dest_off + my_off, src_off, nbytes);
            for round in 0..n - 1 {
                let block = (me + n - round) % n;
                let len = sizes[block];
                let payload = local_bytes(rt, dest_off + offset_of(block), len);
                rt.transport
                    .put(DEFAULT_CTX, right, dest_off + offset_of(block), payload)?;
                rt.transport.fence(DEFAULT_CTX)?;
                add_word(rt, right, region.word(COUNTER), 1)?;
                wait_word(rt, region.word(COUNTER), |v| {
                    v >= SYNC_VALUE + (round + 1) as i64
                })?;
            }
        }
    }
    store_local_word(rt, region.word(COUNTER), SYNC_VALUE);
    for rank in 0..n {
        store_local_word(rt, r_size(&region, rank), SYNC_VALUE);
    }
    Ok(())
}

fn r_size(r: &Region, rank: usize) -> usize {
    r.word(SIZES + rank)
}

#[cfg(test)]
mod tests {
    use super::acquired_run;

    /// Simulate the neighbour-exchange schedule and confirm every PE ends
    /// with every block exactly once.
    #[test]
    fn neighbor_exchange_schedule_covers_all_blocks() {
        for n in [2usize, 4, 6, 8, 10] {
            // have[p] = set of blocks PE p holds.
            let mut have: Vec<Vec<bool>> = (0..n)
                .map(|p| (0..n).map(|b| b == p).collect())
                .collect();
            for round in 0..n / 2 {
                let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
                for me in 0..n {
                    let base = me & !1;
                    let partner = if round == 0 || round % 2 == 0 {
                        me ^ 1
                    } else if me % 2 == 1 {
                        (me + 1) % n
                    } else {
                        (me + n - 1) % n
                    };
                    let (lo, count) = if round == 0 {
                        (me, 1)
                    } else if round == 1 {
                        (base, 2)
                    } else {
                        acquired_run(me, base, round - 1, n)
                    };
                    for i in 0..count {
                        let b = (lo + i) % n;
                        assert!(have[me][b], "n={n} round={round} me={me} missing {b}");
                        incoming[partner].push(b);
                    }
                }
                for (p, blocks) in incoming.into_iter().enumerate() {
                    for b in blocks {
                        have[p][b] = true;
                    }
                }
            }
            for (p, blocks) in have.iter().enumerate() {
                assert!(
                    blocks.iter().all(|&b| b),
                    "n={n}: PE {p} is missing blocks: {blocks:?}"
                );
            }
        }
    }
}
