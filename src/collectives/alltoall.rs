//! Alltoall: every PE sends its i-th block to rank i, landing at the
//! sender's rank.
//!
//! Three peer schedules (shift for any N, XOR for power-of-two N, an
//! edge-colouring schedule pairwise-correct for any N) crossed with three
//! completion disciplines (trailing barrier, arrival counter, per-source
//! signal slots). The strided form walks elements with independent source
//! and destination strides; the contiguous form is its stride-1 fast path.
//!
//! Scratch usage (ALLTOALL region): word 0 is the arrival counter, words
//! `2..2+N` are the per-source signal slots.

use super::{
    add_word, barrier_team, check_resting, local_bytes, require_power_of_two, set_word,
    store_local_word, sync_team, wait_word,
};
use crate::SYNC_VALUE;
use crate::config::{AlltoallAlg, SyncDiscipline};
use crate::context::DEFAULT_CTX;
use crate::elem::Element;
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::team::{Region, Team, TeamInner};

const COUNTER: usize = 0;
const SLOTS: usize = 2;

impl Shmem {
    /// Collective: block exchange. Rank p's `src` block i lands in rank i's
    /// `dest` at block p. Both buffers hold `n_pes * nelems` elements.
    pub fn alltoall<T: Element>(
        &self,
        team: &Team,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        nelems: usize,
    ) -> Result<()> {
        self.alltoalls(team, dest, src, 1, 1, nelems)
    }

    /// Byte-granular [`Shmem::alltoall`].
    pub fn alltoallmem(
        &self,
        team: &Team,
        dest: SymPtr<u8>,
        src: SymPtr<u8>,
        nbytes: usize,
    ) -> Result<()> {
        self.alltoalls::<u8>(team, dest, src, 1, 1, nbytes)
    }

    /// Byte-granular [`Shmem::alltoalls`]: strides and the block size are
    /// measured in bytes.
    pub fn alltoallsmem(
        &self,
        team: &Team,
        dest: SymPtr<u8>,
        src: SymPtr<u8>,
        dst: usize,
        sst: usize,
        nbytes: usize,
    ) -> Result<()> {
        self.alltoalls::<u8>(team, dest, src, dst, sst, nbytes)
    }

    /// Collective: strided block exchange. Element j of the block for rank
    /// i is read from `src[sst * (i * nelems + j)]` and written on the
    /// target at `dest[dst * (me * nelems + j)]`.
    pub fn alltoalls<T: Element>(
        &self,
        team: &Team,
        dest: SymPtr<T>,
        src: SymPtr<T>,
        dst: usize,
        sst: usize,
        nelems: usize,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        team.inner.check_live()?;
        if dst < 1 || sst < 1 {
            return Err(RtError::invalid(format!(
                "alltoalls strides must be >= 1, got dst {dst}, sst {sst}"
            )));
        }
        let n = team.inner.nranks as usize;
        let elem = std::mem::size_of::<T>();
        let span = |stride: usize| {
            if n * nelems == 0 {
                0
            } else {
                (stride * (n * nelems - 1) + 1) * elem
            }
        };
        let dest_off = rt.extent.offset_of(dest.addr(), span(dst))?;
        let src_off = rt.extent.offset_of(src.addr(), span(sst))?;
        alltoalls_impl(
            rt,
            &team.inner,
            dest_off,
            src_off,
            dst,
            sst,
            nelems,
            elem,
        )
    }
}

/// The peer every rank talks to in each round of the colour schedule.
///
/// Classic circle method: odd N plays N rounds with one PE sitting out per
/// round; even N fixes PE N-1 and rotates the rest through N-1 rounds.
pub(crate) fn color_peer(me: i32, round: i32, n: i32) -> Option<i32> {
    if n % 2 == 1 {
        let p = (round - me).rem_euclid(n);
        (p != me).then_some(p)
    } else {
        let m = n - 1;
        if me == n - 1 {
            // The fixed vertex plays the round's self-paired rank.
            Some((round * ((m + 1) / 2)).rem_euclid(m))
        } else {
            let p = (round - me).rem_euclid(m);
            Some(if p == me { n - 1 } else { p })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn alltoalls_impl(
    rt: &RtInner,
    team: &TeamInner,
    dest_off: usize,
    src_off: usize,
    dst: usize,
    sst: usize,
    nelems: usize,
    elem: usize,
) -> Result<()> {
    rt.stats.bump(Op::Collective);
    let n = team.nranks as usize;
    let me = team.my_rank as usize;

    let (alg, discipline) = {
        let a = team.algorithms.lock().unwrap();
        (a.alltoall, a.alltoall_sync)
    };
    if alg == AlltoallAlg::Xor {
        require_power_of_two(team, "alltoall/xor")?;
    }

    // Element e of the block destined for `rank`, in src-layout.
    let src_elem = |rank: usize, e: usize| src_off + sst * (rank * nelems + e) * elem;
    let dst_elem = |rank: usize, e: usize| dest_off + dst * (rank * nelems + e) * elem;

    // Copy a whole block to a peer, contiguously when both strides allow.
    let send_block = |to_rank: usize| -> Result<()> {
        let pe = team.world_pe(to_rank as i32);
        if dst == 1 && sst == 1 {
            let payload = local_bytes(rt, src_elem(to_rank, 0), nelems * elem);
            rt.transport.put(DEFAULT_CTX, pe, dst_elem(me, 0), payload)?;
        } else {
            for e in 0..nelems {
                let payload = local_bytes(rt, src_elem(to_rank, e), elem);
                rt.transport.put(DEFAULT_CTX, pe, dst_elem(me, e), payload)?;
            }
        }
        Ok(())
    };
    let copy_own = || {
        for e in 0..nelems {
            unsafe {
                std::ptr::copy(
                    rt.extent.addr_at(src_elem(me, e)) as *const u8,
                    rt.extent.addr_at(dst_elem(me, e)) as *mut u8,
                    elem,
                );
            }
        }
    };

    if n == 1 {
        copy_own();
        return Ok(());
    }

    sync_team(rt, team)?;
    if nelems == 0 {
        return Ok(());
    }
    let region = rt.psync.alltoall(team.slot);
    check_resting(rt, &region, "alltoall");

    copy_own();

    let mut sent = 0usize;
    let mut visit = |peer: usize| -> Result<()> {
        send_block(peer)?;
        sent += 1;
        let pe = team.world_pe(peer as i32);
        match discipline {
            SyncDiscipline::Barrier => {}
            SyncDiscipline::Counter => {
                rt.transport.fence(DEFAULT_CTX)?;
                add_word(rt, pe, region.word(COUNTER), 1)?;
            }
            SyncDiscipline::Signal => {
                rt.transport.fence(DEFAULT_CTX)?;
                set_word(rt, pe, region.word(SLOTS + me), SYNC_VALUE + 1)?;
            }
        }
        Ok(())
    };

    match alg {
        AlltoallAlg::Shift => {
            for i in 1..n {
                visit((me + i) % n)?;
            }
        }
        AlltoallAlg::Xor => {
            for i in 1..n {
                visit(me ^ i)?;
            }
        }
        AlltoallAlg::Color => {
            let rounds = if n % 2 == 1 { n } else { n - 1 };
            for round in 0..rounds {
                if let Some(peer) = color_peer(me as i32, round as i32, n as i32) {
                    visit(peer as usize)?;
                }
            }
        }
    }
    debug_assert_eq!(sent, n - 1);

    finish(rt, team, &region, discipline)
}

fn finish(
    rt: &RtInner,
    team: &TeamInner,
    region: &Region,
    discipline: SyncDiscipline,
) -> Result<()> {
    let n = team.nranks as usize;
    let me = team.my_rank as usize;
    match discipline {
        SyncDiscipline::Barrier => barrier_team(rt, team)?,
        SyncDiscipline::Counter => {
            wait_word(rt, region.word(COUNTER), |v| v == SYNC_VALUE + (n - 1) as i64)?;
            store_local_word(rt, region.word(COUNTER), SYNC_VALUE);
        }
        SyncDiscipline::Signal => {
            for rank in 0..n {
                if rank == me {
                    continue;
                }
                wait_word(rt, region.word(SLOTS + rank), |v| v != SYNC_VALUE)?;
                store_local_word(rt, region.word(SLOTS + rank), SYNC_VALUE);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::color_peer;

    #[test]
    fn color_schedule_is_a_pairing() {
        for n in 2..12 {
            let rounds = if n % 2 == 1 { n } else { n - 1 };
            let mut met = vec![vec![false; n as usize]; n as usize];
            for round in 0..rounds {
                for me in 0..n {
                    match color_peer(me, round, n) {
                        Some(p) => {
                            assert_ne!(p, me, "n={n} round={round}");
                            assert_eq!(
                                color_peer(p, round, n),
                                Some(me),
                                "n={n} round={round} me={me}: pairing must be mutual"
                            );
                            met[me as usize][p as usize] = true;
                        }
                        None => assert_eq!(n % 2, 1, "only odd N sits out"),
                    }
                }
            }
            for me in 0..n as usize {
                for p in 0..n as usize {
                    if me != p {
                        assert!(met[me][p], "n={n}: {me} never met {p}");
                    }
                }
            }
        }
    }
}
