//! Barrier / sync algorithms.
//!
//! All of them run out of one parity bank of the team's BARRIER region:
//! word 0 collects arrivals, word 1 carries the release, and dissemination
//! uses one word per round instead. Arrival counters count up from
//! `SYNC_VALUE`; every word is back at `SYNC_VALUE` when the algorithm
//! returns.

use super::{add_word, set_word, store_local_word, wait_word};
use crate::SYNC_VALUE;
use crate::error::Result;
use crate::runtime::RtInner;
use crate::team::{Region, TeamInner};

const ARRIVE: usize = 0;
const RELEASE: usize = 1;

/// Rank 0 collects N-1 arrivals, then releases everyone.
pub(crate) fn linear(rt: &RtInner, team: &TeamInner, r: &Region) -> Result<()> {
    let n = team.nranks;
    if team.my_rank == 0 {
        wait_word(rt, r.word(ARRIVE), |v| v == SYNC_VALUE + (n - 1) as i64)?;
        store_local_word(rt, r.word(ARRIVE), SYNC_VALUE);
        for rank in 1..n {
            set_word(rt, team.world_pe(rank), r.word(RELEASE), SYNC_VALUE + 1)?;
        }
    } else {
        add_word(rt, team.world_pe(0), r.word(ARRIVE), 1)?;
        wait_word(rt, r.word(RELEASE), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(RELEASE), SYNC_VALUE);
    }
    Ok(())
}

/// Complete tree of degree `d`: children arrive at their parent, the
/// release propagates back down.
pub(crate) fn complete_tree(rt: &RtInner, team: &TeamInner, r: &Region, d: usize) -> Result<()> {
    let d = d.max(2) as i32;
    let me = team.my_rank;
    let first = me * d + 1;
    let children: Vec<i32> = (first..(first + d).min(team.nranks)).collect();
    let parent = (me > 0).then(|| (me - 1) / d);
    arrive_release(rt, team, r, parent, &children)
}

/// K-nomial tree of radix `radix` (binomial when 2): parent/children come
/// from clearing or extending the lowest non-zero base-`radix` digit.
pub(crate) fn knomial_tree(rt: &RtInner, team: &TeamInner, r: &Region, radix: usize) -> Result<()> {
    let (parent, children) = knomial_shape(team.my_rank, team.nranks, radix.max(2) as i32);
    arrive_release(rt, team, r, parent, &children)
}

/// Shared arrive-then-release phase for the tree barriers.
fn arrive_release(
    rt: &RtInner,
    team: &TeamInner,
    r: &Region,
    parent: Option<i32>,
    children: &[i32],
) -> Result<()> {
    if !children.is_empty() {
        wait_word(rt, r.word(ARRIVE), |v| v == SYNC_VALUE + children.len() as i64)?;
        store_local_word(rt, r.word(ARRIVE), SYNC_VALUE);
    }
    if let Some(p) = parent {
        add_word(rt, team.world_pe(p), r.word(ARRIVE), 1)?;
        wait_word(rt, r.word(RELEASE), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(RELEASE), SYNC_VALUE);
    }
    for &c in children {
        set_word(rt, team.world_pe(c), r.word(RELEASE), SYNC_VALUE + 1)?;
    }
    Ok(())
}

/// Parent and children of `rank` in a `radix`-nomial tree rooted at 0.
pub(crate) fn knomial_shape(rank: i32, n: i32, radix: i32) -> (Option<i32>, Vec<i32>) {
    let parent = if rank == 0 {
        None
    } else {
        let mut place = 1;
        while rank % (place * radix) == 0 {
            place *= radix;
        }
        let digit = (rank / place) % radix;
        Some(rank - digit * place)
    };

    let mut children = Vec::new();
    let mut place = 1;
    loop {
        if rank % (place * radix) != 0 {
            break;
        }
        for d in 1..radix {
            let c = rank + d * place;
            if c < n {
                children.push(c);
            }
        }
        match place.checked_mul(radix) {
            Some(next) if next <= n => place = next,
            _ => break,
        }
    }
    (parent, children)
}

/// ⌈log2(N)⌉ rounds: round k signals the peer at +2^k and waits for the
/// peer at -2^k. Correct for any N ≥ 1.
pub(crate) fn dissemination(rt: &RtInner, team: &TeamInner, r: &Region) -> Result<()> {
    let n = team.nranks;
    let me = team.my_rank;
    let mut dist = 1;
    let mut round = 0;
    while dist < n {
        let to = (me + dist) % n;
        set_word(rt, team.world_pe(to), r.word(round), SYNC_VALUE + 1)?;
        wait_word(rt, r.word(round), |v| v != SYNC_VALUE)?;
        store_local_word(rt, r.word(round), SYNC_VALUE);
        dist <<= 1;
        round += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::knomial_shape;

    #[test]
    fn binomial_shape_matches_the_classic_tree() {
        // n = 8, radix 2: 0 -> {1, 2, 4}, 2 -> {3}, 4 -> {5, 6}, 6 -> {7}.
        assert_eq!(knomial_shape(0, 8, 2), (None, vec![1, 2, 4]));
        assert_eq!(knomial_shape(2, 8, 2), (Some(0), vec![3]));
        assert_eq!(knomial_shape(4, 8, 2), (Some(0), vec![5, 6]));
        assert_eq!(knomial_shape(6, 8, 2), (Some(4), vec![7]));
        assert_eq!(knomial_shape(7, 8, 2), (Some(6), vec![]));
    }

    #[test]
    fn every_rank_has_exactly_one_parent() {
        for n in 1..40 {
            for radix in 2..5 {
                let mut seen = vec![0u32; n as usize];
                for rank in 0..n {
                    let (_, children) = knomial_shape(rank, n, radix);
                    for c in children {
                        seen[c as usize] += 1;
                    }
                }
                assert_eq!(seen[0], 0, "root must not be anyone's child");
                assert!(
                    seen[1..].iter().all(|&c| c == 1),
                    "n={n} radix={radix}: {seen:?}"
                );
                for rank in 1..n {
                    let (parent, _) = knomial_shape(rank, n, radix);
                    let p = parent.unwrap();
                    let (_, pc) = knomial_shape(p, n, radix);
                    assert!(pc.contains(&rank), "n={n} radix={radix} rank={rank}");
                }
            }
        }
    }
}
