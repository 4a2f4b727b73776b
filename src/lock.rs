//! The distributed lock: a FIFO queue lock over one symmetric `long`.
//!
//! The eight bytes are used as two 32-bit words. The **tail** word lives on
//! PE 0 and holds the last enqueued PE plus one (zero means free). The
//! **cell** word is meaningful on each PE's own copy: bit 31 is the wait
//! flag, the low bits name the successor plus one. Acquisition swaps itself
//! into the tail; the previous holder learns its successor from the OR into
//! its cell and hands off by clearing the successor's wait flag. Handoff
//! order equals tail-swap order, which makes the lock FIFO.
//!
//! The lock variable must be symmetric and zero-initialized (a fresh
//! [`Shmem::alloc_array`] is). Re-acquiring a held lock from the same PE
//! deadlocks, as it does in every non-reentrant queue lock.

use crate::context::DEFAULT_CTX;
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::sync;
use crate::transport::{AmoOp, AmoWidth, Pe};
use std::sync::atomic::{AtomicU32, Ordering};

const WAIT_BIT: u32 = 0x8000_0000;
const NEXT_MASK: u32 = 0x7fff_ffff;

/// The PE that carries every lock's tail word.
const TAIL_PE: Pe = 0;

fn amo32(rt: &RtInner, pe: Pe, off: usize, op: AmoOp, operand: u32, compare: u32) -> Result<u32> {
    rt.transport
        .amo(
            DEFAULT_CTX,
            pe,
            off,
            op,
            AmoWidth::W32,
            operand as u64,
            compare as u64,
        )
        .map(|v| v as u32)
}

fn cell_value(rt: &RtInner, cell_off: usize) -> u32 {
    unsafe { (*(rt.extent.addr_at(cell_off) as *const AtomicU32)).load(Ordering::Acquire) }
}

fn wait_cell(rt: &RtInner, cell_off: usize, pred: impl Fn(u32) -> bool) -> Result<u32> {
    sync::poll_until(rt, || {
        let v = cell_value(rt, cell_off);
        Ok(pred(v).then_some(v))
    })
}

fn lock_offsets(rt: &RtInner, lock: SymPtr<i64>) -> Result<(usize, usize)> {
    if lock.addr() % 8 != 0 {
        return Err(RtError::invalid(format!(
            "lock at {:#x} is not 8-byte aligned",
            lock.addr()
        )));
    }
    let off = rt.sym_offset(lock, 1)?;
    Ok((off, off + 4))
}

impl Shmem {
    /// Acquire the lock, blocking behind earlier acquirers in FIFO order.
    pub fn set_lock(&self, lock: SymPtr<i64>) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        let (tail, cell) = lock_offsets(rt, lock)?;
        rt.stats.bump(Op::Lock);
        let me = rt.me as u32;

        // Raise the wait flag before publishing: once the swap lands, the
        // predecessor may hand off at any moment.
        amo32(rt, rt.me, cell, AmoOp::Or, WAIT_BIT, 0)?;
        let prev = amo32(rt, TAIL_PE, tail, AmoOp::Swap, me + 1, 0)?;
        if prev == 0 {
            // Free: un-flag ourselves, keeping any successor announcement
            // that raced in.
            amo32(rt, rt.me, cell, AmoOp::And, !WAIT_BIT, 0)?;
        } else {
            // Tell the predecessor who we are, then spin on our own copy.
            amo32(rt, (prev - 1) as Pe, cell, AmoOp::Or, me + 1, 0)?;
            wait_cell(rt, cell, |v| v & WAIT_BIT == 0)?;
        }
        Ok(())
    }

    /// Release the lock, handing it to the next waiter if there is one.
    pub fn clear_lock(&self, lock: SymPtr<i64>) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        let (tail, cell) = lock_offsets(rt, lock)?;
        rt.stats.bump(Op::Lock);
        let me = rt.me as u32;

        // The next holder must observe everything written under the lock.
        rt.transport.quiet(DEFAULT_CTX)?;

        let mut next = cell_value(rt, cell) & NEXT_MASK;
        if next == 0 {
            let prev = amo32(rt, TAIL_PE, tail, AmoOp::CompareSwap, 0, me + 1)?;
            if prev == me + 1 {
                // No successor; the lock is free again.
                amo32(rt, rt.me, cell, AmoOp::Set, 0, 0)?;
                return Ok(());
            }
            // Someone swapped in behind us but has not announced itself
            // yet; its OR is on the way.
            next = wait_cell(rt, cell, |v| v & NEXT_MASK != 0)? & NEXT_MASK;
        }
        amo32(rt, rt.me, cell, AmoOp::Set, 0, 0)?;
        amo32(rt, (next - 1) as Pe, cell, AmoOp::And, !WAIT_BIT, 0)?;
        Ok(())
    }

    /// Try to acquire the lock without blocking. Returns `true` when the
    /// lock was acquired.
    pub fn test_lock(&self, lock: SymPtr<i64>) -> Result<bool> {
        let rt = &*self.inner;
        rt.check_ready()?;
        let (tail, _cell) = lock_offsets(rt, lock)?;
        rt.stats.bump(Op::Lock);
        let me = rt.me as u32;
        let prev = amo32(rt, TAIL_PE, tail, AmoOp::CompareSwap, me + 1, 0)?;
        Ok(prev == 0)
    }
}
