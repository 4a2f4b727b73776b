//! Remote atomic memory operations.
//!
//! Each AMO targets a naturally aligned symmetric variable on one PE and is
//! atomic with respect to every other AMO on the same location and width.
//! Fetching forms return the exact pre-image; add/inc wrap (two's
//! complement for signed, modulo 2^width for unsigned).
//!
//! The type ladder mirrors the standard AMO classes: every
//! [`AtomicElement`] (32/64-bit integers and floats) gets fetch/set/swap;
//! [`IntAtomicElement`] adds compare-swap, add and inc;
//! [`BitwiseAtomicElement`] adds and/or/xor. The `_nbi` forms write their
//! fetched value through a local out-parameter, guaranteed only after a
//! [`Ctx::quiet`] — a transport with synchronous atomics (like the thread
//! transport) completes them eagerly, which the contract permits.

use crate::context::Ctx;
use crate::elem::{AtomicElement, BitwiseAtomicElement, IntAtomicElement};
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::Shmem;
use crate::stats::Op;
use crate::transport::{AmoOp, Pe};

impl Ctx {
    fn amo_bits<T: AtomicElement>(
        &self,
        target: SymPtr<T>,
        pe: Pe,
        op: AmoOp,
        operand: u64,
        compare: u64,
    ) -> Result<u64> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        if target.addr() % T::WIDTH.bytes() != 0 {
            return Err(RtError::invalid(format!(
                "atomic target {:#x} is not {}-byte aligned",
                target.addr(),
                T::WIDTH.bytes()
            )));
        }
        let off = rt.sym_offset(target, 1)?;
        rt.stats.bump(Op::Amo);
        rt.transport
            .amo(self.stream(), pe, off, op, T::WIDTH, operand, compare)
    }

    /// Atomically read `src` on `pe`.
    pub fn atomic_fetch<T: AtomicElement>(&self, src: SymPtr<T>, pe: Pe) -> Result<T> {
        self.amo_bits(src, pe, AmoOp::Fetch, 0, 0).map(T::from_bits)
    }

    /// Atomically write `value` to `dest` on `pe`.
    pub fn atomic_set<T: AtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::Set, value.to_bits(), 0)
            .map(|_| ())
    }

    /// Atomically replace `dest` on `pe` with `value`; returns the
    /// pre-image.
    pub fn atomic_swap<T: AtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::Swap, value.to_bits(), 0)
            .map(T::from_bits)
    }

    /// Atomically store `value` iff `dest` equals `cond`; returns the
    /// pre-image either way — on mismatch the memory is unchanged.
    pub fn atomic_compare_swap<T: IntAtomicElement>(
        &self,
        dest: SymPtr<T>,
        cond: T,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::CompareSwap, value.to_bits(), cond.to_bits())
            .map(T::from_bits)
    }

    /// Atomically add `value` to `dest` on `pe`; returns the pre-image.
    pub fn atomic_fetch_add<T: IntAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::FetchAdd, value.to_bits(), 0)
            .map(T::from_bits)
    }

    /// Atomically add `value` to `dest` on `pe`.
    pub fn atomic_add<T: IntAtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::Add, value.to_bits(), 0)
            .map(|_| ())
    }

    /// Atomically increment `dest` on `pe`; returns the pre-image.
    pub fn atomic_fetch_inc<T: IntAtomicElement>(&self, dest: SymPtr<T>, pe: Pe) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::FetchAdd, T::ONE_BITS, 0)
            .map(T::from_bits)
    }

    /// Atomically increment `dest` on `pe`.
    pub fn atomic_inc<T: IntAtomicElement>(&self, dest: SymPtr<T>, pe: Pe) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::Add, T::ONE_BITS, 0).map(|_| ())
    }

    /// Atomic bitwise AND of `value` into `dest` on `pe`.
    pub fn atomic_and<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::And, value.to_bits(), 0)
            .map(|_| ())
    }

    /// Atomic bitwise OR of `value` into `dest` on `pe`.
    pub fn atomic_or<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::Or, value.to_bits(), 0)
            .map(|_| ())
    }

    /// Atomic bitwise XOR of `value` into `dest` on `pe`.
    pub fn atomic_xor<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.amo_bits(dest, pe, AmoOp::Xor, value.to_bits(), 0)
            .map(|_| ())
    }

    /// Fetching [`Ctx::atomic_and`].
    pub fn atomic_fetch_and<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::FetchAnd, value.to_bits(), 0)
            .map(T::from_bits)
    }

    /// Fetching [`Ctx::atomic_or`].
    pub fn atomic_fetch_or<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::FetchOr, value.to_bits(), 0)
            .map(T::from_bits)
    }

    /// Fetching [`Ctx::atomic_xor`].
    pub fn atomic_fetch_xor<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.amo_bits(dest, pe, AmoOp::FetchXor, value.to_bits(), 0)
            .map(T::from_bits)
    }

    /// Non-blocking fetch: `fetch` holds the value after a [`Ctx::quiet`].
    pub fn atomic_fetch_nbi<T: AtomicElement>(
        &self,
        fetch: &mut T,
        src: SymPtr<T>,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch(src, pe)?;
        Ok(())
    }

    /// Non-blocking swap.
    pub fn atomic_swap_nbi<T: AtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_swap(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking compare-swap.
    pub fn atomic_compare_swap_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        cond: T,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_compare_swap(dest, cond, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-add.
    pub fn atomic_fetch_add_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch_add(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-inc.
    pub fn atomic_fetch_inc_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch_inc(dest, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-and.
    pub fn atomic_fetch_and_nbi<T: BitwiseAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch_and(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-or.
    pub fn atomic_fetch_or_nbi<T: BitwiseAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch_or(dest, value, pe)?;
        Ok(())
    }

    /// Non-blocking fetch-xor.
    pub fn atomic_fetch_xor_nbi<T: BitwiseAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        *fetch = self.atomic_fetch_xor(dest, value, pe)?;
        Ok(())
    }
}

/// Default-context forms.
impl Shmem {
    pub fn atomic_fetch<T: AtomicElement>(&self, src: SymPtr<T>, pe: Pe) -> Result<T> {
        self.default_ctx().atomic_fetch(src, pe)
    }

    pub fn atomic_set<T: AtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.default_ctx().atomic_set(dest, value, pe)
    }

    pub fn atomic_swap<T: AtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<T> {
        self.default_ctx().atomic_swap(dest, value, pe)
    }

    pub fn atomic_compare_swap<T: IntAtomicElement>(
        &self,
        dest: SymPtr<T>,
        cond: T,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.default_ctx().atomic_compare_swap(dest, cond, value, pe)
    }

    pub fn atomic_fetch_add<T: IntAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.default_ctx().atomic_fetch_add(dest, value, pe)
    }

    pub fn atomic_add<T: IntAtomicElement>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.default_ctx().atomic_add(dest, value, pe)
    }

    pub fn atomic_fetch_inc<T: IntAtomicElement>(&self, dest: SymPtr<T>, pe: Pe) -> Result<T> {
        self.default_ctx().atomic_fetch_inc(dest, pe)
    }

    pub fn atomic_inc<T: IntAtomicElement>(&self, dest: SymPtr<T>, pe: Pe) -> Result<()> {
        self.default_ctx().atomic_inc(dest, pe)
    }

    pub fn atomic_and<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_and(dest, value, pe)
    }

    pub fn atomic_or<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_or(dest, value, pe)
    }

    pub fn atomic_xor<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_xor(dest, value, pe)
    }

    pub fn atomic_fetch_and<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.default_ctx().atomic_fetch_and(dest, value, pe)
    }

    pub fn atomic_fetch_or<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.default_ctx().atomic_fetch_or(dest, value, pe)
    }

    pub fn atomic_fetch_xor<T: BitwiseAtomicElement>(
        &self,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<T> {
        self.default_ctx().atomic_fetch_xor(dest, value, pe)
    }

    pub fn atomic_fetch_inc_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_fetch_inc_nbi(fetch, dest, pe)
    }

    pub fn atomic_fetch_add_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_fetch_add_nbi(fetch, dest, value, pe)
    }

    pub fn atomic_fetch_nbi<T: AtomicElement>(
        &self,
        fetch: &mut T,
        src: SymPtr<T>,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_fetch_nbi(fetch, src, pe)
    }

    pub fn atomic_swap_nbi<T: AtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().atomic_swap_nbi(fetch, dest, value, pe)
    }

    pub fn atomic_compare_swap_nbi<T: IntAtomicElement>(
        &self,
        fetch: &mut T,
        dest: SymPtr<T>,
        cond: T,
        value: T,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx()
            .atomic_compare_swap_nbi(fetch, dest, cond, value, pe)
    }
}
