//! Signalled puts and signal objects.
//!
//! A signal is a symmetric `u64` word updated atomically by the transport
//! as the visible tail of a payload delivery: an observer that has seen the
//! signal change (via [`Shmem::signal_wait_until`] or a plain read through
//! [`Shmem::signal_fetch`] that happened to observe it) is guaranteed to
//! see every byte of the payload that travelled with it.

use crate::context::Ctx;
use crate::elem::{self, Element};
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::Shmem;
use crate::stats::Op;
use crate::sync::{self, Cmp};
use crate::transport::{Pe, SignalOp};

impl Ctx {
    /// Copy `src` into `dest` on `pe`, then update the signal word at
    /// `sig` there per `sig_op`, ordered after the payload.
    pub fn put_signal<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        let dest_off = rt.sym_offset(dest, src.len())?;
        let sig_off = signal_offset(rt, sig)?;
        rt.stats.bump(Op::Signal);
        rt.transport.put_signal(
            self.stream(),
            pe,
            dest_off,
            elem::as_bytes(src),
            sig_off,
            sig_val,
            sig_op,
        )
    }

    /// Non-blocking-initiation [`Ctx::put_signal`]: neither the payload nor
    /// the signal is guaranteed delivered until a [`Ctx::quiet`].
    pub fn put_signal_nbi<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        self.put_signal(dest, src, sig, sig_val, sig_op, pe)
    }

    /// Byte-granular [`Ctx::put_signal`].
    pub fn putmem_signal(
        &self,
        dest: SymPtr<u8>,
        src: &[u8],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        self.put_signal(dest, src, sig, sig_val, sig_op, pe)
    }

    /// Byte-granular [`Ctx::put_signal_nbi`].
    pub fn putmem_signal_nbi(
        &self,
        dest: SymPtr<u8>,
        src: &[u8],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        self.put_signal_nbi(dest, src, sig, sig_val, sig_op, pe)
    }
}

impl Shmem {
    /// [`Ctx::put_signal`] on the default context.
    pub fn put_signal<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx()
            .put_signal(dest, src, sig, sig_val, sig_op, pe)
    }

    /// [`Ctx::put_signal_nbi`] on the default context.
    pub fn put_signal_nbi<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        sig: SymPtr<u64>,
        sig_val: u64,
        sig_op: SignalOp,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx()
            .put_signal_nbi(dest, src, sig, sig_val, sig_op, pe)
    }

    /// Atomically read the calling PE's copy of the signal word. No
    /// ordering beyond the atomicity of the read itself.
    pub fn signal_fetch(&self, sig: SymPtr<u64>) -> Result<u64> {
        self.inner.check_ready()?;
        signal_offset(&self.inner, sig)?;
        sync::atomic_read(&self.inner, sig)
    }

    /// Block until `cmp(signal, value)` holds; returns the observed value.
    /// The payload of the put that satisfied the wait is visible on return.
    pub fn signal_wait_until(&self, sig: SymPtr<u64>, cmp: Cmp, value: u64) -> Result<u64> {
        let rt = &*self.inner;
        rt.check_ready()?;
        signal_offset(rt, sig)?;
        rt.stats.bump(Op::Wait);
        sync::poll_until(rt, || {
            let v = sync::atomic_read(rt, sig)?;
            Ok(cmp.holds(v, value).then_some(v))
        })
    }
}

fn signal_offset(rt: &crate::runtime::RtInner, sig: SymPtr<u64>) -> Result<usize> {
    if sig.addr() % 8 != 0 {
        return Err(RtError::invalid(format!(
            "signal word at {:#x} is not 8-byte aligned",
            sig.addr()
        )));
    }
    rt.sym_offset(sig, 1)
}
