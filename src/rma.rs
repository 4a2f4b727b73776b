//! One-sided remote memory access.
//!
//! Every operation exists on a [`Ctx`] and, for the default context, on
//! [`Shmem`] directly. Contracts, per (context, target) stream:
//!
//! - `put`/`iput`/`p`/`putmem`: the source buffer is reusable on return;
//!   remote visibility comes from a later [`Ctx::quiet`] (or a signal).
//! - `*_nbi`: initiation only; buffers are not safe for reuse until
//!   [`Ctx::quiet`]. A transport that completes eagerly satisfies this
//!   trivially.
//! - `get`/`iget`/`g`/`getmem`: blocking; the local buffer holds the remote
//!   value on return.
//! - [`Ctx::fence`] orders prior puts/AMOs before later ones per target;
//!   [`Ctx::quiet`] completes everything outstanding on the context.
//!
//! Zero-element calls are no-ops that still validate the target PE.

use crate::context::{Ctx, CtxOptions};
use crate::elem::{self, Element};
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::Shmem;
use crate::stats::Op;
use crate::transport::Pe;

impl Ctx {
    /// Copy `src` into `dest` on `pe`.
    pub fn put<T: Element>(&self, dest: SymPtr<T>, src: &[T], pe: Pe) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        if src.is_empty() {
            return Ok(());
        }
        let off = rt.sym_offset(dest, src.len())?;
        rt.stats.bump(Op::Put);
        rt.transport.put(self.stream(), pe, off, elem::as_bytes(src))
    }

    /// Non-blocking-initiation [`Ctx::put`]: `src` must stay untouched
    /// until a [`Ctx::quiet`].
    pub fn put_nbi<T: Element>(&self, dest: SymPtr<T>, src: &[T], pe: Pe) -> Result<()> {
        self.put(dest, src, pe)
    }

    /// Write one element to `dest` on `pe`.
    pub fn p<T: Element>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.put(dest, std::slice::from_ref(&value), pe)
    }

    /// Copy `dest.len()` elements from `src` on `pe` into `dest`.
    pub fn get<T: Element>(&self, dest: &mut [T], src: SymPtr<T>, pe: Pe) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        if dest.is_empty() {
            return Ok(());
        }
        let off = rt.sym_offset(src, dest.len())?;
        rt.stats.bump(Op::Get);
        rt.transport
            .get(self.stream(), pe, off, elem::as_bytes_mut(dest))
    }

    /// Non-blocking-initiation [`Ctx::get`]: `dest` holds the value only
    /// after a [`Ctx::quiet`].
    pub fn get_nbi<T: Element>(&self, dest: &mut [T], src: SymPtr<T>, pe: Pe) -> Result<()> {
        self.get(dest, src, pe)
    }

    /// Read one element from `src` on `pe`.
    pub fn g<T: Element>(&self, src: SymPtr<T>, pe: Pe) -> Result<T> {
        let mut out = [T::default()];
        self.get(&mut out, src, pe)?;
        Ok(out[0])
    }

    /// Strided put: element `i` of `src` (read at stride `sst`) lands at
    /// `dest.add(i * dst)` on `pe`. Strides are in elements and must be at
    /// least 1.
    pub fn iput<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        dst: usize,
        sst: usize,
        nelems: usize,
        pe: Pe,
    ) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        check_strides(dst, sst)?;
        if nelems == 0 {
            return Ok(());
        }
        if src.len() < (nelems - 1) * sst + 1 {
            return Err(RtError::invalid(format!(
                "iput source holds {} elements, needs {}",
                src.len(),
                (nelems - 1) * sst + 1
            )));
        }
        // Validate the whole strided span up front, then move elements.
        rt.sym_offset(dest, (nelems - 1) * dst + 1)?;
        rt.stats.bump(Op::Put);
        for i in 0..nelems {
            let one = std::slice::from_ref(&src[i * sst]);
            let off = rt.sym_offset(dest.add(i * dst), 1)?;
            rt.transport
                .put(self.stream(), pe, off, elem::as_bytes(one))?;
        }
        Ok(())
    }

    /// Strided get: the mirror of [`Ctx::iput`].
    pub fn iget<T: Element>(
        &self,
        dest: &mut [T],
        src: SymPtr<T>,
        dst: usize,
        sst: usize,
        nelems: usize,
        pe: Pe,
    ) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.check_pe(pe)?;
        check_strides(dst, sst)?;
        if nelems == 0 {
            return Ok(());
        }
        if dest.len() < (nelems - 1) * dst + 1 {
            return Err(RtError::invalid(format!(
                "iget destination holds {} elements, needs {}",
                dest.len(),
                (nelems - 1) * dst + 1
            )));
        }
        rt.sym_offset(src, (nelems - 1) * sst + 1)?;
        rt.stats.bump(Op::Get);
        for i in 0..nelems {
            let off = rt.sym_offset(src.add(i * sst), 1)?;
            let one = std::slice::from_mut(&mut dest[i * dst]);
            rt.transport
                .get(self.stream(), pe, off, elem::as_bytes_mut(one))?;
        }
        Ok(())
    }

    /// Byte-granular put.
    pub fn putmem(&self, dest: SymPtr<u8>, src: &[u8], pe: Pe) -> Result<()> {
        self.put(dest, src, pe)
    }

    /// Byte-granular non-blocking put.
    pub fn putmem_nbi(&self, dest: SymPtr<u8>, src: &[u8], pe: Pe) -> Result<()> {
        self.put_nbi(dest, src, pe)
    }

    /// Byte-granular get.
    pub fn getmem(&self, dest: &mut [u8], src: SymPtr<u8>, pe: Pe) -> Result<()> {
        self.get(dest, src, pe)
    }

    /// Byte-granular non-blocking get.
    pub fn getmem_nbi(&self, dest: &mut [u8], src: SymPtr<u8>, pe: Pe) -> Result<()> {
        self.get_nbi(dest, src, pe)
    }

    /// Order prior puts and AMOs on this context before later ones, per
    /// target PE. A `NOSTORE` context skips the ordering by design.
    pub fn fence(&self) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        if self.options().contains(CtxOptions::NOSTORE) {
            return Ok(());
        }
        rt.transport.fence(self.stream())
    }

    /// Complete all outstanding operations on this context: remote effects
    /// visible, local buffers reusable, fetched values landed.
    pub fn quiet(&self) -> Result<()> {
        let rt = &*self.rt.inner;
        rt.check_ready()?;
        rt.transport.quiet(self.stream())
    }
}

fn check_strides(dst: usize, sst: usize) -> Result<()> {
    if dst < 1 || sst < 1 {
        return Err(RtError::invalid(format!(
            "strides must be >= 1, got dst {dst}, sst {sst}"
        )));
    }
    Ok(())
}

/// Default-context forms.
impl Shmem {
    pub fn put<T: Element>(&self, dest: SymPtr<T>, src: &[T], pe: Pe) -> Result<()> {
        self.default_ctx().put(dest, src, pe)
    }

    pub fn put_nbi<T: Element>(&self, dest: SymPtr<T>, src: &[T], pe: Pe) -> Result<()> {
        self.default_ctx().put_nbi(dest, src, pe)
    }

    pub fn p<T: Element>(&self, dest: SymPtr<T>, value: T, pe: Pe) -> Result<()> {
        self.default_ctx().p(dest, value, pe)
    }

    pub fn get<T: Element>(&self, dest: &mut [T], src: SymPtr<T>, pe: Pe) -> Result<()> {
        self.default_ctx().get(dest, src, pe)
    }

    pub fn get_nbi<T: Element>(&self, dest: &mut [T], src: SymPtr<T>, pe: Pe) -> Result<()> {
        self.default_ctx().get_nbi(dest, src, pe)
    }

    pub fn g<T: Element>(&self, src: SymPtr<T>, pe: Pe) -> Result<T> {
        self.default_ctx().g(src, pe)
    }

    pub fn iput<T: Element>(
        &self,
        dest: SymPtr<T>,
        src: &[T],
        dst: usize,
        sst: usize,
        nelems: usize,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().iput(dest, src, dst, sst, nelems, pe)
    }

    pub fn iget<T: Element>(
        &self,
        dest: &mut [T],
        src: SymPtr<T>,
        dst: usize,
        sst: usize,
        nelems: usize,
        pe: Pe,
    ) -> Result<()> {
        self.default_ctx().iget(dest, src, dst, sst, nelems, pe)
    }

    pub fn putmem(&self, dest: SymPtr<u8>, src: &[u8], pe: Pe) -> Result<()> {
        self.default_ctx().putmem(dest, src, pe)
    }

    pub fn putmem_nbi(&self, dest: SymPtr<u8>, src: &[u8], pe: Pe) -> Result<()> {
        self.default_ctx().putmem_nbi(dest, src, pe)
    }

    pub fn getmem(&self, dest: &mut [u8], src: SymPtr<u8>, pe: Pe) -> Result<()> {
        self.default_ctx().getmem(dest, src, pe)
    }

    pub fn getmem_nbi(&self, dest: &mut [u8], src: SymPtr<u8>, pe: Pe) -> Result<()> {
        self.default_ctx().getmem_nbi(dest, src, pe)
    }

    /// [`Ctx::fence`] on the default context.
    pub fn fence(&self) -> Result<()> {
        self.default_ctx().fence()
    }

    /// [`Ctx::quiet`] on the default context.
    pub fn quiet(&self) -> Result<()> {
        self.default_ctx().quiet()
    }
}
