//! Point-to-point synchronization: typed wait/test over symmetric memory.
//!
//! Every operation here polls a location in the **calling PE's own** heap,
//! waiting for a remote writer. A wait that succeeds is a synchronizing
//! load: each poll is an acquire read, so the payload a peer wrote before
//! its signal, quiet or release store is visible once the wait returns.
//!
//! Polling is cooperative: the loop pumps [`Transport::progress`] every
//! iteration and backs off adaptively — a few exponentially growing spin
//! bursts, then yielding the CPU. There are no timeouts; a wait whose
//! condition never becomes true is a caller bug and blocks forever.
//!
//! [`Transport::progress`]: crate::transport::Transport::progress

use crate::elem::AtomicElement;
use crate::error::{Result, RtError};
use crate::heap::SymPtr;
use crate::runtime::{RtInner, Shmem};
use crate::stats::Op;
use crate::transport::AmoWidth;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Comparison operator for wait/test and `signal_wait_until`.
///
/// The discriminants are the stable integer codes exported to bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Cmp {
    Eq = 0,
    Ne = 1,
    Gt = 2,
    Le = 3,
    Lt = 4,
    Ge = 5,
}

impl Cmp {
    /// The stable integer code.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => Cmp::Eq,
            1 => Cmp::Ne,
            2 => Cmp::Gt,
            3 => Cmp::Le,
            4 => Cmp::Lt,
            5 => Cmp::Ge,
            _ => return Err(RtError::invalid(format!("unknown comparison code {code}"))),
        })
    }

    /// Evaluate `a <cmp> b`.
    pub fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Cmp::Eq => a == b,
            Cmp::Ne => a != b,
            Cmp::Gt => a > b,
            Cmp::Le => a <= b,
            Cmp::Lt => a < b,
            Cmp::Ge => a >= b,
        }
    }
}

/// Adaptive spin-then-yield backoff, in the style of parking_lot.
pub(crate) struct SpinWait {
    counter: u32,
    yield_at: u32,
}

impl SpinWait {
    pub(crate) fn new(yield_at: u32) -> Self {
        Self {
            counter: 0,
            yield_at: yield_at.max(1),
        }
    }

    pub(crate) fn spin(&mut self) {
        self.counter += 1;
        if self.counter < self.yield_at {
            for _ in 0..(1u32 << self.counter.min(10)) {
                std::hint::spin_loop();
            }
        } else {
            self.counter = self.yield_at;
            std::thread::yield_now();
        }
    }

    pub(crate) fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Acquire-load the calling PE's copy of an AMO-capable element.
pub(crate) fn atomic_read<T: AtomicElement>(rt: &RtInner, ivar: SymPtr<T>) -> Result<T> {
    rt.sym_offset(ivar, 1)?;
    let addr = ivar.addr();
    if addr % T::WIDTH.bytes() != 0 {
        return Err(RtError::invalid(format!(
            "misaligned {}-byte sync variable at {addr:#x}",
            T::WIDTH.bytes()
        )));
    }
    let bits = match T::WIDTH {
        AmoWidth::W32 => unsafe { (*(addr as *const AtomicU32)).load(Ordering::Acquire) as u64 },
        AmoWidth::W64 => unsafe { (*(addr as *const AtomicU64)).load(Ordering::Acquire) },
    };
    Ok(T::from_bits(bits))
}

/// Poll `probe` until it returns `Some`, pumping transport progress.
pub(crate) fn poll_until<R>(rt: &RtInner, mut probe: impl FnMut() -> Result<Option<R>>) -> Result<R> {
    let mut spin = SpinWait::new(rt.config.spin_before_yield);
    loop {
        rt.transport.progress();
        if let Some(r) = probe()? {
            return Ok(r);
        }
        spin.spin();
    }
}

/// Resolve which indices of an `nelems`-long vector are monitored.
///
/// A `true` in `status` excludes the element, matching the classical API.
fn monitored(nelems: usize, status: Option<&[bool]>) -> Result<Vec<usize>> {
    if let Some(s) = status
        && s.len() != nelems
    {
        return Err(RtError::invalid(format!(
            "status length {} does not match nelems {}",
            s.len(),
            nelems
        )));
    }
    Ok((0..nelems)
        .filter(|&i| status.is_none_or(|s| !s[i]))
        .collect())
}

impl Shmem {
    /// Block until `cmp(ivar, value)` holds. Returns the observed value.
    pub fn wait_until<T: AtomicElement>(&self, ivar: SymPtr<T>, cmp: Cmp, value: T) -> Result<T> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        poll_until(rt, || {
            let v = atomic_read(rt, ivar)?;
            Ok(cmp.holds(v, value).then_some(v))
        })
    }

    /// Poll once: does `cmp(ivar, value)` hold right now?
    pub fn test<T: AtomicElement>(&self, ivar: SymPtr<T>, cmp: Cmp, value: T) -> Result<bool> {
        self.inner.check_ready()?;
        self.inner.transport.progress();
        let v = atomic_read(&self.inner, ivar)?;
        Ok(cmp.holds(v, value))
    }

    /// Block until every monitored element satisfies `cmp(ivars[i], value)`.
    pub fn wait_until_all<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        let watch = monitored(nelems, status)?;
        poll_until(rt, || {
            for &i in &watch {
                if !cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                    return Ok(None);
                }
            }
            Ok(Some(()))
        })
    }

    /// Block until some monitored element satisfies the comparison; returns
    /// its index. Returns `nelems` immediately when nothing is monitored.
    pub fn wait_until_any<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<usize> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        let watch = monitored(nelems, status)?;
        if watch.is_empty() {
            return Ok(nelems);
        }
        poll_until(rt, || {
            for &i in &watch {
                if cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                    return Ok(Some(i));
                }
            }
            Ok(None)
        })
    }

    /// Block until at least one monitored element satisfies the comparison;
    /// returns every index that does.
    pub fn wait_until_some<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<Vec<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        let watch = monitored(nelems, status)?;
        if watch.is_empty() {
            return Ok(Vec::new());
        }
        poll_until(rt, || {
            let mut hit = Vec::new();
            for &i in &watch {
                if cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                    hit.push(i);
                }
            }
            Ok(if hit.is_empty() { None } else { Some(hit) })
        })
    }

    /// [`Shmem::wait_until_all`] with a per-element comparison value.
    pub fn wait_until_all_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<()> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        check_vector(nelems, values)?;
        let watch = monitored(nelems, status)?;
        poll_until(rt, || {
            for &i in &watch {
                if !cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                    return Ok(None);
                }
            }
            Ok(Some(()))
        })
    }

    /// [`Shmem::wait_until_any`] with a per-element comparison value.
    pub fn wait_until_any_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<usize> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        check_vector(nelems, values)?;
        let watch = monitored(nelems, status)?;
        if watch.is_empty() {
            return Ok(nelems);
        }
        poll_until(rt, || {
            for &i in &watch {
                if cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                    return Ok(Some(i));
                }
            }
            Ok(None)
        })
    }

    /// [`Shmem::wait_until_some`] with a per-element comparison value.
    pub fn wait_until_some_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<Vec<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.stats.bump(Op::Wait);
        check_vector(nelems, values)?;
        let watch = monitored(nelems, status)?;
        if watch.is_empty() {
            return Ok(Vec::new());
        }
        poll_until(rt, || {
            let mut hit = Vec::new();
            for &i in &watch {
                if cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                    hit.push(i);
                }
            }
            Ok(if hit.is_empty() { None } else { Some(hit) })
        })
    }

    /// Do all monitored elements satisfy the comparison right now?
    pub fn test_all<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<bool> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        for i in monitored(nelems, status)? {
            if !cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The index of a monitored element satisfying the comparison, if any.
    pub fn test_any<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<Option<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        for i in monitored(nelems, status)? {
            if cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Every monitored index currently satisfying the comparison.
    pub fn test_some<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        value: T,
    ) -> Result<Vec<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        let mut hit = Vec::new();
        for i in monitored(nelems, status)? {
            if cmp.holds(atomic_read(rt, ivars.add(i))?, value) {
                hit.push(i);
            }
        }
        Ok(hit)
    }

    /// [`Shmem::test_all`] with per-element comparison values.
    pub fn test_all_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<bool> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        check_vector(nelems, values)?;
        for i in monitored(nelems, status)? {
            if !cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// [`Shmem::test_any`] with per-element comparison values.
    pub fn test_any_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<Option<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        check_vector(nelems, values)?;
        for i in monitored(nelems, status)? {
            if cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// [`Shmem::test_some`] with per-element comparison values.
    pub fn test_some_vector<T: AtomicElement>(
        &self,
        ivars: SymPtr<T>,
        nelems: usize,
        status: Option<&[bool]>,
        cmp: Cmp,
        values: &[T],
    ) -> Result<Vec<usize>> {
        let rt = &*self.inner;
        rt.check_ready()?;
        rt.transport.progress();
        check_vector(nelems, values)?;
        let mut hit = Vec::new();
        for i in monitored(nelems, status)? {
            if cmp.holds(atomic_read(rt, ivars.add(i))?, values[i]) {
                hit.push(i);
            }
        }
        Ok(hit)
    }
}

fn check_vector<T>(nelems: usize, values: &[T]) -> Result<()> {
    if values.len() != nelems {
        return Err(RtError::invalid(format!(
            "cmp_values length {} does not match nelems {}",
            values.len(),
            nelems
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_codes_round_trip() {
        for code in 0..6 {
            assert_eq!(Cmp::from_code(code).unwrap().code(), code);
        }
        assert!(Cmp::from_code(6).is_err());
    }

    #[test]
    fn cmp_semantics() {
        assert!(Cmp::Eq.holds(3, 3));
        assert!(Cmp::Ne.holds(3, 4));
        assert!(Cmp::Gt.holds(4, 3));
        assert!(Cmp::Le.holds(3, 3));
        assert!(Cmp::Lt.holds(2, 3));
        assert!(Cmp::Ge.holds(3, 3));
        assert!(!Cmp::Lt.holds(3, 3));
    }

    #[test]
    fn monitored_respects_exclusions() {
        let all = monitored(3, None).unwrap();
        assert_eq!(all, vec![0, 1, 2]);
        let some = monitored(3, Some(&[true, false, true])).unwrap();
        assert_eq!(some, vec![1]);
        assert!(monitored(3, Some(&[true])).is_err());
    }

    #[test]
    fn spinwait_caps_its_burst() {
        let mut s = SpinWait::new(3);
        for _ in 0..100 {
            s.spin();
        }
        assert_eq!(s.counter, 3);
        s.reset();
        assert_eq!(s.counter, 0);
    }
}
