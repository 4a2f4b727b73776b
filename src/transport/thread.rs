//! In-process loopback transport: N PEs as threads of one process.
//!
//! A [`ThreadWorld`] is the shared wiring of a miniature job; every PE thread
//! holds one [`ThreadTransport`] endpoint. Heaps are plain process memory, so
//! a remote put is a memcpy into the peer's arena and every AMO is a real
//! hardware atomic. All remote heaps are load/store mappable, which makes
//! this transport the maximal case for `direct_pointer`.
//!
//! Memory ordering: small naturally-aligned puts and all signal updates are
//! release stores; `get` performs an acquire fence before copying; `quiet` is
//! a sequentially-consistent fence. A waiter that acquires on a signal or
//! flag word therefore observes the full payload written before it, which is
//! exactly the contract the sync engine needs. Operations complete inline,
//! so there is never an outstanding-op queue behind `fence`/`quiet`.

use crate::error::{Result, RtError};
use crate::transport::{AmoOp, AmoWidth, Pe, SignalOp, StreamId, Transport};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, Debug)]
struct Seg {
    base: usize,
    len: usize,
}

/// Shared state of an in-process job: the registered heap of every PE.
pub struct ThreadWorld {
    npes: usize,
    segs: Vec<OnceLock<Seg>>,
}

impl ThreadWorld {
    /// Wire up a world of `npes` PEs. Hand each PE thread its endpoint via
    /// [`ThreadWorld::endpoint`].
    pub fn new(npes: usize) -> Arc<Self> {
        assert!(npes > 0, "a world needs at least one PE");
        Arc::new(Self {
            npes,
            segs: (0..npes).map(|_| OnceLock::new()).collect(),
        })
    }

    /// The endpoint for PE `pe`.
    pub fn endpoint(self: &Arc<Self>, pe: usize) -> ThreadTransport {
        assert!(pe < self.npes, "PE {pe} out of range");
        ThreadTransport {
            world: Arc::clone(self),
            me: pe as Pe,
        }
    }

    /// Resolve `pe`'s heap, waiting out the registration race at init time.
    fn seg(&self, pe: Pe) -> Result<Seg> {
        if pe < 0 || pe as usize >= self.npes {
            return Err(RtError::Unreachable(pe));
        }
        let slot = &self.segs[pe as usize];
        let mut spins = 0u32;
        loop {
            if let Some(seg) = slot.get() {
                return Ok(*seg);
            }
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn resolve(&self, pe: Pe, off: usize, len: usize) -> Result<*mut u8> {
        let seg = self.seg(pe)?;
        if off.checked_add(len).is_none_or(|end| end > seg.len) {
            return Err(RtError::Transport(format!(
                "offset {off:#x}+{len} outside PE {pe}'s heap ({} bytes)",
                seg.len
            )));
        }
        Ok((seg.base + off) as *mut u8)
    }
}

/// One PE's endpoint into a [`ThreadWorld`].
pub struct ThreadTransport {
    world: Arc<ThreadWorld>,
    me: Pe,
}

impl ThreadTransport {
    /// Atomic word at `dst`, which the caller has bounds-checked.
    ///
    /// Width alignment is the engine's responsibility; it is re-checked here
    /// because a misaligned atomic is UB, not just a wrong answer.
    unsafe fn atomic_op(&self, dst: *mut u8, op: AmoOp, width: AmoWidth, operand: u64, compare: u64) -> Result<u64> {
        if (dst as usize) % width.bytes() != 0 {
            return Err(RtError::Transport(format!(
                "misaligned {}-byte atomic at {dst:p}",
                width.bytes()
            )));
        }
        match width {
            AmoWidth::W64 => {
                let a = unsafe { &*dst.cast::<AtomicU64>() };
                Ok(amo_u64(a, op, operand, compare))
            }
            AmoWidth::W32 => {
                let a = unsafe { &*dst.cast::<AtomicU32>() };
                Ok(amo_u32(a, op, operand as u32, compare as u32) as u64)
            }
        }
    }
}

fn amo_u64(a: &AtomicU64, op: AmoOp, operand: u64, compare: u64) -> u64 {
    use Ordering::SeqCst;
    match op {
        AmoOp::Swap => a.swap(operand, SeqCst),
        AmoOp::CompareSwap => match a.compare_exchange(compare, operand, SeqCst, SeqCst) {
            Ok(prev) | Err(prev) => prev,
        },
        AmoOp::Add | AmoOp::FetchAdd => a.fetch_add(operand, SeqCst),
        AmoOp::Fetch => a.load(SeqCst),
        AmoOp::Set => {
            a.store(operand, SeqCst);
            0
        }
        AmoOp::And | AmoOp::FetchAnd => a.fetch_and(operand, SeqCst),
        AmoOp::Or | AmoOp::FetchOr => a.fetch_or(operand, SeqCst),
        AmoOp::Xor | AmoOp::FetchXor => a.fetch_xor(operand, SeqCst),
    }
}

fn amo_u32(a: &AtomicU32, op: AmoOp, operand: u32, compare: u32) -> u32 {
    use Ordering::SeqCst;
    match op {
        AmoOp::Swap => a.swap(operand, SeqCst),
        AmoOp::CompareSwap => match a.compare_exchange(compare, operand, SeqCst, SeqCst) {
            Ok(prev) | Err(prev) => prev,
        },
        AmoOp::Add | AmoOp::FetchAdd => a.fetch_add(operand, SeqCst),
        AmoOp::Fetch => a.load(SeqCst),
        AmoOp::Set => {
            a.store(operand, SeqCst);
            0
        }
        AmoOp::And | AmoOp::FetchAnd => a.fetch_and(operand, SeqCst),
        AmoOp::Or | AmoOp::FetchOr => a.fetch_or(operand, SeqCst),
        AmoOp::Xor | AmoOp::FetchXor => a.fetch_xor(operand, SeqCst),
    }
}

impl Transport for ThreadTransport {
    fn my_pe(&self) -> Pe {
        self.me
    }

    fn n_pes(&self) -> Pe {
        self.world.npes as Pe
    }

    unsafe fn register_heap(&self, base: *mut u8, len: usize) -> Result<()> {
        let seg = Seg {
            base: base as usize,
            len,
        };
        self.world.segs[self.me as usize]
            .set(seg)
            .map_err(|_| RtError::Transport(format!("PE {} registered its heap twice", self.me)))
    }

    fn put(&self, _stream: StreamId, pe: Pe, dst_off: usize, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let dst = self.world.resolve(pe, dst_off, src.len())?;
        let n = src.len();
        unsafe {
            // Naturally aligned word-sized puts are release stores so a
            // flag written with `p` is immediately wait_until-able.
            if n == 8 && (dst as usize) % 8 == 0 {
                let v = u64::from_ne_bytes(src.try_into().unwrap());
                (*dst.cast::<AtomicU64>()).store(v, Ordering::Release);
            } else if n == 4 && (dst as usize) % 4 == 0 {
                let v = u32::from_ne_bytes(src.try_into().unwrap());
                (*dst.cast::<AtomicU32>()).store(v, Ordering::Release);
            } else {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst, n);
                fence(Ordering::Release);
            }
        }
        Ok(())
    }

    fn get(&self, _stream: StreamId, pe: Pe, src_off: usize, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let src = self.world.resolve(pe, src_off, dst.len())?;
        fence(Ordering::Acquire);
        unsafe {
            std::ptr::copy_nonoverlapping(src.cast_const(), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn amo(
        &self,
        _stream: StreamId,
        pe: Pe,
        off: usize,
        op: AmoOp,
        width: AmoWidth,
        operand: u64,
        compare: u64,
    ) -> Result<u64> {
        let dst = self.world.resolve(pe, off, width.bytes())?;
        unsafe { self.atomic_op(dst, op, width, operand, compare) }
    }

    fn put_signal(
        &self,
        stream: StreamId,
        pe: Pe,
        dst_off: usize,
        src: &[u8],
        sig_off: usize,
        sig_val: u64,
        sig_op: SignalOp,
    ) -> Result<()> {
        self.put(stream, pe, dst_off, src)?;
        let op = match sig_op {
            SignalOp::Set => AmoOp::Set,
            SignalOp::Add => AmoOp::Add,
        };
        // The SeqCst RMW orders the payload copy before the signal update;
        // an acquire load that observes the signal observes the payload.
        self.amo(stream, pe, sig_off, op, AmoWidth::W64, sig_val, 0)?;
        Ok(())
    }

    fn fence(&self, _stream: StreamId) -> Result<()> {
        fence(Ordering::Release);
        Ok(())
    }

    fn quiet(&self, _stream: StreamId) -> Result<()> {
        fence(Ordering::SeqCst);
        Ok(())
    }

    fn progress(&self) {
        // Inbound delivery is passive here; give the sibling hyperthread a
        // chance instead.
        std::hint::spin_loop();
    }

    fn pe_reachable(&self, pe: Pe) -> bool {
        pe >= 0 && (pe as usize) < self.world.npes
    }

    fn addr_reachable(&self, off: usize, pe: Pe) -> bool {
        self.world
            .seg(pe)
            .map(|seg| off < seg.len)
            .unwrap_or(false)
    }

    fn direct_pointer(&self, off: usize, pe: Pe) -> Option<NonNull<u8>> {
        let seg = self.world.seg(pe).ok()?;
        if off >= seg.len {
            return None;
        }
        NonNull::new((seg.base + off) as *mut u8)
    }

    fn same_node(&self, pe: Pe) -> bool {
        self.pe_reachable(pe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_of_two() -> (Arc<ThreadWorld>, ThreadTransport, ThreadTransport, Vec<u8>, Vec<u8>) {
        let world = ThreadWorld::new(2);
        let t0 = world.endpoint(0);
        let t1 = world.endpoint(1);
        let mut heap0 = vec![0u8; 4096];
        let mut heap1 = vec![0u8; 4096];
        unsafe {
            t0.register_heap(heap0.as_mut_ptr(), heap0.len()).unwrap();
            t1.register_heap(heap1.as_mut_ptr(), heap1.len()).unwrap();
        }
        (world, t0, t1, heap0, heap1)
    }

    #[test]
    fn put_get_round_trip() {
        let (_w, t0, _t1, _h0, h1) = world_of_two();
        t0.put(0, 1, 16, &[1, 2, 3, 4, 5]).unwrap();
        let mut back = [0u8; 5];
        t0.get(0, 1, 16, &mut back).unwrap();
        assert_eq!(back, [1, 2, 3, 4, 5]);
        assert_eq!(&h1[16..21], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn amo_fetch_add_returns_pre_image() {
        let (_w, t0, _t1, _h0, _h1) = world_of_two();
        let pre = t0
            .amo(0, 1, 0, AmoOp::FetchAdd, AmoWidth::W64, 5, 0)
            .unwrap();
        assert_eq!(pre, 0);
        let now = t0.amo(0, 1, 0, AmoOp::Fetch, AmoWidth::W64, 0, 0).unwrap();
        assert_eq!(now, 5);
    }

    #[test]
    fn compare_swap_only_stores_on_match() {
        let (_w, t0, _t1, _h0, _h1) = world_of_two();
        t0.amo(0, 1, 8, AmoOp::Set, AmoWidth::W32, 7, 0).unwrap();
        let pre = t0
            .amo(0, 1, 8, AmoOp::CompareSwap, AmoWidth::W32, 99, 3)
            .unwrap();
        assert_eq!(pre, 7);
        let now = t0.amo(0, 1, 8, AmoOp::Fetch, AmoWidth::W32, 0, 0).unwrap();
        assert_eq!(now, 7, "mismatched cswap must leave memory unchanged");
    }

    #[test]
    fn put_signal_orders_payload_before_signal() {
        let (_w, t0, _t1, _h0, h1) = world_of_two();
        t0.put_signal(0, 1, 64, &[0xab; 32], 0, 1, SignalOp::Add)
            .unwrap();
        let sig = t0.amo(0, 1, 0, AmoOp::Fetch, AmoWidth::W64, 0, 0).unwrap();
        assert_eq!(sig, 1);
        assert!(h1[64..96].iter().all(|&b| b == 0xab));
    }

    #[test]
    fn out_of_range_pe_is_unreachable() {
        let (_w, t0, _t1, _h0, _h1) = world_of_two();
        assert!(matches!(
            t0.put(0, 7, 0, &[0]),
            Err(RtError::Unreachable(7))
        ));
        assert!(!t0.pe_reachable(-1));
        assert!(t0.direct_pointer(0, 1).is_some());
    }
}
