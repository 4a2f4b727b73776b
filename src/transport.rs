//! The byte-level transport seam.
//!
//! Everything that actually moves bytes between PEs lives behind the
//! [`Transport`] trait: bulk put/get, remote atomics, signalled puts, and the
//! fence/quiet ordering points. The engines above it (`rma`, `amo`, `signal`,
//! `collectives`) speak **heap offsets**, never remote virtual addresses;
//! where the remote heap happens to be load/store mappable the transport says
//! so through [`Transport::direct_pointer`].
//!
//! Operations are grouped into **streams**, one per communication context.
//! `fence(stream)` orders the stream's remote stores per target PE;
//! `quiet(stream)` completes everything outstanding on the stream. A
//! transport is free to complete operations eagerly (the in-process
//! [`thread`] transport does), in which case both are cheap memory fences.

#[cfg(feature = "thread-transport")]
pub mod thread;

use crate::error::Result;
use std::ptr::NonNull;

/// PE identity. Plain integer in `[0, n_pes)`, fixed from init to finalize.
pub type Pe = i32;

/// Ordering stream identifier; one per context. Stream `0` is the default
/// context's stream.
pub type StreamId = u64;

/// Operand width of a remote atomic. The transport carries 32- and 64-bit
/// atomics only; narrower types are RMA-typed but not AMO-capable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmoWidth {
    W32,
    W64,
}

impl AmoWidth {
    pub fn bytes(self) -> usize {
        match self {
            AmoWidth::W32 => 4,
            AmoWidth::W64 => 8,
        }
    }
}

/// Remote atomic opcode.
///
/// Fetching variants return the pre-image; non-fetching variants return an
/// unspecified value that callers must ignore. `CompareSwap` only stores when
/// the pre-image equals the `compare` operand, and always returns the
/// pre-image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmoOp {
    Swap,
    CompareSwap,
    Add,
    FetchAdd,
    Fetch,
    Set,
    And,
    FetchAnd,
    Or,
    FetchOr,
    Xor,
    FetchXor,
}

impl AmoOp {
    /// Whether the pre-image this op returns is meaningful to the caller.
    pub fn fetches(self) -> bool {
        matches!(
            self,
            AmoOp::Swap
                | AmoOp::CompareSwap
                | AmoOp::FetchAdd
                | AmoOp::Fetch
                | AmoOp::FetchAnd
                | AmoOp::FetchOr
                | AmoOp::FetchXor
        )
    }
}

/// How a signalled put updates the signal word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOp {
    /// Store the signal value.
    Set,
    /// Atomically add the signal value.
    Add,
}

impl SignalOp {
    /// Stable integer code, exported to bindings.
    pub fn code(self) -> i32 {
        match self {
            SignalOp::Set => 0,
            SignalOp::Add => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SignalOp::Set),
            1 => Some(SignalOp::Add),
            _ => None,
        }
    }
}

/// The consumed transport interface.
///
/// Implementations are thread-safe at the level the runtime promised its
/// caller; the engines never hold locks across transport calls.
pub trait Transport: Send + Sync {
    /// This endpoint's PE identity.
    fn my_pe(&self) -> Pe;

    /// World size. Fixed for the lifetime of the job.
    fn n_pes(&self) -> Pe;

    /// Publish the local symmetric heap so peers can address it by offset.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes until the
    /// endpoint is dropped, and must not move. Peers will access it
    /// concurrently with local loads and stores.
    unsafe fn register_heap(&self, base: *mut u8, len: usize) -> Result<()>;

    /// Bulk copy `src` into PE `pe`'s heap at `dst_off`.
    ///
    /// On return the source buffer is reusable; remote visibility is only
    /// guaranteed after [`Transport::quiet`] (or a signal delivered on the
    /// same stream).
    fn put(&self, stream: StreamId, pe: Pe, dst_off: usize, src: &[u8]) -> Result<()>;

    /// Bulk copy from PE `pe`'s heap at `src_off` into `dst`. Blocking: on
    /// return `dst` holds the remote bytes.
    fn get(&self, stream: StreamId, pe: Pe, src_off: usize, dst: &mut [u8]) -> Result<()>;

    /// Remote atomic on a naturally aligned 32/64-bit word at `off`.
    ///
    /// `operand` and `compare` are zero-extended bit patterns; the return
    /// value is the pre-image bit pattern (meaningful only when
    /// [`AmoOp::fetches`]).
    fn amo(
        &self,
        stream: StreamId,
        pe: Pe,
        off: usize,
        op: AmoOp,
        width: AmoWidth,
        operand: u64,
        compare: u64,
    ) -> Result<u64>;

    /// Put `src` at `dst_off`, then update the 64-bit signal word at
    /// `sig_off` per `sig_op`, such that an observer who sees the signal
    /// update also sees the full payload. `src` may be empty (pure signal).
    fn put_signal(
        &self,
        stream: StreamId,
        pe: Pe,
        dst_off: usize,
        src: &[u8],
        sig_off: usize,
        sig_val: u64,
        sig_op: SignalOp,
    ) -> Result<()>;

    /// Order all stores issued so far on `stream` before all subsequent
    /// stores on `stream`, per target PE.
    fn fence(&self, stream: StreamId) -> Result<()>;

    /// Complete every outstanding operation on `stream`: remote effects
    /// visible, local buffers reusable, fetched values landed.
    fn quiet(&self, stream: StreamId) -> Result<()>;

    /// Pump inbound traffic. Busy-wait loops call this every iteration.
    fn progress(&self);

    /// Whether `pe` is a valid, reachable peer.
    fn pe_reachable(&self, pe: Pe) -> bool;

    /// Whether heap offset `off` on `pe` can be targeted by RMA.
    fn addr_reachable(&self, off: usize, pe: Pe) -> bool;

    /// A local alias for heap offset `off` on `pe`, when the remote heap is
    /// load/store mappable from here (same node, shared memory). `None`
    /// otherwise.
    fn direct_pointer(&self, off: usize, pe: Pe) -> Option<NonNull<u8>>;

    /// Whether `pe` shares a node (and hence potentially memory) with this
    /// endpoint.
    fn same_node(&self, pe: Pe) -> bool;
}
