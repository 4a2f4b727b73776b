//! Communication contexts.
//!
//! A [`Ctx`] names an independent ordering stream: fence/quiet on one context
//! says nothing about another. The default context (stream 0) always exists
//! and cannot be destroyed. The registry is a plain id counter plus a map of
//! live contexts, mutated under the runtime's lock.

use crate::error::{Result, RtError};
use crate::runtime::Shmem;
use crate::transport::StreamId;
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// Context creation options.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CtxOptions: u32 {
        /// Only one thread at a time uses the context.
        const SERIALIZED = 1;
        /// Only the creating thread uses the context.
        const PRIVATE = 2;
        /// The implementation may discard store ordering on the context.
        const NOSTORE = 4;
    }
}

/// Id of the built-in default context.
pub(crate) const DEFAULT_CTX: StreamId = 0;

pub(crate) struct CtxState {
    pub(crate) id: StreamId,
    pub(crate) options: CtxOptions,
}

/// An ordered communication context. Cheap to clone; all clones share the
/// same ordering stream.
#[derive(Clone)]
pub struct Ctx {
    pub(crate) rt: Shmem,
    pub(crate) state: Arc<CtxState>,
}

impl Ctx {
    /// The options the context was created with.
    pub fn options(&self) -> CtxOptions {
        self.state.options
    }

    /// Whether this is the built-in default context.
    pub fn is_default(&self) -> bool {
        self.state.id == DEFAULT_CTX
    }

    pub(crate) fn stream(&self) -> StreamId {
        self.state.id
    }
}

pub(crate) struct CtxRegistry {
    next_id: StreamId,
    live: HashMap<StreamId, CtxOptions>,
}

impl CtxRegistry {
    pub(crate) fn new() -> Self {
        let mut live = HashMap::new();
        live.insert(DEFAULT_CTX, CtxOptions::empty());
        Self { next_id: 1, live }
    }

    fn create(&mut self, options: CtxOptions) -> StreamId {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, options);
        id
    }

    fn destroy(&mut self, id: StreamId) -> Result<()> {
        self.live
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RtError::invalid(format!("context {id} is not live")))
    }
}

impl Shmem {
    /// Create a context with the given options.
    pub fn ctx_create(&self, options: CtxOptions) -> Result<Ctx> {
        self.inner.check_ready()?;
        let id = self.inner.ctxs.lock().unwrap().create(options);
        tracing::trace!(id, ?options, "context created");
        Ok(Ctx {
            rt: self.clone(),
            state: Arc::new(CtxState { id, options }),
        })
    }

    /// Create a context from raw option bits, as a binding would. Unknown
    /// bits are an error.
    pub fn ctx_create_from_bits(&self, bits: u32) -> Result<Ctx> {
        let options = CtxOptions::from_bits(bits)
            .ok_or_else(|| RtError::invalid(format!("unknown context option bits {bits:#x}")))?;
        self.ctx_create(options)
    }

    /// Destroy a context. Outstanding operations are quieted first; the
    /// default context cannot be destroyed.
    pub fn ctx_destroy(&self, ctx: Ctx) -> Result<()> {
        self.inner.check_ready()?;
        if ctx.is_default() {
            return Err(RtError::invalid("the default context cannot be destroyed"));
        }
        self.inner.transport.quiet(ctx.stream())?;
        self.inner.ctxs.lock().unwrap().destroy(ctx.stream())?;
        tracing::trace!(id = ctx.stream(), "context destroyed");
        Ok(())
    }

    /// The built-in default context.
    pub fn default_ctx(&self) -> Ctx {
        Ctx {
            rt: self.clone(),
            state: Arc::clone(&self.inner.default_ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_hands_out_fresh_ids() {
        let mut r = CtxRegistry::new();
        let a = r.create(CtxOptions::SERIALIZED);
        let b = r.create(CtxOptions::empty());
        assert_ne!(a, b);
        assert_ne!(a, DEFAULT_CTX);
        r.destroy(a).unwrap();
        assert!(r.destroy(a).is_err());
        r.destroy(b).unwrap();
    }

    #[test]
    fn option_bits_match_the_exported_constants() {
        assert_eq!(CtxOptions::SERIALIZED.bits(), 1);
        assert_eq!(CtxOptions::PRIVATE.bits(), 2);
        assert_eq!(CtxOptions::NOSTORE.bits(), 4);
        assert!(CtxOptions::from_bits(8).is_none());
    }
}
