//! Lightweight per-runtime operation counters.
//!
//! Counting is free-running and lock-free; a [`StatsSnapshot`] can be
//! printed, serialized to JSON, or written to a file after a run. With the
//! `stats` feature disabled the counters compile away entirely.

/// What happened, for accounting purposes.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Op {
    Put,
    Get,
    Amo,
    Signal,
    Wait,
    Collective,
    HeapAlloc,
    HeapFree,
    Lock,
}

#[cfg(feature = "stats")]
mod enabled {
    use super::Op;
    use serde::Serialize;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Free-running operation counters for one runtime.
    #[derive(Default)]
    pub struct Stats {
        puts: AtomicU64,
        gets: AtomicU64,
        amos: AtomicU64,
        signals: AtomicU64,
        waits: AtomicU64,
        collectives: AtomicU64,
        heap_allocs: AtomicU64,
        heap_frees: AtomicU64,
        locks: AtomicU64,
    }

    impl Stats {
        pub(crate) fn bump(&self, op: Op) {
            let counter = match op {
                Op::Put => &self.puts,
                Op::Get => &self.gets,
                Op::Amo => &self.amos,
                Op::Signal => &self.signals,
                Op::Wait => &self.waits,
                Op::Collective => &self.collectives,
                Op::HeapAlloc => &self.heap_allocs,
                Op::HeapFree => &self.heap_frees,
                Op::Lock => &self.locks,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        pub(crate) fn snapshot(&self, pe: i32) -> StatsSnapshot {
            StatsSnapshot {
                pe,
                puts: self.puts.load(Ordering::Relaxed),
                gets: self.gets.load(Ordering::Relaxed),
                amos: self.amos.load(Ordering::Relaxed),
                signals: self.signals.load(Ordering::Relaxed),
                waits: self.waits.load(Ordering::Relaxed),
                collectives: self.collectives.load(Ordering::Relaxed),
                heap_allocs: self.heap_allocs.load(Ordering::Relaxed),
                heap_frees: self.heap_frees.load(Ordering::Relaxed),
                locks: self.locks.load(Ordering::Relaxed),
            }
        }
    }

    /// A point-in-time copy of one runtime's counters.
    #[derive(Clone, Debug, Serialize)]
    pub struct StatsSnapshot {
        pub pe: i32,
        pub puts: u64,
        pub gets: u64,
        pub amos: u64,
        pub signals: u64,
        pub waits: u64,
        pub collectives: u64,
        pub heap_allocs: u64,
        pub heap_frees: u64,
        pub locks: u64,
    }

    impl StatsSnapshot {
        /// The snapshot as a JSON value.
        pub fn to_json(&self) -> serde_json::Value {
            serde_json::to_value(self).expect("snapshot serialization cannot fail")
        }

        /// Print the snapshot to stdout, one counter per line.
        pub fn print(&self) {
            println!("PE {} operation counters:", self.pe);
            for (name, v) in [
                ("puts", self.puts),
                ("gets", self.gets),
                ("amos", self.amos),
                ("signals", self.signals),
                ("waits", self.waits),
                ("collectives", self.collectives),
                ("heap_allocs", self.heap_allocs),
                ("heap_frees", self.heap_frees),
                ("locks", self.locks),
            ] {
                println!("  {name:<12} {v}");
            }
        }

        /// Write the snapshot to `path` as pretty JSON.
        pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
            let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
            let mut f = std::fs::File::create(path)?;
            f.write_all(json.as_bytes())
        }
    }

}

#[cfg(feature = "stats")]
pub use enabled::{Stats, StatsSnapshot};

#[cfg(not(feature = "stats"))]
mod disabled {
    use super::Op;

    /// Zero-sized stand-in when the `stats` feature is off.
    #[derive(Default)]
    pub struct Stats;

    impl Stats {
        #[inline]
        pub(crate) fn bump(&self, _op: Op) {}
    }
}

#[cfg(not(feature = "stats"))]
pub use disabled::Stats;
