//! Runtime configuration.
//!
//! A [`Config`] is handed to [`Shmem::init`](crate::Shmem::init); the core
//! never reads environment variables itself. Everything here has a sensible
//! default, so `Config::default()` is a working starting point and tests use
//! [`Config::small`].

use serde::{Deserialize, Serialize};

/// Requested / provided thread-safety level.
///
/// Ordered: a level guarantees everything the levels below it do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadLevel {
    /// Only the initializing thread calls into the library.
    Single,
    /// Any thread may initialize, but one thread per PE makes calls.
    Funneled,
    /// Multiple threads call, at most one at a time per PE.
    Serialized,
    /// Fully concurrent calls, subject to per-context rules.
    Multiple,
}

/// Barrier / sync algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierAlg {
    /// PE 0 collects arrivals, then broadcasts release.
    Linear,
    /// Complete tree of configurable degree.
    CompleteTree,
    /// Binomial tree (k-nomial with radix 2).
    BinomialTree,
    /// K-nomial tree with configurable radix.
    KnomialTree,
    /// log2(N) rounds of +2^k / -2^k signalling. Valid for any N.
    Dissemination,
}

/// Broadcast algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcastAlg {
    /// Root puts to every member.
    Linear,
    /// Pipelined top-down complete tree.
    CompleteTree,
    /// Binomial tree.
    BinomialTree,
    /// K-nomial tree.
    KnomialTree,
    /// K-nomial tree with data and sync merged into signalled puts.
    KnomialSignal,
    /// Root scatters pieces, then a ring all-gather completes them.
    ScatterCollect,
}

/// Fixed-size collect (fcollect) algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FcollectAlg {
    /// Everyone puts to everyone, per-PE arrival counters.
    Linear,
    /// Everyone puts to everyone, single exit barrier.
    AllLinear,
    /// XOR-partner doubling. Requires power-of-two team size.
    RecursiveDoubling,
    /// N-1 pass-along rounds over the ring.
    Ring,
    /// Doubling-distance shifts plus a final local rotation.
    Bruck,
    /// Bruck without the final rotation; the caller accepts rotated layout.
    BruckNoRotate,
    /// Pairwise neighbour exchange. Requires even team size.
    NeighborExchange,
}

/// Variable-size collect algorithm (the size-exchange phase is common).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectAlg {
    Linear,
    Ring,
}

/// Alltoall peer schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlltoallAlg {
    /// Round i exchanges with (me + i) mod N. Valid for any N.
    Shift,
    /// Round i exchanges with me XOR i. Requires power-of-two N.
    Xor,
    /// Edge-colouring schedule, pairwise for any N >= 2.
    Color,
}

/// Completion discipline for alltoall-class collectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDiscipline {
    /// Non-blocking puts, then a team barrier.
    Barrier,
    /// Atomic-increment a per-PE arrival counter, wait for N-1.
    Counter,
    /// Signalled puts into per-source slots, wait per slot.
    Signal,
}

/// Reduction algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceAlg {
    /// Root gathers and combines, then broadcasts.
    Linear,
    /// K-nomial reduce tree followed by a broadcast.
    TreeBroadcast,
    /// XOR-partner all-reduce. Requires power-of-two team size.
    RecursiveDoubling,
}

/// Per-collective algorithm selection.
///
/// Held by the runtime as the default and copied into each team at creation;
/// [`Team::set_algorithms`](crate::Team::set_algorithms) overrides per team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub barrier: BarrierAlg,
    pub broadcast: BcastAlg,
    pub fcollect: FcollectAlg,
    pub collect: CollectAlg,
    pub alltoall: AlltoallAlg,
    pub alltoall_sync: SyncDiscipline,
    pub reduce: ReduceAlg,
    /// Degree of the complete tree, radix of the k-nomial tree. Minimum 2.
    pub tree_degree: usize,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            barrier: BarrierAlg::Dissemination,
            broadcast: BcastAlg::BinomialTree,
            fcollect: FcollectAlg::Ring,
            collect: CollectAlg::Linear,
            alltoall: AlltoallAlg::Shift,
            alltoall_sync: SyncDiscipline::Counter,
            reduce: ReduceAlg::TreeBroadcast,
            tree_degree: 2,
        }
    }
}

/// Everything the runtime consumes at init.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Symmetric heap size in bytes per PE. Rounded up to the allocation
    /// quantum.
    pub heap_size: usize,

    /// Requested thread-safety level.
    pub thread_level: ThreadLevel,

    /// Default collective algorithms.
    pub algorithms: AlgorithmConfig,

    /// Maximum number of live teams, predefined teams included. At most 64.
    pub max_teams: usize,

    /// Bytes per half of each team's reduction bounce buffer.
    pub reduce_chunk: usize,

    /// Validate the pSync resting state on every collective entry/exit and
    /// panic on poisoning. Cheap; intended for tests and debugging.
    pub debug_checks: bool,

    /// Spin iterations before a polling loop starts yielding the CPU.
    pub spin_before_yield: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_size: 16 * 1024 * 1024,
            thread_level: ThreadLevel::Serialized,
            algorithms: AlgorithmConfig::default(),
            max_teams: 32,
            reduce_chunk: 2048,
            debug_checks: false,
            spin_before_yield: 10,
        }
    }
}

impl Config {
    /// A small footprint configuration with debug checks on. What the test
    /// suite runs with.
    pub fn small() -> Self {
        Self {
            heap_size: 1024 * 1024,
            debug_checks: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_levels_are_ordered() {
        assert!(ThreadLevel::Single < ThreadLevel::Funneled);
        assert!(ThreadLevel::Funneled < ThreadLevel::Serialized);
        assert!(ThreadLevel::Serialized < ThreadLevel::Multiple);
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = Config::small();
        let s = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&s).unwrap();
        assert_eq!(back.heap_size, c.heap_size);
        assert_eq!(back.algorithms, c.algorithms);
    }
}
