//! Sharded metrics: per-thread hot-path writes, periodic fold into global totals.
//!
//! Two disjoint compile-time key sets exist per metric kind: single-threaded
//! (ST, written only from the reactor thread and stored directly in the
//! global totals) and multi-threaded (MT, written from any thread into a
//! thread-local shard and merged into the global totals on a cooperative
//! fold). The required counter keys (`net.bytes_received`, the socket- and
//! accept-error families) are all MT: they sit on the channel/reactor hot
//! path and the whole point of sharding is to keep that path lock-free even
//! though, in this single-reactor build, only one thread currently produces
//! them. `reactor.loop_iterations` and `pool.active_channels` are ST — pool
//! and reactor state are touched only by the reactor thread by construction
//! (spec §5), so there is nothing to shard.

use crate::keyed::{index_of_in, KeySet, KeyedArray};
use std::cell::RefCell;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Which path a metric key takes: direct-to-global, or shard-then-fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Written only by the reactor thread; stored directly in the global totals.
    St,
    /// Written from any thread; buffered in a thread-local shard until folded.
    Mt,
}

/// A counter key: resolves to a discipline and both a shard-local and a
/// global slot index, each computed at the key's `impl` site so an unknown
/// name fails to compile rather than panicking at runtime.
pub trait CounterKey: 'static {
    /// The metric's stable name, part of the external dashboard contract (spec §6).
    const NAME: &'static str;
    /// ST or MT.
    const DISCIPLINE: Discipline;
    /// Index into the global totals array.
    const GLOBAL_INDEX: usize;
    /// Index into the per-thread shard array. Meaningless (0) for ST keys.
    const LOCAL_INDEX: usize;
}

/// A gauge key, mirroring [`CounterKey`].
pub trait GaugeKey: 'static {
    /// The metric's stable name.
    const NAME: &'static str;
    /// ST or MT.
    const DISCIPLINE: Discipline;
    /// Index into the global totals array.
    const GLOBAL_INDEX: usize;
    /// Index into the per-thread shard array. Meaningless (0) for ST keys.
    const LOCAL_INDEX: usize;
}

/// Every counter key known to the process — the index space the global
/// totals array uses.
pub struct AllCounterKeys;
impl KeySet for AllCounterKeys {
    const KEYS: &'static [&'static str] = &[
        "net.bytes_received",
        "net.bytes_sent",
        "net.socket_error.total",
        "net.socket_error.econnreset",
        "net.socket_error.etimedout",
        "net.socket_error.epipe",
        "net.socket_error.enetdown",
        "net.socket_error.other",
        "net.accept_error.emfile",
        "net.accept_error.enfile",
        "net.accept_error.enobufs",
        "net.accept_error.other",
        "reactor.loop_iterations",
    ];
}

/// The MT subset of counter keys — the ones a per-thread shard buffers.
pub struct MtCounterKeys;
impl KeySet for MtCounterKeys {
    const KEYS: &'static [&'static str] = &[
        "net.bytes_received",
        "net.bytes_sent",
        "net.socket_error.total",
        "net.socket_error.econnreset",
        "net.socket_error.etimedout",
        "net.socket_error.epipe",
        "net.socket_error.enetdown",
        "net.socket_error.other",
        "net.accept_error.emfile",
        "net.accept_error.enfile",
        "net.accept_error.enobufs",
        "net.accept_error.other",
    ];
}

/// Every gauge key known to the process.
pub struct AllGaugeKeys;
impl KeySet for AllGaugeKeys {
    const KEYS: &'static [&'static str] = &["pool.active_channels"];
}

/// The MT subset of gauge keys. Empty today — nothing outside the reactor
/// thread sets an additive gauge yet — but the fold path is fully general
/// and exercised by the property tests below.
pub struct MtGaugeKeys;
impl KeySet for MtGaugeKeys {
    const KEYS: &'static [&'static str] = &[];
}

macro_rules! mt_counter_key {
    ($ty:ident, $name:literal) => {
        /// Counter key.
        pub struct $ty;
        impl CounterKey for $ty {
            const NAME: &'static str = $name;
            const DISCIPLINE: Discipline = Discipline::Mt;
            const GLOBAL_INDEX: usize = index_of_in(AllCounterKeys::KEYS, $name);
            const LOCAL_INDEX: usize = index_of_in(MtCounterKeys::KEYS, $name);
        }
    };
}

macro_rules! st_counter_key {
    ($ty:ident, $name:literal) => {
        /// Counter key.
        pub struct $ty;
        impl CounterKey for $ty {
            const NAME: &'static str = $name;
            const DISCIPLINE: Discipline = Discipline::St;
            const GLOBAL_INDEX: usize = index_of_in(AllCounterKeys::KEYS, $name);
            const LOCAL_INDEX: usize = 0;
        }
    };
}

macro_rules! st_gauge_key {
    ($ty:ident, $name:literal) => {
        /// Gauge key.
        pub struct $ty;
        impl GaugeKey for $ty {
            const NAME: &'static str = $name;
            const DISCIPLINE: Discipline = Discipline::St;
            const GLOBAL_INDEX: usize = index_of_in(AllGaugeKeys::KEYS, $name);
            const LOCAL_INDEX: usize = 0;
        }
    };
}

mt_counter_key!(BytesReceived, "net.bytes_received");
mt_counter_key!(BytesSent, "net.bytes_sent");
mt_counter_key!(SocketErrorTotal, "net.socket_error.total");
mt_counter_key!(SocketErrorEconnreset, "net.socket_error.econnreset");
mt_counter_key!(SocketErrorEtimedout, "net.socket_error.etimedout");
mt_counter_key!(SocketErrorEpipe, "net.socket_error.epipe");
mt_counter_key!(SocketErrorEnetdown, "net.socket_error.enetdown");
mt_counter_key!(SocketErrorOther, "net.socket_error.other");
mt_counter_key!(AcceptErrorEmfile, "net.accept_error.emfile");
mt_counter_key!(AcceptErrorEnfile, "net.accept_error.enfile");
mt_counter_key!(AcceptErrorEnobufs, "net.accept_error.enobufs");
mt_counter_key!(AcceptErrorOther, "net.accept_error.other");
st_counter_key!(ReactorLoopIterations, "reactor.loop_iterations");

st_gauge_key!(PoolActiveChannels, "pool.active_channels");

struct GlobalTotals {
    counters: KeyedArray<u64, AllCounterKeys>,
    gauges: KeyedArray<u64, AllGaugeKeys>,
}

struct ShardState {
    counters: KeyedArray<u64, MtCounterKeys>,
    gauges_current: KeyedArray<u64, MtGaugeKeys>,
    gauges_last_synced: KeyedArray<u64, MtGaugeKeys>,
    last_fold: Instant,
}

impl ShardState {
    fn new() -> Self {
        Self {
            counters: KeyedArray::new(),
            gauges_current: KeyedArray::new(),
            gauges_last_synced: KeyedArray::new(),
            last_fold: Instant::now(),
        }
    }

    fn fold_into(&mut self, global: &mut GlobalTotals) {
        global.counters.add_assign_subset(&self.counters);
        fold_additive_gauges(&mut global.gauges, &self.gauges_current, &mut self.gauges_last_synced);
        self.counters = KeyedArray::new();
    }
}

impl Drop for ShardState {
    fn drop(&mut self) {
        // Thread termination forces an unconditional fold (spec §4.3/§4.5
        // lifecycles). Talk to the global totals directly rather than via
        // `SHARD.with`, since touching a thread_local from its own drop glue
        // is not guaranteed to work.
        let metrics = Metrics::global();
        let mut global = metrics.global.lock().unwrap();
        self.fold_into(&mut global);
    }
}

/// Apply each shard gauge's `current - last_synced` delta (signed-wrap
/// arithmetic) onto `global`, then advance `last_synced` to `current`.
///
/// Pure and generic so the fold law in spec §8 can be property-tested
/// without any thread-local or process-global state.
pub(crate) fn fold_additive_gauges<Global: KeySet, Shard: KeySet>(
    global: &mut KeyedArray<u64, Global>,
    current: &KeyedArray<u64, Shard>,
    last_synced: &mut KeyedArray<u64, Shard>,
) {
    for (i, key) in Shard::KEYS.iter().enumerate() {
        let delta = current.get(i).wrapping_sub(*last_synced.get(i));
        let gi = Global::index_of(key);
        let slot = global.get_mut(gi);
        *slot = slot.wrapping_add(delta);
        *last_synced.get_mut(i) = *current.get(i);
    }
}

thread_local! {
    static SHARD: RefCell<Option<ShardState>> = RefCell::new(None);
}

/// Process-wide metrics registry. Access it through [`Metrics::global`].
pub struct Metrics {
    global: Mutex<GlobalTotals>,
}

static GLOBAL_METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new() -> Self {
        Self {
            global: Mutex::new(GlobalTotals { counters: KeyedArray::new(), gauges: KeyedArray::new() }),
        }
    }

    /// The single process-wide metrics instance, created on first access.
    pub fn global() -> &'static Metrics {
        GLOBAL_METRICS.get_or_init(Metrics::new)
    }
}

/// Add `n` to counter `K`: thread-local shard for MT keys, direct global
/// write (under the fold mutex) for ST keys.
pub fn add_counter<K: CounterKey>(n: u64) {
    match K::DISCIPLINE {
        Discipline::Mt => SHARD.with(|cell| {
            let mut slot = cell.borrow_mut();
            let shard = slot.get_or_insert_with(ShardState::new);
            *shard.counters.get_mut(K::LOCAL_INDEX) += n;
        }),
        Discipline::St => {
            let mut global = Metrics::global().global.lock().unwrap();
            *global.counters.get_mut(K::GLOBAL_INDEX) += n;
        }
    }
}

/// `add_counter::<K>(1)`.
pub fn inc_counter<K: CounterKey>() {
    add_counter::<K>(1);
}

/// Set gauge `K` to `v`: thread-local shard "current" for MT keys, direct
/// global write for ST keys.
pub fn set_gauge<K: GaugeKey>(v: u64) {
    match K::DISCIPLINE {
        Discipline::Mt => SHARD.with(|cell| {
            let mut slot = cell.borrow_mut();
            let shard = slot.get_or_insert_with(ShardState::new);
            *shard.gauges_current.get_mut(K::LOCAL_INDEX) = v;
        }),
        Discipline::St => {
            let mut global = Metrics::global().global.lock().unwrap();
            *global.gauges.get_mut(K::GLOBAL_INDEX) = v;
        }
    }
}

/// Cooperative per-thread fold: a no-op unless at least `min_interval` has
/// elapsed since this thread's last fold (or it has never folded).
pub fn flush_thread(min_interval: Duration) {
    SHARD.with(|cell| {
        let mut slot = cell.borrow_mut();
        let Some(shard) = slot.as_mut() else { return };
        if shard.last_fold.elapsed() < min_interval {
            return;
        }
        let metrics = Metrics::global();
        let mut global = metrics.global.lock().unwrap();
        shard.fold_into(&mut global);
        drop(global);
        shard.last_fold = Instant::now();
    });
}

/// Read counter `K`'s global value. Takes the fold mutex; intended for
/// tests and periodic reporting rather than the hot path.
pub fn get_counter<K: CounterKey>() -> u64 {
    let global = Metrics::global().global.lock().unwrap();
    *global.counters.get(K::GLOBAL_INDEX)
}

/// Read gauge `K`'s global value.
pub fn get_gauge<K: GaugeKey>() -> u64 {
    let global = Metrics::global().global.lock().unwrap();
    *global.gauges.get(K::GLOBAL_INDEX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct TestCounterKeys;
    impl KeySet for TestCounterKeys {
        const KEYS: &'static [&'static str] = &["x"];
    }

    struct TestGaugeKeys;
    impl KeySet for TestGaugeKeys {
        const KEYS: &'static [&'static str] = &["g"];
    }

    #[test]
    fn counter_monotonic_fold_across_threads() {
        let threads = 8;
        let increments_per_thread = 1000u64;

        let shards: Vec<KeyedArray<u64, TestCounterKeys>> = (0..threads)
            .map(|_| {
                thread::spawn(move || {
                    let mut local: KeyedArray<u64, TestCounterKeys> = KeyedArray::new();
                    for _ in 0..increments_per_thread {
                        *local.get_mut(0) += 1;
                    }
                    local
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let mut global: KeyedArray<u64, TestCounterKeys> = KeyedArray::new();
        for shard in &shards {
            global.add_assign_subset(shard);
        }

        assert_eq!(*global.get(0), threads as u64 * increments_per_thread);
    }

    #[test]
    fn additive_gauge_fold_sums_per_thread_sets() {
        let values = [3u64, 10, 7, 250];

        let mut global: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();
        for &v in &values {
            let mut current: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();
            let mut last_synced: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();
            *current.get_mut(0) = v;
            fold_additive_gauges(&mut global, &current, &mut last_synced);
        }

        assert_eq!(*global.get(0), values.iter().sum::<u64>());
    }

    #[test]
    fn gauge_fold_handles_decreasing_values_via_wraparound() {
        let mut global: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();
        let mut current: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();
        let mut last_synced: KeyedArray<u64, TestGaugeKeys> = KeyedArray::new();

        *current.get_mut(0) = 100;
        fold_additive_gauges(&mut global, &current, &mut last_synced);
        assert_eq!(*global.get(0), 100);

        *current.get_mut(0) = 40;
        fold_additive_gauges(&mut global, &current, &mut last_synced);
        assert_eq!(*global.get(0), 40);
    }

    #[test]
    fn production_counter_end_to_end_through_shard_and_fold() {
        let before = get_counter::<BytesReceived>();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                thread::spawn(|| {
                    for _ in 0..250 {
                        inc_counter::<BytesReceived>();
                    }
                    flush_thread(Duration::ZERO);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(get_counter::<BytesReceived>() - before, 1000);
    }

    #[test]
    fn flush_thread_is_cooperative_below_min_interval() {
        let before = get_counter::<BytesSent>();
        inc_counter::<BytesSent>();
        // A huge min_interval guarantees this call is a no-op.
        flush_thread(Duration::from_secs(3600));
        // The increment is still only visible in the shard, not yet folded.
        assert_eq!(get_counter::<BytesSent>(), before);
        flush_thread(Duration::ZERO);
        assert_eq!(get_counter::<BytesSent>() - before, 1);
    }

    #[test]
    fn st_counter_is_visible_without_a_fold() {
        let before = get_counter::<ReactorLoopIterations>();
        inc_counter::<ReactorLoopIterations>();
        assert_eq!(get_counter::<ReactorLoopIterations>() - before, 1);
    }
}
