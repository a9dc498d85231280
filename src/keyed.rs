//! Compile-time keyed array: a statically sized array indexed by string key.
//!
//! The metrics subsystem needs fixed, named slots it can address without a
//! runtime hash lookup on the hot path. Rust has no first-class "set of
//! string literals" const generic, so this module models the same contract
//! with a `KeySet` trait implemented by a zero-sized marker type per metric
//! kind: the marker supplies the ordered key list, and [`index_of_in`] gives
//! every such type a `const fn` index lookup. Using a key not present in the
//! set is a compile error wherever that lookup feeds a `const` binding (as
//! every generated counter/gauge key's `GLOBAL_INDEX`/`LOCAL_INDEX` does),
//! since the `panic!` it hits is a const-eval failure, not a runtime trap.

/// Resolve `key` to its index within `keys`, panicking if absent.
///
/// A free `const fn`, not a trait method: stable Rust does not allow `const
/// fn` in a trait (E0379), but a key/index mapping that a marker type's
/// associated consts can lean on has to be callable from a `const` context.
/// Called from a `const` binding (as every `CounterKey`/`GaugeKey` impl in
/// `metrics.rs` does for `GLOBAL_INDEX`/`LOCAL_INDEX`), an unknown key's
/// `panic!` is a const-eval failure, i.e. a compile error, not a runtime trap.
pub const fn index_of_in(keys: &[&str], key: &str) -> usize {
    const fn str_eq(a: &str, b: &str) -> bool {
        let (a, b) = (a.as_bytes(), b.as_bytes());
        if a.len() != b.len() {
            return false;
        }
        let mut i = 0;
        while i < a.len() {
            if a[i] != b[i] {
                return false;
            }
            i += 1;
        }
        true
    }

    let mut i = 0;
    while i < keys.len() {
        if str_eq(keys[i], key) {
            return i;
        }
        i += 1;
    }
    panic!("key not present in KeySet");
}

/// A fixed, ordered set of string keys known at compile time.
///
/// Implementors are zero-sized marker types; the trait exists purely to
/// carry a `const` key list. Resolving a key to its slot index is
/// [`index_of_in`] (a free function, for the const-context reason given
/// there); [`Self::index_of`] is a runtime-only convenience wrapper over it.
pub trait KeySet: 'static {
    /// The ordered key list. Index into this array *is* the slot index.
    const KEYS: &'static [&'static str];

    /// Resolve `key` to its slot index at runtime. Not callable from a
    /// `const` context — use [`index_of_in`]`(Self::KEYS, key)` there.
    fn index_of(key: &str) -> usize {
        index_of_in(Self::KEYS, key)
    }

    /// True iff `Other`'s keys are a subset of `Self`'s keys.
    fn is_superset_of<Other: KeySet>() -> bool {
        Other::KEYS.iter().all(|k| Self::KEYS.contains(k))
    }
}

/// A fixed-size array of `T`, one slot per key in `K`.
///
/// `get::<NAME>()`-style access is expressed as `get(K::index_of("name"))` at
/// the call site (stable Rust has no const-generic string parameters), but
/// every call site resolves its index through the same `const fn`, so a typo
/// is caught the moment that expression is evaluated in a `const` binding.
#[derive(Debug, Clone)]
pub struct KeyedArray<T, K: KeySet> {
    slots: Vec<T>,
    _marker: std::marker::PhantomData<K>,
}

impl<T: Default + Clone, K: KeySet> KeyedArray<T, K> {
    /// Build a new keyed array with one default-valued slot per key.
    pub fn new() -> Self {
        Self { slots: vec![T::default(); K::KEYS.len()], _marker: std::marker::PhantomData }
    }
}

impl<T: Default + Clone, K: KeySet> Default for KeyedArray<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K: KeySet> KeyedArray<T, K> {
    /// Direct reference into the slot for `index` (resolve via `K::index_of`).
    pub fn get(&self, index: usize) -> &T {
        &self.slots[index]
    }

    /// Mutable reference into the slot for `index`.
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }

    /// Invoke `visitor(key, value)` for every slot, in key order.
    pub fn for_each_key(&self, mut visitor: impl FnMut(&'static str, &T)) {
        for (i, key) in K::KEYS.iter().enumerate() {
            visitor(key, &self.slots[i]);
        }
    }
}

impl<K: KeySet> KeyedArray<u64, K> {
    /// Elementwise `+=` restricted to `Other`'s keys being a subset of `K`'s.
    ///
    /// Panics (an invariant violation, not a spec-level runtime condition)
    /// if `Other` is not a subset of `K` — callers are expected to only ever
    /// instantiate this with compile-time-known, statically nested key sets.
    pub fn add_assign_subset<Other: KeySet>(&mut self, other: &KeyedArray<u64, Other>) {
        debug_assert!(K::is_superset_of::<Other>(), "key set mismatch in add_assign_subset");
        for (i, key) in Other::KEYS.iter().enumerate() {
            let target = K::index_of(key);
            self.slots[target] += other.slots[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Wide;
    impl KeySet for Wide {
        const KEYS: &'static [&'static str] = &["a", "b", "c"];
    }

    struct Narrow;
    impl KeySet for Narrow {
        const KEYS: &'static [&'static str] = &["a", "c"];
    }

    #[test]
    fn index_of_resolves_known_keys() {
        assert_eq!(Wide::index_of("a"), 0);
        assert_eq!(Wide::index_of("b"), 1);
        assert_eq!(Wide::index_of("c"), 2);
    }

    #[test]
    #[should_panic]
    fn index_of_panics_on_unknown_key() {
        let _ = Wide::index_of("z");
    }

    #[test]
    fn narrow_is_subset_of_wide() {
        assert!(Wide::is_superset_of::<Narrow>());
        assert!(!Narrow::is_superset_of::<Wide>());
    }

    #[test]
    fn subset_add_assign_touches_only_shared_slots() {
        let mut wide: KeyedArray<u64, Wide> = KeyedArray::new();
        *wide.get_mut(Wide::index_of("b")) = 100;

        let mut narrow: KeyedArray<u64, Narrow> = KeyedArray::new();
        *narrow.get_mut(Narrow::index_of("a")) = 5;
        *narrow.get_mut(Narrow::index_of("c")) = 7;

        wide.add_assign_subset(&narrow);

        assert_eq!(*wide.get(Wide::index_of("a")), 5);
        assert_eq!(*wide.get(Wide::index_of("b")), 100);
        assert_eq!(*wide.get(Wide::index_of("c")), 7);
    }
}
