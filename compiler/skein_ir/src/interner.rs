//! String interner backing [`Name`].

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Name;

/// String interner with O(1) lookup and equality.
///
/// Interned strings are leaked into `'static` storage; an interner lives for
/// the whole trace session, so the leak is bounded by the set of distinct
/// identifiers encountered. Interior mutability lets the evaluator mint
/// synthetic names (loop counters, internal comprehension bindings) through a
/// shared reference.
pub struct Interner {
    inner: RwLock<InternerInner>,
}

struct InternerInner {
    map: FxHashMap<&'static str, Name>,
    strings: Vec<&'static str>,
}

impl Interner {
    /// Create a new interner with the empty string pre-interned as
    /// [`Name::EMPTY`].
    pub fn new() -> Self {
        let mut inner = InternerInner {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(64),
        };
        inner.map.insert("", Name::EMPTY);
        inner.strings.push("");
        Interner {
            inner: RwLock::new(inner),
        }
    }

    /// Intern a string, returning its `Name`.
    pub fn intern(&self, s: &str) -> Name {
        {
            let guard = self.inner.read();
            if let Some(&name) = guard.map.get(s) {
                return name;
            }
        }
        let mut guard = self.inner.write();
        // Re-check under the write lock; another caller may have won the race.
        if let Some(&name) = guard.map.get(s) {
            return name;
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let name = Name::from_raw(guard.strings.len() as u32);
        guard.map.insert(leaked, name);
        guard.strings.push(leaked);
        name
    }

    /// Look up the string for a `Name`.
    ///
    /// Returns the empty string for names this interner never produced.
    pub fn lookup(&self, name: Name) -> &'static str {
        self.inner
            .read()
            .strings
            .get(name.raw() as usize)
            .copied()
            .unwrap_or("")
    }

    /// Number of interned strings (including the pre-interned empty string).
    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    /// Always false: the empty string is pre-interned.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let interner = Interner::new();
        let a = interner.intern("alpha");
        let b = interner.intern("alpha");
        assert_eq!(a, b);
        assert_eq!(interner.lookup(a), "alpha");
    }

    #[test]
    fn distinct_strings_get_distinct_names() {
        let interner = Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_string_is_name_empty() {
        let interner = Interner::new();
        assert_eq!(interner.intern(""), Name::EMPTY);
        assert_eq!(interner.lookup(Name::EMPTY), "");
    }

    #[test]
    fn unknown_name_looks_up_empty() {
        let interner = Interner::new();
        assert_eq!(interner.lookup(Name::from_raw(9999)), "");
    }
}
