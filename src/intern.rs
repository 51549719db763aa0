//! String interning and userdata allocation.
//!
//! Every string used as a table key is interned into a single canonical
//! object so that key comparison can be pointer equality instead of a byte
//! compare, and so that repeated strings do not duplicate storage. The pool
//! is an open-chained hash table of its own, doubling when load exceeds one
//! entry per bucket, exactly as the reference string table does.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::alloc::try_reserve;
use crate::error::TableError;
use crate::gc::{Collector, Color, NullCollector};
use crate::value::TableRef;

/// Initial bucket count for a fresh [`Intern`] pool. Mirrors the reference
/// VM's `MINSTRTABSIZE`, which starts the string table pre-sized rather than
/// growing it up from zero.
const INITIAL_STRING_TABLE_SIZE: usize = 32;

/// A single interned string.
pub struct StrObj {
    bytes: Box<[u8]>,
    hash: u32,
    mark: Cell<Color>,
    reserved: Cell<bool>,
}

impl StrObj {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The cached sampling hash, computed once at intern time and reused for
    /// the lifetime of the string.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Whether this string is a reserved word the host has pinned so it is
    /// never collected and can be compared by a fast pre-marked path.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reserved.get()
    }

    pub fn mark_reserved(&self) {
        self.reserved.set(true);
    }

    pub(crate) fn color(&self) -> Color {
        self.mark.get()
    }

    pub(crate) fn set_color(&self, c: Color) {
        self.mark.set(c);
    }
}

impl fmt::Debug for StrObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrObj")
            .field("bytes", &String::from_utf8_lossy(&self.bytes))
            .field("hash", &self.hash)
            .finish()
    }
}

/// A host-allocated opaque block, analogous to Lua's full userdata: a chunk
/// of bytes with an optional environment table and metatable.
pub struct UserData {
    size: usize,
    env: RefCell<Option<TableRef>>,
    metatable: RefCell<Option<TableRef>>,
    mark: Cell<Color>,
}

impl UserData {
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn env(&self) -> Option<TableRef> {
        self.env.borrow().clone()
    }

    pub fn set_env(&self, env: Option<TableRef>) {
        *self.env.borrow_mut() = env;
    }

    #[must_use]
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, mt: Option<TableRef>) {
        *self.metatable.borrow_mut() = mt;
    }

    pub(crate) fn color(&self) -> Color {
        self.mark.get()
    }

    pub(crate) fn set_color(&self, c: Color) {
        self.mark.set(c);
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserData").field("size", &self.size).finish()
    }
}

/// The sampling hash used for every string key.
///
/// Samples at most 32 bytes, stepping over the rest, so hashing a long
/// string costs the same as hashing a short one. Ported verbatim from the
/// reference implementation's string hash.
#[must_use]
pub fn string_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = ((len >> 5) + 1) as usize;
    let mut l1 = len;
    while l1 >= step {
        let byte = bytes[l1 - 1] as u32;
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(byte);
        l1 -= step;
    }
    h
}

struct StringPool {
    buckets: Vec<Vec<Rc<StrObj>>>,
    size: usize,
    nuse: usize,
}

impl StringPool {
    fn new(size: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); size],
            size,
            nuse: 0,
        }
    }

    fn resize_to(&mut self, newsize: usize) -> Result<(), TableError> {
        let mut new_buckets: Vec<Vec<Rc<StrObj>>> = Vec::new();
        try_reserve(&mut new_buckets, newsize)?;
        new_buckets.resize_with(newsize, Vec::new);
        for bucket in self.buckets.drain(..) {
            for s in bucket {
                let idx = (s.hash() as usize) & (newsize - 1);
                new_buckets[idx].push(s);
            }
        }
        self.buckets = new_buckets;
        self.size = newsize;
        Ok(())
    }
}

/// The string-interning and userdata-allocation pool.
pub struct Intern {
    pool: RefCell<StringPool>,
    collector: Rc<dyn Collector>,
}

impl fmt::Debug for Intern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool.borrow();
        f.debug_struct("Intern")
            .field("size", &pool.size)
            .field("nuse", &pool.nuse)
            .finish()
    }
}

impl Default for Intern {
    fn default() -> Self {
        Self::new()
    }
}

impl Intern {
    /// Creates a pool backed by a [`NullCollector`]: nothing is ever dead
    /// and resizes are never deferred.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collector(Rc::new(NullCollector::default()))
    }

    #[must_use]
    pub fn with_collector(collector: Rc<dyn Collector>) -> Self {
        Self {
            pool: RefCell::new(StringPool::new(INITIAL_STRING_TABLE_SIZE)),
            collector,
        }
    }

    /// Interns `bytes`, returning the canonical [`StringRef`] for this
    /// content. A second call with equal bytes returns a clone of the same
    /// `Rc` rather than allocating again.
    ///
    /// If the matching string was already marked dead by the collector, it
    /// is resurrected in place (recolored to the current white) instead of
    /// being reallocated, matching the reference implementation's handling
    /// of a string found during a lookup that raced the sweep phase.
    pub fn intern(&self, bytes: &[u8]) -> Result<Rc<StrObj>, TableError> {
        let hash = string_hash(bytes);
        {
            let pool = self.pool.borrow();
            let idx = (hash as usize) & (pool.size - 1);
            for s in &pool.buckets[idx] {
                if s.hash() == hash && s.as_bytes() == bytes {
                    if self.collector.is_dead(s.color()) {
                        s.set_color(self.collector.current_white());
                    }
                    return Ok(Rc::clone(s));
                }
            }
        }
        self.insert_new(bytes, hash)
    }

    fn insert_new(&self, bytes: &[u8], hash: u32) -> Result<Rc<StrObj>, TableError> {
        let obj = Rc::new(StrObj {
            bytes: bytes.to_vec().into_boxed_slice(),
            hash,
            mark: Cell::new(self.collector.current_white()),
            reserved: Cell::new(false),
        });

        let grow_to = {
            let mut pool = self.pool.borrow_mut();
            let idx = (hash as usize) & (pool.size - 1);
            try_reserve(&mut pool.buckets[idx], 1)?;
            pool.buckets[idx].push(Rc::clone(&obj));
            pool.nuse += 1;
            log::trace!("string intern miss: nuse={} size={}", pool.nuse, pool.size);
            if pool.nuse > pool.size && pool.size <= usize::MAX / 2 {
                Some(pool.size * 2)
            } else {
                None
            }
        };
        if let Some(newsize) = grow_to {
            self.resize(newsize)?;
        }
        Ok(obj)
    }

    /// Doubles (or otherwise resizes) the bucket array. A no-op while the
    /// collector reports it is sweeping the string table, since touching the
    /// bucket chains mid-sweep would race the sweeper walking them.
    pub fn resize(&self, newsize: usize) -> Result<(), TableError> {
        if self.collector.is_sweeping_strings() {
            log::trace!("string intern resize to {} deferred: sweep in progress", newsize);
            return Ok(());
        }
        log::debug!("string intern resize to {}", newsize);
        self.pool.borrow_mut().resize_to(newsize)
    }

    /// Allocates a new userdata block of `size` bytes with an optional
    /// environment table.
    #[must_use]
    pub fn new_userdata(&self, size: usize, env: Option<TableRef>) -> Rc<UserData> {
        Rc::new(UserData {
            size,
            env: RefCell::new(env),
            metatable: RefCell::new(None),
            mark: Cell::new(self.collector.current_white()),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.borrow().nuse
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_hashes_to_zero() {
        assert_eq!(string_hash(b""), 0);
    }

    #[test]
    fn same_bytes_intern_to_the_same_object() {
        let pool = Intern::new();
        let a = pool.intern(b"hello").unwrap();
        let b = pool.intern(b"hello").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_bytes_intern_to_different_objects() {
        let pool = Intern::new();
        let a = pool.intern(b"hello").unwrap();
        let b = pool.intern(b"world").unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn long_strings_sample_instead_of_hashing_every_byte() {
        let long = vec![b'x'; 10_000];
        let hash = string_hash(&long);
        // a single differing byte inside the sampled stride still changes the hash
        let mut other = long.clone();
        other[5000] = b'y';
        assert_ne!(hash, string_hash(&other));
    }

    #[test]
    fn pool_grows_past_initial_capacity() {
        let pool = Intern::new();
        for i in 0..500 {
            pool.intern(format!("key-{}", i).as_bytes()).unwrap();
        }
        assert_eq!(pool.len(), 500);
        assert!(pool.pool.borrow().size > INITIAL_STRING_TABLE_SIZE);
    }

    #[test]
    fn dead_string_is_resurrected_on_lookup() {
        #[derive(Debug)]
        struct AlwaysDead;
        impl Collector for AlwaysDead {
            fn current_white(&self) -> Color {
                Color::White
            }
            fn is_dead(&self, _color: Color) -> bool {
                true
            }
            fn barrier_forward(&self, _key: &crate::value::Value) {}
            fn is_sweeping_strings(&self) -> bool {
                false
            }
        }
        let pool = Intern::with_collector(Rc::new(AlwaysDead));
        let a = pool.intern(b"zombie").unwrap();
        let b = pool.intern(b"zombie").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.color(), Color::White);
    }
}
