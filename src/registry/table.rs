//! Chained hash table
//!
//! A fixed number of buckets, each holding a chain of entries in insertion order.
//! Hashing and key equality are supplied by the caller; `compare` is the sole
//! authority for equality, so colliding keys simply share a chain.

use super::error::RegistryError;

/// Hash function: any `u32`, reduced modulo the bucket count by the table
pub type HashFn<K> = fn(&K) -> u32;

/// Key equality
pub type CompareFn<K> = fn(&K, &K) -> bool;

struct Node<K, V> {
    key: K,
    value: V,
}

/// Hash table with separate chaining
pub struct ChainedTable<K, V> {
    buckets: Vec<Vec<Node<K, V>>>,
    hash: HashFn<K>,
    compare: CompareFn<K>,
    len: usize,
}

impl<K, V> ChainedTable<K, V> {
    /// Create a table with `bucket_count` buckets (at least one)
    pub fn new(bucket_count: usize, hash: HashFn<K>, compare: CompareFn<K>) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
            hash,
            compare,
            len: 0,
        }
    }

    fn bucket_of(&self, key: &K) -> usize {
        (self.hash)(key) as usize % self.buckets.len()
    }

    fn position(&self, bucket: usize, key: &K) -> Option<usize> {
        self.buckets[bucket]
            .iter()
            .position(|node| (self.compare)(&node.key, key))
    }

    /// Find the value stored under `key`
    ///
    /// If the chain somehow holds equal keys, the first inserted wins.
    pub fn search(&self, key: &K) -> Option<&V> {
        let bucket = self.bucket_of(key);
        self.position(bucket, key)
            .map(|i| &self.buckets[bucket][i].value)
    }

    /// Find the value stored under `key` for modification
    pub fn search_mut(&mut self, key: &K) -> Option<&mut V> {
        let bucket = self.bucket_of(key);
        let i = self.position(bucket, key)?;
        Some(&mut self.buckets[bucket][i].value)
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.search(key).is_some()
    }

    /// Insert a new entry, taking ownership of key and value
    ///
    /// Fails with `Duplicate` (leaving the existing value untouched) if the key
    /// is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), RegistryError> {
        let bucket = self.bucket_of(&key);
        if self.position(bucket, &key).is_some() {
            return Err(RegistryError::Duplicate);
        }

        self.buckets[bucket].push(Node { key, value });
        self.len += 1;
        Ok(())
    }

    /// Unlink the entry for `key`, returning its value
    pub fn remove(&mut self, key: &K) -> Result<V, RegistryError> {
        let bucket = self.bucket_of(key);
        let i = self
            .position(bucket, key)
            .ok_or(RegistryError::NotFound)?;

        let node = self.buckets[bucket].remove(i);
        self.len -= 1;
        Ok(node.value)
    }

    /// Visit every entry, bucket by bucket and in chain order within a bucket
    pub fn traverse<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V),
    {
        for node in self.buckets.iter().flatten() {
            visit(&node.key, &node.value);
        }
    }

    /// Drop every entry, keeping the bucket array
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.len = 0;
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Length of the longest chain
    pub fn max_chain_len(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// 32-bit FNV-1a over the bytes of a string
#[allow(clippy::ptr_arg)]
pub fn fnv1a(key: &String) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    key.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    })
}

/// Exact byte-for-byte string equality
#[allow(clippy::ptr_arg)]
pub fn exact_match(a: &String, b: &String) -> bool {
    a.as_bytes() == b.as_bytes()
}
