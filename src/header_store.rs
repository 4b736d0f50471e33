use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash of `bytes`.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Keys are already FNV hashes; pass them through untouched.
#[derive(Default)]
struct Prehashed(u64);

impl Hasher for Prehashed {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = (self.0 << 8) | u64::from(*b);
        }
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

type Buckets = HashMap<u64, Vec<Slot>, BuildHasherDefault<Prehashed>>;

#[derive(Debug)]
struct Slot {
    key: String,
    value: String,
    version: u64,
}

/// Per-frame header storage.
///
/// Entries are stamped with the store's version counter. A slot only
/// counts as present when its stamp matches the current version, so
/// [`clear`](Self::clear) is a single increment and slot allocations are
/// reused frame after frame. Within one version the first value written
/// for a key wins, matching STOMP 1.2's rule for repeated headers.
#[derive(Debug, Default)]
pub struct HeaderStore {
    version: u64,
    len: usize,
    buckets: Buckets,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` under `key` unless the key was already set since the
    /// last clear.
    ///
    /// Returns `true` when the value was stored, `false` for a duplicate.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        self.set_hashed(fnv1a(key.as_bytes()), key, value)
    }

    fn set_hashed(&mut self, hash: u64, key: &str, value: &str) -> bool {
        let version = self.version;
        let bucket = self.buckets.entry(hash).or_default();
        match bucket.iter_mut().find(|slot| slot.key == key) {
            Some(slot) if slot.version == version => false,
            Some(slot) => {
                slot.value.clear();
                slot.value.push_str(value);
                slot.version = version;
                self.len += 1;
                true
            }
            None => {
                bucket.push(Slot {
                    key: key.to_owned(),
                    value: value.to_owned(),
                    version,
                });
                self.len += 1;
                true
            }
        }
    }

    /// Value for `key` in the current frame.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_hashed(fnv1a(key.as_bytes()), key)
    }

    fn get_hashed(&self, hash: u64, key: &str) -> Option<&str> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|slot| slot.version == self.version && slot.key == key)
            .map(|slot| slot.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Forget every entry in O(1). Storage is kept for the next frame.
    pub fn clear(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.len = 0;
    }

    /// Drop all storage, including the reusable slots.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.version = 0;
        self.len = 0;
    }

    /// Number of headers present in the current frame.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Live entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        let version = self.version;
        self.buckets
            .values()
            .flatten()
            .filter(move |slot| slot.version == version)
            .map(|slot| (slot.key.as_str(), slot.value.as_str()))
    }

    /// Render live entries as `key:value` pairs sorted by key, separated
    /// by `sep`.
    pub fn dump(&self, sep: &str) -> String {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable();
        entries
            .into_iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(sep)
    }
}
