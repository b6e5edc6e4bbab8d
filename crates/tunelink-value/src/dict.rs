use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, ValueError};
use crate::value::Value;

const START_BITS: u32 = 2;
const FILL_LIMIT: usize = 7;

static NEXT_DICT_ID: AtomicU64 = AtomicU64::new(1);

/// MurmurHash2 (32-bit) with the fixed dictionary seed.
pub fn murmur2(key: &[u8]) -> u32 {
    const SEED: u32 = 0x1234_5678;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = SEED ^ (key.len() as u32);
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

#[derive(Clone)]
struct Entry {
    hash: u32,
    key: String,
    value: Value,
}

#[derive(Clone)]
enum Slot {
    Empty,
    Deleted,
    Occupied(Entry),
}

enum Probe {
    Found { pos: usize, deleted: Option<usize> },
    Vacant { pos: usize, deleted: Option<usize> },
}

/// A detached scan position over a [`Dict`]'s slots.
///
/// Removals do not move a cursor; it simply skips the tombstone it may be
/// sitting on. A table rebuild (growth or `clear`) invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictCursor {
    dict: u64,
    generation: u64,
    pos: usize,
}

impl DictCursor {
    /// Slot index the cursor is parked on.
    pub fn slot(&self) -> usize {
        self.pos
    }
}

/// String-keyed, open-addressed hash table.
pub struct Dict {
    id: u64,
    slots: Vec<Slot>,
    bits: u32,
    elems: usize,
    generation: u64,
}

impl Dict {
    pub fn new() -> Self {
        Self {
            id: NEXT_DICT_ID.fetch_add(1, Ordering::Relaxed),
            slots: vec![Slot::Empty; 1 << START_BITS],
            bits: START_BITS,
            elems: 0,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.elems
    }

    pub fn is_empty(&self) -> bool {
        self.elems == 0
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn search(&self, key: &str, hash: u32) -> Probe {
        let mask = self.mask();
        let stop = hash as usize & mask;
        let mut bucket = stop;
        let mut deleted = None;

        loop {
            match &self.slots[bucket] {
                Slot::Empty => break,
                Slot::Deleted => {
                    if deleted.is_none() {
                        deleted = Some(bucket);
                    }
                }
                Slot::Occupied(entry) if entry.hash == hash && entry.key == key => {
                    return Probe::Found {
                        pos: bucket,
                        deleted,
                    };
                }
                Slot::Occupied(_) => {}
            }
            bucket = (bucket + 1) & mask;
            if bucket == stop {
                break;
            }
        }

        Probe::Vacant {
            pos: bucket,
            deleted,
        }
    }

    // Move a found entry into the first tombstone on its probe path.
    fn copy_down(&mut self, pos: usize, deleted: Option<usize>) -> usize {
        match deleted {
            Some(target) => {
                let entry = std::mem::replace(&mut self.slots[pos], Slot::Deleted);
                self.slots[target] = entry;
                target
            }
            None => pos,
        }
    }

    fn needs_resize(&self) -> bool {
        ((self.elems * 10) >> self.bits) > FILL_LIMIT
    }

    fn resize(&mut self) {
        self.bits += 1;
        self.generation += 1;
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; 1 << self.bits]);
        self.elems = 0;
        for slot in old {
            if let Slot::Occupied(entry) = slot {
                self.insert_new(entry);
            }
        }
    }

    fn insert_new(&mut self, entry: Entry) {
        let target = match self.search(&entry.key, entry.hash) {
            Probe::Vacant { pos, deleted } => deleted.unwrap_or(pos),
            Probe::Found { pos, .. } => pos,
        };
        if matches!(self.slots[target], Slot::Occupied(_)) {
            self.resize();
            self.insert_new(entry);
            return;
        }
        self.slots[target] = Slot::Occupied(entry);
        self.elems += 1;
    }

    /// Insert or replace, returning the previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if self.needs_resize() {
            self.resize();
        }
        let hash = murmur2(key.as_bytes());
        match self.search(&key, hash) {
            Probe::Found { pos, deleted } => {
                let pos = self.copy_down(pos, deleted);
                match &mut self.slots[pos] {
                    Slot::Occupied(entry) => Some(std::mem::replace(&mut entry.value, value)),
                    _ => None,
                }
            }
            Probe::Vacant { .. } => {
                self.insert_new(Entry { hash, key, value });
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.search(key, murmur2(key.as_bytes())) {
            Probe::Found { pos, .. } => match &self.slots[pos] {
                Slot::Occupied(entry) => Some(&entry.value),
                _ => None,
            },
            Probe::Vacant { .. } => None,
        }
    }

    /// Mutable lookup. Also shortens the probe path of the found entry.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self.search(key, murmur2(key.as_bytes())) {
            Probe::Found { pos, deleted } => {
                let pos = self.copy_down(pos, deleted);
                match &mut self.slots[pos] {
                    Slot::Occupied(entry) => Some(&mut entry.value),
                    _ => None,
                }
            }
            Probe::Vacant { .. } => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Tombstone the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self.search(key, murmur2(key.as_bytes())) {
            Probe::Found { pos, .. } => self.remove_at(pos),
            Probe::Vacant { .. } => None,
        }
    }

    fn remove_at(&mut self, pos: usize) -> Option<Value> {
        match std::mem::replace(&mut self.slots[pos], Slot::Deleted) {
            Slot::Occupied(entry) => {
                self.elems -= 1;
                Some(entry.value)
            }
            other => {
                self.slots[pos] = other;
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots = vec![Slot::Empty; 1 << START_BITS];
        self.bits = START_BITS;
        self.elems = 0;
        self.generation += 1;
    }

    /// Entries in slot order.
    pub fn iter(&self) -> DictIter<'_> {
        DictIter {
            slots: self.slots.iter(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(_, v)| v)
    }

    fn next_live(&self, from: usize) -> usize {
        (from..self.slots.len())
            .find(|&i| matches!(self.slots[i], Slot::Occupied(_)))
            .unwrap_or(self.slots.len())
    }

    /// A cursor parked on the first live slot.
    pub fn cursor(&self) -> DictCursor {
        DictCursor {
            dict: self.id,
            generation: self.generation,
            pos: self.next_live(0),
        }
    }

    fn validate(&self, cursor: &DictCursor) -> Result<()> {
        if cursor.dict != self.id || cursor.generation != self.generation {
            return Err(ValueError::StaleCursor);
        }
        Ok(())
    }

    /// The entry under the cursor. A cursor left on a tombstone first skips
    /// forward to the next live slot.
    pub fn cursor_entry(&self, cursor: &mut DictCursor) -> Result<Option<(&str, &Value)>> {
        self.validate(cursor)?;
        cursor.pos = self.next_live(cursor.pos);
        Ok(match self.slots.get(cursor.pos) {
            Some(Slot::Occupied(entry)) => Some((entry.key.as_str(), &entry.value)),
            _ => None,
        })
    }

    pub fn cursor_next(&self, cursor: &mut DictCursor) -> Result<()> {
        self.validate(cursor)?;
        if cursor.pos < self.slots.len() {
            cursor.pos = self.next_live(cursor.pos + 1);
        }
        Ok(())
    }

    /// Remove the entry under the cursor and advance to the next live slot.
    pub fn cursor_remove(&mut self, cursor: &mut DictCursor) -> Result<Option<Value>> {
        self.validate(cursor)?;
        cursor.pos = self.next_live(cursor.pos);
        if cursor.pos >= self.slots.len() {
            return Ok(None);
        }
        let removed = self.remove_at(cursor.pos);
        cursor.pos = self.next_live(cursor.pos + 1);
        Ok(removed)
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Dict {
    fn clone(&self) -> Self {
        Self {
            id: NEXT_DICT_ID.fetch_add(1, Ordering::Relaxed),
            slots: self.slots.clone(),
            bits: self.bits,
            elems: self.elems,
            generation: 0,
        }
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Dict {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut dict = Dict::new();
        for (key, value) in iter {
            dict.set(key, value);
        }
        dict
    }
}

impl<'a> IntoIterator for &'a Dict {
    type Item = (&'a str, &'a Value);
    type IntoIter = DictIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over live entries.
pub struct DictIter<'a> {
    slots: std::slice::Iter<'a, Slot>,
}

impl<'a> Iterator for DictIter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied(entry) = slot {
                return Some((entry.key.as_str(), &entry.value));
            }
        }
        None
    }
}
