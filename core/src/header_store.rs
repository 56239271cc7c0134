//! Persistent, bounded-capacity ring-buffer store for [`StoredHeader`]
//! records.
//!
//! File layout:
//!
//! ```text
//! offset 0      : 4-byte ASCII magic "SPVH"
//! offset 4      : 4-byte LE ring cursor (slot index of the next write)
//! offset 8      : 32-byte tip fingerprint
//! offset 40     : reserved, zero-filled to offset 1024
//! offset 1024   : slot 0  (160 bytes: 32-byte key fingerprint + 128-byte StoredHeader)
//! offset 1024+160*i : slot i
//! ```
//!
//! File size is always `1024 + 160 * capacity`. All operations serialize
//! through a single mutex; an advisory exclusive file lock on the prologue
//! prevents two process-level handles from sharing the same file.

use crate::codec::{Encodable, Reader, Writer};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::header::StoredHeader;
use fs4::FileExt;
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

const MAGIC: &[u8; 4] = b"SPVH";
const PROLOGUE_SIZE: u64 = 1024;
const SLOT_SIZE: u64 = 160;
const CURSOR_OFFSET: u64 = 4;
const TIP_OFFSET: u64 = 8;

struct Inner {
    file: File,
    capacity: u32,
    cursor: u32,
    /// Hit cache: fingerprint -> slot index, populated by `put` and by
    /// successful `get` scans.
    hit_cache: HashMap<Fingerprint, u32>,
    /// Bounded FIFO of fingerprints known *not* to be present, to avoid
    /// rescanning the ring for repeated misses.
    miss_cache: VecDeque<Fingerprint>,
    miss_set: std::collections::HashSet<Fingerprint>,
}

const MISS_CACHE_CAPACITY: usize = 4096;

/// An append-mostly, fixed-capacity header store backed by a single file.
pub struct HeaderStore {
    inner: Mutex<Inner>,
}

impl HeaderStore {
    /// Opens or creates a store at `path` with room for `capacity` headers.
    /// Fails with [`Error::AlreadyLocked`] if another handle already holds
    /// the advisory lock.
    pub fn open(path: impl AsRef<Path>, capacity: u32) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked)?;

        let expected_len = PROLOGUE_SIZE + SLOT_SIZE * capacity as u64;
        if !existed || file.metadata()?.len() == 0 {
            file.set_len(expected_len)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(MAGIC)?;
            file.write_all(&0u32.to_le_bytes())?;
            file.write_all(&Fingerprint::ZERO.0)?;
            file.flush()?;
            return Ok(HeaderStore {
                inner: Mutex::new(Inner {
                    file,
                    capacity,
                    cursor: 0,
                    hit_cache: HashMap::new(),
                    miss_cache: VecDeque::new(),
                    miss_set: std::collections::HashSet::new(),
                }),
            });
        }

        let len = file.metadata()?.len();
        if len < PROLOGUE_SIZE {
            return Err(Error::StorageCorrupt("file shorter than prologue".into()));
        }
        let mut magic = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::StorageCorrupt("bad magic".into()));
        }
        let existing_capacity = ((len - PROLOGUE_SIZE) / SLOT_SIZE) as u32;
        if capacity < existing_capacity {
            return Err(Error::CannotShrink { current: existing_capacity, requested: capacity });
        }
        if capacity > existing_capacity {
            file.set_len(PROLOGUE_SIZE + SLOT_SIZE * capacity as u64)?;
        }

        let mut cursor_bytes = [0u8; 4];
        file.seek(SeekFrom::Start(CURSOR_OFFSET))?;
        file.read_exact(&mut cursor_bytes)?;
        let cursor = u32::from_le_bytes(cursor_bytes);

        let mut store = HeaderStore {
            inner: Mutex::new(Inner {
                file,
                capacity,
                cursor,
                hit_cache: HashMap::new(),
                miss_cache: VecDeque::new(),
                miss_set: std::collections::HashSet::new(),
            }),
        };
        store.rebuild_hit_cache(existing_capacity)?;
        Ok(store)
    }

    fn rebuild_hit_cache(&mut self, capacity: u32) -> Result<()> {
        let inner = self.inner.get_mut().expect("lock poisoned");
        for slot in 0..capacity {
            let offset = PROLOGUE_SIZE + SLOT_SIZE * slot as u64;
            inner.file.seek(SeekFrom::Start(offset))?;
            let mut key = [0u8; 32];
            inner.file.read_exact(&mut key)?;
            if key != [0u8; 32] {
                inner.hit_cache.insert(Fingerprint(key), slot);
            }
        }
        Ok(())
    }

    /// Writes `stored` to the cursor slot and advances the cursor.
    pub fn put(&self, stored: &StoredHeader) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let slot = inner.cursor;
        let fp = stored.fingerprint();

        let mut w = Writer::new();
        w.write_bytes(&fp.0);
        stored.encode(&mut w);
        let bytes = w.into_bytes();
        debug_assert_eq!(bytes.len() as u64, SLOT_SIZE);

        let offset = PROLOGUE_SIZE + SLOT_SIZE * slot as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&bytes)?;

        let capacity = inner.capacity;
        inner.cursor = (slot + 1) % capacity;
        inner.file.seek(SeekFrom::Start(CURSOR_OFFSET))?;
        inner.file.write_all(&inner.cursor.to_le_bytes())?;
        inner.file.flush()?;

        inner.hit_cache.insert(fp, slot);
        inner.miss_set.remove(&fp);
        Ok(())
    }

    /// Looks up a header by fingerprint: hit cache, then miss cache, then a
    /// backward scan of the ring from the cursor.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<StoredHeader>> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        if let Some(&slot) = inner.hit_cache.get(fingerprint) {
            return self.read_slot_checked(&mut inner, slot, fingerprint);
        }
        if inner.miss_set.contains(fingerprint) {
            return Ok(None);
        }

        let capacity = inner.capacity;
        let cursor = inner.cursor;
        for i in 0..capacity {
            let slot = (cursor + capacity - 1 - i) % capacity;
            if let Some(found) = self.read_slot_checked(&mut inner, slot, fingerprint)? {
                inner.hit_cache.insert(*fingerprint, slot);
                return Ok(Some(found));
            }
        }

        Self::record_miss(&mut inner, *fingerprint);
        Ok(None)
    }

    fn read_slot_checked(
        &self,
        inner: &mut Inner,
        slot: u32,
        expect: &Fingerprint,
    ) -> Result<Option<StoredHeader>> {
        let offset = PROLOGUE_SIZE + SLOT_SIZE * slot as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; SLOT_SIZE as usize];
        inner.file.read_exact(&mut buf)?;
        let key = Fingerprint(buf[0..32].try_into().expect("slot key is 32 bytes"));
        if key != *expect {
            return Ok(None);
        }
        let mut r = Reader::new(&buf[32..]);
        Ok(Some(StoredHeader::decode(&mut r)?))
    }

    fn record_miss(inner: &mut Inner, fp: Fingerprint) {
        if inner.miss_set.insert(fp) {
            inner.miss_cache.push_back(fp);
            if inner.miss_cache.len() > MISS_CACHE_CAPACITY {
                if let Some(evicted) = inner.miss_cache.pop_front() {
                    inner.miss_set.remove(&evicted);
                }
            }
        }
    }

    /// Writes the tip fingerprint to the prologue and resolves it via
    /// [`HeaderStore::get`].
    pub fn set_tip(&self, stored: &StoredHeader) -> Result<()> {
        let fp = stored.fingerprint();
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.file.seek(SeekFrom::Start(TIP_OFFSET))?;
        inner.file.write_all(&fp.0)?;
        inner.file.flush()?;
        Ok(())
    }

    /// Reads the tip fingerprint from the prologue and resolves it.
    pub fn get_tip(&self) -> Result<Option<StoredHeader>> {
        let fp = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.file.seek(SeekFrom::Start(TIP_OFFSET))?;
            let mut bytes = [0u8; 32];
            inner.file.read_exact(&mut bytes)?;
            Fingerprint(bytes)
        };
        if fp == Fingerprint::ZERO {
            return Ok(None);
        }
        self.get(&fp)
    }

    pub fn capacity(&self) -> u32 {
        self.inner.lock().expect("lock poisoned").capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_at(prev: Fingerprint, nonce: u32) -> StoredHeader {
        let h = crate::header::Header {
            version: 1,
            prev_fingerprint: prev,
            merkle_root: Fingerprint::hash(b"m"),
            timestamp: 1_600_000_000 + nonce,
            bits: 0x207fffff,
            nonce,
        };
        StoredHeader::genesis(h).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path().join("headers.dat"), 16).unwrap();
        let genesis = header_at(Fingerprint::ZERO, 0);
        store.put(&genesis).unwrap();
        let fetched = store.get(&genesis.fingerprint()).unwrap().unwrap();
        assert_eq!(fetched, genesis);
    }

    #[test]
    fn unknown_fingerprint_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path().join("headers.dat"), 16).unwrap();
        assert!(store.get(&Fingerprint::hash(b"nope")).unwrap().is_none());
    }

    #[test]
    fn tip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path().join("headers.dat"), 16).unwrap();
        let genesis = header_at(Fingerprint::ZERO, 0);
        store.put(&genesis).unwrap();
        store.set_tip(&genesis).unwrap();
        assert_eq!(store.get_tip().unwrap().unwrap(), genesis);
    }

    #[test]
    fn ring_wraps_and_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path().join("headers.dat"), 4).unwrap();
        let mut headers = Vec::new();
        let mut prev = Fingerprint::ZERO;
        for i in 0..6u32 {
            let h = header_at(prev, i);
            store.put(&h).unwrap();
            prev = h.fingerprint();
            headers.push(h);
        }
        // the first two headers should have been overwritten by wrap-around
        assert!(store.get(&headers[0].fingerprint()).unwrap().is_none());
        assert!(store.get(&headers[1].fingerprint()).unwrap().is_none());
        // the last four survive
        for h in &headers[2..] {
            assert_eq!(store.get(&h.fingerprint()).unwrap().unwrap(), *h);
        }
    }

    #[test]
    fn reopening_same_file_twice_fails_with_already_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headers.dat");
        let _first = HeaderStore::open(&path, 8).unwrap();
        let second = HeaderStore::open(&path, 8);
        assert!(matches!(second, Err(Error::AlreadyLocked)));
    }

    #[test]
    fn survives_reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headers.dat");
        let genesis = header_at(Fingerprint::ZERO, 0);
        {
            let store = HeaderStore::open(&path, 8).unwrap();
            store.put(&genesis).unwrap();
            store.set_tip(&genesis).unwrap();
        }
        let store = HeaderStore::open(&path, 8).unwrap();
        assert_eq!(store.get_tip().unwrap().unwrap(), genesis);
    }

    #[test]
    fn shrinking_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headers.dat");
        {
            let _store = HeaderStore::open(&path, 16).unwrap();
        }
        let result = HeaderStore::open(&path, 8);
        assert!(matches!(result, Err(Error::CannotShrink { .. })));
    }
}
