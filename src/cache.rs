//! O(1) LRU cache for in-memory page records.
//!
//! Design:
//! - HashMap<page_id, Entry> stores the record and doubly-linked pointers
//!   (prev/next by page_id).
//! - head = MRU, tail = LRU.
//! - get_mut() bumps residency; find()/find_mut()/update() do not.
//! - Dirty records are never evicted here: the page store flushes the oldest
//!   dirty record first, then asks again.
//!
//! Capacity unit is entries, not bytes.

use std::collections::HashMap;

use crate::consts::{
    PAGE_TYPE_BTREE_LEAF, PAGE_TYPE_FREE_LIST, PAGE_TYPE_OVERFLOW, PAGE_TYPE_SCAN_LEAF,
    PAGE_TYPE_STREAM_DATA, PAGE_TYPE_STREAM_TRUNK,
};
use crate::data::Data;

/// Логическая роль страницы (совпадает с байтом типа на диске).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    FreeList,
    ScanLeaf,
    BtreeLeaf,
    StreamTrunk,
    StreamData,
    Overflow,
}

impl PageKind {
    pub fn type_byte(self) -> u8 {
        match self {
            PageKind::FreeList => PAGE_TYPE_FREE_LIST,
            PageKind::ScanLeaf => PAGE_TYPE_SCAN_LEAF,
            PageKind::BtreeLeaf => PAGE_TYPE_BTREE_LEAF,
            PageKind::StreamTrunk => PAGE_TYPE_STREAM_TRUNK,
            PageKind::StreamData => PAGE_TYPE_STREAM_DATA,
            PageKind::Overflow => PAGE_TYPE_OVERFLOW,
        }
    }
}

/// In-memory представление страницы.
#[derive(Clone, Debug)]
pub struct Record {
    pub pos: u32,
    pub kind: PageKind,
    pub changed: bool,
    pub data: Data,
}

impl Record {
    pub fn new(pos: u32, kind: PageKind, data: Data) -> Self {
        Self {
            pos,
            kind,
            changed: false,
            data,
        }
    }
}

struct Entry {
    rec: Record,
    prev: Option<u32>,
    next: Option<u32>,
}

pub struct PageCache {
    cap: usize,
    map: HashMap<u32, Entry>,
    head: Option<u32>, // MRU
    tail: Option<u32>, // LRU
}

impl PageCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(16),
            map: HashMap::with_capacity(cap.max(16)),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Запись без изменения порядка вытеснения.
    pub fn find(&self, pos: u32) -> Option<&Record> {
        self.map.get(&pos).map(|e| &e.rec)
    }

    /// Мутабельный доступ без изменения порядка вытеснения.
    pub fn find_mut(&mut self, pos: u32) -> Option<&mut Record> {
        self.map.get_mut(&pos).map(|e| &mut e.rec)
    }

    /// Запись с бампом residency (MRU).
    pub fn get_mut(&mut self, pos: u32) -> Option<&mut Record> {
        if !self.map.contains_key(&pos) {
            return None;
        }
        self.detach(pos);
        self.attach_front(pos);
        self.map.get_mut(&pos).map(|e| &mut e.rec)
    }

    /// Вставить запись как MRU. Вызывающий обеспечивает место
    /// (см. PageStore::put_record).
    pub fn put(&mut self, rec: Record) {
        let pos = rec.pos;
        if self.map.contains_key(&pos) {
            self.update(pos, rec);
            self.detach(pos);
            self.attach_front(pos);
            return;
        }
        self.map.insert(
            pos,
            Entry {
                rec,
                prev: None,
                next: None,
            },
        );
        self.attach_front(pos);
    }

    /// Перепривязать запись без бампа residency.
    pub fn update(&mut self, pos: u32, rec: Record) {
        match self.map.get_mut(&pos) {
            Some(e) => e.rec = rec,
            None => self.put(rec),
        }
    }

    /// Убрать запись без сброса на диск.
    pub fn remove(&mut self, pos: u32) {
        if self.map.contains_key(&pos) {
            self.detach(pos);
            self.map.remove(&pos);
        }
    }

    /// Id всех изменённых записей по возрастанию (порядок сброса,
    /// минимизирующий seek'и).
    pub fn get_all_changed(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .map
            .iter()
            .filter(|(_, e)| e.rec.changed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Отбросить всё (конец recovery).
    pub fn clear(&mut self) {
        self.map.clear();
        self.head = None;
        self.tail = None;
    }

    /// Вытеснить одну чистую запись с хвоста. false, если все грязные.
    pub fn evict_one_clean(&mut self) -> bool {
        let mut cur = self.tail;
        while let Some(id) = cur {
            let e = &self.map[&id];
            if !e.rec.changed {
                self.detach(id);
                self.map.remove(&id);
                return true;
            }
            cur = e.prev;
        }
        false
    }

    /// Самая старая грязная запись (кандидат на принудительный сброс).
    pub fn oldest_dirty(&self) -> Option<u32> {
        let mut cur = self.tail;
        while let Some(id) = cur {
            let e = &self.map[&id];
            if e.rec.changed {
                return Some(id);
            }
            cur = e.prev;
        }
        None
    }

    // ---------------- internal helpers ----------------

    fn detach(&mut self, pos: u32) {
        let (prev, next) = match self.map.get(&pos) {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        if self.head == Some(pos) {
            self.head = next;
        }
        if self.tail == Some(pos) {
            self.tail = prev;
        }
        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }
        if let Some(e) = self.map.get_mut(&pos) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, pos: u32) {
        if self.head == Some(pos) {
            return;
        }
        if let Some(e) = self.map.get_mut(&pos) {
            e.prev = None;
            e.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(pos);
            }
        }
        self.head = Some(pos);
        if self.tail.is_none() {
            self.tail = Some(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pos: u32) -> Record {
        Record::new(pos, PageKind::ScanLeaf, Data::create(64))
    }

    #[test]
    fn lru_order_and_eviction() {
        let mut c = PageCache::new(16);
        for i in 0..4 {
            c.put(rec(i));
        }
        // 0 — хвост; бамп делает его головой
        assert!(c.get_mut(0).is_some());
        assert!(c.evict_one_clean());
        // вытеснен должен быть 1 (новый хвост)
        assert!(c.find(1).is_none());
        assert!(c.find(0).is_some());
    }

    #[test]
    fn dirty_never_evicted() {
        let mut c = PageCache::new(16);
        for i in 0..3 {
            let mut r = rec(i);
            r.changed = true;
            c.put(r);
        }
        assert!(!c.evict_one_clean());
        assert_eq!(c.oldest_dirty(), Some(0));
        assert_eq!(c.get_all_changed(), vec![0, 1, 2]);
    }

    #[test]
    fn find_does_not_bump() {
        let mut c = PageCache::new(16);
        c.put(rec(1));
        c.put(rec(2));
        let _ = c.find(1);
        assert!(c.evict_one_clean());
        // 1 остался хвостом и был вытеснен
        assert!(c.find(1).is_none());
    }

    #[test]
    fn remove_and_clear() {
        let mut c = PageCache::new(16);
        c.put(rec(5));
        c.remove(5);
        assert!(c.is_empty());
        c.put(rec(6));
        c.clear();
        assert!(c.find(6).is_none());
    }
}
