//! Btree-индекс: упорядоченная цепочка листьев по колонкам индекса.
//!
//! Лист: [type][index_id i32][next i32][count i32], далее записи
//! [pos i64][len i32][ключ: varint count + значения]. Переполнение
//! листа решается перераспределением записей по цепочке (split).
//! Внутренних узлов нет: диапазонный доступ — последовательный обход.

use std::cmp::Ordering;

use anyhow::Result;

use crate::cache::{PageKind, Record};
use crate::consts::{LEAF_HEADER, NO_PAGE};
use crate::data::Data;
use crate::errors::{corrupted, internal, DbError};
use crate::row::Row;
use crate::store::{BtreeInfo, PageStore};
use crate::value::Value;

/// Бит сортировки по убыванию в sort_type.
pub const SORT_DESCENDING: i32 = 1;

const ENTRY_OVERHEAD: usize = 8 + 4;

pub(crate) struct BtreeEntry {
    pub pos: i64,
    pub key: Vec<Value>,
}

impl BtreeEntry {
    fn payload(&self) -> Vec<u8> {
        let mut d = Data::empty();
        d.write_var_int(self.key.len() as u32);
        for v in &self.key {
            v.write(&mut d);
        }
        d.bytes()[..d.length()].to_vec()
    }

    fn disk_size(&self) -> usize {
        ENTRY_OVERHEAD + self.payload().len()
    }
}

fn key_of(info: &BtreeInfo, row: &Row) -> Result<Vec<Value>> {
    let mut key = Vec::with_capacity(info.columns.len());
    for c in &info.columns {
        if c.column_id >= row.column_count() {
            return Err(internal(format!(
                "index {}: column {} out of range",
                info.id, c.column_id
            )));
        }
        key.push(row.get_value(c.column_id).clone());
    }
    Ok(key)
}

fn compare(info: &BtreeInfo, a: &BtreeEntry, b: &BtreeEntry) -> Ordering {
    for (i, c) in info.columns.iter().enumerate() {
        let mut ord = a.key[i].compare(&b.key[i]);
        if c.sort_type & SORT_DESCENDING != 0 {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.pos.cmp(&b.pos)
}

fn build_leaf(page_size: usize, index_id: i32, next: u32, entries: &[BtreeEntry]) -> Data {
    let mut d = Data::create(page_size);
    d.write_u8(PageKind::BtreeLeaf.type_byte());
    d.write_i32(index_id);
    d.write_u32(next);
    d.write_i32(entries.len() as i32);
    for e in entries {
        let payload = e.payload();
        d.write_i64(e.pos);
        d.write_i32(payload.len() as i32);
        d.write_bytes(&payload);
    }
    d
}

fn read_leaf(store: &mut PageStore, page: u32, index_id: i32) -> Result<(u32, Vec<BtreeEntry>)> {
    store.load_record(page, PageKind::BtreeLeaf)?;
    let mut d = store.record_mut(page)?.data.clone();
    d.reset();
    d.read_u8()?;
    let owner = d.read_i32()?;
    if owner != index_id {
        return Err(corrupted(format!(
            "btree leaf {}: index {} expected {}",
            page, owner, index_id
        )));
    }
    let next = d.read_u32()?;
    let count = d.read_i32()?;
    if count < 0 {
        return Err(corrupted(format!("btree leaf {}: bad count {}", page, count)));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let pos = d.read_i64()?;
        let len = d.read_i32()?;
        if len < 0 {
            return Err(corrupted(format!("btree leaf {}: bad key length {}", page, len)));
        }
        let mut payload = vec![0u8; len as usize];
        d.read_bytes(&mut payload)?;
        let mut kd = Data::from_bytes(payload);
        let n = kd.read_var_int()?;
        let mut key = Vec::with_capacity(n as usize);
        for _ in 0..n {
            key.push(Value::read(&mut kd)?);
        }
        entries.push(BtreeEntry { pos, key });
    }
    Ok((next, entries))
}

fn store_leaf(
    store: &mut PageStore,
    page: u32,
    index_id: i32,
    next: u32,
    entries: &[BtreeEntry],
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let d = build_leaf(ps, index_id, next, entries);
    store.record_mut(page)?.data = d;
    store.update_record(page, true, None)
}

fn init_leaf(
    store: &mut PageStore,
    page: u32,
    index_id: i32,
    next: u32,
    entries: &[BtreeEntry],
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let d = build_leaf(ps, index_id, next, entries);
    store.put_record(Record::new(page, PageKind::BtreeLeaf, d))?;
    store.update_record(page, true, None)
}

pub(crate) fn create(store: &mut PageStore, index_id: i32, at: Option<u32>) -> Result<u32> {
    let head = match at {
        Some(p) => {
            store.allocate_page_at(p)?;
            p
        }
        None => store.allocate_page()?,
    };
    init_leaf(store, head, index_id, NO_PAGE, &[])?;
    Ok(head)
}

/// Разложить записи переполненного листа по нужному числу страниц.
fn store_spill(
    store: &mut PageStore,
    page: u32,
    index_id: i32,
    tail_next: u32,
    entries: Vec<BtreeEntry>,
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let mut chunks: Vec<Vec<BtreeEntry>> = vec![Vec::new()];
    let mut used = LEAF_HEADER;
    for e in entries {
        let sz = e.disk_size();
        if LEAF_HEADER + sz > ps {
            return Err(DbError::General(format!(
                "index key too large for page size {}",
                ps
            ))
            .into());
        }
        if used + sz > ps {
            chunks.push(Vec::new());
            used = LEAF_HEADER;
        }
        used += sz;
        chunks.last_mut().map(|c| c.push(e));
    }
    let mut pages = vec![page];
    for _ in 1..chunks.len() {
        pages.push(store.allocate_page()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = if i + 1 < pages.len() {
            pages[i + 1]
        } else {
            tail_next
        };
        if i == 0 {
            store_leaf(store, pages[i], index_id, next, chunk)?;
        } else {
            init_leaf(store, pages[i], index_id, next, chunk)?;
        }
    }
    Ok(())
}

pub(crate) fn add_row(store: &mut PageStore, info: &BtreeInfo, row: &Row) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let entry = BtreeEntry {
        pos: row.get_pos(),
        key: key_of(info, row)?,
    };
    let mut page = info.head_pos;
    let mut guard = 0u32;
    loop {
        let (next, mut entries) = read_leaf(store, page, info.id)?;
        let belongs_here = next == NO_PAGE
            || entries
                .last()
                .map(|last| compare(info, &entry, last) != Ordering::Greater)
                .unwrap_or(false);
        if !belongs_here {
            page = next;
            guard += 1;
            if guard > store.get_page_count() {
                return Err(corrupted("btree leaf chain does not terminate"));
            }
            continue;
        }
        let idx = entries.partition_point(|e| compare(info, e, &entry) == Ordering::Less);
        entries.insert(idx, entry);
        let total = LEAF_HEADER + entries.iter().map(|e| e.disk_size()).sum::<usize>();
        if total <= ps {
            return store_leaf(store, page, info.id, next, &entries);
        }
        return store_spill(store, page, info.id, next, entries);
    }
}

pub(crate) fn remove_row(store: &mut PageStore, info: &BtreeInfo, row: &Row) -> Result<()> {
    let head = info.head_pos;
    let mut prev: Option<u32> = None;
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, mut entries) = read_leaf(store, page, info.id)?;
        if let Some(idx) = entries.iter().position(|e| e.pos == row.get_pos()) {
            entries.remove(idx);
            if entries.is_empty() && page != head {
                if let Some(p) = prev {
                    let (_, p_entries) = read_leaf(store, p, info.id)?;
                    store_leaf(store, p, info.id, next, &p_entries)?;
                }
                store.free_page(page, true, None)?;
            } else {
                store_leaf(store, page, info.id, next, &entries)?;
            }
            return Ok(());
        }
        if next == NO_PAGE {
            return Err(internal(format!(
                "row {} not found in index {}",
                row.get_pos(),
                info.id
            )));
        }
        prev = Some(page);
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("btree leaf chain does not terminate"));
        }
    }
}

pub(crate) fn truncate(store: &mut PageStore, info: &BtreeInfo) -> Result<()> {
    let head = info.head_pos;
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, _) = read_leaf(store, page, info.id)?;
        if page == head {
            store_leaf(store, page, info.id, NO_PAGE, &[])?;
        } else {
            store.free_page(page, true, None)?;
        }
        if next == NO_PAGE {
            return Ok(());
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("btree leaf chain does not terminate"));
        }
    }
}

pub(crate) fn remove_all(store: &mut PageStore, index_id: i32, head: u32) -> Result<()> {
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, _) = read_leaf(store, page, index_id)?;
        store.free_page(page, true, None)?;
        if next == NO_PAGE {
            return Ok(());
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("btree leaf chain does not terminate"));
        }
    }
}

/// Позиции строк в порядке индекса.
pub(crate) fn row_positions(store: &mut PageStore, info: &BtreeInfo) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut page = info.head_pos;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, info.id)?;
        out.extend(entries.iter().map(|e| e.pos));
        if next == NO_PAGE {
            return Ok(out);
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("btree leaf chain does not terminate"));
        }
    }
}
