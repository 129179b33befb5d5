//! Scan-индекс: неупорядоченная цепочка листьев, первичное хранилище
//! строк таблицы.
//!
//! Лист: [type][table_id i32][next i32][count i32], далее записи
//! [pos i64][len i32][overflow i32][inline-байты, если overflow нет].
//! Строка, не помещающаяся в пустой лист, целиком уходит в overflow.

use anyhow::Result;

use crate::cache::{PageKind, Record};
use crate::consts::{LEAF_HEADER, NO_PAGE};
use crate::data::Data;
use crate::errors::{corrupted, internal};
use crate::index::overflow;
use crate::row::Row;
use crate::store::PageStore;

const ENTRY_OVERHEAD: usize = 8 + 4 + 4;

pub(crate) struct ScanEntry {
    pub pos: i64,
    pub len: usize,
    pub overflow: u32,
    pub inline: Vec<u8>,
}

impl ScanEntry {
    fn disk_size(&self) -> usize {
        ENTRY_OVERHEAD + self.inline.len()
    }
}

fn entries_size(entries: &[ScanEntry]) -> usize {
    entries.iter().map(|e| e.disk_size()).sum()
}

fn build_leaf(page_size: usize, table_id: i32, next: u32, entries: &[ScanEntry]) -> Data {
    let mut d = Data::create(page_size);
    d.write_u8(PageKind::ScanLeaf.type_byte());
    d.write_i32(table_id);
    d.write_u32(next);
    d.write_i32(entries.len() as i32);
    for e in entries {
        d.write_i64(e.pos);
        d.write_i32(e.len as i32);
        d.write_u32(e.overflow);
        if e.overflow == NO_PAGE {
            d.write_bytes(&e.inline);
        }
    }
    d
}

/// Лист из кэша (таблица обязана совпасть): (next, записи).
fn read_leaf(store: &mut PageStore, page: u32, table_id: i32) -> Result<(u32, Vec<ScanEntry>)> {
    store.load_record(page, PageKind::ScanLeaf)?;
    let mut d = store.record_mut(page)?.data.clone();
    d.reset();
    d.read_u8()?;
    let owner = d.read_i32()?;
    if owner != table_id {
        return Err(corrupted(format!(
            "scan leaf {}: table {} expected {}",
            page, owner, table_id
        )));
    }
    let next = d.read_u32()?;
    let count = d.read_i32()?;
    if count < 0 {
        return Err(corrupted(format!("scan leaf {}: bad count {}", page, count)));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let pos = d.read_i64()?;
        let len = d.read_i32()?;
        let ovf = d.read_u32()?;
        if len < 0 {
            return Err(corrupted(format!("scan leaf {}: bad row length {}", page, len)));
        }
        let mut inline = Vec::new();
        if ovf == NO_PAGE {
            inline = vec![0u8; len as usize];
            d.read_bytes(&mut inline)?;
        }
        entries.push(ScanEntry {
            pos,
            len: len as usize,
            overflow: ovf,
            inline,
        });
    }
    Ok((next, entries))
}

/// Переписать существующий лист (undo через update_record).
fn store_leaf(
    store: &mut PageStore,
    page: u32,
    table_id: i32,
    next: u32,
    entries: &[ScanEntry],
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let d = build_leaf(ps, table_id, next, entries);
    store.record_mut(page)?.data = d;
    store.update_record(page, true, None)
}

/// Свежевыделенная страница становится листом.
fn init_leaf(
    store: &mut PageStore,
    page: u32,
    table_id: i32,
    next: u32,
    entries: &[ScanEntry],
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let d = build_leaf(ps, table_id, next, entries);
    store.put_record(Record::new(page, PageKind::ScanLeaf, d))?;
    store.update_record(page, true, None)
}

/// Создать пустой индекс; at задаёт фиксированную head-страницу
/// (meta-корень), иначе страница выделяется.
pub(crate) fn create(store: &mut PageStore, table_id: i32, at: Option<u32>) -> Result<u32> {
    let head = match at {
        Some(p) => {
            store.allocate_page_at(p)?;
            p
        }
        None => store.allocate_page()?,
    };
    init_leaf(store, head, table_id, NO_PAGE, &[])?;
    Ok(head)
}

pub(crate) fn add_row(
    store: &mut PageStore,
    table_id: i32,
    head: u32,
    row: &Row,
) -> Result<()> {
    let ps = store.get_page_size() as usize;
    let mut buf = Data::empty();
    row.write(&mut buf);
    let bytes = &buf.bytes()[..buf.length()];
    let max_inline = ps - LEAF_HEADER - ENTRY_OVERHEAD;
    let entry = if bytes.len() > max_inline {
        let ovf = overflow::write_chain(store, bytes)?;
        ScanEntry {
            pos: row.get_pos(),
            len: bytes.len(),
            overflow: ovf,
            inline: Vec::new(),
        }
    } else {
        ScanEntry {
            pos: row.get_pos(),
            len: bytes.len(),
            overflow: NO_PAGE,
            inline: bytes.to_vec(),
        }
    };
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, mut entries) = read_leaf(store, page, table_id)?;
        if entries.iter().any(|e| e.pos == entry.pos) {
            return Err(internal(format!(
                "duplicate row key {} in table {}",
                entry.pos, table_id
            )));
        }
        if LEAF_HEADER + entries_size(&entries) + entry.disk_size() <= ps {
            entries.push(entry);
            return store_leaf(store, page, table_id, next, &entries);
        }
        if next == NO_PAGE {
            let new_leaf = store.allocate_page()?;
            init_leaf(store, new_leaf, table_id, NO_PAGE, &[entry])?;
            return store_leaf(store, page, table_id, new_leaf, &entries);
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

pub(crate) fn remove_row(
    store: &mut PageStore,
    table_id: i32,
    head: u32,
    row_pos: i64,
) -> Result<()> {
    let mut prev: Option<u32> = None;
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, mut entries) = read_leaf(store, page, table_id)?;
        if let Some(idx) = entries.iter().position(|e| e.pos == row_pos) {
            let e = entries.remove(idx);
            if e.overflow != NO_PAGE {
                overflow::free_chain(store, e.overflow)?;
            }
            if entries.is_empty() && page != head {
                // пустой неголовной лист выщёлкивается из цепочки
                if let Some(p) = prev {
                    let (_, p_entries) = read_leaf(store, p, table_id)?;
                    store_leaf(store, p, table_id, next, &p_entries)?;
                }
                store.free_page(page, true, None)?;
            } else {
                store_leaf(store, page, table_id, next, &entries)?;
            }
            return Ok(());
        }
        if next == NO_PAGE {
            return Err(internal(format!(
                "row {} not found in table {}",
                row_pos, table_id
            )));
        }
        prev = Some(page);
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

/// Убрать все строки; head остаётся пустым листом.
pub(crate) fn truncate(store: &mut PageStore, table_id: i32, head: u32) -> Result<()> {
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, table_id)?;
        for e in &entries {
            if e.overflow != NO_PAGE {
                overflow::free_chain(store, e.overflow)?;
            }
        }
        if page == head {
            store_leaf(store, page, table_id, NO_PAGE, &[])?;
        } else {
            store.free_page(page, true, None)?;
        }
        if next == NO_PAGE {
            return Ok(());
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

/// Освободить цепочку целиком, включая head (drop таблицы).
pub(crate) fn remove_all(store: &mut PageStore, table_id: i32, head: u32) -> Result<()> {
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, table_id)?;
        for e in &entries {
            if e.overflow != NO_PAGE {
                overflow::free_chain(store, e.overflow)?;
            }
        }
        store.free_page(page, true, None)?;
        if next == NO_PAGE {
            return Ok(());
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

fn entry_row(store: &mut PageStore, e: &ScanEntry) -> Result<Row> {
    let bytes = if e.overflow == NO_PAGE {
        e.inline.clone()
    } else {
        overflow::read_chain(store, e.overflow, e.len)?
    };
    let mut d = Data::from_bytes(bytes);
    Row::read(&mut d)
}

/// Все строки в порядке цепочки.
pub(crate) fn rows(store: &mut PageStore, table_id: i32, head: u32) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, table_id)?;
        for e in &entries {
            out.push(entry_row(store, e)?);
        }
        if next == NO_PAGE {
            return Ok(out);
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

pub(crate) fn find(
    store: &mut PageStore,
    table_id: i32,
    head: u32,
    pos: i64,
) -> Result<Option<Row>> {
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, table_id)?;
        for e in &entries {
            if e.pos == pos {
                return Ok(Some(entry_row(store, e)?));
            }
        }
        if next == NO_PAGE {
            return Ok(None);
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}

/// Позиция строки с теми же значениями (для удаления по значениям).
pub(crate) fn find_by_values(
    store: &mut PageStore,
    table_id: i32,
    head: u32,
    row: &Row,
) -> Result<Option<i64>> {
    for r in rows(store, table_id, head)? {
        if r.column_count() != row.column_count() {
            continue;
        }
        let same = (0..r.column_count()).all(|i| r.get_value(i) == row.get_value(i));
        if same {
            return Ok(Some(r.get_pos()));
        }
    }
    Ok(None)
}

/// Максимальный ключ строки (0 для пустой таблицы).
pub(crate) fn max_key(store: &mut PageStore, table_id: i32, head: u32) -> Result<i64> {
    let mut max = 0i64;
    let mut page = head;
    let mut guard = 0u32;
    loop {
        let (next, entries) = read_leaf(store, page, table_id)?;
        for e in &entries {
            if e.pos > max {
                max = e.pos;
            }
        }
        if next == NO_PAGE {
            return Ok(max);
        }
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("scan leaf chain does not terminate"));
        }
    }
}
