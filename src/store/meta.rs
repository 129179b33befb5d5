//! Meta-индекс: самозагрузочный каталог таблиц и индексов.
//!
//! Meta-таблица PAGE_INDEX (id = -1, head — страница 4) хранит по строке
//! на объект: (ID, TYPE, PARENT, HEAD, OPTIONS, COLUMNS); ключ строки =
//! ID + 1. OPTIONS: "имя_сортировки,сила[,temp]"; COLUMNS: список
//! "колонка" или "колонка/sort_type" через запятую.

use anyhow::Result;
use log::{debug, trace};

use crate::consts::{
    META_TABLE_ID, META_TYPE_BTREE_INDEX, META_TYPE_SCAN_INDEX, NO_PAGE, PAGE_ID_META_ROOT,
    PAGE_TYPE_EMPTY, PAGE_TYPE_SCAN_LEAF,
};
use crate::data::Data;
use crate::engine::Session;
use crate::errors::{corrupted, internal};
use crate::index::{btree, scan};
use crate::row::Row;
use crate::store::PageStore;
use crate::value::Value;

/// Каталожное описание таблицы (scan-индекса).
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub id: i32,
    pub head_pos: u32,
    pub column_count: usize,
    pub temporary: bool,
    /// Имя режима сравнения строк ("OFF" — бинарный порядок).
    pub compare_name: String,
    pub compare_strength: i32,
    pub next_row_pos: i64,
    pub btree_ids: Vec<i32>,
}

/// Каталожное описание btree-индекса.
#[derive(Clone, Debug)]
pub struct BtreeInfo {
    pub id: i32,
    pub table_id: i32,
    pub head_pos: u32,
    pub columns: Vec<IndexColumn>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexColumn {
    pub column_id: usize,
    pub sort_type: i32,
}

impl IndexColumn {
    pub fn ascending(column_id: usize) -> Self {
        Self {
            column_id,
            sort_type: 0,
        }
    }

    pub fn descending(column_id: usize) -> Self {
        Self {
            column_id,
            sort_type: btree::SORT_DESCENDING,
        }
    }
}

pub(crate) fn format_options(t: &TableInfo) -> String {
    let mut s = format!("{},{}", t.compare_name, t.compare_strength);
    if t.temporary {
        s.push_str(",temp");
    }
    s
}

pub(crate) fn format_scan_columns(column_count: usize) -> String {
    (0..column_count)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn format_btree_columns(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            if c.sort_type == 0 {
                c.column_id.to_string()
            } else {
                format!("{}/{}", c.column_id, c.sort_type)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_btree_columns(columns: &str) -> Result<Vec<IndexColumn>> {
    let mut out = Vec::new();
    for part in columns.split(',').filter(|s| !s.is_empty()) {
        let (id, sort) = match part.split_once('/') {
            Some((id, sort)) => (id, sort),
            None => (part, "0"),
        };
        let column_id: usize = id
            .parse()
            .map_err(|_| corrupted(format!("bad index column: {:?}", part)))?;
        let sort_type: i32 = sort
            .parse()
            .map_err(|_| corrupted(format!("bad index sort type: {:?}", part)))?;
        out.push(IndexColumn {
            column_id,
            sort_type,
        });
    }
    Ok(out)
}

impl PageStore {
    /// Зарегистрировать meta-таблицу; create создаёт пустой лист на
    /// странице 4. Нулевая страница при открытии означает сбой сразу
    /// после создания файла — лист пересоздаётся.
    pub(crate) fn open_meta_index(&mut self, create: bool) -> Result<()> {
        debug!("open meta index; create={}", create);
        self.tables.clear();
        self.btrees.clear();
        if create {
            scan::create(self, META_TABLE_ID, Some(PAGE_ID_META_ROOT))?;
        } else {
            let d = self.read_page(PAGE_ID_META_ROOT)?;
            match d.bytes()[0] {
                PAGE_TYPE_SCAN_LEAF => {}
                PAGE_TYPE_EMPTY => {
                    scan::create(self, META_TABLE_ID, Some(PAGE_ID_META_ROOT))?;
                }
                t => {
                    return Err(corrupted(format!(
                        "meta root page {}: unexpected type {}",
                        PAGE_ID_META_ROOT, t
                    )))
                }
            }
        }
        self.tables.insert(
            META_TABLE_ID,
            TableInfo {
                id: META_TABLE_ID,
                head_pos: PAGE_ID_META_ROOT,
                column_count: 6,
                temporary: false,
                compare_name: "OFF".into(),
                compare_strength: 0,
                next_row_pos: 1,
                btree_ids: Vec::new(),
            },
        );
        Ok(())
    }

    /// Прочитать каталог из meta-таблицы и зарегистрировать объекты.
    pub(crate) fn read_meta_data(&mut self) -> Result<()> {
        let rows = scan::rows(self, META_TABLE_ID, PAGE_ID_META_ROOT)?;
        debug!("read meta data: {} objects", rows.len());
        for row in &rows {
            self.add_meta(row, false)?;
        }
        Ok(())
    }

    /// Зарегистрировать объект из meta-строки. redo: head-страница
    /// зануляется и пересоздаётся (содержимое восстановит повтор
    /// последующих операций).
    pub(crate) fn add_meta(&mut self, row: &Row, redo: bool) -> Result<()> {
        let id = row.get_value(0).get_int()?;
        let meta_type = row.get_value(1).get_int()?;
        let parent = row.get_value(2).get_int()?;
        let head = row.get_value(3).get_int()? as u32;
        let options = row.get_value(4).get_string()?.to_string();
        let columns = row.get_value(5).get_string()?.to_string();
        trace!(
            "add meta id={} type={} parent={} head={} options={:?} columns={:?} redo={}",
            id,
            meta_type,
            parent,
            head,
            options,
            columns,
            redo
        );
        if redo && head != NO_PAGE {
            self.allocate_page_at(head)?;
            let zero = Data::create(self.page_size as usize);
            self.write_page(head, &zero)?;
        }
        match meta_type {
            META_TYPE_SCAN_INDEX => {
                let ops: Vec<&str> = options.split(',').collect();
                let mut info = TableInfo {
                    id,
                    head_pos: head,
                    column_count: columns.split(',').filter(|s| !s.is_empty()).count(),
                    temporary: false,
                    compare_name: "OFF".into(),
                    compare_strength: 0,
                    next_row_pos: 1,
                    btree_ids: Vec::new(),
                };
                if ops.len() >= 2 {
                    info.compare_name = ops[0].to_string();
                    info.compare_strength = ops[1]
                        .parse()
                        .map_err(|_| corrupted(format!("bad meta options: {:?}", options)))?;
                }
                if ops.len() >= 3 && ops[2] == "temp" {
                    info.temporary = true;
                }
                if redo {
                    scan::create(self, id, Some(head))?;
                } else {
                    info.next_row_pos = scan::max_key(self, id, head)? + 1;
                }
                self.tables.insert(id, info);
            }
            META_TYPE_BTREE_INDEX => {
                let cols = parse_btree_columns(&columns)?;
                match self.tables.get_mut(&parent) {
                    Some(t) => t.btree_ids.push(id),
                    None => {
                        return Err(corrupted(format!(
                            "btree index {} references missing table {}",
                            id, parent
                        )))
                    }
                }
                if redo {
                    btree::create(self, id, Some(head))?;
                }
                self.btrees.insert(
                    id,
                    BtreeInfo {
                        id,
                        table_id: parent,
                        head_pos: head,
                        columns: cols,
                    },
                );
            }
            t => return Err(corrupted(format!("unknown meta type: {}", t))),
        }
        Ok(())
    }

    /// Снять регистрацию объекта и освободить его страницы (redo meta-REMOVE).
    /// Head-страница, переиспользованная более поздней meta-ADD записью,
    /// остаётся занятой.
    pub(crate) fn remove_meta(&mut self, log_pos: u64, row: &Row) -> Result<()> {
        let id = row.get_value(0).get_int()?;
        trace!("remove meta {}", id);
        if let Some(b) = self.btrees.remove(&id) {
            btree::remove_all(self, b.id, b.head_pos)?;
            if let Some(t) = self.tables.get_mut(&b.table_id) {
                t.btree_ids.retain(|&x| x != id);
            }
            self.reallocate_reserved(log_pos, b.head_pos)?;
        } else if let Some(t) = self.tables.remove(&id) {
            scan::remove_all(self, t.id, t.head_pos)?;
            self.reallocate_reserved(log_pos, t.head_pos)?;
        }
        Ok(())
    }

    fn reallocate_reserved(&mut self, log_pos: u64, head: u32) -> Result<()> {
        if let Some(&latest) = self.reserved_pages.get(&head) {
            if latest > log_pos {
                self.allocate_page_at(head)?;
            }
        }
        Ok(())
    }

    /// Head-страницы из meta-ADD записей: free-list обязан считать их
    /// занятыми до конца recovery.
    pub(crate) fn reserve_if_head(&mut self, log_pos: u64, table_id: i32, row: &Row) -> Result<()> {
        if table_id != META_TABLE_ID {
            return Ok(());
        }
        if row.column_count() < 4 {
            return Err(corrupted("short meta row"));
        }
        let head = row.get_value(3).get_int()? as u32;
        if head != NO_PAGE {
            // последняя позиция в логе выигрывает
            self.reserved_pages.insert(head, log_pos);
        }
        Ok(())
    }

    /// Добавить meta-строку объекта (ключ = id + 1) через обычный путь
    /// записи строк.
    pub(crate) fn add_meta_entry(
        &mut self,
        session: &Session,
        id: i32,
        meta_type: i32,
        parent: i32,
        head: u32,
        options: String,
        columns: String,
    ) -> Result<()> {
        let mut row = Row::new(vec![
            Value::Int(id),
            Value::Int(meta_type),
            Value::Int(parent),
            Value::Int(head as i32),
            Value::String(options),
            Value::String(columns),
        ]);
        row.set_pos((id + 1) as i64);
        self.add_row(session, META_TABLE_ID, &mut row)
    }

    pub(crate) fn remove_meta_entry(&mut self, session: &Session, id: i32) -> Result<()> {
        let pos = (id + 1) as i64;
        let row = scan::find(self, META_TABLE_ID, PAGE_ID_META_ROOT, pos)?
            .ok_or_else(|| internal(format!("meta row for object {} not found", id)))?;
        self.remove_row(session, META_TABLE_ID, &row)
    }
}
