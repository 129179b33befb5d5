//! Табличные операции: DDL (создание/удаление таблиц и индексов) и
//! DML (строки). Каждая операция логируется до физических изменений;
//! в recovery логирование подавлено и тот же код выполняет повтор.

use anyhow::Result;
use log::debug;

use crate::consts::{META_TYPE_BTREE_INDEX, META_TYPE_SCAN_INDEX};
use crate::engine::Session;
use crate::errors::{internal, DbError};
use crate::index::{btree, scan};
use crate::row::Row;
use crate::store::meta::{format_btree_columns, format_options, format_scan_columns};
use crate::store::{BtreeInfo, IndexColumn, PageStore, TableInfo};

impl PageStore {
    fn table_info(&self, table_id: i32) -> Result<TableInfo> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or_else(|| internal(format!("table not found: {}", table_id)))
    }

    fn btree_info(&self, index_id: i32) -> Result<BtreeInfo> {
        self.btrees
            .get(&index_id)
            .cloned()
            .ok_or_else(|| internal(format!("index not found: {}", index_id)))
    }

    /// Создать таблицу: scan-индекс + meta-строка. Возвращает head-страницу.
    pub fn create_table(
        &mut self,
        session: &Session,
        table_id: i32,
        column_count: usize,
        temporary: bool,
    ) -> Result<u32> {
        self.check_open()?;
        self.db.check_writing_allowed()?;
        if table_id < 0 {
            return Err(internal(format!("bad table id: {}", table_id)));
        }
        if self.tables.contains_key(&table_id) {
            return Err(DbError::General(format!("table {} already exists", table_id)).into());
        }
        debug!(
            "create table {} columns={} temp={}",
            table_id, column_count, temporary
        );
        let head = scan::create(self, table_id, None)?;
        let info = TableInfo {
            id: table_id,
            head_pos: head,
            column_count,
            temporary,
            compare_name: "OFF".into(),
            compare_strength: 0,
            next_row_pos: 1,
            btree_ids: Vec::new(),
        };
        let options = format_options(&info);
        let columns = format_scan_columns(column_count);
        self.tables.insert(table_id, info);
        self.add_meta_entry(
            session,
            table_id,
            META_TYPE_SCAN_INDEX,
            table_id,
            head,
            options,
            columns,
        )?;
        if table_id == 0 {
            self.set_system_table_head_pos(head);
        }
        Ok(head)
    }

    /// Вставить строку (WAL до физических изменений). Нулевой ключ
    /// получает следующую позицию таблицы.
    pub fn add_row(&mut self, session: &Session, table_id: i32, row: &mut Row) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        let info = self.table_info(table_id)?;
        if row.get_pos() == 0 {
            row.set_pos(info.next_row_pos);
        }
        self.log_add_or_remove_row(session, table_id, row, true)?;
        scan::add_row(self, table_id, info.head_pos, row)?;
        for idx in &info.btree_ids {
            let b = self.btree_info(*idx)?;
            btree::add_row(self, &b, row)?;
        }
        if let Some(t) = self.tables.get_mut(&table_id) {
            if row.get_pos() >= t.next_row_pos {
                t.next_row_pos = row.get_pos() + 1;
            }
        }
        Ok(())
    }

    /// Удалить строку; нулевой ключ ищется по значениям.
    pub fn remove_row(&mut self, session: &Session, table_id: i32, row: &Row) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        let info = self.table_info(table_id)?;
        let mut row = row.clone();
        if row.get_pos() == 0 {
            let pos = scan::find_by_values(self, table_id, info.head_pos, &row)?
                .ok_or_else(|| DbError::General("row not found".into()))?;
            row.set_pos(pos);
        }
        self.log_add_or_remove_row(session, table_id, &row, false)?;
        scan::remove_row(self, table_id, info.head_pos, row.get_pos())?;
        for idx in &info.btree_ids {
            let b = self.btree_info(*idx)?;
            btree::remove_row(self, &b, &row)?;
        }
        Ok(())
    }

    /// Убрать все строки таблицы и её индексов.
    pub fn truncate_table(&mut self, session: &Session, table_id: i32) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        debug!("truncate table {}", table_id);
        let info = self.table_info(table_id)?;
        self.log_truncate(session, table_id)?;
        scan::truncate(self, table_id, info.head_pos)?;
        for idx in &info.btree_ids {
            let b = self.btree_info(*idx)?;
            btree::truncate(self, &b)?;
        }
        if let Some(t) = self.tables.get_mut(&table_id) {
            t.next_row_pos = 1;
        }
        Ok(())
    }

    /// Удалить таблицу вместе с индексами, meta-строками и страницами.
    pub fn drop_table(&mut self, session: &Session, table_id: i32) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        debug!("drop table {}", table_id);
        let info = self.table_info(table_id)?;
        for idx in info.btree_ids.clone() {
            self.drop_btree_index(session, idx)?;
        }
        self.remove_meta_entry(session, table_id)?;
        scan::remove_all(self, table_id, info.head_pos)?;
        self.tables.remove(&table_id);
        Ok(())
    }

    /// Создать btree-индекс и наполнить его существующими строками.
    pub fn create_btree_index(
        &mut self,
        session: &Session,
        index_id: i32,
        table_id: i32,
        columns: &[IndexColumn],
    ) -> Result<u32> {
        self.check_open()?;
        self.db.check_writing_allowed()?;
        if self.btrees.contains_key(&index_id) || self.tables.contains_key(&index_id) {
            return Err(DbError::General(format!("object {} already exists", index_id)).into());
        }
        let table = self.table_info(table_id)?;
        for c in columns {
            if c.column_id >= table.column_count {
                return Err(DbError::General(format!(
                    "index column {} out of range for table {}",
                    c.column_id, table_id
                ))
                .into());
            }
        }
        debug!("create btree index {} on table {}", index_id, table_id);
        let head = btree::create(self, index_id, None)?;
        let info = BtreeInfo {
            id: index_id,
            table_id,
            head_pos: head,
            columns: columns.to_vec(),
        };
        self.btrees.insert(index_id, info.clone());
        if let Some(t) = self.tables.get_mut(&table_id) {
            t.btree_ids.push(index_id);
        }
        for row in scan::rows(self, table_id, table.head_pos)? {
            btree::add_row(self, &info, &row)?;
        }
        let options = format!("{},{}", table.compare_name, table.compare_strength);
        let columns_s = format_btree_columns(&info.columns);
        self.add_meta_entry(
            session,
            index_id,
            META_TYPE_BTREE_INDEX,
            table_id,
            head,
            options,
            columns_s,
        )?;
        Ok(head)
    }

    pub fn drop_btree_index(&mut self, session: &Session, index_id: i32) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        debug!("drop btree index {}", index_id);
        let info = self.btree_info(index_id)?;
        self.remove_meta_entry(session, index_id)?;
        btree::remove_all(self, index_id, info.head_pos)?;
        self.btrees.remove(&index_id);
        if let Some(t) = self.tables.get_mut(&info.table_id) {
            t.btree_ids.retain(|&x| x != index_id);
        }
        Ok(())
    }

    /// Все строки таблицы в порядке цепочки листьев.
    pub fn get_rows(&mut self, table_id: i32) -> Result<Vec<Row>> {
        self.check_open()?;
        let info = self.table_info(table_id)?;
        scan::rows(self, table_id, info.head_pos)
    }

    /// Строка по ключу.
    pub fn get_row(&mut self, table_id: i32, pos: i64) -> Result<Option<Row>> {
        self.check_open()?;
        let info = self.table_info(table_id)?;
        scan::find(self, table_id, info.head_pos, pos)
    }

    /// Ключи строк в порядке btree-индекса.
    pub fn get_index_row_positions(&mut self, index_id: i32) -> Result<Vec<i64>> {
        self.check_open()?;
        let info = self.btree_info(index_id)?;
        btree::row_positions(self, &info)
    }

    pub fn get_head_pos(&self, table_id: i32) -> Result<u32> {
        Ok(self.table_info(table_id)?.head_pos)
    }

    pub fn table_exists(&self, table_id: i32) -> bool {
        self.tables.contains_key(&table_id)
    }

    pub fn index_exists(&self, index_id: i32) -> bool {
        self.btrees.contains_key(&index_id)
    }
}
