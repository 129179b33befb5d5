//! Recovery при открытии существующего файла: три прохода по логу
//! (UNDO, ALLOCATE, REDO), затем сброс кэша и зачистка временных таблиц.
//!
//! Prepared-транзакции, найденные recovery и не разрешённые, оставляют
//! базу открытой только на чтение до разрешения и переоткрытия.

use anyhow::Result;
use log::{debug, info};

use crate::consts::{EMPTY_HEAD, META_TABLE_ID};
use crate::engine::Session;
use crate::errors::internal;
use crate::metrics;
use crate::row::Row;
use crate::store::PageStore;
use crate::wal::RecoveryStage;

impl PageStore {
    /// Привести файл к согласованному состоянию по логу из переменного
    /// заголовка. Лог после этого остаётся открытым только на чтение;
    /// вызывающий освобождает его и открывает свежий.
    pub(crate) fn recover(&mut self) -> Result<()> {
        info!(
            "recovering {}; log first trunk={}",
            self.file_name.display(),
            super::fmt_page(self.get_log_first_trunk())
        );
        metrics::record_recovery();
        self.recovery_running = true;
        self.reserved_pages.clear();

        self.with_log(|log, store| log.recover(store, RecoveryStage::Undo))?;
        // head-страницы из meta-записей лога не должны достаться
        // аллокатору до конца REDO
        let mut reserved: Vec<u32> = self.reserved_pages.keys().copied().collect();
        reserved.sort_unstable();
        for page in reserved {
            self.allocate_page_at(page)?;
        }
        self.with_log(|log, store| log.recover(store, RecoveryStage::Allocate))?;

        self.open_meta_index(false)?;
        self.read_meta_data()?;
        self.with_log(|log, store| log.recover(store, RecoveryStage::Redo))?;

        let in_doubt = self
            .log
            .as_ref()
            .map(|l| l.in_doubt_transactions().len())
            .unwrap_or(0);
        if in_doubt > 0 {
            info!(
                "{} in-doubt transaction(s) found; database stays read-only until resolved",
                in_doubt
            );
        } else if !self.db.is_read_only() {
            self.with_log(|log, _| {
                log.recover_end();
                Ok(())
            })?;
            self.remove_temporary_tables()?;
        }

        self.system_table_head_pos = self
            .tables
            .get(&0)
            .map(|t| t.head_pos)
            .unwrap_or(EMPTY_HEAD);
        self.reserved_pages.clear();
        // на read-only файле write_back уводит страницы в теневые образы
        self.write_back_all()?;
        self.cache.clear();
        self.recovery_running = false;
        if in_doubt > 0 {
            self.db.set_read_only(true);
        }
        debug!("recovery done; in_doubt={}", in_doubt);
        Ok(())
    }

    fn remove_temporary_tables(&mut self) -> Result<()> {
        let session = Session::new(0);
        let temp: Vec<i32> = self
            .tables
            .values()
            .filter(|t| t.temporary && t.id >= 0)
            .map(|t| t.id)
            .collect();
        for id in temp {
            debug!("dropping temporary table {}", id);
            self.drop_table(&session, id)?;
        }
        Ok(())
    }

    /// Повтор ADD/REMOVE закоммиченной сессии. Meta-строки сперва
    /// обновляют каталог (и пересоздают head-страницу), затем операция
    /// идёт обычным путём записи строк.
    pub(crate) fn redo(
        &mut self,
        log_pos: u64,
        table_id: i32,
        row: &Row,
        add: bool,
    ) -> Result<()> {
        let session = Session::new(0);
        if table_id == META_TABLE_ID {
            if add {
                self.add_meta(row, true)?;
            } else {
                self.remove_meta(log_pos, row)?;
            }
        } else if !self.tables.contains_key(&table_id) {
            return Err(internal(format!(
                "redo references unknown table {}",
                table_id
            )));
        }
        if add {
            let mut row = row.clone();
            self.add_row(&session, table_id, &mut row)
        } else {
            self.remove_row(&session, table_id, row)
        }
    }

    /// Повтор TRUNCATE закоммиченной сессии.
    pub(crate) fn redo_truncate(&mut self, table_id: i32) -> Result<()> {
        if !self.tables.contains_key(&table_id) {
            return Err(internal(format!(
                "redo truncate references unknown table {}",
                table_id
            )));
        }
        let session = Session::new(0);
        self.truncate_table(&session, table_id)
    }
}
