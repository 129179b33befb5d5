//! Checkpoint: сброс грязных записей, ротация лога, усечение его
//! префикса и зануление неиспользуемых страниц.

use anyhow::Result;
use log::{debug, trace};

use crate::consts::PAGE_ID_FREE_LIST_ROOT;
use crate::data::Data;
use crate::errors::internal;
use crate::metrics;
use crate::store::PageStore;

impl PageStore {
    /// После checkpoint все закоммиченные изменения лежат в страницах
    /// данных, а лог усечён до префикса, удерживаемого незакоммиченными
    /// сессиями. Неиспользуемые страницы заполняются нулями (лучше
    /// сжимаются в бэкапах).
    pub fn checkpoint(&mut self) -> Result<()> {
        debug!("checkpoint");
        if self.log.is_none() || self.file.is_none() || self.db.is_read_only() {
            return Ok(());
        }
        self.db.check_power_off()?;
        self.write_back_all()?;
        self.with_log(|log, store| log.checkpoint(store))?;
        self.switch_log()?;
        // усечение могло тронуть free-list
        self.write_back_all()?;
        let zero = Data::create(self.page_size as usize);
        let mut zeroed = 0u32;
        for pos in PAGE_ID_FREE_LIST_ROOT..self.page_count {
            if !self.is_used(pos)? {
                // свободная страница не может оставаться в кэше записей
                if self.cache.find(pos).is_some() {
                    return Err(internal(format!("page {} is free but cached", pos)));
                }
                self.write_page(pos, &zero)?;
                zeroed += 1;
            }
        }
        trace!("checkpoint zero-filled {} pages", zeroed);
        metrics::record_checkpoint();
        Ok(())
    }

    /// Освободить поколения лога, не удерживаемые ни одной сессией,
    /// и переписать переменный заголовок.
    pub(crate) fn switch_log(&mut self) -> Result<()> {
        trace!("switch log");
        if self.log.is_none() || self.db.is_read_only() {
            return Ok(());
        }
        self.with_log(|log, store| log.remove_until(store))
    }
}
