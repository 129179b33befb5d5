//! Страничный ввод-вывод и работа с кэшем записей.
//!
//! read_page/write_page ходят напрямую в файл (мимо кэша); записи
//! (Record) живут в кэше и уходят на диск через write_back. Грязная
//! запись не вытесняется: при нехватке места сбрасывается самая
//! старая грязная (undo-образ уже в логе, сброс посреди поколения
//! безопасен).

use std::io::Write;

use anyhow::Result;
use log::trace;

use crate::cache::{PageKind, Record};
use crate::data::Data;
use crate::errors::{corrupted, internal, DbError};
use crate::metrics;
use crate::store::PageStore;

impl PageStore {
    /// Прочитать страницу с диска (кэш записей не участвует). Теневой
    /// образ read-only recovery перекрывает дисковое содержимое.
    pub(crate) fn read_page(&mut self, pos: u32) -> Result<Data> {
        self.check_open()?;
        if pos >= self.page_count {
            return Err(corrupted(format!("page {} of {}", pos, self.page_count)));
        }
        if let Some(d) = self.recovered_pages.get(&pos) {
            return Ok(d.clone());
        }
        let ps = self.page_size as usize;
        let off = (pos as u64) << self.page_size_shift;
        let mut d = Data::create(ps);
        let f = self.file_mut()?;
        f.seek(off)?;
        f.read_fully(d.bytes_mut(), 0, ps)?;
        metrics::record_page_read();
        Ok(d)
    }

    /// Записать страницу на диск; каждый вызов двигает write counter.
    pub(crate) fn write_page(&mut self, pos: u32, data: &Data) -> Result<()> {
        self.check_open()?;
        if pos >= self.page_count {
            return Err(internal(format!(
                "write to page {} of {}",
                pos, self.page_count
            )));
        }
        let ps = self.page_size as usize;
        if data.capacity() < ps {
            return Err(internal(format!("short page buffer for {}", pos)));
        }
        if self.db.is_read_only() {
            // recovery на read-only файле: состояние остаётся в памяти
            self.recovered_pages.insert(pos, data.clone());
            return Ok(());
        }
        let off = (pos as u64) << self.page_size_shift;
        let f = self.file_mut()?;
        f.seek(off)?;
        f.write(data.bytes(), 0, ps)?;
        metrics::record_page_write();
        self.bump_write_count();
        Ok(())
    }

    pub(crate) fn sync_file(&mut self) -> Result<()> {
        self.file_mut()?.sync()
    }

    /// Запись из кэша, если она там есть (диск не читается).
    pub fn get_record(&self, pos: u32) -> Option<&Record> {
        self.cache.find(pos)
    }

    pub(crate) fn record_mut(&mut self, pos: u32) -> Result<&mut Record> {
        self.cache
            .find_mut(pos)
            .ok_or_else(|| internal(format!("record {} is not cached", pos)))
    }

    /// Гарантировать наличие записи в кэше; тип страницы на диске
    /// обязан совпасть с ожидаемым.
    pub(crate) fn load_record(&mut self, pos: u32, kind: PageKind) -> Result<()> {
        if self.cache.find(pos).is_some() {
            metrics::record_cache_hit();
            let _ = self.cache.get_mut(pos);
            return Ok(());
        }
        metrics::record_cache_miss();
        let d = self.read_page(pos)?;
        let t = d.bytes()[0];
        if t != kind.type_byte() {
            return Err(corrupted(format!(
                "page {}: expected type {} got {}",
                pos,
                kind.type_byte(),
                t
            )));
        }
        self.put_record(Record::new(pos, kind, d))
    }

    /// Вставить запись, освободив место: сначала вытесняются чистые,
    /// затем принудительно сбрасывается самая старая грязная.
    pub(crate) fn put_record(&mut self, rec: Record) -> Result<()> {
        while self.cache.len() >= self.cache.capacity() {
            if self.cache.evict_one_clean() {
                continue;
            }
            match self.cache.oldest_dirty() {
                Some(id) => self.write_back(id)?,
                None => break,
            }
        }
        self.cache.put(rec);
        Ok(())
    }

    /// Пометить запись изменённой и записать undo-образ (один на страницу
    /// за поколение). Образ читается с диска: кэш уже мутирован, диск ещё нет.
    pub(crate) fn update_record(
        &mut self,
        pos: u32,
        log_undo: bool,
        old: Option<Data>,
    ) -> Result<()> {
        self.check_open()?;
        if !self.recovery_running {
            self.db.check_writing_allowed()?;
        }
        trace!("update record {}", pos);
        match self.cache.get_mut(pos) {
            Some(r) => r.changed = true,
            None => return Err(internal(format!("update of uncached record {}", pos))),
        }
        if log_undo && !self.recovery_running {
            let need = self.log.as_ref().map(|l| !l.is_undone(pos)).unwrap_or(false);
            if need {
                let old = match old {
                    Some(o) => o,
                    None => self.read_page(pos)?,
                };
                self.add_undo(pos, &old)?;
            }
        }
        Ok(())
    }

    /// Сбросить одну запись на диск (если грязная).
    pub(crate) fn write_back(&mut self, pos: u32) -> Result<()> {
        let data = match self.cache.find(pos) {
            Some(r) if r.changed => r.data.clone(),
            _ => return Ok(()),
        };
        trace!("write back {}", pos);
        self.write_page(pos, &data)?;
        if let Some(r) = self.cache.find_mut(pos) {
            r.changed = false;
        }
        Ok(())
    }

    /// Сбросить все грязные записи по возрастанию id.
    pub(crate) fn write_back_all(&mut self) -> Result<()> {
        let ids = self.cache.get_all_changed();
        trace!("write back all: {} pages", ids.len());
        for id in ids {
            self.write_back(id)?;
        }
        Ok(())
    }

    /// Скопировать страницу в поток онлайн-бэкапа, минуя кэш.
    /// None — страница за концом файла, копирование завершено.
    pub fn copy_direct(&mut self, page_id: u32, out: &mut dyn Write) -> Result<Option<u32>> {
        self.check_open()?;
        if page_id >= self.page_count {
            return Ok(None);
        }
        let ps = self.page_size as usize;
        let off = (page_id as u64) << self.page_size_shift;
        let mut buf = vec![0u8; ps];
        let f = self.file_mut()?;
        f.seek(off)?;
        f.read_fully_direct(&mut buf, 0, ps)?;
        out.write_all(&buf).map_err(|e| {
            anyhow::Error::from(DbError::Io {
                file: "backup stream".into(),
                detail: e.to_string(),
            })
        })?;
        Ok(Some(page_id + 1))
    }
}
