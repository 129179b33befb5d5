//! Аллокация страниц через цепочку free-list-страниц.
//!
//! Корни free-list лежат на фиксированных позициях 3 + i*K, где
//! K = (page_size - 1) * 8 — диапазон одной битовой карты. Заполненный
//! диапазон передаёт аллокацию следующему корню, при необходимости
//! файл растёт квантами INCREMENT_PAGES.
//!
//! Мутация free-list сама undo-логируется (старый образ читается с диска
//! до сброса); пока лог изъят (его собственные аллокации) undo
//! пропускается.

use anyhow::Result;
use log::trace;

use crate::cache::{PageKind, Record};
use crate::consts::{INCREMENT_PAGES, PAGE_ID_FREE_LIST_ROOT, PAGE_TYPE_EMPTY, PAGE_TYPE_FREE_LIST};
use crate::data::Data;
use crate::errors::{corrupted, internal};
use crate::free;
use crate::metrics;
use crate::store::PageStore;

impl PageStore {
    /// Корень free-list с индексом i, загруженный в кэш; нулевой страницей
    /// инициализируется свежая карта.
    fn ensure_free_list(&mut self, i: u32) -> Result<u32> {
        let k = self.free_list_pages_per_list;
        let p = PAGE_ID_FREE_LIST_ROOT + i * k;
        while p >= self.page_count {
            self.increase_file_size(INCREMENT_PAGES)?;
        }
        if self.cache.find(p).is_some() {
            metrics::record_cache_hit();
            return Ok(p);
        }
        metrics::record_cache_miss();
        let d = self.read_page(p)?;
        let t = d.bytes()[0];
        let mut rec = Record::new(p, PageKind::FreeList, d);
        if t == PAGE_TYPE_EMPTY {
            free::init(&mut rec.data);
        } else if t != PAGE_TYPE_FREE_LIST {
            return Err(corrupted(format!(
                "page {}: expected free list got type {}",
                p, t
            )));
        }
        self.put_record(rec)?;
        Ok(p)
    }

    /// Пометить free-list грязным и записать его undo-образ.
    fn free_list_changed(&mut self, list: u32) -> Result<()> {
        if let Some(r) = self.cache.find_mut(list) {
            r.changed = true;
        }
        if !self.recovery_running {
            let need = self
                .log
                .as_ref()
                .map(|l| !l.is_undone(list))
                .unwrap_or(false);
            if need {
                let old = self.read_page(list)?;
                self.add_undo(list, &old)?;
            }
        }
        Ok(())
    }

    fn list_for(&self, pos: u32) -> (u32, u32) {
        let k = self.free_list_pages_per_list;
        let i = (pos - PAGE_ID_FREE_LIST_ROOT) / k;
        let list = PAGE_ID_FREE_LIST_ROOT + i * k;
        (i, list)
    }

    /// Первая свободная страница; файл растёт при необходимости.
    pub fn allocate_page(&mut self) -> Result<u32> {
        self.check_open()?;
        let ps = self.page_size;
        let mut i = 0u32;
        loop {
            let list = self.ensure_free_list(i)?;
            let bit = {
                let r = self.record_mut(list)?;
                free::allocate(&mut r.data, ps)
            };
            if let Some(bit) = bit {
                self.free_list_changed(list)?;
                let pos = list + bit;
                while pos >= self.page_count {
                    self.increase_file_size(INCREMENT_PAGES)?;
                }
                trace!("allocated {}", pos);
                return Ok(pos);
            }
            i += 1;
        }
    }

    /// Принудительно пометить страницу занятой (redo-аллокация);
    /// уже занятая — молчаливый no-op.
    pub(crate) fn allocate_page_at(&mut self, pos: u32) -> Result<()> {
        if pos < PAGE_ID_FREE_LIST_ROOT {
            return Ok(());
        }
        self.check_open()?;
        let (i, list) = self.list_for(pos);
        self.ensure_free_list(i)?;
        while pos >= self.page_count {
            self.increase_file_size(INCREMENT_PAGES)?;
        }
        let changed = {
            let r = self.record_mut(list)?;
            free::allocate_at(&mut r.data, pos - list)
        };
        if changed {
            self.free_list_changed(list)?;
        }
        Ok(())
    }

    /// Освободить страницу. log_undo: записать undo-образ освобождаемой
    /// страницы (old — образ, если вызывающий его уже прочитал).
    pub(crate) fn free_page(&mut self, pos: u32, log_undo: bool, old: Option<Data>) -> Result<()> {
        self.check_open()?;
        if pos < PAGE_ID_FREE_LIST_ROOT {
            return Err(internal(format!("free of header page {}", pos)));
        }
        trace!("freeing {}", pos);
        self.cache.remove(pos);
        if self.recovery_running {
            let zero = Data::create(self.page_size as usize);
            self.write_page(pos, &zero)?;
        } else if log_undo {
            let old = match old {
                Some(o) => o,
                None => self.read_page(pos)?,
            };
            self.add_undo(pos, &old)?;
        }
        let (i, list) = self.list_for(pos);
        self.ensure_free_list(i)?;
        let changed = {
            let r = self.record_mut(list)?;
            free::free_bit(&mut r.data, pos - list)
        };
        if changed {
            self.free_list_changed(list)?;
        }
        Ok(())
    }

    /// Занята ли страница; служебные страницы 0..2 всегда заняты.
    pub fn is_used(&mut self, pos: u32) -> Result<bool> {
        if pos < PAGE_ID_FREE_LIST_ROOT {
            return Ok(true);
        }
        if pos >= self.page_count {
            return Ok(false);
        }
        let (i, list) = self.list_for(pos);
        self.ensure_free_list(i)?;
        let r = self.record_mut(list)?;
        Ok(free::is_used(&r.data, pos - list))
    }

    /// Рост файла квантами; write counter не двигается.
    pub(crate) fn increase_file_size(&mut self, inc: u32) -> Result<()> {
        let new_count = self.page_count + inc;
        let len = (new_count as u64) << self.page_size_shift;
        self.file_mut()?.set_length(len)?;
        self.page_count = new_count;
        self.file_length = len;
        trace!("increased file to {} pages", new_count);
        Ok(())
    }
}
