//! Байтовый поток WAL поверх страниц файла.
//!
//! Лог хранится в обычных страницах: trunk-страницы перечисляют
//! data-страницы своего поколения и ссылаются на следующий trunk;
//! data-страницы несут поток записей с offset 5. Записи пересекают
//! границы страниц (undo-образ целой страницы заведомо больше ёмкости
//! одной data-страницы).
//!
//! Запись ленивая: страница уходит на диск при заполнении и при flush().
//! Чтение валидирует тип и log id каждой страницы; нулевая или чужая
//! страница завершает поток (оборванный хвост после сбоя — норма).

use std::collections::VecDeque;

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    NO_PAGE, PAGE_TYPE_STREAM_DATA, PAGE_TYPE_STREAM_TRUNK, STREAM_DATA_HEADER,
    STREAM_TRUNK_HEADER,
};
use crate::data::Data;
use crate::store::PageStore;

/// Сколько data-страниц адресует один trunk.
pub(crate) fn trunk_capacity(page_size: u32) -> usize {
    (page_size as usize - STREAM_TRUNK_HEADER) / 4
}

/// Распарсенная trunk-страница.
pub(crate) struct TrunkPage {
    pub log_id: i32,
    pub next: u32,
    pub data_ids: Vec<u32>,
}

/// None — страница не является валидным trunk (конец цепочки).
pub(crate) fn parse_trunk(data: &mut Data, page_size: u32) -> Result<Option<TrunkPage>> {
    data.reset();
    if data.read_u8()? != PAGE_TYPE_STREAM_TRUNK {
        return Ok(None);
    }
    let log_id = data.read_i32()?;
    let next = data.read_u32()?;
    let count = data.read_i32()?;
    if count < 0 || count as usize > trunk_capacity(page_size) {
        return Ok(None);
    }
    let mut data_ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        data_ids.push(data.read_u32()?);
    }
    Ok(Some(TrunkPage {
        log_id,
        next,
        data_ids,
    }))
}

fn write_trunk(page_size: u32, log_id: i32, next: u32, data_ids: &[u32]) -> Data {
    let mut d = Data::create(page_size as usize);
    d.write_u8(PAGE_TYPE_STREAM_TRUNK);
    d.write_i32(log_id);
    d.write_u32(next);
    d.write_i32(data_ids.len() as i32);
    for &id in data_ids {
        d.write_u32(id);
    }
    d
}

fn new_data_buf(page_size: u32, log_id: i32) -> Data {
    let mut d = Data::create(page_size as usize);
    d.write_u8(PAGE_TYPE_STREAM_DATA);
    d.write_i32(log_id);
    d
}

// ---------------------------------------------------------------------------
// Запись
// ---------------------------------------------------------------------------

pub(crate) struct PageOutputStream {
    /// Текущее поколение; совпадает с log id активного trunk.
    log_id: i32,
    trunk_page: u32,
    trunk_data_ids: Vec<u32>,
    data_page: u32,
    buf: Data,
    dirty: bool,
    bytes_written: u64,
}

impl PageOutputStream {
    /// Страницы резервируются сразу, но на диск не пишутся до первой записи.
    pub fn open(store: &mut PageStore, trunk_page: u32, log_id: i32) -> Result<Self> {
        let data_page = store.allocate_page()?;
        let ps = store.get_page_size();
        Ok(Self {
            log_id,
            trunk_page,
            trunk_data_ids: vec![data_page],
            data_page,
            buf: new_data_buf(ps, log_id),
            dirty: false,
            bytes_written: 0,
        })
    }

    pub fn current_trunk(&self) -> u32 {
        self.trunk_page
    }

    pub fn current_data_page(&self) -> u32 {
        self.data_page
    }

    pub fn first_data_page(&self) -> u32 {
        self.trunk_data_ids.first().copied().unwrap_or(self.data_page)
    }

    pub fn log_id(&self) -> i32 {
        self.log_id
    }

    /// Байт, добавленных с последней ротации.
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    pub fn write(&mut self, store: &mut PageStore, bytes: &[u8]) -> Result<()> {
        let ps = store.get_page_size() as usize;
        let mut off = 0;
        while off < bytes.len() {
            let remaining = ps - self.buf.length();
            if remaining == 0 {
                self.seal_page(store)?;
                continue;
            }
            let n = remaining.min(bytes.len() - off);
            self.buf.write_bytes(&bytes[off..off + n]);
            off += n;
            self.dirty = true;
        }
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Следующая запись начнётся со свежей страницы (prepare-записи
    /// занимают страницу целиком).
    pub fn force_fresh_page(&mut self, store: &mut PageStore) -> Result<()> {
        if self.buf.length() > STREAM_DATA_HEADER {
            self.seal_page(store)?;
        }
        Ok(())
    }

    /// Закрыть текущую data-страницу и перейти к новой.
    pub fn seal_page(&mut self, store: &mut PageStore) -> Result<()> {
        store.write_page(self.data_page, &self.buf)?;
        let next = store.allocate_page()?;
        let ps = store.get_page_size();
        if self.trunk_data_ids.len() >= trunk_capacity(ps) {
            let t2 = store.allocate_page()?;
            let old = write_trunk(ps, self.log_id, t2, &self.trunk_data_ids);
            store.write_page(self.trunk_page, &old)?;
            self.trunk_page = t2;
            self.trunk_data_ids.clear();
        }
        self.trunk_data_ids.push(next);
        let trunk = write_trunk(ps, self.log_id, NO_PAGE, &self.trunk_data_ids);
        store.write_page(self.trunk_page, &trunk)?;
        self.data_page = next;
        self.buf = new_data_buf(ps, self.log_id);
        self.dirty = false;
        Ok(())
    }

    pub fn flush(&mut self, store: &mut PageStore) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        store.write_page(self.data_page, &self.buf)?;
        let ps = store.get_page_size();
        let trunk = write_trunk(ps, self.log_id, NO_PAGE, &self.trunk_data_ids);
        store.write_page(self.trunk_page, &trunk)?;
        self.dirty = false;
        Ok(())
    }

    /// Ротация поколения. Новый trunk и его первая data-страница сразу
    /// уходят на диск, прежний trunk получает ссылку на них: заголовок
    /// можно переставить на новое поколение, а цепочка прежнего остаётся
    /// читаемой, пока её удерживают незакоммиченные сессии.
    pub fn rotate(&mut self, store: &mut PageStore) -> Result<()> {
        self.flush(store)?;
        let t2 = store.allocate_page()?;
        let d2 = store.allocate_page()?;
        let ps = store.get_page_size();
        let old = write_trunk(ps, self.log_id, t2, &self.trunk_data_ids);
        store.write_page(self.trunk_page, &old)?;
        self.log_id += 1;
        self.trunk_page = t2;
        self.trunk_data_ids = vec![d2];
        self.data_page = d2;
        self.buf = new_data_buf(ps, self.log_id);
        let trunk = write_trunk(ps, self.log_id, NO_PAGE, &self.trunk_data_ids);
        store.write_page(t2, &trunk)?;
        store.write_page(d2, &self.buf)?;
        self.dirty = false;
        self.bytes_written = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Чтение
// ---------------------------------------------------------------------------

pub(crate) struct PageInputStream {
    next_trunk: u32,
    pending_data: VecDeque<u32>,
    page: Option<Data>,
    page_id: u32,
    log_id: i32,
    ended: bool,
}

impl PageInputStream {
    pub fn open(store: &mut PageStore, first_trunk: u32, first_data: u32) -> Result<Self> {
        let mut s = Self {
            next_trunk: NO_PAGE,
            pending_data: VecDeque::new(),
            page: None,
            page_id: NO_PAGE,
            log_id: -1,
            ended: false,
        };
        if !valid_page(store, first_trunk) {
            s.ended = true;
            return Ok(s);
        }
        let mut d = store.read_page(first_trunk)?;
        match parse_trunk(&mut d, store.get_page_size())? {
            None => s.ended = true,
            Some(t) => {
                let start = t
                    .data_ids
                    .iter()
                    .position(|&p| p == first_data)
                    .unwrap_or(0);
                s.pending_data = t.data_ids[start..].iter().copied().collect();
                s.log_id = t.log_id;
                s.next_trunk = t.next;
            }
        }
        Ok(s)
    }

    pub fn current_data_page(&self) -> u32 {
        self.page_id
    }

    pub fn log_id(&self) -> i32 {
        self.log_id
    }

    /// Дочитать до конца текущей data-страницы (маркер END_OF_PAGE).
    pub fn skip_rest_of_page(&mut self) {
        self.page = None;
    }

    fn next_page(&mut self, store: &mut PageStore) -> Result<bool> {
        loop {
            if self.ended {
                return Ok(false);
            }
            if let Some(id) = self.pending_data.pop_front() {
                if !valid_page(store, id) {
                    self.ended = true;
                    return Ok(false);
                }
                let mut d = store.read_page(id)?;
                d.reset();
                let kind = d.read_u8()?;
                let page_log = d.read_i32()?;
                if kind != PAGE_TYPE_STREAM_DATA || page_log != self.log_id {
                    self.ended = true;
                    return Ok(false);
                }
                self.page = Some(d);
                self.page_id = id;
                return Ok(true);
            }
            if !valid_page(store, self.next_trunk) {
                self.ended = true;
                return Ok(false);
            }
            let mut d = store.read_page(self.next_trunk)?;
            match parse_trunk(&mut d, store.get_page_size())? {
                None => {
                    self.ended = true;
                    return Ok(false);
                }
                Some(t) => {
                    self.pending_data = t.data_ids.into_iter().collect();
                    self.log_id = t.log_id;
                    self.next_trunk = t.next;
                }
            }
        }
    }

    /// false — поток закончился (в том числе посреди записи: оборванный
    /// хвост после сбоя).
    pub fn read_exact(&mut self, store: &mut PageStore, out: &mut [u8]) -> Result<bool> {
        let ps = store.get_page_size() as usize;
        let mut off = 0;
        while off < out.len() {
            let need_next = match self.page.as_ref() {
                None => true,
                Some(d) => d.length() >= ps,
            };
            if need_next {
                if !self.next_page(store)? {
                    return Ok(false);
                }
            }
            let d = match self.page.as_mut() {
                Some(d) => d,
                None => return Ok(false),
            };
            let avail = ps - d.length();
            let n = avail.min(out.len() - off);
            d.read_bytes(&mut out[off..off + n])?;
            off += n;
        }
        Ok(true)
    }

    pub fn read_u8(&mut self, store: &mut PageStore) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        if !self.read_exact(store, &mut b)? {
            return Ok(None);
        }
        Ok(Some(b[0]))
    }

    pub fn read_i32(&mut self, store: &mut PageStore) -> Result<Option<i32>> {
        let mut b = [0u8; 4];
        if !self.read_exact(store, &mut b)? {
            return Ok(None);
        }
        Ok(Some(BigEndian::read_i32(&b)))
    }

    pub fn read_u32(&mut self, store: &mut PageStore) -> Result<Option<u32>> {
        Ok(self.read_i32(store)?.map(|v| v as u32))
    }
}

fn valid_page(store: &PageStore, id: u32) -> bool {
    id != NO_PAGE && id != 0 && id < store.get_page_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trunk_capacity_matches_layout() {
        // [type u8][log_id i32][next u32][count i32] = 13 байт заголовка
        assert_eq!(STREAM_TRUNK_HEADER, 13);
        assert_eq!(trunk_capacity(1024), (1024 - 13) / 4);
        assert_eq!(trunk_capacity(128), (128 - 13) / 4);
    }

    #[test]
    fn trunk_roundtrip() {
        let ids = vec![7u32, 8, 135, 9];
        let mut d = write_trunk(1024, 3, 140, &ids);
        let t = parse_trunk(&mut d, 1024).unwrap().expect("trunk");
        assert_eq!(t.log_id, 3);
        assert_eq!(t.next, 140);
        assert_eq!(t.data_ids, ids);
    }

    #[test]
    fn empty_trunk_is_valid() {
        let mut d = write_trunk(512, 0, NO_PAGE, &[]);
        let t = parse_trunk(&mut d, 512).unwrap().expect("trunk");
        assert_eq!(t.next, NO_PAGE);
        assert!(t.data_ids.is_empty());
    }

    #[test]
    fn zero_page_ends_chain() {
        let mut d = Data::create(1024);
        assert!(parse_trunk(&mut d, 1024).unwrap().is_none());
    }

    #[test]
    fn foreign_page_ends_chain() {
        let mut d = Data::create(1024);
        d.write_u8(PAGE_TYPE_STREAM_DATA);
        d.write_i32(1);
        assert!(parse_trunk(&mut d, 1024).unwrap().is_none());
    }

    #[test]
    fn implausible_count_ends_chain() {
        let mut d = Data::create(128);
        d.write_u8(PAGE_TYPE_STREAM_TRUNK);
        d.write_i32(1);
        d.write_u32(NO_PAGE);
        d.write_i32(10_000);
        assert!(parse_trunk(&mut d, 128).unwrap().is_none());
    }
}
