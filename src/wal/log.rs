//! PageLog: записи WAL и трёхфазный recovery.
//!
//! Формат записей (байтовый поток, числа i32/i64 BE):
//!   UNDO     [1][page u32][образ страницы, page_size байт]
//!   ADD      [2][session i32][table i32][len i32][строка]
//!   REMOVE   [3][session i32][table i32][len i32][строка]
//!   TRUNCATE [4][session i32][table i32]
//!   PREPARE  [5][session i32][len i32][имя UTF-8] — одна на страницу
//!   COMMIT   [6][session i32]
//!   ROLLBACK [7][session i32] — только при разрешении prepared-транзакции
//!
//! Recovery читает поток трижды: UNDO (восстановление образов, сбор
//! позиций коммитов и head-страниц meta-записей), ALLOCATE (принудительная
//! отметка затронутых страниц в free-list), REDO (повтор операций сессий,
//! закоммиченных после позиции операции).

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace, warn};

use crate::consts::{
    NO_PAGE, PAGE_TYPE_STREAM_DATA, STREAM_DATA_HEADER, WAL_ADD, WAL_COMMIT, WAL_END_OF_PAGE,
    WAL_PREPARE_COMMIT, WAL_REMOVE, WAL_ROLLBACK, WAL_TRUNCATE, WAL_UNDO,
};
use crate::data::Data;
use crate::errors::{corrupted, internal, DbError};
use crate::metrics;
use crate::row::Row;
use crate::store::PageStore;
use crate::wal::stream::{parse_trunk, PageInputStream, PageOutputStream};
use crate::wal::{InDoubtTransaction, SessionRegistry, SessionState};

/// Фаза recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStage {
    Undo,
    Allocate,
    Redo,
}

pub struct PageLog {
    log_id: i32,
    max_log_id_seen: i32,
    out: Option<PageOutputStream>,
    /// Страницы, чей undo-образ уже записан в текущем поколении.
    undone: HashSet<u32>,
    /// Живые сессии (удержание префикса лога).
    sessions: SessionRegistry,
    /// Позиции коммитов, собранные фазой UNDO.
    states: HashMap<i32, SessionState>,
    in_doubt: Vec<InDoubtTransaction>,
}

impl PageLog {
    pub fn new() -> Self {
        Self {
            log_id: 0,
            max_log_id_seen: -1,
            out: None,
            undone: HashSet::new(),
            sessions: SessionRegistry::default(),
            states: HashMap::new(),
            in_doubt: Vec::new(),
        }
    }

    pub fn log_id(&self) -> i32 {
        self.log_id
    }

    /// Байт в текущем поколении (порог ротации проверяет PageStore).
    pub fn size(&self) -> u64 {
        self.out.as_ref().map(|o| o.size()).unwrap_or(0)
    }

    pub fn in_doubt_transactions(&self) -> &[InDoubtTransaction] {
        &self.in_doubt
    }

    pub fn is_undone(&self, page_id: u32) -> bool {
        self.undone.contains(&page_id)
    }

    pub fn first_uncommitted_log(&self) -> i32 {
        self.sessions.first_uncommitted(self.log_id)
    }

    // ------------------------------------------------------------------
    // Запись
    // ------------------------------------------------------------------

    pub fn open_for_writing(&mut self, store: &mut PageStore, trunk_page: u32) -> Result<()> {
        debug!("log open for writing; trunk={} log_id={}", trunk_page, self.log_id);
        let out = PageOutputStream::open(store, trunk_page, self.log_id)?;
        store.set_log_first_page(trunk_page, out.current_data_page())?;
        self.out = Some(out);
        Ok(())
    }

    fn write_record(&mut self, store: &mut PageStore, bytes: &[u8]) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| internal("log is not open for writing"))?;
        out.write(store, bytes)?;
        metrics::record_wal_record(bytes.len());
        Ok(())
    }

    /// Undo-образ страницы; первый в поколении выигрывает, повторы не пишутся.
    pub fn add_undo(&mut self, store: &mut PageStore, page_id: u32, old: &Data) -> Result<()> {
        if self.undone.contains(&page_id) {
            return Ok(());
        }
        trace!("log undo {}", page_id);
        let ps = store.get_page_size() as usize;
        let mut rec = Data::empty();
        rec.write_u8(WAL_UNDO);
        rec.write_u32(page_id);
        rec.write_bytes(&old.bytes()[..ps]);
        let bytes = rec.bytes().to_vec();
        self.write_record(store, &bytes)?;
        self.undone.insert(page_id);
        Ok(())
    }

    pub fn log_add_or_remove_row(
        &mut self,
        store: &mut PageStore,
        session_id: i32,
        table_id: i32,
        row: &Row,
        add: bool,
    ) -> Result<()> {
        trace!(
            "log {} s={} table={} pos={}",
            if add { "add" } else { "remove" },
            session_id,
            table_id,
            row.get_pos()
        );
        self.sessions.mark(session_id, self.log_id);
        let mut buf = Data::empty();
        row.write(&mut buf);
        let mut rec = Data::empty();
        rec.write_u8(if add { WAL_ADD } else { WAL_REMOVE });
        rec.write_i32(session_id);
        rec.write_i32(table_id);
        rec.write_i32(buf.length() as i32);
        rec.write_bytes(&buf.bytes()[..buf.length()]);
        let bytes = rec.bytes().to_vec();
        self.write_record(store, &bytes)
    }

    pub fn log_truncate(
        &mut self,
        store: &mut PageStore,
        session_id: i32,
        table_id: i32,
    ) -> Result<()> {
        trace!("log truncate s={} table={}", session_id, table_id);
        self.sessions.mark(session_id, self.log_id);
        let mut rec = Data::empty();
        rec.write_u8(WAL_TRUNCATE);
        rec.write_i32(session_id);
        rec.write_i32(table_id);
        let bytes = rec.bytes().to_vec();
        self.write_record(store, &bytes)
    }

    pub fn commit(&mut self, store: &mut PageStore, session_id: i32) -> Result<()> {
        trace!("log commit s={}", session_id);
        let mut rec = Data::empty();
        rec.write_u8(WAL_COMMIT);
        rec.write_i32(session_id);
        let bytes = rec.bytes().to_vec();
        self.write_record(store, &bytes)?;
        self.flush(store)?;
        store.sync_file()?;
        self.sessions.committed(session_id);
        Ok(())
    }

    /// Запись PREPARE занимает data-страницу целиком: при внешнем
    /// разрешении транзакции страница переписывается на месте.
    pub fn prepare_commit(
        &mut self,
        store: &mut PageStore,
        session_id: i32,
        name: &str,
    ) -> Result<()> {
        debug!("log prepare commit s={} name={:?}", session_id, name);
        let ps = store.get_page_size() as usize;
        let mut rec = Data::empty();
        rec.write_u8(WAL_PREPARE_COMMIT);
        rec.write_i32(session_id);
        rec.write_string(name);
        if STREAM_DATA_HEADER + rec.length() > ps {
            return Err(DbError::General(format!(
                "transaction name too long for page size {}: {:?}",
                ps, name
            ))
            .into());
        }
        self.sessions.mark(session_id, self.log_id);
        {
            let out = self
                .out
                .as_mut()
                .ok_or_else(|| internal("log is not open for writing"))?;
            out.force_fresh_page(store)?;
        }
        let bytes = rec.bytes().to_vec();
        self.write_record(store, &bytes)?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| internal("log is not open for writing"))?;
        out.seal_page(store)?;
        store.sync_file()
    }

    pub fn flush(&mut self, store: &mut PageStore) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            out.flush(store)?;
        }
        Ok(())
    }

    /// Ротация поколения; undo-образы начинаются заново. Пустое
    /// поколение не ротируется (checkpoint без записей — no-op).
    pub fn checkpoint(&mut self, store: &mut PageStore) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| internal("log is not open for writing"))?;
        if out.size() > 0 {
            out.rotate(store)?;
            self.log_id = out.log_id();
            self.undone.clear();
            debug!("log checkpoint; log_id={}", self.log_id);
        }
        store.sync_file()
    }

    /// Освободить поколения, не удерживаемые ни одной сессией, и
    /// переписать переменный заголовок на новое начало лога.
    pub fn remove_until(&mut self, store: &mut PageStore) -> Result<()> {
        let first_log = self.first_uncommitted_log();
        trace!("log remove until {}", first_log);
        let ps = store.get_page_size();
        let mut trunk = store.get_log_first_trunk();
        let mut guard = 0u32;
        loop {
            let active = self
                .out
                .as_ref()
                .map(|o| o.current_trunk() == trunk)
                .unwrap_or(false);
            if active {
                let first_data = self
                    .out
                    .as_ref()
                    .map(|o| o.first_data_page())
                    .unwrap_or(NO_PAGE);
                return store.set_log_first_page(trunk, first_data);
            }
            if trunk == NO_PAGE || trunk == 0 || trunk >= store.get_page_count() {
                break;
            }
            let mut d = store.read_page(trunk)?;
            let t = match parse_trunk(&mut d, ps)? {
                Some(t) => t,
                None => break,
            };
            if t.log_id >= first_log {
                let first_data = t.data_ids.first().copied().unwrap_or(NO_PAGE);
                return store.set_log_first_page(trunk, first_data);
            }
            for id in t.data_ids {
                if id != NO_PAGE && id != 0 && id < store.get_page_count() {
                    store.free_page(id, false, None)?;
                }
            }
            store.free_page(trunk, false, None)?;
            trunk = t.next;
            guard += 1;
            if guard > store.get_page_count() {
                return Err(corrupted("log trunk chain does not terminate"));
            }
        }
        match self.out.as_ref() {
            Some(o) => {
                let (t, fd) = (o.current_trunk(), o.first_data_page());
                store.set_log_first_page(t, fd)
            }
            None => store.set_log_first_page(NO_PAGE, NO_PAGE),
        }
    }

    /// Освободить всю цепочку лога (перед открытием свежего после recovery).
    pub fn free(&mut self, store: &mut PageStore) -> Result<()> {
        self.out = None;
        let ps = store.get_page_size();
        let mut trunk = store.get_log_first_trunk();
        let mut guard = 0u32;
        while trunk != NO_PAGE && trunk != 0 && trunk < store.get_page_count() {
            let mut d = store.read_page(trunk)?;
            let t = match parse_trunk(&mut d, ps)? {
                Some(t) => t,
                None => break,
            };
            for id in t.data_ids {
                if id != NO_PAGE && id != 0 && id < store.get_page_count() {
                    store.free_page(id, false, None)?;
                }
            }
            store.free_page(trunk, false, None)?;
            trunk = t.next;
            guard += 1;
            if guard > store.get_page_count() {
                return Err(corrupted("log trunk chain does not terminate"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    pub fn recover(&mut self, store: &mut PageStore, stage: RecoveryStage) -> Result<()> {
        debug!("log recover stage {:?}", stage);
        let first_trunk = store.get_log_first_trunk();
        let first_data = store.get_log_first_data();
        let mut input = PageInputStream::open(store, first_trunk, first_data)?;
        if stage == RecoveryStage::Undo {
            self.states.clear();
        }
        if stage == RecoveryStage::Redo {
            self.in_doubt.clear();
        }
        let ps = store.get_page_size() as usize;
        let mut undone: HashSet<u32> = HashSet::new();
        let mut pos: u64 = 0;
        loop {
            let tag = match input.read_u8(store)? {
                Some(t) => t,
                None => break,
            };
            if tag == WAL_END_OF_PAGE {
                input.skip_rest_of_page();
                continue;
            }
            let record_page = input.current_data_page();
            pos += 1;
            let log_id = input.log_id();
            if log_id > self.max_log_id_seen {
                self.max_log_id_seen = log_id;
            }
            match tag {
                WAL_UNDO => {
                    let Some(page_id) = input.read_u32(store)? else {
                        warn!("torn undo record at end of log");
                        break;
                    };
                    let mut image = vec![0u8; ps];
                    if !input.read_exact(store, &mut image)? {
                        warn!("torn undo image at end of log");
                        break;
                    }
                    match stage {
                        RecoveryStage::Undo => {
                            if undone.insert(page_id) && page_id < store.get_page_count() {
                                trace!("undo page {}", page_id);
                                store.write_page(page_id, &Data::from_bytes(image))?;
                            }
                        }
                        RecoveryStage::Allocate => store.allocate_page_at(page_id)?,
                        RecoveryStage::Redo => {}
                    }
                }
                WAL_ADD | WAL_REMOVE => {
                    let Some((session_id, table_id, row)) = self.read_row_record(store, &mut input)?
                    else {
                        warn!("torn row record at end of log");
                        break;
                    };
                    match stage {
                        RecoveryStage::Undo => store.reserve_if_head(pos, table_id, &row)?,
                        RecoveryStage::Allocate => {}
                        RecoveryStage::Redo => {
                            if self.committed(session_id, log_id, pos) {
                                store.redo(pos, table_id, &row, tag == WAL_ADD)?;
                            } else {
                                trace!(
                                    "not redoing s={} table={} pos={}",
                                    session_id,
                                    table_id,
                                    row.get_pos()
                                );
                            }
                        }
                    }
                }
                WAL_TRUNCATE => {
                    let Some(session_id) = input.read_i32(store)? else {
                        break;
                    };
                    let Some(table_id) = input.read_i32(store)? else {
                        break;
                    };
                    if stage == RecoveryStage::Redo && self.committed(session_id, log_id, pos) {
                        store.redo_truncate(table_id)?;
                    }
                }
                WAL_PREPARE_COMMIT => {
                    let Some(session_id) = input.read_i32(store)? else {
                        break;
                    };
                    let Some(name) = self.read_string_record(store, &mut input)? else {
                        warn!("torn prepare record at end of log");
                        break;
                    };
                    if stage == RecoveryStage::Redo && !self.committed(session_id, log_id, pos) {
                        info!(
                            "in-doubt transaction found: s={} name={:?} page={}",
                            session_id, name, record_page
                        );
                        self.in_doubt.push(InDoubtTransaction {
                            session_id,
                            page_id: record_page,
                            name,
                        });
                    }
                }
                WAL_COMMIT => {
                    let Some(session_id) = input.read_i32(store)? else {
                        break;
                    };
                    if stage == RecoveryStage::Undo {
                        let st = self
                            .states
                            .entry(session_id)
                            .or_insert_with(SessionState::new);
                        st.last_commit_log = log_id;
                        st.last_commit_pos = pos;
                    }
                }
                WAL_ROLLBACK => {
                    // prepared-транзакция была разрешена откатом
                    let Some(_session_id) = input.read_i32(store)? else {
                        break;
                    };
                }
                other => {
                    warn!("unexpected log record tag {}, stopping scan", other);
                    break;
                }
            }
        }
        debug!("log recover stage {:?} done; {} records", stage, pos);
        Ok(())
    }

    fn read_row_record(
        &mut self,
        store: &mut PageStore,
        input: &mut PageInputStream,
    ) -> Result<Option<(i32, i32, Row)>> {
        let Some(session_id) = input.read_i32(store)? else {
            return Ok(None);
        };
        let Some(table_id) = input.read_i32(store)? else {
            return Ok(None);
        };
        let Some(len) = input.read_i32(store)? else {
            return Ok(None);
        };
        if len < 0 || len as usize > 16 * 1024 * 1024 {
            return Ok(None);
        }
        let mut bytes = vec![0u8; len as usize];
        if !input.read_exact(store, &mut bytes)? {
            return Ok(None);
        }
        let mut buf = Data::from_bytes(bytes);
        let row = Row::read(&mut buf)?;
        Ok(Some((session_id, table_id, row)))
    }

    fn read_string_record(
        &mut self,
        store: &mut PageStore,
        input: &mut PageInputStream,
    ) -> Result<Option<String>> {
        let Some(len) = input.read_i32(store)? else {
            return Ok(None);
        };
        if len < 0 || len as usize > store.get_page_size() as usize {
            return Ok(None);
        }
        let mut bytes = vec![0u8; len as usize];
        if !input.read_exact(store, &mut bytes)? {
            return Ok(None);
        }
        match String::from_utf8(bytes) {
            Ok(s) => Ok(Some(s)),
            Err(_) => Err(corrupted("invalid utf-8 in transaction name")),
        }
    }

    fn committed(&self, session_id: i32, log_id: i32, pos: u64) -> bool {
        self.states
            .get(&session_id)
            .map(|st| st.is_committed(log_id, pos))
            .unwrap_or(false)
    }

    /// Recovery завершён, in-doubt список пуст.
    pub fn recover_end(&mut self) {
        debug!("log recover end");
        self.states.clear();
        self.sessions.clear();
        self.undone.clear();
        self.log_id = self.max_log_id_seen + 1;
    }

    /// Переписать страницу PREPARE-записи на COMMIT либо ROLLBACK.
    pub fn set_in_doubt_transaction_state(
        &mut self,
        store: &mut PageStore,
        session_id: i32,
        page_id: u32,
        commit: bool,
    ) -> Result<()> {
        let idx = self
            .in_doubt
            .iter()
            .position(|t| t.session_id == session_id && t.page_id == page_id)
            .ok_or_else(|| {
                internal(format!(
                    "no in-doubt transaction for s={} page={}",
                    session_id, page_id
                ))
            })?;
        let existing = store.read_page(page_id)?;
        if existing.bytes()[0] != PAGE_TYPE_STREAM_DATA {
            return Err(corrupted(format!(
                "page {} is not a log data page",
                page_id
            )));
        }
        let page_log_id = BigEndian::read_i32(&existing.bytes()[1..5]);
        let ps = store.get_page_size() as usize;
        let mut d = Data::create(ps);
        d.write_u8(PAGE_TYPE_STREAM_DATA);
        d.write_i32(page_log_id);
        d.write_u8(if commit { WAL_COMMIT } else { WAL_ROLLBACK });
        d.write_i32(session_id);
        store.write_page(page_id, &d)?;
        store.sync_file()?;
        let t = self.in_doubt.remove(idx);
        info!(
            "in-doubt transaction {:?} (s={}) {}",
            t.name,
            t.session_id,
            if commit { "committed" } else { "rolled back" }
        );
        Ok(())
    }
}

impl Default for PageLog {
    fn default() -> Self {
        Self::new()
    }
}
