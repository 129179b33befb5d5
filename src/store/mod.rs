//! PageStore: страничный файл БД целиком.
//!
//! Раскладка файла:
//!   страница 0   — статический заголовок (сигнатура, размер страницы, версии)
//!   страницы 1,2 — две копии переменного заголовка (write counter + начало WAL)
//!   страница 3   — корень free-list
//!   страница 4   — корень meta-индекса
//!   страницы 5,6 — первые trunk/data-страницы WAL
//!
//! Один PageStore — один файл; параллельный доступ даёт SharedStore
//! (глобальный мьютекс, вся сериализация на нём). Суб-модули:
//! header (заголовки), io (страницы/кэш), alloc (free-list),
//! checkpoint, recover, meta, table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{debug, info};

use crate::cache::PageCache;
use crate::config::StoreConfig;
use crate::consts::{
    EMPTY_HEAD, INCREMENT_PAGES, MIN_PAGE_COUNT, NO_PAGE, PAGE_SIZE_MIN,
};
use crate::data::Data;
use crate::engine::{Database, Session};
use crate::errors::{corrupted, internal, DbError};
use crate::file::PageFile;
use crate::free;
use crate::lock::{try_acquire_exclusive_lock, try_acquire_shared_lock, LockGuard};
use crate::metrics;
use crate::row::Row;
use crate::wal::{InDoubtTransaction, PageLog};

mod alloc;
mod checkpoint;
mod header;
mod io;
mod meta;
mod recover;
mod table;

pub use meta::{BtreeInfo, IndexColumn, TableInfo};

pub struct PageStore {
    db: Arc<Database>,
    file_name: PathBuf,
    file: Option<PageFile>,
    _lock: Option<LockGuard>,
    config: StoreConfig,

    page_size: u32,
    page_size_shift: u32,
    page_count: u32,
    file_length: u64,

    /// Абсолютный write counter (persisted в переменном заголовке).
    write_count: u64,
    write_count_base: u64,

    log_first_trunk_page: u32,
    log_first_data_page: u32,

    pub(crate) cache: PageCache,
    free_list_pages_per_list: u32,
    /// Теневые образы страниц для read-only открытий: recovery пишет
    /// восстановленное состояние сюда, а не в файл; read_page смотрит
    /// сюда раньше диска.
    recovered_pages: HashMap<u32, Data>,

    pub(crate) recovery_running: bool,
    pub(crate) log: Option<PageLog>,

    pub(crate) tables: HashMap<i32, TableInfo>,
    pub(crate) btrees: HashMap<i32, BtreeInfo>,
    /// Head-страницы из meta-ADD записей лога: head -> последняя позиция.
    pub(crate) reserved_pages: HashMap<u32, u64>,
    system_table_head_pos: u32,

    max_log_size: u64,
    fully_opened: bool,
}

impl PageStore {
    /// Открыть файл БД; несуществующий или заведомо короткий файл
    /// пересоздаётся с нуля.
    pub fn open(path: &Path, config: StoreConfig) -> Result<PageStore> {
        let db = Database::new();
        if config.read_only {
            db.set_read_only(true);
        }
        let lock = if config.read_only {
            try_acquire_shared_lock(path)?
        } else {
            try_acquire_exclusive_lock(path)?
        };
        let mut store = PageStore {
            db,
            file_name: path.to_path_buf(),
            file: None,
            _lock: Some(lock),
            cache: PageCache::new(config.cache_size),
            max_log_size: config.max_log_size,
            config,
            page_size: 0,
            page_size_shift: 0,
            page_count: 0,
            file_length: 0,
            write_count: 0,
            write_count_base: 0,
            log_first_trunk_page: 0,
            log_first_data_page: 0,
            free_list_pages_per_list: 0,
            recovered_pages: HashMap::new(),
            recovery_running: false,
            log: None,
            tables: HashMap::new(),
            btrees: HashMap::new(),
            reserved_pages: HashMap::new(),
            system_table_head_pos: EMPTY_HEAD,
            fully_opened: false,
        };
        let existing = std::fs::metadata(path)
            .map(|m| m.len() >= (MIN_PAGE_COUNT * PAGE_SIZE_MIN) as u64)
            .unwrap_or(false);
        let res = if existing {
            store.open_existing()
        } else {
            store.open_new()
        };
        match res {
            Ok(()) => Ok(store),
            Err(e) => {
                store.file = None;
                store._lock = None;
                Err(e)
            }
        }
    }

    fn open_new(&mut self) -> Result<()> {
        if self.db.is_read_only() {
            return Err(DbError::General(format!(
                "cannot create database in read-only mode: {}",
                self.file_name.display()
            ))
            .into());
        }
        info!("creating {}", self.file_name.display());
        self.set_page_size(self.config.page_size)?;
        self.free_list_pages_per_list = free::pages_addressed(self.page_size);
        let mut file = self.db.open_file(&self.file_name, false)?;
        file.set_length(0)?;
        self.file = Some(file);
        self.page_count = 0;
        self.write_count = 0;
        self.write_count_base = 0;
        metrics::set_write_count_base(0);
        self.recovery_running = true;
        self.write_static_header()?;
        self.write_variable_header()?;
        self.log = Some(PageLog::new());
        self.increase_file_size(MIN_PAGE_COUNT)?;
        self.open_meta_index(true)?;
        let trunk = self.allocate_page()?;
        self.with_log(|log, store| log.open_for_writing(store, trunk))?;
        self.system_table_head_pos = EMPTY_HEAD;
        self.recovery_running = false;
        if self.page_count < MIN_PAGE_COUNT + INCREMENT_PAGES {
            self.increase_file_size(MIN_PAGE_COUNT + INCREMENT_PAGES - self.page_count)?;
        }
        self.fully_opened = true;
        debug!(
            "created; page_count={} write_count={}",
            self.page_count, self.write_count
        );
        Ok(())
    }

    fn open_existing(&mut self) -> Result<()> {
        info!("opening {}", self.file_name.display());
        let file = self.db.open_file(&self.file_name, self.db.is_read_only())?;
        self.file = Some(file);
        self.read_static_header()?;
        self.free_list_pages_per_list = free::pages_addressed(self.page_size);
        self.file_length = self.file_ref()?.length()?;
        self.page_count = (self.file_length >> self.page_size_shift) as u32;
        if self.page_count < MIN_PAGE_COUNT {
            if self.db.is_read_only() {
                return Err(corrupted(format!(
                    "unexpected database file size: {}",
                    self.file_length
                )));
            }
            self.file = None;
            return self.open_new();
        }
        self.read_variable_header()?;
        self.write_count_base = self.write_count;
        metrics::set_write_count_base(self.write_count);
        self.log = Some(PageLog::new());
        self.recover()?;
        if !self.db.is_read_only() {
            self.recovery_running = true;
            self.with_log(|log, store| log.free(store))?;
            let trunk = self.allocate_page()?;
            self.with_log(|log, store| log.open_for_writing(store, trunk))?;
            self.recovery_running = false;
            self.fully_opened = true;
            self.checkpoint()?;
        } else {
            self.fully_opened = true;
        }
        debug!(
            "opened; page_count={} write_count={}",
            self.page_count, self.write_count
        );
        Ok(())
    }

    /// Checkpoint (если файл изменяем) и закрытие файла и блокировки.
    pub fn close(&mut self) -> Result<()> {
        debug!("closing {}", self.file_name.display());
        if self.file.is_some() && self.fully_opened && !self.db.is_read_only() {
            self.checkpoint()?;
            self.sync_file()?;
        }
        self.log = None;
        self.file = None;
        self._lock = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Доступ к компонентам
    // ------------------------------------------------------------------

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(DbError::General("the database is closed".into()).into());
        }
        self.db.check_power_off()
    }

    pub(crate) fn file_mut(&mut self) -> Result<&mut PageFile> {
        self.file
            .as_mut()
            .ok_or_else(|| anyhow::Error::from(DbError::General("the database is closed".into())))
    }

    fn file_ref(&self) -> Result<&PageFile> {
        self.file
            .as_ref()
            .ok_or_else(|| anyhow::Error::from(DbError::General("the database is closed".into())))
    }

    /// Временно изъять лог, чтобы его методы могли звать &mut self.
    /// Пока лог изъят, update_record/allocate_page не пишут undo.
    pub(crate) fn with_log<R>(
        &mut self,
        f: impl FnOnce(&mut PageLog, &mut PageStore) -> Result<R>,
    ) -> Result<R> {
        let mut log = self
            .log
            .take()
            .ok_or_else(|| internal("page log is not open"))?;
        let r = f(&mut log, self);
        self.log = Some(log);
        r
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn get_page_size(&self) -> u32 {
        self.page_size
    }

    pub fn get_page_count(&self) -> u32 {
        self.page_count
    }

    /// Абсолютный write counter (persisted значение + приращение сессии).
    pub fn get_write_count(&self) -> u64 {
        self.write_count
    }

    /// Значение write counter на момент открытия файла.
    pub fn get_write_count_base(&self) -> u64 {
        self.write_count_base
    }

    pub(crate) fn get_log_first_trunk(&self) -> u32 {
        self.log_first_trunk_page
    }

    pub(crate) fn get_log_first_data(&self) -> u32 {
        self.log_first_data_page
    }

    pub(crate) fn set_log_first(&mut self, trunk: u32, data: u32) {
        self.log_first_trunk_page = trunk;
        self.log_first_data_page = data;
    }

    pub(crate) fn bump_write_count(&mut self) {
        self.write_count += 1;
        metrics::record_write_count_increment();
    }

    pub fn is_recovery_running(&self) -> bool {
        self.recovery_running
    }

    pub fn get_system_table_head_pos(&self) -> u32 {
        self.system_table_head_pos
    }

    /// Зарегистрированные таблицы (включая meta), по возрастанию id.
    pub fn get_tables(&self) -> Vec<TableInfo> {
        let mut v: Vec<TableInfo> = self.tables.values().cloned().collect();
        v.sort_by_key(|t| t.id);
        v
    }

    /// Зарегистрированные btree-индексы, по возрастанию id.
    pub fn get_btree_indexes(&self) -> Vec<BtreeInfo> {
        let mut v: Vec<BtreeInfo> = self.btrees.values().cloned().collect();
        v.sort_by_key(|b| b.id);
        v
    }

    pub(crate) fn set_system_table_head_pos(&mut self, pos: u32) {
        self.system_table_head_pos = pos;
    }

    // ------------------------------------------------------------------
    // Транзакционные операции (делегаты в PageLog)
    // ------------------------------------------------------------------

    /// COMMIT в лог + flush; при превышении порога размера лога — checkpoint.
    pub fn commit(&mut self, session: &Session) -> Result<()> {
        self.check_open()?;
        let sid = session.get_id();
        self.with_log(|log, store| log.commit(store, sid))?;
        let size = self.log.as_ref().map(|l| l.size()).unwrap_or(0);
        if size > self.max_log_size {
            debug!("log size {} above threshold, checkpointing", size);
            self.checkpoint()?;
        }
        Ok(())
    }

    /// PREPARE COMMIT: запись занимает отдельную страницу лога и может быть
    /// переписана на COMMIT/ROLLBACK при разрешении после сбоя.
    pub fn prepare_commit(&mut self, session: &Session, name: &str) -> Result<()> {
        self.check_open()?;
        self.db.check_writing_allowed()?;
        let sid = session.get_id();
        self.with_log(|log, store| log.prepare_commit(store, sid, name))
    }

    pub fn get_in_doubt_transactions(&self) -> Vec<InDoubtTransaction> {
        self.log
            .as_ref()
            .map(|l| l.in_doubt_transactions().to_vec())
            .unwrap_or_default()
    }

    /// Разрешить prepared-транзакцию, найденную recovery. Файл при этом
    /// может быть открыт read-only (флаг снимается на время записи);
    /// база остаётся read-only до переоткрытия.
    pub fn set_in_doubt_transaction_state(
        &mut self,
        session_id: i32,
        page_id: u32,
        commit: bool,
    ) -> Result<()> {
        self.check_open()?;
        let was_read_only = self.db.is_read_only();
        self.db.set_read_only(false);
        let r = self.with_log(|log, store| {
            log.set_in_doubt_transaction_state(store, session_id, page_id, commit)
        });
        self.db.set_read_only(was_read_only);
        r
    }

    pub(crate) fn log_add_or_remove_row(
        &mut self,
        session: &Session,
        table_id: i32,
        row: &Row,
        add: bool,
    ) -> Result<()> {
        if self.recovery_running {
            return Ok(());
        }
        let sid = session.get_id();
        self.with_log(|log, store| log.log_add_or_remove_row(store, sid, table_id, row, add))
    }

    pub(crate) fn log_truncate(&mut self, session: &Session, table_id: i32) -> Result<()> {
        if self.recovery_running {
            return Ok(());
        }
        let sid = session.get_id();
        self.with_log(|log, store| log.log_truncate(store, sid, table_id))
    }

    /// Сбросить буферизованный хвост лога на диск (без fsync).
    pub fn flush_log(&mut self) -> Result<()> {
        if self.file.is_none() || self.log.is_none() {
            return Ok(());
        }
        self.with_log(|log, store| log.flush(store))
    }

    /// Undo-образ страницы; no-op в recovery и пока лог изъят.
    pub(crate) fn add_undo(&mut self, pos: u32, old: &Data) -> Result<()> {
        if self.recovery_running || self.log.is_none() {
            return Ok(());
        }
        self.with_log(|log, store| log.add_undo(store, pos, old))
    }
}

/// Потокобезопасная обёртка: один общий монитор на все операции.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<PageStore>>,
}

impl SharedStore {
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(PageStore::open(path, config)?)),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PageStore) -> Result<R>) -> Result<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| internal("page store mutex poisoned"))?;
        f(&mut guard)
    }
}

/// Невалидный id страницы в человекочитаемом виде (для логов).
pub(crate) fn fmt_page(p: u32) -> String {
    if p == NO_PAGE {
        "none".to_string()
    } else {
        p.to_string()
    }
}
