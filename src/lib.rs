#![allow(non_snake_case)]
//! BurrowDB — встраиваемый страничный движок хранения.
//!
//! Один файл БД из страниц фиксированного размера: статический и
//! переменный заголовки, bitmap free-list, WAL в trunk/data-страницах
//! с undo/redo recovery, meta-индекс как самозагрузочный каталог,
//! scan/btree-индексы и overflow-цепочки для больших строк.
//!
//! Точка входа — [`PageStore`] ([`SharedStore`] для многопоточного
//! доступа): открытие файла, таблицы и индексы, строки, commit /
//! prepare commit, checkpoint, backup.
//!
//! ```no_run
//! use BurrowDB::{PageStore, Session, StoreConfig, Row, Value};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut store = PageStore::open("data.bdb".as_ref(), StoreConfig::default())?;
//! let session = Session::new(1);
//! store.create_table(&session, 7, 2, false)?;
//! let mut row = Row::new(vec![Value::Int(1), Value::String("hello".into())]);
//! store.add_row(&session, 7, &mut row)?;
//! store.commit(&session)?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod consts;
pub mod data;
pub mod engine;
pub mod errors;
pub mod file;
pub mod free;
pub mod index;
pub mod lock;
pub mod metrics;
pub mod row;
pub mod store;
pub mod value;
pub mod wal;

pub use config::StoreConfig;
pub use engine::{Database, Session};
pub use errors::{
    error_code, DbError, ERR_DATABASE_READ_ONLY, ERR_FILE_CORRUPTED, ERR_FILE_VERSION,
    ERR_GENERAL, ERR_INTERNAL, ERR_IO_EXCEPTION, ERR_SIMULATED_POWER_OFF,
};
pub use metrics::{snapshot as metrics_snapshot, MetricsSnapshot};
pub use row::Row;
pub use store::{BtreeInfo, IndexColumn, PageStore, SharedStore, TableInfo};
pub use value::{Column, Value, ValueType};
pub use wal::InDoubtTransaction;
