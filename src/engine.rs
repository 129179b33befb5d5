//! Минимальные коллабораторы движка: Database (монитор-объект с флагами
//! состояния) и Session (идентификатор транзакционного контекста).
//!
//! Учёт per-session (первый незакоммиченный лог) живёт в PageLog;
//! здесь только то, что разделяется между хэндлами.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::DbError;
use crate::file::PageFile;

#[derive(Debug, Default)]
pub struct Database {
    read_only: AtomicBool,
    power_off: AtomicBool,
}

impl Database {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, ro: bool) {
        self.read_only.store(ro, Ordering::Release);
    }

    /// Взвести симуляцию отключения питания: дальнейшие операции падают.
    pub fn set_power_off(&self) {
        self.power_off.store(true, Ordering::Release);
    }

    pub fn check_power_off(&self) -> Result<()> {
        if self.power_off.load(Ordering::Acquire) {
            return Err(DbError::PowerOff.into());
        }
        Ok(())
    }

    pub fn check_writing_allowed(&self) -> Result<()> {
        self.check_power_off()?;
        if self.is_read_only() {
            return Err(DbError::ReadOnly.into());
        }
        Ok(())
    }

    pub fn open_file(&self, path: &Path, read_only: bool) -> Result<PageFile> {
        PageFile::open(path, read_only)
    }
}

/// Лёгкий хэндл сессии; состояние логирования ведёт PageLog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    id: i32,
}

impl Session {
    pub fn new(id: i32) -> Self {
        Self { id }
    }

    pub fn get_id(&self) -> i32 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{error_code, ERR_DATABASE_READ_ONLY, ERR_SIMULATED_POWER_OFF};

    #[test]
    fn flags() {
        let db = Database::new();
        assert!(db.check_writing_allowed().is_ok());
        db.set_read_only(true);
        let e = db.check_writing_allowed().unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_DATABASE_READ_ONLY));
        db.set_power_off();
        let e = db.check_power_off().unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_SIMULATED_POWER_OFF));
    }
}
