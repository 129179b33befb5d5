//! Таксономия ошибок движка со стабильными целочисленными кодами.
//!
//! Все ошибки поднимаются через anyhow::Error; вызывающий код может
//! сделать downcast до DbError и посмотреть code().

use std::path::Path;
use thiserror::Error;

pub const ERR_GENERAL: u32 = 50000;
pub const ERR_INTERNAL: u32 = 50004;
pub const ERR_IO_EXCEPTION: u32 = 90031;
pub const ERR_FILE_CORRUPTED: u32 = 90030;
pub const ERR_FILE_VERSION: u32 = 90048;
pub const ERR_DATABASE_READ_ONLY: u32 = 90097;
pub const ERR_SIMULATED_POWER_OFF: u32 = 90098;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("file corrupted: {0}")]
    FileCorrupted(String),

    #[error("unsupported file version: {0}")]
    FileVersion(String),

    #[error("i/o error on {file}: {detail}")]
    Io { file: String, detail: String },

    #[error("database is closed (simulated power off)")]
    PowerOff,

    #[error("database is read-only")]
    ReadOnly,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    General(String),
}

impl DbError {
    /// Стабильный код ошибки (контракт внешнего канала ошибок).
    pub fn code(&self) -> u32 {
        match self {
            DbError::FileCorrupted(_) => ERR_FILE_CORRUPTED,
            DbError::FileVersion(_) => ERR_FILE_VERSION,
            DbError::Io { .. } => ERR_IO_EXCEPTION,
            DbError::PowerOff => ERR_SIMULATED_POWER_OFF,
            DbError::ReadOnly => ERR_DATABASE_READ_ONLY,
            DbError::Internal(_) => ERR_INTERNAL,
            DbError::General(_) => ERR_GENERAL,
        }
    }
}

/// Ошибка "файл повреждён" с именем файла или страницей в сообщении.
pub fn corrupted(detail: impl Into<String>) -> anyhow::Error {
    DbError::FileCorrupted(detail.into()).into()
}

/// Внутренняя ошибка (недостижимая ветка, нарушенный инвариант).
pub fn internal(detail: impl Into<String>) -> anyhow::Error {
    DbError::Internal(detail.into()).into()
}

/// I/O ошибка, привязанная к имени файла.
pub fn io_error(file: &Path, e: std::io::Error) -> anyhow::Error {
    DbError::Io {
        file: file.display().to_string(),
        detail: e.to_string(),
    }
    .into()
}

/// Код ошибки из anyhow-цепочки, если в ней лежит DbError.
pub fn error_code(e: &anyhow::Error) -> Option<u32> {
    e.downcast_ref::<DbError>().map(|d| d.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DbError::FileCorrupted("x".into()).code(), 90030);
        assert_eq!(DbError::FileVersion("x".into()).code(), 90048);
        assert_eq!(DbError::PowerOff.code(), 90098);
        assert_eq!(DbError::ReadOnly.code(), 90097);
        assert_eq!(DbError::Internal("x".into()).code(), 50004);
    }

    #[test]
    fn downcast_through_anyhow() {
        let e = corrupted("page 9 of 6");
        assert_eq!(error_code(&e), Some(ERR_FILE_CORRUPTED));
        let e = e.context("open db");
        assert_eq!(error_code(&e), Some(ERR_FILE_CORRUPTED));
    }
}
