//! Централизованная конфигурация движка.
//!
//! Задачи:
//! - одно место для тюнинга вместо разбросанных env-проверок;
//! - StoreConfig::from_env() читает переменные BDB_*;
//! - builder-сеттеры для программной настройки.

use crate::consts::{CACHE_SIZE_DEFAULT, MAX_LOG_SIZE_DEFAULT, PAGE_SIZE_DEFAULT};

/// Конфигурация PageStore.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Размер страницы для новых файлов (степень двойки, 128..=32768).
    /// Env: BDB_PAGE_SIZE (default 1024). Для существующих файлов
    /// размер читается из статического заголовка.
    pub page_size: u32,

    /// Размер кэша страниц в записях (не в байтах).
    /// Env: BDB_CACHE_PAGES (default 1024).
    pub cache_size: usize,

    /// Порог размера WAL в байтах; commit() сверх порога вызывает checkpoint.
    /// Env: BDB_MAX_LOG_SIZE (default 32 MiB / 10).
    pub max_log_size: u64,

    /// Открыть файл только на чтение.
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE_DEFAULT,
            cache_size: CACHE_SIZE_DEFAULT,
            max_log_size: MAX_LOG_SIZE_DEFAULT,
            read_only: false,
        }
    }
}

impl StoreConfig {
    /// Загрузить конфигурацию из окружения поверх дефолтов.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BDB_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.page_size = n;
            }
        }
        if let Ok(v) = std::env::var("BDB_CACHE_PAGES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.cache_size = n;
            }
        }
        if let Ok(v) = std::env::var("BDB_MAX_LOG_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.max_log_size = n;
            }
        }
        cfg
    }

    pub fn page_size(mut self, n: u32) -> Self {
        self.page_size = n;
        self
    }

    pub fn cache_size(mut self, n: usize) -> Self {
        self.cache_size = n;
        self
    }

    pub fn max_log_size(mut self, n: u64) -> Self {
        self.max_log_size = n;
        self
    }

    pub fn read_only(mut self, ro: bool) -> Self {
        self.read_only = ro;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.page_size, 1024);
        assert_eq!(cfg.cache_size, 1024);
        assert!(!cfg.read_only);
    }

    #[test]
    fn builder_chain() {
        let cfg = StoreConfig::default()
            .page_size(4096)
            .cache_size(16)
            .max_log_size(1 << 20)
            .read_only(true);
        assert_eq!(cfg.page_size, 4096);
        assert_eq!(cfg.cache_size, 16);
        assert_eq!(cfg.max_log_size, 1 << 20);
        assert!(cfg.read_only);
    }
}
