//! Lightweight global metrics for the page store.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - файл страниц (чтения/записи),
//! - кэш страниц,
//! - WAL,
//! - checkpoint / recovery.
//!
//! write_count хранится двумя полями: base (значение из заголовка на момент
//! открытия) и session (приращение с момента открытия). Абсолютное значение —
//! их сумма; snapshot отдаёт оба поля отдельно.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Page file -----
static PAGES_READ: AtomicU64 = AtomicU64::new(0);
static PAGES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Page cache -----
static PAGE_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static PAGE_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

// ----- WAL -----
static WAL_RECORDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static WAL_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Checkpoint / recovery -----
static CHECKPOINTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECOVERIES_TOTAL: AtomicU64 = AtomicU64::new(0);

// ----- write counter (live-update split) -----
static WRITE_COUNT_BASE: AtomicU64 = AtomicU64::new(0);
static WRITE_COUNT_SESSION: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub pages_read: u64,
    pub pages_written: u64,

    pub page_cache_hits: u64,
    pub page_cache_misses: u64,

    pub wal_records_total: u64,
    pub wal_bytes_written: u64,

    pub checkpoints_total: u64,
    pub recoveries_total: u64,

    pub write_count_base: u64,
    pub write_count_session: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.page_cache_hits + self.page_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.page_cache_hits as f64 / total as f64
        }
    }

    /// Абсолютный write counter (base + session).
    pub fn write_count_total(&self) -> u64 {
        self.write_count_base + self.write_count_session
    }
}

// ----- Recorders -----

pub fn record_page_read() {
    PAGES_READ.fetch_add(1, Ordering::Relaxed);
}

pub fn record_page_write() {
    PAGES_WRITTEN.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cache_hit() {
    PAGE_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cache_miss() {
    PAGE_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wal_record(bytes: usize) {
    WAL_RECORDS_TOTAL.fetch_add(1, Ordering::Relaxed);
    WAL_BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_checkpoint() {
    CHECKPOINTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_recovery() {
    RECOVERIES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn set_write_count_base(v: u64) {
    WRITE_COUNT_BASE.store(v, Ordering::Relaxed);
    WRITE_COUNT_SESSION.store(0, Ordering::Relaxed);
}

pub fn record_write_count_increment() {
    WRITE_COUNT_SESSION.fetch_add(1, Ordering::Relaxed);
}

/// Снять срез всех счётчиков.
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        pages_read: PAGES_READ.load(Ordering::Relaxed),
        pages_written: PAGES_WRITTEN.load(Ordering::Relaxed),
        page_cache_hits: PAGE_CACHE_HITS.load(Ordering::Relaxed),
        page_cache_misses: PAGE_CACHE_MISSES.load(Ordering::Relaxed),
        wal_records_total: WAL_RECORDS_TOTAL.load(Ordering::Relaxed),
        wal_bytes_written: WAL_BYTES_WRITTEN.load(Ordering::Relaxed),
        checkpoints_total: CHECKPOINTS_TOTAL.load(Ordering::Relaxed),
        recoveries_total: RECOVERIES_TOTAL.load(Ordering::Relaxed),
        write_count_base: WRITE_COUNT_BASE.load(Ordering::Relaxed),
        write_count_session: WRITE_COUNT_SESSION.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_count_split_sums() {
        set_write_count_base(7);
        record_write_count_increment();
        record_write_count_increment();
        let s = snapshot();
        assert_eq!(s.write_count_base, 7);
        assert!(s.write_count_session >= 2);
        assert_eq!(s.write_count_total(), s.write_count_base + s.write_count_session);
    }
}
