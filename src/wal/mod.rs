//! Write-ahead log: undo-образы страниц и логические операции над строками.
//!
//! Разделение:
//! - stream.rs — PageOutputStream/PageInputStream: байтовый поток поверх
//!   цепочки trunk/data-страниц, записи могут пересекать границы страниц.
//! - log.rs    — PageLog: формирование записей, трёхфазный recovery,
//!   состояния сессий, in-doubt транзакции, ротация и усечение префикса.
//!
//! В mod.rs — общие типы, видимые снаружи.

use std::collections::HashMap;

use crate::consts::LOG_WRITTEN;

pub mod log;
pub mod stream;

pub use log::{PageLog, RecoveryStage};

/// Prepared-but-not-committed транзакция, найденная при recovery.
#[derive(Clone, Debug, PartialEq)]
pub struct InDoubtTransaction {
    /// Сессия, выполнившая prepare.
    pub session_id: i32,
    /// Data-страница WAL, с которой начинается запись PREPARE.
    pub page_id: u32,
    /// Имя транзакции, заданное пользователем.
    pub name: String,
}

/// Состояние сессии на стороне recovery.
#[derive(Clone, Debug)]
pub(crate) struct SessionState {
    pub last_commit_log: i32,
    pub last_commit_pos: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            last_commit_log: -1,
            last_commit_pos: 0,
        }
    }

    /// Закоммичена ли операция в позиции (log_id, pos).
    pub fn is_committed(&self, log_id: i32, pos: u64) -> bool {
        self.last_commit_log > log_id
            || (self.last_commit_log == log_id && self.last_commit_pos > pos)
    }
}

/// Реестр живых сессий: session id -> первый лог с незакоммиченными записями.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    map: HashMap<i32, i32>,
}

impl SessionRegistry {
    /// Отметить запись сессии в текущем логе.
    pub fn mark(&mut self, session_id: i32, log_id: i32) {
        let e = self.map.entry(session_id).or_insert(LOG_WRITTEN);
        if *e == LOG_WRITTEN {
            *e = log_id;
        }
    }

    /// Сессия закоммичена: незакоммиченных записей нет.
    pub fn committed(&mut self, session_id: i32) {
        self.map.insert(session_id, LOG_WRITTEN);
    }

    /// Кратчайший удерживаемый префикс лога.
    pub fn first_uncommitted(&self, current_log_id: i32) -> i32 {
        let mut first = current_log_id;
        for &v in self.map.values() {
            if v != LOG_WRITTEN && v < first {
                first = v;
            }
        }
        first
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_commit_order() {
        let mut st = SessionState::new();
        assert!(!st.is_committed(0, 0));
        st.last_commit_log = 0;
        st.last_commit_pos = 5;
        assert!(st.is_committed(0, 3));
        assert!(!st.is_committed(0, 5));
        assert!(!st.is_committed(1, 0));
        st.last_commit_log = 2;
        assert!(st.is_committed(1, 999));
    }

    #[test]
    fn registry_retention() {
        let mut r = SessionRegistry::default();
        assert_eq!(r.first_uncommitted(4), 4);
        r.mark(1, 2);
        r.mark(1, 3); // уже отмечена, не переписывается
        r.mark(2, 3);
        assert_eq!(r.first_uncommitted(4), 2);
        r.committed(1);
        assert_eq!(r.first_uncommitted(4), 3);
        r.committed(2);
        assert_eq!(r.first_uncommitted(4), 4);
    }
}
