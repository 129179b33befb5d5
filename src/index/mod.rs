//! Страничные индексы поверх PageStore.
//!
//! - scan: неупорядоченная цепочка листьев, первичное хранилище строк
//!   таблицы (ключ — позиция строки); большие строки уходят в overflow.
//! - btree: упорядоченная цепочка листьев по колонкам индекса.
//! - overflow: цепочки страниц для строк, не помещающихся в лист.
//!
//! Все функции работают через кэш записей PageStore и логируют undo
//! через update_record/free_page.

pub mod btree;
pub mod overflow;
pub mod scan;
