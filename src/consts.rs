//! Общие константы формата (заголовки, страницы, free-list, WAL, meta).

// -------- Статический заголовок (страница 0) --------
// Байты 0..48: сигнатура, повторённая три раза.
// Байты 48..52: размер страницы (i32 BE).
// Байт 52: write-version (не 0 => файл открывается только на чтение).
// Байт 53: read-version (не 0 => открытие запрещено).
pub const FILE_SIGNATURE: &[u8; 16] = b"-- H2 0.5/B -- \n";
pub const STATIC_HEADER_SIGNATURE_LEN: usize = 48;

pub const READ_VERSION: u8 = 0;
pub const WRITE_VERSION: u8 = 0;

// -------- Страницы --------
pub const PAGE_SIZE_MIN: u32 = 128;
pub const PAGE_SIZE_MAX: u32 = 32768;
pub const PAGE_SIZE_DEFAULT: u32 = 1024;

/// "Нет страницы" (на диске i32 = -1).
pub const NO_PAGE: u32 = u32::MAX;

// Фиксированная раскладка служебных страниц.
pub const PAGE_ID_VARIABLE_HEADER_1: u32 = 1;
pub const PAGE_ID_VARIABLE_HEADER_2: u32 = 2;
pub const PAGE_ID_FREE_LIST_ROOT: u32 = 3;
pub const PAGE_ID_META_ROOT: u32 = 4;

pub const MIN_PAGE_COUNT: u32 = 6;
pub const INCREMENT_PAGES: u32 = 128;

// Переменный заголовок (страницы 1 и 2, идентичные копии):
// [0..8)  write counter (i64 BE)
// [8..12) первый trunk-страница WAL (i32 BE)
// [12..16) первая data-страница WAL (i32 BE)
// [16..24) CRC-32 байтов 0..16, как 8-байтовое BE-значение (старшие 32 бита = 0)
pub const VARIABLE_HEADER_PAYLOAD: usize = 16;

// -------- Типы страниц (байт 0) --------
pub const PAGE_TYPE_EMPTY: u8 = 0;
pub const PAGE_TYPE_FREE_LIST: u8 = 1;
pub const PAGE_TYPE_SCAN_LEAF: u8 = 2;
pub const PAGE_TYPE_BTREE_LEAF: u8 = 3;
pub const PAGE_TYPE_STREAM_TRUNK: u8 = 4;
pub const PAGE_TYPE_STREAM_DATA: u8 = 5;
pub const PAGE_TYPE_OVERFLOW: u8 = 6;

// -------- WAL --------
// Trunk-страница: [type u8][log_id i32][next_trunk i32][count i32][count × data page id i32].
// Data-страница:  [type u8][log_id i32][поток записей с offset 5].
pub const STREAM_TRUNK_HEADER: usize = 13;
pub const STREAM_DATA_HEADER: usize = 5;

// Теги записей WAL (ведущий байт).
pub const WAL_END_OF_PAGE: u8 = 0;
pub const WAL_UNDO: u8 = 1;
pub const WAL_ADD: u8 = 2;
pub const WAL_REMOVE: u8 = 3;
pub const WAL_TRUNCATE: u8 = 4;
pub const WAL_PREPARE_COMMIT: u8 = 5;
pub const WAL_COMMIT: u8 = 6;
// Маркер разрешённой rollback-транзакции; пишется только при внешнем
// разрешении prepared-транзакции (set_in_doubt_transaction_state).
pub const WAL_ROLLBACK: u8 = 7;

/// Сессия без незакоммиченных записей в логе.
pub const LOG_WRITTEN: i32 = -1;

/// Порог размера лога (байт); превышение при commit() вызывает checkpoint.
pub const MAX_LOG_SIZE_DEFAULT: u64 = 32 * 1024 * 1024 / 10;

// -------- Meta-index --------
pub const META_TYPE_SCAN_INDEX: i32 = 0;
pub const META_TYPE_BTREE_INDEX: i32 = 1;
pub const META_TABLE_ID: i32 = -1;

/// Head-страница ещё не назначена.
pub const EMPTY_HEAD: u32 = NO_PAGE;

// -------- Листовые страницы индексов --------
// Scan-лист:  [type u8][table_id i32][next i32][count i32][записи с offset 13].
// Btree-лист: [type u8][index_id i32][next i32][count i32][записи с offset 13].
pub const LEAF_HEADER: usize = 13;
// Overflow:   [type u8][next i32][chunk_len i32][данные с offset 9].
pub const OVERFLOW_HEADER: usize = 9;

// -------- Кэш --------
pub const CACHE_SIZE_DEFAULT: usize = 1024;
