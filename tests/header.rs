use std::fs;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use BurrowDB::{
    error_code, PageStore, Row, Session, StoreConfig, Value, ERR_DATABASE_READ_ONLY,
    ERR_FILE_CORRUPTED, ERR_FILE_VERSION,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_db(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bdb-{prefix}-{pid}-{t}-{id}.db"))
}

fn cleanup(path: &PathBuf) {
    let _ = fs::remove_file(path);
    let mut lock = path.as_os_str().to_os_string();
    lock.push(".lock");
    let _ = fs::remove_file(PathBuf::from(lock));
}

/// Создать файл с одной таблицей и строкой, закрыть.
fn make_db(path: &PathBuf) {
    let mut store = PageStore::open(path, StoreConfig::default()).expect("open");
    let session = Session::new(1);
    store.create_table(&session, 7, 1, false).expect("create");
    let mut row = Row::new(vec![Value::Int(11)]);
    store.add_row(&session, 7, &mut row).expect("add");
    store.commit(&session).expect("commit");
    store.close().expect("close");
}

fn patch(path: &PathBuf, offset: u64, bytes: &[u8]) {
    let mut f = OpenOptions::new().write(true).open(path).expect("open raw");
    f.seek(SeekFrom::Start(offset)).expect("seek");
    f.write_all(bytes).expect("write");
}

fn read_at(path: &PathBuf, offset: u64, len: usize) -> Vec<u8> {
    let mut f = fs::File::open(path).expect("open raw");
    f.seek(SeekFrom::Start(offset)).expect("seek");
    let mut buf = vec![0u8; len];
    f.read_exact(&mut buf).expect("read");
    buf
}

/// Побитая первая копия переменного заголовка: CRC не сходится,
/// открытие проходит по второй копии.
#[test]
fn fallback_to_second_header_copy() {
    let path = unique_db("hdr-fallback");
    make_db(&path);
    let good = read_at(&path, 1024, 16);
    let mut bad = good.clone();
    bad[0] ^= 0xFF; // ломаем старший байт write counter
    patch(&path, 1024, &bad);

    let mut store = PageStore::open(&path, StoreConfig::default()).expect("open via copy 2");
    let rows = store.get_rows(7).expect("rows");
    assert_eq!(rows.len(), 1);
    store.close().expect("close");
    cleanup(&path);
}

#[test]
fn both_header_copies_broken() {
    let path = unique_db("hdr-both");
    make_db(&path);
    for off in [1024u64, 2048] {
        let mut b = read_at(&path, off, 16);
        b[0] ^= 0xFF;
        patch(&path, off, &b);
    }
    let e = PageStore::open(&path, StoreConfig::default())
        .err()
        .expect("open must fail");
    assert_eq!(error_code(&e), Some(ERR_FILE_CORRUPTED));
    cleanup(&path);
}

#[test]
fn wrong_signature() {
    let path = unique_db("hdr-sig");
    make_db(&path);
    patch(&path, 0, b"not a database  ");
    let e = PageStore::open(&path, StoreConfig::default())
        .err()
        .expect("open must fail");
    assert_eq!(error_code(&e), Some(ERR_FILE_CORRUPTED));
    cleanup(&path);
}

/// Ненулевая read-version: файл создан более новым форматом, чтение запрещено.
#[test]
fn newer_read_version_rejects_open() {
    let path = unique_db("hdr-readver");
    make_db(&path);
    patch(&path, 53, &[1]);
    let e = PageStore::open(&path, StoreConfig::default())
        .err()
        .expect("open must fail");
    assert_eq!(error_code(&e), Some(ERR_FILE_VERSION));
    cleanup(&path);
}

/// Ненулевая write-version: файл открывается, но только на чтение.
#[test]
fn newer_write_version_opens_read_only() {
    let path = unique_db("hdr-writever");
    make_db(&path);
    patch(&path, 52, &[1]);

    let mut store = PageStore::open(&path, StoreConfig::default()).expect("open read-only");
    let rows = store.get_rows(7).expect("rows");
    assert_eq!(rows.len(), 1);
    let mut row = Row::new(vec![Value::Int(2)]);
    let e = store.add_row(&Session::new(1), 7, &mut row).unwrap_err();
    assert_eq!(error_code(&e), Some(ERR_DATABASE_READ_ONLY));
    store.close().expect("close");
    cleanup(&path);
}
