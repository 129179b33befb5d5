use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use BurrowDB::{PageStore, Row, Session, StoreConfig, Value};

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

/// Временная таблица живёт до переоткрытия: recovery её удаляет,
/// обычная таблица остаётся.
#[test]
fn temporary_table_is_dropped_on_reopen() {
    let path = unique_db("temp");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 1, 1, false).expect("create");
        store.create_table(&session, 2, 1, true).expect("create temp");
        for table in [1, 2] {
            let mut row = Row::new(vec![Value::Int(table)]);
            store.add_row(&session, table, &mut row).expect("add");
        }
        store.commit(&session).expect("commit");
        assert!(store.table_exists(2));
        store.close().expect("close");
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("reopen");
        assert!(store.table_exists(1));
        assert!(!store.table_exists(2));
        assert_eq!(store.get_rows(1).expect("rows").len(), 1);
        store.close().expect("close");
    }
    cleanup(&path);
}
