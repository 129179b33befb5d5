use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use BurrowDB::{
    error_code, PageStore, Row, Session, StoreConfig, Value, ERR_DATABASE_READ_ONLY,
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

/// Чисто закрытый файл после нескольких циклов commit+checkpoint
/// открывается только на чтение: replay пуст, строки читаются, запись
/// отвергается.
#[test]
fn clean_file_opens_read_only_after_checkpoints() {
    let path = unique_db("ro-clean");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 7, 2, false).expect("create");
        for round in 0..2 {
            for i in 0..5 {
                let v = round * 5 + i;
                let mut row =
                    Row::new(vec![Value::Int(v), Value::String(format!("v{v}"))]);
                store.add_row(&session, 7, &mut row).expect("add");
            }
            store.commit(&session).expect("commit");
            store.checkpoint().expect("checkpoint");
        }
        store.close().expect("close");
    }
    {
        let mut store =
            PageStore::open(&path, StoreConfig::default().read_only(true)).expect("open ro");
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 10);

        let mut row = Row::new(vec![Value::Int(99), Value::String("no".into())]);
        let e = store.add_row(&Session::new(1), 7, &mut row).unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_DATABASE_READ_ONLY));
        store.close().expect("close");
    }
    cleanup(&path);
}

/// Read-only открытие файла после падения: recovery откатывает
/// незакоммиченную сессию в памяти, файл остаётся байт в байт прежним.
#[test]
fn read_only_recovery_leaves_file_untouched() {
    let path = unique_db("ro-crash");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let committed = Session::new(1);
        store.create_table(&committed, 7, 2, false).expect("create");
        for i in 0..20 {
            let mut row = Row::new(vec![Value::Int(i), Value::String(format!("v{i}"))]);
            store.add_row(&committed, 7, &mut row).expect("add");
        }
        store.commit(&committed).expect("commit");

        // незакоммиченные строки попадают на диск вместе с checkpoint
        let uncommitted = Session::new(2);
        for i in 0..5 {
            let mut row = Row::new(vec![Value::Int(100 + i), Value::String("lost".into())]);
            store.add_row(&uncommitted, 7, &mut row).expect("add lost");
        }
        store.checkpoint().expect("checkpoint");
        drop(store);
    }
    let before = fs::read(&path).expect("read file");
    {
        let mut store =
            PageStore::open(&path, StoreConfig::default().read_only(true)).expect("open ro");
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 20);
        let r = store.get_row(7, 5).expect("get").expect("present");
        assert_eq!(r.get_value(1), &Value::String("v4".into()));
        store.close().expect("close");
    }
    let after = fs::read(&path).expect("read file");
    assert_eq!(before, after, "read-only open must not modify the file");
    cleanup(&path);
}
