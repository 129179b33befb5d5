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

/// Подготовить файл: таблица закоммичена сессией 1, сессия 5 добавила
/// строки и выполнила prepare commit, после чего процесс упал.
fn prepared_db(path: &PathBuf, tx_name: &str) {
    let mut store = PageStore::open(path, StoreConfig::default()).expect("open");
    let ddl = Session::new(1);
    store.create_table(&ddl, 7, 1, false).expect("create");
    store.commit(&ddl).expect("commit ddl");

    let prepared = Session::new(5);
    for i in 0..3 {
        let mut row = Row::new(vec![Value::Int(i)]);
        store.add_row(&prepared, 7, &mut row).expect("add");
    }
    store.prepare_commit(&prepared, tx_name).expect("prepare");
    drop(store);
}

#[test]
fn prepared_transaction_blocks_writes_until_resolved() {
    let path = unique_db("indoubt-ro");
    prepared_db(&path, "tx-blocked");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let list = store.get_in_doubt_transactions();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].session_id, 5);
        assert_eq!(list[0].name, "tx-blocked");

        // до разрешения база только на чтение
        let mut row = Row::new(vec![Value::Int(9)]);
        let e = store.add_row(&Session::new(1), 7, &mut row).unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_DATABASE_READ_ONLY));
        store.close().expect("close");
    }
    cleanup(&path);
}

#[test]
fn resolve_commit_keeps_rows() {
    let path = unique_db("indoubt-commit");
    prepared_db(&path, "tx-commit");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let t = store.get_in_doubt_transactions().remove(0);
        store
            .set_in_doubt_transaction_state(t.session_id, t.page_id, true)
            .expect("resolve");
        store.close().expect("close");
    }
    {
        // после переоткрытия сессия 5 считается закоммиченной
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("reopen");
        assert!(store.get_in_doubt_transactions().is_empty());
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 3);

        // база снова изменяема
        let session = Session::new(1);
        let mut row = Row::new(vec![Value::Int(9)]);
        store.add_row(&session, 7, &mut row).expect("add");
        store.commit(&session).expect("commit");
        store.close().expect("close");
    }
    cleanup(&path);
}

#[test]
fn resolve_rollback_discards_rows() {
    let path = unique_db("indoubt-rollback");
    prepared_db(&path, "tx-rollback");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let t = store.get_in_doubt_transactions().remove(0);
        store
            .set_in_doubt_transaction_state(t.session_id, t.page_id, false)
            .expect("resolve");
        store.close().expect("close");
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("reopen");
        assert!(store.get_in_doubt_transactions().is_empty());
        // таблица (сессия 1) на месте, строки сессии 5 — нет
        assert!(store.table_exists(7));
        assert!(store.get_rows(7).expect("rows").is_empty());
        store.close().expect("close");
    }
    cleanup(&path);
}
