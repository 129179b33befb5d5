use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use BurrowDB::{error_code, PageStore, Row, Session, StoreConfig, Value, ERR_SIMULATED_POWER_OFF};

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

/// Симуляция отключения питания: все операции после флага падают
/// с кодом 90098, файл после переоткрытия согласован.
#[test]
fn operations_fail_after_power_off() {
    let path = unique_db("poweroff");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 7, 1, false).expect("create");
        let mut row = Row::new(vec![Value::Int(1)]);
        store.add_row(&session, 7, &mut row).expect("add");
        store.commit(&session).expect("commit");

        store.database().set_power_off();
        let mut row = Row::new(vec![Value::Int(2)]);
        let e = store.add_row(&session, 7, &mut row).unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_SIMULATED_POWER_OFF));
        let e = store.checkpoint().unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_SIMULATED_POWER_OFF));
        drop(store);
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 1);
        store.close().expect("close");
    }
    cleanup(&path);
}
