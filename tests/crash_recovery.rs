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

fn row2(a: i32, s: &str) -> Row {
    Row::new(vec![Value::Int(a), Value::String(s.into())])
}

/// Закоммиченные операции переживают падение без close(): страницы
/// данных оставались только в кэше, recovery восстанавливает их по логу.
#[test]
fn committed_rows_survive_crash() {
    let path = unique_db("crash-commit");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 7, 2, false).expect("create");
        for i in 0..20 {
            let mut row = row2(i, &format!("v{i}"));
            store.add_row(&session, 7, &mut row).expect("add");
        }
        store.commit(&session).expect("commit");
        // падение: без close, без checkpoint
        drop(store);
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        assert!(store.table_exists(7));
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 20);
        let r = store.get_row(7, 5).expect("get").expect("present");
        assert_eq!(r.get_value(1), &Value::String("v4".into()));
        store.close().expect("close");
    }
    cleanup(&path);
}

/// Незакоммиченные операции откатываются: undo-образы возвращают
/// страницы, redo пропускает сессию без COMMIT.
#[test]
fn uncommitted_rows_are_rolled_back() {
    let path = unique_db("crash-rollback");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let committed = Session::new(1);
        store.create_table(&committed, 7, 2, false).expect("create");
        let mut row = row2(100, "kept");
        store.add_row(&committed, 7, &mut row).expect("add kept");
        store.commit(&committed).expect("commit");

        let uncommitted = Session::new(2);
        for i in 0..10 {
            let mut row = row2(i, "lost");
            store.add_row(&uncommitted, 7, &mut row).expect("add lost");
        }
        // лог сброшен на диск, но COMMIT сессии 2 не записан
        store.flush_log().expect("flush");
        drop(store);
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_value(1), &Value::String("kept".into()));
        store.close().expect("close");
    }
    cleanup(&path);
}

/// TRUNCATE закоммиченной сессии повторяется при recovery.
#[test]
fn truncate_is_redone() {
    let path = unique_db("crash-truncate");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 4, 1, false).expect("create");
        for i in 0..8 {
            let mut row = Row::new(vec![Value::Int(i)]);
            store.add_row(&session, 4, &mut row).expect("add");
        }
        store.commit(&session).expect("commit");
        store.truncate_table(&session, 4).expect("truncate");
        let mut row = Row::new(vec![Value::Int(777)]);
        store.add_row(&session, 4, &mut row).expect("add after truncate");
        store.commit(&session).expect("commit 2");
        drop(store);
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let rows = store.get_rows(4).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_value(0), &Value::Int(777));
        store.close().expect("close");
    }
    cleanup(&path);
}

/// Лог, чьё поколение занимает несколько trunk-страниц, усекается
/// checkpoint-ом строго по границе поколения: undo-образы начала
/// поколения не теряются, и падение после дальнейшей нагрузки (включая
/// overflow-цепочки и удаления) восстанавливается без потерь.
#[test]
fn multi_trunk_log_survives_checkpoint_and_crash() {
    let path = unique_db("crash-trunks");
    let mut expected: Vec<(i64, i32)> = Vec::new();
    {
        let mut store = PageStore::open(
            &path,
            StoreConfig::default().page_size(512).cache_size(64),
        )
        .expect("open");
        let session = Session::new(1);
        store.create_table(&session, 7, 2, false).expect("create");
        // маленькие страницы: undo-образы быстро набирают несколько trunk
        for i in 0..150 {
            let text = if i % 7 == 0 {
                "x".repeat(900)
            } else {
                format!("v{i}")
            };
            let mut row = Row::new(vec![Value::Int(i), Value::String(text)]);
            store.add_row(&session, 7, &mut row).expect("add");
            expected.push((row.get_pos(), i));
        }
        store.commit(&session).expect("commit");
        store.checkpoint().expect("checkpoint");

        for i in 150..300 {
            let text = if i % 7 == 0 {
                "x".repeat(900)
            } else {
                format!("v{i}")
            };
            let mut row = Row::new(vec![Value::Int(i), Value::String(text)]);
            store.add_row(&session, 7, &mut row).expect("add");
            expected.push((row.get_pos(), i));
        }
        expected.retain(|&(pos, _)| {
            if pos % 5 != 0 {
                return true;
            }
            let row = store
                .get_row(7, pos)
                .expect("get")
                .expect("present");
            store.remove_row(&session, 7, &row).expect("remove");
            false
        });
        store.commit(&session).expect("commit 2");
        drop(store);
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let rows = store.get_rows(7).expect("rows");
        assert_eq!(rows.len(), expected.len());
        for &(pos, v) in &expected {
            let row = store.get_row(7, pos).expect("get").expect("present");
            assert_eq!(row.get_value(0), &Value::Int(v));
        }
        store.checkpoint().expect("checkpoint after recovery");
        store.close().expect("close");
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("reopen");
        assert_eq!(store.get_rows(7).expect("rows").len(), expected.len());
        store.close().expect("close");
    }
    cleanup(&path);
}

/// Повторное падение сразу после recovery (до первого checkpoint)
/// даёт тот же результат: recovery идемпотентен.
#[test]
fn double_crash_is_idempotent() {
    let path = unique_db("crash-double");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 9, 1, false).expect("create");
        let mut row = Row::new(vec![Value::Int(5)]);
        store.add_row(&session, 9, &mut row).expect("add");
        store.commit(&session).expect("commit");
        drop(store);
    }
    for _ in 0..2 {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        let rows = store.get_rows(9).expect("rows");
        assert_eq!(rows.len(), 1);
        drop(store); // снова без close
    }
    cleanup(&path);
}
