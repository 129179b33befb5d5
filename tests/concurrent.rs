use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use BurrowDB::{Row, Session, SharedStore, StoreConfig, Value};

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

/// Несколько потоков пишут в свои таблицы через общий монитор;
/// после переоткрытия все строки на месте.
#[test]
fn parallel_writers_on_shared_store() {
    let path = unique_db("shared");
    let shared = SharedStore::open(&path, StoreConfig::default()).expect("open");

    const THREADS: i32 = 4;
    const ROWS: i32 = 50;
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let shared = shared.clone();
        handles.push(thread::spawn(move || {
            let session = Session::new(t + 1);
            let table = 10 + t;
            shared
                .with(|s| s.create_table(&session, table, 2, false))
                .expect("create");
            for i in 0..ROWS {
                shared
                    .with(|s| {
                        let mut row =
                            Row::new(vec![Value::Int(i), Value::String(format!("t{t}-{i}"))]);
                        s.add_row(&session, table, &mut row)
                    })
                    .expect("add");
            }
            shared.with(|s| s.commit(&session)).expect("commit");
        }));
    }
    for h in handles {
        h.join().expect("thread");
    }
    shared.with(|s| s.close()).expect("close");

    let shared = SharedStore::open(&path, StoreConfig::default()).expect("reopen");
    for t in 0..THREADS {
        let n = shared
            .with(|s| Ok(s.get_rows(10 + t)?.len()))
            .expect("rows");
        assert_eq!(n, ROWS as usize);
    }
    shared.with(|s| s.close()).expect("close");
    cleanup(&path);
}
