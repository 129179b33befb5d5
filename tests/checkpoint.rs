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

/// Checkpoint без изменений между вызовами меняет только страницы 1 и 2
/// (переменный заголовок): пустое поколение не ротируется, новые
/// страницы не выделяются.
#[test]
fn checkpoint_without_changes_touches_only_headers() {
    let path = unique_db("ckpt-idem");
    let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
    let session = Session::new(1);
    store.create_table(&session, 7, 2, false).expect("create");
    for i in 0..50 {
        let mut row = Row::new(vec![Value::Int(i), Value::String(format!("v{i}"))]);
        store.add_row(&session, 7, &mut row).expect("add");
    }
    store.commit(&session).expect("commit");
    store.checkpoint().expect("checkpoint 1");

    let before = fs::read(&path).expect("read file");
    store.checkpoint().expect("checkpoint 2");
    let after = fs::read(&path).expect("read file");

    assert_eq!(before.len(), after.len());
    let ps = store.get_page_size() as usize;
    for (page, (a, b)) in before.chunks(ps).zip(after.chunks(ps)).enumerate() {
        if page == 1 || page == 2 {
            continue;
        }
        assert_eq!(a, b, "page {page} changed by an empty checkpoint");
    }
    store.close().expect("close");
    cleanup(&path);
}

/// После checkpoint все данные лежат в страницах: обрыв лога
/// (обнуление его страниц) ничего не теряет.
#[test]
fn checkpoint_makes_log_disposable() {
    let path = unique_db("ckpt-durable");
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
        let session = Session::new(1);
        store.create_table(&session, 7, 1, false).expect("create");
        for i in 0..30 {
            let mut row = Row::new(vec![Value::Int(i)]);
            store.add_row(&session, 7, &mut row).expect("add");
        }
        store.commit(&session).expect("commit");
        store.checkpoint().expect("checkpoint");
        drop(store); // падение после checkpoint
    }
    {
        let mut store = PageStore::open(&path, StoreConfig::default()).expect("recover");
        assert_eq!(store.get_rows(7).expect("rows").len(), 30);
        store.close().expect("close");
    }
    cleanup(&path);
}

/// Checkpoint зануляет свободные страницы: после drop таблицы её
/// бывшие страницы на диске нулевые (файл лучше сжимается).
#[test]
fn checkpoint_zero_fills_freed_pages() {
    let path = unique_db("ckpt-zero");
    let mut store = PageStore::open(&path, StoreConfig::default()).expect("open");
    let session = Session::new(1);
    store.create_table(&session, 7, 2, false).expect("create");
    for i in 0..200 {
        let mut row = Row::new(vec![Value::Int(i), Value::String("x".repeat(40))]);
        store.add_row(&session, 7, &mut row).expect("add");
    }
    store.commit(&session).expect("commit");
    store.drop_table(&session, 7).expect("drop");
    store.commit(&session).expect("commit 2");
    store.checkpoint().expect("checkpoint");

    let ps = store.get_page_size() as usize;
    let bytes = fs::read(&path).expect("read file");
    let mut zero_pages = 0;
    for page in 7..store.get_page_count() {
        if !store.is_used(page).expect("is_used") {
            let off = page as usize * ps;
            assert!(
                bytes[off..off + ps].iter().all(|&b| b == 0),
                "free page {page} is not zeroed"
            );
            zero_pages += 1;
        }
    }
    assert!(zero_pages > 0, "expected some freed pages");
    store.close().expect("close");
    cleanup(&path);
}
