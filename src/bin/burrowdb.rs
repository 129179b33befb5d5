#![allow(non_snake_case)]
//! CLI для осмотра и обслуживания файлов BurrowDB.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use BurrowDB::{metrics_snapshot, PageStore, StoreConfig};

#[derive(Parser)]
#[command(name = "burrowdb", version, about = "BurrowDB page store tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Показать заголовки и каталог файла БД.
    Info {
        /// Путь к файлу БД.
        file: PathBuf,
    },
    /// Скопировать файл БД постранично в другой файл (онлайн-бэкап).
    Backup {
        /// Путь к файлу БД.
        file: PathBuf,
        /// Куда писать копию.
        dest: PathBuf,
    },
    /// Открыть файл, выполнить recovery и checkpoint, показать метрики.
    Metrics {
        /// Путь к файлу БД.
        file: PathBuf,
        /// Вывести снимок метрик как JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Info { file } => cmd_info(&file),
        Command::Backup { file, dest } => cmd_backup(&file, &dest),
        Command::Metrics { file, json } => cmd_metrics(&file, json),
    }
}

fn cmd_info(path: &PathBuf) -> Result<()> {
    let mut store = PageStore::open(path, StoreConfig::default().read_only(true))?;
    println!("file:        {}", path.display());
    println!("page size:   {}", store.get_page_size());
    println!("page count:  {}", store.get_page_count());
    println!("write count: {}", store.get_write_count());
    for t in store.get_tables() {
        println!(
            "table {:>4}: head={} columns={}{}",
            t.id,
            t.head_pos,
            t.column_count,
            if t.temporary { " temp" } else { "" }
        );
    }
    for b in store.get_btree_indexes() {
        println!(
            "index {:>4}: table={} head={} columns={}",
            b.id,
            b.table_id,
            b.head_pos,
            b.columns.len()
        );
    }
    for t in store.get_in_doubt_transactions() {
        println!(
            "in-doubt: session={} page={} name={:?}",
            t.session_id, t.page_id, t.name
        );
    }
    store.close()
}

fn cmd_backup(path: &PathBuf, dest: &PathBuf) -> Result<()> {
    let mut store = PageStore::open(path, StoreConfig::default().read_only(true))?;
    let mut out = BufWriter::new(File::create(dest)?);
    let mut page = 0u32;
    while let Some(next) = store.copy_direct(page, &mut out)? {
        page = next;
    }
    info!("copied {} pages to {}", page, dest.display());
    store.close()
}

fn cmd_metrics(path: &PathBuf, json: bool) -> Result<()> {
    let mut store = PageStore::open(path, StoreConfig::default())?;
    store.checkpoint()?;
    store.close()?;
    let snap = metrics_snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        println!("pages read:     {}", snap.pages_read);
        println!("pages written:  {}", snap.pages_written);
        println!("cache hits:     {}", snap.page_cache_hits);
        println!("cache misses:   {}", snap.page_cache_misses);
        println!("cache hit rate: {:.2}", snap.cache_hit_ratio());
        println!("wal records:    {}", snap.wal_records_total);
        println!("wal bytes:      {}", snap.wal_bytes_written);
        println!("checkpoints:    {}", snap.checkpoints_total);
        println!("recoveries:     {}", snap.recoveries_total);
        println!("write count:    {}", snap.write_count_total());
    }
    Ok(())
}
