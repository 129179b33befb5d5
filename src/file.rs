//! Файловый адаптер: позиционные чтения/записи блоков фиксированного размера.
//!
//! Тонкая обёртка над std::fs::File; страница адресуется байтовым смещением,
//! которое считает вызывающая сторона (page store). Чтение за концом файла —
//! ошибка ввода-вывода; page store переводит её в FILE_CORRUPTED при чтении
//! заголовков.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::io_error;

pub struct PageFile {
    file: File,
    path: PathBuf,
    read_only: bool,
    pos: u64,
}

impl PageFile {
    /// Открыть (или создать, если не read-only) файл данных.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .with_context(|| format!("open page file {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only,
            pos: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| io_error(&self.path, e))?;
        self.pos = offset;
        Ok(())
    }

    /// Прочитать ровно len байт в buf[off..off+len].
    pub fn read_fully(&mut self, buf: &mut [u8], off: usize, len: usize) -> Result<()> {
        self.file
            .read_exact(&mut buf[off..off + len])
            .map_err(|e| io_error(&self.path, e))?;
        self.pos += len as u64;
        Ok(())
    }

    /// То же, что read_fully, но в обход любых кэширующих слоёв выше.
    /// Используется онлайн-бэкапом (copy_direct).
    pub fn read_fully_direct(&mut self, buf: &mut [u8], off: usize, len: usize) -> Result<()> {
        self.read_fully(buf, off, len)
    }

    pub fn write(&mut self, buf: &[u8], off: usize, len: usize) -> Result<()> {
        self.file
            .write_all(&buf[off..off + len])
            .map_err(|e| io_error(&self.path, e))?;
        self.pos += len as u64;
        Ok(())
    }

    pub fn length(&self) -> Result<u64> {
        let m = self.file.metadata().map_err(|e| io_error(&self.path, e))?;
        Ok(m.len())
    }

    /// Установить длину файла (рост заполняется нулями).
    pub fn set_length(&mut self, n: u64) -> Result<()> {
        self.file.set_len(n).map_err(|e| io_error(&self.path, e))?;
        if self.pos > n {
            self.seek(n)?;
        }
        Ok(())
    }

    /// fsync (best-effort у вызывающих, ошибки поднимаются).
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| io_error(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{error_code, ERR_IO_EXCEPTION};

    fn unique_path(prefix: &str) -> PathBuf {
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("bdb-{}-{}-{}", prefix, std::process::id(), t))
    }

    #[test]
    fn write_read_roundtrip() {
        let path = unique_path("file");
        let mut f = PageFile::open(&path, false).unwrap();
        f.set_length(256).unwrap();
        f.seek(128).unwrap();
        f.write(&[0xAB; 64], 0, 64).unwrap();
        f.seek(128).unwrap();
        let mut buf = [0u8; 64];
        f.read_fully(&mut buf, 0, 64).unwrap();
        assert_eq!(buf, [0xAB; 64]);
        assert_eq!(f.length().unwrap(), 256);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_past_eof_is_io_error() {
        let path = unique_path("eof");
        let mut f = PageFile::open(&path, false).unwrap();
        f.set_length(16).unwrap();
        f.seek(8).unwrap();
        let mut buf = [0u8; 32];
        let e = f.read_fully(&mut buf, 0, 32).unwrap_err();
        assert_eq!(error_code(&e), Some(ERR_IO_EXCEPTION));
        let _ = std::fs::remove_file(&path);
    }
}
