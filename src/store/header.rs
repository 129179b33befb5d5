//! Заголовки файла: статический (страница 0) и переменный (страницы 1 и 2).
//!
//! Переменный заголовок пишется в две идентичные копии; чтение валидирует
//! CRC первой и падает на вторую. Обе невалидны — файл повреждён.

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};

use crate::consts::{
    FILE_SIGNATURE, PAGE_ID_VARIABLE_HEADER_1, PAGE_ID_VARIABLE_HEADER_2, PAGE_SIZE_MAX,
    PAGE_SIZE_MIN, READ_VERSION, STATIC_HEADER_SIGNATURE_LEN, VARIABLE_HEADER_PAYLOAD,
    WRITE_VERSION,
};
use crate::data::Data;
use crate::errors::{corrupted, DbError};
use crate::metrics;
use crate::store::{fmt_page, PageStore};

impl PageStore {
    pub(crate) fn set_page_size(&mut self, size: u32) -> Result<()> {
        if !(PAGE_SIZE_MIN..=PAGE_SIZE_MAX).contains(&size) || !size.is_power_of_two() {
            return Err(corrupted(format!("unsupported page size: {}", size)));
        }
        self.page_size = size;
        self.page_size_shift = size.trailing_zeros();
        Ok(())
    }

    pub(crate) fn write_static_header(&mut self) -> Result<()> {
        let ps = self.page_size as usize;
        let mut d = Data::create(ps);
        for _ in 0..3 {
            d.write_bytes(FILE_SIGNATURE);
        }
        d.write_i32(self.page_size as i32);
        d.write_u8(WRITE_VERSION);
        d.write_u8(READ_VERSION);
        let f = self.file_mut()?;
        f.seek(0)?;
        f.write(d.bytes(), 0, ps)?;
        Ok(())
    }

    /// Сигнатура и версии; несовместимая write-version переоткрывает файл
    /// только на чтение, несовместимая read-version — отказ.
    pub(crate) fn read_static_header(&mut self) -> Result<()> {
        let mut buf = [0u8; STATIC_HEADER_SIGNATURE_LEN + 6];
        let n = buf.len();
        {
            let f = self.file_mut()?;
            f.seek(0)?;
            f.read_fully(&mut buf, 0, n)?;
        }
        for i in 0..3 {
            if &buf[i * 16..(i + 1) * 16] != FILE_SIGNATURE {
                return Err(corrupted(format!(
                    "wrong file signature: {}",
                    self.file_name.display()
                )));
            }
        }
        let size = BigEndian::read_i32(&buf[48..52]);
        self.set_page_size(size as u32)?;
        let write_version = buf[52];
        let read_version = buf[53];
        if read_version != READ_VERSION {
            return Err(DbError::FileVersion(format!(
                "unsupported read format version {} in {}",
                read_version,
                self.file_name.display()
            ))
            .into());
        }
        if write_version != WRITE_VERSION {
            info!(
                "write format version {} is newer, opening read-only: {}",
                write_version,
                self.file_name.display()
            );
            self.file = None;
            self.db.set_read_only(true);
            let f = self.db.open_file(&self.file_name, true)?;
            self.file = Some(f);
        }
        Ok(())
    }

    /// Обе копии переменного заголовка; write counter инкрементируется
    /// после записи (persisted значение — до инкремента).
    pub(crate) fn write_variable_header(&mut self) -> Result<()> {
        self.db.check_power_off()?;
        let ps = self.page_size as usize;
        let mut d = Data::create(ps);
        d.write_i64(self.write_count as i64);
        d.write_u32(self.log_first_trunk_page);
        d.write_u32(self.log_first_data_page);
        let crc = d.checksum(0, VARIABLE_HEADER_PAYLOAD);
        d.write_i64(crc as i64);
        let shift = self.page_size_shift;
        let f = self.file_mut()?;
        f.seek((PAGE_ID_VARIABLE_HEADER_1 as u64) << shift)?;
        f.write(d.bytes(), 0, ps)?;
        f.seek((PAGE_ID_VARIABLE_HEADER_2 as u64) << shift)?;
        f.write(d.bytes(), 0, ps)?;
        metrics::record_page_write();
        metrics::record_page_write();
        self.bump_write_count();
        Ok(())
    }

    pub(crate) fn read_variable_header(&mut self) -> Result<()> {
        for page in [PAGE_ID_VARIABLE_HEADER_1, PAGE_ID_VARIABLE_HEADER_2] {
            let mut d = self.read_page(page)?;
            d.reset();
            let write_count = d.read_i64()?;
            let trunk = d.read_u32()?;
            let data = d.read_u32()?;
            let stored = d.read_i64()? as u64;
            let crc = d.checksum(0, VARIABLE_HEADER_PAYLOAD) as u64;
            if stored == crc {
                self.write_count = write_count as u64;
                self.log_first_trunk_page = trunk;
                self.log_first_data_page = data;
                debug!(
                    "variable header {}: write_count={} trunk={} data={}",
                    page,
                    write_count,
                    fmt_page(trunk),
                    fmt_page(data)
                );
                return Ok(());
            }
            warn!(
                "variable header {} checksum mismatch, trying next copy",
                page
            );
        }
        Err(corrupted(format!(
            "both variable file header copies are invalid: {}",
            self.file_name.display()
        )))
    }

    /// Переписать заголовок на новое начало цепочки WAL.
    pub(crate) fn set_log_first_page(&mut self, trunk: u32, data: u32) -> Result<()> {
        debug!(
            "set log first page: trunk={} data={}",
            fmt_page(trunk),
            fmt_page(data)
        );
        self.set_log_first(trunk, data);
        self.write_variable_header()
    }
}
