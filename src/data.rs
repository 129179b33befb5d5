//! Страничный буфер: байтовый массив с курсором и типизированными
//! чтениями/записями.
//!
//! Кодирование побитово стабильно: все многобайтовые целые — знаковые
//! big-endian (контракт DataInput/DataOutput), строки — длина в байтах
//! (i32 BE) + UTF-8, varint — LEB128 с продолжением в старшем бите.

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};

use crate::errors::corrupted;

#[derive(Clone, Debug)]
pub struct Data {
    data: Vec<u8>,
    pos: usize,
}

impl Data {
    /// Буфер фиксированного размера, заполненный нулями (страница).
    pub fn create(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            pos: 0,
        }
    }

    /// Пустой растущий буфер (сериализация записей WAL).
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Текущая позиция курсора.
    pub fn length(&self) -> usize {
        self.pos
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn ensure(&mut self, extra: usize) {
        let need = self.pos + extra;
        if need > self.data.len() {
            self.data.resize(need, 0);
        }
    }

    fn take(&mut self, n: usize) -> Result<usize> {
        if self.pos + n > self.data.len() {
            return Err(corrupted(format!(
                "buffer underflow: need {} at {} of {}",
                n,
                self.pos,
                self.data.len()
            )));
        }
        let at = self.pos;
        self.pos += n;
        Ok(at)
    }

    // ---- байты ----

    pub fn write_u8(&mut self, v: u8) {
        self.ensure(1);
        self.data[self.pos] = v;
        self.pos += 1;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let at = self.take(1)?;
        Ok(self.data[at])
    }

    pub fn write_bytes(&mut self, buf: &[u8]) {
        self.ensure(buf.len());
        self.data[self.pos..self.pos + buf.len()].copy_from_slice(buf);
        self.pos += buf.len();
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let at = self.take(out.len())?;
        out.copy_from_slice(&self.data[at..at + out.len()]);
        Ok(())
    }

    // ---- целые (BE, two's complement) ----

    pub fn write_i32(&mut self, v: i32) {
        self.ensure(4);
        BigEndian::write_i32(&mut self.data[self.pos..], v);
        self.pos += 4;
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let at = self.take(4)?;
        Ok(BigEndian::read_i32(&self.data[at..]))
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_i32(v as i32);
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    pub fn write_i64(&mut self, v: i64) {
        self.ensure(8);
        BigEndian::write_i64(&mut self.data[self.pos..], v);
        self.pos += 8;
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let at = self.take(8)?;
        Ok(BigEndian::read_i64(&self.data[at..]))
    }

    // ---- varint (LEB128, protobuf-style) ----

    pub fn write_var_int(&mut self, mut v: u32) {
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.write_u8(b);
                return;
            }
            self.write_u8(b | 0x80);
        }
    }

    pub fn read_var_int(&mut self) -> Result<u32> {
        let mut v: u32 = 0;
        let mut shift = 0;
        loop {
            let b = self.read_u8()?;
            v |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
            if shift >= 35 {
                return Err(corrupted("varint too long"));
            }
        }
    }

    // ---- строки ----

    pub fn write_string(&mut self, s: &str) {
        let b = s.as_bytes();
        self.write_i32(b.len() as i32);
        self.write_bytes(b);
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(corrupted(format!("negative string length: {}", len)));
        }
        let at = self.take(len as usize)?;
        let s = std::str::from_utf8(&self.data[at..at + len as usize])
            .map_err(|_| corrupted("invalid utf-8 in string"))?;
        Ok(s.to_string())
    }

    // ---- контрольная сумма ----

    /// CRC-32 (reflected, poly 0xEDB88320) байтов [from, from+len).
    pub fn checksum(&self, from: usize, len: usize) -> u32 {
        let mut h = crc32fast::Hasher::new();
        h.update(&self.data[from..from + len]);
        h.finalize()
    }
}
