//! Строка таблицы: ключ + упорядоченный вектор значений.
//!
//! Сериализация: [key i64][varint count][значения]. Ключ назначает
//! scan-индекс; по нему же строка находится при удалении и в redo.

use anyhow::Result;

use crate::data::Data;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pos: i64,
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { pos: 0, values }
    }

    pub fn get_pos(&self) -> i64 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: i64) {
        self.pos = pos;
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn get_value(&self, i: usize) -> &Value {
        &self.values[i]
    }

    pub fn set_value(&mut self, i: usize, v: Value) {
        self.values[i] = v;
    }

    pub fn write(&self, buf: &mut Data) {
        buf.write_i64(self.pos);
        buf.write_var_int(self.values.len() as u32);
        for v in &self.values {
            v.write(buf);
        }
    }

    pub fn read(buf: &mut Data) -> Result<Row> {
        let pos = buf.read_i64()?;
        let n = buf.read_var_int()?;
        let mut values = Vec::with_capacity(n as usize);
        for _ in 0..n {
            values.push(Value::read(buf)?);
        }
        Ok(Row { pos, values })
    }
}
