//! Типизированные значения со стабильной сериализацией в страничный буфер.
//!
//! Формат: [tag u8][payload]; теги: 0 NULL, 1 INT (i32), 2 LONG (i64),
//! 3 STRING (i32 длина + UTF-8), 4 ARRAY (varint count + значения).

use anyhow::Result;
use std::cmp::Ordering;

use crate::data::Data;
use crate::errors::corrupted;

pub const TAG_NULL: u8 = 0;
pub const TAG_INT: u8 = 1;
pub const TAG_LONG: u8 = 2;
pub const TAG_STRING: u8 = 3;
pub const TAG_ARRAY: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn write(&self, buf: &mut Data) {
        match self {
            Value::Null => buf.write_u8(TAG_NULL),
            Value::Int(v) => {
                buf.write_u8(TAG_INT);
                buf.write_i32(*v);
            }
            Value::Long(v) => {
                buf.write_u8(TAG_LONG);
                buf.write_i64(*v);
            }
            Value::String(s) => {
                buf.write_u8(TAG_STRING);
                buf.write_string(s);
            }
            Value::Array(list) => {
                buf.write_u8(TAG_ARRAY);
                buf.write_var_int(list.len() as u32);
                for v in list {
                    v.write(buf);
                }
            }
        }
    }

    pub fn read(buf: &mut Data) -> Result<Value> {
        let tag = buf.read_u8()?;
        Ok(match tag {
            TAG_NULL => Value::Null,
            TAG_INT => Value::Int(buf.read_i32()?),
            TAG_LONG => Value::Long(buf.read_i64()?),
            TAG_STRING => Value::String(buf.read_string()?),
            TAG_ARRAY => {
                let n = buf.read_var_int()?;
                let mut list = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    list.push(Value::read(buf)?);
                }
                Value::Array(list)
            }
            _ => return Err(corrupted(format!("unknown value tag: {}", tag))),
        })
    }

    pub fn get_int(&self) -> Result<i32> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Long(v) => Ok(*v as i32),
            _ => Err(corrupted(format!("not an int value: {:?}", self))),
        }
    }

    pub fn get_string(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(corrupted(format!("not a string value: {:?}", self))),
        }
    }

    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Long(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
        }
    }

    /// Сравнение для b-tree индексов: NULL первым, числа по значению,
    /// строки в бинарном порядке, массивы поэлементно.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Int(a), Value::Long(b)) => (*a as i64).cmp(b),
            (Value::Long(a), Value::Int(b)) => a.cmp(&(*b as i64)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compare(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

/// Тип колонки (минимальная поверхность каталога).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Long,
    String,
    Array,
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

impl Column {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}
