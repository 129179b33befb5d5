//! Кодек страницы free-list: битовая карта занятости диапазона страниц.
//!
//! Раскладка: [0] = тип страницы, далее битовая карта. Бит i покрывает
//! страницу own_id + i; бит 0 (сама free-list-страница) всегда установлен.
//! Одна страница адресует (page_size - 1) * 8 идентификаторов.

use crate::consts::PAGE_TYPE_FREE_LIST;
use crate::data::Data;

const BITMAP_OFFSET: usize = 1;

/// Сколько page id покрывает одна free-list-страница.
pub fn pages_addressed(page_size: u32) -> u32 {
    (page_size - BITMAP_OFFSET as u32) * 8
}

/// Инициализировать пустую free-list-страницу (собственный бит занят).
pub fn init(data: &mut Data) {
    for b in data.bytes_mut().iter_mut() {
        *b = 0;
    }
    data.bytes_mut()[0] = PAGE_TYPE_FREE_LIST;
    set_bit(data, 0);
}

fn set_bit(data: &mut Data, bit: u32) {
    let byte = BITMAP_OFFSET + (bit / 8) as usize;
    data.bytes_mut()[byte] |= 1 << (bit % 8);
}

fn clear_bit(data: &mut Data, bit: u32) {
    let byte = BITMAP_OFFSET + (bit / 8) as usize;
    data.bytes_mut()[byte] &= !(1 << (bit % 8));
}

pub fn is_used(data: &Data, bit: u32) -> bool {
    let byte = BITMAP_OFFSET + (bit / 8) as usize;
    data.bytes()[byte] & (1 << (bit % 8)) != 0
}

/// Первый свободный бит; помечает его занятым. None, если диапазон полон.
pub fn allocate(data: &mut Data, page_size: u32) -> Option<u32> {
    let limit = pages_addressed(page_size);
    let bytes = data.bytes();
    for i in 0..(limit / 8) as usize {
        let b = bytes[BITMAP_OFFSET + i];
        if b != 0xff {
            let bit = i as u32 * 8 + b.trailing_ones();
            if bit < limit {
                set_bit(data, bit);
                return Some(bit);
            }
        }
    }
    None
}

/// Принудительно пометить бит занятым. false, если уже был занят
/// (fail-silent по контракту).
pub fn allocate_at(data: &mut Data, bit: u32) -> bool {
    if is_used(data, bit) {
        return false;
    }
    set_bit(data, bit);
    true
}

/// Пометить бит свободным. false, если уже был свободен.
pub fn free_bit(data: &mut Data, bit: u32) -> bool {
    if !is_used(data, bit) {
        return false;
    }
    clear_bit(data, bit);
    true
}
