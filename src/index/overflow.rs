//! Overflow-цепочки: строка, не помещающаяся в лист, целиком уносится
//! в цепочку overflow-страниц ([type][next][chunk_len][данные]).

use anyhow::Result;

use crate::cache::{PageKind, Record};
use crate::consts::{NO_PAGE, OVERFLOW_HEADER};
use crate::data::Data;
use crate::errors::corrupted;
use crate::store::PageStore;

/// Записать байты в свежую overflow-цепочку; вернуть её голову.
pub(crate) fn write_chain(store: &mut PageStore, bytes: &[u8]) -> Result<u32> {
    let ps = store.get_page_size() as usize;
    let chunk = ps - OVERFLOW_HEADER;
    let n = (bytes.len() + chunk - 1) / chunk;
    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        ids.push(store.allocate_page()?);
    }
    for i in 0..n {
        let next = if i + 1 < n { ids[i + 1] } else { NO_PAGE };
        let part = &bytes[i * chunk..bytes.len().min((i + 1) * chunk)];
        let mut d = Data::create(ps);
        d.write_u8(PageKind::Overflow.type_byte());
        d.write_u32(next);
        d.write_i32(part.len() as i32);
        d.write_bytes(part);
        store.put_record(Record::new(ids[i], PageKind::Overflow, d))?;
        store.update_record(ids[i], true, None)?;
    }
    Ok(ids[0])
}

fn chunk_of(store: &mut PageStore, page: u32) -> Result<(u32, Vec<u8>)> {
    store.load_record(page, PageKind::Overflow)?;
    let r = store.record_mut(page)?;
    let mut d = r.data.clone();
    d.reset();
    d.read_u8()?;
    let next = d.read_u32()?;
    let len = d.read_i32()?;
    let ps = d.capacity();
    if len < 0 || len as usize > ps - OVERFLOW_HEADER {
        return Err(corrupted(format!(
            "overflow page {}: bad chunk length {}",
            page, len
        )));
    }
    let mut part = vec![0u8; len as usize];
    d.read_bytes(&mut part)?;
    Ok((next, part))
}

/// Собрать содержимое цепочки; длина обязана сойтись с ожидаемой.
pub(crate) fn read_chain(store: &mut PageStore, head: u32, total: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(total);
    let mut page = head;
    let mut guard = 0u32;
    while page != NO_PAGE {
        let (next, part) = chunk_of(store, page)?;
        out.extend_from_slice(&part);
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("overflow chain does not terminate"));
        }
    }
    if out.len() != total {
        return Err(corrupted(format!(
            "overflow chain {}: expected {} bytes got {}",
            head,
            total,
            out.len()
        )));
    }
    Ok(out)
}

pub(crate) fn free_chain(store: &mut PageStore, head: u32) -> Result<()> {
    let mut page = head;
    let mut guard = 0u32;
    while page != NO_PAGE {
        let (next, _) = chunk_of(store, page)?;
        store.free_page(page, true, None)?;
        page = next;
        guard += 1;
        if guard > store.get_page_count() {
            return Err(corrupted("overflow chain does not terminate"));
        }
    }
    Ok(())
}
