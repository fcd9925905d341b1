//! Heap files of fixed-width records.
//!
//! Data pages start at page 1. Each page begins with a bitmap of live
//! slots (most significant bit first), followed by the slots themselves:
//!
//! ```text
//! [bitmap: ceil(slots/8) bytes][slot 0][slot 1]...[slot n-1]
//! ```
//!
//! The slot count per page is [`relq_types::entries_per_page`] of the record
//! width, so a record id `(page, slot)` never moves.

use std::io;
use std::ops::Range;
use std::path::Path;

use relq_types::{entries_per_page, RecordId};

use crate::pager::{PageNum, Pager};

/// Byte layout of one data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotLayout {
    record_size: usize,
    slots: usize,
}

impl SlotLayout {
    fn new(record_size: usize) -> io::Result<Self> {
        let slots = entries_per_page(record_size);
        if slots == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record size {record_size} does not fit a page"),
            ));
        }
        Ok(Self { record_size, slots })
    }

    fn bitmap_len(&self) -> usize {
        self.slots.div_ceil(8)
    }

    fn offset(&self, slot: usize) -> usize {
        self.bitmap_len() + slot * self.record_size
    }

    fn is_live(&self, data: &[u8], slot: usize) -> bool {
        slot < self.slots && data[slot / 8] & (1 << (7 - slot % 8)) != 0
    }

    fn mark_live(&self, data: &mut [u8], slot: usize) {
        data[slot / 8] |= 1 << (7 - slot % 8);
    }

    fn first_free(&self, data: &[u8]) -> Option<usize> {
        (0..self.slots).find(|&slot| !self.is_live(data, slot))
    }
}

/// An owned copy of one data page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapPage {
    page_num: PageNum,
    data: Vec<u8>,
    layout: SlotLayout,
}

impl HeapPage {
    pub fn page_num(&self) -> PageNum {
        self.page_num
    }

    pub fn is_live(&self, slot: u16) -> bool {
        self.layout.is_live(&self.data, slot as usize)
    }

    /// Live slots in ascending order.
    pub fn live_slots(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.layout.slots)
            .filter(|&slot| self.layout.is_live(&self.data, slot))
            .map(|slot| slot as u16)
    }

    pub fn num_live(&self) -> usize {
        self.live_slots().count()
    }

    /// Encoded record in `slot`, or `None` if the slot is empty.
    pub fn entry(&self, slot: u16) -> Option<&[u8]> {
        let slot = slot as usize;
        if !self.layout.is_live(&self.data, slot) {
            return None;
        }
        let start = self.layout.offset(slot);
        self.data.get(start..start + self.layout.record_size)
    }
}

/// An append-only file of fixed-width records.
pub struct HeapFile {
    pager: Pager,
    layout: SlotLayout,
}

impl HeapFile {
    /// Create an empty heap file at `path`, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P, record_size: usize, pool_pages: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let layout = SlotLayout::new(record_size)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let mut pager = Pager::open_with_pool_size(path, pool_pages)?;
        pager.header_mut().record_size = record_size as u32;
        pager.flush_all()?;
        Ok(Self { pager, layout })
    }

    /// Open an existing heap file; the record width comes from its header.
    pub fn open<P: AsRef<Path>>(path: P, pool_pages: usize) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("heap file {} does not exist", path.display()),
            ));
        }
        let pager = Pager::open_with_pool_size(path, pool_pages)?;
        let layout = SlotLayout::new(pager.header().record_size as usize)?;
        Ok(Self { pager, layout })
    }

    pub fn record_size(&self) -> usize {
        self.layout.record_size
    }

    pub fn slots_per_page(&self) -> usize {
        self.layout.slots
    }

    pub fn num_records(&self) -> usize {
        self.pager.header().record_count as usize
    }

    /// Number of data pages.
    pub fn num_pages(&self) -> usize {
        self.pager.page_count().saturating_sub(1) as usize
    }

    /// Data page numbers in file order.
    pub fn page_nums(&self) -> Range<PageNum> {
        1..self.pager.page_count().max(1)
    }

    /// Store `record` in the first free slot of the last page, allocating a
    /// new page when it is full.
    pub fn add_record(&mut self, record: &[u8]) -> io::Result<RecordId> {
        if record.len() != self.layout.record_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record is {} bytes, heap holds {}-byte records",
                    record.len(),
                    self.layout.record_size
                ),
            ));
        }

        let last = self.pager.page_count() - 1;
        let free = if last >= 1 {
            let data = self.pager.read_page(last)?;
            self.layout.first_free(data).map(|slot| (last, slot))
        } else {
            None
        };
        let (page_num, slot) = match free {
            Some(found) => found,
            None => (self.pager.allocate_page()?, 0),
        };

        let layout = self.layout;
        let data = self.pager.write_page(page_num)?;
        let start = layout.offset(slot);
        data[start..start + layout.record_size].copy_from_slice(record);
        layout.mark_live(data, slot);
        self.pager.header_mut().record_count += 1;

        Ok(RecordId::new(page_num, slot as u16))
    }

    pub fn read_page(&mut self, page_num: PageNum) -> io::Result<HeapPage> {
        if page_num == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "page 0 holds the file header",
            ));
        }
        let data = self.pager.read_page(page_num)?.to_vec();
        Ok(HeapPage {
            page_num,
            data,
            layout: self.layout,
        })
    }

    /// Encoded record at `rid`, or `None` if the slot is empty or out of range.
    pub fn get_record(&mut self, rid: RecordId) -> io::Result<Option<Vec<u8>>> {
        if rid.page_num == 0 || rid.page_num >= self.pager.page_count() {
            return Ok(None);
        }
        let page = self.read_page(rid.page_num)?;
        Ok(page.entry(rid.slot).map(<[u8]>::to_vec))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.pager.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: u32) -> Vec<u8> {
        let mut out = i.to_be_bytes().to_vec();
        out.extend_from_slice(&[0xAB; 10]);
        out
    }

    #[test]
    fn records_fill_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = HeapFile::create(dir.path().join("t.heap"), 14, 16).unwrap();
        assert_eq!(heap.slots_per_page(), 289);
        assert_eq!(heap.num_pages(), 0);

        let mut rids = Vec::new();
        for i in 0..600 {
            rids.push(heap.add_record(&record(i)).unwrap());
        }
        assert_eq!(rids[0], RecordId::new(1, 0));
        assert_eq!(rids[288], RecordId::new(1, 288));
        assert_eq!(rids[289], RecordId::new(2, 0));
        assert_eq!(heap.num_pages(), 3);
        assert_eq!(heap.num_records(), 600);
        assert_eq!(heap.page_nums().collect::<Vec<_>>(), vec![1, 2, 3]);

        assert_eq!(heap.get_record(rids[300]).unwrap(), Some(record(300)));
        assert_eq!(heap.get_record(RecordId::new(3, 200)).unwrap(), None);
        assert_eq!(heap.get_record(RecordId::new(9, 0)).unwrap(), None);
    }

    #[test]
    fn page_image_exposes_live_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = HeapFile::create(dir.path().join("t.heap"), 14, 16).unwrap();
        for i in 0..10 {
            heap.add_record(&record(i)).unwrap();
        }
        let page = heap.read_page(1).unwrap();
        assert_eq!(page.page_num(), 1);
        assert_eq!(page.live_slots().collect::<Vec<_>>(), (0..10).collect::<Vec<u16>>());
        assert_eq!(page.num_live(), 10);
        assert_eq!(page.entry(3), Some(record(3).as_slice()));
        assert!(!page.is_live(10));
        assert_eq!(page.entry(10), None);
        assert!(heap.read_page(0).is_err());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.heap");
        {
            let mut heap = HeapFile::create(&path, 14, 4).unwrap();
            for i in 0..1000 {
                heap.add_record(&record(i)).unwrap();
            }
            heap.flush().unwrap();
        }
        let mut heap = HeapFile::open(&path, 4).unwrap();
        assert_eq!(heap.record_size(), 14);
        assert_eq!(heap.num_records(), 1000);
        assert_eq!(heap.num_pages(), 4);
        let total: usize = heap
            .page_nums()
            .map(|pn| heap.read_page(pn).unwrap().num_live())
            .sum();
        assert_eq!(total, 1000);
        heap.add_record(&record(1000)).unwrap();
        assert_eq!(heap.num_records(), 1001);
    }

    #[test]
    fn rejects_bad_record_widths() {
        let dir = tempfile::tempdir().unwrap();
        let mut heap = HeapFile::create(dir.path().join("t.heap"), 14, 4).unwrap();
        assert!(heap.add_record(&[1, 2, 3]).is_err());
        assert!(HeapFile::create(dir.path().join("z.heap"), 0, 4).is_err());
        assert!(HeapFile::create(dir.path().join("big.heap"), 5000, 4).is_err());
        assert!(HeapFile::open(dir.path().join("missing.heap"), 4).is_err());
    }
}
