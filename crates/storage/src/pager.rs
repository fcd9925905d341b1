//! Page cache of one heap file.
//!
//! Page 0 holds the [`FileHeader`]; data pages follow. At most `max_frames`
//! pages stay resident, the least recently touched one is evicted first, and
//! a modified page reaches disk on eviction or [`Pager::flush_all`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::header::FileHeader;

/// Resident pages per heap file unless configured otherwise.
pub const DEFAULT_POOL_SIZE: usize = 256;

/// Page 0 is the header page.
pub type PageNum = u32;

struct Frame {
    data: Vec<u8>,
    /// Differs from the on-disk image.
    dirty: bool,
    last_access: u64,
}

pub struct Pager {
    file: File,
    header: FileHeader,
    header_dirty: bool,
    page_size: usize,
    pool: HashMap<PageNum, Frame>,
    max_frames: usize,
    /// Stamp of the latest page access.
    access_counter: u64,
}

impl Pager {
    /// Open or create a heap file.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    /// Open or create a heap file with a specific buffer pool size.
    pub fn open_with_pool_size<P: AsRef<Path>>(path: P, max_frames: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let exists = path.exists() && std::fs::metadata(path)?.len() > 0;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists {
            file.seek(SeekFrom::Start(0))?;
            FileHeader::read_from(&mut file)?
        } else {
            let header = FileHeader::default();
            // Write the initial header + fill page 0.
            let mut page0 = vec![0u8; header.page_size as usize];
            header.serialize(&mut page0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&page0)?;
            file.sync_all()?;
            header
        };
        let page_size = header.page_size as usize;

        Ok(Self {
            file,
            header,
            header_dirty: false,
            page_size,
            pool: HashMap::new(),
            max_frames: max_frames.max(1),
            access_counter: 0,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns a mutable reference to the file header and marks it dirty.
    pub fn header_mut(&mut self) -> &mut FileHeader {
        self.header_dirty = true;
        &mut self.header
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the total number of pages, header page included.
    pub fn page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Read a page into the buffer pool and return a reference to its data.
    pub fn read_page(&mut self, page_num: PageNum) -> io::Result<&[u8]> {
        if page_num == 0 && self.header_dirty {
            self.stage_header_page()?;
        }
        self.ensure_loaded(page_num)?;
        self.touch(page_num);
        self.pool
            .get(&page_num)
            .map(|frame| frame.data.as_slice())
            .ok_or_else(|| not_in_pool(page_num))
    }

    /// Get a mutable reference to a page's data. Marks the page as dirty.
    pub fn write_page(&mut self, page_num: PageNum) -> io::Result<&mut [u8]> {
        if page_num == 0 && self.header_dirty {
            self.stage_header_page()?;
        }
        self.ensure_loaded(page_num)?;
        self.touch(page_num);
        let frame = self
            .pool
            .get_mut(&page_num)
            .ok_or_else(|| not_in_pool(page_num))?;
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Extend the file by one zeroed page and return its number.
    pub fn allocate_page(&mut self) -> io::Result<PageNum> {
        let page_num = self.header.page_count;
        self.header.page_count += 1;

        let frame = Frame {
            data: vec![0u8; self.page_size],
            dirty: true,
            last_access: self.next_access(),
        };
        self.maybe_evict()?;
        self.pool.insert(page_num, frame);
        self.header_dirty = true;
        Ok(page_num)
    }

    /// Flush all dirty pages to disk.
    pub fn flush_all(&mut self) -> io::Result<()> {
        if self.header_dirty {
            self.stage_header_page()?;
        }

        let mut dirty_pages: Vec<PageNum> = self
            .pool
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(&pn, _)| pn)
            .collect();
        dirty_pages.sort_unstable();

        for page_num in dirty_pages {
            self.flush_page(page_num)?;
        }

        self.file.sync_all()?;
        self.header_dirty = false;
        Ok(())
    }

    /// Flush a single page to disk.
    fn flush_page(&mut self, page_num: PageNum) -> io::Result<()> {
        let frame = self
            .pool
            .get_mut(&page_num)
            .ok_or_else(|| not_in_pool(page_num))?;

        let offset = page_num as u64 * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame.data)?;
        frame.dirty = false;
        Ok(())
    }

    /// Stage the in-memory header into page 0 and mark the page dirty.
    fn stage_header_page(&mut self) -> io::Result<()> {
        self.ensure_loaded(0)?;
        let ts = self.next_access();
        let frame = self.pool.get_mut(&0).ok_or_else(|| not_in_pool(0))?;
        self.header.serialize(&mut frame.data)?;
        frame.dirty = true;
        frame.last_access = ts;
        Ok(())
    }

    /// Ensure a page is loaded into the buffer pool.
    fn ensure_loaded(&mut self, page_num: PageNum) -> io::Result<()> {
        if self.pool.contains_key(&page_num) {
            return Ok(());
        }

        if page_num >= self.header.page_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "page {} out of range (page_count={})",
                    page_num, self.header.page_count
                ),
            ));
        }

        self.maybe_evict()?;

        let mut data = vec![0u8; self.page_size];
        let offset = page_num as u64 * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;

        let frame = Frame {
            data,
            dirty: false,
            last_access: self.next_access(),
        };
        self.pool.insert(page_num, frame);
        Ok(())
    }

    /// Evict the least recently used page if the pool is at capacity.
    fn maybe_evict(&mut self) -> io::Result<()> {
        while self.pool.len() >= self.max_frames {
            let victim = self
                .pool
                .iter()
                .min_by_key(|(_, f)| f.last_access)
                .map(|(&pn, f)| (pn, f.dirty));

            let Some((page_num, dirty)) = victim else {
                break;
            };
            if dirty {
                self.flush_page(page_num)?;
            }
            self.pool.remove(&page_num);
        }
        Ok(())
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn touch(&mut self, page_num: PageNum) {
        let ts = self.next_access();
        if let Some(frame) = self.pool.get_mut(&page_num) {
            frame.last_access = ts;
        }
    }
}

fn not_in_pool(page_num: PageNum) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("page {page_num} not in buffer pool"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DEFAULT_PAGE_SIZE;

    #[test]
    fn create_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let pager = Pager::open(dir.path().join("create.heap")).unwrap();
        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.page_size(), DEFAULT_PAGE_SIZE as usize);
    }

    #[test]
    fn reopen_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.heap");
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.allocate_page().unwrap();
            pager.flush_all().unwrap();
        }
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.page_count(), 2);
    }

    #[test]
    fn data_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.heap");
        {
            let mut pager = Pager::open(&path).unwrap();
            let pg = pager.allocate_page().unwrap();
            assert_eq!(pg, 1);
            let data = pager.write_page(pg).unwrap();
            data[0..6].copy_from_slice(b"world!");
            pager.flush_all().unwrap();
        }
        let mut pager = Pager::open(&path).unwrap();
        assert_eq!(&pager.read_page(1).unwrap()[0..6], b"world!");
    }

    #[test]
    fn read_page_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("range.heap")).unwrap();
        assert!(pager.read_page(99).is_err());
    }

    #[test]
    fn lru_eviction_writes_back_dirty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open_with_pool_size(dir.path().join("lru.heap"), 4).unwrap();
        for _ in 0..5 {
            pager.allocate_page().unwrap();
        }
        for pg in 1..=5 {
            let data = pager.write_page(pg).unwrap();
            data[0] = pg as u8;
        }
        assert!(pager.pool.len() <= 4);

        for pg in 1..=5 {
            assert_eq!(pager.read_page(pg).unwrap()[0], pg as u8);
        }
    }

    #[test]
    fn header_survives_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.heap");
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.header_mut().record_size = 14;
            pager.header_mut().record_count = 3;
            pager.allocate_page().unwrap();
            pager.allocate_page().unwrap();
            pager.flush_all().unwrap();
        }
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.header().record_size, 14);
        assert_eq!(pager.header().record_count, 3);
        assert_eq!(pager.page_count(), 3);
    }
}
