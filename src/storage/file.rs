use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::page::{PageId, PAGE_SIZE};
use super::DiskManager;
use crate::error::{Error, Result};

/// A disk manager backed by a single data file. Page n lives at byte
/// offset n * PAGE_SIZE. Reads past the end of the file zero-fill the
/// buffer, so pages may be read before they are first written.
///
/// Deallocated pages are not reclaimed; extent management is out of scope
/// for this crate.
#[derive(Debug)]
pub struct FileDisk {
    file: File,
}

impl FileDisk {
    pub fn open(path: &Path) -> Result<FileDisk> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        Ok(FileDisk { file })
    }

    fn offset(page_id: PageId) -> Result<u64> {
        let id = u64::try_from(page_id)?;
        Ok(id * PAGE_SIZE as u64)
    }
}

impl DiskManager for FileDisk {
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::value(format!("page buffer is {} bytes", buf.len())));
        }
        let offset = Self::offset(page_id)?;
        if offset >= self.file.metadata()?.len() {
            buf.fill(0);
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // a partial page at the end of the file
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::value(format!("page buffer is {} bytes", buf.len())));
        }
        let offset = Self::offset(page_id)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn deallocate_page(&mut self, _page_id: PageId) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
