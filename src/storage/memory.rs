use std::collections::HashMap;

use super::page::{PageId, PAGE_SIZE};
use super::DiskManager;
use crate::error::{Error, Result};

/// An in-memory disk manager keeping every written page in a map. Useful
/// for tests and ephemeral pools. Pages that were never written read back
/// as zeroes.
#[derive(Debug)]
pub struct Memory {
    pages: HashMap<PageId, Vec<u8>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { pages: HashMap::new() }
    }
}

impl DiskManager for Memory {
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::value(format!("page buffer is {} bytes", buf.len())));
        }
        match self.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::value(format!("page buffer is {} bytes", buf.len())));
        }
        self.pages.insert(page_id, buf.to_vec());
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.pages.remove(&page_id);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
