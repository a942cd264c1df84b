use std::fmt::Debug;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

pub mod file;
pub mod memory;
pub mod page;

use self::page::PageId;

/// A block device abstraction working in units of whole pages. Pages are
/// addressed by their id; the id-to-offset mapping is the implementation's
/// concern. Writes are only guaranteed durable after calling flush().
///
/// The trait is designed as `trait object` compatible so that the buffer
/// pool can hold any implementation behind `Box<dyn DiskManager>`.
pub trait DiskManager: Debug + Send + Sync {
    /// Reads the persisted bytes of the given page into buf. A page that
    /// was never written reads back as zeroes.
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Writes buf as the contents of the given page, overwriting the
    /// previous version. buf must be exactly PAGE_SIZE bytes.
    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<()>;

    /// Releases the storage behind a deleted page. Implementations that
    /// do not reclaim space may treat this as a no-op.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<()>;

    /// Flushes any buffered writes to the underlying storage medium.
    fn flush(&mut self) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    File,
}

pub fn new_disk_manager(typ: StorageType, dir: &Path) -> Result<Box<dyn DiskManager>> {
    match typ {
        StorageType::Memory => Ok(Box::new(memory::Memory::new())),
        StorageType::File => {
            std::fs::create_dir_all(dir)?;
            Ok(Box::new(file::FileDisk::open(&dir.join("pagepool.db"))?))
        }
    }
}
