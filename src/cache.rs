use crate::buffer::{BackingStore, Buffer};
use crate::error::{Error, Result};
use crate::traits::{CacheMaintenance, MemoryProvider};
use crate::PAGE_SIZE;

pub const CMD_CLEAN: u32 = 1;
pub const CMD_INVALIDATE: u32 = 2;
pub const CMD_CLEAN_INVALIDATE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
  Clean,
  Invalidate,
  CleanAndInvalidate,
}

impl CacheCommand {
  pub fn from_raw(raw: u32) -> Option<CacheCommand> {
    match raw {
      CMD_CLEAN => Some(CacheCommand::Clean),
      CMD_INVALIDATE => Some(CacheCommand::Invalidate),
      CMD_CLEAN_INVALIDATE => Some(CacheCommand::CleanAndInvalidate),
      _ => None,
    }
  }
}

// The caller's vaddr and the buffer's physical pages advance together;
// the caller may hold a different virtual alias of the same memory.
pub(crate) fn cache_op(
  buffer: &Buffer,
  provider: &dyn MemoryProvider,
  cache: &dyn CacheMaintenance,
  vaddr: usize,
  offset: usize,
  length: usize,
  command: u32,
) -> Result<()> {
  let command = CacheCommand::from_raw(command).ok_or(Error::InvalidArgument)?;
  let mut va = buffer.base() + offset;
  let mut vstart = vaddr;
  let mut ln = 0;
  while ln < length {
    let pstart = match buffer.store() {
      BackingStore::Paged { .. } => provider.page_of(va),
      BackingStore::Contiguous { base, .. } => Some(provider.phys_of(base) + (va - base)),
    };
    let pstart = match pstart {
      Some(pa) if pa != 0 => pa,
      _ => {
        warn!("could not translate va {:x}", va);
        return Err(Error::InvalidArgument);
      }
    };
    match command {
      CacheCommand::Clean => cache.clean(vstart, PAGE_SIZE, pstart),
      CacheCommand::Invalidate => cache.invalidate(vstart, PAGE_SIZE, pstart),
      CacheCommand::CleanAndInvalidate => cache.clean_and_invalidate(vstart, PAGE_SIZE, pstart),
    }
    va += PAGE_SIZE;
    vstart += PAGE_SIZE;
    ln += PAGE_SIZE;
  }
  Ok(())
}
