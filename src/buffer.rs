use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::sg::ScatterList;
use crate::traits::MemoryProvider;

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct BufferFlags: u32 {
    const CACHED = 1 << 0;
  }
}

impl BufferFlags {
  pub fn cached(self) -> bool {
    self.contains(BufferFlags::CACHED)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingStore {
  Paged { base: usize, size: usize },
  Contiguous { base: usize, size: usize },
}

impl BackingStore {
  pub fn base(self) -> usize {
    match self {
      BackingStore::Paged { base, .. } => base,
      BackingStore::Contiguous { base, .. } => base,
    }
  }
}

/// One allocation. The backing store is owned exclusively and returned to
/// the provider exactly once, when the buffer drops.
pub struct Buffer {
  size: usize,
  flags: BufferFlags,
  store: BackingStore,
  pub(crate) sglist: Option<ScatterList>,
  provider: Arc<dyn MemoryProvider>,
  allocated: Arc<AtomicUsize>,
}

impl Buffer {
  pub(crate) fn new(
    size: usize,
    flags: BufferFlags,
    store: BackingStore,
    provider: Arc<dyn MemoryProvider>,
    allocated: Arc<AtomicUsize>,
  ) -> Self {
    Buffer {
      size,
      flags,
      store,
      sglist: None,
      provider,
      allocated,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn flags(&self) -> BufferFlags {
    self.flags
  }

  pub fn store(&self) -> BackingStore {
    self.store
  }

  pub fn base(&self) -> usize {
    self.store.base()
  }
}

impl Drop for Buffer {
  fn drop(&mut self) {
    match self.store {
      BackingStore::Paged { base, size } => self.provider.free_paged(base, size),
      BackingStore::Contiguous { base, size } => self.provider.free_contiguous(base, size),
    }
    self.allocated.fetch_sub(self.size, Ordering::Relaxed);
  }
}
