use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::{BackingStore, Buffer, BufferFlags};
use crate::cache;
use crate::error::{Error, Result};
use crate::iommu::{self, MappingRecord};
use crate::sg::{self, ScatterList};
use crate::traits::{CacheMaintenance, IommuRegistry, MemoryProvider, VmArea};
use crate::util::round_up;
use crate::{PAGE_SHIFT, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
  Paged,
  Contiguous,
}

/// One heap instance. Variant identity is fixed at creation; the
/// allocated-byte counter is per instance.
pub struct Heap {
  kind: HeapKind,
  provider: Arc<dyn MemoryProvider>,
  iommu: Arc<dyn IommuRegistry>,
  cache: Arc<dyn CacheMaintenance>,
  allocated: Arc<AtomicUsize>,
}

impl Heap {
  pub fn paged(
    provider: Arc<dyn MemoryProvider>,
    iommu: Arc<dyn IommuRegistry>,
    cache: Arc<dyn CacheMaintenance>,
  ) -> Self {
    Heap::new(HeapKind::Paged, provider, iommu, cache)
  }

  pub fn contiguous(
    provider: Arc<dyn MemoryProvider>,
    iommu: Arc<dyn IommuRegistry>,
    cache: Arc<dyn CacheMaintenance>,
  ) -> Self {
    Heap::new(HeapKind::Contiguous, provider, iommu, cache)
  }

  fn new(
    kind: HeapKind,
    provider: Arc<dyn MemoryProvider>,
    iommu: Arc<dyn IommuRegistry>,
    cache: Arc<dyn CacheMaintenance>,
  ) -> Self {
    Heap {
      kind,
      provider,
      iommu,
      cache,
      allocated: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn kind(&self) -> HeapKind {
    self.kind
  }

  // alignment past natural page alignment is accepted but not honored
  pub fn allocate(&self, size: usize, _align: usize, flags: BufferFlags) -> Result<Buffer> {
    let store = match self.kind {
      HeapKind::Paged => {
        let rounded = round_up(size, PAGE_SIZE);
        let base = self.provider.alloc_paged(rounded)?;
        BackingStore::Paged { base, size: rounded }
      }
      HeapKind::Contiguous => {
        let base = self.provider.alloc_contiguous(size)?;
        BackingStore::Contiguous { base, size }
      }
    };
    self.allocated.fetch_add(size, Ordering::Relaxed);
    Ok(Buffer::new(
      size,
      flags,
      store,
      self.provider.clone(),
      self.allocated.clone(),
    ))
  }

  pub fn free(&self, buffer: Buffer) {
    drop(buffer);
  }

  pub fn map_dma<'a>(&self, buffer: &'a mut Buffer) -> Result<&'a ScatterList> {
    if buffer.sglist.is_none() {
      let built = sg::build(buffer, self.provider.as_ref())?;
      buffer.sglist = Some(built);
    }
    buffer.sglist.as_ref().ok_or(Error::Translation)
  }

  pub fn unmap_dma(&self, buffer: &mut Buffer) {
    buffer.sglist = None;
  }

  pub fn map_kernel(&self, buffer: &Buffer, flags: BufferFlags) -> Result<usize> {
    if !flags.cached() {
      error!("cannot map heap uncached");
      return Err(Error::InvalidArgument);
    }
    Ok(buffer.base())
  }

  pub fn unmap_kernel(&self, _buffer: &Buffer) {}

  pub fn map_user(&self, buffer: &Buffer, vma: &VmArea, flags: BufferFlags) -> Result<()> {
    if !flags.cached() {
      error!("cannot map heap uncached");
      return Err(Error::InvalidArgument);
    }
    match buffer.store() {
      BackingStore::Paged { base, .. } => self.provider.remap_paged(vma, base),
      BackingStore::Contiguous { base, .. } => {
        let pfn = (self.provider.phys_of(base) >> PAGE_SHIFT) + vma.pgoff;
        self.provider.remap_contiguous(vma, pfn)
      }
    }
  }

  pub fn cache_op(
    &self,
    buffer: &Buffer,
    vaddr: usize,
    offset: usize,
    length: usize,
    command: u32,
  ) -> Result<()> {
    cache::cache_op(
      buffer,
      self.provider.as_ref(),
      self.cache.as_ref(),
      vaddr,
      offset,
      length,
      command,
    )
  }

  pub fn map_iommu(
    &self,
    buffer: &Buffer,
    domain: u32,
    partition: u32,
    align: usize,
    length: usize,
    flags: BufferFlags,
  ) -> Result<MappingRecord> {
    iommu::map(
      buffer,
      self.provider.as_ref(),
      &self.iommu,
      domain,
      partition,
      align,
      length,
      flags,
    )
  }

  pub fn unmap_iommu(&self, record: MappingRecord) {
    drop(record);
  }

  pub fn get_allocated(&self) -> usize {
    self.allocated.load(Ordering::Relaxed)
  }

  pub fn phys(&self, buffer: &Buffer) -> Result<(usize, usize)> {
    match self.kind {
      HeapKind::Contiguous => Ok((self.provider.phys_of(buffer.base()), buffer.size())),
      HeapKind::Paged => Err(Error::InvalidArgument),
    }
  }
}
