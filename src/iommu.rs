use alloc::sync::Arc;

use crate::buffer::{BackingStore, Buffer, BufferFlags};
use crate::error::{Error, Result};
use crate::traits::{IommuDomain, IommuRegistry, MemoryProvider};
use crate::PAGE_SIZE;

/// One live device-virtual reservation. Owned by whoever requested the
/// mapping; teardown runs exactly once, from drop.
pub struct MappingRecord {
  iova_base: usize,
  mapped_size: usize,
  domain: u32,
  partition: u32,
  needs_teardown: bool,
  registry: Arc<dyn IommuRegistry>,
}

impl MappingRecord {
  pub fn iova(&self) -> usize {
    self.iova_base
  }

  pub fn mapped_size(&self) -> usize {
    self.mapped_size
  }

  pub fn domain(&self) -> u32 {
    self.domain
  }

  pub fn partition(&self) -> u32 {
    self.partition
  }

  pub fn needs_teardown(&self) -> bool {
    self.needs_teardown
  }
}

impl Drop for MappingRecord {
  fn drop(&mut self) {
    if !self.needs_teardown {
      return;
    }
    let domain = match self.registry.domain(self.domain) {
      Some(d) => d,
      None => {
        warn!("could not get domain {}, corruption?", self.domain);
        return;
      }
    };
    let mut iova = self.iova_base;
    let mut remaining = self.mapped_size as isize;
    while remaining > 0 {
      domain.unmap(iova);
      iova += PAGE_SIZE;
      remaining -= PAGE_SIZE as isize;
    }
    self
      .registry
      .free_range(self.domain, self.partition, self.iova_base, self.mapped_size);
  }
}

fn granule_phys(provider: &dyn MemoryProvider, store: BackingStore, va: usize) -> Option<usize> {
  match store {
    BackingStore::Paged { .. } => provider.page_of(va),
    BackingStore::Contiguous { base, .. } => Some(provider.phys_of(base) + (va - base)),
  }
}

fn unwind(
  registry: &dyn IommuRegistry,
  domain: &dyn IommuDomain,
  domain_id: u32,
  partition: u32,
  iova_base: usize,
  granules: usize,
  length: usize,
) {
  let mut iova = iova_base;
  for _ in 0..granules {
    domain.unmap(iova);
    iova += PAGE_SIZE;
  }
  registry.free_range(domain_id, partition, iova_base, length);
}

pub(crate) fn map(
  buffer: &Buffer,
  provider: &dyn MemoryProvider,
  registry: &Arc<dyn IommuRegistry>,
  domain_id: u32,
  partition: u32,
  align: usize,
  length: usize,
  flags: BufferFlags,
) -> Result<MappingRecord> {
  if !flags.cached() {
    return Err(Error::InvalidArgument);
  }
  if length < buffer.size() {
    return Err(Error::InvalidArgument);
  }
  if !registry.active() {
    // no translation unit: the device sees physical addresses, so only
    // the contiguous store has a single base to hand out
    return match buffer.store() {
      BackingStore::Contiguous { base, .. } => Ok(MappingRecord {
        iova_base: provider.phys_of(base),
        mapped_size: length,
        domain: domain_id,
        partition,
        needs_teardown: false,
        registry: registry.clone(),
      }),
      BackingStore::Paged { .. } => Err(Error::InvalidArgument),
    };
  }

  let extra = length - buffer.size();
  let iova_base = registry
    .alloc_range(domain_id, partition, length, align)
    .ok_or(Error::OutOfMemory)?;
  let domain = match registry.domain(domain_id) {
    Some(d) => d,
    None => {
      registry.free_range(domain_id, partition, iova_base, length);
      return Err(Error::OutOfMemory);
    }
  };

  let cached = flags.cached();
  let mut iova = iova_base;
  let mut va = buffer.base();
  let mut granules = 0;
  let mut remaining = buffer.size() as isize;
  while remaining > 0 {
    let pa = match granule_phys(provider, buffer.store(), va) {
      Some(pa) => pa,
      None => {
        warn!("could not translate va {:x}", va);
        unwind(registry.as_ref(), domain.as_ref(), domain_id, partition, iova_base, granules, length);
        return Err(Error::Translation);
      }
    };
    if let Err(e) = domain.map(iova, pa, cached) {
      error!("could not map iova {:x} to pa {:x} in domain {}", iova, pa, domain_id);
      unwind(registry.as_ref(), domain.as_ref(), domain_id, partition, iova_base, granules, length);
      return Err(e);
    }
    granules += 1;
    iova += PAGE_SIZE;
    va += PAGE_SIZE;
    remaining -= PAGE_SIZE as isize;
  }

  if extra > 0 {
    if let Err(e) = domain.map_extra(iova, extra, cached) {
      unwind(registry.as_ref(), domain.as_ref(), domain_id, partition, iova_base, granules, length);
      return Err(e);
    }
  }

  Ok(MappingRecord {
    iova_base,
    mapped_size: length,
    domain: domain_id,
    partition,
    needs_teardown: true,
    registry: registry.clone(),
  })
}
