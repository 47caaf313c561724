use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use devmem_heap::error::{Error, Result};
use devmem_heap::pool::FramePool;
use devmem_heap::traits::{CacheMaintenance, IommuDomain, IommuRegistry, MemoryProvider, VmArea};
use devmem_heap::{PAGE_SHIFT, PAGE_SIZE};

pub const IOVA_WINDOW: Range<usize> = 0x1000_0000..0x1040_0000;

#[derive(Default)]
pub struct DomainState {
  // iova -> pa; padding fill carries no backing page
  pub mappings: BTreeMap<usize, Option<usize>>,
  pub map_calls: usize,
  pub fail_at_granule: Option<usize>,
  pub fail_extra: bool,
}

#[derive(Default)]
pub struct FakeDomain {
  pub state: Mutex<DomainState>,
}

impl IommuDomain for FakeDomain {
  fn map(&self, iova: usize, pa: usize, _cached: bool) -> Result<()> {
    let mut st = self.state.lock().unwrap();
    let call = st.map_calls;
    st.map_calls += 1;
    if st.fail_at_granule == Some(call) {
      return Err(Error::OutOfMemory);
    }
    assert!(
      st.mappings.insert(iova, Some(pa)).is_none(),
      "iova {iova:x} mapped twice without an unmap"
    );
    Ok(())
  }

  fn unmap(&self, iova: usize) {
    self.state.lock().unwrap().mappings.remove(&iova);
  }

  fn map_extra(&self, iova: usize, length: usize, _cached: bool) -> Result<()> {
    let mut st = self.state.lock().unwrap();
    if st.fail_extra {
      return Err(Error::OutOfMemory);
    }
    let mut cur = iova;
    let mut remaining = length as isize;
    while remaining > 0 {
      st.mappings.insert(cur, None);
      cur += PAGE_SIZE;
      remaining -= PAGE_SIZE as isize;
    }
    Ok(())
  }
}

pub struct FakeIommu {
  active: bool,
  domain_id: u32,
  pub domain: Arc<FakeDomain>,
  dead: AtomicBool,
  iova: Mutex<BTreeSet<usize>>,
  alloc_calls: AtomicUsize,
}

impl FakeIommu {
  pub fn new(active: bool, domain_id: u32) -> Arc<FakeIommu> {
    let mut free = BTreeSet::new();
    for iova in IOVA_WINDOW.step_by(PAGE_SIZE) {
      free.insert(iova);
    }
    Arc::new(FakeIommu {
      active,
      domain_id,
      domain: Arc::new(FakeDomain::default()),
      dead: AtomicBool::new(false),
      iova: Mutex::new(free),
      alloc_calls: AtomicUsize::new(0),
    })
  }

  pub fn kill_domain(&self) {
    self.dead.store(true, Ordering::SeqCst);
  }

  pub fn free_iova_pages(&self) -> usize {
    self.iova.lock().unwrap().len()
  }

  pub fn free_iova_snapshot(&self) -> BTreeSet<usize> {
    self.iova.lock().unwrap().clone()
  }

  pub fn mapped_granules(&self) -> usize {
    self.domain.state.lock().unwrap().mappings.len()
  }

  pub fn alloc_range_calls(&self) -> usize {
    self.alloc_calls.load(Ordering::SeqCst)
  }
}

impl IommuRegistry for FakeIommu {
  fn active(&self) -> bool {
    self.active
  }

  fn domain(&self, domain: u32) -> Option<Arc<dyn IommuDomain>> {
    if domain == self.domain_id && !self.dead.load(Ordering::SeqCst) {
      let d: Arc<dyn IommuDomain> = self.domain.clone();
      Some(d)
    } else {
      None
    }
  }

  fn alloc_range(&self, domain: u32, _partition: u32, length: usize, align: usize) -> Option<usize> {
    self.alloc_calls.fetch_add(1, Ordering::SeqCst);
    if domain != self.domain_id {
      return None;
    }
    let align = align.max(PAGE_SIZE);
    let pages = length.div_ceil(PAGE_SIZE);
    let mut free = self.iova.lock().unwrap();
    let mut start = 0;
    let mut count = 0;
    for &iova in free.iter() {
      if count == 0 || iova != start + (count << PAGE_SHIFT) {
        if iova % align == 0 {
          start = iova;
          count = 1;
        } else {
          count = 0;
        }
      } else {
        count += 1;
      }
      if count == pages {
        break;
      }
    }
    if count < pages {
      return None;
    }
    for i in 0..pages {
      free.remove(&(start + (i << PAGE_SHIFT)));
    }
    Some(start)
  }

  fn free_range(&self, domain: u32, _partition: u32, iova: usize, length: usize) {
    if domain != self.domain_id {
      return;
    }
    let pages = length.div_ceil(PAGE_SIZE);
    let mut free = self.iova.lock().unwrap();
    for i in 0..pages {
      let page = iova + (i << PAGE_SHIFT);
      assert!(free.insert(page), "iova {page:x} freed twice");
    }
  }
}

#[derive(Default)]
pub struct CacheRecorder {
  pub calls: Mutex<Vec<(&'static str, usize, usize, usize)>>,
}

impl CacheMaintenance for CacheRecorder {
  fn clean(&self, vaddr: usize, length: usize, paddr: usize) {
    self.calls.lock().unwrap().push(("clean", vaddr, length, paddr));
  }
  fn invalidate(&self, vaddr: usize, length: usize, paddr: usize) {
    self.calls.lock().unwrap().push(("invalidate", vaddr, length, paddr));
  }
  fn clean_and_invalidate(&self, vaddr: usize, length: usize, paddr: usize) {
    self.calls.lock().unwrap().push(("clean+invalidate", vaddr, length, paddr));
  }
}

/// FramePool wrapper that can fail the nth page translation.
pub struct FailingProvider {
  pub inner: FramePool,
  lookups: AtomicUsize,
  fail_on_lookup: Mutex<Option<usize>>,
}

impl FailingProvider {
  pub fn new(range: Range<usize>) -> Arc<FailingProvider> {
    Arc::new(FailingProvider {
      inner: FramePool::new(range),
      lookups: AtomicUsize::new(0),
      fail_on_lookup: Mutex::new(None),
    })
  }

  pub fn fail_on_lookup(&self, n: usize) {
    *self.fail_on_lookup.lock().unwrap() = Some(n);
    self.lookups.store(0, Ordering::SeqCst);
  }
}

impl MemoryProvider for FailingProvider {
  fn alloc_paged(&self, size: usize) -> Result<usize> {
    self.inner.alloc_paged(size)
  }
  fn free_paged(&self, base: usize, size: usize) {
    self.inner.free_paged(base, size)
  }
  fn alloc_contiguous(&self, size: usize) -> Result<usize> {
    self.inner.alloc_contiguous(size)
  }
  fn free_contiguous(&self, base: usize, size: usize) {
    self.inner.free_contiguous(base, size)
  }
  fn page_of(&self, va: usize) -> Option<usize> {
    let n = self.lookups.fetch_add(1, Ordering::SeqCst);
    if *self.fail_on_lookup.lock().unwrap() == Some(n) {
      return None;
    }
    self.inner.page_of(va)
  }
  fn phys_of(&self, va: usize) -> usize {
    self.inner.phys_of(va)
  }
  fn remap_paged(&self, vma: &VmArea, base: usize) -> Result<()> {
    self.inner.remap_paged(vma, base)
  }
  fn remap_contiguous(&self, vma: &VmArea, pfn: usize) -> Result<()> {
    self.inner.remap_contiguous(vma, pfn)
  }
}
