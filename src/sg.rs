use alloc::vec::Vec;

use crate::buffer::{BackingStore, Buffer};
use crate::error::{Error, Result};
use crate::traits::MemoryProvider;
use crate::{PAGE_SHIFT, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterEntry {
  pub pa: usize,
  pub length: usize,
  pub offset: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScatterList {
  entries: Vec<ScatterEntry>,
}

impl ScatterList {
  pub fn entries(&self) -> &[ScatterEntry] {
    &self.entries
  }

  pub fn total_length(&self) -> usize {
    self.entries.iter().map(|e| e.length).sum()
  }
}

// Entries come out in ascending virtual order; consumers reconstructing a
// contiguous device view depend on it.
pub(crate) fn build(buffer: &Buffer, provider: &dyn MemoryProvider) -> Result<ScatterList> {
  match buffer.store() {
    BackingStore::Paged { base, size } => {
      let npages = size >> PAGE_SHIFT;
      let mut entries = Vec::with_capacity(npages);
      let mut va = base;
      for _ in 0..npages {
        let pa = provider.page_of(va).ok_or(Error::Translation)?;
        entries.push(ScatterEntry {
          pa,
          length: PAGE_SIZE,
          offset: 0,
        });
        va += PAGE_SIZE;
      }
      Ok(ScatterList { entries })
    }
    BackingStore::Contiguous { base, .. } => Ok(ScatterList {
      entries: vec![ScatterEntry {
        pa: provider.phys_of(base),
        length: buffer.size(),
        offset: 0,
      }],
    }),
  }
}
