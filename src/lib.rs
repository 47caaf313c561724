#![no_std]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod cache;
pub mod error;
pub mod heap;
pub mod iommu;
pub mod pool;
pub mod sg;
pub mod traits;

mod util;

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

const_assert!(PAGE_SIZE.is_power_of_two());

pub use buffer::{BackingStore, Buffer, BufferFlags};
pub use cache::CacheCommand;
pub use error::{Error, Result};
pub use heap::{Heap, HeapKind};
pub use iommu::MappingRecord;
pub use sg::{ScatterEntry, ScatterList};
pub use traits::{CacheMaintenance, IommuDomain, IommuRegistry, MemoryProvider, VmArea};
