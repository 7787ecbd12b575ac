//! Engine pieces shared by every filesystem server that are not specific to
//! any one on-disk format: the block device boundary, the block cache
//! (spec §4.2), the bitmap allocator primitives (spec §4.3), and the
//! dispatch/periodic-flush loop (spec §4.11) parameterized over a server's
//! own [`FsOps`].

mod bitmap;
mod block_device;
mod cache;
mod dispatch;

pub use bitmap::{alloc_bit, clear_bit};
pub use block_device::{BlockDevice, FileBlockDevice};
pub use cache::{BlockCache, CacheMode};
pub use dispatch::{Dispatcher, FsOps};
