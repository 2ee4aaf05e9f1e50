mod buffer;
mod device;
mod error;
mod grid;
mod kernel;
mod placement;
mod sbp;
mod shard;

pub use buffer::{DType, Element, LocalBuffer};
pub use device::DeviceKind;
pub use error::{BoxingError, ErrorKind};
pub use grid::{Grid, RankId};
pub use kernel::{HostKernel, LocalKernel};
pub use placement::Placement;
pub use sbp::{Distribution, Sbp};
pub use shard::{balanced_range, shard_view, shard_view_at, ShardView};
