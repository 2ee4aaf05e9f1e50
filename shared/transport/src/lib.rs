mod collectives;
mod communicator;
mod error;
mod fabric;
mod harness;
mod registry;

pub use collectives::{
    all_gather_concat, all_reduce_sum, broadcast_buffer, recv_buffer, reduce_scatter_sum,
    send_buffer,
};
pub use communicator::Communicator;
pub use error::TransportError;
pub use harness::run_ranks;
pub use registry::{axis_communicator, bridge_communicator, communicator};
