//! mxl-shm: zero-copy exchange of timed media flows between processes on one
//! host.
//!
//! A *domain* is a directory (ideally on `/dev/shm`) holding one published
//! directory per flow:
//!
//! ```text
//! <domain>/
//! └── <uuid>.mxl-flow/
//!     ├── descriptor.json      opaque descriptor, stored verbatim
//!     ├── access               zero-length liveness marker
//!     ├── data                 FlowInfo shared-memory segment
//!     ├── grains/<0..N-1>      discrete only: one GrainInfo+payload per slot
//!     └── channels             continuous only: channelized sample ring
//! ```
//!
//! Flows are built in a hidden staging directory and published with one
//! atomic rename, so readers never observe a half-built flow. Within a flow
//! the commit protocol is single-producer/many-reader: the writer
//! release-stores each grain's `committed_size`, bumps the header's
//! `sync_counter`, and wakes blocked readers through a cross-process futex.

#![forbid(unsafe_op_in_unsafe_fn)]

mod flow;
mod manager;
pub mod paths;
mod reader;
mod segment;
pub mod sync;
mod writer;

pub use flow::{ContinuousFlowData, DiscreteFlowData, FlowData};
pub use manager::FlowManager;
pub use reader::{FlowReader, GrainView};
pub use segment::{AccessMode, Segment};
pub use writer::{FlowWriter, PendingGrain};
