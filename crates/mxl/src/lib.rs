//! mxl: a Media eXchange Layer.
//!
//! Zero-copy exchange of timed media flows — discrete grain rings (video
//! frames) and continuous sample rings (audio channels) — between processes
//! on one host, plus a fabric transport that mirrors grain commits to remote
//! hosts while preserving the local reader contract.
//!
//! # Quick start
//!
//! ```no_run
//! use mxl::prelude::*;
//!
//! # fn main() -> mxl::Result<()> {
//! let manager = FlowManager::new("/dev/shm/mxl")?;
//! let id = uuid::Uuid::new_v4();
//! let rate = Rational::new(60_000, 1001);
//!
//! // Producer: create the flow, then open/fill/commit one grain per tick.
//! let flow = manager.create_discrete_flow(
//!     id, r#"{"format":"video"}"#, DataFormat::Video, 5, rate, 1024,
//! )?;
//! let mut writer = FlowWriter::new(flow)?;
//! let index = mxl::time::current_index(rate);
//! let mut grain = writer.open_grain(index)?;
//! grain.payload_mut().fill(0);
//! grain.commit();
//!
//! // Consumer (same or another process): attach and block on commits.
//! let reader = FlowReader::new(manager.open_flow(id, AccessMode::OpenReadOnly)?);
//! let view = reader.wait_for_new_grain(Some(std::time::Duration::from_millis(100)))?;
//! println!("grain {} carries {} bytes", view.info.index, view.payload.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! - [`mxl_core`]: status type, TAI time math, on-disk layouts
//! - [`mxl_shm`]: segments, flow lifecycle, grain commit protocol
//! - [`mxl_fabrics`]: initiator/target fabric transport
//!
//! Everything public is re-exported here.

#![forbid(unsafe_op_in_unsafe_fn)]

pub use mxl_core::{
    time, CommonFlowInfo, ContinuousFlowInfo, DataFormat, DiscreteFlowInfo, Error, FlowInfo,
    FlowShape, FlowSnapshot, GrainInfo, GrainSnapshot, Rational, Result, MAX_RATE_COMPONENT,
    UNDEFINED_INDEX,
};

pub use mxl_shm::{
    paths, sync, AccessMode, ContinuousFlowData, DiscreteFlowData, FlowData, FlowManager,
    FlowReader, FlowWriter, GrainView, PendingGrain, Segment,
};

pub use mxl_fabrics::{
    CompletionCallback, EndpointAddress, Initiator, InitiatorConfig, Provider, RegionDescriptor,
    Target, TargetConfig, TargetInfo,
};

/// The commonly needed surface in one import.
pub mod prelude {
    pub use crate::{
        AccessMode, DataFormat, Error, FlowManager, FlowReader, FlowWriter, Provider, Rational,
        Result,
    };
}
