//! mxl-core: shared types for the Media eXchange Layer.
//!
//! Everything in this crate is process-agnostic: status codes, the rational
//! edit-rate type, TAI timestamp/index conversions, and the `#[repr(C)]`
//! header layouts that live inside shared-memory segments. The crates that
//! actually map memory (`mxl-shm`) or move grains across hosts
//! (`mxl-fabrics`) build on these definitions.

#![forbid(unsafe_op_in_unsafe_fn)]

mod error;
mod format;
mod layout;
mod rational;
pub mod time;

pub use error::{Error, Result};
pub use format::DataFormat;
pub use layout::{
    CommonFlowInfo, ContinuousFlowInfo, DiscreteFlowInfo, FlowDetails, FlowInfo, FlowShape,
    FlowSnapshot, GrainInfo, GrainSnapshot, FLOW_INFO_SIZE, FLOW_INFO_VERSION, GRAIN_INFO_SIZE,
    GRAIN_INFO_VERSION,
};
pub use rational::{Rational, MAX_RATE_COMPONENT};
pub use time::UNDEFINED_INDEX;
