//! mxl-fabrics: extends the local MXL exchange across hosts.
//!
//! An **initiator** reads grains from a local flow and posts one-sided
//! remote writes; a **target** exposes the grain memory of a writer-side
//! flow, receives those writes, and surfaces each completed write as a local
//! commit — so readers downstream of a target are indistinguishable from
//! readers of a locally written flow.
//!
//! ```text
//! host A                                   host B
//! ┌──────────┐  grains   ┌───────────┐     ┌─────────┐  commits  ┌─────────┐
//! │ FlowReader│ ───────► │ Initiator │ ══► │ Target  │ ────────► │ readers │
//! └──────────┘           └───────────┘ net └─────────┘ shm       └─────────┘
//! ```
//!
//! Providers are selected by name (`auto`, `tcp`, `verbs`, `efa`); the
//! wire-level capability set is one-sided writes with reliable, in-order
//! completion per remote region. The TCP provider is the concrete
//! implementation here; `auto` resolves to the first provider that can bind.
//!
//! A target hands its [`TargetInfo`] — endpoint, memory-region descriptor,
//! flow id — to initiators as a printable string that round-trips through
//! `to_string`/`parse`, so it can travel over any out-of-band channel.

#![forbid(unsafe_op_in_unsafe_fn)]

mod endpoint;
mod initiator;
mod provider;
mod target;
mod target_info;
mod tcp;
mod wire;

pub use endpoint::EndpointAddress;
pub use initiator::{Initiator, InitiatorConfig};
pub use provider::Provider;
pub use target::{Target, TargetConfig};
pub use target_info::{RegionDescriptor, TargetInfo};

/// Callback invoked with the absolute grain index of a confirmed transfer
/// (initiator side) or a surfaced commit (target side). Runs on the
/// provider's completion task: it must not block and must not re-enter the
/// handle it was registered on.
pub type CompletionCallback = Box<dyn Fn(u64) + Send + Sync + 'static>;
