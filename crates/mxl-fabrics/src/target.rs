//! The fabric target: local endpoint receiving one-sided writes into a
//! writer-side flow.

use std::sync::Arc;
use std::time::Duration;

use mxl_core::{time, Error, GrainSnapshot, Result, GRAIN_INFO_SIZE};
use mxl_shm::{DiscreteFlowData, FlowData, FlowReader, GrainView};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use uuid::Uuid;

use crate::endpoint::EndpointAddress;
use crate::provider::{self, Provider};
use crate::target_info::{RegionDescriptor, TargetInfo};
use crate::tcp;
use crate::CompletionCallback;

/// Target-side endpoint configuration.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub endpoint: EndpointAddress,
    pub provider: Provider,
}

/// State shared with the provider's connection tasks.
pub(crate) struct TargetShared {
    flow: Arc<FlowData>,
    key: u64,
    callback: Mutex<Option<CompletionCallback>>,
}

impl TargetShared {
    /// Apply one remote write to grain slot `slot` and, when it carries a
    /// full commit, surface it exactly like a local writer commit: bump the
    /// flow sync counter, wake readers, invoke the completion callback.
    ///
    /// Returns the committed absolute index, or `None` for a partial write
    /// (stored, but not yet visible).
    pub(crate) fn apply_remote_write(
        &self,
        key: u64,
        slot: u64,
        header: &GrainSnapshot,
        payload: &[u8],
    ) -> Result<Option<u64>> {
        if key != self.key {
            return Err(Error::Fabric("remote write carries a bad access key".into()));
        }
        let discrete = self
            .flow
            .as_discrete()
            .ok_or_else(|| Error::Fabric("target flow is not discrete".into()))?;
        if slot >= discrete.grain_count() {
            return Err(Error::Fabric(format!(
                "remote write addresses slot {slot} beyond the ring"
            )));
        }

        let segment = discrete.grain(slot as usize);
        let local = segment.header();
        if header.grain_size != local.grain_size {
            return Err(Error::Fabric(format!(
                "remote grain size {} does not match local slot size {}",
                header.grain_size, local.grain_size
            )));
        }
        if header.committed_size > header.grain_size || payload.len() as u64 > local.grain_size {
            return Err(Error::Fabric("remote write overflows the grain slot".into()));
        }

        // Same ordering as a local writer: invalidate, publish the occupant,
        // fill the payload, then release the committed size.
        local.committed_size.store(0, Ordering::Release);
        local.index.store(header.index, Ordering::Release);
        segment.payload_mut()[..payload.len()].copy_from_slice(payload);
        local.timestamp.store(header.timestamp, Ordering::Relaxed);
        local.flags.store(header.flags, Ordering::Relaxed);
        local
            .committed_size
            .store(header.committed_size, Ordering::Release);

        if header.committed_size != header.grain_size {
            tracing::trace!(slot, index = header.index, "partial remote write stored");
            return Ok(None);
        }

        let info = self.flow.info();
        info.common
            .last_write_time
            .store(time::now(), Ordering::Relaxed);
        if let Some(counter) = info.sync_counter() {
            counter.fetch_add(1, Ordering::Release);
            mxl_shm::sync::wake_all(counter);
        }
        if let Some(callback) = &*self.callback.lock() {
            callback(header.index);
        }
        Ok(Some(header.index))
    }
}

/// A fabric target: owns a writer-side flow projection, exposes its grain
/// region to remote initiators, and mirrors their commits to local readers.
pub struct Target {
    shared: Arc<TargetShared>,
    info: TargetInfo,
    reader: FlowReader,
    listener: tokio::task::JoinHandle<()>,
}

impl Target {
    /// Bind the passive endpoint, register the flow's grain region, and
    /// return the running target. [`Target::info`] is what remote initiators
    /// need, serialized with `to_string`.
    pub async fn setup(flow: DiscreteFlowData, config: TargetConfig) -> Result<Self> {
        let provider = provider::resolve(config.provider)?;
        if !flow.is_writable() {
            return Err(Error::InvalidArg("target flow must be mapped for writing"));
        }
        if flow.grain_count() == 0 {
            return Err(Error::InvalidArg("target flow has no grain slots"));
        }

        let slot_size = (GRAIN_INFO_SIZE + flow.grain(0).payload_len()) as u64;
        let grain_count = flow.grain_count();
        let base = flow.grain(0).header() as *const _ as u64;

        let flow = Arc::new(FlowData::Discrete(flow));
        let flow_id = flow.id();
        let key: u64 = rand::random();

        let shared = Arc::new(TargetShared {
            flow: Arc::clone(&flow),
            key,
            callback: Mutex::new(None),
        });

        let (local, listener) = match provider {
            Provider::Tcp => tcp::bind_target(&config.endpoint, Arc::clone(&shared)).await?,
            other => return Err(Error::Fabric(format!("provider '{other}' cannot bind"))),
        };

        let info = TargetInfo {
            provider,
            endpoint: EndpointAddress::new(local.ip().to_string(), local.port().to_string()),
            region: RegionDescriptor {
                base,
                length: grain_count * slot_size,
                key,
                grain_count,
                slot_size,
            },
            flow_id,
        };
        tracing::info!(%flow_id, endpoint = %info.endpoint, %provider, "fabric target ready");

        Ok(Self {
            shared,
            info,
            reader: FlowReader::from_shared(flow),
            listener,
        })
    }

    /// The descriptor to hand to remote initiators.
    pub fn info(&self) -> &TargetInfo {
        &self.info
    }

    pub fn flow_id(&self) -> Uuid {
        self.info.flow_id
    }

    /// Install a callback invoked from the completion task with the absolute
    /// index of every surfaced commit. Must not block.
    pub fn set_completion_callback(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *self.shared.callback.lock() = Some(Box::new(callback));
    }

    /// A fresh reader over the target's flow, interchangeable with any other
    /// flow reader (e.g. for moving onto a blocking thread).
    pub fn reader(&self) -> FlowReader {
        FlowReader::from_shared(Arc::clone(&self.shared.flow))
    }

    /// Non-blocking grain accessor, mirroring [`FlowReader::get_grain`].
    pub fn get_grain(&self, index: u64) -> Result<GrainView<'_>> {
        self.reader.get_grain(index)
    }

    /// Blocking grain accessor, mirroring [`FlowReader::get_grain_blocking`].
    /// Call from a blocking-capable thread, not an async task.
    pub fn get_grain_blocking(
        &self,
        index: u64,
        timeout: Option<Duration>,
    ) -> Result<GrainView<'_>> {
        self.reader.get_grain_blocking(index, timeout)
    }

    /// Block until the next surfaced commit, mirroring
    /// [`FlowReader::wait_for_new_grain`]. Call from a blocking-capable
    /// thread, not an async task.
    pub fn wait_for_new_grain(&self, timeout: Option<Duration>) -> Result<GrainView<'_>> {
        self.reader.wait_for_new_grain(timeout)
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
