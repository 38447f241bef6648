//! The fabric initiator: reads grains locally and fans them out to
//! registered targets as one-sided remote writes.

use std::sync::Arc;

use mxl_core::{Error, GrainSnapshot, Result, GRAIN_INFO_SIZE};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::endpoint::EndpointAddress;
use crate::provider::{self, Provider};
use crate::target_info::TargetInfo;
use crate::tcp;
use crate::wire::{self, Frame};
use crate::CompletionCallback;

/// Initiator-side endpoint configuration.
#[derive(Clone, Debug)]
pub struct InitiatorConfig {
    pub endpoint: EndpointAddress,
    pub provider: Provider,
}

/// One registered target: its descriptor plus the connected provider stream.
struct ConnectedTarget {
    info: TargetInfo,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    ack_task: tokio::task::JoinHandle<()>,
}

impl ConnectedTarget {
    fn matches(&self, info: &TargetInfo) -> bool {
        self.info.endpoint == info.endpoint && self.info.region.key == info.region.key
    }
}

impl Drop for ConnectedTarget {
    fn drop(&mut self) {
        self.ack_task.abort();
    }
}

/// A fabric initiator.
///
/// Transfers fan out to every registered target; a failure towards one
/// target is logged and does not cancel the others. Confirmed writes are
/// reported through the completion callback with their absolute grain index.
pub struct Initiator {
    provider: Provider,
    targets: Mutex<Vec<Arc<ConnectedTarget>>>,
    callback: Arc<Mutex<Option<CompletionCallback>>>,
}

impl Initiator {
    /// Resolve the provider and create an initiator with no targets.
    pub async fn setup(config: InitiatorConfig) -> Result<Self> {
        let provider = provider::resolve(config.provider)?;
        tracing::info!(%provider, endpoint = %config.endpoint, "fabric initiator ready");
        Ok(Self {
            provider,
            targets: Mutex::new(Vec::new()),
            callback: Arc::new(Mutex::new(None)),
        })
    }

    /// Register a target and connect to it. A target with the same endpoint
    /// and access key replaces any previous registration.
    pub async fn add_target(&self, info: &TargetInfo) -> Result<()> {
        let resolved = provider::resolve(info.provider)?;
        if resolved != self.provider {
            return Err(Error::Fabric(format!(
                "target provider '{}' does not match initiator provider '{}'",
                info.provider, self.provider
            )));
        }
        if info.region.grain_count == 0 || info.region.slot_size <= GRAIN_INFO_SIZE as u64 {
            return Err(Error::InvalidArg("target region has no grain capacity"));
        }

        let stream = match self.provider {
            Provider::Tcp => tcp::connect(&info.endpoint).await?,
            other => return Err(Error::Fabric(format!("provider '{other}' cannot connect"))),
        };
        let (read_half, write_half) = stream.into_split();
        let ack_task = tokio::spawn(drain_completions(read_half, Arc::clone(&self.callback)));

        let connected = Arc::new(ConnectedTarget {
            info: info.clone(),
            writer: tokio::sync::Mutex::new(write_half),
            ack_task,
        });

        let mut targets = self.targets.lock();
        targets.retain(|t| !t.matches(info));
        targets.push(connected);
        tracing::debug!(endpoint = %info.endpoint, flow = %info.flow_id, "fabric target added");
        Ok(())
    }

    /// Drop a target registration and its connection.
    pub fn remove_target(&self, info: &TargetInfo) -> Result<()> {
        let mut targets = self.targets.lock();
        let before = targets.len();
        targets.retain(|t| !t.matches(info));
        if targets.len() == before {
            return Err(Error::NotFound);
        }
        tracing::debug!(endpoint = %info.endpoint, "fabric target removed");
        Ok(())
    }

    pub fn target_count(&self) -> usize {
        self.targets.lock().len()
    }

    /// Install a callback invoked with the absolute grain index of each
    /// confirmed remote write. Runs on the completion task; must not block.
    pub fn set_completion_callback(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Transfer one full grain to every registered target.
    ///
    /// Per-target failures are logged and skipped; the call fails only when
    /// no registered target accepted the write.
    pub async fn transfer_grain(&self, grain: &GrainSnapshot, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 != grain.grain_size {
            return Err(Error::InvalidArg("payload must cover the full grain"));
        }
        let targets: Vec<_> = self.targets.lock().clone();
        if targets.is_empty() {
            return Ok(());
        }

        let mut delivered = 0usize;
        for target in &targets {
            match self.post_write(target, grain, payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(
                        endpoint = %target.info.endpoint,
                        index = grain.index,
                        error = %e,
                        "transfer to target failed"
                    );
                }
            }
        }
        if delivered == 0 {
            return Err(Error::Fabric("transfer failed towards every target".into()));
        }
        Ok(())
    }

    /// Transfer one full grain to a single registered target.
    pub async fn transfer_grain_to_target(
        &self,
        grain: &GrainSnapshot,
        info: &TargetInfo,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() as u64 != grain.grain_size {
            return Err(Error::InvalidArg("payload must cover the full grain"));
        }
        let target = self
            .targets
            .lock()
            .iter()
            .find(|t| t.matches(info))
            .cloned()
            .ok_or(Error::NotFound)?;
        self.post_write(&target, grain, payload).await
    }

    /// Post one write-grain frame: slot addressing per the target's region
    /// descriptor, then the frame on the connected stream. Writes to the
    /// same slot stay ordered by the per-target stream lock.
    async fn post_write(
        &self,
        target: &ConnectedTarget,
        grain: &GrainSnapshot,
        payload: &[u8],
    ) -> Result<()> {
        let region = &target.info.region;
        if GRAIN_INFO_SIZE as u64 + grain.grain_size > region.slot_size {
            return Err(Error::Fabric(format!(
                "grain of {} bytes does not fit the target slot stride {}",
                grain.grain_size, region.slot_size
            )));
        }
        let slot = grain.index % region.grain_count;

        let mut writer = target.writer.lock().await;
        wire::write_grain(&mut *writer, region.key, slot, grain, payload)
            .await
            .map_err(|e| Error::Fabric(format!("remote write failed: {e}")))
    }
}

/// Read completion frames from a target connection and report them.
async fn drain_completions(
    mut reader: OwnedReadHalf,
    callback: Arc<Mutex<Option<CompletionCallback>>>,
) {
    loop {
        match wire::read_frame(&mut reader).await {
            Ok(Frame::Completion { index, .. }) => {
                if let Some(callback) = &*callback.lock() {
                    callback(index);
                }
            }
            Ok(Frame::WriteGrain { .. }) => {
                tracing::warn!("unexpected write-grain frame from target");
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    tracing::warn!(error = %e, "completion stream error");
                }
                break;
            }
        }
    }
}
