//! Single-producer grain/sample publication.
//!
//! One writer per flow is a convention enforced by advisory markers, not by
//! locking; `FlowWriter` enforces it in-process by requiring `&mut self` for
//! every mutation and by tying each opened grain to a [`PendingGrain`] guard
//! that must be committed (or dropped, leaving the slot invisible).
//!
//! Commit ordering: payload writes happen before the release-store of
//! `committed_size`, which happens before the release-increment of the flow
//! `sync_counter`. A reader that acquires the counter therefore sees every
//! earlier grain fully written.

use std::sync::Arc;

use mxl_core::{time, Error, Result, UNDEFINED_INDEX};
use std::sync::atomic::Ordering;

use crate::flow::{DiscreteFlowData, FlowData};
use crate::sync;

/// Writer handle over a flow projection.
pub struct FlowWriter {
    data: Arc<FlowData>,
}

impl FlowWriter {
    /// Wrap a writable projection.
    pub fn new(data: impl Into<FlowData>) -> Result<Self> {
        Self::from_shared(Arc::new(data.into()))
    }

    /// Wrap an already-shared writable projection.
    pub fn from_shared(data: Arc<FlowData>) -> Result<Self> {
        if !data.is_writable() {
            return Err(Error::InvalidArg("flow is not mapped for writing"));
        }
        if !data.format().is_supported() {
            return Err(Error::UnsupportedFormat);
        }
        Ok(Self { data })
    }

    pub fn flow(&self) -> &FlowData {
        &self.data
    }

    pub fn shared(&self) -> &Arc<FlowData> {
        &self.data
    }

    /// Open the slot for absolute grain `index` and hand out a write guard.
    ///
    /// The slot's previous content becomes invisible immediately. Opening an
    /// index at or below the published head while readers may still observe
    /// it violates the (advisory) window contract.
    pub fn open_grain(&mut self, index: u64) -> Result<PendingGrain<'_>> {
        if index == UNDEFINED_INDEX {
            return Err(Error::InvalidArg("undefined grain index"));
        }
        let discrete = self
            .data
            .as_discrete()
            .ok_or(Error::InvalidArg("not a discrete flow"))?;
        let count = discrete.grain_count();
        if count == 0 {
            return Err(Error::InvalidArg("flow has no grain slots"));
        }

        let slot = (index % count) as usize;
        let header = discrete.grain(slot).header();

        // Invalidate first; the release on `index` then publishes the
        // invalidation to any reader that observes the new occupant.
        header.committed_size.store(0, Ordering::Release);
        header.timestamp.store(time::now(), Ordering::Relaxed);
        header.index.store(index, Ordering::Release);

        Ok(PendingGrain {
            data: discrete,
            slot,
            index,
        })
    }

    /// Write `samples` (raw bytes, whole sample words) into `channel`'s ring
    /// starting at absolute sample `start_sample`, wrapping as needed.
    pub fn write_samples(
        &mut self,
        channel: u64,
        start_sample: u64,
        samples: &[u8],
    ) -> Result<()> {
        let continuous = self
            .data
            .as_continuous()
            .ok_or(Error::InvalidArg("not a continuous flow"))?;
        let word = continuous.sample_word_size();
        if word == 0 || samples.len() % word != 0 {
            return Err(Error::InvalidArg("samples must be whole sample words"));
        }
        let buffer_length = continuous.channel_buffer_length();
        if (samples.len() / word) as u64 > buffer_length {
            return Err(Error::InvalidArg("sample run longer than the channel ring"));
        }

        let ring = continuous.channel_slice_mut(channel)?;
        let start = ((start_sample % buffer_length) as usize) * word;
        let first = samples.len().min(ring.len() - start);
        ring[start..start + first].copy_from_slice(&samples[..first]);
        ring[..samples.len() - first].copy_from_slice(&samples[first..]);
        Ok(())
    }

    /// Publish samples up to (and excluding) absolute index `head`: advance
    /// the head, bump the commit counter, and wake blocked consumers.
    pub fn commit_samples(&mut self, head: u64) -> Result<()> {
        let continuous = self
            .data
            .as_continuous()
            .ok_or(Error::InvalidArg("not a continuous flow"))?;
        let info = continuous
            .info()
            .continuous()
            .ok_or(Error::UnsupportedFormat)?;

        info.head_index.store(head, Ordering::Release);
        self.data
            .info()
            .common
            .last_write_time
            .store(time::now(), Ordering::Relaxed);
        info.sync_counter.fetch_add(1, Ordering::Release);
        sync::wake_all(&info.sync_counter);
        Ok(())
    }
}

/// Write guard for one opened grain slot.
///
/// Dropping the guard without [`commit`](PendingGrain::commit) leaves the
/// slot invisible (`committed_size` stays `0`).
pub struct PendingGrain<'a> {
    data: &'a DiscreteFlowData,
    slot: usize,
    index: u64,
}

impl PendingGrain<'_> {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn grain_size(&self) -> u64 {
        self.data.grain(self.slot).header().grain_size
    }

    /// The full payload region of the slot.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.data.grain(self.slot).payload_mut()
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.data
            .grain(self.slot)
            .header()
            .flags
            .store(flags, Ordering::Relaxed);
    }

    /// Override the timestamp assigned at open time.
    pub fn set_timestamp(&mut self, timestamp_ns: u64) {
        self.data
            .grain(self.slot)
            .header()
            .timestamp
            .store(timestamp_ns, Ordering::Relaxed);
    }

    /// Publish the grain: release the payload, bump the flow commit counter
    /// once, and wake blocked readers.
    pub fn commit(self) {
        let header = self.data.grain(self.slot).header();
        header
            .committed_size
            .store(header.grain_size, Ordering::Release);

        let info = self.data.info();
        info.common
            .last_write_time
            .store(time::now(), Ordering::Relaxed);

        // The variant is discrete by construction of the guard.
        if let Some(counter) = info.sync_counter() {
            counter.fetch_add(1, Ordering::Release);
            sync::wake_all(counter);
        }
    }
}
