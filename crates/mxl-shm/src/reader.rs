//! Many-reader grain access: polling, blocking, and commit callbacks.
//!
//! Visibility rule: slot `index % grain_count` carries grain `index` iff the
//! slot header's `index` equals the requested index and `committed_size`
//! equals `grain_size`. Anything newer in the slot reports `OutOfRange`
//! (overwritten), anything older or mid-write reports `NotReady`.
//!
//! Blocking calls sleep on the flow `sync_counter` futex; wakeups are
//! edge-triggered and spurious wakes re-check visibility. Readers never retry
//! beyond their deadline — timeouts surface as `Error::Timeout`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mxl_core::{time, Error, FlowSnapshot, GrainSnapshot, Result, UNDEFINED_INDEX};
use uuid::Uuid;

use crate::flow::{DiscreteFlowData, FlowData};
use crate::sync::{self, WaitOutcome};

/// How long the callback watcher sleeps per wait slice; bounds its reaction
/// time to a dropped reader.
const WATCHER_SLICE: Duration = Duration::from_millis(100);

/// A committed grain as seen by a reader.
///
/// The payload borrows the shared mapping; it stays byte-stable only while
/// the grain remains inside the ring window. Copy it out before the writer
/// laps the ring if the window may be exceeded.
pub struct GrainView<'a> {
    pub info: GrainSnapshot,
    pub payload: &'a [u8],
}

/// Reader handle over a flow projection.
pub struct FlowReader {
    data: Arc<FlowData>,
    expected_id: Uuid,
    watcher: Option<Watcher>,
}

impl FlowReader {
    pub fn new(data: impl Into<FlowData>) -> Self {
        Self::from_shared(Arc::new(data.into()))
    }

    /// Wrap an already-shared projection (e.g. one also owned by a fabric
    /// target).
    pub fn from_shared(data: Arc<FlowData>) -> Self {
        let expected_id = data.id();
        Self {
            data,
            expected_id,
            watcher: None,
        }
    }

    pub fn flow(&self) -> &FlowData {
        &self.data
    }

    /// Snapshot of the flow header.
    pub fn flow_info(&self) -> FlowSnapshot {
        self.data.snapshot()
    }

    /// Non-blocking fetch of grain `index`.
    pub fn get_grain(&self, index: u64) -> Result<GrainView<'_>> {
        let discrete = self.discrete()?;
        self.check_attached()?;
        try_get(discrete, index).inspect(|_| self.touch_read_time())
    }

    /// Fetch grain `index`, waiting up to `timeout` for it to be committed.
    ///
    /// `None` waits forever; `Some(Duration::ZERO)` degenerates to
    /// [`get_grain`](Self::get_grain). Overwritten grains fail immediately
    /// with `OutOfRange`; an exhausted wait fails with `Timeout`.
    pub fn get_grain_blocking(
        &self,
        index: u64,
        timeout: Option<Duration>,
    ) -> Result<GrainView<'_>> {
        let discrete = self.discrete()?;
        let counter = discrete
            .info()
            .sync_counter()
            .ok_or(Error::UnsupportedFormat)?;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            self.check_attached()?;
            let seen = counter.load(Ordering::Acquire);
            match try_get(discrete, index) {
                Err(Error::NotReady) => {}
                other => {
                    if other.is_ok() {
                        self.touch_read_time();
                    }
                    return other;
                }
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            // Counter movement since `seen` (including between the load and
            // here) makes this return immediately; no wakeups can be lost.
            sync::wait_for_change(counter, seen, remaining);
        }
    }

    /// Block until the writer commits again, then return the newest
    /// committed grain.
    pub fn wait_for_new_grain(&self, timeout: Option<Duration>) -> Result<GrainView<'_>> {
        let discrete = self.discrete()?;
        let counter = discrete
            .info()
            .sync_counter()
            .ok_or(Error::UnsupportedFormat)?;
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut seen = counter.load(Ordering::Acquire);
        loop {
            self.check_attached()?;
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if sync::wait_for_change(counter, seen, remaining) == WaitOutcome::TimedOut {
                return Err(Error::Timeout);
            }
            seen = counter.load(Ordering::Acquire);

            // A counter bump with no fully committed grain yet (partial
            // write) re-arms the wait instead of waking the caller. A slot
            // recycled between the scan and the fetch re-arms it too.
            if let Some((slot, index)) = latest_committed(discrete) {
                if let Ok(view) = try_get_slot(discrete, slot, index) {
                    self.touch_read_time();
                    return Ok(view);
                }
            }
        }
    }

    /// Block until the flow commit counter changes; returns its new value.
    /// Works for both shapes; continuous consumers pair it with
    /// [`samples_head`](Self::samples_head).
    pub fn wait_for_commit(&self, timeout: Option<Duration>) -> Result<u64> {
        let counter = self
            .data
            .info()
            .sync_counter()
            .ok_or(Error::UnsupportedFormat)?;
        let seen = counter.load(Ordering::Acquire);
        match sync::wait_for_change(counter, seen, timeout) {
            WaitOutcome::Changed => Ok(counter.load(Ordering::Acquire)),
            WaitOutcome::TimedOut => Err(Error::Timeout),
        }
    }

    /// The continuous write head: absolute index just past the newest
    /// committed sample.
    pub fn samples_head(&self) -> Result<u64> {
        let continuous = self
            .data
            .as_continuous()
            .ok_or(Error::InvalidArg("not a continuous flow"))?;
        let info = continuous
            .info()
            .continuous()
            .ok_or(Error::UnsupportedFormat)?;
        Ok(info.head_index.load(Ordering::Acquire))
    }

    /// Byte view of a continuous channel ring.
    pub fn channel_slice(&self, channel: u64) -> Result<&[u8]> {
        let continuous = self
            .data
            .as_continuous()
            .ok_or(Error::InvalidArg("not a continuous flow"))?;
        continuous.channel_slice(channel)
    }

    /// Install a callback invoked from a watcher thread with the newest
    /// committed absolute index after each commit. Replaces any previous
    /// callback. The callback must not block; bursts of commits may be
    /// coalesced into one invocation carrying the newest index.
    pub fn set_completion_callback(
        &mut self,
        callback: impl Fn(u64) + Send + 'static,
    ) -> Result<()> {
        self.watcher = None; // stop and join any previous watcher first

        let data = Arc::clone(&self.data);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("mxl-commit-watch".into())
            .spawn(move || {
                let Some(discrete) = data.as_discrete() else {
                    return;
                };
                let Some(counter) = discrete.info().sync_counter() else {
                    return;
                };
                let mut seen = counter.load(Ordering::Acquire);
                let mut reported = latest_committed(discrete).map(|(_, index)| index);

                while !thread_stop.load(Ordering::Relaxed) {
                    if sync::wait_for_change(counter, seen, Some(WATCHER_SLICE))
                        == WaitOutcome::TimedOut
                    {
                        continue;
                    }
                    seen = counter.load(Ordering::Acquire);
                    if let Some((_, index)) = latest_committed(discrete) {
                        if reported != Some(index) {
                            reported = Some(index);
                            callback(index);
                        }
                    }
                }
            })
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn commit watcher");
                Error::Io(e)
            })?;

        self.watcher = Some(Watcher {
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    fn discrete(&self) -> Result<&DiscreteFlowData> {
        self.data
            .as_discrete()
            .ok_or(Error::InvalidArg("not a discrete flow"))
    }

    /// A flow whose header no longer carries our id has been deleted and
    /// replaced under the same name; the handle is dead.
    fn check_attached(&self) -> Result<()> {
        let current = self.data.id();
        if current != self.expected_id {
            tracing::error!(
                expected = %self.expected_id,
                found = %current,
                "flow header uuid changed; reader must detach"
            );
            return Err(Error::corrupt("flow replaced under reader"));
        }
        Ok(())
    }

    fn touch_read_time(&self) {
        if self.data.is_writable() {
            self.data
                .info()
                .common
                .last_read_time
                .store(time::now(), Ordering::Relaxed);
        }
    }
}

fn try_get(discrete: &DiscreteFlowData, index: u64) -> Result<GrainView<'_>> {
    if index == UNDEFINED_INDEX {
        return Err(Error::InvalidArg("undefined grain index"));
    }
    let count = discrete.grain_count();
    if count == 0 {
        return Err(Error::InvalidArg("flow has no grain slots"));
    }
    try_get_slot(discrete, (index % count) as usize, index)
}

fn try_get_slot(discrete: &DiscreteFlowData, slot: usize, index: u64) -> Result<GrainView<'_>> {
    let segment = discrete.grain(slot);
    let header = segment.header();

    let occupant = header.index.load(Ordering::Acquire);
    if occupant > index {
        return Err(Error::OutOfRange);
    }
    if occupant < index {
        return Err(Error::NotReady);
    }
    let committed = header.committed_size.load(Ordering::Acquire);
    if committed != header.grain_size {
        return Err(Error::NotReady);
    }

    Ok(GrainView {
        info: header.snapshot(),
        payload: &segment.payload()[..header.grain_size as usize],
    })
}

/// Scan the ring for the newest fully committed grain.
fn latest_committed(discrete: &DiscreteFlowData) -> Option<(usize, u64)> {
    let mut newest: Option<(usize, u64)> = None;
    for slot in 0..discrete.grain_count() as usize {
        let header = discrete.grain(slot).header();
        let index = header.index.load(Ordering::Acquire);
        let committed = header.committed_size.load(Ordering::Acquire);
        if committed != header.grain_size {
            continue;
        }
        // Slot 0 at index 0 is ambiguous with "never written"; a zero
        // timestamp disambiguates.
        if index == 0 && header.timestamp.load(Ordering::Relaxed) == 0 {
            continue;
        }
        if newest.map_or(true, |(_, best)| index > best) {
            newest = Some((slot, index));
        }
    }
    newest
}

struct Watcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
