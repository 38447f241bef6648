//! On-disk header layouts shared between processes.
//!
//! These structures live at the start of file-backed shared-memory segments
//! and are therefore `#[repr(C)]` with explicit padding and fixed sizes,
//! checked at compile time. One writer and any number of readers in other
//! processes observe them concurrently, so every field that changes after
//! creation is an atomic; create-time fields are plain integers.
//!
//! ```text
//! data file                       grains/<i> file
//! ┌─────────────────────────┐     ┌─────────────────────────┐
//! │ FlowInfo                │     │ GrainInfo               │
//! │  ├─ version, size       │     │  ├─ version, size       │
//! │  ├─ common (id, format, │     │  ├─ grain_size          │
//! │  │   access times)      │     │  ├─ committed_size      │
//! │  └─ discrete|continuous │     │  └─ timestamp, index    │
//! └─────────────────────────┘     ├─────────────────────────┤
//!                                 │ payload (grain_size)    │
//!                                 └─────────────────────────┘
//! ```
//!
//! [`FlowSnapshot`] and [`GrainSnapshot`] are the plain-data projections
//! handed to callers; the shared structs themselves never leave the mapping.

use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use uuid::Uuid;

use crate::format::DataFormat;
use crate::rational::Rational;

/// Current flow header version.
pub const FLOW_INFO_VERSION: u32 = 1;
/// Current grain header version.
pub const GRAIN_INFO_VERSION: u32 = 1;

/// Size in bytes of [`FlowInfo`] as stored on disk.
pub const FLOW_INFO_SIZE: usize = 88;
/// Size in bytes of [`GrainInfo`] as stored on disk.
pub const GRAIN_INFO_SIZE: usize = 48;

/// Fields common to both flow shapes.
#[repr(C)]
pub struct CommonFlowInfo {
    /// Flow UUID; must equal the UUID in the directory name.
    pub id: [u8; 16],
    /// Raw [`DataFormat`] discriminant.
    pub format: u32,
    pub _pad: u32,
    /// TAI nanoseconds of the last commit.
    pub last_write_time: AtomicU64,
    /// Advisory TAI nanoseconds of the last read; updated by readers without
    /// mutual exclusion.
    pub last_read_time: AtomicU64,
}

/// Variant payload for grain-indexed flows.
#[repr(C)]
pub struct DiscreteFlowInfo {
    pub grain_rate: Rational,
    /// Number of grain slots in the ring.
    pub grain_count: u64,
    /// Monotonic commit counter; the cross-process wake word.
    pub sync_counter: AtomicU64,
}

/// Variant payload for sample-indexed flows.
#[repr(C)]
pub struct ContinuousFlowInfo {
    pub sample_rate: Rational,
    pub channel_count: u64,
    /// Ring length in samples per channel.
    pub buffer_length: u64,
    /// Absolute index just past the newest committed sample.
    pub head_index: AtomicU64,
    /// Monotonic commit counter; the cross-process wake word.
    pub sync_counter: AtomicU64,
}

/// The variant union, discriminated by `CommonFlowInfo::format`.
///
/// Fields are `ManuallyDrop` only because the variants hold atomics; nothing
/// here owns resources, so no drop logic is ever needed.
#[repr(C)]
pub union FlowDetails {
    pub discrete: ManuallyDrop<DiscreteFlowInfo>,
    pub continuous: ManuallyDrop<ContinuousFlowInfo>,
}

/// The flow header at the start of every `data` segment.
#[repr(C)]
pub struct FlowInfo {
    pub version: u32,
    /// Self-describing header size for forward compatibility.
    pub size: u32,
    pub common: CommonFlowInfo,
    pub details: FlowDetails,
}

const _: () = assert!(mem::size_of::<FlowInfo>() == FLOW_INFO_SIZE);
const _: () = assert!(mem::size_of::<GrainInfo>() == GRAIN_INFO_SIZE);
const _: () = assert!(mem::align_of::<FlowInfo>() == 8);

impl FlowInfo {
    pub fn format(&self) -> DataFormat {
        DataFormat::from_raw(self.common.format)
    }

    pub fn id(&self) -> Uuid {
        Uuid::from_bytes(self.common.id)
    }

    /// The discrete variant, when the format says there is one.
    pub fn discrete(&self) -> Option<&DiscreteFlowInfo> {
        if self.format().is_discrete() {
            // SAFETY: format discriminates the union.
            Some(unsafe { &self.details.discrete })
        } else {
            None
        }
    }

    /// The continuous variant, when the format says there is one.
    pub fn continuous(&self) -> Option<&ContinuousFlowInfo> {
        if self.format().is_continuous() {
            // SAFETY: format discriminates the union.
            Some(unsafe { &self.details.continuous })
        } else {
            None
        }
    }

    /// The commit counter for either variant; `None` for unspecified formats.
    pub fn sync_counter(&self) -> Option<&AtomicU64> {
        if let Some(d) = self.discrete() {
            Some(&d.sync_counter)
        } else {
            self.continuous().map(|c| &c.sync_counter)
        }
    }

    /// Plain-data snapshot of the header.
    pub fn snapshot(&self) -> FlowSnapshot {
        let shape = if let Some(d) = self.discrete() {
            FlowShape::Discrete {
                grain_rate: d.grain_rate,
                grain_count: d.grain_count,
                sync_counter: d.sync_counter.load(Ordering::Acquire),
            }
        } else if let Some(c) = self.continuous() {
            FlowShape::Continuous {
                sample_rate: c.sample_rate,
                channel_count: c.channel_count,
                buffer_length: c.buffer_length,
                head_index: c.head_index.load(Ordering::Acquire),
                sync_counter: c.sync_counter.load(Ordering::Acquire),
            }
        } else {
            FlowShape::Unspecified
        };
        FlowSnapshot {
            version: self.version,
            size: self.size,
            id: self.id(),
            format: self.format(),
            last_write_time: self.common.last_write_time.load(Ordering::Relaxed),
            last_read_time: self.common.last_read_time.load(Ordering::Relaxed),
            shape,
        }
    }
}

impl fmt::Debug for FlowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Caller-facing copy of a [`FlowInfo`].
#[derive(Clone, Copy, Debug)]
pub struct FlowSnapshot {
    pub version: u32,
    pub size: u32,
    pub id: Uuid,
    pub format: DataFormat,
    pub last_write_time: u64,
    pub last_read_time: u64,
    pub shape: FlowShape,
}

/// The shape-specific half of a [`FlowSnapshot`].
#[derive(Clone, Copy, Debug)]
pub enum FlowShape {
    Unspecified,
    Discrete {
        grain_rate: Rational,
        grain_count: u64,
        sync_counter: u64,
    },
    Continuous {
        sample_rate: Rational,
        channel_count: u64,
        buffer_length: u64,
        head_index: u64,
        sync_counter: u64,
    },
}

impl FlowSnapshot {
    pub fn grain_count(&self) -> Option<u64> {
        match self.shape {
            FlowShape::Discrete { grain_count, .. } => Some(grain_count),
            _ => None,
        }
    }

    pub fn sync_counter(&self) -> Option<u64> {
        match self.shape {
            FlowShape::Discrete { sync_counter, .. }
            | FlowShape::Continuous { sync_counter, .. } => Some(sync_counter),
            FlowShape::Unspecified => None,
        }
    }
}

/// The grain header at the start of every `grains/<i>` slot file; followed by
/// `grain_size` payload bytes.
#[repr(C)]
pub struct GrainInfo {
    pub version: u32,
    pub size: u32,
    /// Full payload size of the slot; fixed at creation.
    pub grain_size: u64,
    /// Bytes committed so far; the grain is visible iff this equals
    /// `grain_size` (and `index` matches the reader's expectation).
    pub committed_size: AtomicU64,
    /// Device index for device-resident payloads; `-1` for host memory.
    pub device_index: i32,
    pub flags: AtomicU32,
    /// TAI nanoseconds assigned when the grain was opened.
    pub timestamp: AtomicU64,
    /// Absolute grain index currently occupying this slot.
    pub index: AtomicU64,
}

impl GrainInfo {
    /// Plain-data snapshot. `committed_size` is loaded with acquire ordering
    /// so a committed snapshot happens-after the payload writes it covers.
    pub fn snapshot(&self) -> GrainSnapshot {
        GrainSnapshot {
            version: self.version,
            size: self.size,
            grain_size: self.grain_size,
            committed_size: self.committed_size.load(Ordering::Acquire),
            device_index: self.device_index,
            flags: self.flags.load(Ordering::Relaxed),
            timestamp: self.timestamp.load(Ordering::Relaxed),
            index: self.index.load(Ordering::Relaxed),
        }
    }
}

/// Caller-facing copy of a [`GrainInfo`]; also the unit carried by the
/// fabric wire protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrainSnapshot {
    pub version: u32,
    pub size: u32,
    pub grain_size: u64,
    pub committed_size: u64,
    pub device_index: i32,
    pub flags: u32,
    pub timestamp: u64,
    pub index: u64,
}

impl GrainSnapshot {
    /// True when the snapshot captured a fully committed grain.
    pub fn is_committed(&self) -> bool {
        self.committed_size == self.grain_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_header(id: Uuid) -> FlowInfo {
        FlowInfo {
            version: FLOW_INFO_VERSION,
            size: FLOW_INFO_SIZE as u32,
            common: CommonFlowInfo {
                id: *id.as_bytes(),
                format: DataFormat::Video.as_raw(),
                _pad: 0,
                last_write_time: AtomicU64::new(0),
                last_read_time: AtomicU64::new(0),
            },
            details: FlowDetails {
                discrete: ManuallyDrop::new(DiscreteFlowInfo {
                    grain_rate: Rational::new(60_000, 1001),
                    grain_count: 5,
                    sync_counter: AtomicU64::new(0),
                }),
            },
        }
    }

    #[test]
    fn variant_access_follows_format() {
        let id = Uuid::new_v4();
        let info = video_header(id);

        assert_eq!(info.id(), id);
        assert_eq!(info.format(), DataFormat::Video);
        assert_eq!(info.discrete().unwrap().grain_count, 5);
        assert!(info.continuous().is_none());
    }

    #[test]
    fn sync_counter_tracks_variant() {
        let info = video_header(Uuid::new_v4());
        let counter = info.sync_counter().unwrap();
        assert_eq!(counter.load(Ordering::Acquire), 0);
        counter.fetch_add(3, Ordering::Release);
        assert_eq!(info.snapshot().sync_counter(), Some(3));
    }

    #[test]
    fn unspecified_has_no_counter() {
        let mut info = video_header(Uuid::new_v4());
        info.common.format = DataFormat::Unspecified.as_raw();
        assert!(info.sync_counter().is_none());
        assert!(info.snapshot().sync_counter().is_none());
    }

    #[test]
    fn snapshot_projects_discrete_fields() {
        let info = video_header(Uuid::new_v4());
        let snap = info.snapshot();
        assert_eq!(snap.grain_count(), Some(5));
        match snap.shape {
            FlowShape::Discrete { grain_rate, .. } => {
                assert_eq!(grain_rate, Rational::new(60_000, 1001));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn grain_commit_visibility() {
        let grain = GrainInfo {
            version: GRAIN_INFO_VERSION,
            size: GRAIN_INFO_SIZE as u32,
            grain_size: 1024,
            committed_size: AtomicU64::new(0),
            device_index: -1,
            flags: AtomicU32::new(0),
            timestamp: AtomicU64::new(0),
            index: AtomicU64::new(0),
        };
        assert!(!grain.snapshot().is_committed());
        grain.committed_size.store(1024, Ordering::Release);
        assert!(grain.snapshot().is_committed());
    }
}
