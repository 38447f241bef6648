//! In-memory projections of a flow: the header segment plus its per-shape
//! resources. A projection exclusively owns its mappings; writers and readers
//! hold shared references to it and never outlive it.

use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64};

use mxl_core::{
    time, CommonFlowInfo, ContinuousFlowInfo, DataFormat, DiscreteFlowInfo, Error, FlowDetails,
    FlowInfo, FlowSnapshot, GrainInfo, Rational, Result, FLOW_INFO_SIZE, FLOW_INFO_VERSION,
    GRAIN_INFO_SIZE, GRAIN_INFO_VERSION,
};
use uuid::Uuid;

use crate::segment::{AccessMode, Segment};

fn open_flow_segment(path: &Path, mode: AccessMode) -> Result<Segment<FlowInfo>> {
    let segment = Segment::<FlowInfo>::open(path, mode)?;
    let info = segment.header();
    if info.version != FLOW_INFO_VERSION || info.size as usize != FLOW_INFO_SIZE {
        tracing::error!(
            path = %path.display(),
            version = info.version,
            size = info.size,
            "flow header version/size mismatch"
        );
        return Err(Error::corrupt("flow header version/size mismatch"));
    }
    Ok(segment)
}

/// A grain-indexed flow: the header segment plus one segment per grain slot.
pub struct DiscreteFlowData {
    flow: Segment<FlowInfo>,
    grains: Vec<Segment<GrainInfo>>,
    mode: AccessMode,
}

impl DiscreteFlowData {
    /// Create and initialize the header segment for a new discrete flow.
    pub(crate) fn create(
        path: &Path,
        id: Uuid,
        format: DataFormat,
        grain_rate: Rational,
        grain_count: u64,
    ) -> Result<Self> {
        let segment = Segment::<FlowInfo>::create(path, 0)?;
        let now = time::now();
        segment.init_header(FlowInfo {
            version: FLOW_INFO_VERSION,
            size: FLOW_INFO_SIZE as u32,
            common: CommonFlowInfo {
                id: *id.as_bytes(),
                format: format.as_raw(),
                _pad: 0,
                last_write_time: AtomicU64::new(now),
                last_read_time: AtomicU64::new(now),
            },
            details: FlowDetails {
                discrete: ManuallyDrop::new(DiscreteFlowInfo {
                    grain_rate,
                    grain_count,
                    sync_counter: AtomicU64::new(0),
                }),
            },
        });
        Ok(Self {
            flow: segment,
            grains: Vec::with_capacity(grain_count as usize),
            mode: AccessMode::CreateReadWrite,
        })
    }

    /// Map an existing discrete header segment. Grain slots are emplaced
    /// separately by the manager.
    pub(crate) fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let segment = open_flow_segment(path, mode)?;
        if !segment.header().format().is_discrete() {
            return Err(Error::UnsupportedFormat);
        }
        let grain_count = segment.header().discrete().map_or(0, |d| d.grain_count);
        Ok(Self {
            flow: segment,
            grains: Vec::with_capacity(grain_count as usize),
            mode,
        })
    }

    /// Attach the next grain slot.
    ///
    /// In create mode this allocates the slot file for `payload_size` bytes
    /// and initializes its header; in open mode it maps the existing file
    /// (`payload_size` is ignored, the size comes from the file) and checks
    /// that the recorded grain size matches the mapping.
    pub(crate) fn emplace_grain(&mut self, path: &Path, payload_size: usize) -> Result<()> {
        let segment = match self.mode {
            AccessMode::CreateReadWrite => {
                let segment = Segment::<GrainInfo>::create(path, payload_size)?;
                segment.init_header(GrainInfo {
                    version: GRAIN_INFO_VERSION,
                    size: GRAIN_INFO_SIZE as u32,
                    grain_size: payload_size as u64,
                    committed_size: AtomicU64::new(0),
                    device_index: -1,
                    flags: AtomicU32::new(0),
                    timestamp: AtomicU64::new(0),
                    index: AtomicU64::new(0),
                });
                segment
            }
            mode => {
                let segment = Segment::<GrainInfo>::open(path, mode)?;
                let recorded = segment.header().grain_size;
                if recorded as usize != segment.payload_len() {
                    tracing::error!(
                        path = %path.display(),
                        recorded,
                        mapped = segment.payload_len(),
                        "grain payload size mismatch"
                    );
                    return Err(Error::corrupt("grain payload size mismatch"));
                }
                segment
            }
        };
        self.grains.push(segment);
        Ok(())
    }

    pub fn info(&self) -> &FlowInfo {
        self.flow.header()
    }

    pub fn grain_count(&self) -> u64 {
        self.info().discrete().map_or(0, |d| d.grain_count)
    }

    pub fn grain_rate(&self) -> Rational {
        self.info()
            .discrete()
            .map_or(Rational::default(), |d| d.grain_rate)
    }

    /// The segment backing grain slot `slot`.
    pub fn grain(&self, slot: usize) -> &Segment<GrainInfo> {
        &self.grains[slot]
    }

    pub fn is_writable(&self) -> bool {
        self.flow.is_writable()
    }

    pub fn is_valid(&self) -> bool {
        self.info().version == FLOW_INFO_VERSION
            && self.info().format().is_discrete()
            && self.grains.len() as u64 == self.grain_count()
    }
}

/// A sample-indexed flow: the header segment plus one contiguous channel-data
/// segment laid out as `channel_count` planar rings of `buffer_length`
/// samples each.
pub struct ContinuousFlowData {
    flow: Segment<FlowInfo>,
    channels: Option<Segment<()>>,
    sample_word_size: usize,
    mode: AccessMode,
}

impl ContinuousFlowData {
    /// Create and initialize the header segment for a new continuous flow.
    pub(crate) fn create(
        path: &Path,
        id: Uuid,
        format: DataFormat,
        sample_rate: Rational,
        channel_count: u64,
        buffer_length: u64,
    ) -> Result<Self> {
        let segment = Segment::<FlowInfo>::create(path, 0)?;
        let now = time::now();
        segment.init_header(FlowInfo {
            version: FLOW_INFO_VERSION,
            size: FLOW_INFO_SIZE as u32,
            common: CommonFlowInfo {
                id: *id.as_bytes(),
                format: format.as_raw(),
                _pad: 0,
                last_write_time: AtomicU64::new(now),
                last_read_time: AtomicU64::new(now),
            },
            details: FlowDetails {
                continuous: ManuallyDrop::new(ContinuousFlowInfo {
                    sample_rate,
                    channel_count,
                    buffer_length,
                    head_index: AtomicU64::new(0),
                    sync_counter: AtomicU64::new(0),
                }),
            },
        });
        Ok(Self {
            flow: segment,
            channels: None,
            sample_word_size: 0,
            mode: AccessMode::CreateReadWrite,
        })
    }

    /// Map an existing continuous header segment.
    pub(crate) fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let segment = open_flow_segment(path, mode)?;
        if !segment.header().format().is_continuous() {
            return Err(Error::UnsupportedFormat);
        }
        Ok(Self {
            flow: segment,
            channels: None,
            sample_word_size: 0,
            mode,
        })
    }

    /// Attach the channel-data segment.
    ///
    /// In create mode `sample_word_size` sizes the new segment at
    /// `channel_count * buffer_length * sample_word_size` bytes; in open mode
    /// it is ignored and the word size is inferred from the file length.
    pub(crate) fn open_channel_buffers(
        &mut self,
        path: &Path,
        sample_word_size: usize,
    ) -> Result<()> {
        let samples = self.channel_data_length();
        if samples == 0 {
            return Err(Error::InvalidArg("continuous flow has no sample capacity"));
        }

        let segment = match self.mode {
            AccessMode::CreateReadWrite => {
                if sample_word_size == 0 {
                    return Err(Error::InvalidArg("sample word size must be non-zero"));
                }
                let bytes = samples
                    .checked_mul(sample_word_size as u64)
                    .ok_or(Error::InvalidArg("channel data size overflows"))?;
                self.sample_word_size = sample_word_size;
                Segment::<()>::create(path, bytes as usize)?
            }
            mode => {
                let segment = Segment::<()>::open(path, mode)?;
                let bytes = segment.payload_len() as u64;
                if bytes == 0 || bytes % samples != 0 {
                    tracing::error!(
                        path = %path.display(),
                        bytes,
                        samples,
                        "channel data length is not a whole number of sample words"
                    );
                    return Err(Error::corrupt("channel data size mismatch"));
                }
                self.sample_word_size = (bytes / samples) as usize;
                segment
            }
        };
        self.channels = Some(segment);
        Ok(())
    }

    pub fn info(&self) -> &FlowInfo {
        self.flow.header()
    }

    pub fn sample_rate(&self) -> Rational {
        self.info()
            .continuous()
            .map_or(Rational::default(), |c| c.sample_rate)
    }

    pub fn channel_count(&self) -> u64 {
        self.info().continuous().map_or(0, |c| c.channel_count)
    }

    /// Ring length in samples per channel.
    pub fn channel_buffer_length(&self) -> u64 {
        self.info().continuous().map_or(0, |c| c.buffer_length)
    }

    /// Total sample capacity across all channels.
    pub fn channel_data_length(&self) -> u64 {
        self.channel_count() * self.channel_buffer_length()
    }

    /// Total channel-data size in bytes.
    pub fn channel_data_size(&self) -> u64 {
        self.channel_data_length() * self.sample_word_size as u64
    }

    pub fn sample_word_size(&self) -> usize {
        self.sample_word_size
    }

    /// Byte view of channel `channel`'s sample ring.
    pub fn channel_slice(&self, channel: u64) -> Result<&[u8]> {
        if channel >= self.channel_count() {
            return Err(Error::InvalidArg("channel out of range"));
        }
        let channels = self
            .channels
            .as_ref()
            .ok_or(Error::InvalidArg("channel buffers not attached"))?;
        let stride = (self.channel_buffer_length() * self.sample_word_size as u64) as usize;
        let start = channel as usize * stride;
        Ok(&channels.payload()[start..start + stride])
    }

    /// Mutable byte view of channel `channel`'s sample ring. Writer-side only.
    #[allow(clippy::mut_from_ref)]
    pub fn channel_slice_mut(&self, channel: u64) -> Result<&mut [u8]> {
        if channel >= self.channel_count() {
            return Err(Error::InvalidArg("channel out of range"));
        }
        let channels = self
            .channels
            .as_ref()
            .ok_or(Error::InvalidArg("channel buffers not attached"))?;
        let stride = (self.channel_buffer_length() * self.sample_word_size as u64) as usize;
        let start = channel as usize * stride;
        Ok(&mut channels.payload_mut()[start..start + stride])
    }

    pub fn is_writable(&self) -> bool {
        self.flow.is_writable()
    }

    pub fn is_valid(&self) -> bool {
        self.info().version == FLOW_INFO_VERSION
            && self.info().format().is_continuous()
            && self.channels.is_some()
    }
}

/// A flow projection of either shape, discriminated by the on-disk format.
pub enum FlowData {
    Discrete(DiscreteFlowData),
    Continuous(ContinuousFlowData),
}

impl FlowData {
    pub fn info(&self) -> &FlowInfo {
        match self {
            FlowData::Discrete(d) => d.info(),
            FlowData::Continuous(c) => c.info(),
        }
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.info().snapshot()
    }

    pub fn id(&self) -> Uuid {
        self.info().id()
    }

    pub fn format(&self) -> DataFormat {
        self.info().format()
    }

    pub fn is_valid(&self) -> bool {
        match self {
            FlowData::Discrete(d) => d.is_valid(),
            FlowData::Continuous(c) => c.is_valid(),
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            FlowData::Discrete(d) => d.is_writable(),
            FlowData::Continuous(c) => c.is_writable(),
        }
    }

    pub fn as_discrete(&self) -> Option<&DiscreteFlowData> {
        match self {
            FlowData::Discrete(d) => Some(d),
            FlowData::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<&ContinuousFlowData> {
        match self {
            FlowData::Discrete(_) => None,
            FlowData::Continuous(c) => Some(c),
        }
    }
}

impl From<DiscreteFlowData> for FlowData {
    fn from(data: DiscreteFlowData) -> Self {
        FlowData::Discrete(data)
    }
}

impl From<ContinuousFlowData> for FlowData {
    fn from(data: ContinuousFlowData) -> Self {
        FlowData::Continuous(data)
    }
}
