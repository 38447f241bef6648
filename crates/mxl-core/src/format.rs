//! Flow data formats.

use std::fmt;

/// The media shape carried by a flow.
///
/// Stored as a raw `u32` in the shared flow header; unknown on-disk values
/// decode as [`DataFormat::Unspecified`], which is neither discrete nor
/// continuous and therefore unopenable.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Unspecified = 0,
    /// Grain-indexed video frames.
    Video = 1,
    /// Channelized audio samples.
    Audio = 2,
    /// Grain-indexed opaque data (e.g. ancillary packets).
    Data = 3,
}

impl DataFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => DataFormat::Video,
            2 => DataFormat::Audio,
            3 => DataFormat::Data,
            _ => DataFormat::Unspecified,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, DataFormat::Unspecified)
    }

    /// Discrete flows are grain rings.
    pub fn is_discrete(self) -> bool {
        matches!(self, DataFormat::Video | DataFormat::Data)
    }

    /// Continuous flows are channelized sample rings.
    pub fn is_continuous(self) -> bool {
        matches!(self, DataFormat::Audio)
    }

    /// Map unsupported formats to [`DataFormat::Unspecified`] so that later
    /// shape checks reject them uniformly.
    pub fn sanitized(self) -> Self {
        if self.is_supported() {
            self
        } else {
            DataFormat::Unspecified
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Unspecified => "unspecified",
            DataFormat::Video => "video",
            DataFormat::Audio => "audio",
            DataFormat::Data => "data",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        for format in [
            DataFormat::Unspecified,
            DataFormat::Video,
            DataFormat::Audio,
            DataFormat::Data,
        ] {
            assert_eq!(DataFormat::from_raw(format.as_raw()), format);
        }
        assert_eq!(DataFormat::from_raw(0xdead_beef), DataFormat::Unspecified);
    }

    #[test]
    fn shape_split_is_exclusive() {
        for raw in 0..8u32 {
            let format = DataFormat::from_raw(raw);
            assert!(!(format.is_discrete() && format.is_continuous()));
            if format.is_supported() {
                assert!(format.is_discrete() || format.is_continuous());
            }
        }
    }

    #[test]
    fn sanitize_folds_unsupported() {
        assert_eq!(DataFormat::Video.sanitized(), DataFormat::Video);
        assert_eq!(DataFormat::Unspecified.sanitized(), DataFormat::Unspecified);
    }
}
