//! Flow lifecycle under a domain directory: atomic create/publish, open,
//! list, delete.
//!
//! Creation happens inside a hidden staging directory which is renamed to its
//! final `<uuid>.mxl-flow` name in one step; the rename is the sole
//! observability boundary, so concurrent readers only ever see published
//! flows. Any failure mid-build rolls the staging directory back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mxl_core::{DataFormat, Error, Rational, Result};
use uuid::Uuid;

use crate::flow::{ContinuousFlowData, DiscreteFlowData, FlowData};
use crate::paths;
use crate::segment::AccessMode;

/// Manages the flows of one domain directory.
pub struct FlowManager {
    domain: PathBuf,
}

impl FlowManager {
    /// Bind to an existing, canonicalizable domain directory.
    pub fn new(domain: impl AsRef<Path>) -> Result<Self> {
        let domain = domain.as_ref();
        if !domain.is_dir() {
            tracing::error!(domain = %domain.display(), "domain does not exist or is not a directory");
            return Err(Error::NotFound);
        }
        let domain = domain.canonicalize().map_err(|e| {
            tracing::error!(domain = %domain.display(), error = %e, "could not canonicalize domain");
            Error::Io(e)
        })?;
        Ok(Self { domain })
    }

    pub fn domain(&self) -> &Path {
        &self.domain
    }

    /// Create and publish a discrete flow of `grain_count` slots carrying
    /// `grain_payload_size`-byte payloads at `grain_rate`.
    pub fn create_discrete_flow(
        &self,
        id: Uuid,
        descriptor: &str,
        format: DataFormat,
        grain_count: u64,
        grain_rate: Rational,
        grain_payload_size: usize,
    ) -> Result<DiscreteFlowData> {
        tracing::debug!(
            %id,
            grain_count,
            grain_payload_size,
            rate = %grain_rate,
            "create discrete flow"
        );

        let format = format.sanitized();
        if !format.is_discrete() {
            tracing::error!(%id, %format, "attempt to create discrete flow with non-discrete format");
            return Err(Error::UnsupportedFormat);
        }
        if grain_count == 0 {
            return Err(Error::InvalidArg("grain count must be non-zero"));
        }
        self.ensure_unpublished(&id)?;

        let staging = paths::create_staging_directory(&self.domain).map_err(|e| {
            tracing::error!(domain = %self.domain.display(), error = %e, "staging directory creation failed");
            Error::Io(e)
        })?;

        let built = (|| -> Result<DiscreteFlowData> {
            write_descriptor(&staging, descriptor)?;
            touch_access_file(&staging)?;

            let mut data = DiscreteFlowData::create(
                &paths::data_file(&staging),
                id,
                format,
                grain_rate,
                grain_count,
            )?;

            let grain_dir = paths::grain_directory(&staging);
            fs::create_dir(&grain_dir).map_err(|e| {
                tracing::error!(dir = %grain_dir.display(), error = %e, "could not create grain directory");
                Error::Io(e)
            })?;
            for slot in 0..grain_count {
                let grain_path = paths::grain_file(&grain_dir, slot);
                tracing::trace!(path = %grain_path.display(), "creating grain");
                data.emplace_grain(&grain_path, grain_payload_size)?;
            }

            self.publish(&staging, &id)?;
            Ok(data)
        })();

        match built {
            Ok(data) => Ok(data),
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    /// Create and publish a continuous flow of `channel_count` channels with
    /// `buffer_length` samples of `sample_word_size` bytes each per channel.
    #[allow(clippy::too_many_arguments)]
    pub fn create_continuous_flow(
        &self,
        id: Uuid,
        descriptor: &str,
        format: DataFormat,
        sample_rate: Rational,
        channel_count: u64,
        sample_word_size: usize,
        buffer_length: u64,
    ) -> Result<ContinuousFlowData> {
        tracing::debug!(
            %id,
            channel_count,
            sample_word_size,
            buffer_length,
            rate = %sample_rate,
            "create continuous flow"
        );

        let format = format.sanitized();
        if !format.is_continuous() {
            tracing::error!(%id, %format, "attempt to create continuous flow with non-continuous format");
            return Err(Error::UnsupportedFormat);
        }
        if channel_count == 0 || buffer_length == 0 {
            return Err(Error::InvalidArg("channel count and buffer length must be non-zero"));
        }
        self.ensure_unpublished(&id)?;

        let staging = paths::create_staging_directory(&self.domain).map_err(|e| {
            tracing::error!(domain = %self.domain.display(), error = %e, "staging directory creation failed");
            Error::Io(e)
        })?;

        let built = (|| -> Result<ContinuousFlowData> {
            write_descriptor(&staging, descriptor)?;
            touch_access_file(&staging)?;

            let mut data = ContinuousFlowData::create(
                &paths::data_file(&staging),
                id,
                format,
                sample_rate,
                channel_count,
                buffer_length,
            )?;
            data.open_channel_buffers(&paths::channel_data_file(&staging), sample_word_size)?;

            self.publish(&staging, &id)?;
            Ok(data)
        })();

        match built {
            Ok(data) => Ok(data),
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    /// Open a published flow of either shape.
    ///
    /// `CreateReadWrite` is not an open mode and is rejected.
    pub fn open_flow(&self, id: Uuid, mode: AccessMode) -> Result<FlowData> {
        if mode == AccessMode::CreateReadWrite {
            tracing::error!(%id, "attempt to open flow with create mode");
            return Err(Error::InvalidArg("open requires an open mode"));
        }

        let flow_dir = paths::flow_directory(&self.domain, &id);
        let data_file = paths::data_file(&flow_dir);
        if !data_file.is_file() {
            tracing::error!(%id, path = %data_file.display(), "flow data file not found");
            return Err(Error::NotFound);
        }

        // Peek at the header to pick the shape, then build the projection.
        let peeked = crate::segment::Segment::<mxl_core::FlowInfo>::open(&data_file, AccessMode::OpenReadOnly)?;
        let format = peeked.header().format();
        drop(peeked);

        let data = if format.is_discrete() {
            let mut data = DiscreteFlowData::open(&data_file, mode)?;
            let grain_dir = paths::grain_directory(&flow_dir);
            if !grain_dir.is_dir() {
                tracing::error!(%id, dir = %grain_dir.display(), "grain directory not found");
                return Err(Error::NotFound);
            }
            for slot in 0..data.grain_count() {
                let grain_path = paths::grain_file(&grain_dir, slot);
                tracing::trace!(path = %grain_path.display(), "opening grain");
                data.emplace_grain(&grain_path, 0).map_err(|e| {
                    tracing::error!(%id, slot, error = %e, "failed to open grain slot");
                    e
                })?;
            }
            FlowData::Discrete(data)
        } else if format.is_continuous() {
            let mut data = ContinuousFlowData::open(&data_file, mode)?;
            let channel_path = paths::channel_data_file(&flow_dir);
            if !channel_path.is_file() {
                tracing::error!(%id, path = %channel_path.display(), "channel data file not found");
                return Err(Error::NotFound);
            }
            data.open_channel_buffers(&channel_path, 0)?;
            FlowData::Continuous(data)
        } else {
            tracing::error!(%id, "flow header carries an unsupported format");
            return Err(Error::UnsupportedFormat);
        };

        // The id baked into the header must match the directory we resolved.
        if data.id() != id {
            tracing::error!(%id, header_id = %data.id(), "flow header uuid does not match directory");
            return Err(Error::corrupt("flow header uuid mismatch"));
        }

        Ok(data)
    }

    /// Recursively delete a flow directory. Never fails: absent flows and
    /// filesystem errors both report `false` (the latter with a log line).
    pub fn delete_flow(&self, id: Uuid) -> bool {
        tracing::trace!(%id, "delete flow");
        let flow_dir = paths::flow_directory(&self.domain, &id);
        match fs::remove_dir_all(&flow_dir) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(%id, "flow not found or already deleted");
                false
            }
            Err(e) => {
                tracing::error!(%id, path = %flow_dir.display(), error = %e, "error deleting flow");
                false
            }
        }
    }

    /// Drop a projection, then delete its flow directory.
    pub fn delete_flow_data(&self, data: FlowData) -> bool {
        let id = data.id();
        drop(data);
        self.delete_flow(id)
    }

    /// Ids of every currently published flow.
    ///
    /// Entries that are not directories or do not parse as
    /// `<uuid>.mxl-flow` are skipped; a missing domain is an error.
    pub fn list_flows(&self) -> Result<Vec<Uuid>> {
        let entries = fs::read_dir(&self.domain).map_err(|e| {
            tracing::error!(domain = %self.domain.display(), error = %e, "domain not readable");
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::Io(e)
            }
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                tracing::error!(domain = %self.domain.display(), error = %e, "failed to iterate domain");
                Error::Io(e)
            })?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(paths::parse_flow_directory_name)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Reclaim abandoned flow directories.
    ///
    /// TODO: decide the reclaim policy (access-file mtime plus a grace
    /// period) and run it from a low-priority thread.
    pub fn garbage_collect(&self) {
        tracing::warn!("garbage collection of flows not implemented yet");
    }

    /// Fail fast when the final directory already exists. The publish rename
    /// double-checks this, but the pre-check gives a clean status without
    /// building the whole staging tree first.
    fn ensure_unpublished(&self, id: &Uuid) -> Result<()> {
        if paths::flow_directory(&self.domain, id).exists() {
            tracing::error!(%id, "flow already exists");
            return Err(Error::AlreadyExists);
        }
        Ok(())
    }

    /// Make the staging directory world-traversable and atomically rename it
    /// to its final name.
    fn publish(&self, staging: &Path, id: &Uuid) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging, fs::Permissions::from_mode(0o755)).map_err(|e| {
                tracing::error!(path = %staging.display(), error = %e, "chmod of staging directory failed");
                Error::Io(e)
            })?;
        }

        let final_dir = paths::flow_directory(&self.domain, id);
        fs::rename(staging, &final_dir).map_err(|e| {
            tracing::error!(
                from = %staging.display(),
                to = %final_dir.display(),
                error = %e,
                "failed to publish flow directory"
            );
            match e.kind() {
                io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty => {
                    Error::AlreadyExists
                }
                _ => Error::Io(e),
            }
        })
    }
}

fn write_descriptor(flow_dir: &Path, descriptor: &str) -> Result<()> {
    let path = paths::descriptor_file(flow_dir);
    fs::write(&path, descriptor).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to write flow descriptor");
        Error::Io(e)
    })
}

fn touch_access_file(flow_dir: &Path) -> Result<()> {
    let path = paths::access_file(flow_dir);
    fs::File::create(&path).map(drop).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to create flow access file");
        Error::Io(e)
    })
}
