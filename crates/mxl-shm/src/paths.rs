//! Naming conventions inside a domain directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Suffix of every published flow directory.
pub const FLOW_DIRECTORY_SUFFIX: &str = ".mxl-flow";

/// File holding the opaque flow descriptor, byte for byte.
pub const DESCRIPTOR_FILE: &str = "descriptor.json";
/// Zero-length liveness/access marker.
pub const ACCESS_FILE: &str = "access";
/// The `FlowInfo` shared-memory segment.
pub const DATA_FILE: &str = "data";
/// Directory of grain slot files (discrete flows).
pub const GRAIN_DIRECTORY: &str = "grains";
/// The channel sample ring (continuous flows).
pub const CHANNEL_DATA_FILE: &str = "channels";

const STAGING_PREFIX: &str = ".mxl-tmp-";
const STAGING_RANDOM_LEN: usize = 16;
const STAGING_ATTEMPTS: usize = 16;

/// `<domain>/<uuid>.mxl-flow`
pub fn flow_directory(domain: &Path, id: &Uuid) -> PathBuf {
    domain.join(format!("{id}{FLOW_DIRECTORY_SUFFIX}"))
}

pub fn descriptor_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(DESCRIPTOR_FILE)
}

pub fn access_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(ACCESS_FILE)
}

pub fn data_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(DATA_FILE)
}

pub fn grain_directory(flow_dir: &Path) -> PathBuf {
    flow_dir.join(GRAIN_DIRECTORY)
}

/// Grain slot files are named by their slot index.
pub fn grain_file(grain_dir: &Path, slot: u64) -> PathBuf {
    grain_dir.join(slot.to_string())
}

pub fn channel_data_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(CHANNEL_DATA_FILE)
}

/// Parse a directory entry name back into a flow id.
///
/// Only names of the exact form `<canonical-uuid>.mxl-flow` qualify; staging
/// directories and stray entries fall out here.
pub fn parse_flow_directory_name(name: &str) -> Option<Uuid> {
    let stem = name.strip_suffix(FLOW_DIRECTORY_SUFFIX)?;
    Uuid::try_parse(stem).ok()
}

/// Create a hidden staging directory under `domain`.
///
/// The `.mxl-tmp-` prefix can never collide with a published flow name, and
/// the random suffix is retried on the (unlikely) existing-name collision,
/// mkstemp-style.
pub fn create_staging_directory(domain: &Path) -> io::Result<PathBuf> {
    for _ in 0..STAGING_ATTEMPTS {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STAGING_RANDOM_LEN)
            .map(char::from)
            .collect();
        let candidate = domain.join(format!("{STAGING_PREFIX}{suffix}"));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "could not create a unique staging directory",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_directory_name_round_trip() {
        let id = Uuid::try_parse("5fbec3b1-1b0f-417d-9059-8b94a47197ed").unwrap();
        let dir = flow_directory(Path::new("/dev/shm/domain"), &id);
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "5fbec3b1-1b0f-417d-9059-8b94a47197ed.mxl-flow");
        assert_eq!(parse_flow_directory_name(name), Some(id));
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert_eq!(parse_flow_directory_name("not-a-valid-uuid.mxl-flow"), None);
        assert_eq!(parse_flow_directory_name("5fbec3b1-1b0f-417d-9059-8b94a47197ed"), None);
        assert_eq!(parse_flow_directory_name(".mxl-tmp-abcdefgh12345678"), None);
        assert_eq!(parse_flow_directory_name(""), None);
    }

    #[test]
    fn staging_directories_are_unique_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let a = create_staging_directory(dir.path()).unwrap();
        let b = create_staging_directory(dir.path()).unwrap();
        assert_ne!(a, b);

        for staged in [&a, &b] {
            let name = staged.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with(STAGING_PREFIX));
            assert_eq!(name.len(), STAGING_PREFIX.len() + STAGING_RANDOM_LEN);
            assert!(staged.is_dir());
            assert_eq!(parse_flow_directory_name(name), None);
        }
    }
}
