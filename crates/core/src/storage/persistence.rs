//! Disk snapshots of the whole engine state using bincode serialization.
//!
//! Writes use atomic temp-file + rename to prevent corruption on crash.
//! A CRC32 checksum is appended as an 8-byte footer for integrity verification.

use crate::config::SNAPSHOT_FILE_NAME;
use crate::error::{Error, Result};
use crate::storage::engine::EngineState;
use std::fs;
use std::path::Path;

/// Magic bytes appended before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"VPS1";

/// Save the engine state to `dir` with an atomic write.
/// Appends a CRC32 checksum footer: [magic "VPS1"][u32 CRC32 BE].
pub fn save_snapshot(state: &EngineState, dir: &Path) -> Result<()> {
    let bytes = bincode::serialize(state)?;
    let crc = crc32fast::hash(&bytes);

    let path = dir.join(SNAPSHOT_FILE_NAME);
    let tmp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE_NAME));

    // Write: [bincode payload][magic 4 bytes][CRC32 4 bytes BE]
    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    fs::write(&tmp_path, &output)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::File::open(&tmp_path)?.sync_all()?;
    fs::rename(&tmp_path, &path)?;

    tracing::info!(
        "Saved snapshot at txn {} ({} bytes, CRC32={:#010x})",
        state.last_txn,
        bytes.len(),
        crc
    );
    Ok(())
}

/// Load the snapshot from `dir`, verifying its CRC32 footer.
///
/// Returns `None` when no snapshot has been written yet.
pub fn load_snapshot(dir: &Path) -> Result<Option<EngineState>> {
    let path = dir.join(SNAPSHOT_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(&path)?;

    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(Error::Corrupt(format!(
            "snapshot {:?} has no checksum footer",
            path
        )));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::Corrupt(format!(
            "snapshot CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {:?}",
            stored_crc, computed_crc, path
        )));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored_crc);

    let state: EngineState = bincode::deserialize(payload)
        .map_err(|e| Error::Corrupt(format!("snapshot does not decode: {}", e)))?;

    tracing::info!(
        "Loaded snapshot at txn {} ({} buckets)",
        state.last_txn,
        state.buckets.len()
    );
    Ok(Some(state))
}
