use crate::profile_scope;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::fs;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::error::ArchiveError;
use crate::simulation::HistoryArchive;

/// Write a history archive as gzip-compressed bincode. The file is written
/// next to `path` first and renamed over it once complete.
pub fn save_history<P: AsRef<Path>>(path: P, archive: &HistoryArchive) -> Result<(), ArchiveError> {
    profile_scope!("save_history");
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension({
        let mut os = path.extension().map(|e| e.to_os_string()).unwrap_or_default();
        os.push(".tmp");
        os
    });
    {
        let file = fs::File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        bincode::serialize_into(&mut encoder, archive)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), entries = archive.capacity, "history saved");
    Ok(())
}

/// Read an archive written by [`save_history`]. Uncompressed bincode is
/// accepted too.
pub fn load_history<P: AsRef<Path>>(path: P) -> Result<HistoryArchive, ArchiveError> {
    profile_scope!("load_history");
    let data = fs::read(path.as_ref())?;
    let archive = match maybe_decompress_gzip(&data)? {
        Some(decoded) => bincode::deserialize(&decoded)?,
        None => bincode::deserialize(&data)?,
    };
    Ok(archive)
}

fn maybe_decompress_gzip(data: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    if data.len() < 2 || data[0] != 0x1f || data[1] != 0x8b {
        return Ok(None);
    }

    let mut decoder = GzDecoder::new(Cursor::new(data));
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(Some(decoded))
}
