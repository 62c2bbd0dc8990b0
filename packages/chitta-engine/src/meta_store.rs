//! Shared framing for the small meta-store files.
//!
//! Every meta-store is `[4-byte ASCII magic][u32 version][u64 count]`
//! followed by `count` length-prefixed bincode records. Saves are
//! atomic: write to a temp file, fsync, rename over the target.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub fn save_records<T: Serialize>(
    path: &Path,
    magic: &[u8; 4],
    version: u32,
    records: &[T],
) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(magic)?;
        tmp.write_all(&version.to_le_bytes())?;
        tmp.write_all(&(records.len() as u64).to_le_bytes())?;
        for record in records {
            let body = bincode::serialize(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            tmp.write_all(&(body.len() as u32).to_le_bytes())?;
            tmp.write_all(&body)?;
        }
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a meta-store. A missing file yields `None`; a corrupt one is
/// logged and also yields `None` so the owner starts empty.
pub fn load_records<T: DeserializeOwned>(
    path: &Path,
    magic: &[u8; 4],
    max_version: u32,
) -> Result<Option<(u32, Vec<T>)>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = File::open(path)?;
    let mut header = [0u8; 16];
    if file.read_exact(&mut header).is_err() {
        log::warn!("meta-store {} truncated header; starting empty", path.display());
        return Ok(None);
    }
    if &header[..4] != magic {
        log::warn!("meta-store {} has wrong magic; starting empty", path.display());
        return Ok(None);
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version == 0 || version > max_version {
        log::warn!(
            "meta-store {} has unsupported version {version}; starting empty",
            path.display()
        );
        return Ok(None);
    }
    let count = u64::from_le_bytes([
        header[8], header[9], header[10], header[11], header[12], header[13], header[14],
        header[15],
    ]);
    if count > 100_000_000 {
        log::warn!("meta-store {} has implausible count; starting empty", path.display());
        return Ok(None);
    }

    let mut records = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let mut len_bytes = [0u8; 4];
        if file.read_exact(&mut len_bytes).is_err() {
            log::warn!("meta-store {} truncated mid-record; keeping prefix", path.display());
            break;
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > 16 * 1024 * 1024 {
            log::warn!("meta-store {} has oversized record; keeping prefix", path.display());
            break;
        }
        let mut body = vec![0u8; len];
        if file.read_exact(&mut body).is_err() {
            break;
        }
        match bincode::deserialize(&body) {
            Ok(record) => records.push(record),
            Err(_) => {
                log::warn!("meta-store {} has undecodable record; keeping prefix", path.display());
                break;
            }
        }
    }
    Ok(Some((version, records)))
}
