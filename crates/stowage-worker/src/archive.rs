//! Backup archive codec
//!
//! An archive is a gzip-compressed tar with exactly three members:
//! `metadata.json`, `resources.<fmt>` and `snapshots.<fmt>`. Empty streams are
//! still written as zero-length members.

use std::io::Read;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use stowage_common::crd::{ExportFormat, StorageType};
use stowage_common::Error;

/// Current archive layout version
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Name of the metadata member
pub const METADATA_MEMBER: &str = "metadata.json";

const RESOURCES_STEM: &str = "resources";
const SNAPSHOTS_STEM: &str = "snapshots";

/// Descriptive header stored in every archive
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    /// Layout version, 0 for archives written before versioning
    #[serde(default)]
    pub format_version: u32,
    /// Kind of the backup request
    pub kind: String,
    /// Name of the backup request
    pub name: String,
    /// Namespace of the backup request, empty for cluster-scoped requests
    #[serde(default)]
    pub namespace: String,
    /// Cluster the backup was taken on
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// UTC timestamp, `%Y%m%dT%H%M%SZ`
    pub timestamp: String,
    /// Backend the archive was written to
    pub storage_type: StorageType,
    /// Format of both document streams
    #[serde(default)]
    pub export_format: ExportFormat,
}

/// Decoded archive contents
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Archive {
    /// Header
    pub metadata: ArchiveMetadata,
    /// Serialized resource documents
    pub resources: Vec<u8>,
    /// Serialized VolumeSnapshot documents
    pub snapshots: Vec<u8>,
}

fn member_name(stem: &str, format: ExportFormat) -> String {
    format!("{}.{}", stem, format.extension())
}

fn archive_err(action: &str, e: impl std::fmt::Display) -> Error {
    Error::archive(format!("{}: {}", action, e))
}

/// Pack an archive into gzip-compressed tar bytes
pub fn write_archive(archive: &Archive) -> Result<Vec<u8>, Error> {
    let metadata = serde_json::to_vec_pretty(&archive.metadata)
        .map_err(|e| archive_err("encode metadata", e))?;
    let format = archive.metadata.export_format;
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;

    let members: [(String, &[u8]); 3] = [
        (METADATA_MEMBER.to_string(), &metadata),
        (member_name(RESOURCES_STEM, format), &archive.resources),
        (member_name(SNAPSHOTS_STEM, format), &archive.snapshots),
    ];

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        builder
            .append_data(&mut header, &name, data)
            .map_err(|e| archive_err(&format!("write {}", name), e))?;
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| archive_err("finish archive", e))
}

/// Unpack gzip-compressed tar bytes
///
/// Zero-length and unknown members are ignored. Either document extension is
/// accepted. A missing metadata member is an error.
pub fn read_archive(data: &[u8]) -> Result<Archive, Error> {
    let mut tar = tar::Archive::new(GzDecoder::new(data));
    let mut metadata = None;
    let mut resources = Vec::new();
    let mut snapshots = Vec::new();

    let entries = tar.entries().map_err(|e| archive_err("read archive", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err("read archive entry", e))?;
        if entry.size() == 0 {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| archive_err("read member name", e))?
            .to_string_lossy()
            .into_owned();

        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| archive_err(&format!("read {}", path), e))?;

        match path.rsplit_once('.') {
            _ if path == METADATA_MEMBER => {
                let parsed: ArchiveMetadata = serde_json::from_slice(&buf)
                    .map_err(|e| archive_err("decode metadata", e))?;
                metadata = Some(parsed);
            }
            Some((RESOURCES_STEM, "yaml" | "json")) => resources = buf,
            Some((SNAPSHOTS_STEM, "yaml" | "json")) => snapshots = buf,
            _ => {}
        }
    }

    let metadata =
        metadata.ok_or_else(|| Error::archive(format!("{} missing from archive", METADATA_MEMBER)))?;
    Ok(Archive {
        metadata,
        resources,
        snapshots,
    })
}
