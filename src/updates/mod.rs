//! Stop-database update checker.
//!
//! The stop topology ships as a downloadable SQLite artifact versioned by
//! a topology id. An update is pending when the remote id differs from the
//! recorded installed one; the artifact is installed only after its schema
//! version and MD5 checksum both check out.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use md5::{Digest, Md5};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::alerts::store::AlertStore;
use crate::config::UpdatesConfig;
use crate::providers::bustracker::BusTrackerClient;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed update descriptor: {0}")]
    MalformedResponse(String),
    #[error("Schema mismatch: wanted prefix {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(String),
}

/// Remote database descriptor published at the info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInfo {
    pub db_url: String,
    #[serde(rename = "db_schema_version")]
    pub schema_version: String,
    pub topo_id: String,
    pub checksum: String,
}

/// Check whether a newer stop database is available.
///
/// Returns `None` when the installed topology is already current. A pending
/// update is returned only when its schema is one this build can read.
pub async fn check_for_update(
    client: &BusTrackerClient,
    store: &AlertStore,
    config: &UpdatesConfig,
) -> Result<Option<DatabaseInfo>, UpdateError> {
    let remote_topo = client
        .get_topology_id()
        .await
        .map_err(|e| UpdateError::Network(e.to_string()))?;
    let installed = store
        .installed_topology()
        .await
        .map_err(|e| UpdateError::Database(e.to_string()))?;

    if installed.as_deref() == Some(remote_topo.as_str()) {
        debug!(topo_id = %remote_topo, "Stop database is current");
        return Ok(None);
    }

    let info = fetch_database_info(client.http_client(), &config.info_url).await?;
    if !schema_compatible(&info.schema_version, &config.schema_name) {
        return Err(UpdateError::SchemaMismatch {
            expected: config.schema_name.clone(),
            actual: info.schema_version,
        });
    }

    info!(
        installed = installed.as_deref().unwrap_or("none"),
        available = %info.topo_id,
        "Stop database update available"
    );
    Ok(Some(info))
}

/// Stream the database artifact to `<target>.part`, verify its checksum
/// and move it into place, recording the new topology id.
pub async fn download_database(
    client: &reqwest::Client,
    store: &AlertStore,
    info: &DatabaseInfo,
    target_path: &Path,
) -> Result<(), UpdateError> {
    let partial_path = partial_download_path(target_path);
    if let Some(parent) = target_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let response = client
        .get(&info.db_url)
        .send()
        .await
        .map_err(|e| UpdateError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(UpdateError::Network(format!(
            "Database download HTTP {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(&partial_path).await?;
    let mut hasher = Md5::new();
    let mut total_bytes: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial_path).await;
                return Err(UpdateError::Network(e.to_string()));
            }
        };
        hasher.update(&chunk);
        total_bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    let digest = hex::encode(hasher.finalize());
    if let Err(e) = verify_checksum(&digest, &info.checksum) {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return Err(e);
    }

    tokio::fs::rename(&partial_path, target_path).await?;
    store
        .set_installed_topology(&info.topo_id)
        .await
        .map_err(|e| UpdateError::Database(e.to_string()))?;
    info!(
        topo_id = %info.topo_id,
        size_kb = total_bytes / 1024,
        path = %target_path.display(),
        "Installed stop database"
    );
    Ok(())
}

async fn fetch_database_info(
    client: &reqwest::Client,
    info_url: &str,
) -> Result<DatabaseInfo, UpdateError> {
    let response = client
        .get(info_url)
        .send()
        .await
        .map_err(|e| UpdateError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(UpdateError::Network(format!(
            "Database info HTTP {}",
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|e| UpdateError::Network(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| UpdateError::MalformedResponse(e.to_string()))
}

/// The artifact is usable only when its schema version carries the prefix
/// this build was written against.
fn schema_compatible(schema_version: &str, schema_name: &str) -> bool {
    schema_version.starts_with(schema_name)
}

/// Published checksums vary in case; compare digests case-insensitively.
fn verify_checksum(digest: &str, expected: &str) -> Result<(), UpdateError> {
    if digest.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(UpdateError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: digest.to_string(),
        })
    }
}

fn partial_download_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_gate_matches_on_prefix() {
        assert!(schema_compatible("MBE_10_202608181423", "MBE_10"));
        assert!(schema_compatible("MBE_10", "MBE_10"));
        assert!(!schema_compatible("MBE_9_202608181423", "MBE_10"));
        assert!(!schema_compatible("", "MBE_10"));
    }

    #[test]
    fn descriptor_deserializes_from_wire_names() {
        let doc = r#"{
            "db_url": "http://example.org/stops.db",
            "db_schema_version": "MBE_10_202608181423",
            "topo_id": "agg_20260818_1423",
            "checksum": "900150983CD24FB0D6963F7D28E17F72"
        }"#;

        let info: DatabaseInfo = serde_json::from_str(doc).unwrap();
        assert_eq!(info.db_url, "http://example.org/stops.db");
        assert_eq!(info.schema_version, "MBE_10_202608181423");
        assert_eq!(info.topo_id, "agg_20260818_1423");
        assert_eq!(info.checksum, "900150983CD24FB0D6963F7D28E17F72");
    }

    #[test]
    fn checksum_comparison_ignores_case() {
        // md5("abc")
        let digest = "900150983cd24fb0d6963f7d28e17f72";
        assert!(verify_checksum(digest, "900150983CD24FB0D6963F7D28E17F72").is_ok());

        let err = verify_checksum(digest, "d41d8cd98f00b204e9800998ecf8427e").unwrap_err();
        assert!(matches!(
            err,
            UpdateError::ChecksumMismatch { ref actual, .. } if actual == digest
        ));
    }

    #[test]
    fn chunked_hashing_matches_whole_input() {
        let mut hasher = Md5::new();
        hasher.update(b"ab");
        hasher.update(b"c");
        assert_eq!(
            hex::encode(hasher.finalize()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn partial_file_sits_next_to_the_target() {
        assert_eq!(
            partial_download_path(Path::new("database/stops.db")),
            PathBuf::from("database/stops.db.part")
        );
        assert_eq!(
            partial_download_path(Path::new("stops.db")),
            PathBuf::from("stops.db.part")
        );
    }
}
