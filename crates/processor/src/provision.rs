//! Trust-store provisioning
//!
//! Before the stream reader connects, the TLS trust material it needs is
//! fetched from durable object storage and written to the local path the
//! client reads. The file is written to a temporary sibling, synced and then
//! renamed over the target, so a concurrent reader never sees a partial file
//! and repeating the operation leaves the same bytes in place.

use catalog_etl_config::{BlobLocation, TrustStoreConfig};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ProvisioningError;

pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Copies trust material from object storage to the local filesystem
pub struct TrustStoreProvisioner {
    store: Arc<dyn ObjectStore>,
}

impl TrustStoreProvisioner {
    /// Provisioner reading from an arbitrary object store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Provisioner reading from a Google Cloud Storage bucket
    ///
    /// Credentials come from the environment (service account file or
    /// application default credentials).
    pub fn for_gcs(bucket: &str) -> Result<Self> {
        use object_store::gcp::GoogleCloudStorageBuilder;

        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| {
                ProvisioningError::StoreConfig(format!("Failed to create GCS client: {}", e))
            })?;

        Ok(Self::new(Arc::new(store)))
    }

    /// Fetch `location` and write it to `local_path`, returning the local path
    pub async fn provision(&self, location: &BlobLocation, local_path: &Path) -> Result<PathBuf> {
        if location.bucket.is_empty() || location.object_path.is_empty() {
            return Err(ProvisioningError::InvalidLocation(format!(
                "gs://{}/{}",
                location.bucket, location.object_path
            )));
        }

        let object_path = ObjectPath::from(location.object_path.as_str());
        let bytes = match self.store.get(&object_path).await {
            Ok(result) => result.bytes().await.map_err(|e| fetch_error(location, e))?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(ProvisioningError::NotFound {
                    bucket: location.bucket.clone(),
                    object_path: location.object_path.clone(),
                })
            }
            Err(e) => return Err(fetch_error(location, e)),
        };

        debug!(
            bucket = %location.bucket,
            object_path = %location.object_path,
            size = bytes.len(),
            "Fetched trust store"
        );

        write_atomically(local_path, &bytes).await?;

        info!(
            bucket = %location.bucket,
            object_path = %location.object_path,
            local_path = %local_path.display(),
            "Trust store provisioned"
        );
        Ok(local_path.to_path_buf())
    }
}

fn fetch_error(location: &BlobLocation, source: object_store::Error) -> ProvisioningError {
    ProvisioningError::Fetch {
        bucket: location.bucket.clone(),
        object_path: location.object_path.clone(),
        source,
    }
}

fn write_error(path: &Path, source: std::io::Error) -> ProvisioningError {
    ProvisioningError::Write {
        path: path.display().to_string(),
        source,
    }
}

async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = target
        .file_name()
        .ok_or_else(|| ProvisioningError::InvalidLocation(target.display().to_string()))?;

    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| write_error(&parent, e))?;

    let tmp = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_error(target, e));
    }

    Ok(())
}

/// Materialize the configured trust store, if any
///
/// Returns the local path the stream client should read. Without a remote
/// location the local file is expected to be in place already.
pub async fn provision_trust_store(config: Option<&TrustStoreConfig>) -> Result<Option<PathBuf>> {
    let Some(trust_store) = config else {
        return Ok(None);
    };

    match &trust_store.remote {
        Some(remote) => {
            let provisioner = TrustStoreProvisioner::for_gcs(&remote.bucket)?;
            provisioner
                .provision(remote, &trust_store.local_path)
                .await
                .map(Some)
        }
        None => {
            if !trust_store.local_path.exists() {
                return Err(write_error(
                    &trust_store.local_path,
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "trust store not found and no remote location configured",
                    ),
                ));
            }
            Ok(Some(trust_store.local_path.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_etl_config::TrustStoreType;
    use object_store::memory::InMemory;
    use object_store::PutPayload;
    use tempfile::TempDir;

    const PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    async fn store_with(path: &str, bytes: &[u8]) -> Arc<dyn ObjectStore> {
        let store = InMemory::new();
        store
            .put(&ObjectPath::from(path), PutPayload::from(bytes.to_vec()))
            .await
            .unwrap();
        Arc::new(store)
    }

    fn location(object_path: &str) -> BlobLocation {
        BlobLocation {
            bucket: "certs".to_string(),
            object_path: object_path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_provision_writes_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/kafka/ca.pem");
        let provisioner = TrustStoreProvisioner::new(store_with("kafka/ca.pem", PEM).await);

        let path = provisioner
            .provision(&location("kafka/ca.pem"), &target)
            .await
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), PEM);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("ca.pem");
        let provisioner = TrustStoreProvisioner::new(store_with("kafka/ca.pem", PEM).await);

        provisioner.provision(&location("kafka/ca.pem"), &target).await.unwrap();
        provisioner.provision(&location("kafka/ca.pem"), &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), PEM);
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_provision_missing_object() {
        let dir = TempDir::new().unwrap();
        let provisioner = TrustStoreProvisioner::new(Arc::new(InMemory::new()));

        let err = provisioner
            .provision(&location("missing.pem"), &dir.path().join("ca.pem"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::NotFound { .. }));
        assert!(!dir.path().join("ca.pem").exists());
    }

    #[tokio::test]
    async fn test_provision_rejects_empty_location() {
        let dir = TempDir::new().unwrap();
        let provisioner = TrustStoreProvisioner::new(Arc::new(InMemory::new()));

        let err = provisioner
            .provision(&location(""), &dir.path().join("ca.pem"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::InvalidLocation(_)));
    }

    #[tokio::test]
    async fn test_provision_trust_store_without_remote() {
        assert!(provision_trust_store(None).await.unwrap().is_none());

        let dir = TempDir::new().unwrap();
        let local_path = dir.path().join("ca.pem");
        let config = TrustStoreConfig {
            store_type: TrustStoreType::Pem,
            local_path: local_path.clone(),
            password: None,
            remote: None,
        };

        let err = provision_trust_store(Some(&config)).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Write { .. }));

        std::fs::write(&local_path, PEM).unwrap();
        let path = provision_trust_store(Some(&config)).await.unwrap();
        assert_eq!(path, Some(local_path));
    }
}
