use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use upspin_types::{Error, Reference};

use crate::driver::StoreDriver;

/// Sentinel directory marking the on-disk layout version this driver
/// writes. Its presence lets a future incompatible layout refuse to run
/// against an old root rather than silently corrupting it.
const VERSION_SENTINEL: &str = "v1";

/// Stores blobs under `root/blobs/<prefix>/<name>`, sharded by the first
/// two hex characters of the hex-encoded reference — grounded on
/// `castore::blobservice::simplefs.rs`'s `derive_path`, generalized from a
/// fixed-width digest to an arbitrary opaque [`Reference`].
#[derive(Clone)]
pub struct DiskStoreDriver {
    root: PathBuf,
}

impl DiskStoreDriver {
    pub async fn new(root: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join("blobs")).await?;
        fs::create_dir_all(root.join("tmp")).await?;

        let sentinel = root.join(VERSION_SENTINEL);
        if !fs::try_exists(&sentinel).await? {
            let mut entries = fs::read_dir(root.join("blobs")).await?;
            if entries.next_entry().await?.is_some() {
                return Err(Error::invalid(format!(
                    "{} holds blobs in an unversioned layout; refusing to mix with the {} layout",
                    root.display(),
                    VERSION_SENTINEL
                )));
            }
            fs::create_dir_all(&sentinel).await?;
        }

        Ok(DiskStoreDriver { root })
    }
}

fn derive_path(root: &Path, reference: &Reference) -> PathBuf {
    let name = HEXLOWER.encode(reference.as_str().as_bytes());
    let prefix = if name.len() >= 2 { &name[..2] } else { "00" };
    root.join("blobs").join(prefix).join(name)
}

#[async_trait]
impl StoreDriver for DiskStoreDriver {
    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn download(&self, reference: &Reference) -> Result<Option<Vec<u8>>, Error> {
        let path = derive_path(&self.root, reference);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn put(&self, reference: &Reference, data: &[u8]) -> Result<(), Error> {
        let dst_path = derive_path(&self.root, reference);
        fs::create_dir_all(dst_path.parent().unwrap()).await?;

        let tmp_path = self.root.join("tmp").join(format!(
            "{}-{}",
            std::process::id(),
            HEXLOWER.encode(reference.as_str().as_bytes())
        ));
        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(data).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &dst_path).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn delete(&self, reference: &Reference) -> Result<bool, Error> {
        let path = derive_path(&self.root, reference);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn link_base(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_download_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let driver = DiskStoreDriver::new(dir.path().to_path_buf()).await.unwrap();
        let reference = Reference::from("deadbeef");

        assert_eq!(driver.download(&reference).await.unwrap(), None);
        driver.put(&reference, b"upspin").await.unwrap();
        assert_eq!(driver.download(&reference).await.unwrap(), Some(b"upspin".to_vec()));
        assert!(driver.delete(&reference).await.unwrap());
        assert!(!driver.delete(&reference).await.unwrap());
    }

    #[tokio::test]
    async fn refuses_to_adopt_an_unversioned_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("blobs").join("ab"))
            .await
            .unwrap();
        fs::write(dir.path().join("blobs").join("ab").join("cdef"), b"legacy")
            .await
            .unwrap();

        let result = DiskStoreDriver::new(dir.path().to_path_buf()).await;
        assert!(result.is_err());
    }
}
