use std::sync::Arc;

use url::Url;

use upspin_types::Error;

use crate::disk::DiskStoreDriver;
use crate::memory::MemoryStoreDriver;
use crate::StoreDriver;

/// Constructs a [`StoreDriver`] from a URI.
///
/// - `memory://` — non-durable, process-local ([`MemoryStoreDriver`]).
/// - `disk:///absolute/path` — sharded on-disk tree rooted at the given
///   path ([`DiskStoreDriver`]).
pub async fn from_addr(uri: &str) -> Result<Arc<dyn StoreDriver>, Error> {
    let url = Url::parse(uri).map_err(|e| Error::invalid(format!("unable to parse url: {e}")))?;

    Ok(if url.scheme() == "memory" {
        if url.has_host() || !url.path().is_empty() {
            return Err(Error::invalid("memory:// takes no host or path"));
        }
        Arc::new(MemoryStoreDriver::new())
    } else if url.scheme() == "disk" {
        if url.has_host() {
            return Err(Error::invalid("disk:// takes no host, only a path"));
        }
        if url.path().is_empty() {
            return Err(Error::invalid("disk:// requires an absolute path"));
        }
        Arc::new(DiskStoreDriver::new(url.path().into()).await?)
    } else {
        return Err(Error::invalid(format!("unknown scheme: {}", url.scheme())));
    })
}

#[cfg(test)]
mod tests {
    use super::from_addr;

    #[tokio::test]
    async fn dispatches_memory_scheme() {
        assert!(from_addr("memory://").await.is_ok());
    }

    #[tokio::test]
    async fn rejects_memory_with_path() {
        assert!(from_addr("memory:///foo").await.is_err());
    }

    #[tokio::test]
    async fn dispatches_disk_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("disk://{}", dir.path().to_str().unwrap());
        assert!(from_addr(&uri).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_disk_without_path() {
        assert!(from_addr("disk://").await.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        assert!(from_addr("http://foo.example/test").await.is_err());
    }
}
