//! `Watch`: streams log records under `path`, filtered to what the caller
//! may `list`, starting at `since_offset`. Grounded on `castore`'s
//! `async_stream::stream!` + `futures::stream::BoxStream` traversal
//! pattern, polling the log instead of walking a tree.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;

use upspin_access::Right;
use upspin_path::{Path, UserName};
use upspin_tree::Op;
use upspin_types::{DirEntry, Error};

use crate::server::DirServer;

/// Record interval between polls of the log when caught up to its end.
/// The log has no wakeup notification, so `Watch` degrades to polling
/// rather than blocking a reader thread per watcher.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub op: Op,
    pub entry: DirEntry,
}

impl DirServer {
    /// Streams events for paths under `path`, in log order, until `done`
    /// resolves. Events on paths the caller cannot `list` are skipped
    /// rather than surfaced, per spec's "drops events the caller has no
    /// `list` right on".
    pub fn watch<'a>(
        &'a self,
        caller: UserName,
        path: Path,
        since_offset: u64,
        done: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
    ) -> BoxStream<'a, Result<WatchEvent, Error>> {
        let server = self.clone();
        let mut done = done;
        Box::pin(stream! {
            let mut offset = since_offset;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut done => break,
                    record = server.read_log_at(path.user(), offset) => {
                        match record {
                            Ok(Some((log_entry, next_offset))) => {
                                offset = next_offset;
                                if !log_entry.entry.name.has_prefix(&path) {
                                    continue;
                                }
                                let start_dir = DirServer::parent_dir(&log_entry.entry.name);
                                match server.check_right(&caller, Right::List, &start_dir).await {
                                    Ok(true) => yield Ok(WatchEvent { op: log_entry.op, entry: log_entry.entry }),
                                    Ok(false) => continue,
                                    Err(e) => {
                                        yield Err(e);
                                        break;
                                    }
                                }
                            }
                            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::StreamExt;
    use sha2::{Digest, Sha256};

    use upspin_keyserver::{AdminPolicy, Authority, InMemoryKeyStore, KeyServer, NoSignup, UserRecord};
    use upspin_pack::InMemoryFactotum;
    use upspin_store::{MemoryStoreDriver, StoreServer};
    use upspin_types::{sequence, Attr, BlockDescriptor, Endpoint, Location, Packing, Reference};

    struct AllowAllAdmin;
    impl AdminPolicy for AllowAllAdmin {
        fn is_admin(&self, _user: &UserName) -> bool {
            true
        }
    }

    async fn plain_entry(store: &StoreServer, path: &Path, writer: &UserName, contents: &[u8]) -> DirEntry {
        let reference = Reference::from(data_encoding::HEXLOWER.encode(&Sha256::digest(contents)));
        store.put(&reference, contents).await.unwrap();
        DirEntry {
            name: path.clone(),
            signed_name: path.clone(),
            attr: Attr::NONE,
            packing: Packing::Plain,
            writer: writer.clone(),
            sequence: sequence::IGNORE,
            time: 0,
            blocks: vec![BlockDescriptor {
                location: Location {
                    endpoint: Endpoint::in_process(),
                    reference,
                },
                offset: 0,
                size: contents.len() as u64,
                packdata: vec![],
            }],
            packdata: vec![],
            link: None,
        }
    }

    #[tokio::test]
    async fn watch_streams_put_events_and_stops_on_done() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StoreServer::new(Arc::new(MemoryStoreDriver::new())));
        let keys = Arc::new(KeyServer::new(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(AllowAllAdmin),
            Arc::new(NoSignup),
        ));
        let server = DirServer::new(tmp.path(), store.clone(), keys.clone());

        let ann = UserName::parse("ann@example.com").unwrap();
        let factotum = InMemoryFactotum::generate();
        keys.put(
            &ann,
            UserRecord {
                name: ann.clone(),
                directory_endpoints: vec![],
                store_endpoints: vec![],
                public_keys: factotum.public_keys(),
            },
            Authority::Admin,
        )
        .await
        .unwrap();
        server.register_factotum(ann.clone(), Arc::new(factotum)).await;
        let root = Path::parse(&ann.to_string()).unwrap();

        // Watching starts before the root even exists: `read_log_at` lazily
        // opens the tree, so the first two log records (root creation, then
        // the file put) both arrive through the stream in order.
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let done: Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(async move {
                let _ = done_rx.await;
            });
        let mut events = server.watch(ann.clone(), root.clone(), 0, done);

        server.make_directory(&ann, &root).await.unwrap();
        let doc = Path::parse("ann@example.com/doc.txt").unwrap();
        let entry = plain_entry(&store, &doc, &ann, b"hello").await;
        server.put(&ann, entry).await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.op, Op::Put);
        assert_eq!(first.entry.name.to_string(), root.to_string());

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.op, Op::Put);
        assert_eq!(second.entry.name.to_string(), doc.to_string());

        let _ = done_tx.send(());
        assert!(events.next().await.is_none());
    }
}
