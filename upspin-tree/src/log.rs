//! The physical append-only log: one directory per owner user, holding a
//! series of offset-named files plus two small side files (the last
//! committed offset, and the marshaled root entry).
//!
//! Record format: varint op-tag, varint length, marshaled entry bytes,
//! 4-byte checksum (byte-wise XOR of a fixed salt against the record
//! content). Grounded on `nfs-mamont`'s free-function wire writer style,
//! generalized from fixed XDR words to the varint scheme used everywhere
//! else in this wire format.

use std::path::{Path as FsPath, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use upspin_path::UserName;
use upspin_types::{codec, DirEntry, Error};

/// A fixed salt XORed against every record before the checksum is taken, so
/// an all-zero record (e.g. a truncated write) does not look valid.
const CHECKSUM_SALT: [u8; 4] = [0x55, 0xaa, 0x33, 0xcc];

/// Exceeding this many bytes in the currently-open log file triggers
/// rotation to a new offset file on the next append.
const ROTATE_THRESHOLD: u64 = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Put,
    Delete,
}

impl Op {
    fn tag(self) -> u8 {
        match self {
            Op::Put => 0,
            Op::Delete => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(Op::Put),
            1 => Ok(Op::Delete),
            other => Err(Error::invalid(format!("unknown log op tag {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub op: Op,
    pub entry: DirEntry,
}

fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_uvarint(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::invalid("truncated varint in log record"))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn checksum(record: &[u8]) -> [u8; 4] {
    let mut out = CHECKSUM_SALT;
    for (i, b) in record.iter().enumerate() {
        out[i % 4] ^= b;
    }
    out
}

/// Encodes one record: `[op-tag varint][length varint][entry bytes][checksum]`.
fn encode_record(log_entry: &LogEntry) -> Vec<u8> {
    let entry_bytes = codec::marshal(&log_entry.entry);
    let mut record = Vec::new();
    record.push(log_entry.op.tag());
    write_uvarint(&mut record, entry_bytes.len() as u64);
    record.extend_from_slice(&entry_bytes);

    let sum = checksum(&record);
    let mut out = record;
    out.extend_from_slice(&sum);
    out
}

/// Decodes one record from `buf` starting at `pos`, advancing `pos` past
/// it. Returns `Ok(None)` at a clean end-of-log; an `Err` on a checksum or
/// marshal failure, which recovery treats as the boundary of the durable
/// prefix.
fn decode_record(buf: &[u8], pos: &mut usize) -> Result<Option<LogEntry>, Error> {
    if *pos >= buf.len() {
        return Ok(None);
    }
    let start = *pos;
    let op_byte = *buf
        .get(*pos)
        .ok_or_else(|| Error::io("truncated log record: missing op tag"))?;
    *pos += 1;
    let op = Op::from_tag(op_byte)?;

    let len = read_uvarint(buf, pos)? as usize;
    let entry_start = *pos;
    let entry_end = entry_start
        .checked_add(len)
        .ok_or_else(|| Error::io("log record length overflow"))?;
    let entry_bytes = buf
        .get(entry_start..entry_end)
        .ok_or_else(|| Error::io("truncated log record: entry bytes"))?;
    *pos = entry_end;

    let checksum_end = pos
        .checked_add(4)
        .ok_or_else(|| Error::io("log record length overflow"))?;
    let stored_checksum = buf
        .get(*pos..checksum_end)
        .ok_or_else(|| Error::io("truncated log record: checksum"))?;
    let computed = checksum(&buf[start..*pos]);
    if stored_checksum != computed {
        return Err(Error::io(format!(
            "checksum mismatch in log record at offset {start}"
        )));
    }
    *pos = checksum_end;

    let entry = codec::unmarshal(entry_bytes)
        .map_err(|e| Error::io(format!("malformed log record at offset {start}: {e}")))?;
    Ok(Some(LogEntry { op, entry }))
}

/// The durable per-user log: a directory of offset-named files plus the
/// `index`/`root` side files. The writer appends only to the
/// highest-offset file; readers resolve an arbitrary offset to the file
/// that covers it.
pub struct Log {
    dir: PathBuf,
    current_file: Mutex<CurrentFile>,
}

struct CurrentFile {
    start_offset: u64,
    path: PathBuf,
    file: File,
    len: u64,
}

impl Log {
    /// Opens (creating if absent) the log directory at `dir`, positioning
    /// the writer at the end of the highest-offset file.
    pub async fn open(dir: impl AsRef<FsPath>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let start_offset = Self::highest_offset_file(&dir).await?.unwrap_or(0);
        let file_path = dir.join(start_offset.to_string());
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&file_path)
            .await?;
        let len = file.seek(std::io::SeekFrom::End(0)).await?;

        Ok(Log {
            dir,
            current_file: Mutex::new(CurrentFile {
                start_offset,
                path: file_path,
                file,
                len,
            }),
        })
    }

    async fn highest_offset_file(dir: &FsPath) -> Result<Option<u64>, Error> {
        let mut entries = fs::read_dir(dir).await?;
        let mut best: Option<u64> = None;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(offset) = name.parse::<u64>() {
                    best = Some(best.map_or(offset, |b: u64| b.max(offset)));
                }
            }
        }
        Ok(best)
    }

    /// Appends `log_entry`, syncing before returning so the write is
    /// durable. Returns the offset the record was written at.
    #[tracing::instrument(skip_all, err)]
    pub async fn append(&self, log_entry: &LogEntry) -> Result<u64, Error> {
        let record = encode_record(log_entry);
        let mut current = self.current_file.lock().await;

        if current.len >= ROTATE_THRESHOLD {
            let new_offset = current.start_offset + current.len;
            let new_path = self.dir.join(new_offset.to_string());
            let new_file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&new_path)
                .await?;
            current.start_offset = new_offset;
            current.path = new_path;
            current.file = new_file;
            current.len = 0;
        }

        let offset = current.start_offset + current.len;
        let size_before = fs::metadata(&current.path).await?.len();
        current.file.write_all(&record).await?;
        current.file.sync_all().await?;
        let size_after = fs::metadata(&current.path).await?.len();

        if size_after - size_before != record.len() as u64 {
            return Err(Error::io(
                "log file size did not grow by exactly the record length",
            ));
        }
        current.len += record.len() as u64;

        Ok(offset)
    }

    /// The end of the log: a reader whose own offset equals this value is
    /// caught up.
    pub async fn last_offset(&self) -> u64 {
        let current = self.current_file.lock().await;
        current.start_offset + current.len
    }

    /// Replays every record from offset 0 through the current end of log,
    /// in order. Stops (without error) at the first malformed or
    /// checksum-mismatched record, since that marks the boundary of the
    /// durable prefix left by a prior crash.
    pub async fn replay(&self) -> Result<Vec<LogEntry>, Error> {
        let mut offsets = Self::offset_files(&self.dir).await?;
        offsets.sort_unstable();

        let mut out = Vec::new();
        for start in offsets {
            let path = self.dir.join(start.to_string());
            let mut file = File::open(&path).await?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;

            let mut pos = 0;
            loop {
                match decode_record(&buf, &mut pos) {
                    Ok(Some(entry)) => out.push(entry),
                    Ok(None) => break,
                    Err(_) => {
                        // Truncate this file at the last good offset so the
                        // writer resumes cleanly after this record.
                        self.truncate_file(&path, pos as u64).await?;
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn truncate_file(&self, path: &FsPath, len: u64) -> Result<(), Error> {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(len).await?;
        Ok(())
    }

    async fn offset_files(dir: &FsPath) -> Result<Vec<u64>, Error> {
        let mut entries = fs::read_dir(dir).await?;
        let mut offsets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(offset) = name.parse::<u64>() {
                    offsets.push(offset);
                }
            }
        }
        Ok(offsets)
    }

    fn index_path(dir: &FsPath, owner: &UserName) -> PathBuf {
        dir.join(format!("tree.index.{owner}"))
    }

    fn root_path(dir: &FsPath, owner: &UserName) -> PathBuf {
        dir.join(format!("tree.root.{owner}"))
    }

    /// Writes `owner`'s checkpoint side files: `tree.index.<user>` (one
    /// varint, `offset`) and `tree.root.<user>` (`root` marshaled). Each
    /// file is written to a `.tmp` sibling and renamed into place, so a
    /// reader never observes a partially-written file. Root is written
    /// first, so a crash between the two leaves the index either absent or
    /// pointing at an offset whose root file is already there.
    #[tracing::instrument(skip_all, err)]
    pub async fn write_checkpoint(&self, owner: &UserName, offset: u64, root: &DirEntry) -> Result<(), Error> {
        let root_bytes = codec::marshal(root);
        let root_tmp = Self::root_path(&self.dir, owner).with_extension("tmp");
        fs::write(&root_tmp, &root_bytes).await?;
        fs::rename(&root_tmp, Self::root_path(&self.dir, owner)).await?;

        let mut index_bytes = Vec::new();
        write_uvarint(&mut index_bytes, offset);
        let index_tmp = Self::index_path(&self.dir, owner).with_extension("tmp");
        fs::write(&index_tmp, &index_bytes).await?;
        fs::rename(&index_tmp, Self::index_path(&self.dir, owner)).await?;
        Ok(())
    }

    /// Reads back `owner`'s checkpoint, if both side files are present.
    pub async fn read_checkpoint(&self, owner: &UserName) -> Result<Option<(u64, DirEntry)>, Error> {
        let index_bytes = match fs::read(Self::index_path(&self.dir, owner)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let root_bytes = match fs::read(Self::root_path(&self.dir, owner)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut pos = 0;
        let offset = read_uvarint(&index_bytes, &mut pos)?;
        let root = codec::unmarshal(&root_bytes)
            .map_err(|e| Error::io(format!("malformed root checkpoint: {e}")))?;
        Ok(Some((offset, root)))
    }

    /// `ReadAt`: resolves `offset` to the log file that covers it and
    /// returns the record there plus the offset immediately following it.
    /// When `offset` falls inside the file currently being appended, this
    /// takes the writer's lock so the read observes a consistent prefix.
    pub async fn read_at(&self, offset: u64) -> Result<Option<(LogEntry, u64)>, Error> {
        let current = self.current_file.lock().await;
        if offset >= current.start_offset {
            let path = self.dir.join(current.start_offset.to_string());
            let mut file = File::open(&path).await?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            let mut pos = (offset - current.start_offset) as usize;
            return match decode_record(&buf, &mut pos)? {
                Some(entry) => Ok(Some((entry, current.start_offset + pos as u64))),
                None => Ok(None),
            };
        }
        drop(current);

        let mut offsets = Self::offset_files(&self.dir).await?;
        offsets.sort_unstable();
        let covering = offsets
            .into_iter()
            .filter(|&o| o <= offset)
            .next_back()
            .ok_or_else(|| Error::io(format!("no log file covers offset {offset}")))?;

        let path = self.dir.join(covering.to_string());
        let mut file = File::open(&path).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        let mut pos = (offset - covering) as usize;
        match decode_record(&buf, &mut pos)? {
            Some(entry) => Ok(Some((entry, covering + pos as u64))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_path::Path;
    use upspin_types::{sequence, Attr, Packing};

    fn sample_entry(name: &str, seq: i64) -> DirEntry {
        DirEntry {
            name: Path::parse(name).unwrap(),
            signed_name: Path::parse(name).unwrap(),
            attr: Attr::NONE,
            packing: Packing::Plain,
            writer: Path::parse(name).unwrap().user().clone(),
            sequence: seq,
            time: 1,
            blocks: vec![],
            packdata: vec![],
            link: None,
        }
    }

    #[tokio::test]
    async fn append_and_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path()).await.unwrap();

        for i in 1..=3 {
            log.append(&LogEntry {
                op: Op::Put,
                entry: sample_entry(&format!("ann@example.com/f{i}"), sequence::BASE),
            })
            .await
            .unwrap();
        }

        let replayed = log.replay().await.unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].entry.name.to_string(), "ann@example.com/f1");
        assert_eq!(replayed[2].entry.name.to_string(), "ann@example.com/f3");
    }

    #[tokio::test]
    async fn replay_stops_at_corruption_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path()).await.unwrap();

        log.append(&LogEntry {
            op: Op::Put,
            entry: sample_entry("ann@example.com/good", sequence::BASE),
        })
        .await
        .unwrap();
        let good_len = log.last_offset().await;

        log.append(&LogEntry {
            op: Op::Put,
            entry: sample_entry("ann@example.com/bad", sequence::BASE),
        })
        .await
        .unwrap();

        // Corrupt the last record's checksum.
        let path = dir.path().join("0");
        let mut bytes = tokio::fs::read(&path).await.unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        tokio::fs::write(&path, &bytes).await.unwrap();

        let replayed = log.replay().await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].entry.name.to_string(), "ann@example.com/good");

        let truncated_len = tokio::fs::metadata(&path).await.unwrap().len();
        assert_eq!(truncated_len, good_len);
    }

    #[tokio::test]
    async fn read_at_resolves_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path()).await.unwrap();

        let off0 = log
            .append(&LogEntry {
                op: Op::Put,
                entry: sample_entry("ann@example.com/a", sequence::BASE),
            })
            .await
            .unwrap();
        log.append(&LogEntry {
            op: Op::Put,
            entry: sample_entry("ann@example.com/b", sequence::BASE),
        })
        .await
        .unwrap();

        let (entry, next) = log.read_at(off0).await.unwrap().unwrap();
        assert_eq!(entry.entry.name.to_string(), "ann@example.com/a");
        let (entry2, _) = log.read_at(next).await.unwrap().unwrap();
        assert_eq!(entry2.entry.name.to_string(), "ann@example.com/b");
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path()).await.unwrap();
        let owner = UserName::parse("ann@example.com").unwrap();

        assert!(log.read_checkpoint(&owner).await.unwrap().is_none());

        let offset = log
            .append(&LogEntry {
                op: Op::Put,
                entry: sample_entry("ann@example.com/", sequence::BASE),
            })
            .await
            .unwrap();
        let root = sample_entry("ann@example.com/", sequence::BASE);
        log.write_checkpoint(&owner, offset, &root).await.unwrap();

        let (saved_offset, saved_root) = log.read_checkpoint(&owner).await.unwrap().unwrap();
        assert_eq!(saved_offset, offset);
        assert_eq!(saved_root.name.to_string(), "ann@example.com/");
    }
}
