//! Macrobatch archive reader
//!
//! Archives pack many encoded records into one file so an epoch streams
//! sequentially from a handful of large files instead of millions of small
//! ones. Archive `i` lives at `{prefix}{i}`; the layout is:
//!
//! ```text
//! magic "MBA1" | record count u32 LE | label stride u32 LE
//! per record: data length u32 LE | label bytes | data bytes
//! ```
//!
//! Files are memory mapped and parsed by offset. The reader advances across
//! archive boundaries transparently and exposes exactly `num_records`
//! records per epoch regardless of how they are distributed over archives.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use imgpipe_core::error::{Error, Result};
use imgpipe_core::reader::{Record, RecordReader};

const MAGIC: [u8; 4] = *b"MBA1";
const HEADER_LEN: usize = 12;

/// A mapped archive with a parse position
struct OpenArchive {
    path: PathBuf,
    map: Mmap,
    offset: usize,
    remaining: u32,
}

impl OpenArchive {
    #[allow(unsafe_code)]
    fn open(path: PathBuf, label_stride: usize) -> Result<Self> {
        let file = File::open(&path)?;
        // Safety: the mapping is read-only and private to this reader
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < HEADER_LEN {
            return Err(Error::CorruptArchive {
                path,
                reason: "file shorter than header".into(),
            });
        }
        if map[..4] != MAGIC {
            return Err(Error::CorruptArchive {
                path,
                reason: "bad magic".into(),
            });
        }

        let count = u32::from_le_bytes([map[4], map[5], map[6], map[7]]);
        let stride = u32::from_le_bytes([map[8], map[9], map[10], map[11]]) as usize;
        if stride != label_stride {
            return Err(Error::CorruptArchive {
                path,
                reason: format!(
                    "label stride mismatch: archive has {stride}, configured {label_stride}"
                ),
            });
        }

        Ok(Self {
            path,
            map,
            offset: HEADER_LEN,
            remaining: count,
        })
    }

    fn read_record(&mut self, label_stride: usize) -> Result<Record> {
        let header_end = self.offset + 4;
        if header_end > self.map.len() {
            return Err(Error::CorruptArchive {
                path: self.path.clone(),
                reason: "truncated record header".into(),
            });
        }
        let data_len = u32::from_le_bytes([
            self.map[self.offset],
            self.map[self.offset + 1],
            self.map[self.offset + 2],
            self.map[self.offset + 3],
        ]) as usize;

        let label_end = header_end + label_stride;
        let data_end = label_end + data_len;
        if data_end > self.map.len() {
            return Err(Error::CorruptArchive {
                path: self.path.clone(),
                reason: "truncated record body".into(),
            });
        }

        let record = Record {
            bytes: self.map[label_end..data_end].to_vec(),
            label: self.map[header_end..label_end].to_vec(),
        };
        self.offset = data_end;
        self.remaining -= 1;
        Ok(record)
    }
}

/// Position within the archive set, for all-or-nothing batches
struct Cursor {
    archive_index: usize,
    offset: usize,
    remaining: u32,
    consumed: usize,
    epoch: u64,
}

/// Sequential reader over a set of macrobatch archives
pub struct MacrobatchReader {
    prefix: PathBuf,
    start_index: usize,
    archive_index: usize,
    current: Option<OpenArchive>,
    label_stride: usize,
    num_records: usize,
    consumed: usize,
    epoch: u64,
}

impl MacrobatchReader {
    /// Open the archive set. The first archive `{prefix}{start_index}` is
    /// opened eagerly so missing storage fails construction, not the first
    /// batch.
    pub fn new(
        prefix: impl Into<PathBuf>,
        start_index: usize,
        num_records: usize,
        label_stride: usize,
    ) -> Result<Self> {
        if num_records == 0 {
            return Err(Error::InvalidConfig(
                "macrobatch reader needs at least one record per epoch".into(),
            ));
        }
        let prefix = prefix.into();
        let current = OpenArchive::open(Self::archive_path(&prefix, start_index), label_stride)?;
        Ok(Self {
            prefix,
            start_index,
            archive_index: start_index,
            current: Some(current),
            label_stride,
            num_records,
            consumed: 0,
            epoch: 0,
        })
    }

    fn archive_path(prefix: &Path, index: usize) -> PathBuf {
        let mut name = prefix.as_os_str().to_os_string();
        name.push(index.to_string());
        PathBuf::from(name)
    }

    fn snapshot(&self) -> Cursor {
        let (offset, remaining) = self
            .current
            .as_ref()
            .map_or((HEADER_LEN, 0), |a| (a.offset, a.remaining));
        Cursor {
            archive_index: self.archive_index,
            offset,
            remaining,
            consumed: self.consumed,
            epoch: self.epoch,
        }
    }

    fn restore(&mut self, cursor: Cursor) -> Result<()> {
        let path = Self::archive_path(&self.prefix, cursor.archive_index);
        let mut archive = OpenArchive::open(path, self.label_stride)?;
        archive.offset = cursor.offset;
        archive.remaining = cursor.remaining;
        self.archive_index = cursor.archive_index;
        self.current = Some(archive);
        self.consumed = cursor.consumed;
        self.epoch = cursor.epoch;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        let path = Self::archive_path(&self.prefix, self.start_index);
        self.current = Some(OpenArchive::open(path, self.label_stride)?);
        self.archive_index = self.start_index;
        self.consumed = 0;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Record> {
        loop {
            let exhausted = self.current.as_ref().map_or(true, |a| a.remaining == 0);
            if exhausted {
                let next_index = self.archive_index + 1;
                let path = Self::archive_path(&self.prefix, next_index);
                self.current = Some(OpenArchive::open(path, self.label_stride)?);
                self.archive_index = next_index;
                continue;
            }
            // current is always Some here
            let archive = self.current.as_mut().ok_or_else(|| {
                Error::InvalidOperation("macrobatch reader lost its archive".into())
            })?;
            return archive.read_record(self.label_stride);
        }
    }

    fn read_batch(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let take = max_records.min(self.num_records - self.consumed);
        let mut records = Vec::with_capacity(take);
        for _ in 0..take {
            records.push(self.next_record()?);
            self.consumed += 1;
        }
        if self.consumed == self.num_records {
            self.epoch += 1;
            self.rewind()?;
            debug!(epoch = self.epoch, "macrobatch epoch wrapped");
        }
        Ok(records)
    }
}

impl RecordReader for MacrobatchReader {
    fn next_batch(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let snapshot = self.snapshot();
        match self.read_batch(max_records) {
            Ok(records) => Ok(records),
            Err(e) => {
                // leave the cursor where the batch started so the caller
                // can retry the same position
                self.restore(snapshot)?;
                Err(e)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.rewind()
    }

    fn num_records(&self) -> usize {
        self.num_records
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Writes archives in the format [`MacrobatchReader`] consumes
///
/// Records are collected in memory and written out by `finish`, which needs
/// the final count for the header.
pub struct MacrobatchWriter {
    path: PathBuf,
    label_stride: usize,
    records: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MacrobatchWriter {
    /// Start an archive at `path`
    pub fn create(path: impl Into<PathBuf>, label_stride: usize) -> Self {
        Self {
            path: path.into(),
            label_stride,
            records: Vec::new(),
        }
    }

    /// Queue one record
    pub fn append(&mut self, data: &[u8], label: &[u8]) -> Result<()> {
        if label.len() != self.label_stride {
            return Err(Error::InvalidConfig(format!(
                "label is {} bytes, archive stride is {}",
                label.len(),
                self.label_stride
            )));
        }
        self.records.push((data.to_vec(), label.to_vec()));
        Ok(())
    }

    /// Write the archive to disk
    pub fn finish(self) -> Result<()> {
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        writer.write_all(&(self.records.len() as u32).to_le_bytes())?;
        writer.write_all(&(self.label_stride as u32).to_le_bytes())?;
        for (data, label) in &self.records {
            writer.write_all(&(data.len() as u32).to_le_bytes())?;
            writer.write_all(label)?;
            writer.write_all(data)?;
        }
        writer.flush()?;
        Ok(())
    }
}
