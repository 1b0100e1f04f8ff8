//! File-listing reader: one image file per record
//!
//! The listing is a text file with one `path<whitespace>label` line per
//! record; the label is an optional integer (0 when omitted) serialized
//! little-endian into the configured label stride. Relative paths resolve
//! against the listing's directory. Each record is read whole; a file
//! larger than the configured cap is an error, never a silent truncation.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use imgpipe_core::error::{Error, Result};
use imgpipe_core::reader::{Record, RecordReader};

struct Entry {
    path: PathBuf,
    label: Vec<u8>,
}

/// Reader over a listing of individual record files
pub struct FileListReader {
    entries: Vec<Entry>,
    order: Vec<usize>,
    pos: usize,
    num_records: usize,
    max_record_size: usize,
    shuffle: bool,
    rng: StdRng,
    epoch: u64,
}

impl FileListReader {
    /// Parse the listing at `listing`. Opening or parsing failures are
    /// construction failures. `num_records` of 0 means "every listed
    /// record"; a larger value is clamped to the listing length.
    pub fn new(
        listing: &Path,
        num_records: usize,
        max_record_size: usize,
        label_stride: usize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        if max_record_size == 0 {
            return Err(Error::InvalidConfig(
                "max_record_size must be nonzero".into(),
            ));
        }
        let text = fs::read_to_string(listing)?;
        let base = listing.parent().unwrap_or_else(|| Path::new(""));

        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(path) = fields.next() else { continue };
            let label_value: i64 = match fields.next() {
                Some(field) => field.parse().map_err(|_| {
                    Error::InvalidConfig(format!(
                        "listing {}:{}: label {:?} is not an integer",
                        listing.display(),
                        line_no + 1,
                        field
                    ))
                })?,
                None => 0,
            };
            let mut label = vec![0u8; label_stride];
            let raw = label_value.to_le_bytes();
            let n = raw.len().min(label_stride);
            label[..n].copy_from_slice(&raw[..n]);
            entries.push(Entry {
                path: base.join(path),
                label,
            });
        }
        if entries.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "listing {} holds no records",
                listing.display()
            )));
        }

        let num_records = if num_records == 0 {
            entries.len()
        } else {
            num_records.min(entries.len())
        };

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..entries.len()).collect();
        if shuffle {
            order.shuffle(&mut rng);
        }

        Ok(Self {
            entries,
            order,
            pos: 0,
            num_records,
            max_record_size,
            shuffle,
            rng,
            epoch: 0,
        })
    }

    fn read_entry(&self, index: usize) -> Result<Record> {
        let entry = &self.entries[index];
        let bytes = fs::read(&entry.path)?;
        if bytes.len() > self.max_record_size {
            return Err(Error::RecordTooLarge {
                path: entry.path.clone(),
                len: bytes.len(),
                max: self.max_record_size,
            });
        }
        Ok(Record {
            bytes,
            label: entry.label.clone(),
        })
    }
}

impl RecordReader for FileListReader {
    fn next_batch(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let take = max_records.min(self.num_records - self.pos);
        let mut records = Vec::with_capacity(take);
        // collect before advancing so an error leaves the cursor untouched
        for i in 0..take {
            records.push(self.read_entry(self.order[self.pos + i])?);
        }
        self.pos += take;
        if self.pos == self.num_records {
            self.epoch += 1;
            self.pos = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
            debug!(epoch = self.epoch, "file list epoch wrapped");
        }
        Ok(records)
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        Ok(())
    }

    fn num_records(&self) -> usize {
        self.num_records
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A listing of `count` small files, record `i` holding `i + 1` bytes
    /// of value `i` and labeled `i`
    fn write_listing(dir: &TempDir, count: usize) -> PathBuf {
        let mut listing = String::new();
        for i in 0..count {
            let name = format!("rec{i}.bin");
            fs::write(dir.path().join(&name), vec![i as u8; i + 1]).unwrap();
            listing.push_str(&format!("{name}\t{i}\n"));
        }
        let path = dir.path().join("index.txt");
        fs::write(&path, listing).unwrap();
        path
    }

    fn labels(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .map(|r| i64::from_le_bytes(r.label.clone().try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_reads_records_in_listing_order() {
        let dir = TempDir::new().unwrap();
        let listing = write_listing(&dir, 5);
        let mut reader = FileListReader::new(&listing, 0, 1024, 8, false, None).unwrap();

        assert_eq!(reader.num_records(), 5);
        let batch = reader.next_batch(3).unwrap();
        assert_eq!(labels(&batch), vec![0, 1, 2]);
        assert_eq!(batch[2].bytes, vec![2u8; 3]);
    }

    #[test]
    fn test_wraps_and_counts_epochs() {
        let dir = TempDir::new().unwrap();
        let listing = write_listing(&dir, 5);
        let mut reader = FileListReader::new(&listing, 0, 1024, 8, false, None).unwrap();

        assert_eq!(reader.next_batch(3).unwrap().len(), 3);
        let short = reader.next_batch(3).unwrap();
        assert_eq!(labels(&short), vec![3, 4]);
        assert_eq!(reader.epoch(), 1);
        assert_eq!(labels(&reader.next_batch(2).unwrap()), vec![0, 1]);
    }

    #[test]
    fn test_oversized_record_is_an_error_not_a_truncation() {
        let dir = TempDir::new().unwrap();
        let listing = write_listing(&dir, 4);

        // record 3 holds 4 bytes; cap everything at 3
        let mut reader = FileListReader::new(&listing, 0, 3, 8, false, None).unwrap();
        assert_eq!(reader.next_batch(3).unwrap().len(), 3);
        assert!(matches!(
            reader.next_batch(1),
            Err(Error::RecordTooLarge { len: 4, max: 3, .. })
        ));

        // cursor untouched: the failed position is retried, not skipped
        assert!(reader.next_batch(1).is_err());
    }

    #[test]
    fn test_shuffle_permutes_without_losing_records() {
        let dir = TempDir::new().unwrap();
        let listing = write_listing(&dir, 8);
        let mut reader = FileListReader::new(&listing, 0, 1024, 8, true, Some(11)).unwrap();

        let first: Vec<i64> = labels(&reader.next_batch(8).unwrap());
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());

        // the wrap reshuffles; a full epoch still covers every record
        let second: Vec<i64> = labels(&reader.next_batch(8).unwrap());
        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_num_records_clamps_to_listing() {
        let dir = TempDir::new().unwrap();
        let listing = write_listing(&dir, 3);
        let reader = FileListReader::new(&listing, 100, 1024, 8, false, None).unwrap();
        assert_eq!(reader.num_records(), 3);
    }

    #[test]
    fn test_empty_listing_fails_construction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.txt");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            FileListReader::new(&path, 0, 1024, 4, false, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_listing_fails_construction() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FileListReader::new(&dir.path().join("absent.txt"), 0, 1024, 4, false, None),
            Err(Error::Io(_))
        ));
    }
}
