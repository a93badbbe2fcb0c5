//! # Transaction log
//!
//! The durable root of a journal: an append-only file of [`TxRec`]
//! checkpoints, one per successful commit. The most recent valid record
//! defines the committed state every new reader snapshot starts from.
//!
//! ## On-disk layout
//!
//! ```text
//! [MAGIC "JTXL"][VERSION_LE u32][HEADER_CRC32_LE]
//! [REC_LEN_LE u32][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE u32][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! The record CRC covers `len || bytes`. Every record stores the file
//! offset of its predecessor (`prev_tx_address`, `0` for the first), so
//! history can be walked backwards without an index.
//!
//! A trailing record that is short or fails its checksum is the remains of
//! an interrupted commit: readers stop before it, and a writer truncates it
//! away when opening the log.
//!
//! Scanning is incremental. The log caches the offset it has validated up
//! to and the latest record found, so `latest()` only decodes records
//! appended since the previous call.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError, Reader};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// File magic.
pub const MAGIC: [u8; 4] = *b"JTXL";

/// Current format version.
pub const VERSION: u32 = 1;

/// Size of the checksummed header; the first record starts here.
pub const HEADER_SIZE: u64 = 12;

/// Upper bound on one encoded record.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Errors returned by tx log operations.
#[derive(Debug, Error)]
pub enum TxLogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The log header is missing, damaged or from another format version.
    #[error("invalid tx log header: {0}")]
    InvalidHeader(String),

    /// A record addressed by a back-pointer is damaged.
    #[error("corrupt tx record at offset {0}")]
    Corrupt(u64),

    #[error("tx record of {0} bytes exceeds limit")]
    RecordTooLarge(usize),

    #[error("tx log is read-only")]
    ReadOnly,

    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// TxRec
// ------------------------------------------------------------------------------------------------

/// One commit checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRec {
    /// File offset of the previous record, `0` for the first.
    pub prev_tx_address: u64,

    /// Wall clock at commit, epoch milliseconds.
    pub commit_timestamp: i64,

    /// Packed [`RowId`](crate::tx::RowId) of the last partition and its row count.
    pub journal_max_row_id: u64,

    /// Timestamp of the last appended record.
    pub last_partition_timestamp: i64,

    /// Directory name of the last partition.
    pub last_partition_name: String,

    /// Dictionary size per symbol table.
    pub symbol_key_counts: Vec<u64>,

    /// Committed dedup key-block offset per symbol table.
    pub symbol_index_pointers: Vec<u64>,

    /// Committed inverted-index key-block offset per symbol column of the
    /// last partition (`0` where the column is not indexed).
    pub index_pointers: Vec<u64>,
}

impl Encode for TxRec {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.prev_tx_address.encode_to(buf)?;
        self.commit_timestamp.encode_to(buf)?;
        self.journal_max_row_id.encode_to(buf)?;
        self.last_partition_timestamp.encode_to(buf)?;
        self.last_partition_name.encode_to(buf)?;
        encoding::encode_vec(&self.symbol_key_counts, buf)?;
        encoding::encode_vec(&self.symbol_index_pointers, buf)?;
        encoding::encode_vec(&self.index_pointers, buf)?;
        Ok(())
    }
}

impl Decode for TxRec {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut r = Reader::new(buf);
        let rec = TxRec {
            prev_tx_address: r.read()?,
            commit_timestamp: r.read()?,
            journal_max_row_id: r.read()?,
            last_partition_timestamp: r.read()?,
            last_partition_name: r.read()?,
            symbol_key_counts: r.read_vec()?,
            symbol_index_pointers: r.read_vec()?,
            index_pointers: r.read_vec()?,
        };
        Ok((rec, r.position()))
    }
}

// ------------------------------------------------------------------------------------------------
// TxLog
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScanState {
    /// End of the last valid record seen.
    valid_end: u64,
    /// Address and content of the newest valid record.
    latest: Option<(u64, TxRec)>,
}

/// Append-only, CRC-protected, back-linked commit log.
#[derive(Debug)]
pub struct TxLog {
    path: PathBuf,
    writable: bool,
    file: Mutex<File>,
    scan: Mutex<ScanState>,
    #[cfg(test)]
    fail_sync: AtomicBool,
}

impl TxLog {
    /// Opens the log at `path`.
    ///
    /// A writable log is created (with a fresh header) if missing, and any
    /// torn trailing record is truncated. A read-only open requires the file
    /// to exist.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self, TxLogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?
        } else {
            OpenOptions::new().read(true).open(&path)?
        };

        if file.metadata()?.len() == 0 {
            if !writable {
                return Err(TxLogError::InvalidHeader("empty tx log".into()));
            }
            write_header(&mut file)?;
            info!(path = %path.display(), "created tx log");
        } else {
            check_header(&mut file)?;
        }

        let log = Self {
            path,
            writable,
            file: Mutex::new(file),
            scan: Mutex::new(ScanState {
                valid_end: HEADER_SIZE,
                latest: None,
            }),
            #[cfg(test)]
            fail_sync: AtomicBool::new(false),
        };

        log.scan_forward()?;

        if writable {
            let valid_end = log.lock_scan()?.valid_end;
            let file = log.lock_file()?;
            let len = file.metadata()?.len();
            if len > valid_end {
                warn!(
                    path = %log.path.display(),
                    discarded = len - valid_end,
                    "truncating torn tx log tail"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
        }

        debug!(path = %log.path.display(), writable, "opened tx log");
        Ok(log)
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest valid record and its address, or `None` for an empty log.
    pub fn latest(&self) -> Result<Option<(u64, TxRec)>, TxLogError> {
        self.scan_forward()?;
        Ok(self.lock_scan()?.latest.clone())
    }

    /// Appends `rec` after the newest record, linking `prev_tx_address`.
    ///
    /// Returns the address of the new record. The file is synced before
    /// returning; a record is only durable once this call succeeds.
    ///
    /// # Errors
    ///
    /// [`TxLogError::ReadOnly`] on a read-only log,
    /// [`TxLogError::RecordTooLarge`] past [`MAX_RECORD_SIZE`], and
    /// [`TxLogError::Io`] when the write or sync fails. On an I/O failure
    /// the file is cut back to the previous end, so a reopen never adopts
    /// a record whose commit was reported as failed.
    pub fn append(&self, rec: &mut TxRec) -> Result<u64, TxLogError> {
        if !self.writable {
            return Err(TxLogError::ReadOnly);
        }
        self.scan_forward()?;

        let mut scan = self.lock_scan()?;
        rec.prev_tx_address = scan.latest.as_ref().map_or(0, |(addr, _)| *addr);

        let bytes = encoding::encode_to_vec(rec)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(TxLogError::RecordTooLarge(bytes.len()));
        }
        let len = bytes.len() as u32;

        let mut hasher = Crc32::new();
        hasher.update(&len.to_le_bytes());
        hasher.update(&bytes);
        let checksum = hasher.finalize();

        let mut frame = Vec::with_capacity(bytes.len() + 2 * U32_SIZE);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);
        frame.extend_from_slice(&checksum.to_le_bytes());

        let address = scan.valid_end;
        {
            let mut file = self.lock_file()?;
            if let Err(e) = self.write_frame(&mut file, address, &frame) {
                warn!(address, error = %e, "tx record append failed, discarding frame");
                if let Err(cut) = file.set_len(address).and_then(|_| file.sync_all()) {
                    error!(address, error = %cut, "failed to discard partial tx record");
                }
                return Err(e);
            }
        }

        scan.valid_end = address + frame.len() as u64;
        scan.latest = Some((address, rec.clone()));

        trace!(address, len, "appended tx record");
        Ok(address)
    }

    fn write_frame(&self, file: &mut File, address: u64, frame: &[u8]) -> Result<(), TxLogError> {
        file.seek(SeekFrom::Start(address))?;
        file.write_all(frame)?;
        self.injected_sync_failure()?;
        file.sync_all()?;
        Ok(())
    }

    #[cfg(test)]
    fn injected_sync_failure(&self) -> Result<(), TxLogError> {
        if self.fail_sync.swap(false, Ordering::SeqCst) {
            return Err(TxLogError::Io(io::Error::other("injected tx log sync failure")));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn injected_sync_failure(&self) -> Result<(), TxLogError> {
        Ok(())
    }

    /// Makes the next [`append`](Self::append) fail after its frame is
    /// written but before it is synced.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&self) {
        self.fail_sync.store(true, Ordering::SeqCst);
    }

    /// Reads the record at `address`.
    ///
    /// # Errors
    ///
    /// [`TxLogError::Corrupt`] when the frame at `address` is incomplete or
    /// fails its checksum.
    pub fn read_at(&self, address: u64) -> Result<TxRec, TxLogError> {
        let mut file = self.lock_file()?;
        let file_len = file.metadata()?.len();
        match read_frame(&mut file, address, file_len)? {
            Some((rec, _)) => Ok(rec),
            None => Err(TxLogError::Corrupt(address)),
        }
    }

    /// All records, newest first, following back-pointers.
    pub fn history(&self) -> Result<Vec<(u64, TxRec)>, TxLogError> {
        let mut out = Vec::new();
        let Some((mut address, mut rec)) = self.latest()? else {
            return Ok(out);
        };
        loop {
            let prev = rec.prev_tx_address;
            out.push((address, rec));
            if prev == 0 {
                break;
            }
            if prev >= address {
                return Err(TxLogError::Corrupt(prev));
            }
            address = prev;
            rec = self.read_at(address)?;
        }
        Ok(out)
    }

    /// Validates records appended past the cached scan position.
    fn scan_forward(&self) -> Result<(), TxLogError> {
        let mut scan = self.lock_scan()?;
        let mut file = self.lock_file()?;
        let file_len = file.metadata()?.len();

        while scan.valid_end < file_len {
            let address = scan.valid_end;
            match read_frame(&mut file, address, file_len)? {
                Some((rec, next)) => {
                    scan.valid_end = next;
                    scan.latest = Some((address, rec));
                }
                None => {
                    trace!(address, "tx log scan stopped at torn record");
                    break;
                }
            }
        }
        Ok(())
    }

    fn lock_file(&self) -> Result<MutexGuard<'_, File>, TxLogError> {
        self.file
            .lock()
            .map_err(|_| TxLogError::Internal("tx log file lock poisoned".into()))
    }

    fn lock_scan(&self) -> Result<MutexGuard<'_, ScanState>, TxLogError> {
        self.scan
            .lock()
            .map_err(|_| TxLogError::Internal("tx log scan lock poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// Framing helpers
// ------------------------------------------------------------------------------------------------

fn header_bytes() -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&MAGIC);
    out[4..].copy_from_slice(&VERSION.to_le_bytes());
    out
}

fn write_header(file: &mut File) -> Result<(), TxLogError> {
    let header = header_bytes();
    let mut hasher = Crc32::new();
    hasher.update(&header);
    let checksum = hasher.finalize();

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.write_all(&checksum.to_le_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn check_header(file: &mut File) -> Result<(), TxLogError> {
    let mut header = [0u8; 8];
    let mut checksum = [0u8; U32_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)
        .and_then(|_| file.read_exact(&mut checksum))
        .map_err(|_| TxLogError::InvalidHeader("truncated header".into()))?;

    let mut hasher = Crc32::new();
    hasher.update(&header);
    if hasher.finalize() != u32::from_le_bytes(checksum) {
        return Err(TxLogError::InvalidHeader("header checksum mismatch".into()));
    }
    if header[..4] != MAGIC {
        return Err(TxLogError::InvalidHeader("bad magic".into()));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(TxLogError::InvalidHeader(format!("unsupported version {version}")));
    }
    Ok(())
}

/// Reads and verifies the frame at `address`.
///
/// Returns `None` when the frame is incomplete or fails its checksum,
/// otherwise the record and the offset just past it.
fn read_frame(file: &mut File, address: u64, file_len: u64) -> Result<Option<(TxRec, u64)>, TxLogError> {
    if address + U32_SIZE as u64 > file_len {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(address))?;

    let mut len_bytes = [0u8; U32_SIZE];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_RECORD_SIZE {
        return Ok(None);
    }

    let end = address + (2 * U32_SIZE + len) as u64;
    if end > file_len {
        return Ok(None);
    }

    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)?;
    let mut checksum = [0u8; U32_SIZE];
    file.read_exact(&mut checksum)?;

    let mut hasher = Crc32::new();
    hasher.update(&len_bytes);
    hasher.update(&bytes);
    if hasher.finalize() != u32::from_le_bytes(checksum) {
        warn!(address, "tx record checksum mismatch");
        return Ok(None);
    }

    let (rec, _) = encoding::decode_from_slice::<TxRec>(&bytes)?;
    Ok(Some((rec, end)))
}
