//! Forward-only ZIP writer
//!
//! Every entry is written once, front to back, straight into an
//! [`ArchiveSink`]. Sizes and CRCs are not known when a local header goes
//! out, so file entries set the data-descriptor flag and carry their sizes
//! after the data. The central directory is kept in memory (one small
//! record per entry) and written by [`ZipStreamWriter::finish`].
//!
//! Entry sizes are unknown up front, so every file entry is framed as
//! zip64: its local header carries a zip64 extra field with zeroed sizes
//! and its data descriptor uses 8-byte sizes. The central directory and
//! trailer only fall back to zip64 records when a value no longer fits
//! the classic fields.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;
use tokio::sync::mpsc;

use crate::types::CourierError;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_EXTRA_TAG: u16 = 0x0001;

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
// Upper byte 3: unix, so the mode bits in the external attributes apply.
const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;

const DIR_ATTRS: u32 = (0o40755 << 16) | 0x10;
const FILE_ATTRS: u32 = 0o100644 << 16;

// Local zip64 extra: tag, length, then zeroed uncompressed and compressed sizes
const LOCAL_ZIP64_EXTRA_LEN: usize = 4 + 16;
const ZIP64_DESCRIPTOR_LEN: usize = 24;

const U32_MARK: u32 = u32::MAX;
const U16_MARK: u16 = u16::MAX;

/// Errors from the archive writer or its output
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("client disconnected")]
    ClientGone,
}

impl From<ArchiveError> for CourierError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => CourierError::Archive(e.to_string()),
            ArchiveError::ClientGone => CourierError::ClientGone,
        }
    }
}

/// Destination for archive bytes
#[async_trait]
pub trait ArchiveSink: Send {
    async fn write(&mut self, bytes: Bytes) -> Result<(), ArchiveError>;
}

/// Response channel. A closed receiver means the client went away.
#[async_trait]
impl ArchiveSink for mpsc::Sender<Result<Bytes, CourierError>> {
    async fn write(&mut self, bytes: Bytes) -> Result<(), ArchiveError> {
        self.send(Ok(bytes))
            .await
            .map_err(|_| ArchiveError::ClientGone)
    }
}

#[async_trait]
impl ArchiveSink for Vec<u8> {
    async fn write(&mut self, bytes: Bytes) -> Result<(), ArchiveError> {
        self.extend_from_slice(&bytes);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CentralRecord {
    name: String,
    is_dir: bool,
    method: u16,
    flags: u16,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    offset: u64,
    dos_time: u16,
    dos_date: u16,
}

struct OpenEntry {
    record: CentralRecord,
    encoder: DeflateEncoder<Vec<u8>>,
    hasher: crc32fast::Hasher,
}

/// Summary of a closed file entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    pub uncompressed: u64,
    pub compressed: u64,
    pub crc: u32,
}

/// Streaming ZIP writer over an [`ArchiveSink`]
pub struct ZipStreamWriter<S> {
    sink: S,
    offset: u64,
    records: Vec<CentralRecord>,
    open: Option<OpenEntry>,
}

impl<S: ArchiveSink> ZipStreamWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            offset: 0,
            records: Vec::new(),
            open: None,
        }
    }

    /// Closed entries, directories included
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    pub fn has_open_entry(&self) -> bool {
        self.open.is_some()
    }

    /// Write a zero-length directory entry. A trailing `/` is added if missing.
    pub async fn add_directory(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.close_open_entry().await?;

        let mut name = clean_name(name);
        if !name.ends_with('/') {
            name.push('/');
        }

        let (dos_time, dos_date) = dos_datetime(Utc::now());
        let record = CentralRecord {
            name,
            is_dir: true,
            method: METHOD_STORED,
            flags: FLAG_UTF8,
            crc: 0,
            compressed: 0,
            uncompressed: 0,
            offset: self.offset,
            dos_time,
            dos_date,
        };

        let header = local_header(&record);
        self.emit(header).await?;
        self.records.push(record);
        Ok(())
    }

    /// Begin a deflated file entry. Any entry still open is closed first.
    pub async fn start_file(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.close_open_entry().await?;

        let (dos_time, dos_date) = dos_datetime(Utc::now());
        let record = CentralRecord {
            name: clean_name(name),
            is_dir: false,
            method: METHOD_DEFLATED,
            flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
            crc: 0,
            compressed: 0,
            uncompressed: 0,
            offset: self.offset,
            dos_time,
            dos_date,
        };

        let header = local_header(&record);
        self.emit(header).await?;
        self.open = Some(OpenEntry {
            record,
            encoder: DeflateEncoder::new(Vec::new(), Compression::best()),
            hasher: crc32fast::Hasher::new(),
        });
        Ok(())
    }

    /// Compress `data` into the open entry and forward whatever the encoder
    /// has produced
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), ArchiveError> {
        let entry = self.open.as_mut().ok_or_else(|| {
            ArchiveError::Io(std::io::Error::other("no open archive entry"))
        })?;

        entry.hasher.update(data);
        entry.record.uncompressed += data.len() as u64;
        entry.encoder.write_all(data)?;

        let out = std::mem::take(entry.encoder.get_mut());
        if !out.is_empty() {
            entry.record.compressed += out.len() as u64;
            self.emit(Bytes::from(out)).await?;
        }
        Ok(())
    }

    /// Flush the compressor and write the data descriptor
    pub async fn finish_file(&mut self) -> Result<EntrySummary, ArchiveError> {
        let OpenEntry {
            mut record,
            encoder,
            hasher,
        } = self.open.take().ok_or_else(|| {
            ArchiveError::Io(std::io::Error::other("no open archive entry"))
        })?;

        let tail = encoder.finish()?;
        if !tail.is_empty() {
            record.compressed += tail.len() as u64;
            self.emit(Bytes::from(tail)).await?;
        }
        record.crc = hasher.finalize();

        let descriptor = data_descriptor(&record);
        self.emit(descriptor).await?;

        let summary = EntrySummary {
            uncompressed: record.uncompressed,
            compressed: record.compressed,
            crc: record.crc,
        };
        self.records.push(record);
        Ok(summary)
    }

    /// Write the central directory and trailer, returning the sink
    pub async fn finish(mut self) -> Result<S, ArchiveError> {
        self.close_open_entry().await?;

        let cd_offset = self.offset;
        let mut directory = BytesMut::new();
        for record in &self.records {
            put_central_header(&mut directory, record);
        }
        let cd_size = directory.len() as u64;
        self.emit(directory.freeze()).await?;

        let trailer = end_of_central_directory(self.records.len() as u64, cd_size, cd_offset);
        self.emit(trailer).await?;

        Ok(self.sink)
    }

    async fn close_open_entry(&mut self) -> Result<(), ArchiveError> {
        if self.open.is_some() {
            self.finish_file().await?;
        }
        Ok(())
    }

    async fn emit(&mut self, bytes: Bytes) -> Result<(), ArchiveError> {
        let len = bytes.len() as u64;
        self.sink.write(bytes).await?;
        self.offset += len;
        Ok(())
    }
}

fn clean_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// MS-DOS `(time, date)` pair. Years outside 1980..=2107 are clamped.
pub fn dos_datetime(at: DateTime<Utc>) -> (u16, u16) {
    let year = at.year().clamp(1980, 2107) as u16;
    let date = ((year - 1980) << 9) | ((at.month() as u16) << 5) | at.day() as u16;
    let time = ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
    (time, date)
}

fn local_header(record: &CentralRecord) -> Bytes {
    let name = record.name.as_bytes();
    let mut buf = BytesMut::with_capacity(30 + name.len() + LOCAL_ZIP64_EXTRA_LEN);
    buf.put_u32_le(LOCAL_HEADER_SIG);
    buf.put_u16_le(entry_version(record));
    buf.put_u16_le(record.flags);
    buf.put_u16_le(record.method);
    buf.put_u16_le(record.dos_time);
    buf.put_u16_le(record.dos_date);
    buf.put_u32_le(0);
    if record.is_dir {
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        buf.put_u16_le(name.len() as u16);
        buf.put_u16_le(0);
        buf.put_slice(name);
    } else {
        // real sizes follow in the 8-byte data descriptor
        buf.put_u32_le(U32_MARK);
        buf.put_u32_le(U32_MARK);
        buf.put_u16_le(name.len() as u16);
        buf.put_u16_le(LOCAL_ZIP64_EXTRA_LEN as u16);
        buf.put_slice(name);
        buf.put_u16_le(ZIP64_EXTRA_TAG);
        buf.put_u16_le(16);
        buf.put_u64_le(0);
        buf.put_u64_le(0);
    }
    buf.freeze()
}

fn data_descriptor(record: &CentralRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(ZIP64_DESCRIPTOR_LEN);
    buf.put_u32_le(DATA_DESCRIPTOR_SIG);
    buf.put_u32_le(record.crc);
    buf.put_u64_le(record.compressed);
    buf.put_u64_le(record.uncompressed);
    buf.freeze()
}

fn entry_version(record: &CentralRecord) -> u16 {
    if record.is_dir {
        VERSION_DEFAULT
    } else {
        VERSION_ZIP64
    }
}

/// Zip64 extra field for the central directory. Only the fields whose
/// classic slot holds `0xFFFFFFFF` are present, in the fixed order
/// uncompressed, compressed, offset.
fn zip64_extra(record: &CentralRecord) -> Option<Vec<u8>> {
    let mut values = Vec::with_capacity(3);
    if record.uncompressed >= U32_MARK as u64 {
        values.push(record.uncompressed);
    }
    if record.compressed >= U32_MARK as u64 {
        values.push(record.compressed);
    }
    if record.offset >= U32_MARK as u64 {
        values.push(record.offset);
    }
    if values.is_empty() {
        return None;
    }

    let mut extra = Vec::with_capacity(4 + values.len() * 8);
    extra.put_u16_le(ZIP64_EXTRA_TAG);
    extra.put_u16_le((values.len() * 8) as u16);
    for value in values {
        extra.put_u64_le(value);
    }
    Some(extra)
}

fn clamp_u32(value: u64) -> u32 {
    if value >= U32_MARK as u64 {
        U32_MARK
    } else {
        value as u32
    }
}

fn put_central_header(buf: &mut BytesMut, record: &CentralRecord) {
    let name = record.name.as_bytes();
    let extra = zip64_extra(record);
    let version_needed = if extra.is_some() {
        VERSION_ZIP64
    } else {
        entry_version(record)
    };

    buf.put_u32_le(CENTRAL_HEADER_SIG);
    buf.put_u16_le(VERSION_MADE_BY);
    buf.put_u16_le(version_needed);
    buf.put_u16_le(record.flags);
    buf.put_u16_le(record.method);
    buf.put_u16_le(record.dos_time);
    buf.put_u16_le(record.dos_date);
    buf.put_u32_le(record.crc);
    buf.put_u32_le(clamp_u32(record.compressed));
    buf.put_u32_le(clamp_u32(record.uncompressed));
    buf.put_u16_le(name.len() as u16);
    buf.put_u16_le(extra.as_ref().map_or(0, |e| e.len() as u16));
    buf.put_u16_le(0); // comment
    buf.put_u16_le(0); // disk number start
    buf.put_u16_le(0); // internal attributes
    buf.put_u32_le(if record.is_dir { DIR_ATTRS } else { FILE_ATTRS });
    buf.put_u32_le(clamp_u32(record.offset));
    buf.put_slice(name);
    if let Some(extra) = extra {
        buf.put_slice(&extra);
    }
}

fn end_of_central_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Bytes {
    let zip64 = entries >= U16_MARK as u64
        || cd_size >= U32_MARK as u64
        || cd_offset >= U32_MARK as u64;

    let mut buf = BytesMut::with_capacity(98);
    if zip64 {
        let record_offset = cd_offset + cd_size;

        buf.put_u32_le(ZIP64_EOCD_SIG);
        buf.put_u64_le(44); // record size, excluding the leading 12 bytes
        buf.put_u16_le(VERSION_MADE_BY);
        buf.put_u16_le(VERSION_ZIP64);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        buf.put_u64_le(entries);
        buf.put_u64_le(entries);
        buf.put_u64_le(cd_size);
        buf.put_u64_le(cd_offset);

        buf.put_u32_le(ZIP64_LOCATOR_SIG);
        buf.put_u32_le(0);
        buf.put_u64_le(record_offset);
        buf.put_u32_le(1);
    }

    let entries16 = if entries >= U16_MARK as u64 {
        U16_MARK
    } else {
        entries as u16
    };
    buf.put_u32_le(EOCD_SIG);
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    buf.put_u16_le(entries16);
    buf.put_u16_le(entries16);
    buf.put_u32_le(clamp_u32(cd_size));
    buf.put_u32_le(clamp_u32(cd_offset));
    buf.put_u16_le(0);
    buf.freeze()
}
