// Concrete BinaryWriter/BinaryReader implementations: one file-backed, one
// buffer-backed, both behind the `WriteSink`/`ReadSource` traits in
// `io::mod`.

use super::{ReadSource, WriteSink};
use crate::error::{IndexError, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Default chunk size for the reader's internal buffer (spec §4.1).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// File-backed writer/reader pair, opened once and shared by position.
pub struct BinaryWriter {
    file: File,
    len: u64,
}

impl BinaryWriter {
    pub async fn create(file: File) -> Result<Self> {
        let len = file.metadata().await?.len();
        Ok(Self { file, len })
    }
}

#[async_trait]
impl WriteSink for BinaryWriter {
    async fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let pos = self.len;
        self.file.seek(SeekFrom::Start(pos)).await?;
        self.file.write_all(bytes).await?;
        self.len += bytes.len() as u64;
        Ok(pos)
    }

    async fn write_at(&mut self, bytes: &[u8], position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.write_all(bytes).await?;
        self.len = self.len.max(position + bytes.len() as u64);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

pub struct BinaryReader {
    file: File,
    chunk_size: usize,
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    buf_start: u64,
    /// Current logical read cursor.
    cursor: u64,
}

impl BinaryReader {
    pub fn new(file: File) -> Self {
        Self::with_chunk_size(file, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(file: File, chunk_size: usize) -> Self {
        Self { file, chunk_size, buf: Vec::new(), buf_start: 0, cursor: 0 }
    }

    async fn ensure_buffered(&mut self, n: usize) -> Result<()> {
        let have_start = self.cursor >= self.buf_start
            && self.cursor <= self.buf_start + self.buf.len() as u64;
        let end_in_buf = (self.cursor - self.buf_start.min(self.cursor)) as usize + n
            <= self.buf.len();
        if have_start && end_in_buf {
            return Ok(());
        }
        let read_len = n.max(self.chunk_size);
        self.file.seek(SeekFrom::Start(self.cursor)).await?;
        let mut tmp = vec![0u8; read_len];
        let mut total = 0;
        loop {
            let read = self.file.read(&mut tmp[total..]).await?;
            if read == 0 {
                break;
            }
            total += read;
            if total >= n {
                break;
            }
        }
        tmp.truncate(total);
        if total < n {
            return Err(IndexError::Eof);
        }
        self.buf = tmp;
        self.buf_start = self.cursor;
        Ok(())
    }
}

#[async_trait]
impl ReadSource for BinaryReader {
    async fn go(&mut self, position: u64) -> Result<()> {
        self.cursor = position;
        Ok(())
    }

    async fn get(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure_buffered(n).await?;
        let offset = (self.cursor - self.buf_start) as usize;
        let slice = self.buf.get(offset..offset + n).ok_or(IndexError::Eof)?;
        let out = slice.to_vec();
        self.cursor += n as u64;
        Ok(out)
    }

    async fn get_uint32(&mut self) -> Result<u32> {
        let bytes = self.get(4).await?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn position(&self) -> u64 {
        self.cursor
    }
}

/// In-memory writer used by the bulk builder when constructing a tree that
/// will be held in RAM (small indexes, tests) instead of streamed to disk.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub buf: Vec<u8>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

#[async_trait]
impl WriteSink for MemoryWriter {
    async fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let pos = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        Ok(pos)
    }

    async fn write_at(&mut self, bytes: &[u8], position: u64) -> Result<()> {
        let end = position as usize + bytes.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[position as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buf.len() as u64
    }
}

/// Random-access reader over an in-memory buffer, for tests and for
/// re-reading a just-written `MemoryWriter` without a round trip to disk.
pub struct MemoryReader<'a> {
    buf: &'a [u8],
    cursor: u64,
}

impl<'a> MemoryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }
}

#[async_trait]
impl<'a> ReadSource for MemoryReader<'a> {
    async fn go(&mut self, position: u64) -> Result<()> {
        self.cursor = position;
        Ok(())
    }

    async fn get(&mut self, n: usize) -> Result<Vec<u8>> {
        let start = self.cursor as usize;
        let slice = self.buf.get(start..start + n).ok_or(IndexError::Eof)?;
        self.cursor += n as u64;
        Ok(slice.to_vec())
    }

    async fn get_uint32(&mut self) -> Result<u32> {
        let bytes = self.get(4).await?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn position(&self) -> u64 {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_writer_append_and_patch() {
        let mut w = MemoryWriter::new();
        let p1 = w.append(b"hello").await.unwrap();
        assert_eq!(p1, 0);
        let p2 = w.append(b"world").await.unwrap();
        assert_eq!(p2, 5);
        w.write_at(b"HE", 0).await.unwrap();
        assert_eq!(&w.buf, b"HElloworld");
    }

    #[tokio::test]
    async fn memory_reader_reads_and_seeks() {
        let data = b"0123456789".to_vec();
        let mut r = MemoryReader::new(&data);
        let a = r.get(3).await.unwrap();
        assert_eq!(a, b"012");
        r.go(7).await.unwrap();
        let b = r.get(3).await.unwrap();
        assert_eq!(b, b"789");
    }

    #[tokio::test]
    async fn memory_reader_past_end_is_eof() {
        let data = b"abc".to_vec();
        let mut r = MemoryReader::new(&data);
        let err = r.get(10).await.unwrap_err();
        assert!(matches!(err, IndexError::Eof));
    }
}
