// Buffered byte I/O (spec §4.1): a writer abstraction that can append or
// write at an absolute offset, and a chunk-buffered random-access reader.
// Both are implemented once over a real file and once over an in-memory
// buffer so the same tree-rebuild routine (§4.4) can target either.

mod binary;

pub use binary::{BinaryReader, BinaryWriter, MemoryReader, MemoryWriter};

use crate::error::Result;
use async_trait::async_trait;

/// A sink that can append sequentially or patch at an absolute offset.
/// The tree rebuild routine drives this to "reserve header, stream tree,
/// patch header" without knowing whether the sink is a file or a buffer.
#[async_trait]
pub trait WriteSink: Send {
    async fn append(&mut self, bytes: &[u8]) -> Result<u64>;
    async fn write_at(&mut self, bytes: &[u8], position: u64) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random-access source with chunk buffering.
#[async_trait]
pub trait ReadSource: Send {
    async fn go(&mut self, position: u64) -> Result<()>;
    async fn get(&mut self, n: usize) -> Result<Vec<u8>>;
    async fn get_uint32(&mut self) -> Result<u32>;
    fn position(&self) -> u64;
}
