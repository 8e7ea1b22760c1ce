//! One pack download in progress.
//!
//! 一个正在进行中的资源包下载。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Chunks gathered for one announced pack, finalized once and then dropped.
///
/// 为一个已公布资源包收集的数据块，最终处理一次后即丢弃。
#[derive(Debug)]
pub struct PackTransfer {
    pack_id: Uuid,
    content_key: Option<Vec<u8>>,
    chunks: BTreeMap<u64, Vec<u8>>,
    source_url: Option<String>,
    archive_path: PathBuf,
}

impl PackTransfer {
    /// Empty `content_key` or `source_url` strings mean "absent".
    pub fn new(pack_id: Uuid, content_key: &str, source_url: &str, packs_dir: &Path) -> Self {
        Self {
            pack_id,
            content_key: (!content_key.is_empty()).then(|| content_key.as_bytes().to_vec()),
            chunks: BTreeMap::new(),
            source_url: (!source_url.is_empty()).then(|| source_url.to_owned()),
            archive_path: packs_dir.join(format!("{pack_id}.zip")),
        }
    }

    pub fn pack_id(&self) -> Uuid {
        self.pack_id
    }

    pub fn content_key(&self) -> Option<&[u8]> {
        self.content_key.as_deref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Stores a chunk. A repeated offset replaces the earlier bytes.
    pub fn add_chunk(&mut self, offset: u64, bytes: Vec<u8>) {
        self.chunks.insert(offset, bytes);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Nothing to finalize: no chunks arrived and there is no URL to fetch.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.source_url.is_none()
    }

    /// Writes the chunks to the archive path in offset order, freeing each
    /// buffer as soon as it is on disk.
    ///
    /// 按偏移顺序将数据块写入归档路径，每个缓冲区写入磁盘后立即释放。
    pub fn write_chunks(&mut self) -> io::Result<u64> {
        let mut out = BufWriter::new(File::create(&self.archive_path)?);
        let mut written = 0u64;
        for (_, chunk) in std::mem::take(&mut self.chunks) {
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        out.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_written_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut transfer = PackTransfer::new(Uuid::new_v4(), "", "", dir.path());
        transfer.add_chunk(4, b"world".to_vec());
        transfer.add_chunk(0, b"hell".to_vec());

        assert_eq!(transfer.write_chunks().unwrap(), 9);
        assert_eq!(std::fs::read(transfer.archive_path()).unwrap(), b"hellworld");
        assert_eq!(transfer.chunk_count(), 0);
    }

    #[test]
    fn blank_strings_are_absent() {
        let transfer = PackTransfer::new(Uuid::nil(), "", "", Path::new("packs"));
        assert!(transfer.content_key().is_none());
        assert!(transfer.source_url().is_none());
        assert!(transfer.is_empty());
        assert_eq!(
            transfer.archive_path(),
            Path::new("packs/00000000-0000-0000-0000-000000000000.zip")
        );
    }
}
