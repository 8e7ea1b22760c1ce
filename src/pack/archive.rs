//! Normalizes a pack archive and decrypts its files in place.
//!
//! Encrypted packs carry `contents.json`: a 256-byte plaintext header followed by
//! an AES-256-CFB8 body keyed with the pack's content key. The decrypted body
//! lists a key for every encrypted file.
//!
//! 规范化资源包归档并原地解密其中的文件。
//!
//! 加密资源包带有 `contents.json`：256 字节的明文头部，之后是使用资源包内容密钥进行
//! AES-256-CFB8 加密的主体。解密后的主体列出了每个加密文件的密钥。

use crate::error::{ProxyError, Result};
use aes::Aes256;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

type Aes256Cfb8Dec = cfb8::Decryptor<Aes256>;

pub const MANIFEST_NAMES: [&str; 2] = ["manifest.json", "pack_manifest.json"];
pub const CONTENTS_NAME: &str = "contents.json";
pub const CONTENTS_HEADER_LEN: usize = 256;

/// Files that are never encrypted, even when the contents list names them.
pub const NEVER_ENCRYPTED: [&str; 4] = ["manifest.json", "pack_manifest.json", "pack_icon.png", "README.txt"];

#[derive(Debug, Deserialize)]
struct ContentsList {
    #[serde(default)]
    content: Vec<ContentEntry>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(default)]
    key: Option<String>,
}

/// What [`process_archive`] did to an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// The single top-level directory was moved to the root.
    pub hoisted: bool,
    /// Files decrypted with their own key, `contents.json` excluded.
    pub decrypted: Vec<String>,
}

/// The archive's files held in memory, keyed by path.
struct Entries(BTreeMap<String, Vec<u8>>);

impl Entries {
    fn read(path: &Path) -> Result<Self> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let mut files = BTreeMap::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().trim_start_matches('/').to_owned();
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry.read_to_end(&mut data)?;
            files.insert(name, data);
        }
        Ok(Entries(files))
    }

    fn write(&self, path: &Path) -> Result<()> {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(path)?));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.0 {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        writer.finish()?.flush()?;
        Ok(())
    }

    fn has_manifest(&self) -> bool {
        MANIFEST_NAMES.iter().any(|name| self.0.contains_key(*name))
    }

    fn top_level_dirs(&self) -> BTreeSet<&str> {
        self.0
            .keys()
            .filter_map(|name| name.split_once('/').map(|(dir, _)| dir))
            .collect()
    }

    /// Moves everything under `dir/` to the root, replacing clashing root files.
    fn hoist(&mut self, dir: &str) {
        let prefix = format!("{dir}/");
        let nested: Vec<String> = self
            .0
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        for name in nested {
            if let Some(data) = self.0.remove(&name) {
                self.0.insert(name[prefix.len()..].to_owned(), data);
            }
        }
    }
}

/// Normalizes the archive at `path`, then decrypts it when `content_key` is
/// given and the archive has a contents list. The archive is rewritten in place
/// only if something changed.
///
/// # Errors
///
/// - [`ProxyError::ArchiveStructureUnrecognized`] when no manifest can be found.
/// - [`ProxyError::PackDecryptFailure`] for bad keys or an undecryptable contents list.
///
/// 规范化位于 `path` 的归档；若给出 `content_key` 且归档中带有内容列表，则进行解密。
/// 仅在有改动时才原地重写归档。
pub fn process_archive(path: &Path, content_key: Option<&[u8]>) -> Result<ArchiveReport> {
    let mut entries = Entries::read(path)?;
    let mut report = ArchiveReport::default();

    if !entries.has_manifest() {
        let dirs: Vec<String> = entries.top_level_dirs().into_iter().map(str::to_owned).collect();
        let [dir] = dirs.as_slice() else {
            return Err(ProxyError::ArchiveStructureUnrecognized);
        };
        entries.hoist(dir);
        if !entries.has_manifest() {
            return Err(ProxyError::ArchiveStructureUnrecognized);
        }
        debug!(dir = %dir, "hoisted nested pack directory");
        report.hoisted = true;
    }

    let key = content_key.filter(|key| !key.is_empty());
    let plain = match (key, entries.0.get(CONTENTS_NAME)) {
        (Some(key), Some(contents)) => Some(decrypt_contents(key, contents)?),
        _ => None,
    };
    let decrypted_contents = plain.is_some();
    if let Some(plain) = plain {
        let list: ContentsList = serde_json::from_slice(&plain)
            .map_err(|e| ProxyError::PackDecryptFailure(format!("contents list: {e}")))?;
        entries.0.insert(CONTENTS_NAME.to_owned(), plain);

        for entry in list.content {
            let Some(file_key) = entry.key else {
                continue;
            };
            let name = entry.path.trim_start_matches('/');
            if NEVER_ENCRYPTED.contains(&name) {
                continue;
            }
            let Some(data) = entries.0.get_mut(name) else {
                continue;
            };
            cfb8_decrypt(&latin1_bytes(&file_key)?, data)?;
            trace!(file = name, "decrypted pack file");
            report.decrypted.push(name.to_owned());
        }
    }

    if report.hoisted || decrypted_contents {
        entries.write(path)?;
    }
    Ok(report)
}

fn decrypt_contents(key: &[u8], contents: &[u8]) -> Result<Vec<u8>> {
    if contents.len() < CONTENTS_HEADER_LEN {
        return Err(ProxyError::PackDecryptFailure(format!(
            "contents list is {} bytes, shorter than its header",
            contents.len()
        )));
    }
    let mut body = contents[CONTENTS_HEADER_LEN..].to_vec();
    cfb8_decrypt(key, &mut body)?;
    Ok(body)
}

/// AES-256-CFB8 with the first 16 key bytes as IV.
///
/// 使用密钥前 16 字节作为 IV 的 AES-256-CFB8。
pub fn cfb8_decrypt(key: &[u8], data: &mut [u8]) -> Result<()> {
    if key.len() != 32 {
        return Err(ProxyError::PackDecryptFailure(format!(
            "key must be 32 bytes, got {}",
            key.len()
        )));
    }
    let cipher = Aes256Cfb8Dec::new_from_slices(key, &key[..16])
        .map_err(|e| ProxyError::PackDecryptFailure(e.to_string()))?;
    cipher.decrypt(data);
    Ok(())
}

/// Keys in the contents list are ISO-8859-1 text.
fn latin1_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| ProxyError::PackDecryptFailure("file key is not ISO-8859-1".into()))
        })
        .collect()
}
