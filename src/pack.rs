//! Resource pack capture: chunk reassembly, direct downloads and per-file
//! decryption of the stored archives.
//!
//! 资源包捕获：数据块重组、直接下载以及对已存储归档的逐文件解密。

pub mod archive;
pub mod downloader;
pub mod transfer;

pub use archive::{ArchiveReport, process_archive};
pub use downloader::PackDownloader;
pub use transfer::PackTransfer;
