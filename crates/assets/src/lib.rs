//! Campaign asset retrieval — content-addressed downloads with digest
//! verification, a retry queue for transient failures, and local storage.

pub mod http;
pub mod pipeline;
pub mod storage;
pub mod transport;

pub use http::HttpAssetTransport;
pub use pipeline::{AssetPipeline, BatchKind, BatchReport, ItemOutcome};
pub use storage::{AssetStorage, FsAssetStorage, MemoryAssetStorage};
pub use transport::{AssetTransport, Bitmap, CdnUrls, FetchedImage, PngPassthrough};
