pub mod adapters;
pub mod bucket;
pub mod config;
pub mod file_service;
pub mod model;
pub mod service;
pub mod stream;
pub mod util;

pub use config::StorageConfig;
pub use file_service::FileService;
pub use model::error::StorageError;
pub use service::GcsFileService;
