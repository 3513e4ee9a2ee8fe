use std::{path::PathBuf, pin::Pin};

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::error::StorageError;

/// Presigned URLs stay valid for seven days after they are generated.
pub const PRESIGNED_URL_TTL: time::Duration = time::Duration::days(7);

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Requests that leave the flag out go to the private bucket.
    pub fn from_flag(is_private: Option<bool>) -> Self {
        if is_private.unwrap_or(true) {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// A file the host already spooled to local disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInput {
    pub path: PathBuf,
    #[serde(rename = "originalname")]
    pub original_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub url: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub file_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStreamRequest {
    pub name: String,
    pub ext: String,
    #[serde(default)]
    pub is_private: Option<bool>,
}

impl UploadStreamRequest {
    pub fn file_key(&self) -> String {
        format!("{}.{}", self.name, self.ext)
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::from_flag(self.is_private)
    }
}

/// Names an uploaded object for download or URL signing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFileRequest {
    pub file_key: String,
    #[serde(default)]
    pub is_private: Option<bool>,
}

impl GetFileRequest {
    pub fn visibility(&self) -> Visibility {
        Visibility::from_flag(self.is_private)
    }
}

/// What the backend reports about an object after writing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub resumable: bool,
    pub gzip: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignAction {
    Read,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignVersion {
    V4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignOptions {
    pub action: SignAction,
    pub version: SignVersion,
    pub expires: OffsetDateTime,
}

impl SignOptions {
    pub fn read_from(now: OffsetDateTime) -> Self {
        SignOptions {
            action: SignAction::Read,
            version: SignVersion::V4,
            expires: now + PRESIGNED_URL_TTL,
        }
    }
}
