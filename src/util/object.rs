use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::model::error::StorageError;

pub const GCS_PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";

// Same reserved set as JavaScript's encodeURIComponent.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Accepts `name` or `gs://name`. Any other scheme is rejected.
pub fn parse_bucket_name(bucket_uri: &str) -> Result<&str, StorageError> {
    let name = match bucket_uri.split_once("://") {
        Some(("gs", rest)) => rest,
        Some(_) => {
            return Err(StorageError::config(format!(
                "failed to parse bucket of: {}, only gs:// is supported",
                bucket_uri
            )))
        }
        None => bucket_uri,
    };

    let name = name.trim_end_matches('/');
    if name.is_empty() || name.contains('/') {
        return Err(StorageError::config(format!(
            "failed to parse bucket of: {}",
            bucket_uri
        )));
    }

    Ok(name)
}

pub fn public_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        endpoint.trim_end_matches('/'),
        bucket,
        utf8_percent_encode(key, OBJECT_NAME)
    )
}
