//! Attachment hosting over plain HTTP object storage.

use crate::config::UploadConfig;
use crate::publisher::Uploader;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// The object name needs an extension to keep its media type.
    #[error("invalid file name '{0}': no extension")]
    InvalidFileName(String),

    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Stores objects with `PUT <endpoint>/<bucket>/<object>` and serves them
/// from `<public_base_url>/<bucket>/<object>`.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    public_base_url: String,
    bucket: String,
    token: Option<String>,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client, config: &UploadConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.trim_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn object_url(&self, object: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, object)
    }

    fn public_url(&self, object: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, object)
    }
}

/// Random object name that keeps the original extension.
pub fn object_name(file_name: &str) -> Result<String, UploadError> {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => {
            Ok(format!("{}.{}", uuid::Uuid::new_v4(), ext))
        }
        _ => Err(UploadError::InvalidFileName(file_name.to_string())),
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, UploadError> {
        let object = object_name(name)?;
        let size = bytes.len();

        let mut request = self.client.put(self.object_url(&object)).body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status { status, body });
        }

        tracing::debug!(object = %object, size, "attachment uploaded");
        Ok(self.public_url(&object))
    }
}
