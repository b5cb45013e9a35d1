use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::info;

use crate::auth::BaasAuth;
use crate::error::ApiError;
use crate::http::read_body;
use crate::ports::AvatarStorage;

/// Bucket profile pictures are stored in.
pub const PROFILE_BUCKET: &str = "profile";

/// Blob storage on the hosted backend.
#[derive(Clone)]
pub struct StorageClient {
    baas: BaasAuth,
    bucket: String,
}

impl StorageClient {
    pub fn new(baas: BaasAuth, bucket: &str) -> Self {
        Self {
            baas,
            bucket: bucket.to_string(),
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        self.baas.url(&format!(
            "/storage/v1/object/public/{}/{}",
            self.bucket,
            path.trim_start_matches('/')
        ))
    }

    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ApiError> {
        if self.baas.access_token().is_none() {
            return Err(ApiError::Unauthenticated);
        }
        let url = self.baas.url(&format!(
            "/storage/v1/object/{}/{}",
            self.bucket,
            path.trim_start_matches('/')
        ));
        let size = bytes.len();
        let res = self
            .baas
            .authorize(self.baas.client().post(url))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        read_body(res).await?;
        info!("Uploaded {} bytes to {}/{}", size, self.bucket, path);
        Ok(())
    }
}

#[async_trait]
impl AvatarStorage for StorageClient {
    async fn upload_avatar(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ApiError> {
        self.upload(path, bytes, content_type).await?;
        Ok(self.public_url(path))
    }
}
