use super::{BackendError, ConsultationBackend, StorageSettings};
use crate::artifact::ContainerFormat;
use crate::config::BackendConfig;
use crate::consultation::{AuthContext, ConsultationRecord};
use crate::recorder::state::{Segment, SessionId};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct HttpBackend {
    base_url: String,
    chunk_content_type: &'static str,
    client: Client,
}

#[derive(Deserialize)]
struct MessageBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct StoragePathBody {
    path: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStoragePath<'a> {
    new_storage_path: &'a str,
}

#[derive(Deserialize)]
struct UpdateStoragePathBody {
    #[serde(default)]
    success: bool,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, container: ContainerFormat) -> Result<Self, BackendError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chunk_content_type: container.content_type(),
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<MessageBody>(&body)
        .ok()
        .and_then(|b| b.message);
    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ConsultationBackend for HttpBackend {
    async fn upload_chunk(&self, session_id: &SessionId, segment: &Segment) -> Result<(), BackendError> {
        let chunk = Part::bytes(segment.payload.to_vec())
            .file_name("blob")
            .mime_str(self.chunk_content_type)?;
        let form = Form::new()
            .part("videoChunk", chunk)
            .text("sessionId", session_id.to_string());

        let response = self
            .client
            .post(self.url("upload-chunk"))
            .multipart(form)
            .send()
            .await?;
        ensure_success(response).await?;
        debug!(
            session_id = %session_id,
            sequence = segment.sequence_index,
            "chunk uploaded"
        );
        Ok(())
    }

    async fn create_consultation(&self, record: &ConsultationRecord, token: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("consultations"))
            .bearer_auth(token)
            .json(record)
            .send()
            .await?;
        match ensure_success(response).await {
            Ok(_) => {
                debug!(video_file_name = record.video_file_name, "consultation saved");
                Ok(())
            }
            Err(err) => {
                warn!(video_file_name = record.video_file_name, ?err, "consultation rejected");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl StorageSettings for HttpBackend {
    async fn storage_path(&self) -> Result<Option<String>, BackendError> {
        let response = self.client.get(self.url("get-storage-path")).send().await?;
        let body: StoragePathBody = ensure_success(response).await?.json().await?;
        Ok(body.path.filter(|p| !p.is_empty()))
    }

    async fn update_storage_path(&self, auth: &AuthContext, path: &str) -> Result<bool, BackendError> {
        if !auth.is_admin() {
            return Err(BackendError::Forbidden(
                "only administrators may change the storage path".to_string(),
            ));
        }
        let response = self
            .client
            .post(self.url("update-storage-path"))
            .json(&UpdateStoragePath {
                new_storage_path: path,
            })
            .send()
            .await?;
        let body: UpdateStoragePathBody = ensure_success(response).await?.json().await?;
        Ok(body.success)
    }
}
