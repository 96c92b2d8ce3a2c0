//! Upload relay: validate, push to the blob store, then persist-and-broadcast.
//!
//! Explicit stage machine: Received -> Uploading -> Completed | Failed.
//! Validation runs before any I/O; a payload failing it never reaches the
//! blob store. Progress is reported as discrete checkpoints (the blob call
//! is a single request/response, so there is no true byte-level progress).
//! A message is never broadcast before the blob upload is confirmed; every
//! failure exits through one path, a single classified `upload_error` to
//! the initiating connection.

use std::sync::Arc;

use base64::Engine as _;
use tracing::{info, warn};

use banter_shared::attachments::{classify_mime, Attachment};
use banter_shared::protocol::{ChatTarget, ServerEvent};
use banter_shared::types::UploadId;
use banter_store::{BlobStore, BlobUploadOptions};

use crate::connection::ConnectionHandle;
use crate::error::EngineError;
use crate::pipeline::MessagePipeline;

/// Fixed progress checkpoints, ascending and ending at 100:
/// after validation, after the blob store confirms, after the message is
/// persisted.
const CHECKPOINTS: [u8; 3] = [25, 60, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    Uploading,
    Completed,
    Failed,
}

/// One upload call from a connection, already shape-validated at the
/// protocol boundary.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub upload_id: UploadId,
    pub file_data: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub target: ChatTarget,
}

pub struct UploadRelay {
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<MessagePipeline>,
    max_bytes: usize,
}

impl UploadRelay {
    pub fn new(blobs: Arc<dyn BlobStore>, pipeline: Arc<MessagePipeline>, max_bytes: usize) -> Self {
        Self {
            blobs,
            pipeline,
            max_bytes,
        }
    }

    /// Drive one upload to a terminal stage. All outcomes are reported on
    /// `conn` directly (`upload_progress` / `upload_complete` /
    /// `upload_error`); the caller has nothing further to do.
    pub async fn handle(&self, conn: &ConnectionHandle, request: UploadRequest) -> UploadStage {
        let upload_id = request.upload_id.clone();
        match self.run(conn, request).await {
            Ok(stage) => stage,
            Err(error) => {
                warn!(upload = %upload_id, error = %error, "Upload failed");
                conn.send(ServerEvent::UploadError {
                    upload_id,
                    reason: error.to_string(),
                });
                UploadStage::Failed
            }
        }
    }

    async fn run(
        &self,
        conn: &ConnectionHandle,
        request: UploadRequest,
    ) -> Result<UploadStage, EngineError> {
        tracing::debug!(upload = %request.upload_id, stage = ?UploadStage::Received,
            file = %request.file_name, "Upload received");

        // Validate before any I/O.
        let kind = classify_mime(&request.file_type).ok_or_else(|| {
            EngineError::Validation(format!("unsupported file type '{}'", request.file_type))
        })?;
        if request.file_data.is_empty() {
            return Err(EngineError::Validation("empty file payload".to_string()));
        }
        if request.file_size as usize > self.max_bytes {
            return Err(EngineError::Validation(format!(
                "file too large: {} bytes (max {})",
                request.file_size, self.max_bytes
            )));
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(&request.file_data)
            .map_err(|_| EngineError::Validation("file payload is not valid base64".to_string()))?;
        if data.is_empty() {
            return Err(EngineError::Validation("empty file payload".to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(EngineError::Validation(format!(
                "file too large: {} bytes (max {})",
                data.len(),
                self.max_bytes
            )));
        }

        tracing::debug!(upload = %request.upload_id, stage = ?UploadStage::Uploading, "Pushing to blob store");
        self.progress(conn, &request.upload_id, CHECKPOINTS[0]);
        let size = data.len() as u64;
        let handle = self
            .blobs
            .upload(
                data,
                BlobUploadOptions {
                    filename: request.file_name.clone(),
                    mime: request.file_type.clone(),
                },
            )
            .await?;
        self.progress(conn, &request.upload_id, CHECKPOINTS[1]);

        // -- Completed: persist-and-broadcast through the pipeline --
        let attachment = Attachment {
            kind,
            url: handle.url,
            filename: request.file_name,
            size,
            mime: request.file_type,
        };
        let message = self
            .pipeline
            .send_attachment(conn, &request.target, attachment)
            .await
            .map_err(|error| {
                // Known gap: the stored blob is orphaned here. Accepted;
                // reconciliation is outside the engine.
                warn!(upload = %request.upload_id, error = %error,
                    "Blob stored but message persistence failed, blob orphaned");
                error
            })?;
        self.progress(conn, &request.upload_id, CHECKPOINTS[2]);

        info!(upload = %request.upload_id, message = %message.id, "Upload completed");
        conn.send(ServerEvent::UploadComplete {
            upload_id: request.upload_id,
            message,
        });
        Ok(UploadStage::Completed)
    }

    fn progress(&self, conn: &ConnectionHandle, upload_id: &UploadId, percent: u8) {
        conn.send(ServerEvent::UploadProgress {
            upload_id: upload_id.clone(),
            percent,
        });
    }
}
