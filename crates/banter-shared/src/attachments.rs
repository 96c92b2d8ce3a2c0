//! Attachment descriptors and mime-type classification.
//!
//! Uploads are only accepted for a fixed family of mime types; everything
//! else is rejected before any byte reaches the blob store.

use serde::{Deserialize, Serialize};

use crate::types::MessageKind;

pub const ALLOWED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub const ALLOWED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/avi",
    "video/mov",
];

pub const ALLOWED_AUDIO_TYPES: &[&str] = &[
    "audio/mp3",
    "audio/wav",
    "audio/ogg",
    "audio/m4a",
    "audio/webm",
];

pub const ALLOWED_DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "application/zip",
    "application/x-rar-compressed",
];

/// Classify a declared mime type into a message kind, or `None` when the
/// type is outside the allow-list.
pub fn classify_mime(mime: &str) -> Option<MessageKind> {
    if ALLOWED_IMAGE_TYPES.contains(&mime) {
        Some(MessageKind::Image)
    } else if ALLOWED_VIDEO_TYPES.contains(&mime) {
        Some(MessageKind::Video)
    } else if ALLOWED_AUDIO_TYPES.contains(&mime) {
        Some(MessageKind::Audio)
    } else if ALLOWED_DOCUMENT_TYPES.contains(&mime) {
        Some(MessageKind::File)
    } else {
        None
    }
}

/// Descriptor attached to a message once its blob has been stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: MessageKind,
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub mime: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_families() {
        assert_eq!(classify_mime("image/png"), Some(MessageKind::Image));
        assert_eq!(classify_mime("video/mp4"), Some(MessageKind::Video));
        assert_eq!(classify_mime("audio/wav"), Some(MessageKind::Audio));
        assert_eq!(classify_mime("application/pdf"), Some(MessageKind::File));
    }

    #[test]
    fn test_classify_rejects_unknown() {
        assert_eq!(classify_mime("application/x-msdownload"), None);
        assert_eq!(classify_mime(""), None);
        assert_eq!(classify_mime("image/svg+xml"), None);
    }
}
