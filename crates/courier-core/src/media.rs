//! Resolves `<content-type>:<url>` attachment references into
//! provider-suitable [`Attachment`]s, honoring a channel's media-support
//! matrix.

use thiserror::Error;

use crate::types::{Attachment, MediaMeta, MediaType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("invalid attachment format: {0}")]
    InvalidFormat(String),
}

/// What a channel can accept for outbound media.
#[derive(Debug, Clone)]
pub struct MediaSupportMatrix {
    /// Content-types the provider accepts directly, e.g. `["image/jpeg", "image/png"]`.
    pub supported_types: Vec<String>,
    /// Largest attachment, in bytes, the provider will accept.
    pub max_bytes: u64,
    /// Whether a bare URL (no resolved `MediaMeta`) may be sent as-is.
    pub allow_url_only: bool,
}

/// A single `<content-type>:<url>` reference plus whatever metadata the
/// backend already has for it (if it uploaded the media itself) and any
/// alternate encodings available.
#[derive(Debug, Clone)]
pub struct AttachmentRef {
    pub raw: String,
    pub media: Option<MediaMeta>,
    pub alternates: Vec<(String, String)>,
}

/// Parse a raw `<content-type>:<url>` string into its two parts.
pub fn parse_attachment_ref(raw: &str) -> Result<(String, String), MediaError> {
    let idx = raw
        .find(':')
        .ok_or_else(|| MediaError::InvalidFormat(raw.to_string()))?;
    let (content_type, rest) = raw.split_at(idx);
    let url = &rest[1..];
    if content_type.is_empty() || url.is_empty() || !url.contains("://") {
        return Err(MediaError::InvalidFormat(raw.to_string()));
    }
    Ok((content_type.to_string(), url.to_string()))
}

/// Resolve a list of attachment references against a channel's media-support
/// matrix, dropping anything the channel cannot carry.
pub fn resolve_attachments(
    refs: &[AttachmentRef],
    matrix: &MediaSupportMatrix,
) -> Result<Vec<Attachment>, MediaError> {
    let mut out = Vec::new();

    for attachment_ref in refs {
        let (content_type, url) = parse_attachment_ref(&attachment_ref.raw)?;

        let mut resolved_content_type = content_type.clone();
        let mut resolved_url = url.clone();
        let mut supported = matrix.supported_types.iter().any(|t| t == &content_type);

        if !supported {
            if let Some((alt_type, alt_url)) = attachment_ref
                .alternates
                .iter()
                .find(|(t, _)| matrix.supported_types.iter().any(|s| s == t))
            {
                resolved_content_type = alt_type.clone();
                resolved_url = alt_url.clone();
                supported = true;
            }
        }

        if !supported && !matrix.allow_url_only {
            continue;
        }

        if let Some(meta) = &attachment_ref.media {
            if let Some(size) = meta.size_bytes {
                if size > matrix.max_bytes {
                    continue;
                }
            }
        } else if !matrix.allow_url_only {
            continue;
        }

        out.push(Attachment {
            media_type: MediaType::from_content_type(&resolved_content_type),
            content_type: resolved_content_type,
            url: resolved_url,
            media: attachment_ref.media.clone(),
            thumbnail: None,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> MediaSupportMatrix {
        MediaSupportMatrix {
            supported_types: vec!["image/jpeg".into(), "audio/mpeg".into()],
            max_bytes: 1_000_000,
            allow_url_only: true,
        }
    }

    #[test]
    fn parses_valid_ref() {
        let (ct, url) = parse_attachment_ref("image/jpeg:https://foo.bar/image.jpg").unwrap();
        assert_eq!(ct, "image/jpeg");
        assert_eq!(url, "https://foo.bar/image.jpg");
    }

    #[test]
    fn rejects_malformed_ref() {
        assert!(parse_attachment_ref("not-a-ref").is_err());
        assert!(parse_attachment_ref("image/jpeg:").is_err());
    }

    #[test]
    fn drops_oversize_attachment() {
        let refs = vec![AttachmentRef {
            raw: "image/jpeg:https://foo.bar/big.jpg".into(),
            media: Some(MediaMeta {
                size_bytes: Some(5_000_000),
                ..Default::default()
            }),
            alternates: vec![],
        }];
        let resolved = resolve_attachments(&refs, &matrix()).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn substitutes_supported_alternate() {
        let refs = vec![AttachmentRef {
            raw: "image/webp:https://foo.bar/img.webp".into(),
            media: Some(MediaMeta::default()),
            alternates: vec![("image/jpeg".into(), "https://foo.bar/img.jpg".into())],
        }];
        let resolved = resolve_attachments(&refs, &matrix()).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].content_type, "image/jpeg");
    }

    #[test]
    fn drops_unsupported_without_url_only() {
        let refs = vec![AttachmentRef {
            raw: "video/mp4:https://foo.bar/clip.mp4".into(),
            media: None,
            alternates: vec![],
        }];
        let mut m = matrix();
        m.allow_url_only = false;
        let resolved = resolve_attachments(&refs, &m).unwrap();
        assert!(resolved.is_empty());
    }
}
