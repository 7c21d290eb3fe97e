//! Restore preview and validation (§4.8): two read-only passes over an
//! archive stream that never touch the data plane.

use std::collections::BTreeMap;

use claudelens_core::{CoreError, CoreResult};
use serde_json::Value;
use tokio::io::AsyncBufRead;

use crate::backup::{read_header, ArchiveHeader, ArchiveLine, SECTION_ORDER};

/// Current writer version; a mismatch is a warning, not a failure -- an
/// older archive might still apply cleanly against this schema.
pub const CURRENT_ARCHIVE_VERSION: u32 = 1;

/// Documents sampled per section by [`preview_archive`] (§4.8 "first N
/// documents per section").
pub const PREVIEW_DOCS_PER_SECTION: usize = 5;

#[derive(Debug, Clone)]
pub struct PreviewSection {
    pub collection: String,
    pub sample_documents: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct RestorePreview {
    pub header: ArchiveHeader,
    pub sections: Vec<PreviewSection>,
    pub warnings: Vec<String>,
}

/// Streams a bounded prefix of `source` (§4.8 Preview). Reads the full
/// section-boundary sequence to report which collections the archive
/// carries, but only retains the first [`PREVIEW_DOCS_PER_SECTION`]
/// documents of each -- nothing is written to any store.
pub async fn preview_archive<R: AsyncBufRead + Unpin>(source: R) -> CoreResult<RestorePreview> {
    let (header, mut reader) = read_header(source).await?;
    let mut warnings = Vec::new();
    if header.version != CURRENT_ARCHIVE_VERSION {
        warnings.push(format!(
            "archive version {} does not match the current version {CURRENT_ARCHIVE_VERSION}",
            header.version
        ));
    }

    let mut sections = Vec::new();
    let mut current: Option<PreviewSection> = None;
    loop {
        match reader.next_line().await? {
            Some(ArchiveLine::SectionHeader(name)) => {
                if !SECTION_ORDER.contains(&name.as_str()) {
                    warnings.push(format!("unrecognized section \"{name}\""));
                }
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(PreviewSection {
                    collection: name,
                    sample_documents: Vec::new(),
                });
            }
            Some(ArchiveLine::Document(doc)) => {
                if let Some(section) = current.as_mut() {
                    if section.sample_documents.len() < PREVIEW_DOCS_PER_SECTION {
                        section.sample_documents.push(doc);
                    }
                }
            }
            Some(ArchiveLine::Footer(_)) => {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                break;
            }
            None => {
                return Err(CoreError::Corruption {
                    offset: 0,
                    message: "archive ended without a footer".to_string(),
                })
            }
        }
    }

    Ok(RestorePreview { header, sections, warnings })
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub header: ArchiveHeader,
    pub content_counts: BTreeMap<String, u64>,
    pub checksum: String,
}

/// Streams `source` end to end through decompression, verifying the header
/// schema, the declared compressed byte count, and that the rolling
/// checksum computed while reading matches the footer's claim (§4.8
/// Validation pass). Nothing is applied to any store.
pub async fn validate_archive<R: AsyncBufRead + Unpin>(
    source: R,
    expected_compressed_bytes: Option<u64>,
    actual_compressed_bytes: u64,
) -> CoreResult<ValidationReport> {
    if let Some(expected) = expected_compressed_bytes {
        if expected != actual_compressed_bytes {
            return Err(CoreError::Corruption {
                offset: 0,
                message: format!(
                    "compressed size mismatch: backup metadata recorded {expected} bytes, archive is {actual_compressed_bytes}"
                ),
            });
        }
    }

    let (header, mut reader) = read_header(source).await?;
    if header.checksum_algo.is_empty() {
        return Err(CoreError::Corruption {
            offset: 0,
            message: "header is missing checksum_algo".to_string(),
        });
    }

    let mut content_counts = BTreeMap::new();
    let mut current_section: Option<String> = None;
    let footer_checksum = loop {
        match reader.next_line().await? {
            Some(ArchiveLine::SectionHeader(name)) => {
                content_counts.entry(name.clone()).or_insert(0u64);
                current_section = Some(name);
            }
            Some(ArchiveLine::Document(_)) => {
                if let Some(name) = &current_section {
                    *content_counts.entry(name.clone()).or_insert(0) += 1;
                }
            }
            Some(ArchiveLine::Footer(footer)) => break footer.checksum,
            None => {
                return Err(CoreError::Corruption {
                    offset: 0,
                    message: "archive ended without a footer".to_string(),
                })
            }
        }
    };

    let computed = reader.checksum_so_far();
    if computed != footer_checksum {
        return Err(CoreError::Corruption {
            offset: 0,
            message: format!("checksum mismatch: footer claims {footer_checksum}, computed {computed}"),
        });
    }

    Ok(ValidationReport {
        header,
        content_counts,
        checksum: computed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{ArchiveHeader as Header, ArchiveWriter};
    use chrono::Utc;
    use std::collections::BTreeMap as Map;
    use tokio::io::BufReader;

    fn header() -> Header {
        Header {
            version: 1,
            created_at: Utc::now(),
            filters: serde_json::json!({}),
            content_counts: Map::new(),
            checksum_algo: "sha256".to_string(),
        }
    }

    async fn sample_archive() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf, 3, &header()).await.unwrap();
        writer.write_section_header("projects").await.unwrap();
        for i in 0..3 {
            writer
                .write_document(&serde_json::json!({"id": format!("p{i}")}))
                .await
                .unwrap();
        }
        writer.write_section_header("messages").await.unwrap();
        for i in 0..10 {
            writer
                .write_document(&serde_json::json!({"uuid": format!("m{i}")}))
                .await
                .unwrap();
        }
        writer.finish().await.unwrap();
        buf
    }

    #[tokio::test]
    async fn preview_samples_bounded_prefix_per_section() {
        let buf = sample_archive().await;
        let preview = preview_archive(BufReader::new(std::io::Cursor::new(buf))).await.unwrap();
        assert_eq!(preview.sections.len(), 2);
        assert_eq!(preview.sections[0].collection, "projects");
        assert_eq!(preview.sections[0].sample_documents.len(), 3);
        assert_eq!(preview.sections[1].collection, "messages");
        assert_eq!(preview.sections[1].sample_documents.len(), PREVIEW_DOCS_PER_SECTION);
        assert!(preview.warnings.is_empty());
    }

    #[tokio::test]
    async fn validate_confirms_checksum_and_counts() {
        let buf = sample_archive().await;
        let len = buf.len() as u64;
        let report = validate_archive(BufReader::new(std::io::Cursor::new(buf)), Some(len), len)
            .await
            .unwrap();
        assert_eq!(report.content_counts.get("projects"), Some(&3));
        assert_eq!(report.content_counts.get("messages"), Some(&10));
        assert!(!report.checksum.is_empty());
    }

    #[tokio::test]
    async fn validate_rejects_compressed_size_mismatch() {
        let buf = sample_archive().await;
        let len = buf.len() as u64;
        let err = validate_archive(BufReader::new(std::io::Cursor::new(buf)), Some(len + 1), len)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[tokio::test]
    async fn validate_rejects_truncated_archive() {
        let mut buf = sample_archive().await;
        buf.truncate(buf.len() - 20);
        let len = buf.len() as u64;
        let err = validate_archive(BufReader::new(std::io::Cursor::new(buf)), None, len)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }
}
