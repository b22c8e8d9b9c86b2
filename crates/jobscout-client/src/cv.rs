use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::traits::DocumentTextExtractor;
use reqwest::Client;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// CV extractor for shared document links.
///
/// Google Drive share links (`drive.google.com/file/d/<id>/...`) are
/// resolved to their direct-download form before fetching; any other
/// URL is downloaded as-is. PDF payloads go through text extraction,
/// everything else is treated as UTF-8 text.
#[derive(Clone)]
pub struct DriveCvExtractor {
    client: Client,
}

impl DriveCvExtractor {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("jobscout/0.2 (cv fetch)")
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    /// Resolve a share link to a directly downloadable URL.
    pub fn resolve_download_url(file_ref: &str) -> Result<String, AppError> {
        let url = Url::parse(file_ref)
            .map_err(|e| AppError::Document(format!("Invalid CV reference: {e}")))?;

        if url.host_str() != Some("drive.google.com") {
            return Ok(file_ref.to_string());
        }

        let file_id = drive_file_id(&url).ok_or_else(|| {
            AppError::Document("Could not extract file id from Google Drive URL".into())
        })?;
        Ok(format!(
            "https://drive.google.com/uc?export=download&id={file_id}"
        ))
    }
}

/// `/file/d/<id>/view` style paths carry the id as the segment after `d`.
fn drive_file_id(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "d" {
            return segments.next().map(str::to_string);
        }
    }
    // Fallback: `uc?id=<id>` style links.
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
}

fn extract_document_text(bytes: &[u8]) -> Result<String, AppError> {
    if bytes.starts_with(b"%PDF") {
        return pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AppError::Document(format!("PDF text extraction failed: {e}")));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| AppError::Document("CV is neither a PDF nor UTF-8 text".into()))
}

impl DocumentTextExtractor for DriveCvExtractor {
    async fn extract_text(&self, file_ref: &str) -> Result<String, AppError> {
        let download_url = Self::resolve_download_url(file_ref)?;
        tracing::info!(url = %download_url, "Downloading CV");

        let response = self
            .client
            .get(&download_url)
            .send()
            .await
            .map_err(|e| AppError::Http(format!("CV download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http(format!(
                "HTTP {} downloading CV",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Http(format!("Failed to read CV body: {e}")))?;

        let text = extract_document_text(&bytes)?;
        tracing::info!(chars = text.len(), "CV text extracted");
        Ok(text)
    }
}
