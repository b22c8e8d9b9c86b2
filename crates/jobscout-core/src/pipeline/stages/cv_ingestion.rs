use async_trait::async_trait;

use crate::error::AppError;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::DocumentTextExtractor;

/// Resolves the CV reference, downloads the document, and extracts its
/// plain text. Skippable once the text is cached; failures propagate
/// because every matching stage depends on the CV.
pub struct CvIngestionStage<D: DocumentTextExtractor> {
    extractor: D,
}

impl<D: DocumentTextExtractor> CvIngestionStage<D> {
    pub fn new(extractor: D) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl<D: DocumentTextExtractor> PipelineStage for CvIngestionStage<D> {
    fn name(&self) -> &'static str {
        "CvIngestion"
    }

    fn description(&self) -> &'static str {
        "Downloads the CV and extracts plain text"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        matches!(&ctx.cv_content, Some(text) if !text.is_empty())
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        if ctx.cv_ref.trim().is_empty() {
            return Err(AppError::Validation("CV reference is required".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        tracing::info!(cv_ref = %ctx.cv_ref, "Extracting CV text");
        let text = self.extractor.extract_text(&ctx.cv_ref).await?;
        if text.trim().is_empty() {
            return Err(AppError::Document(
                "CV extraction produced no text".into(),
            ));
        }
        tracing::info!(chars = text.len(), "CV text extracted");
        ctx.cv_content = Some(text);
        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            cv_ref = %ctx.cv_ref,
            user_id = %ctx.user_id,
            "CV ingestion failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockDocumentExtractor, make_test_context};

    #[tokio::test]
    async fn extracts_and_caches_cv_text() {
        let stage = CvIngestionStage::new(MockDocumentExtractor::new("cv body text"));
        let mut ctx = make_test_context();

        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.cv_content.as_deref(), Some("cv body text"));
        assert!(stage.can_skip(&ctx));
    }

    #[tokio::test]
    async fn empty_extraction_is_an_error() {
        let stage = CvIngestionStage::new(MockDocumentExtractor::new("   "));
        let mut ctx = make_test_context();
        let err = stage.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Document(_)));
    }

    #[tokio::test]
    async fn extractor_errors_propagate() {
        let stage = CvIngestionStage::new(MockDocumentExtractor::with_error(AppError::Http(
            "download failed".into(),
        )));
        let mut ctx = make_test_context();
        let err = stage.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Http(_)));
    }

    #[test]
    fn blank_reference_fails_validation() {
        let stage = CvIngestionStage::new(MockDocumentExtractor::new("x"));
        let mut ctx = make_test_context();
        ctx.cv_ref = "  ".into();
        assert!(matches!(stage.validate(&ctx), Err(AppError::Validation(_))));
    }
}
