//! Pipeline assembly and the accumulation controller
//!
//! [`SpritePipeline`] drives the extraction, policy, packing, mapping and
//! rewrite stages for every incoming document. In per-document mode each
//! document runs to completion before the next is accepted; in accumulate
//! mode documents are buffered and resolved once at finalization so all of
//! them share one sheet set.

use crate::config::{ConfigError, SpriteConfig};
use crate::extract::{dedup_by_path, ExtractResult, Extractor};
use crate::filestore::{DiskFileStore, FileStore};
use crate::mapper::{apply_placements, map_results};
use crate::models::{Document, ImageReference, OutputFile, Payload};
use crate::orchestrate::{Orchestrator, PackStats};
use crate::packer::{shelf::ShelfPacker, PackError, Packer};
use crate::policy::{Filter, Grouper, PolicyError, PolicySet};
use crate::rewrite::rewrite_stylesheet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Pipeline error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpriteError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Pack(#[from] PackError),
    /// The document was supplied as a stream or other non-buffer payload
    #[error("streamed documents are not supported")]
    StreamedPayload,
}

/// Receiving ends of the pipeline's two output channels.
///
/// Both channels close when the pipeline is finalized.
pub struct PipelineOutputs {
    /// Generated composite sheets (binary image artifacts)
    pub sheets: mpsc::UnboundedReceiver<OutputFile>,
    /// Rewritten stylesheets
    pub stylesheets: mpsc::UnboundedReceiver<OutputFile>,
}

/// Builder for [`SpritePipeline`].
pub struct PipelineBuilder {
    config: SpriteConfig,
    filters: Vec<Arc<dyn Filter>>,
    groupers: Vec<Arc<dyn Grouper>>,
    packer: Arc<dyn Packer>,
    store: Arc<dyn FileStore>,
}

impl PipelineBuilder {
    pub fn new(config: SpriteConfig) -> Self {
        Self {
            config,
            filters: vec![],
            groupers: vec![],
            packer: Arc::new(ShelfPacker),
            store: Arc::new(DiskFileStore),
        }
    }

    /// Append a user filter; filters run in registration order.
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Append a user grouper; groupers run in registration order.
    pub fn with_grouper(mut self, grouper: impl Grouper + 'static) -> Self {
        self.groupers.push(Arc::new(grouper));
        self
    }

    /// Replace the default packer.
    pub fn with_packer(mut self, packer: Arc<dyn Packer>) -> Self {
        self.packer = packer;
        self
    }

    /// Replace the default file store.
    pub fn with_file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = store;
        self
    }

    /// Validate the configuration and assemble the pipeline.
    ///
    /// Required options are checked here, before any document is processed.
    pub fn build(self) -> Result<(SpritePipeline, PipelineOutputs), SpriteError> {
        self.config.validate()?;

        let extractor = Extractor::new(&self.config);
        let policies =
            PolicySet::assemble(self.filters, self.groupers, self.store, self.config.retina);
        let orchestrator = Orchestrator::new(self.packer, self.config.pack_options());

        let (sheet_tx, sheet_rx) = mpsc::unbounded_channel();
        let (css_tx, css_rx) = mpsc::unbounded_channel();

        let pipeline = SpritePipeline {
            config: self.config,
            extractor,
            policies,
            orchestrator,
            sheet_tx,
            css_tx,
            buffered: vec![],
            stats: PackStats::default(),
        };
        Ok((pipeline, PipelineOutputs { sheets: sheet_rx, stylesheets: css_rx }))
    }
}

/// The assembled sprite pipeline.
pub struct SpritePipeline {
    config: SpriteConfig,
    extractor: Extractor,
    policies: PolicySet,
    orchestrator: Orchestrator,
    sheet_tx: mpsc::UnboundedSender<OutputFile>,
    css_tx: mpsc::UnboundedSender<OutputFile>,
    buffered: Vec<Document>,
    stats: PackStats,
}

impl SpritePipeline {
    pub fn builder(config: SpriteConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Feed one document into the pipeline.
    ///
    /// In per-document mode the document is processed to completion before
    /// this returns; in accumulate mode it is buffered until
    /// [`Self::finalize`]. An unsupported payload drops only that document;
    /// the pipeline stays usable.
    pub async fn process(&mut self, document: Document) -> Result<(), SpriteError> {
        match document.payload {
            Payload::Empty => Ok(()),
            Payload::Stream => Err(SpriteError::StreamedPayload),
            Payload::Buffer(_) => {
                if self.config.accumulate {
                    self.buffered.push(document);
                    return Ok(());
                }
                self.process_single(document).await
            }
        }
    }

    /// Finish the run.
    ///
    /// In accumulate mode this resolves the buffered documents against one
    /// shared pack. Consuming the pipeline closes both output channels, so no
    /// further documents can be accepted. Returns the merged run totals.
    pub async fn finalize(mut self) -> Result<PackStats, SpriteError> {
        if self.config.accumulate {
            self.resolve_accumulated().await?;
        }
        tracing::info!(
            "created {} sprite(s) from {} images, saved {:.1}% requests",
            self.stats.sheets,
            self.stats.images,
            self.stats.reduction_percent()
        );
        Ok(self.stats)
    }

    async fn process_single(&mut self, document: Document) -> Result<(), SpriteError> {
        let content = document_text(&document);
        let extraction = self.extractor.extract(&document.path, &content);
        self.log_warnings(&extraction);
        let occurrences = extraction.references;

        let placements = self.pack_unique(&occurrences).await?;

        let mut occurrences = occurrences;
        apply_placements(&mut occurrences, &placements);
        let rewritten = rewrite_stylesheet(&content, &occurrences);

        let name = self
            .config
            .style_sheet_name
            .clone()
            .unwrap_or_else(|| document.file_name());
        self.emit_stylesheet(name, rewritten);
        Ok(())
    }

    async fn resolve_accumulated(&mut self) -> Result<(), SpriteError> {
        let documents = std::mem::take(&mut self.buffered);

        let mut extracted = Vec::with_capacity(documents.len());
        for document in &documents {
            let content = document_text(document);
            let extraction = self.extractor.extract(&document.path, &content);
            self.log_warnings(&extraction);
            extracted.push((document.file_name(), content, extraction.references));
        }

        let combined: Vec<ImageReference> = extracted
            .iter()
            .flat_map(|(_, _, references)| references.iter().cloned())
            .collect();
        let placements = self.pack_unique(&combined).await?;

        for (name, content, mut references) in extracted {
            apply_placements(&mut references, &placements);
            let rewritten = rewrite_stylesheet(&content, &references);
            self.emit_stylesheet(name, rewritten);
        }
        Ok(())
    }

    /// Dedup by resolved path, run the policies, pack, and emit the sheets.
    /// Returns the placement for every packed path.
    async fn pack_unique(
        &mut self,
        occurrences: &[ImageReference],
    ) -> Result<std::collections::HashMap<PathBuf, crate::models::Placement>, SpriteError> {
        let unique = dedup_by_path(occurrences);
        let survivors = self.policies.apply(unique).await?;
        let (results, stats) = self.orchestrator.pack_all(&survivors).await?;
        self.stats.merge(stats);

        let mapped = map_results(results, &self.config);
        for sheet in mapped.sheets {
            tracing::debug!("spritesheet \"{}\" created", sheet.path.display());
            let _ = self.sheet_tx.send(sheet);
        }
        Ok(mapped.placements)
    }

    fn emit_stylesheet(&self, name: String, contents: String) {
        tracing::debug!("stylesheet \"{}\" created", name);
        let _ = self.css_tx.send(OutputFile { path: PathBuf::from(name), contents: contents.into_bytes() });
    }

    fn log_warnings(&self, extraction: &ExtractResult) {
        for warning in &extraction.warnings {
            if self.config.verbose {
                tracing::info!("line {}: {}", warning.line, warning.message);
            } else {
                tracing::debug!("line {}: {}", warning.line, warning.message);
            }
        }
    }
}

fn document_text(document: &Document) -> String {
    match &document.payload {
        Payload::Buffer(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use crate::packer::{PackRequest, PackedSheet};
    use async_trait::async_trait;
    use crate::filestore::MemoryFileStore;
    use crate::policy::FilterFn;

    /// Packer double: stacks images at y = 16 * index, 16x16 each.
    struct StubPacker;

    #[async_trait]
    impl Packer for StubPacker {
        fn validate(&self, _: &PackRequest) -> Result<(), PackError> {
            Ok(())
        }
        async fn pack(&self, request: PackRequest) -> Result<PackedSheet, PackError> {
            let coordinates = request
                .paths
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    (p.clone(), Coordinates { x: 0, y: i as u32 * 16, width: 16, height: 16 })
                })
                .collect();
            Ok(PackedSheet {
                image: b"sheet".to_vec(),
                width: 16,
                height: request.paths.len() as u32 * 16,
                coordinates,
            })
        }
    }

    fn config(accumulate: bool) -> SpriteConfig {
        let mut config = SpriteConfig::default();
        config.sprite_sheet_name = Some("sprite.png".to_string());
        config.base_url = PathBuf::from("/images");
        config.accumulate = accumulate;
        config
    }

    fn pipeline_with(
        config: SpriteConfig,
        existing: &[&str],
    ) -> (SpritePipeline, PipelineOutputs) {
        SpritePipeline::builder(config)
            .with_packer(Arc::new(StubPacker))
            .with_file_store(Arc::new(MemoryFileStore::new(existing.iter().copied())))
            .build()
            .unwrap()
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<OutputFile>) -> Vec<OutputFile> {
        let mut files = vec![];
        while let Some(file) = rx.recv().await {
            files.push(file);
        }
        files
    }

    #[test]
    fn test_build_requires_sprite_sheet_name() {
        let err = SpritePipeline::builder(SpriteConfig::default()).build().err().unwrap();
        assert!(matches!(err, SpriteError::Config(ConfigError::Missing("sprite_sheet_name"))));
    }

    #[tokio::test]
    async fn test_per_document_rewrites_and_emits() {
        let (mut pipeline, outputs) =
            pipeline_with(config(false), &["/images/a.png", "/images/b.png"]);
        let css = "\
.a { background-image: url(\"/a.png\"); }
.b { background-image: url(\"/b.png\"); }
";
        pipeline.process(Document::buffered("/styles/app.css", css.as_bytes().to_vec())).await.unwrap();
        let stats = pipeline.finalize().await.unwrap();
        assert_eq!(stats, PackStats { images: 2, sheets: 1 });

        let sheets = drain(outputs.sheets).await;
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].path, PathBuf::from("sprite.png"));

        let stylesheets = drain(outputs.stylesheets).await;
        assert_eq!(stylesheets.len(), 1);
        // no configured stylesheet name: the source file name is used
        assert_eq!(stylesheets[0].path, PathBuf::from("app.css"));
        let rewritten = String::from_utf8(stylesheets[0].contents.clone()).unwrap();
        assert!(!rewritten.contains("/a.png"));
        assert!(!rewritten.contains("/b.png"));
        assert!(rewritten.contains("background-position: -0px -0px;"));
        assert!(rewritten.contains("background-position: -0px -16px;"));
    }

    #[tokio::test]
    async fn test_configured_stylesheet_name_wins() {
        let mut config = config(false);
        config.style_sheet_name = Some("app.sprite.css".to_string());
        let (mut pipeline, outputs) = pipeline_with(config, &["/images/a.png"]);
        pipeline
            .process(Document::buffered(
                "/styles/app.css",
                ".a { background-image: url(\"/a.png\"); }".as_bytes().to_vec(),
            ))
            .await
            .unwrap();
        pipeline.finalize().await.unwrap();

        let stylesheets = drain(outputs.stylesheets).await;
        assert_eq!(stylesheets[0].path, PathBuf::from("app.sprite.css"));
    }

    #[tokio::test]
    async fn test_empty_payload_produces_no_output() {
        let (mut pipeline, outputs) = pipeline_with(config(false), &[]);
        pipeline
            .process(Document { path: PathBuf::from("/styles/empty.css"), payload: Payload::Empty })
            .await
            .unwrap();
        let stats = pipeline.finalize().await.unwrap();
        assert_eq!(stats, PackStats::default());
        assert!(drain(outputs.stylesheets).await.is_empty());
        assert!(drain(outputs.sheets).await.is_empty());
    }

    #[tokio::test]
    async fn test_streamed_payload_is_rejected_but_not_fatal() {
        let (mut pipeline, outputs) = pipeline_with(config(false), &["/images/a.png"]);
        let err = pipeline
            .process(Document { path: PathBuf::from("/styles/bad.css"), payload: Payload::Stream })
            .await
            .unwrap_err();
        assert!(matches!(err, SpriteError::StreamedPayload));

        // the pipeline still accepts further documents
        pipeline
            .process(Document::buffered(
                "/styles/ok.css",
                ".a { background-image: url(\"/a.png\"); }".as_bytes().to_vec(),
            ))
            .await
            .unwrap();
        pipeline.finalize().await.unwrap();
        assert_eq!(drain(outputs.stylesheets).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_path_packed_once_rewritten_everywhere() {
        let (mut pipeline, outputs) = pipeline_with(config(false), &["/images/a.png"]);
        let css = "\
.a { background-image: url(\"/a.png\"); }
.b { background-image: url(\"/a.png\"); }
";
        pipeline.process(Document::buffered("/styles/app.css", css.as_bytes().to_vec())).await.unwrap();
        let stats = pipeline.finalize().await.unwrap();
        // deduped: one image submitted, one sheet
        assert_eq!(stats, PackStats { images: 1, sheets: 1 });

        let stylesheets = drain(outputs.stylesheets).await;
        let rewritten = String::from_utf8(stylesheets[0].contents.clone()).unwrap();
        assert!(!rewritten.contains("/a.png"));
        assert_eq!(rewritten.matches("url(\"sprite.png\")").count(), 2);
    }

    #[tokio::test]
    async fn test_filtered_reference_left_untouched() {
        let (mut pipeline, outputs) = SpritePipeline::builder(config(false))
            .with_packer(Arc::new(StubPacker))
            .with_file_store(Arc::new(MemoryFileStore::new(["/images/a.png", "/images/b.png"])))
            .with_filter(FilterFn(|image: &crate::models::ImageReference| image.url != "/a.png"))
            .build()
            .unwrap();
        let css = "\
.a { background-image: url(\"/a.png\"); }
.b { background-image: url(\"/b.png\"); }
";
        pipeline.process(Document::buffered("/styles/app.css", css.as_bytes().to_vec())).await.unwrap();
        pipeline.finalize().await.unwrap();

        let stylesheets = drain(outputs.stylesheets).await;
        let rewritten = String::from_utf8(stylesheets[0].contents.clone()).unwrap();
        assert!(rewritten.contains("url(\"/a.png\")"));
        assert!(!rewritten.contains("url(\"/b.png\")"));
    }

    #[tokio::test]
    async fn test_accumulate_shares_one_pack_across_documents() {
        let (mut pipeline, outputs) =
            pipeline_with(config(true), &["/images/shared.png", "/images/b.png"]);
        let a = ".a { background-image: url(\"/shared.png\"); }";
        let b = "\
.s { background-image: url(\"/shared.png\"); }
.b { background-image: url(\"/b.png\"); }
";
        pipeline.process(Document::buffered("/styles/A.css", a.as_bytes().to_vec())).await.unwrap();
        pipeline.process(Document::buffered("/styles/B.css", b.as_bytes().to_vec())).await.unwrap();
        // nothing is emitted until finalization
        let stats = pipeline.finalize().await.unwrap();
        assert_eq!(stats, PackStats { images: 2, sheets: 1 });

        let sheets = drain(outputs.sheets).await;
        assert_eq!(sheets.len(), 1);

        let stylesheets = drain(outputs.stylesheets).await;
        assert_eq!(stylesheets.len(), 2);
        assert_eq!(stylesheets[0].path, PathBuf::from("A.css"));
        assert_eq!(stylesheets[1].path, PathBuf::from("B.css"));

        let a_rewritten = String::from_utf8(stylesheets[0].contents.clone()).unwrap();
        let b_rewritten = String::from_utf8(stylesheets[1].contents.clone()).unwrap();
        assert!(!a_rewritten.contains("/shared.png"));
        assert!(!b_rewritten.contains("/shared.png"));

        // the shared image resolves to identical declarations in both
        let block = |text: &str| {
            text.lines()
                .find(|l| l.contains("background-position"))
                .unwrap()
                .trim()
                .to_string()
        };
        assert_eq!(block(&a_rewritten), block(&b_rewritten));
    }

    #[tokio::test]
    async fn test_retina_group_gets_labeled_sheet() {
        let (mut pipeline, outputs) = pipeline_with(config(false), &["/images/logo@2x.png"]);
        let css = ".logo { background-image: url(\"/logo@2x.png\"); }";
        pipeline.process(Document::buffered("/styles/app.css", css.as_bytes().to_vec())).await.unwrap();
        pipeline.finalize().await.unwrap();

        let sheets = drain(outputs.sheets).await;
        assert_eq!(sheets[0].path, PathBuf::from("sprite.@2x.png"));

        let stylesheets = drain(outputs.stylesheets).await;
        let rewritten = String::from_utf8(stylesheets[0].contents.clone()).unwrap();
        assert!(rewritten.contains("url(\"sprite.@2x.png\")"));
        // 16x16 sheet divided by the ratio
        assert!(rewritten.contains("background-size: 8px 8px!important;"));
    }
}
