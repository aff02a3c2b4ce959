//! Filter and grouping policies applied between extraction and packing
//!
//! Filters and groupers are asynchronous capabilities so user policies can
//! consult the filesystem or other services. Synchronous policies are lifted
//! into the same contract through [`FilterFn`] and [`GrouperFn`].

use crate::filestore::FileStore;
use crate::models::ImageReference;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a user policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PolicyError {
    pub message: String,
}

impl PolicyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Accepts or rejects one image.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn accept(&self, image: &ImageReference) -> Result<bool, PolicyError>;
}

/// Assigns an optional group label to one image.
#[async_trait]
pub trait Grouper: Send + Sync {
    async fn label(&self, image: &ImageReference) -> Result<Option<String>, PolicyError>;
}

/// Lifts a synchronous predicate into the async filter contract.
pub struct FilterFn<F>(pub F);

#[async_trait]
impl<F> Filter for FilterFn<F>
where
    F: Fn(&ImageReference) -> bool + Send + Sync,
{
    async fn accept(&self, image: &ImageReference) -> Result<bool, PolicyError> {
        Ok((self.0)(image))
    }
}

/// Lifts a synchronous classifier into the async grouper contract.
pub struct GrouperFn<F>(pub F);

#[async_trait]
impl<F> Grouper for GrouperFn<F>
where
    F: Fn(&ImageReference) -> Option<String> + Send + Sync,
{
    async fn label(&self, image: &ImageReference) -> Result<Option<String>, PolicyError> {
        Ok((self.0)(image))
    }
}

/// Leading system filter: drop images whose annotation declares a skip.
struct MetaSkipFilter;

#[async_trait]
impl Filter for MetaSkipFilter {
    async fn accept(&self, image: &ImageReference) -> Result<bool, PolicyError> {
        if image.skip_requested() {
            tracing::debug!("{} skipped as its meta declares to skip", image.resolved_path.display());
            return Ok(false);
        }
        Ok(true)
    }
}

/// Trailing system filter: drop images whose resolved path does not exist.
struct ExistingFileFilter {
    store: Arc<dyn FileStore>,
}

#[async_trait]
impl Filter for ExistingFileFilter {
    async fn accept(&self, image: &ImageReference) -> Result<bool, PolicyError> {
        let exists = self.store.exists(&image.resolved_path).await;
        if !exists {
            tracing::debug!("{} skipped as it does not exist", image.resolved_path.display());
        }
        Ok(exists)
    }
}

/// Built-in grouper: retina images get a density label so they are never
/// packed together with non-retina images of the same logical group.
struct RetinaGrouper;

#[async_trait]
impl Grouper for RetinaGrouper {
    async fn label(&self, image: &ImageReference) -> Result<Option<String>, PolicyError> {
        if image.is_retina {
            return Ok(Some(format!("@{}x", image.retina_ratio)));
        }
        Ok(None)
    }
}

/// The assembled policy chains: system filters bracket user filters, the
/// retina grouper (when enabled) precedes user groupers.
pub struct PolicySet {
    filters: Vec<Arc<dyn Filter>>,
    groupers: Vec<Arc<dyn Grouper>>,
}

impl PolicySet {
    pub fn assemble(
        user_filters: Vec<Arc<dyn Filter>>,
        user_groupers: Vec<Arc<dyn Grouper>>,
        store: Arc<dyn FileStore>,
        retina: bool,
    ) -> Self {
        let mut filters: Vec<Arc<dyn Filter>> = Vec::with_capacity(user_filters.len() + 2);
        filters.push(Arc::new(MetaSkipFilter));
        filters.extend(user_filters);
        filters.push(Arc::new(ExistingFileFilter { store }));

        let mut groupers: Vec<Arc<dyn Grouper>> = Vec::with_capacity(user_groupers.len() + 1);
        if retina {
            groupers.push(Arc::new(RetinaGrouper));
        }
        groupers.extend(user_groupers);

        Self { filters, groupers }
    }

    /// Run every image through the filter chain, then the grouper chain.
    ///
    /// Images are evaluated concurrently with no relative ordering guarantee;
    /// the surviving list preserves the input order. The filter chain
    /// short-circuits per image on the first rejection; grouper labels are
    /// appended in declaration order.
    pub async fn apply(
        &self,
        images: Vec<ImageReference>,
    ) -> Result<Vec<ImageReference>, PolicyError> {
        let evaluated =
            futures::future::try_join_all(images.into_iter().map(|image| self.evaluate(image)))
                .await?;
        Ok(evaluated.into_iter().flatten().collect())
    }

    async fn evaluate(
        &self,
        mut image: ImageReference,
    ) -> Result<Option<ImageReference>, PolicyError> {
        for filter in &self.filters {
            if !filter.accept(&image).await? {
                return Ok(None);
            }
        }
        for grouper in &self.groupers {
            if let Some(label) = grouper.label(&image).await? {
                image.group_labels.push(label);
            }
        }
        Ok(Some(image))
    }
}
