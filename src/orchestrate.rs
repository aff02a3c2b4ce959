//! Packing orchestration - partitions images into sprite groups and fans out
//! to the packer
//!
//! Groups are derived from the ordered label sequences the policy pipeline
//! attached. All groups are packed concurrently; one failure fails the whole
//! call (packing is deterministic for identical input, so retrying is
//! pointless).

use crate::models::ImageReference;
use crate::packer::{PackError, PackOptions, PackRequest, Packer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const GROUP_DELIMITER: char = '.';
const GROUP_MASK: char = '*';
/// Constant root label so an empty label sequence still yields a stable key.
const GROUP_ROOT: &str = "_";

/// Running totals across an orchestration call, merged explicitly by the
/// caller at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    /// Images submitted for packing
    pub images: u64,
    /// Composite sheets produced
    pub sheets: u64,
}

impl PackStats {
    pub fn merge(&mut self, other: PackStats) {
        self.images += other.images;
        self.sheets += other.sheets;
    }

    /// Share of image requests eliminated by sprite sheets, in percent.
    pub fn reduction_percent(&self) -> f64 {
        if self.images == 0 {
            return 0.0;
        }
        (1.0 - self.sheets as f64 / self.images as f64) * 100.0
    }
}

/// A set of images destined for one composite sheet.
#[derive(Debug)]
pub struct SpriteGroup {
    /// Deterministic key derived from the members' label sequence
    pub key: String,
    /// The members' shared label sequence, unmasked
    pub labels: Vec<String>,
    /// Members in extraction order
    pub members: Vec<ImageReference>,
}

/// A packed group: the packer's sheet plus the group's label sequence,
/// carried through so the output filename can encode it.
#[derive(Debug)]
pub struct PackResult {
    /// Encoded composite image bytes
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Offset of every member, keyed by resolved path
    pub coordinates: HashMap<PathBuf, crate::models::Coordinates>,
    /// The originating group's label sequence
    pub labels: Vec<String>,
}

/// Derive the group key from an ordered label sequence.
///
/// Delimiter characters inside labels are masked so a label can never forge a
/// key boundary; the constant root label is prepended so grouping stays
/// deterministic regardless of which groupers produced the labels.
fn derive_key(labels: &[String]) -> String {
    let mut parts = Vec::with_capacity(labels.len() + 1);
    parts.push(GROUP_ROOT.to_string());
    parts.extend(labels.iter().map(|label| label.replace(GROUP_DELIMITER, &GROUP_MASK.to_string())));
    parts.join(&GROUP_DELIMITER.to_string())
}

/// Partition images into sprite groups, in first-seen key order.
pub fn group_images(images: &[ImageReference]) -> Vec<SpriteGroup> {
    let mut groups: Vec<SpriteGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for image in images {
        let key = derive_key(&image.group_labels);
        match index.get(&key) {
            Some(&i) => groups[i].members.push(image.clone()),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(SpriteGroup {
                    key,
                    labels: image.group_labels.clone(),
                    members: vec![image.clone()],
                });
            }
        }
    }
    groups
}

/// When every member is retina with one common ratio, padding must be scaled
/// by that ratio so the post-division padding matches the non-retina case.
fn common_retina_ratio(members: &[ImageReference]) -> Option<u32> {
    if members.is_empty() || !members.iter().all(|m| m.is_retina) {
        return None;
    }
    let ratio = members[0].retina_ratio;
    members.iter().all(|m| m.retina_ratio == ratio).then_some(ratio)
}

/// Fans packing jobs out to the packer, one per sprite group.
pub struct Orchestrator {
    packer: Arc<dyn Packer>,
    options: PackOptions,
}

impl Orchestrator {
    pub fn new(packer: Arc<dyn Packer>, options: PackOptions) -> Self {
        Self { packer, options }
    }

    /// Pack every group of the given image list concurrently.
    ///
    /// Every request is validated before any job is dispatched, so a
    /// configuration problem surfaces without running a single pack. The join
    /// is fail-fast: the first group failure fails the whole call.
    pub async fn pack_all(
        &self,
        images: &[ImageReference],
    ) -> Result<(Vec<PackResult>, PackStats), PackError> {
        let groups = group_images(images);

        let mut jobs = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut options = self.options.clone();
            if let Some(ratio) = common_retina_ratio(&group.members) {
                options.padding *= ratio;
            }
            let request = PackRequest {
                paths: group.members.iter().map(|m| m.resolved_path.clone()).collect(),
                options,
            };
            self.packer.validate(&request)?;
            jobs.push((group, request));
        }

        let results = futures::future::try_join_all(
            jobs.into_iter().map(|(group, request)| self.pack_group(group, request)),
        )
        .await?;

        let stats = PackStats { images: images.len() as u64, sheets: results.len() as u64 };
        Ok((results, stats))
    }

    async fn pack_group(
        &self,
        group: &SpriteGroup,
        request: PackRequest,
    ) -> Result<PackResult, PackError> {
        let submitted = request.paths.clone();
        let sheet = self.packer.pack(request).await?;
        for path in &submitted {
            if !sheet.coordinates.contains_key(path) {
                return Err(PackError::Engine(format!(
                    "packer result is missing coordinates for {}",
                    path.display()
                )));
            }
        }
        Ok(PackResult {
            image: sheet.image,
            width: sheet.width,
            height: sheet.height,
            coordinates: sheet.coordinates,
            labels: group.labels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use crate::packer::PackedSheet;
    use async_trait::async_trait;

    fn image(path: &str, labels: &[&str]) -> ImageReference {
        ImageReference {
            original_token: format!("background-image: url(\"{}\");", path),
            url: path.to_string(),
            resolved_path: PathBuf::from(path),
            is_retina: false,
            retina_ratio: 1,
            metadata: serde_json::Map::new(),
            group_labels: labels.iter().map(|l| l.to_string()).collect(),
            placement: None,
        }
    }

    fn retina(path: &str, ratio: u32, labels: &[&str]) -> ImageReference {
        let mut image = image(path, labels);
        image.is_retina = true;
        image.retina_ratio = ratio;
        image
    }

    /// Packer double: stacks images at y = 16 * index, 16x16 each, and
    /// records the options it was called with.
    struct StubPacker {
        seen_padding: std::sync::Mutex<Vec<u32>>,
    }

    impl StubPacker {
        fn new() -> Self {
            Self { seen_padding: std::sync::Mutex::new(vec![]) }
        }
    }

    #[async_trait]
    impl Packer for StubPacker {
        fn validate(&self, request: &PackRequest) -> Result<(), PackError> {
            if request.paths.is_empty() {
                return Err(PackError::InvalidOptions("no images to pack".to_string()));
            }
            Ok(())
        }

        async fn pack(&self, request: PackRequest) -> Result<PackedSheet, PackError> {
            self.seen_padding.lock().unwrap().push(request.options.padding);
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

    struct FailingPacker;

    #[async_trait]
    impl Packer for FailingPacker {
        fn validate(&self, _: &PackRequest) -> Result<(), PackError> {
            Ok(())
        }
        async fn pack(&self, _: PackRequest) -> Result<PackedSheet, PackError> {
            Err(PackError::Engine("no engine available".to_string()))
        }
    }

    /// Returns a coordinate map that omits one submitted path.
    struct ForgetfulPacker;

    #[async_trait]
    impl Packer for ForgetfulPacker {
        fn validate(&self, _: &PackRequest) -> Result<(), PackError> {
            Ok(())
        }
        async fn pack(&self, request: PackRequest) -> Result<PackedSheet, PackError> {
            let coordinates = request
                .paths
                .iter()
                .skip(1)
                .map(|p| (p.clone(), Coordinates { x: 0, y: 0, width: 1, height: 1 }))
                .collect();
            Ok(PackedSheet { image: vec![], width: 1, height: 1, coordinates })
        }
    }

    #[test]
    fn test_derive_key_prepends_root() {
        assert_eq!(derive_key(&[]), "_");
        assert_eq!(derive_key(&["@2x".to_string()]), "_.@2x");
        assert_eq!(derive_key(&["a".to_string(), "b".to_string()]), "_.a.b");
    }

    #[test]
    fn test_derive_key_masks_delimiter_in_labels() {
        // a delimiter inside a label cannot forge a key boundary
        assert_eq!(derive_key(&["v1.2".to_string()]), "_.v1*2");
        assert_ne!(
            derive_key(&["v1.2".to_string()]),
            derive_key(&["v1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_grouping_is_deterministic_by_label_sequence() {
        let images = vec![
            image("/a.png", &["x"]),
            image("/b.png", &["y"]),
            image("/c.png", &["x"]),
            image("/d.png", &[]),
        ];
        let groups = group_images(&images);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].key, "_.x");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].key, "_.y");
        assert_eq!(groups[2].key, "_");

        // reversed extraction order lands in the same partitions
        let mut reversed = images.clone();
        reversed.reverse();
        let regrouped = group_images(&reversed);
        assert_eq!(regrouped.len(), 3);
        let of = |key: &str| regrouped.iter().find(|g| g.key == key).unwrap().members.len();
        assert_eq!(of("_.x"), 2);
        assert_eq!(of("_.y"), 1);
        assert_eq!(of("_"), 1);
    }

    #[test]
    fn test_different_label_sequences_never_share_a_group() {
        let images = vec![image("/a.png", &["x", "y"]), image("/b.png", &["y", "x"])];
        let groups = group_images(&images);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_common_retina_ratio() {
        assert_eq!(common_retina_ratio(&[retina("/a@2x.png", 2, &[]), retina("/b@2x.png", 2, &[])]), Some(2));
        assert_eq!(common_retina_ratio(&[retina("/a@2x.png", 2, &[]), retina("/b@3x.png", 3, &[])]), None);
        assert_eq!(common_retina_ratio(&[retina("/a@2x.png", 2, &[]), image("/b.png", &[])]), None);
        assert_eq!(common_retina_ratio(&[]), None);
    }

    #[tokio::test]
    async fn test_pack_all_scales_padding_for_uniform_retina_group() {
        let packer = Arc::new(StubPacker::new());
        let orchestrator = Orchestrator::new(
            packer.clone(),
            PackOptions { padding: 3, ..Default::default() },
        );
        let images = vec![
            retina("/a@2x.png", 2, &["@2x"]),
            retina("/b@2x.png", 2, &["@2x"]),
            image("/c.png", &[]),
        ];
        let (results, stats) = orchestrator.pack_all(&images).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(stats, PackStats { images: 3, sheets: 2 });

        let mut paddings = packer.seen_padding.lock().unwrap().clone();
        paddings.sort_unstable();
        assert_eq!(paddings, vec![3, 6]);
    }

    #[tokio::test]
    async fn test_pack_all_carries_group_labels() {
        let orchestrator =
            Orchestrator::new(Arc::new(StubPacker::new()), PackOptions::default());
        let images = vec![image("/a.png", &["my"]), image("/b.png", &[])];
        let (results, _) = orchestrator.pack_all(&images).await.unwrap();
        assert_eq!(results[0].labels, vec!["my"]);
        assert!(results[1].labels.is_empty());
    }

    #[tokio::test]
    async fn test_pack_all_empty_input_is_a_no_op() {
        let orchestrator =
            Orchestrator::new(Arc::new(StubPacker::new()), PackOptions::default());
        let (results, stats) = orchestrator.pack_all(&[]).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(stats, PackStats::default());
    }

    #[tokio::test]
    async fn test_single_group_failure_fails_the_call() {
        let orchestrator = Orchestrator::new(Arc::new(FailingPacker), PackOptions::default());
        let images = vec![image("/a.png", &[]), image("/b.png", &["x"])];
        let err = orchestrator.pack_all(&images).await.unwrap_err();
        assert!(err.to_string().contains("no engine available"));
    }

    #[tokio::test]
    async fn test_missing_coordinate_violates_invariant() {
        let orchestrator = Orchestrator::new(Arc::new(ForgetfulPacker), PackOptions::default());
        let images = vec![image("/a.png", &[]), image("/b.png", &[])];
        let err = orchestrator.pack_all(&images).await.unwrap_err();
        assert!(err.to_string().contains("missing coordinates"));
    }

    #[test]
    fn test_reduction_percent() {
        let stats = PackStats { images: 10, sheets: 1 };
        assert!((stats.reduction_percent() - 90.0).abs() < f64::EPSILON);
        assert_eq!(PackStats::default().reduction_percent(), 0.0);
    }
}
