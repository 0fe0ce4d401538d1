//! Task model and batch classification.
//!
//! An upload batch is an arbitrary mix of documents, archives, and loose
//! images, each carrying the relative path the client supplied (which may
//! encode a source folder, e.g. `chapter1/page03.jpg`). Classification
//! partitions the batch into independent conversion tasks so that one bad
//! input can never corrupt the others:
//!
//! * every image-containing folder becomes one [`TaskKind::Merge`] task
//!   named after the folder, in discovery order;
//! * all root-level images together become one Merge task;
//! * every root-level document or archive becomes its own
//!   [`TaskKind::Convert`] task, in upload order.
//!
//! The resulting order is deterministic for a given input but carries no
//! further meaning.

use crate::error::BinderyError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One staged upload: the client-supplied relative path plus the local
/// staging path the bytes were written to.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Relative path as submitted, possibly with a folder prefix.
    pub relative_path: PathBuf,
    /// Where the uploaded bytes live in the staging area.
    pub local_path: PathBuf,
}

impl UploadItem {
    pub fn new(relative_path: impl Into<PathBuf>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            local_path: local_path.into(),
        }
    }
}

/// What a task does with its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Merge an ordered set of loose images into one output.
    Merge,
    /// Convert a single document or archive.
    Convert,
}

/// One independent unit of conversion work.
///
/// Invariant: every classified upload belongs to exactly one task.
#[derive(Debug, Clone)]
pub struct Task {
    pub kind: TaskKind,
    /// Base name for the output artifact (folder name, file stem, or a
    /// synthesized collective name).
    pub name: String,
    /// Convert: exactly one source. Merge: the page sequence in upload
    /// order.
    pub sources: Vec<UploadItem>,
}

impl Task {
    /// The single source of a Convert task.
    ///
    /// Classification guarantees Convert tasks hold exactly one source.
    pub fn source(&self) -> &UploadItem {
        &self.sources[0]
    }
}

// ── Extension predicates ─────────────────────────────────────────────────

fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Recognized raster-image extensions (classification and archive scans).
pub(crate) fn is_image(path: &Path) -> bool {
    matches!(
        ext_lower(path).as_deref(),
        Some(
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "avif" | "heic"
                | "heif" | "jxl"
        )
    )
}

/// Encodings the packers downstream cannot rely on; these are always
/// re-encoded onto the JPEG output path.
pub(crate) fn is_exotic_image(path: &Path) -> bool {
    matches!(
        ext_lower(path).as_deref(),
        Some("webp" | "avif" | "heic" | "heif" | "jxl")
    )
}

/// Paginated-document extensions.
pub(crate) fn is_document(path: &Path) -> bool {
    matches!(ext_lower(path).as_deref(), Some("pdf"))
}

/// Page-image-archive extensions.
pub(crate) fn is_archive(path: &Path) -> bool {
    matches!(
        ext_lower(path).as_deref(),
        Some("zip" | "cbz" | "rar" | "cbr" | "7z" | "cb7" | "tar" | "cbt")
    )
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string())
}

// ── Classifier ───────────────────────────────────────────────────────────

/// Partition an upload batch into independent conversion tasks.
///
/// # Errors
/// * [`BinderyError::EmptyBatch`] when `items` is empty.
/// * [`BinderyError::UnsupportedExtension`] when a root item is neither an
///   image, a document, nor an archive. Input validation rejects the whole
///   batch before any task is created.
pub fn classify_batch(items: Vec<UploadItem>) -> Result<Vec<Task>, BinderyError> {
    if items.is_empty() {
        return Err(BinderyError::EmptyBatch);
    }

    // Validate root items up front: an unsupported extension rejects the
    // batch before any work starts.
    for item in &items {
        let rel = &item.relative_path;
        if rel.components().count() <= 1
            && !is_image(rel)
            && !is_document(rel)
            && !is_archive(rel)
        {
            return Err(BinderyError::UnsupportedExtension { path: rel.clone() });
        }
    }

    // Folder groups keyed by first path segment, discovery order.
    let mut folders: Vec<(String, Vec<UploadItem>)> = Vec::new();
    let mut root_images: Vec<UploadItem> = Vec::new();
    let mut root_documents: Vec<UploadItem> = Vec::new();

    for item in items {
        let rel = item.relative_path.clone();
        let mut components = rel.components();
        let first = components
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();

        if components.next().is_some() {
            // Multi-segment: belongs to the folder named by its first
            // segment. Non-image entries inside folders carry no pages and
            // are dropped from the merge sequence.
            if !is_image(&rel) {
                warn!("Ignoring non-image '{}' inside folder '{}'", rel.display(), first);
                continue;
            }
            match folders.iter_mut().find(|(name, _)| *name == first) {
                Some((_, group)) => group.push(item),
                None => folders.push((first, vec![item])),
            }
        } else if is_image(&rel) {
            root_images.push(item);
        } else {
            root_documents.push(item);
        }
    }

    let mut tasks = Vec::new();

    for (name, group) in folders {
        if group.is_empty() {
            continue;
        }
        debug!("Folder '{}' → merge task with {} images", name, group.len());
        tasks.push(Task {
            kind: TaskKind::Merge,
            name,
            sources: group,
        });
    }

    if !root_images.is_empty() {
        // A lone root image keeps its own name; an unrelated pile gets a
        // collective one.
        let name = if root_images.len() == 1 {
            stem_of(&root_images[0].relative_path)
        } else {
            "images".to_string()
        };
        debug!("Root images → merge task '{}' ({} images)", name, root_images.len());
        tasks.push(Task {
            kind: TaskKind::Merge,
            name,
            sources: root_images,
        });
    }

    for item in root_documents {
        tasks.push(Task {
            kind: TaskKind::Convert,
            name: stem_of(&item.relative_path),
            sources: vec![item],
        });
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(rel: &str) -> UploadItem {
        UploadItem::new(rel, format!("/staging/{}", rel.replace('/', "_")))
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            classify_batch(vec![]),
            Err(BinderyError::EmptyBatch)
        ));
    }

    #[test]
    fn unsupported_root_extension_rejects_batch() {
        let err = classify_batch(vec![item("notes.txt")]).unwrap_err();
        assert!(matches!(err, BinderyError::UnsupportedExtension { .. }));
    }

    #[test]
    fn three_root_images_become_one_merge_task() {
        let tasks =
            classify_batch(vec![item("a.jpg"), item("b.jpg"), item("c.png")]).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::Merge);
        assert_eq!(tasks[0].sources.len(), 3);
        // Upload order preserved.
        assert_eq!(tasks[0].sources[0].relative_path, PathBuf::from("a.jpg"));
        assert_eq!(tasks[0].sources[2].relative_path, PathBuf::from("c.png"));
    }

    #[test]
    fn single_root_image_names_task_after_itself() {
        let tasks = classify_batch(vec![item("cover.png")]).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "cover");
    }

    #[test]
    fn multiple_root_images_get_collective_name() {
        let tasks = classify_batch(vec![item("a.jpg"), item("b.jpg")]).unwrap();
        assert_eq!(tasks[0].name, "images");
    }

    #[test]
    fn folders_become_named_merge_tasks() {
        let tasks = classify_batch(vec![
            item("chapter1/p01.jpg"),
            item("chapter1/p02.jpg"),
            item("chapter2/p01.jpg"),
        ])
        .unwrap();
        assert_eq!(tasks.len(), 2);
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"chapter1"));
        assert!(names.contains(&"chapter2"));
        let ch1 = tasks.iter().find(|t| t.name == "chapter1").unwrap();
        assert_eq!(ch1.sources.len(), 2);
        assert_eq!(ch1.kind, TaskKind::Merge);
    }

    #[test]
    fn documents_become_individual_convert_tasks() {
        let tasks = classify_batch(vec![item("one.pdf"), item("two.cbz")]).unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.kind == TaskKind::Convert));
        assert!(tasks.iter().all(|t| t.sources.len() == 1));
    }

    #[test]
    fn mixed_batch_membership() {
        let tasks = classify_batch(vec![
            item("vol1/p1.jpg"),
            item("vol1/p2.jpg"),
            item("loose.jpg"),
            item("book.pdf"),
            item("issue.cbr"),
        ])
        .unwrap();
        // One folder merge, one root merge, two converts.
        assert_eq!(tasks.len(), 4);
        assert_eq!(
            tasks.iter().filter(|t| t.kind == TaskKind::Merge).count(),
            2
        );
        assert_eq!(
            tasks.iter().filter(|t| t.kind == TaskKind::Convert).count(),
            2
        );
        // Every classified upload belongs to exactly one task.
        let total: usize = tasks.iter().map(|t| t.sources.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn classification_is_deterministic() {
        let batch = || {
            vec![
                item("b/x.png"),
                item("a/y.png"),
                item("z.pdf"),
                item("loose.jpg"),
            ]
        };
        let first: Vec<String> = classify_batch(batch())
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        let second: Vec<String> = classify_batch(batch())
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn non_image_inside_folder_is_dropped_from_sequence() {
        let tasks = classify_batch(vec![
            item("ch1/p1.jpg"),
            item("ch1/thumbs.db"),
            item("ch1/p2.jpg"),
        ])
        .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].sources.len(), 2);
    }

    #[test]
    fn extension_predicates() {
        assert!(is_image(Path::new("x.JPG")));
        assert!(is_image(Path::new("x.webp")));
        assert!(!is_image(Path::new("x.pdf")));
        assert!(is_document(Path::new("x.pdf")));
        assert!(is_archive(Path::new("x.cbz")));
        assert!(is_archive(Path::new("x.tar")));
        assert!(is_exotic_image(Path::new("x.avif")));
        assert!(!is_exotic_image(Path::new("x.png")));
    }
}
