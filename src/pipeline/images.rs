//! Page images pre-rendered to disk.
//!
//! Layout: `<root>/<doc_id>/page_<n>.<png|jpg|jpeg>`, page numbers 1-based.

use super::{PageImage, PageStore};
use crate::dataset::PageRef;
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Index of page image files under a root directory.
#[derive(Debug, Default)]
pub struct ImageDirectory {
    root: PathBuf,
    files: BTreeMap<PageRef, PathBuf>,
    page_counts: HashMap<u32, u32>,
}

impl ImageDirectory {
    /// Scan `root` for page images. Files that do not follow the layout are ignored.
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(EvalError::PageImage(format!(
                "page image directory not found: {}",
                root.display()
            )));
        }

        let mut files = BTreeMap::new();
        let mut page_counts: HashMap<u32, u32> = HashMap::new();

        for entry in WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(page) = parse_page_path(path) else {
                debug!(path = %path.display(), "not a page image, skipping");
                continue;
            };

            let count = page_counts.entry(page.doc_id).or_insert(0);
            *count = (*count).max(page.page_num);
            files.insert(page, path.to_path_buf());
        }

        info!(
            "Found {} page images for {} documents in {}",
            files.len(),
            page_counts.len(),
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
            page_counts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl PageStore for ImageDirectory {
    fn page_count(&self, doc_id: u32) -> Option<u32> {
        self.page_counts.get(&doc_id).copied()
    }

    async fn load(&self, page: PageRef) -> Result<PageImage> {
        let path = self
            .files
            .get(&page)
            .ok_or_else(|| EvalError::PageImage(format!("no image for {}", page)))?;

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| EvalError::io(path, e))?;
        let media_type = match extension(path).as_str() {
            "png" => "image/png",
            _ => "image/jpeg",
        };

        Ok(PageImage {
            page,
            media_type: media_type.to_string(),
            data,
        })
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// `<doc_id>/page_<n>.<ext>` to a page reference.
fn parse_page_path(path: &Path) -> Option<PageRef> {
    if !matches!(extension(path).as_str(), "png" | "jpg" | "jpeg") {
        return None;
    }

    let doc_id = path.parent()?.file_name()?.to_str()?.parse().ok()?;
    let page_num: u32 = path
        .file_stem()?
        .to_str()?
        .strip_prefix("page_")?
        .parse()
        .ok()?;

    (page_num > 0).then(|| PageRef::new(doc_id, page_num))
}
