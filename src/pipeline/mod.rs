//! The RAG pipeline under evaluation, seen through its capabilities.
//!
//! Retrieval and generation are external services; the evaluator only talks
//! to them through [`Retriever`] and [`Generator`]. Page images come from a
//! [`PageStore`], which also knows how many pages each document has so that
//! retrieved pages can be widened into a window of neighbours.

mod images;
mod remote;

pub use images::ImageDirectory;
pub use remote::{HttpRetriever, VisionChatGenerator};

use crate::dataset::PageRef;
use crate::error::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// One retrieval hit. Lists are ordered by descending score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPage {
    pub doc_id: u32,
    pub page_num: u32,
    pub score: f64,
}

impl RetrievedPage {
    pub fn new(doc_id: u32, page_num: u32, score: f64) -> Self {
        Self {
            doc_id,
            page_num,
            score,
        }
    }

    pub fn page(&self) -> PageRef {
        PageRef::new(self.doc_id, self.page_num)
    }
}

/// Encoded image of a single page.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page: PageRef,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    pub data: Vec<u8>,
}

impl PageImage {
    /// `data:` URL suitable for an `image_url` content part.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.data))
    }
}

/// Finds the pages most relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPage>>;
}

/// Answers a question from page images.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, question: &str, pages: &[PageImage]) -> Result<String>;
}

/// Source of page images.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Number of pages in a document, if the document is known.
    fn page_count(&self, doc_id: u32) -> Option<u32>;

    async fn load(&self, page: PageRef) -> Result<PageImage>;
}

/// Widen each retrieved page into `[page - before, page + after]`.
///
/// Windows are clamped to the document's pages, merged, and returned sorted
/// by `(doc_id, page_num)`. Pages of documents the store does not know are
/// dropped. With both window sizes at zero the input is returned unchanged.
pub fn expand_with_overlap(
    pages: &[PageRef],
    pages_before: u32,
    pages_after: u32,
    store: &dyn PageStore,
) -> Vec<PageRef> {
    if pages_before == 0 && pages_after == 0 {
        return pages.to_vec();
    }

    let mut expanded = BTreeSet::new();
    for page in pages {
        let Some(total) = store.page_count(page.doc_id) else {
            debug!(doc_id = page.doc_id, "no page images for document, skipping");
            continue;
        };

        let first = page.page_num.saturating_sub(pages_before).max(1);
        let last = page.page_num.saturating_add(pages_after).min(total);
        expanded.extend((first..=last).map(|n| PageRef::new(page.doc_id, n)));
    }

    expanded.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use std::collections::HashMap;

    struct FixedCounts(HashMap<u32, u32>);

    #[async_trait]
    impl PageStore for FixedCounts {
        fn page_count(&self, doc_id: u32) -> Option<u32> {
            self.0.get(&doc_id).copied()
        }

        async fn load(&self, page: PageRef) -> Result<PageImage> {
            Err(EvalError::PageImage(format!("no image for {}", page)))
        }
    }

    fn store() -> FixedCounts {
        FixedCounts(HashMap::from([(0, 10), (1, 3)]))
    }

    #[test]
    fn test_zero_window_is_identity() {
        let pages = vec![PageRef::new(1, 2), PageRef::new(0, 5), PageRef::new(1, 2)];
        assert_eq!(expand_with_overlap(&pages, 0, 0, &store()), pages);
    }

    #[test]
    fn test_window_merges_and_sorts() {
        let pages = vec![PageRef::new(0, 5), PageRef::new(0, 6)];
        let expanded = expand_with_overlap(&pages, 1, 1, &store());
        let nums: Vec<u32> = expanded.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_window_clamps_to_document() {
        let pages = vec![PageRef::new(1, 1), PageRef::new(1, 3)];
        let expanded = expand_with_overlap(&pages, 2, 2, &store());
        assert_eq!(
            expanded,
            vec![PageRef::new(1, 1), PageRef::new(1, 2), PageRef::new(1, 3)]
        );
    }

    #[test]
    fn test_unknown_document_dropped() {
        let pages = vec![PageRef::new(7, 2), PageRef::new(0, 1)];
        let expanded = expand_with_overlap(&pages, 0, 1, &store());
        assert_eq!(expanded, vec![PageRef::new(0, 1), PageRef::new(0, 2)]);
    }

    #[test]
    fn test_data_url() {
        let image = PageImage {
            page: PageRef::new(0, 1),
            media_type: "image/png".to_string(),
            data: b"abc".to_vec(),
        };
        assert_eq!(image.to_data_url(), "data:image/png;base64,YWJj");
    }
}
