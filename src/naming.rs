//! Remote document names.
//!
//! Whole documents are uploaded as `{id}`, rendered pages as
//! `{id}_page_{n}`. Search hits are mapped back to source ids by reading the
//! leading numeric segment.

/// Name for a whole document (`page = None`) or one of its pages.
pub fn document_name(document_id: u32, page: Option<u32>) -> String {
    match page {
        Some(n) => format!("{}_page_{}", document_id, n),
        None => document_id.to_string(),
    }
}

/// Source document id encoded in a remote name.
pub fn parse_document_id(name: &str) -> Option<u32> {
    let stem = name.trim().trim_end_matches(".pdf");
    stem.split('_').next()?.parse().ok()
}

/// Page number encoded in a remote name, if it names a page.
pub fn parse_page_number(name: &str) -> Option<u32> {
    let (_, page) = name.trim().split_once("_page_")?;
    page.parse().ok()
}
