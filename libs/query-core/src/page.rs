use serde::{Deserialize, Serialize};

/// One page of results plus the total row count of the unpaged query.
#[cfg_attr(feature = "with-utoipa", derive(utoipa::ToSchema))]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    /// 1-based.
    pub page_index: u64,
    pub total: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    /// Build a page for rows fetched at `offset` with `page_size` rows per page.
    pub fn new(content: Vec<T>, offset: u64, page_size: u64, total: u64) -> Self {
        let page_size = page_size.max(1);
        Self {
            content,
            page_index: offset / page_size + 1,
            total,
            page_size,
        }
    }

    pub fn empty(page_size: u64) -> Self {
        Self::new(Vec::new(), 0, page_size, 0)
    }

    /// Zero when `page_size` is zero, which only a deserialized page can carry.
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page_index < self.total_pages()
    }

    /// Map content while preserving the paging numbers.
    pub fn map_content<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page_index: self.page_index,
            total: self.total,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers() {
        let p = Page::new(vec![1, 2, 3, 4, 5], 10, 10, 15);
        assert_eq!(p.page_index, 2);
        assert_eq!(p.total_pages(), 2);
        assert!(!p.has_next());

        let first = Page::new(vec![0; 10], 0, 10, 15);
        assert_eq!(first.page_index, 1);
        assert!(first.has_next());
    }

    #[test]
    fn zero_page_size_from_the_wire() {
        let p: Page<u8> = serde_json::from_value(serde_json::json!({
            "content": [], "pageIndex": 1, "total": 7, "pageSize": 0
        }))
        .unwrap();
        assert_eq!(p.total_pages(), 0);
        assert!(!p.has_next());
    }

    #[cfg(feature = "with-utoipa")]
    #[test]
    fn page_schema_uses_wire_names() {
        use utoipa::PartialSchema;
        let schema = serde_json::to_value(Page::<String>::schema()).unwrap();
        assert!(schema["properties"].get("pageIndex").is_some());
        assert!(schema["properties"].get("pageSize").is_some());
    }

    #[test]
    fn serializes_camel_case() {
        let p = Page::new(vec!["a"], 0, 20, 1).map_content(str::to_uppercase);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"content": ["A"], "pageIndex": 1, "total": 1, "pageSize": 20})
        );
    }
}
