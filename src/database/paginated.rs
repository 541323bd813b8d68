use serde::{Deserialize, Serialize};

use crate::filter::Pagination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub current_page: i64,
    pub limit: i64,
    pub count: i64,
    pub total_page: i64,
    pub total_result: i64,
}

impl PageMeta {
    pub fn new(pagination: Pagination, count: usize, total_result: i64) -> Self {
        let limit = pagination.limit.max(1);
        Self {
            current_page: pagination.page,
            limit: pagination.limit,
            count: count as i64,
            total_page: (total_result.max(0) + limit - 1) / limit,
            total_result,
        }
    }
}

/// Page of results with its pagination summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithMeta<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> WithMeta<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total_result: i64) -> Self {
        let meta = PageMeta::new(pagination, data.len(), total_result);
        Self { data, meta }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> WithMeta<U> {
        WithMeta { data: self.data.into_iter().map(f).collect(), meta: self.meta }
    }

    /// Re-shape every item into its public view.
    pub fn into_view<V: From<T>>(self) -> WithMeta<V> {
        self.map(V::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_page_rounds_up() {
        let meta = PageMeta::new(Pagination { page: 1, limit: 2 }, 2, 3);
        assert_eq!(meta, PageMeta { current_page: 1, limit: 2, count: 2, total_page: 2, total_result: 3 });
        assert_eq!(PageMeta::new(Pagination { page: 1, limit: 30 }, 0, 0).total_page, 0);
        assert_eq!(PageMeta::new(Pagination { page: 1, limit: 5 }, 5, 10).total_page, 2);
    }

    #[test]
    fn count_tracks_data_length() {
        let page = WithMeta::new(vec![1, 2, 3], Pagination { page: 2, limit: 3 }, 7);
        assert_eq!(page.meta.count, 3);
        assert_eq!(page.meta.total_page, 3);
        let doubled = page.map(|n| n * 2);
        assert_eq!(doubled.data, vec![2, 4, 6]);
        assert_eq!(doubled.meta.current_page, 2);
    }

    #[test]
    fn serializes_camel_case_meta() {
        let page = WithMeta::new(vec!["a"], Pagination { page: 1, limit: 30 }, 1);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["meta"]["totalResult"], 1);
        assert_eq!(json["meta"]["currentPage"], 1);
        assert_eq!(json["meta"]["totalPage"], 1);
    }
}
