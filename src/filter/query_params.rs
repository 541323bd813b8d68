use super::types::{FilterValue, Pagination, SortDirection, SortSpec, LIMIT_KEY, PAGE_KEY, SEARCH_KEY, SORT_KEY};
use crate::config::{PaginationConfig, CONFIG};

/// Parsed list request: field filters, one sort key, full-text phrase and page window.
///
/// Built from raw query-string pairs (`?major[]=it&major[]=design&sort=-createdAt&page=2`).
/// Reserved keys (`sort`, `limit`, `page`, `search`) are pulled out during parsing and
/// never appear among the filters. Repeated keys and `key[]` keys become list filters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    filters: Vec<(String, FilterValue)>,
    sort: Option<SortSpec>,
    search: Option<String>,
    pagination: Pagination,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            filters: vec![],
            sort: None,
            search: None,
            pagination: normalize_pagination(None, None),
        }
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        let mut page: Option<String> = None;
        let mut limit: Option<String> = None;

        for (key, value) in pairs {
            let (name, bracketed) = split_bracket(key.as_ref());
            let value: String = value.into();
            match name {
                PAGE_KEY => page = Some(value),
                LIMIT_KEY => limit = Some(value),
                SORT_KEY => params.sort = SortSpec::parse(&value),
                SEARCH_KEY => params.search = non_empty(&value),
                _ => params.push_filter(name, value, bracketed),
            }
        }

        params.pagination = normalize_pagination(page.as_deref(), limit.as_deref());
        params
    }

    fn push_filter(&mut self, name: &str, value: String, bracketed: bool) {
        let existing = self.filters.iter_mut().find(|(key, _)| key == name);
        match (existing, bracketed) {
            (Some((_, current)), _) => {
                if !(bracketed && value.is_empty()) {
                    current.push(value);
                }
            }
            (None, true) => {
                let values = if value.is_empty() { vec![] } else { vec![value] };
                self.filters.push((name.to_string(), FilterValue::Many(values)));
            }
            (None, false) => self.filters.push((name.to_string(), FilterValue::Single(value))),
        }
    }

    /// Add or replace a filter term.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.set_filter(key, value);
        self
    }

    pub fn set_filter(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        match self.filters.iter_mut().find(|(k, _)| *k == key) {
            Some((_, current)) => *current = value,
            None => self.filters.push((key, value)),
        }
    }

    pub fn remove_filter(&mut self, key: &str) -> Option<FilterValue> {
        let index = self.filters.iter().position(|(k, _)| k == key)?;
        Some(self.filters.remove(index).1)
    }

    pub fn with_sort(mut self, raw: &str) -> Self {
        self.sort = SortSpec::parse(raw);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        let page = self.pagination.page.to_string();
        self.pagination = normalize_pagination(Some(&page), Some(&limit.to_string()));
        self
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.filters.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn filter(&self, key: &str) -> Option<&FilterValue> {
        self.filters.iter().find(|(k, _)| k == key).map(|(_, value)| value)
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }
}

impl SortSpec {
    /// `createdAt` sorts ascending, `-createdAt` descending.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (field, direction) = match trimmed.strip_prefix('-') {
            Some(rest) => (rest, SortDirection::Desc),
            None => (trimmed.strip_prefix('+').unwrap_or(trimmed), SortDirection::Asc),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self { field: field.to_string(), direction })
    }
}

/// Clamp the requested page window: `limit` in `1..=max_limit` (default on anything else),
/// `page` at least 1.
pub fn normalize_pagination(page: Option<&str>, limit: Option<&str>) -> Pagination {
    normalize_with(&CONFIG.pagination, page, limit)
}

fn normalize_with(settings: &PaginationConfig, page: Option<&str>, limit: Option<&str>) -> Pagination {
    let limit = match limit.and_then(|raw| raw.trim().parse::<i64>().ok()) {
        Some(value) if value > settings.max_limit => {
            if settings.debug_logging {
                tracing::warn!("Limit {} exceeds max {}, capping to max", value, settings.max_limit);
            }
            settings.max_limit
        }
        Some(value) if value >= 1 => value,
        _ => settings.default_limit,
    };

    let page = match page.and_then(|raw| raw.trim().parse::<i64>().ok()) {
        Some(value) if value >= 1 => value,
        _ => 1,
    };

    Pagination { page, limit }
}

fn split_bracket(key: &str) -> (&str, bool) {
    match key.find('[') {
        Some(index) if index > 0 && key.ends_with(']') => (&key[..index], true),
        _ => (key, false),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::RESERVED_KEYS;

    fn pairs(items: &[(&str, &str)]) -> QueryParams {
        QueryParams::from_pairs(items.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn reserved_keys_never_become_filters() {
        let params = pairs(&[("sort", "-createdAt"), ("page", "2"), ("limit", "5"), ("search", "rust"), ("name", "demo")]);
        let keys: Vec<&str> = params.filters().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name"]);
        for reserved in RESERVED_KEYS {
            assert!(params.filter(reserved).is_none());
        }
        assert_eq!(params.search(), Some("rust"));
        assert_eq!(params.pagination(), Pagination { page: 2, limit: 5 });
    }

    #[test]
    fn repeated_and_bracketed_keys_become_lists() {
        let params = pairs(&[("expertises", "it"), ("expertises", "design"), ("major[]", "cs")]);
        assert_eq!(params.filter("expertises"), Some(&FilterValue::Many(vec!["it".into(), "design".into()])));
        assert_eq!(params.filter("major"), Some(&FilterValue::Many(vec!["cs".into()])));
    }

    #[test]
    fn empty_bracket_value_yields_empty_list() {
        let params = pairs(&[("major[]", "")]);
        assert!(params.filter("major").is_some_and(FilterValue::is_empty));
    }

    #[test]
    fn sort_prefix_selects_direction() {
        let desc = SortSpec::parse("-createdAt").unwrap();
        assert_eq!(desc.field, "createdAt");
        assert_eq!(desc.direction, SortDirection::Desc);
        assert_eq!(SortSpec::parse("name").unwrap().direction, SortDirection::Asc);
        assert!(SortSpec::parse("-").is_none());
        assert!(SortSpec::parse("  ").is_none());
    }

    #[test]
    fn limit_is_clamped_and_defaults() {
        let max = CONFIG.pagination.max_limit;
        let default = CONFIG.pagination.default_limit;
        assert_eq!(normalize_pagination(None, Some("31")).limit, max.min(31));
        assert_eq!(normalize_pagination(None, Some("0")).limit, default);
        assert_eq!(normalize_pagination(None, Some("-4")).limit, default);
        assert_eq!(normalize_pagination(None, Some("abc")).limit, default);
        assert_eq!(normalize_pagination(None, None).limit, default);
        assert_eq!(normalize_pagination(None, Some("7")).limit, 7);
    }

    #[test]
    fn page_is_floored_at_one() {
        assert_eq!(normalize_pagination(Some("0"), None).page, 1);
        assert_eq!(normalize_pagination(Some("-3"), None).page, 1);
        assert_eq!(normalize_pagination(Some("x"), None).page, 1);
        assert_eq!(normalize_pagination(Some("4"), Some("10")).offset(), 30);
    }

    #[test]
    fn huge_page_saturates_the_offset() {
        let params = pairs(&[("page", "9223372036854775807"), ("limit", "30")]);
        let window = params.pagination();
        assert_eq!(window.page, i64::MAX);
        assert_eq!(window.offset(), i64::MAX);
        assert_eq!(normalize_pagination(Some("99999999999999999999"), None).page, 1);
    }

    #[test]
    fn limit_stays_within_bounds_under_out_of_range_settings() {
        let loose = PaginationConfig { default_limit: 0, max_limit: 1000, debug_logging: false }.clamped();
        assert_eq!(normalize_with(&loose, None, Some("500")).limit, 30);
        assert_eq!(normalize_with(&loose, None, None).limit, 1);
        assert_eq!(normalize_with(&loose, None, Some("-1")).limit, 1);

        let tight = PaginationConfig { default_limit: -3, max_limit: -3, debug_logging: false }.clamped();
        assert_eq!(normalize_with(&tight, None, Some("30")).limit, 1);
        assert_eq!(normalize_with(&tight, Some("2"), Some("abc")), Pagination { page: 2, limit: 1 });
    }

    #[test]
    fn builder_replaces_existing_filter() {
        let params = QueryParams::new().with_filter("role", "OWNER").with_filter("role", vec!["MEMBER", "OWNER"]);
        assert_eq!(params.filters().count(), 1);
        assert_eq!(params.filter("role").unwrap().candidates(), vec!["MEMBER", "OWNER"]);
    }
}
