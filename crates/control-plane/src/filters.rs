//! Generic search, sort and pagination for list endpoints.
//!
//! The pipeline is `search -> sort -> paginate`. `total_count` is measured
//! after the search and `total_available` before it, so clients can render
//! both the filtered and the unfiltered totals; re-applying the pipeline
//! with unchanged inputs is a no-op.

use std::cmp::Ordering;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQueryParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Accessor producing the searchable text of one field.
pub type SearchAccessor<T> = fn(&T) -> String;

/// Total-order comparator bound to a sort key.
pub struct SortBinding<T> {
    pub key: &'static str,
    pub cmp: fn(&T, &T) -> Ordering,
}

pub struct FilterConfig<T> {
    pub search_accessors: Vec<SearchAccessor<T>>,
    pub sort_bindings: Vec<SortBinding<T>>,
}

pub struct FilterResult<T> {
    pub items: Vec<T>,
    /// Matching items after search, before pagination.
    pub total_count: usize,
    /// Items before any filtering.
    pub total_available: usize,
}

impl<T> FilterResult<T> {
    /// `X-Total-Count` / `X-Total-Available` response headers.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-total-count"),
            HeaderValue::from_str(&self.total_count.to_string()).expect("numeric header"),
        );
        headers.insert(
            HeaderName::from_static("x-total-available"),
            HeaderValue::from_str(&self.total_available.to_string()).expect("numeric header"),
        );
        headers
    }
}

pub fn search_order_and_paginate<T>(
    mut items: Vec<T>,
    params: &ListQueryParams,
    config: &FilterConfig<T>,
) -> FilterResult<T> {
    let total_available = items.len();

    if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        items.retain(|item| {
            config
                .search_accessors
                .iter()
                .any(|accessor| accessor(item).to_lowercase().contains(&needle))
        });
    }

    if let Some(sort_key) = params.sort.as_deref() {
        if let Some(binding) = config
            .sort_bindings
            .iter()
            .find(|binding| binding.key == sort_key)
        {
            match params.order {
                SortOrder::Asc => items.sort_by(binding.cmp),
                SortOrder::Desc => items.sort_by(|a, b| (binding.cmp)(a, b).reverse()),
            }
        }
    }

    let total_count = items.len();
    let items = paginate(items, params.start.unwrap_or(0), params.limit.unwrap_or(0));

    FilterResult {
        items,
        total_count,
        total_available,
    }
}

/// Clamps `start` into `[0, len]`; `limit <= 0` means no limit.
fn paginate<T>(items: Vec<T>, start: i64, limit: i64) -> Vec<T> {
    if limit <= 0 {
        return items;
    }
    let len = items.len();
    let start = (start.max(0) as usize).min(len);
    let end = start.saturating_add(limit as usize).min(len);
    items.into_iter().skip(start).take(end - start).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: &'static str,
        size: u32,
    }

    fn items() -> Vec<Item> {
        vec![
            Item {
                name: "alpha",
                size: 3,
            },
            Item {
                name: "Beta",
                size: 1,
            },
            Item {
                name: "gamma",
                size: 2,
            },
        ]
    }

    fn config() -> FilterConfig<Item> {
        FilterConfig {
            search_accessors: vec![|item| item.name.to_string()],
            sort_bindings: vec![SortBinding {
                key: "size",
                cmp: |a, b| a.size.cmp(&b.size),
            }],
        }
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let params = ListQueryParams {
            search: Some("bet".into()),
            ..Default::default()
        };
        let result = search_order_and_paginate(items(), &params, &config());
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "Beta");
        assert_eq!(result.total_count, 1);
        assert_eq!(result.total_available, 3);
    }

    #[test]
    fn sort_descending_inverts_the_comparator() {
        let params = ListQueryParams {
            sort: Some("size".into()),
            order: SortOrder::Desc,
            ..Default::default()
        };
        let result = search_order_and_paginate(items(), &params, &config());
        let sizes: Vec<u32> = result.items.iter().map(|item| item.size).collect();
        assert_eq!(sizes, vec![3, 2, 1]);
    }

    #[test]
    fn pagination_clamps_start_and_ignores_non_positive_limits() {
        let all = search_order_and_paginate(
            items(),
            &ListQueryParams {
                limit: Some(0),
                ..Default::default()
            },
            &config(),
        );
        assert_eq!(all.items.len(), 3);

        let page = search_order_and_paginate(
            items(),
            &ListQueryParams {
                start: Some(2),
                limit: Some(5),
                ..Default::default()
            },
            &config(),
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_count, 3);

        let past_the_end = search_order_and_paginate(
            items(),
            &ListQueryParams {
                start: Some(100),
                limit: Some(5),
                ..Default::default()
            },
            &config(),
        );
        assert!(past_the_end.items.is_empty());
        assert_eq!(past_the_end.total_count, 3);

        let negative_start = search_order_and_paginate(
            items(),
            &ListQueryParams {
                start: Some(-3),
                limit: Some(2),
                ..Default::default()
            },
            &config(),
        );
        assert_eq!(negative_start.items.len(), 2);
    }

    #[test]
    fn reapplication_with_unchanged_inputs_is_idempotent() {
        let params = ListQueryParams {
            search: Some("a".into()),
            sort: Some("size".into()),
            ..Default::default()
        };

        let once = search_order_and_paginate(items(), &params, &config());
        let twice = search_order_and_paginate(once.items.clone(), &params, &config());
        assert_eq!(once.items, twice.items);
    }

    #[test]
    fn totals_are_ordered_available_count_len() {
        let params = ListQueryParams {
            search: Some("a".into()),
            limit: Some(1),
            ..Default::default()
        };
        let result = search_order_and_paginate(items(), &params, &config());
        assert!(result.total_available >= result.total_count);
        assert!(result.total_count >= result.items.len());
        assert_eq!(result.headers().get("x-total-count").unwrap(), "2");
        assert_eq!(result.headers().get("x-total-available").unwrap(), "3");
    }
}
