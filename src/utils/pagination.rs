// src/utils/pagination.rs

/// Resolved skip/limit window for a list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
    pub skip: i64,
}

/// Turns page+limit query parameters into a skip/limit window.
/// Page defaults to 1, limit to `default_limit` (capped at 100).
pub fn page_window(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> PageWindow {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(default_limit).clamp(1, 100);
    PageWindow {
        page,
        limit,
        skip: (page - 1) * limit,
    }
}

/// True when more rows exist past the returned page.
pub fn has_next_page(total: i64, skip: i64, returned: usize) -> bool {
    total > skip + returned as i64
}

/// The next page number, or None on the last page.
pub fn next_page(total: i64, window: PageWindow, returned: usize) -> Option<i64> {
    has_next_page(total, window.skip, returned).then_some(window.page + 1)
}

/// Builds a `%term%` ILIKE pattern with the LIKE metacharacters escaped,
/// so user input is matched literally (the equivalent of the regex
/// escaping the search endpoints require).
pub fn ilike_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if c == '\\' || c == '%' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults() {
        let window = page_window(None, None, 10);
        assert_eq!(window, PageWindow { page: 1, limit: 10, skip: 0 });
    }

    #[test]
    fn window_skips_previous_pages() {
        let window = page_window(Some(3), Some(9), 10);
        assert_eq!(window.skip, 18);
    }

    #[test]
    fn window_clamps_nonsense_input() {
        let window = page_window(Some(-4), Some(100_000), 10);
        assert_eq!(window.page, 1);
        assert_eq!(window.limit, 100);
    }

    #[test]
    fn next_page_only_when_rows_remain() {
        let window = page_window(Some(1), Some(10), 10);
        // 25 rows total, 10 returned on page 1: pages 2 and 3 exist.
        assert_eq!(next_page(25, window, 10), Some(2));
        // 10 rows total, all returned: done.
        assert_eq!(next_page(10, window, 10), None);
        // Short last page.
        let last = page_window(Some(3), Some(10), 10);
        assert_eq!(next_page(25, last, 5), None);
    }

    #[test]
    fn ilike_pattern_escapes_metacharacters() {
        assert_eq!(ilike_pattern("ada"), "%ada%");
        assert_eq!(ilike_pattern("100%"), "%100\\%%");
        assert_eq!(ilike_pattern("a_b"), "%a\\_b%");
        assert_eq!(ilike_pattern("back\\slash"), "%back\\\\slash%");
    }
}
