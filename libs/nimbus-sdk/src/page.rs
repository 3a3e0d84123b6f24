/// One page of a result set.
///
/// A page without a continuation token is the last one. An empty token is
/// normalized to none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    items: Vec<T>,
    continuation_token: Option<String>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, continuation_token: Option<String>) -> Self {
        Self {
            items,
            continuation_token: continuation_token.filter(|t| !t.is_empty()),
        }
    }

    /// Terminal page.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Token to present verbatim for the next page.
    #[must_use]
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.continuation_token.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        (self.items, self.continuation_token)
    }

    /// Convert the items, keeping the continuation token.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            continuation_token: self.continuation_token,
        }
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_terminal() {
        let page = Page::new(vec![1, 2], Some(String::new()));
        assert!(page.is_last());
        assert_eq!(page.continuation_token(), None);
    }

    #[test]
    fn map_keeps_token() {
        let page = Page::new(vec![1, 2, 3], Some("t2".into())).map(|n| n * 10);
        assert_eq!(page.items(), &[10, 20, 30]);
        assert_eq!(page.continuation_token(), Some("t2"));
        assert!(!page.is_last());
    }

    #[test]
    fn empty_page_with_token_is_not_last() {
        let page: Page<u8> = Page::new(Vec::new(), Some("more".into()));
        assert!(page.is_empty());
        assert!(!page.is_last());
        assert_eq!(page.into_parts(), (Vec::new(), Some("more".to_owned())));
    }
}
