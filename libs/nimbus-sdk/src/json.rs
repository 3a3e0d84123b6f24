use std::time::Duration;

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method};
use nimbus_http::{Context, HttpError, InvalidUriKind, Pipeline, Request, parse_url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::page::Page;
use crate::pager::Pager;

/// How the continuation value of a page leads to the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// The value is a link, absolute or relative to the first page's URL
    NextLink,
    /// The value is an opaque token, sent verbatim as this query parameter
    /// on the first page's URL, other query pairs kept
    Token { query_param: String },
}

impl Continuation {
    #[must_use]
    pub fn token(query_param: impl Into<String>) -> Self {
        Self::Token {
            query_param: query_param.into(),
        }
    }
}

/// Body layout of a JSON list endpoint.
#[derive(Debug, Clone)]
pub struct JsonPagerOptions {
    /// Field holding the page's items array
    pub items_field: String,
    /// Field holding the continuation value; absent, `null` or `""` ends
    /// the walk
    pub continuation_field: String,
    pub continuation: Continuation,
    /// Deadline for each page fetch, retries included
    pub page_timeout: Option<Duration>,
}

impl Default for JsonPagerOptions {
    fn default() -> Self {
        Self {
            items_field: "items".to_owned(),
            continuation_field: "nextLink".to_owned(),
            continuation: Continuation::NextLink,
            page_timeout: None,
        }
    }
}

/// Builds [`Pager`]s for list endpoints returning
/// `{"items": [...], "nextLink": "..."}` through a [`Pipeline`].
///
/// Next links may be relative to the first page's URL but must stay on its
/// origin, since the pipeline's credentials travel with every page request.
/// With [`Continuation::Token`] the value is never parsed as a URL.
#[derive(Debug, Clone)]
pub struct JsonPager {
    pipeline: Pipeline,
    options: JsonPagerOptions,
    headers: HeaderMap,
}

impl JsonPager {
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            options: JsonPagerOptions::default(),
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: JsonPagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Header sent with every page request.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn options(&self) -> &JsonPagerOptions {
        &self.options
    }

    /// Pager over the list starting at `url`.
    #[must_use]
    pub fn list<T>(&self, url: Url) -> Pager<T, HttpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let first = {
            let this = self.clone();
            let url = url.clone();
            move || {
                let this = this.clone();
                let url = url.clone();
                async move { this.fetch::<T>(url).await }
            }
        };
        let this = self.clone();
        let next = move |continuation: String| {
            let this = this.clone();
            let base = url.clone();
            async move {
                let url = this.continuation_url(&base, &continuation)?;
                this.fetch::<T>(url).await
            }
        };
        Pager::with_next(first, next)
    }

    fn continuation_url(&self, first: &Url, value: &str) -> Result<Url, HttpError> {
        match &self.options.continuation {
            Continuation::NextLink => resolve_next_link(first, value),
            Continuation::Token { query_param } => {
                Ok(with_query_token(first, query_param, value))
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, HttpError> {
        let mut ctx = Context::new();
        if let Some(timeout) = self.options.page_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        let mut request = Request::new(Method::GET, url);
        request.headers_mut().extend(self.headers.clone());

        let body: Value = self.pipeline.send(&mut ctx, &mut request).await?.json().await?;
        let page = parse_page(body, &self.options)?;
        tracing::debug!(
            items = page.len(),
            last = page.is_last(),
            "Page received"
        );
        Ok(page)
    }
}

fn parse_page<T: DeserializeOwned>(
    body: Value,
    options: &JsonPagerOptions,
) -> Result<Page<T>, HttpError> {
    let Value::Object(mut body) = body else {
        return Err(HttpError::Protocol("page body is not a JSON object".into()));
    };

    let items = match body.remove(&options.items_field) {
        Some(items @ Value::Array(_)) => serde_json::from_value::<Vec<T>>(items)?,
        Some(_) => {
            return Err(HttpError::Protocol(format!(
                "page field '{}' is not an array",
                options.items_field
            )));
        }
        None => {
            return Err(HttpError::Protocol(format!(
                "page body has no '{}' field",
                options.items_field
            )));
        }
    };

    let continuation = match body.remove(&options.continuation_field) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value),
        Some(_) => {
            return Err(HttpError::Protocol(format!(
                "page field '{}' is not a string",
                options.continuation_field
            )));
        }
    };

    Ok(Page::new(items, continuation))
}

fn resolve_next_link(base: &Url, link: &str) -> Result<Url, HttpError> {
    let url = base.join(link).map_err(|e| HttpError::InvalidUri {
        url: link.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;
    let url = parse_url(url.as_str())?;
    if url.origin() != base.origin() {
        return Err(HttpError::Protocol(format!(
            "next link leaves the origin of the first page: {}",
            url.origin().ascii_serialization()
        )));
    }
    Ok(url)
}

fn with_query_token(first: &Url, param: &str, token: &str) -> Url {
    let kept: Vec<(String, String)> = first
        .query_pairs()
        .filter(|(name, _)| name != param)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    let mut url = first.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, token);
    url
}
