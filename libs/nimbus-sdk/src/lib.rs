#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Paged retrieval for Nimbus service clients.
//!
//! A [`Pager`] is built from page-fetch functions and hands out lazy streams:
//! [`Pager::pages`] yields whole [`Page`]s, [`Pager::items`] flattens them.
//! Pages are fetched only when the consumer asks for more, and every call to
//! `pages()`/`items()` starts again from the first page.
//!
//! [`JsonPager`] produces pagers for services that return
//! `{"items": [...], "nextLink": "..."}` bodies through a
//! [`nimbus_http::Pipeline`].
//!
//! ```ignore
//! use futures_util::TryStreamExt;
//!
//! let widgets: Vec<Widget> = JsonPager::new(pipeline)
//!     .list::<Widget>(url)
//!     .items()
//!     .try_collect()
//!     .await?;
//! ```

mod error;
mod json;
mod page;
mod pager;

pub use error::PagerError;
pub use json::{Continuation, JsonPager, JsonPagerOptions};
pub use page::Page;
pub use pager::{ItemStream, PageStream, Pager, PagerState};
