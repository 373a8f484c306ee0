//! Built-in processors.

pub mod category_rss;
pub mod crossref;
pub mod html_list;
pub mod rss;

pub use category_rss::CategoryRssPreprocessor;
pub use crossref::{CrossrefDbPostprocessor, CrossrefEnricher, CrossrefFeedPreprocessor};
pub use html_list::{parse_listing, HtmlListPreprocessor};
pub use rss::{entry_date, keep_latest_date, parse_feed, FeedItem, RssPreprocessor};
