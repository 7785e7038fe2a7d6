//! Careport Live: self-refreshing views for CA Observer report pages.
//!
//! Responsibilities:
//! - polling a JSON list endpoint and re-rendering a bound table body
//! - reloading a fragment of the current page on a period
//! - suspending every poller while the page is hidden and refreshing on return
//! - carrying the page's query string (including paging) into every request
//! - turning raw beacon/search records into display strings

pub mod error;
pub mod fetch;
pub mod fragment;
pub mod live_table;
pub mod pagination;
pub mod payload;
pub mod query;
pub mod table;
pub mod transform;
pub mod visibility;

mod schedule;

pub use error::{BindError, PayloadError, TableError};
pub use fetch::{Accept, FetchError, FetchOutcome, FetchRequest, FetchResult, Fetcher, HttpFetcher};
pub use fragment::{
    FragmentConfig, FragmentHandle, FragmentReloader, FragmentStatus, FragmentView, HtmlFragment,
};
pub use live_table::{
    LiveTable, LiveTableConfig, LiveTableHandle, Mangle, NewPage, PollStatus, DEFAULT_PAGE_KEY,
    DEFAULT_PERIOD,
};
pub use pagination::{PagerState, PagerView, Paginator};
pub use payload::{PageData, Record};
pub use query::Query;
pub use table::{HtmlTable, TableBody, TableRenderer, TableRow, TableView, EMPTY_CELL};
pub use transform::{ca_mangler, rel_time_string, Presence, TransformOptions};
pub use visibility::{VisibilityEvent, VisibilitySignal};
