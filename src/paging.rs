//! Offset/limit paging over collection endpoints.
//!
//! Every list endpoint of the Integration API answers with the same envelope:
//!
//! ```json
//! {
//!   "meta": { "paging": { "currentPageSize": 2, "offset": 0, "totalSize": 5 }, "schema": "..." },
//!   "status": { "code": 200, "message": "Success" },
//!   "files": [ { ... }, { ... } ]
//! }
//! ```
//!
//! Only the name of the payload array changes from one endpoint to the next.
//! [`aggregate`] walks such an endpoint from offset 0, one page at a time, and
//! returns every item in the order the server reported them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// `limit` sent on every page request unless the caller overrides it.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Tuning for one aggregation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// Value of the `limit` query parameter. Must be positive.
    pub page_size: usize,
    /// Upper bound on fetches. `None` walks until an empty page.
    ///
    /// The first page is always fetched, so `Some(0)` behaves like `Some(1)`.
    pub max_pages: Option<usize>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
        }
    }
}

impl PageOptions {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }
}

/// Where the payload array lives in a page envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKey<'a> {
    /// The array is stored under this top-level key (`"files"`, `"tasks"`...).
    Named(&'a str),
    /// Use the first array-valued top-level field, in document order.
    Infer,
}

/// Cooperative cancellation for a running aggregation.
///
/// Clones share the same flag, so one can be handed to another thread and
/// tripped from there. The flag is checked before each page request; a fetch
/// already in flight is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum PagingError {
    /// The page fetch itself failed (connection, HTTP status, auth). Passed
    /// through untouched.
    #[error(transparent)]
    Transport(anyhow::Error),

    /// A page came back but does not look like a paged envelope.
    #[error("malformed page response: {0}")]
    Protocol(String),

    /// The cancel flag was tripped between two page requests.
    #[error("paging cancelled after {pages_fetched} page(s)")]
    Cancelled { pages_fetched: usize },

    #[error("page size must be positive")]
    InvalidPageSize,
}

impl PagingError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, PagingError::Protocol(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PagingError::Cancelled { .. })
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    current_page_size: u64,
    #[serde(default)]
    total_size: Option<u64>,
}

struct Page {
    paging: Paging,
    items: Vec<Value>,
}

impl Page {
    fn parse(body: Value, key: PayloadKey<'_>) -> Result<Self, PagingError> {
        let Value::Object(mut body) = body else {
            return Err(PagingError::Protocol("page is not a JSON object".into()));
        };

        let paging = body
            .get("meta")
            .and_then(|meta| meta.get("paging"))
            .ok_or_else(|| PagingError::Protocol("missing meta.paging".into()))?;
        let paging: Paging = serde_json::from_value(paging.clone())
            .map_err(|e| PagingError::Protocol(format!("invalid meta.paging: {e}")))?;

        let items = take_payload(&mut body, key)?;
        Ok(Self { paging, items })
    }
}

fn take_payload(body: &mut Map<String, Value>, key: PayloadKey<'_>) -> Result<Vec<Value>, PagingError> {
    let name = match key {
        PayloadKey::Named(name) => name.to_string(),
        PayloadKey::Infer => body
            .iter()
            .find(|(_, v)| v.is_array())
            .map(|(k, _)| k.clone())
            .ok_or_else(|| PagingError::Protocol("no array-valued payload field".into()))?,
    };

    match body.remove(&name) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(PagingError::Protocol(format!(
            "payload field `{name}` is not an array"
        ))),
        None => Err(PagingError::Protocol(format!(
            "missing payload field `{name}`"
        ))),
    }
}

/// Fetches every page of a collection and concatenates the payloads.
///
/// `fetch_page` receives the caller's `params` followed by `limit` and
/// `offset`; any `limit`/`offset` already present in `params` is dropped.
/// Pages are requested strictly one after another because each offset
/// depends on the previous page's `currentPageSize`.
///
/// The walk stops after a page reporting `currentPageSize == 0`, or once
/// `options.max_pages` pages have been fetched. `totalSize` is only logged.
///
/// Any error aborts the whole walk; items gathered so far are dropped.
pub fn aggregate<T, F>(
    mut fetch_page: F,
    params: &[(String, String)],
    payload_key: PayloadKey<'_>,
    options: PageOptions,
    cancel: Option<&CancelFlag>,
) -> Result<Vec<T>, PagingError>
where
    T: DeserializeOwned,
    F: FnMut(&[(String, String)]) -> anyhow::Result<Value>,
{
    if options.page_size == 0 {
        return Err(PagingError::InvalidPageSize);
    }

    let mut query: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "limit" && k != "offset")
        .cloned()
        .collect();
    let fixed = query.len();

    let mut offset: u64 = 0;
    let mut accumulated: Vec<T> = Vec::new();
    let mut page_count = 0usize;
    let mut total_size: Option<u64> = None;

    loop {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            debug!(pages = page_count, "paging cancelled");
            return Err(PagingError::Cancelled {
                pages_fetched: page_count,
            });
        }

        query.truncate(fixed);
        query.push(("limit".to_string(), options.page_size.to_string()));
        query.push(("offset".to_string(), offset.to_string()));

        let body = fetch_page(&query).map_err(PagingError::Transport)?;
        let page = Page::parse(body, payload_key)
            .inspect_err(|e| warn!(offset, page = page_count + 1, "{e}"))?;

        if page_count == 0 {
            total_size = page.paging.total_size;
            debug!(total_size = ?total_size, "first page received");
        }

        let current = page.paging.current_page_size;
        if current != page.items.len() as u64 {
            let e = PagingError::Protocol(format!(
                "currentPageSize is {current} but payload holds {} item(s)",
                page.items.len()
            ));
            warn!(offset, page = page_count + 1, "{e}");
            return Err(e);
        }

        for (i, item) in page.items.into_iter().enumerate() {
            let item = serde_json::from_value(item).map_err(|e| {
                PagingError::Protocol(format!(
                    "item {i} at offset {offset} could not be decoded: {e}"
                ))
            })?;
            accumulated.push(item);
        }

        offset += current;
        page_count += 1;
        debug!(page = page_count, items = current, next_offset = offset, "page fetched");

        if current == 0 || options.max_pages.is_some_and(|max| page_count >= max) {
            break;
        }
    }

    if let Some(total) = total_size {
        if total != accumulated.len() as u64 {
            debug!(
                total_size = total,
                received = accumulated.len(),
                "item count differs from reported totalSize"
            );
        }
    }

    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    fn page(current: u64, total: u64, key: &str, items: Value) -> Value {
        let mut v = json!({
            "meta": {
                "paging": { "currentPageSize": current, "offset": 0, "totalSize": total },
                "schema": "https://api.anaplan.com/2/0/objects/file"
            },
            "status": { "code": 200, "message": "Success" }
        });
        v[key] = items;
        v
    }

    fn param(q: &[(String, String)], name: &str) -> Option<String> {
        q.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Runs `aggregate` over canned pages and returns the result with every
    /// query that was sent.
    fn run(
        pages: Vec<Value>,
        params: &[(String, String)],
        key: PayloadKey<'_>,
        options: PageOptions,
    ) -> (Result<Vec<Value>, PagingError>, Vec<Vec<(String, String)>>) {
        let mut sent = Vec::new();
        let mut pages = pages.into_iter();
        let result = aggregate(
            |q| {
                sent.push(q.to_vec());
                pages.next().ok_or_else(|| anyhow!("no more pages"))
            },
            params,
            key,
            options,
            None,
        );
        (result, sent)
    }

    #[test]
    fn walks_until_empty_page() {
        let pages = vec![
            page(2, 5, "items", json!([1, 2])),
            page(2, 5, "items", json!([3, 4])),
            page(1, 5, "items", json!([5])),
            page(0, 5, "items", json!([])),
        ];
        let options = PageOptions::default().with_page_size(2);
        let (result, sent) = run(pages, &[], PayloadKey::Named("items"), options);

        assert_eq!(result.unwrap(), vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(sent.len(), 4);
    }

    #[test]
    fn offsets_follow_reported_page_sizes() {
        let pages = vec![
            page(2, 3, "tasks", json!(["a", "b"])),
            page(1, 3, "tasks", json!(["c"])),
            page(0, 3, "tasks", json!([])),
        ];
        let options = PageOptions::default().with_page_size(2);
        let (_, sent) = run(pages, &[], PayloadKey::Named("tasks"), options);

        let offsets: Vec<_> = sent.iter().map(|q| param(q, "offset").unwrap()).collect();
        assert_eq!(offsets, ["0", "2", "3"]);
        assert!(sent.iter().all(|q| param(q, "limit").as_deref() == Some("2")));
    }

    #[test]
    fn preserves_page_and_item_order() {
        let pages = vec![
            page(2, 4, "files", json!(["a", "b"])),
            page(2, 4, "files", json!(["c", "d"])),
            page(0, 4, "files", json!([])),
        ];
        let (result, _) = run(pages, &[], PayloadKey::Named("files"), PageOptions::default());
        assert_eq!(result.unwrap(), vec![json!("a"), json!("b"), json!("c"), json!("d")]);
    }

    #[test]
    fn max_pages_bounds_fetches() {
        let pages = vec![
            page(1, 9, "items", json!([1])),
            page(1, 9, "items", json!([2])),
            page(1, 9, "items", json!([3])),
        ];
        let options = PageOptions::default().with_page_size(1).with_max_pages(Some(2));
        let (result, sent) = run(pages, &[], PayloadKey::Named("items"), options);

        assert_eq!(result.unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn zero_max_pages_still_fetches_once() {
        let pages = vec![
            page(1, 9, "items", json!([1])),
            page(1, 9, "items", json!([2])),
        ];
        let options = PageOptions::default().with_max_pages(Some(0));
        let (result, sent) = run(pages, &[], PayloadKey::Named("items"), options);

        assert_eq!(result.unwrap(), vec![json!(1)]);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn empty_first_page_returns_nothing() {
        let pages = vec![page(0, 0, "workspaces", json!([]))];
        let (result, sent) = run(pages, &[], PayloadKey::Named("workspaces"), PageOptions::default());
        assert!(result.unwrap().is_empty());
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn caller_params_are_kept_and_paging_params_replaced() {
        let params = vec![
            ("modelDetails".to_string(), "true".to_string()),
            ("limit".to_string(), "7".to_string()),
            ("offset".to_string(), "99".to_string()),
        ];
        let pages = vec![page(0, 0, "models", json!([]))];
        let (_, sent) = run(pages, &params, PayloadKey::Named("models"), PageOptions::default());

        let q = &sent[0];
        assert_eq!(param(q, "modelDetails").as_deref(), Some("true"));
        assert_eq!(param(q, "limit").as_deref(), Some("1000"));
        assert_eq!(param(q, "offset").as_deref(), Some("0"));
        assert_eq!(q.iter().filter(|(k, _)| k == "limit").count(), 1);
        assert_eq!(q.iter().filter(|(k, _)| k == "offset").count(), 1);
    }

    #[test]
    fn works_with_any_payload_key() {
        for key in ["files", "tasks", "items", "chunks"] {
            let pages = vec![page(1, 1, key, json!([{ "id": "x" }])), page(0, 1, key, json!([]))];
            let (result, _) = run(pages, &[], PayloadKey::Named(key), PageOptions::default());
            assert_eq!(result.unwrap(), vec![json!({ "id": "x" })], "key {key}");
        }
    }

    #[test]
    fn infers_first_array_field() {
        let pages = vec![
            page(2, 2, "exports", json!(["e1", "e2"])),
            page(0, 2, "exports", json!([])),
        ];
        let (result, _) = run(pages, &[], PayloadKey::Infer, PageOptions::default());
        assert_eq!(result.unwrap(), vec![json!("e1"), json!("e2")]);
    }

    #[test]
    fn infer_picks_arrays_in_document_order() {
        let first: Value = serde_json::from_str(
            r#"{
                "meta": { "paging": { "currentPageSize": 1, "totalSize": 1 } },
                "zeta": ["z"],
                "alpha": ["a"]
            }"#,
        )
        .unwrap();
        let last: Value = serde_json::from_str(
            r#"{ "meta": { "paging": { "currentPageSize": 0, "totalSize": 1 } }, "zeta": [], "alpha": [] }"#,
        )
        .unwrap();

        let (result, _) = run(vec![first, last], &[], PayloadKey::Infer, PageOptions::default());
        assert_eq!(result.unwrap(), vec![json!("z")]);
    }

    #[test]
    fn missing_paging_is_protocol_error() {
        let pages = vec![json!({ "status": { "code": 200 }, "items": [1] })];
        let (result, _) = run(pages, &[], PayloadKey::Named("items"), PageOptions::default());
        let err = result.unwrap_err();
        assert!(err.is_protocol(), "{err}");
        assert!(err.to_string().contains("meta.paging"));
    }

    #[test]
    fn missing_payload_is_protocol_error() {
        let pages = vec![page(1, 1, "files", json!([1]))];
        let (result, _) = run(pages, &[], PayloadKey::Named("imports"), PageOptions::default());
        assert!(result.unwrap_err().is_protocol());
    }

    #[test]
    fn no_array_to_infer_is_protocol_error() {
        let pages = vec![json!({
            "meta": { "paging": { "currentPageSize": 0, "totalSize": 0 } },
            "status": { "code": 200 }
        })];
        let (result, _) = run(pages, &[], PayloadKey::Infer, PageOptions::default());
        assert!(result.unwrap_err().is_protocol());
    }

    #[test]
    fn size_mismatch_is_protocol_error() {
        let pages = vec![page(3, 3, "items", json!([]))];
        let (result, _) = run(pages, &[], PayloadKey::Named("items"), PageOptions::default());
        let err = result.unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("currentPageSize is 3"));
    }

    #[test]
    fn non_object_page_is_protocol_error() {
        let (result, _) = run(vec![json!([1, 2])], &[], PayloadKey::Infer, PageOptions::default());
        assert!(result.unwrap_err().is_protocol());
    }

    #[test]
    fn fetch_failure_is_passed_through() {
        let pages = vec![page(1, 2, "items", json!([1]))];
        let (result, sent) = run(pages, &[], PayloadKey::Named("items"), PageOptions::default());

        // second fetch fails because the script ran out of pages
        assert_eq!(sent.len(), 2);
        match result.unwrap_err() {
            PagingError::Transport(e) => assert_eq!(e.to_string(), "no more pages"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn zero_page_size_is_rejected_before_fetching() {
        let options = PageOptions::default().with_page_size(0);
        let (result, sent) = run(vec![], &[], PayloadKey::Infer, options);
        assert!(matches!(result, Err(PagingError::InvalidPageSize)));
        assert!(sent.is_empty());
    }

    #[test]
    fn cancel_between_pages() {
        let flag = CancelFlag::new();
        let trip = flag.clone();
        let mut fetches = 0;

        let result: Result<Vec<Value>, _> = aggregate(
            |_| {
                fetches += 1;
                // trip the flag while the first page is in flight
                trip.cancel();
                Ok(page(1, 10, "items", json!([fetches])))
            },
            &[],
            PayloadKey::Named("items"),
            PageOptions::default(),
            Some(&flag),
        );

        match result {
            Err(PagingError::Cancelled { pages_fetched }) => assert_eq!(pages_fetched, 1),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(fetches, 1);
    }

    #[test]
    fn cancelled_before_start_fetches_nothing() {
        let flag = CancelFlag::new();
        flag.cancel();
        let (mut sent, pages) = (0, vec![page(0, 0, "items", json!([]))]);
        let mut pages = pages.into_iter();

        let result: Result<Vec<Value>, _> = aggregate(
            |_| {
                sent += 1;
                pages.next().ok_or_else(|| anyhow!("no more pages"))
            },
            &[],
            PayloadKey::Named("items"),
            PageOptions::default(),
            Some(&flag),
        );

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(sent, 0);
    }

    #[test]
    fn decodes_typed_items() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Item {
            id: String,
        }

        let pages = vec![
            page(1, 1, "items", json!([{ "id": "113000000000" }])),
            page(0, 1, "items", json!([])),
        ];
        let mut pages = pages.into_iter();
        let items: Vec<Item> = aggregate(
            |_| pages.next().ok_or_else(|| anyhow!("no more pages")),
            &[],
            PayloadKey::Named("items"),
            PageOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(items, vec![Item { id: "113000000000".into() }]);

        let mut bad = vec![page(1, 1, "items", json!([{ "name": "no id" }]))].into_iter();
        let err = aggregate::<Item, _>(
            |_| bad.next().ok_or_else(|| anyhow!("no more pages")),
            &[],
            PayloadKey::Named("items"),
            PageOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(err.is_protocol());
    }
}
