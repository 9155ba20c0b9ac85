//! Response proxies: side channels for loaders that run in parallel and
//! never touch the real response writer.
//!
//! Each loader gets its own proxy to record header mutations, cookies, a
//! redirect, an error status, or head-element contributions. Afterwards the
//! orchestrator merges all proxies into one outcome under a deterministic
//! precedence rule and hands it to the transport to apply.
use std::collections::BTreeMap;

use crate::head::{HeadEl, HeadEls};

/// Response header carrying a client-side redirect target, for cooperative
/// clients driving navigation through `fetch`.
pub const CLIENT_REDIRECT_HEADER: &str = "X-Client-Redirect";

/// Request header through which a client advertises that it handles
/// [`CLIENT_REDIRECT_HEADER`] itself.
pub const ACCEPTS_CLIENT_REDIRECT_HEADER: &str = "X-Accepts-Client-Redirect";

#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderOp {
    Set(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseProxy {
    status: u16,
    status_text: String,
    header_ops: BTreeMap<String, Vec<HeaderOp>>,
    cookies: Vec<Cookie>,
    head_els: HeadEls,
    location: String,
}

impl ResponseProxy {
    pub fn new() -> Self {
        Self::default()
    }

    // /////// status

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Set an error status with the text the transport should send instead
    /// of the default reason phrase.
    pub fn set_error_status(&mut self, status: u16, text: impl Into<String>) {
        self.status = status;
        self.status_text = text.into();
    }

    pub fn status(&self) -> (u16, &str) {
        (self.status, &self.status_text)
    }

    // /////// headers

    /// Replace all previously recorded values for `key`.
    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.header_ops
            .entry(key.to_string())
            .or_default()
            .push(HeaderOp::Set(value.into()));
    }

    /// Append a value for `key`.
    pub fn add_header(&mut self, key: &str, value: impl Into<String>) {
        self.header_ops
            .entry(key.to_string())
            .or_default()
            .push(HeaderOp::Add(value.into()));
    }

    pub fn header(&self, key: &str) -> Option<String> {
        self.headers(key).into_iter().next()
    }

    /// The effective values for `key` after replaying its set/add ops.
    pub fn headers(&self, key: &str) -> Vec<String> {
        let Some(ops) = self.header_ops.get(key) else {
            return vec![];
        };
        let mut values = vec![];
        for op in ops {
            match op {
                HeaderOp::Set(value) => values = vec![value.clone()],
                HeaderOp::Add(value) => values.push(value.clone()),
            }
        }
        values
    }

    /// All effective headers, for the transport to apply.
    pub fn collect_headers(&self) -> BTreeMap<String, Vec<String>> {
        self.header_ops
            .keys()
            .map(|key| (key.clone(), self.headers(key)))
            .collect()
    }

    // /////// cookies

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    // /////// head elements

    pub fn add_head_el(&mut self, el: HeadEl) {
        self.head_els.add(el);
    }

    pub fn head_els(&self) -> &HeadEls {
        &self.head_els
    }

    // /////// redirects

    /// Record a redirect to `url`. When the request advertises
    /// [`ACCEPTS_CLIENT_REDIRECT_HEADER`] the redirect upgrades to a
    /// header-based client redirect (returns `true`); otherwise it is an
    /// ordinary 3xx with the given code.
    pub fn redirect(&mut self, req: &crate::Request, url: &str, code: u16) -> bool {
        if req.header(ACCEPTS_CLIENT_REDIRECT_HEADER).is_some() {
            self.client_redirect(url);
            return true;
        }
        self.server_redirect(url, code);
        false
    }

    fn server_redirect(&mut self, url: &str, code: u16) {
        // Don't override error statuses with redirects.
        if self.is_error() {
            return;
        }
        self.status = code;
        self.location = url.to_string();
    }

    fn client_redirect(&mut self, url: &str) {
        if self.status == 0 {
            self.status = 200;
        }
        self.set_header(CLIENT_REDIRECT_HEADER, url);
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    // /////// classification

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn is_redirect(&self) -> bool {
        self.is_server_redirect() || self.is_client_redirect()
    }

    fn is_server_redirect(&self) -> bool {
        (300..400).contains(&self.status) && !self.location.is_empty()
    }

    fn is_client_redirect(&self) -> bool {
        self.header(CLIENT_REDIRECT_HEADER)
            .is_some_and(|value| !value.is_empty())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_empty(&self) -> bool {
        self.status == 0
            && self.header_ops.is_empty()
            && self.cookies.is_empty()
            && self.head_els.is_empty()
            && self.location.is_empty()
    }
}

/// Merge per-segment proxies into one outcome, or `None` when no proxy
/// produced any side effect.
///
/// Precedence: any error status short-circuits (first error wins), else the
/// first redirect wins, else header mutations accumulate in match order so
/// inner segments can override outer defaults. Head elements and headers
/// always merge in order; cookies deduplicate by name with later segments
/// winning.
pub fn merge_responses(proxies: &[ResponseProxy]) -> Option<ResponseProxy> {
    if proxies.iter().all(ResponseProxy::is_empty) {
        return None;
    }

    let mut merged = ResponseProxy::new();

    // Head elements, merged in order.
    for proxy in proxies {
        merged.head_els.extend(&proxy.head_els);
    }

    // Header ops, merged in order.
    for proxy in proxies {
        for (key, ops) in &proxy.header_ops {
            merged
                .header_ops
                .entry(key.clone())
                .or_default()
                .extend(ops.iter().cloned());
        }
    }

    // Cookies, deduplicated by name; the last segment to set a name wins,
    // and the result keeps the order of the winning segments.
    let mut winners: Vec<(usize, Cookie)> = vec![];
    for (i, proxy) in proxies.iter().enumerate() {
        for cookie in &proxy.cookies {
            match winners.iter().position(|(_, have)| have.name == cookie.name) {
                Some(pos) => winners[pos] = (i, cookie.clone()),
                None => winners.push((i, cookie.clone())),
            }
        }
    }
    winners.sort_by_key(|&(i, _)| i);
    merged.cookies = winners.into_iter().map(|(_, cookie)| cookie).collect();

    // Status: either the first error or the last non-redirect status wins.
    for proxy in proxies {
        if proxy.status >= 400 {
            merged.status = proxy.status;
            merged.status_text = proxy.status_text.clone();
            break;
        } else if merged.status < 300 {
            merged.status = proxy.status;
            merged.status_text = proxy.status_text.clone();
        }
    }

    // Redirect: assuming no error, the first redirect wins.
    if !merged.is_error() {
        for proxy in proxies {
            if proxy.is_redirect() {
                merged.status = proxy.status;
                merged.location = proxy.location.clone();
                if proxy.is_client_redirect() {
                    let target = proxy.header(CLIENT_REDIRECT_HEADER).unwrap_or_default();
                    merged.set_header(CLIENT_REDIRECT_HEADER, target);
                }
                break;
            }
        }
    }

    Some(merged)
}
