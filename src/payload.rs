//! Assembly of the per-request payload handed to the rendering layer.
//!
//! Runs after the loader fan-out: proxies merge first (a proxy-level error
//! or redirect abandons rendering before any per-loader error is even
//! looked at), then per-loader errors truncate the index-aligned arrays at
//! the outermost failing segment.
use serde::Serialize;

use crate::error::{LoaderError, TaskError};
use crate::head::HeadEl;
use crate::proxy::{ResponseProxy, merge_responses};
use crate::request::{Matcher, Params, Request, SplatValues};
use crate::route::{LoaderData, RouteTable, run_matched_loaders};
use crate::task::Ctx;

/// The serialized result of route resolution.
///
/// All array fields share length and index alignment: index `i` always
/// refers to the `i`-th matched segment, outermost first, in every array.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outermost_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outermost_error_idx: Option<usize>,

    pub matched_patterns: Vec<String>,
    pub loaders_data: Vec<LoaderData>,
    #[serde(rename = "importURLs")]
    pub import_urls: Vec<String>,
    pub export_keys: Vec<String>,
    pub error_export_keys: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_root_data: bool,

    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub splat_values: SplatValues,
}

/// What the transport should do with the request.
#[derive(Debug)]
pub enum RouteOutcome {
    /// The matcher declined the path.
    NotFound,
    /// A loader redirected; abandon rendering and apply the merged proxy.
    Redirect { response: ResponseProxy },
    /// A loader signalled a request-level error status; abandon rendering.
    Error { response: ResponseProxy },
    /// Render normally. `response` carries any accumulated header
    /// mutations; `head_els` the loaders' metadata contributions in match
    /// order, already truncated if a loader failed.
    Payload {
        payload: RoutePayload,
        head_els: Vec<HeadEl>,
        response: Option<ResponseProxy>,
    },
}

/// Match the request, run all segment loaders in parallel, merge their side
/// effects, and assemble the client payload.
pub fn resolve_route(
    table: &RouteTable,
    matcher: &dyn Matcher,
    ctx: &Ctx,
    req: &Request,
) -> RouteOutcome {
    let Some(list) = matcher.find_matches(req) else {
        return RouteOutcome::NotFound;
    };

    let results = run_matched_loaders(table, ctx, req, &list);

    let proxies: Vec<ResponseProxy> = results.iter().map(|r| r.proxy.clone()).collect();
    let merged = merge_responses(&proxies);
    if let Some(merged) = &merged {
        if merged.is_error() {
            return RouteOutcome::Error {
                response: merged.clone(),
            };
        }
        if merged.is_redirect() {
            return RouteOutcome::Redirect {
                response: merged.clone(),
            };
        }
    }

    let has_root_data = list
        .matches
        .first()
        .is_some_and(|m| m.normalized_pattern.is_empty())
        && results.first().is_some_and(|r| r.ran_loader);

    let mut import_urls = Vec::with_capacity(list.matches.len());
    let mut export_keys = Vec::with_capacity(list.matches.len());
    let mut error_export_keys = Vec::with_capacity(list.matches.len());
    for m in &list.matches {
        match table.meta(&m.original_pattern) {
            Some(meta) => {
                import_urls.push(meta.import_url.clone());
                export_keys.push(meta.export_key.clone());
                error_export_keys.push(meta.error_export_key.clone());
            }
            None => {
                import_urls.push(String::new());
                export_keys.push(String::new());
                error_export_keys.push(String::new());
            }
        }
    }

    let outermost = results
        .iter()
        .enumerate()
        .find_map(|(i, r)| r.err.as_ref().map(|err| (i, client_message(err, &r.pattern))));
    let outermost_error_idx = outermost.as_ref().map(|&(i, _)| i);
    let outermost_error = outermost.map(|(_, msg)| msg);

    // The failing segment's own index is retained in the truncated arrays
    // (its error renders in place of its data); everything after it is
    // dropped. Head elements stop strictly before the failing segment.
    let cut = outermost_error_idx.map_or(results.len(), |idx| idx + 1);
    let head_cut = outermost_error_idx.unwrap_or(results.len());

    let mut matched_patterns = Vec::with_capacity(cut);
    let mut loaders_data = Vec::with_capacity(cut);
    let mut head_els = Vec::new();

    for (i, result) in results.into_iter().enumerate().take(cut) {
        matched_patterns.push(result.pattern);
        loaders_data.push(result.data);
        if i < head_cut {
            head_els.extend(result.proxy.head_els().collect().iter().cloned());
        }
    }

    import_urls.truncate(cut);
    export_keys.truncate(cut);
    error_export_keys.truncate(cut);

    RouteOutcome::Payload {
        payload: RoutePayload {
            outermost_error,
            outermost_error_idx,
            matched_patterns,
            loaders_data,
            import_urls,
            export_keys,
            error_export_keys,
            has_root_data,
            params: list.params,
            splat_values: list.splat_values,
        },
        head_els,
        response: merged,
    }
}

/// Client-safe message for the outermost failing loader; logs the real
/// cause server-side.
fn client_message(err: &TaskError, pattern: &str) -> String {
    if let TaskError::Failed(source) = err {
        if let Some(loader_err) = source.downcast_ref::<LoaderError>() {
            if let Some(server_err) = loader_err.server_error() {
                tracing::error!(pattern, error = %server_err, "loader error");
            }
            return loader_err.client_message().to_string();
        }
    }

    tracing::warn!(
        "Sending generic error to client. Use LoaderError for custom client messages."
    );
    tracing::error!(pattern, error = %err, "loader error");
    "An error occurred".to_string()
}
