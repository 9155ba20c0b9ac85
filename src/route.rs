//! Registration of nested routes and the per-request loader fan-out.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RouteError, TaskError};
use crate::proxy::ResponseProxy;
use crate::request::{MatchList, Params, Request};
use crate::runner::{BoundTask, run_parallel};
use crate::task::Ctx;

/// Data produced by a loader for the client. `None` is the explicit
/// "this segment has no data" marker.
pub type LoaderData = Option<Value>;

type LoaderFn = Arc<dyn Fn(&mut LoaderCtx) -> anyhow::Result<LoaderData> + Send + Sync>;

/// Everything a loader can see: the request, the matcher's captures, the
/// request's memoizing [`Ctx`] for shared sub-computations, and this
/// segment's own response proxy.
pub struct LoaderCtx<'a> {
    pub ctx: &'a Ctx,
    pub req: &'a Request,
    pub params: &'a Params,
    pub splat_values: &'a [String],
    pub proxy: &'a mut ResponseProxy,
}

/// Static metadata for one route segment, fed from the build pipeline:
/// where the client module lives and which exports render it.
#[derive(Debug, Clone, Default)]
pub struct SegmentMeta {
    pub import_url: String,
    pub export_key: String,
    pub error_export_key: String,
}

struct RegisteredRoute {
    loader: Option<LoaderFn>,
    meta: SegmentMeta,
}

/// All registered nested route patterns, each with optional server loader.
/// Built once at startup; read-only per request.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, RegisteredRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_loader(
        &mut self,
        pattern: &str,
        meta: SegmentMeta,
        loader: impl Fn(&mut LoaderCtx) -> anyhow::Result<LoaderData> + Send + Sync + 'static,
    ) -> Result<(), RouteError> {
        self.insert(pattern, Some(Arc::new(loader)), meta)
    }

    /// Register a pattern that renders purely on the client.
    pub fn register_pattern(&mut self, pattern: &str, meta: SegmentMeta) -> Result<(), RouteError> {
        self.insert(pattern, None, meta)
    }

    fn insert(
        &mut self,
        pattern: &str,
        loader: Option<LoaderFn>,
        meta: SegmentMeta,
    ) -> Result<(), RouteError> {
        if self.routes.contains_key(pattern) {
            return Err(RouteError::DuplicatePattern(pattern.to_string()));
        }
        self.routes
            .insert(pattern.to_string(), RegisteredRoute { loader, meta });
        Ok(())
    }

    pub fn has_loader(&self, pattern: &str) -> bool {
        self.routes
            .get(pattern)
            .is_some_and(|route| route.loader.is_some())
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub(crate) fn meta(&self, pattern: &str) -> Option<&SegmentMeta> {
        self.routes.get(pattern).map(|route| &route.meta)
    }
}

/// Outcome of one segment's loader, index-aligned with the match list.
#[derive(Debug)]
pub struct SegmentResult {
    pub pattern: String,
    pub data: LoaderData,
    pub err: Option<TaskError>,
    pub ran_loader: bool,
    pub proxy: ResponseProxy,
}

/// Run every matched segment's loader concurrently under `ctx`.
///
/// Segments without a loader are skipped, not errors; they still occupy
/// their slot so index `i` refers to the same segment everywhere. The
/// returned vector is ordered by match position (outermost first) no matter
/// which loader finished first. A failing loader records its error at its
/// own index and cancels the fan-out scope; siblings that already produced
/// data keep it.
pub fn run_matched_loaders(
    table: &RouteTable,
    ctx: &Ctx,
    req: &Request,
    list: &MatchList,
) -> Vec<SegmentResult> {
    let mut results: Vec<SegmentResult> = list
        .matches
        .iter()
        .map(|m| SegmentResult {
            pattern: m.original_pattern.clone(),
            data: None,
            err: None,
            ran_loader: false,
            proxy: ResponseProxy::new(),
        })
        .collect();

    {
        let mut bound = Vec::with_capacity(results.len());
        for (m, slot) in list.matches.iter().zip(results.iter_mut()) {
            let Some(route) = table.routes.get(&m.original_pattern) else {
                continue;
            };
            let Some(loader) = route.loader.clone() else {
                continue;
            };
            slot.ran_loader = true;

            bound.push(BoundTask::from_fn(move |task_ctx: &Ctx| {
                let mut loader_ctx = LoaderCtx {
                    ctx: task_ctx,
                    req,
                    params: &list.params,
                    splat_values: &list.splat_values,
                    proxy: &mut slot.proxy,
                };
                match loader(&mut loader_ctx) {
                    Ok(data) => {
                        slot.data = data;
                        Ok(())
                    }
                    Err(err) => {
                        let err = TaskError::from(err);
                        slot.err = Some(err.clone());
                        Err(err)
                    }
                }
            }));
        }

        if !bound.is_empty() {
            if let Err(err) = run_parallel(ctx, bound) {
                // Per-segment errors are inspected by the caller; this is just
                // the fan-out's own verdict.
                tracing::debug!(error = %err, "loader fan-out finished with an error");
            }
        }
    }

    results
}
