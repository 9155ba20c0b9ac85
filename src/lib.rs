#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cancel;
mod error;
mod head;
#[cfg(feature = "logging")]
mod logging;
mod manifest;
mod payload;
mod proxy;
mod registry;
mod request;
mod route;
mod runner;
mod task;

pub use crate::cancel::CancelToken;
pub use crate::error::*;
pub use crate::head::{HeadEl, HeadEls, SortedHeadEls, sort_head_els};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::manifest::{ROUTE_MANIFEST_PREFIX, route_manifest, write_route_manifest};
pub use crate::payload::{RouteOutcome, RoutePayload, resolve_route};
pub use crate::proxy::{
    ACCEPTS_CLIENT_REDIRECT_HEADER, CLIENT_REDIRECT_HEADER, Cookie, ResponseProxy,
    merge_responses,
};
pub use crate::registry::TaskRegistry;
pub use crate::request::{MatchList, Matcher, Params, Request, RouteMatch, SplatValues};
pub use crate::route::{
    LoaderCtx, LoaderData, RouteTable, SegmentMeta, SegmentResult, run_matched_loaders,
};
pub use crate::runner::{BoundTask, run_parallel};
pub use crate::task::{Ctx, Task};
