//! Request cycle orchestration.
//!
//! [`RequestCycle`] wraps a [`Handler`] and runs four strictly sequential
//! phases per request:
//!
//! 1. **Pre**: suspend the controller, let the collector snapshot the heap.
//! 2. **Handle**: run the handler and stash its response in an [`InFlight`]
//!    guard.
//! 3. **Post-response**: once the host has written the body it calls
//!    [`InFlight::close`]. The body's own [`ResponseBody::close`] runs first.
//! 4. **Decide-and-reclaim**: ask the policy; on `true` release the stashed
//!    response and the route parameters, then enable the controller, run a
//!    synchronous pass, and suspend it again.
//!
//! The controller stays disabled between requests. `InFlight` mutably
//! borrows the cycle, so phase 4 of one request completes before phase 1 of
//! the next can start.
//!
//! # Example
//!
//! ```rust
//! use oobgc::{DeferredHeap, IntervalTrigger, RequestContext, RequestCycle, TriggerPolicy, WorkerId};
//! use std::sync::Arc;
//!
//! let heap = Arc::new(DeferredHeap::default());
//! let handler = |_ctx: &mut RequestContext| http::Response::new(String::from("ok"));
//! let policy = TriggerPolicy::Interval(IntervalTrigger::new(2).unwrap());
//! let mut cycle = RequestCycle::new(handler, policy, heap, WorkerId::new("1"));
//!
//! let request = http::Request::get("/").body(()).unwrap();
//! assert!(cycle.call(&request).close().reclaimed.is_none());
//! assert!(cycle.call(&request).close().reclaimed.is_some());
//! ```

use crate::context::{RequestContext, WorkerId};
use crate::heap::{ReclaimOutcome, ReclamationController};
use crate::instrument::MetricsCollector;
use crate::policy::TriggerPolicy;
use http::{Request, Response};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Response body with an optional release hook.
///
/// The hook runs after the host wrote the body and before the cycle decides
/// whether to reclaim.
pub trait ResponseBody {
    /// Releases resources held by the body.
    fn close(&mut self) {}
}

impl ResponseBody for () {}
impl ResponseBody for String {}
impl ResponseBody for &'static str {}
impl ResponseBody for Vec<u8> {}

impl<B: ResponseBody + ?Sized> ResponseBody for Box<B> {
    fn close(&mut self) {
        (**self).close();
    }
}

impl<B: ResponseBody> ResponseBody for Option<B> {
    fn close(&mut self) {
        if let Some(body) = self {
            body.close();
        }
    }
}

/// Application handler wrapped by the cycle.
///
/// Handlers set route parameters on the context to name the endpoint that
/// served the request.
pub trait Handler {
    /// Body type of the produced response.
    type Body: ResponseBody;

    /// Serves one request.
    fn call(&mut self, ctx: &mut RequestContext) -> Response<Self::Body>;
}

impl<F, B> Handler for F
where
    F: FnMut(&mut RequestContext) -> Response<B>,
    B: ResponseBody,
{
    type Body = B;

    fn call(&mut self, ctx: &mut RequestContext) -> Response<B> {
        self(ctx)
    }
}

/// Result of closing one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Pass statistics when the policy triggered and the pass succeeded.
    pub reclaimed: Option<ReclaimOutcome>,
}

impl CycleOutcome {
    /// Returns `true` if a pass ran.
    #[must_use]
    pub const fn did_reclaim(&self) -> bool {
        self.reclaimed.is_some()
    }
}

/// Per-worker request cycle.
pub struct RequestCycle<H, C: ?Sized> {
    handler: H,
    policy: TriggerPolicy,
    controller: Arc<C>,
    worker: WorkerId,
    collector: Option<MetricsCollector>,
}

impl<H, C: ?Sized> std::fmt::Debug for RequestCycle<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCycle")
            .field("policy", &self.policy)
            .field("worker", &self.worker)
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

impl<H, C> RequestCycle<H, C>
where
    H: Handler,
    C: ReclamationController + ?Sized,
{
    /// Wraps `handler`. The controller is suspended immediately.
    pub fn new(handler: H, policy: TriggerPolicy, controller: Arc<C>, worker: WorkerId) -> Self {
        controller.disable();
        Self {
            handler,
            policy,
            controller,
            worker,
            collector: None,
        }
    }

    /// Attaches an instrumentation collector.
    #[must_use]
    pub fn with_collector(mut self, collector: MetricsCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Runs phases 1 and 2 for `request`.
    ///
    /// The returned guard must be closed (or dropped) after the response
    /// body was written.
    #[instrument(name = "oobgc.cycle.call", skip_all, fields(path = request.uri().path()))]
    pub fn call<R>(&mut self, request: &Request<R>) -> InFlight<'_, H, C> {
        let mut ctx = RequestContext::new(request.uri().path(), self.worker.clone());

        self.controller.disable();
        if let Some(collector) = self.collector.as_mut() {
            collector.on_begin(self.controller.as_ref());
        }

        let response = self.handler.call(&mut ctx);
        debug!(status = response.status().as_u16(), "Handler returned");

        InFlight {
            cycle: self,
            ctx,
            response: Some(response),
            finished: false,
        }
    }

    /// Active policy.
    pub const fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Shared controller.
    pub const fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    /// Attached collector.
    pub const fn collector(&self) -> Option<&MetricsCollector> {
        self.collector.as_ref()
    }

    /// Worker served by this cycle.
    pub const fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Wrapped handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

/// One request between its handler returning and the host closing it.
pub struct InFlight<'a, H, C>
where
    H: Handler,
    C: ReclamationController + ?Sized,
{
    cycle: &'a mut RequestCycle<H, C>,
    ctx: RequestContext,
    response: Option<Response<H::Body>>,
    finished: bool,
}

impl<H, C> std::fmt::Debug for InFlight<'_, H, C>
where
    H: Handler,
    C: ReclamationController + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("ctx", &self.ctx)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<H, C> InFlight<'_, H, C>
where
    H: Handler,
    C: ReclamationController + ?Sized,
{
    /// Request context, including route parameters set by the handler.
    pub const fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Response produced by the handler.
    pub fn response(&self) -> &Response<H::Body> {
        self.response
            .as_ref()
            .unwrap_or_else(|| unreachable!("response is released only while finishing"))
    }

    /// Mutable response, for hosts streaming the body.
    pub fn response_mut(&mut self) -> &mut Response<H::Body> {
        self.response
            .as_mut()
            .unwrap_or_else(|| unreachable!("response is released only while finishing"))
    }

    /// Runs phases 3 and 4.
    pub fn close(mut self) -> CycleOutcome {
        self.finish()
    }

    fn finish(&mut self) -> CycleOutcome {
        if std::mem::replace(&mut self.finished, true) {
            return CycleOutcome::default();
        }

        if let Some(response) = self.response.as_mut() {
            response.body_mut().close();
        }

        let controller = Arc::clone(&self.cycle.controller);
        if let Some(collector) = self.cycle.collector.as_mut() {
            collector.on_response(&self.ctx, controller.as_ref());
        }

        let triggered = self.cycle.policy.decide(&self.ctx);
        metrics::counter!(
            "oobgc_requests_total",
            "triggered" => if triggered { "true" } else { "false" }
        )
        .increment(1);

        if !triggered {
            if let Some(collector) = self.cycle.collector.as_mut() {
                collector.on_skipped();
            }
            return CycleOutcome::default();
        }

        drop(self.response.take());
        self.ctx.clear_transient();

        controller.enable();
        let result = controller.run();
        controller.disable();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = self.ctx.path(), error = %e, "Reclamation pass failed");
                if let Some(collector) = self.cycle.collector.as_mut() {
                    collector.on_skipped();
                }
                return CycleOutcome::default();
            },
        };

        info!(
            path = self.ctx.path(),
            policy = %self.cycle.policy.describe(),
            objects_reclaimed = outcome.objects_reclaimed,
            bytes_reclaimed = outcome.bytes_reclaimed,
            duration_ms = outcome.duration_ms(),
            "Out-of-band reclamation"
        );

        self.cycle.policy.after_reclaim(&self.ctx);
        if let Some(collector) = self.cycle.collector.as_mut() {
            collector.on_reclaimed(&self.ctx, controller.as_ref(), &outcome);
        }

        CycleOutcome {
            reclaimed: Some(outcome),
        }
    }
}

impl<H, C> Drop for InFlight<'_, H, C>
where
    H: Handler,
    C: ReclamationController + ?Sized,
{
    fn drop(&mut self) {
        self.finish();
    }
}
