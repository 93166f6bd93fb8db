//! Per-request context handed to policies and the metrics collector.

use std::collections::HashMap;
use std::fmt;

/// Route parameter key naming the controller that served the request.
pub const CONTROLLER_PARAM: &str = "controller";

/// Route parameter key naming the action that served the request.
pub const ACTION_PARAM: &str = "action";

/// Identity of one worker (process or thread) of the host server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a worker id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives a worker id from the current process id.
    #[must_use]
    pub fn current_process() -> Self {
        Self(std::process::id().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// Route parameters populated by the handler while it serves a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    params: HashMap<String, String>,
}

impl RouteParams {
    /// Creates an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns `true` if no parameters were set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Removes every parameter.
    pub fn clear(&mut self) {
        self.params.clear();
    }

    /// Returns `controller#action` when the handler set both.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        let controller = self.get(CONTROLLER_PARAM)?;
        let action = self.get(ACTION_PARAM)?;
        Some(format!("{controller}#{action}"))
    }
}

/// View of one request, alive from the start of the cycle until its
/// reclamation phase finishes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    path: String,
    worker: WorkerId,
    params: RouteParams,
}

impl RequestContext {
    /// Creates a context for a request to `path` served by `worker`.
    #[must_use]
    pub fn new(path: impl Into<String>, worker: WorkerId) -> Self {
        Self {
            path: path.into(),
            worker,
            params: RouteParams::new(),
        }
    }

    /// Request path, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Worker serving the request.
    #[must_use]
    pub const fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Route parameters set by the handler.
    #[must_use]
    pub const fn params(&self) -> &RouteParams {
        &self.params
    }

    /// Mutable route parameters, for handlers.
    pub const fn params_mut(&mut self) -> &mut RouteParams {
        &mut self.params
    }

    /// Drops the fields the handler populated.
    pub(crate) fn clear_transient(&mut self) {
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_requires_controller_and_action() {
        let mut params = RouteParams::new();
        assert_eq!(params.endpoint(), None);

        params.insert(CONTROLLER_PARAM, "reports");
        assert_eq!(params.endpoint(), None);

        params.insert(ACTION_PARAM, "index");
        assert_eq!(params.endpoint().as_deref(), Some("reports#index"));
    }

    #[test]
    fn test_clear_transient_keeps_path() {
        let mut ctx = RequestContext::new("/reports", WorkerId::new("1"));
        ctx.params_mut().insert(CONTROLLER_PARAM, "reports");
        ctx.clear_transient();

        assert!(ctx.params().is_empty());
        assert_eq!(ctx.path(), "/reports");
        assert_eq!(ctx.worker().as_str(), "1");
    }

    #[test]
    fn test_worker_id_conversions() {
        assert_eq!(WorkerId::from(3_u32), WorkerId::new("3"));
        assert_eq!(WorkerId::from("a").to_string(), "a");
        assert!(!WorkerId::current_process().as_str().is_empty());
    }
}
