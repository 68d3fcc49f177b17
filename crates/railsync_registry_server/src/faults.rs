//! Fault injection for registry requests.

use railsync_protocol::{HttpMethod, HttpRequest, HttpResponse, TransportError};

/// What a matching request gets instead of a normal answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with a status and body without touching the store.
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Fail as if the request timed out.
    Timeout,
    /// Fail as if the server could not be reached.
    Connect,
}

impl Fault {
    /// A status fault with an empty body.
    pub fn status(status: u16) -> Self {
        Fault::Status {
            status,
            body: String::new(),
        }
    }

    fn apply(&self) -> Result<HttpResponse, TransportError> {
        match self {
            Fault::Status { status, body } => Ok(HttpResponse::new(*status, body.clone())),
            Fault::Timeout => Err(TransportError::Timeout),
            Fault::Connect => Err(TransportError::Connect("injected".into())),
        }
    }
}

/// A fault bound to requests by method and path prefix.
#[derive(Debug, Clone)]
pub struct FaultRule {
    method: HttpMethod,
    path_prefix: String,
    fault: Fault,
    /// Remaining hits; `None` fires forever.
    remaining: Option<usize>,
}

impl FaultRule {
    /// A rule that fires on every matching request.
    pub fn new(method: HttpMethod, path_prefix: impl Into<String>, fault: Fault) -> Self {
        Self {
            method,
            path_prefix: path_prefix.into(),
            fault,
            remaining: None,
        }
    }

    /// Limits the rule to the next `count` matching requests.
    pub fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        self.method == request.method
            && request.path.starts_with(&self.path_prefix)
            && self.remaining != Some(0)
    }
}

/// Ordered fault rules; the first match wins.
#[derive(Debug, Default)]
pub struct FaultInjector {
    rules: Vec<FaultRule>,
}

impl FaultInjector {
    /// Adds a rule.
    pub fn push(&mut self, rule: FaultRule) {
        self.rules.push(rule);
    }

    /// Removes every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Returns the injected answer for a request, if a rule matches.
    pub fn intercept(
        &mut self,
        request: &HttpRequest,
    ) -> Option<Result<HttpResponse, TransportError>> {
        let rule = self.rules.iter_mut().find(|rule| rule.matches(request))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.fault.apply())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_rule_expires() {
        let mut faults = FaultInjector::default();
        faults.push(FaultRule::new(HttpMethod::Post, "/api/assets", Fault::status(503)).times(1));
        let request = HttpRequest::new(HttpMethod::Post, "/api/assets/v1.2");

        let first = faults.intercept(&request).unwrap().unwrap();
        assert_eq!(first.status, 503);
        assert!(faults.intercept(&request).is_none());
    }

    #[test]
    fn method_must_match() {
        let mut faults = FaultInjector::default();
        faults.push(FaultRule::new(HttpMethod::Put, "/", Fault::Timeout));
        assert!(faults
            .intercept(&HttpRequest::new(HttpMethod::Get, "/api/versions/v1.0/version"))
            .is_none());
        assert_eq!(
            faults.intercept(&HttpRequest::new(HttpMethod::Put, "/x")),
            Some(Err(TransportError::Timeout))
        );
    }
}
