//! Scripted transport for testing
//!
//! Routes match on a substring of [`HttpRequest::describe`], so a route can
//! target a URL path (`"/photos"`) or a protocol command
//! (`"command=APPEND"`). Each route holds a queue of responses; the last one
//! repeats once the queue is down to it. Every request is recorded for
//! verification.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

#[derive(Debug)]
struct Route {
    method: Method,
    pattern: String,
    responses: VecDeque<Outcome>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond(HttpResponse),
    Fail(String),
}

/// Transport that answers from scripted routes
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests matching `method` and `pattern`
    pub fn respond(&self, method: Method, pattern: &str, response: HttpResponse) -> &Self {
        self.push(method, pattern, Outcome::Respond(response));
        self
    }

    /// Queue a JSON response
    pub fn respond_json(
        &self,
        method: Method,
        pattern: &str,
        status: u16,
        body: serde_json::Value,
    ) -> &Self {
        self.respond(method, pattern, HttpResponse::json_value(status, body))
    }

    /// Queue a network failure (no response received)
    pub fn fail(&self, method: Method, pattern: &str, message: &str) -> &Self {
        self.push(method, pattern, Outcome::Fail(message.to_string()));
        self
    }

    fn push(&self, method: Method, pattern: &str, outcome: Outcome) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.pattern == pattern)
        {
            route.responses.push_back(outcome);
            return;
        }
        routes.push(Route {
            method,
            pattern: pattern.to_string(),
            responses: VecDeque::from([outcome]),
        });
    }

    /// All requests sent so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose description contains `pattern`
    pub fn requests_matching(&self, pattern: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.describe().contains(pattern))
            .collect()
    }

    /// Number of requests whose description contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.requests_matching(pattern).len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let line = request.describe();
        self.requests.lock().unwrap().push(request.clone());

        let outcome = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && line.contains(&r.pattern));
            match route {
                Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
                Some(route) => route.responses.front().cloned(),
                None => None,
            }
        };

        match outcome {
            Some(Outcome::Respond(response)) => Ok(response),
            Some(Outcome::Fail(message)) => Err(PlatformError::Network(message).into()),
            None => Err(PlatformError::Network(format!("No mock route for {}", line)).into()),
        }
    }
}
