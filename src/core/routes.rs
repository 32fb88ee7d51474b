use std::collections::HashSet;

use hyper::Method;
use regex::Regex;

use crate::adapt::AdapterId;
use crate::error::GatewayError;

/// Route parameter extracted from path
#[derive(Debug, Clone)]
pub struct RouteParam {
    /// Parameter name
    pub name: String,

    /// Parameter value
    pub value: String,
}

/// A static mapping from an inbound request pattern to a backend endpoint.
///
/// Both the legacy hierarchical convention (`/api/v1/app/<resource>/<action>/:id`)
/// and the current flat convention (`/api/<resource>/:id`) appear as
/// independent rows resolving to the same backend path, so old and new
/// frontend builds work against the same backend fleet.
#[derive(Debug, Clone)]
pub struct Route {
    /// HTTP method this route matches
    pub method: Method,

    /// Inbound path pattern, may contain `:param` segments
    pub pattern: String,

    /// Target backend name
    pub backend: String,

    /// Backend path template, `:param` segments substituted from the pattern
    pub target: String,

    /// Response adapter applied on the way back, None means passthrough
    pub adapter: Option<AdapterId>,
}

impl Route {
    pub fn new(method: Method, pattern: &str, backend: &str, target: &str) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
            backend: backend.to_string(),
            target: target.to_string(),
            adapter: None,
        }
    }

    pub fn with_adapter(mut self, adapter: AdapterId) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

/// A resolved route: concrete backend path with parameters substituted and
/// the original query string appended
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route: Route,
    pub params: Vec<RouteParam>,
    pub target_path: String,
}

/// Path pattern for route matching
#[derive(Debug, Clone)]
struct PathPattern {
    /// Compiled regex for matching
    regex: Regex,

    /// Parameter names in order of appearance
    param_names: Vec<String>,
}

impl PathPattern {
    /// Create a new path pattern from a path string
    fn new(path: &str) -> Result<Self, GatewayError> {
        let mut param_names = Vec::new();
        let mut regex_pattern = "^".to_string();

        let path_parts = path.split('/').collect::<Vec<_>>();

        for (i, part) in path_parts.iter().enumerate() {
            if i > 0 {
                regex_pattern.push('/');
            }

            if part.is_empty() {
                continue;
            }

            if let Some(param_name) = part.strip_prefix(':') {
                param_names.push(param_name.to_string());
                regex_pattern.push_str(r"([^/]+)");
            } else {
                regex_pattern.push_str(&regex::escape(part));
            }
        }

        regex_pattern.push('$');

        let regex = Regex::new(&regex_pattern).map_err(|e| {
            GatewayError::ConfigError(format!("invalid route pattern '{}': {}", path, e))
        })?;

        Ok(Self { regex, param_names })
    }

    /// Check if this pattern matches the given path and extract parameters
    fn matches(&self, path: &str) -> Option<Vec<RouteParam>> {
        let captures = self.regex.captures(path)?;

        let mut params = Vec::new();
        for (i, name) in self.param_names.iter().enumerate() {
            if let Some(value) = captures.get(i + 1) {
                params.push(RouteParam {
                    name: name.clone(),
                    value: value.as_str().to_string(),
                });
            }
        }

        Some(params)
    }
}

/// Ordered route table, matched first-match-wins. Loaded once at startup
/// and immutable for the process lifetime.
#[derive(Debug)]
pub struct RouteTable {
    entries: Vec<(Route, PathPattern)>,
}

impl RouteTable {
    /// Compile the route set, validating that every route's backend exists
    /// in the configured backend set. A dangling backend reference fails
    /// fast at load time.
    pub fn new(routes: Vec<Route>, backend_names: &HashSet<String>) -> Result<Self, GatewayError> {
        let mut entries = Vec::with_capacity(routes.len());

        for route in routes {
            if !backend_names.contains(&route.backend) {
                return Err(GatewayError::ConfigError(format!(
                    "route {} {} targets unknown backend '{}'",
                    route.method, route.pattern, route.backend
                )));
            }

            let pattern = PathPattern::new(&route.pattern)?;
            entries.push((route, pattern));
        }

        Ok(Self { entries })
    }

    /// Find the first route matching `(method, path)`, substitute extracted
    /// parameters into the target template and append the original query
    /// string. Matching never inspects the request body.
    pub fn resolve(
        &self,
        method: &Method,
        path: &str,
        query: &str,
    ) -> Result<ResolvedRoute, GatewayError> {
        for (route, pattern) in &self.entries {
            if &route.method != method {
                continue;
            }

            if let Some(params) = pattern.matches(path) {
                let mut target_path = substitute(&route.target, &params);
                if !query.is_empty() {
                    target_path.push('?');
                    target_path.push_str(query);
                }

                return Ok(ResolvedRoute {
                    route: route.clone(),
                    params,
                    target_path,
                });
            }
        }

        Err(GatewayError::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Substitute `:param` segments of a target template with extracted values
fn substitute(template: &str, params: &[RouteParam]) -> String {
    template
        .split('/')
        .map(|segment| {
            segment
                .strip_prefix(':')
                .and_then(|name| params.iter().find(|p| p.name == name))
                .map(|p| p.value.as_str())
                .unwrap_or(segment)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The full inbound surface of the fleet platform. Ordered most specific
/// first within each resource so `/api/trucks/by-user/:id` wins over
/// `/api/trucks/:id`.
pub fn fleet_routes() -> Vec<Route> {
    vec![
        // identity (public, passthrough)
        Route::new(Method::POST, "/api/auth/login", "identity", "/api/auth/login"),
        Route::new(Method::POST, "/api/auth/register", "identity", "/api/auth/register"),
        Route::new(Method::POST, "/api/v1/app/user/login", "identity", "/api/auth/login"),
        Route::new(
            Method::POST,
            "/api/v1/app/user/register",
            "identity",
            "/api/auth/register",
        ),
        // fleet records
        Route::new(Method::GET, "/api/trucks/by-user/:id", "fleet", "/api/trucks/by-user/:id")
            .with_adapter(AdapterId::TruckList),
        Route::new(Method::GET, "/api/trucks/:id", "fleet", "/api/trucks/:id")
            .with_adapter(AdapterId::TruckSingle),
        Route::new(Method::GET, "/api/trucks", "fleet", "/api/trucks").with_adapter(AdapterId::TruckList),
        Route::new(Method::POST, "/api/trucks", "fleet", "/api/trucks"),
        Route::new(Method::PUT, "/api/trucks/:id", "fleet", "/api/trucks/:id"),
        Route::new(Method::DELETE, "/api/trucks/:id", "fleet", "/api/trucks/:id"),
        Route::new(
            Method::GET,
            "/api/v1/app/truck/getAllTrucksByUser/:id",
            "fleet",
            "/api/trucks/by-user/:id",
        )
        .with_adapter(AdapterId::TruckList),
        Route::new(
            Method::GET,
            "/api/v1/app/truck/getTruck/:id",
            "fleet",
            "/api/trucks/:id",
        )
        .with_adapter(AdapterId::TruckSingle),
        Route::new(Method::GET, "/api/v1/app/truck/getAllTrucks", "fleet", "/api/trucks")
            .with_adapter(AdapterId::TruckList),
        Route::new(
            Method::POST,
            "/api/v1/app/truck/createTruck",
            "fleet",
            "/api/trucks",
        ),
        Route::new(
            Method::PUT,
            "/api/v1/app/truck/updateTruck/:id",
            "fleet",
            "/api/trucks/:id",
        ),
        Route::new(
            Method::DELETE,
            "/api/v1/app/truck/deleteTruck/:id",
            "fleet",
            "/api/trucks/:id",
        ),
        // financial ledger
        Route::new(
            Method::GET,
            "/api/expenses/by-truck/:id",
            "ledger",
            "/api/expenses/by-truck/:id",
        )
        .with_adapter(AdapterId::ExpenseList),
        Route::new(Method::GET, "/api/expenses", "ledger", "/api/expenses")
            .with_adapter(AdapterId::ExpenseList),
        Route::new(Method::POST, "/api/expenses", "ledger", "/api/expenses"),
        Route::new(
            Method::GET,
            "/api/v1/app/expense/getAllExpenses",
            "ledger",
            "/api/expenses",
        )
        .with_adapter(AdapterId::ExpenseList),
        Route::new(
            Method::GET,
            "/api/v1/app/expense/getExpensesByTruck/:id",
            "ledger",
            "/api/expenses/by-truck/:id",
        )
        .with_adapter(AdapterId::ExpenseList),
        Route::new(
            Method::POST,
            "/api/v1/app/expense/createExpense",
            "ledger",
            "/api/expenses",
        ),
        // analytics aggregation
        Route::new(
            Method::GET,
            "/api/analytics/summary",
            "analytics",
            "/api/analytics/summary",
        ),
        Route::new(
            Method::GET,
            "/api/v1/app/analytics/getDashboardSummary",
            "analytics",
            "/api/analytics/summary",
        ),
        // alerting
        Route::new(Method::GET, "/api/alerts", "alerts", "/api/alerts").with_adapter(AdapterId::AlertList),
        Route::new(
            Method::POST,
            "/api/alerts/:id/acknowledge",
            "alerts",
            "/api/alerts/:id/acknowledge",
        ),
        Route::new(Method::GET, "/api/v1/app/alert/getAllAlerts", "alerts", "/api/alerts")
            .with_adapter(AdapterId::AlertList),
        Route::new(
            Method::POST,
            "/api/v1/app/alert/acknowledgeAlert/:id",
            "alerts",
            "/api/alerts/:id/acknowledge",
        ),
    ]
}
