use std::collections::BTreeMap;

use super::guard::{RouteMeta, LOGIN_PATH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    pub pattern: &'static str,
    pub requires_auth: bool,
}

impl Route {
    pub fn meta(&self) -> RouteMeta {
        RouteMeta {
            requires_auth: self.requires_auth,
            is_login: self.pattern == LOGIN_PATH,
        }
    }

    /// Matches `path` against the pattern; `:name` segments capture.
    fn capture(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let pattern: Vec<&str> = segments(self.pattern).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (expected, got) in pattern.iter().zip(actual.iter()) {
            if let Some(name) = expected.strip_prefix(':') {
                params.insert(name.to_string(), (*got).to_string());
            } else if expected != got {
                return None;
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub route: Route,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl Default for RouteTable {
    /// The dashboard's views. Only the login view is public.
    fn default() -> Self {
        Self::new(vec![
            Route {
                name: "login",
                pattern: "/login",
                requires_auth: false,
            },
            Route {
                name: "dashboard",
                pattern: "/",
                requires_auth: true,
            },
            Route {
                name: "part",
                pattern: "/parts/:partId",
                requires_auth: true,
            },
            Route {
                name: "parts",
                pattern: "/parts",
                requires_auth: true,
            },
            Route {
                name: "chat",
                pattern: "/chatIA",
                requires_auth: true,
            },
        ])
    }
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            route.capture(path).map(|params| RouteMatch {
                route: route.clone(),
                params,
            })
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
