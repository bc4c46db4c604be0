pub mod guard;
pub mod routes;

use std::{collections::BTreeMap, sync::Arc};

use log::{debug, warn};
use serde::Serialize;

use crate::auth::CredentialStore;

pub use guard::{guard, GuardDecision, RedirectTarget, RouteMeta, HOME_PATH, LOGIN_PATH};
pub use routes::{Route, RouteMatch, RouteTable};

/// Redirects never chain more than login -> home, so anything longer is a
/// misconfigured route table.
const MAX_REDIRECT_HOPS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Navigation {
    Entered {
        route: &'static str,
        path: String,
        params: BTreeMap<String, String>,
        redirected_from: Option<String>,
    },
    NotFound {
        path: String,
    },
}

impl Navigation {
    pub fn route(&self) -> Option<&'static str> {
        match self {
            Navigation::Entered { route, .. } => Some(route),
            Navigation::NotFound { .. } => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Navigation::Entered { path, .. } | Navigation::NotFound { path } => path,
        }
    }
}

/// Router front door: resolves a path and runs the guard against the
/// credential as it is right now.
#[derive(Clone)]
pub struct Navigator {
    routes: Arc<RouteTable>,
    credentials: CredentialStore,
}

impl Navigator {
    pub fn new(routes: RouteTable, credentials: CredentialStore) -> Self {
        Self {
            routes: Arc::new(routes),
            credentials,
        }
    }

    /// Single guard evaluation for `path`, without following redirects.
    pub async fn check(&self, path: &str) -> Option<GuardDecision> {
        let matched = self.routes.resolve(path)?;
        let authenticated = self.credentials.is_authenticated().await;
        Some(guard(matched.route.meta(), authenticated))
    }

    pub async fn navigate(&self, path: &str) -> Navigation {
        let requested = path.to_string();
        let mut current = requested.clone();

        for _ in 0..MAX_REDIRECT_HOPS {
            let Some(matched) = self.routes.resolve(&current) else {
                debug!("No route for {current}");
                return Navigation::NotFound { path: current };
            };

            let authenticated = self.credentials.is_authenticated().await;
            match guard(matched.route.meta(), authenticated) {
                GuardDecision::Allow => {
                    let redirected_from = (current != requested).then(|| requested.clone());
                    return Navigation::Entered {
                        route: matched.route.name,
                        path: current,
                        params: matched.params,
                        redirected_from,
                    };
                }
                GuardDecision::RedirectTo(target) => {
                    debug!("Guard redirected {current} to {}", target.path());
                    current = target.path().to_string();
                }
            }
        }

        warn!("Navigation to {requested} exceeded {MAX_REDIRECT_HOPS} redirects");
        Navigation::NotFound { path: requested }
    }
}
