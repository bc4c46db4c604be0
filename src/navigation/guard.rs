use serde::Serialize;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// What the guard needs to know about the requested view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub is_login: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RedirectTarget {
    Login,
    Home,
}

impl RedirectTarget {
    pub fn path(&self) -> &'static str {
        match self {
            RedirectTarget::Login => LOGIN_PATH,
            RedirectTarget::Home => HOME_PATH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GuardDecision {
    Allow,
    RedirectTo(RedirectTarget),
}

/// Pre-navigation gate. Pure in (target, authenticated); callers must pass a
/// freshly read authentication flag on every attempt.
pub fn guard(target: RouteMeta, authenticated: bool) -> GuardDecision {
    if target.requires_auth && !authenticated {
        return GuardDecision::RedirectTo(RedirectTarget::Login);
    }
    if target.is_login && authenticated {
        return GuardDecision::RedirectTo(RedirectTarget::Home);
    }
    GuardDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn expected(requires_auth: bool, is_login: bool, authenticated: bool) -> GuardDecision {
        match (requires_auth, is_login, authenticated) {
            (true, _, false) => GuardDecision::RedirectTo(RedirectTarget::Login),
            (_, true, true) => GuardDecision::RedirectTo(RedirectTarget::Home),
            _ => GuardDecision::Allow,
        }
    }

    #[test]
    fn exhaustive_cross_product() {
        for requires_auth in [true, false] {
            for is_login in [true, false] {
                for authenticated in [true, false] {
                    let meta = RouteMeta {
                        requires_auth,
                        is_login,
                    };
                    assert_eq!(
                        guard(meta, authenticated),
                        expected(requires_auth, is_login, authenticated),
                        "requires_auth={requires_auth} is_login={is_login} authenticated={authenticated}"
                    );
                }
            }
        }
    }

    #[test]
    fn unauthenticated_protected_view_goes_to_login() {
        let parts = RouteMeta {
            requires_auth: true,
            is_login: false,
        };
        assert_eq!(
            guard(parts, false),
            GuardDecision::RedirectTo(RedirectTarget::Login)
        );
    }

    #[test]
    fn authenticated_login_view_goes_home() {
        let login = RouteMeta {
            requires_auth: false,
            is_login: true,
        };
        assert_eq!(
            guard(login, true),
            GuardDecision::RedirectTo(RedirectTarget::Home)
        );
        assert_eq!(RedirectTarget::Home.path(), "/");
    }

    proptest! {
        #[test]
        fn guard_is_deterministic(requires_auth: bool, is_login: bool, authenticated: bool) {
            let meta = RouteMeta { requires_auth, is_login };
            let first = guard(meta, authenticated);
            prop_assert_eq!(first, guard(meta, authenticated));
            prop_assert_eq!(first, expected(requires_auth, is_login, authenticated));
        }
    }
}
