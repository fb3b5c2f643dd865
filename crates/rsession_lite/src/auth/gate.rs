use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::auth::Principal;
use crate::error::AuthorizationError;

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Who may open a stream on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    /// Anyone, even before authentication.
    PermitAll,
    /// Any authenticated principal.
    Authenticated,
    /// An authenticated principal holding at least one of these roles.
    AnyRole(BTreeSet<String>),
    /// Nobody.
    DenyAll,
}

impl AccessRule {
    pub fn any_role<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        AccessRule::AnyRole(roles.into_iter().map(Into::into).collect())
    }
}

/// Per-route access control keyed by principal.
///
/// Routes without an explicit rule fall back to the default rule, which
/// requires an authenticated principal.
///
/// # Example
/// ```
/// use rsession_lite::auth::{AccessRule, AuthorizationGate, Principal};
///
/// let gate = AuthorizationGate::new().with_route("admin", AccessRule::any_role(["ADMIN"]));
/// let user = Principal::new("memphis", ["USER"]);
///
/// assert!(gate.authorize(Some(&user), "greetings").is_allowed());
/// assert!(!gate.authorize(Some(&user), "admin").is_allowed());
/// assert!(!gate.authorize(None, "greetings").is_allowed());
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    default_rule: AccessRule,
    routes: HashMap<String, AccessRule>,
}

impl AuthorizationGate {
    /// A gate that requires authentication for every route.
    pub fn new() -> Self {
        Self {
            default_rule: AccessRule::Authenticated,
            routes: HashMap::new(),
        }
    }

    /// A gate that lets everything through.
    pub fn permit_all() -> Self {
        Self::new().with_default(AccessRule::PermitAll)
    }

    /// Replace the rule used for routes without an explicit rule.
    pub fn with_default(mut self, rule: AccessRule) -> Self {
        self.default_rule = rule;
        self
    }

    /// Set the rule for a single route.
    pub fn with_route(mut self, route: impl Into<String>, rule: AccessRule) -> Self {
        self.routes.insert(route.into(), rule);
        self
    }

    /// Decide whether `principal` may open a stream on `route`.
    ///
    /// `None` means the session has not completed its handshake.
    pub fn authorize(&self, principal: Option<&Principal>, route: &str) -> Decision {
        let rule = self.routes.get(route).unwrap_or(&self.default_rule);

        let decision = match (rule, principal) {
            (AccessRule::PermitAll, _) => Decision::Allow,
            (AccessRule::DenyAll, _) => Decision::Deny {
                reason: "route is closed".to_string(),
            },
            (_, None) => Decision::Deny {
                reason: "authentication required".to_string(),
            },
            (AccessRule::Authenticated, Some(_)) => Decision::Allow,
            (AccessRule::AnyRole(roles), Some(principal)) => {
                if roles.iter().any(|role| principal.has_role(role)) {
                    Decision::Allow
                } else {
                    let wanted: Vec<&str> = roles.iter().map(String::as_str).collect();
                    Decision::Deny {
                        reason: format!("requires one of [{}]", wanted.join(", ")),
                    }
                }
            }
        };

        if let Decision::Deny { reason } = &decision {
            debug!(
                route = %route,
                principal = ?principal.map(Principal::username),
                reason = %reason,
                "Stream-open denied"
            );
        }

        decision
    }

    /// Like [`authorize`](Self::authorize), as a `Result`.
    pub fn check(&self, principal: Option<&Principal>, route: &str) -> Result<(), AuthorizationError> {
        match self.authorize(principal, route) {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(AuthorizationError {
                route: route.to_string(),
                reason,
            }),
        }
    }
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Principal {
        Principal::new("memphis", ["USER"])
    }

    #[test]
    fn test_denies_before_handshake() {
        let gate = AuthorizationGate::new();
        let decision = gate.authorize(None, "greetings");
        assert_eq!(
            decision,
            Decision::Deny {
                reason: "authentication required".to_string()
            }
        );
    }

    #[test]
    fn test_default_allows_authenticated() {
        let gate = AuthorizationGate::new();
        assert!(gate.authorize(Some(&user()), "greetings").is_allowed());
        assert!(gate.authorize(Some(&user()), "health").is_allowed());
    }

    #[test]
    fn test_role_rule() {
        let gate = AuthorizationGate::new().with_route("admin", AccessRule::any_role(["ADMIN"]));
        let admin = Principal::new("root", ["USER", "ADMIN"]);

        assert!(gate.authorize(Some(&admin), "admin").is_allowed());

        let err = gate.check(Some(&user()), "admin").unwrap_err();
        assert_eq!(err.route, "admin");
        assert_eq!(err.reason, "requires one of [ADMIN]");
    }

    #[test]
    fn test_role_rule_denies_before_handshake() {
        let gate = AuthorizationGate::new().with_route("admin", AccessRule::any_role(["ADMIN"]));
        assert!(!gate.authorize(None, "admin").is_allowed());
    }

    #[test]
    fn test_permit_all_and_deny_all() {
        let gate = AuthorizationGate::permit_all().with_route("closed", AccessRule::DenyAll);
        assert!(gate.authorize(None, "greetings").is_allowed());
        assert!(!gate.authorize(Some(&user()), "closed").is_allowed());
    }
}
