use std::fmt;
use std::str::FromStr;

use crate::policy::capability::{Capabilities, Capability};
use crate::policy::{PathRule, Policy, ROOT_POLICY};

/// HTTP-style request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Other,
}

impl Verb {
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Verb::Get,
            "POST" => Verb::Post,
            "PUT" => Verb::Put,
            "DELETE" => Verb::Delete,
            _ => Verb::Other,
        }
    }
}

impl FromStr for Verb {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Verb::from_method(s))
    }
}

/// The request being checked: mount-relative path, verb and list flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest<'a> {
    pub path: &'a str,
    pub verb: Verb,
    pub list: bool,
}

impl<'a> AccessRequest<'a> {
    pub fn new(path: &'a str, verb: Verb, list: bool) -> Self {
        Self {
            path: path.strip_prefix('/').unwrap_or(path),
            verb,
            list,
        }
    }

    /// Capability a matched rule must grant for this request.
    pub fn required_capability(&self) -> Option<Capability> {
        if self.list {
            return Some(Capability::List);
        }
        match self.verb {
            Verb::Get => Some(Capability::Read),
            Verb::Post | Verb::Put => Some(Capability::Update),
            Verb::Delete => Some(Capability::Delete),
            Verb::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allowed => f.write_str("allowed"),
            Decision::Denied => f.write_str("denied"),
        }
    }
}

/// Outcome of matching a request against a token's policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    /// Grants of the rule that decided the request. Root resolves to every
    /// grant and an unmatched request to none.
    pub capabilities: Capabilities,
    pub matched: Option<MatchedRule>,
}

impl Resolution {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }

    fn root() -> Self {
        Self {
            decision: Decision::Allowed,
            capabilities: Capabilities::all(),
            matched: None,
        }
    }

    fn unmatched() -> Self {
        Self {
            decision: Decision::Denied,
            capabilities: Capabilities::empty(),
            matched: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    pub policy: String,
    pub pattern: String,
}

impl PathRule {
    /// Exact match, or literal prefix match for prefix rules.
    ///
    /// Segment wildcards (`+`) are not expanded here; such rules only match a
    /// request path equal to the rule text.
    pub fn matches(&self, path: &str) -> bool {
        path == self.pattern || (self.is_prefix && path.starts_with(&self.pattern))
    }
}

/// First-match-wins resolution over policies in attachment order.
pub struct PathMatcher<'a> {
    policies: &'a [Policy],
}

impl<'a> PathMatcher<'a> {
    pub fn new(policies: &'a [Policy]) -> Self {
        Self { policies }
    }

    pub fn resolve(&self, request: &AccessRequest<'_>) -> Resolution {
        if self.policies.iter().any(|policy| policy.name == ROOT_POLICY) {
            return Resolution::root();
        }

        let Some((policy, rule)) = self.first_match(request.path) else {
            return Resolution::unmatched();
        };

        let allowed = !rule.capabilities.is_denied()
            && request
                .required_capability()
                .is_some_and(|required| rule.capabilities.contains(required));

        Resolution {
            decision: if allowed {
                Decision::Allowed
            } else {
                Decision::Denied
            },
            capabilities: rule.capabilities,
            matched: Some(MatchedRule {
                policy: policy.name.clone(),
                pattern: rule.pattern.clone(),
            }),
        }
    }

    fn first_match(&self, path: &str) -> Option<(&'a Policy, &'a PathRule)> {
        self.policies.iter().find_map(|policy| {
            policy
                .rules
                .iter()
                .find(|rule| rule.matches(path))
                .map(|rule| (policy, rule))
        })
    }
}
