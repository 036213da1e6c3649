use crate::errors::{Error, Result};
use crate::policy::capability::{Capabilities, Capability};
use crate::policy::parser::{self, PathBlock};
use crate::policy::{PathRule, Policy};

/// Compiles policy source into its ordered rule list.
///
/// Rules keep source declaration order and are never deduplicated.
pub fn compile(name: &str, source: &str) -> Result<Policy> {
    let document = parser::parse(source)?;
    let rules = document
        .paths
        .into_iter()
        .map(compile_block)
        .collect::<Result<Vec<_>>>()?;

    Ok(Policy {
        name: name.to_string(),
        raw: source.to_string(),
        rules,
    })
}

fn compile_block(block: PathBlock) -> Result<PathRule> {
    let mut capabilities = block.capabilities;
    if let Some(level) = block.legacy_policy.as_deref() {
        capabilities.extend(expand_legacy(level)?.iter().map(|c| c.to_string()));
    }
    compile_rule(&block.pattern, &capabilities)
}

/// Normalizes one pattern and folds its capability list into a mask.
pub fn compile_rule<S: AsRef<str>>(pattern: &str, capabilities: &[S]) -> Result<PathRule> {
    let pattern = pattern.strip_prefix('/').unwrap_or(pattern);

    if pattern.contains("+*") {
        return Err(Error::compile(format!(
            "path {pattern:?}: '+*' is an ambiguous wildcard combination"
        )));
    }

    let has_segment_wildcard =
        pattern == "+" || pattern.contains("/+") || pattern.starts_with("+/");

    let (pattern, is_prefix) = match pattern.strip_suffix('*') {
        Some(stem) if !has_segment_wildcard => (stem, true),
        _ => (pattern, false),
    };

    Ok(PathRule {
        pattern: pattern.to_string(),
        is_prefix,
        has_segment_wildcard,
        capabilities: fold_capabilities(capabilities)?,
    })
}

fn fold_capabilities<S: AsRef<str>>(names: &[S]) -> Result<Capabilities> {
    let mut mask = Capabilities::empty();
    for name in names {
        match name.as_ref().parse::<Capability>()? {
            Capability::Deny => return Ok(Capabilities::deny_only()),
            capability => mask.insert(capability),
        }
    }
    Ok(mask)
}

fn expand_legacy(level: &str) -> Result<&'static [Capability]> {
    use Capability::*;

    const READ: &[Capability] = &[Read, List];
    const WRITE: &[Capability] = &[Read, List, Create, Update, Delete];
    const SUDO: &[Capability] = &[Read, List, Create, Update, Delete, Sudo];

    match level {
        "deny" => Ok(&[Deny]),
        "read" => Ok(READ),
        "write" => Ok(WRITE),
        "sudo" => Ok(SUDO),
        other => Err(Error::compile(format!("invalid policy level {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_leading_slash() {
        let rule = compile_rule("/secret/foo", &["read"]).expect("compile");
        assert_eq!(rule.pattern, "secret/foo");
        let rule = compile_rule("//secret", &["read"]).expect("compile");
        assert_eq!(rule.pattern, "/secret");
    }

    #[test]
    fn trailing_star_becomes_prefix() {
        let rule = compile_rule("secret/*", &["read"]).expect("compile");
        assert_eq!(rule.pattern, "secret/");
        assert!(rule.is_prefix);
        assert!(!rule.has_segment_wildcard);

        let rule = compile_rule("*", &["read"]).expect("compile");
        assert_eq!(rule.pattern, "");
        assert!(rule.is_prefix);
    }

    #[test]
    fn segment_wildcards_keep_trailing_characters() {
        for pattern in ["+", "+/config", "secret/+/config", "secret/+/*"] {
            let rule = compile_rule(pattern, &["read"]).expect("compile");
            assert!(rule.has_segment_wildcard, "{pattern}");
            assert!(!rule.is_prefix, "{pattern}");
            assert_eq!(rule.pattern, pattern);
        }
        let rule = compile_rule("secret/a+b", &["read"]).expect("compile");
        assert!(!rule.has_segment_wildcard);
    }

    #[test]
    fn rejects_ambiguous_wildcards() {
        for pattern in ["secret/+*", "+*", "/a/+*/b"] {
            let err = compile_rule(pattern, &["read"]).unwrap_err();
            assert!(matches!(err, Error::Compile(_)), "{pattern}");
        }
    }

    #[test]
    fn deny_is_exclusive_and_terminal() {
        let rule = compile_rule("secret/*", &["read", "deny", "update"]).expect("compile");
        assert_eq!(rule.capabilities, Capabilities::deny_only());

        // Entries after deny are not inspected at all.
        let rule = compile_rule("secret/*", &["deny", "bogus"]).expect("compile");
        assert_eq!(rule.capabilities, Capabilities::deny_only());
    }

    #[test]
    fn unknown_capability_is_named_in_error() {
        let err = compile_rule("secret/*", &["read", "write"]).unwrap_err();
        assert!(err.to_string().contains("\"write\""), "{err}");
    }

    #[test]
    fn legacy_levels_expand() {
        let policy = compile(
            "legacy",
            r#"
            path "a/*" { policy = "read" }
            path "b/*" { policy = "write" }
            path "c/*" { capabilities = ["patch"] policy = "sudo" }
            path "d/*" { capabilities = ["read"] policy = "deny" }
            "#,
        )
        .expect("compile");
        let names: Vec<Vec<&str>> = policy
            .rules
            .iter()
            .map(|rule| rule.capabilities.names())
            .collect();
        assert_eq!(names[0], vec!["read", "list"]);
        assert_eq!(names[1], vec!["create", "read", "update", "delete", "list"]);
        assert_eq!(
            names[2],
            vec!["create", "read", "update", "delete", "list", "sudo", "patch"]
        );
        assert_eq!(names[3], vec!["deny"]);

        let err = compile("bad", r#"path "a" { policy = "admin" }"#).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn preserves_declaration_order_without_dedup() {
        let policy = compile(
            "dupes",
            r#"
            path "secret/*" { capabilities = ["read"] }
            path "secret/*" { capabilities = ["deny"] }
            path "/other" { capabilities = [] }
            "#,
        )
        .expect("compile");
        assert_eq!(policy.rules.len(), 3);
        assert_eq!(policy.rules[0].capabilities.names(), vec!["read"]);
        assert!(policy.rules[1].capabilities.is_denied());
        assert!(policy.rules[2].capabilities.is_empty());
        assert_eq!(policy.rules[2].pattern, "other");
    }

    #[test]
    fn secret_read_example() {
        let policy = compile("reader", r#"path "secret/*" { capabilities = ["read"] }"#)
            .expect("compile");
        assert_eq!(policy.name, "reader");
        assert_eq!(
            policy.rules,
            vec![PathRule {
                pattern: "secret/".into(),
                is_prefix: true,
                has_segment_wildcard: false,
                capabilities: Capabilities::empty().with(Capability::Read),
            }]
        );
    }
}
