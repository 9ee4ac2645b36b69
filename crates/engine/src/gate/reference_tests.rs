// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

#[parameterized(
    plain = { "nginx:latest", "nginx", Some("latest"), "docker.io" },
    untagged = { "ubuntu", "ubuntu", None, "docker.io" },
    namespaced = { "library/redis", "library/redis", None, "docker.io" },
    ghcr = { "ghcr.io/org/app:1.2.3", "ghcr.io/org/app", Some("1.2.3"), "ghcr.io" },
    dotted_registry = { "registry.example.com/team/app:v1", "registry.example.com/team/app", Some("v1"), "registry.example.com" },
    numeric_tag = { "ghcr.io/foo/evil:1", "ghcr.io/foo/evil", Some("1"), "ghcr.io" },
)]
fn valid_references(raw: &str, name: &str, tag: Option<&str>, registry: &str) {
    let parsed = parse(raw).unwrap();
    assert_eq!(parsed.name, name);
    assert_eq!(parsed.tag.as_deref(), tag);
    assert_eq!(parsed.registry, registry);
    assert_eq!(parsed.raw, raw);
}

#[parameterized(
    empty = { "" },
    traversal = { "../etc/passwd" },
    backslash = { "repo\\name" },
    script = { "repo<script>alert(1)" },
    javascript = { "javascript:alert(1)" },
    data_url = { "data:text/html;base64,x" },
    cmd = { "repo/cmd.exe" },
    shell = { "image//bin/sh" },
    powershell = { "POWERSHELL/app" },
    leading_dot = { ".hidden/app" },
    trailing_dash = { "app-" },
    single_char = { "a" },
    empty_tag = { "app:" },
    bad_tag = { "app:la test" },
    space = { "my app:1" },
)]
fn invalid_references(raw: &str) {
    let err = parse(raw).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn over_length_reference_is_rejected() {
    let raw = format!("a{}z", "b".repeat(MAX_REFERENCE_LEN));
    assert!(parse(&raw).is_err());
}

#[test]
fn suspicious_match_is_case_insensitive() {
    assert!(parse("app/CMD.EXE/tool").is_err());
    assert!(parse("JAVASCRIPT:void").is_err());
}

#[test]
fn contains_is_case_insensitive() {
    let parsed = parse("ghcr.io/org/Evil:1").unwrap();
    assert!(parsed.contains("evil"));
    assert!(parsed.contains("EVIL"));
    assert!(!parsed.contains("good"));
}

proptest! {
    // Well-formed, pattern-free names never trip validation.
    #[test]
    fn well_formed_names_parse(
        name in "[a-z0-9][a-z0-9._/-]{0,60}[a-z0-9]",
        tag in proptest::option::of("[a-zA-Z0-9][a-zA-Z0-9._-]{0,30}"),
    ) {
        let raw = match &tag {
            Some(t) => format!("{}:{}", name, t),
            None => name.clone(),
        };
        let lowered = raw.to_lowercase();
        prop_assume!(SUSPICIOUS_PATTERNS.iter().all(|p| !lowered.contains(p)));
        let parsed = parse(&raw);
        prop_assert!(parsed.is_ok(), "rejected {:?}: {:?}", raw, parsed.err());
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.name, name);
        prop_assert_eq!(parsed.tag, tag);
    }
}
