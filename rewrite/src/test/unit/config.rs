use std::collections::HashMap;

use crate::config::{DEFAULT_MAX_GLOBAL_ITERATIONS, DEFAULT_MAX_USE_RATIO, OnUnusedInput, RewriteConfig};
use crate::error::Error;
use crate::levels::OptLevel;

fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    let vars: HashMap<&str, &str> = vars.iter().copied().collect();
    move |key| vars.get(key).map(|value| value.to_string())
}

#[test]
fn test_builder_defaults() {
    let config = RewriteConfig::builder().build();
    assert_eq!(config, RewriteConfig::default());
    assert_eq!(config.opt_level, OptLevel::O4);
    assert_eq!(config.max_use_ratio, DEFAULT_MAX_USE_RATIO);
    assert_eq!(config.max_global_iterations, DEFAULT_MAX_GLOBAL_ITERATIONS);
    assert_eq!(config.on_unused_input, OnUnusedInput::Raise);
    assert!(!config.unsafe_rewrites);
    assert!(!config.accept_inplace);
}

#[test]
fn test_builder_overrides() {
    let config = RewriteConfig::builder()
        .opt_level(OptLevel::O2)
        .max_use_ratio(2.0)
        .on_unused_input(OnUnusedInput::Ignore)
        .accept_inplace(true)
        .build();
    assert_eq!(config.opt_level, OptLevel::O2);
    assert_eq!(config.max_use_ratio, 2.0);
    assert_eq!(config.on_unused_input, OnUnusedInput::Ignore);
    assert!(config.accept_inplace);
}

#[test]
fn test_from_lookup() {
    let config = RewriteConfig::try_from_lookup(lookup(&[
        ("GRAFT_OPT_LEVEL", "fast_compile"),
        ("GRAFT_UNSAFE", "yes"),
        ("GRAFT_MAX_USE_RATIO", "2.5"),
        ("GRAFT_MAX_GLOBAL_ITERATIONS", "4"),
        ("GRAFT_ON_UNUSED_INPUT", "WARN"),
        ("GRAFT_ACCEPT_INPLACE", "1"),
        ("GRAFT_QUERY", "-merge"),
    ]))
    .unwrap();

    assert_eq!(config.opt_level, OptLevel::O1);
    assert!(config.unsafe_rewrites);
    assert_eq!(config.max_use_ratio, 2.5);
    assert_eq!(config.max_global_iterations, 4);
    assert_eq!(config.on_unused_input, OnUnusedInput::Warn);
    assert!(config.accept_inplace);
    assert!(config.extra.exclude().contains("merge"));
}

#[test]
fn test_unset_variables_keep_defaults() {
    let config = RewriteConfig::try_from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, RewriteConfig::default());
}

#[test]
fn test_malformed_variable_lenient() {
    let config = RewriteConfig::from_lookup(lookup(&[("GRAFT_MAX_USE_RATIO", "-1"), ("GRAFT_OPT_LEVEL", "o2")]));
    assert_eq!(config.max_use_ratio, DEFAULT_MAX_USE_RATIO);
    assert_eq!(config.opt_level, OptLevel::O2);
}

#[test]
fn test_malformed_variable_strict() {
    let err = RewriteConfig::try_from_lookup(lookup(&[("GRAFT_UNSAFE", "maybe")])).unwrap_err();
    assert_eq!(err, Error::InvalidConfig { key: "GRAFT_UNSAFE", value: "maybe".into() });

    let err = RewriteConfig::try_from_lookup(lookup(&[("GRAFT_OPT_LEVEL", "o9")])).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { key: "GRAFT_OPT_LEVEL", .. }));
}

#[test]
fn test_query_composition() {
    let config = RewriteConfig::builder()
        .opt_level(OptLevel::O1)
        .unsafe_rewrites(true)
        .extra("-merge".parse().unwrap())
        .build();
    let query = config.query();
    assert!(query.include().contains("fast_compile"));
    assert!(query.include().contains("unsafe"));
    assert!(query.exclude().contains("merge"));

    assert_eq!(RewriteConfig::from(OptLevel::Stabilization).query(), OptLevel::Stabilization.query());
}
