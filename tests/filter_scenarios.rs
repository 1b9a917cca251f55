//! Filter decision scenarios driven through the public API, matching the
//! lookup chains operators actually configure.

mod common;

use gitpulse::dataset::QualifiedNames;
use gitpulse::filter::{compute_detail_level, DetailLevel, FilterSettings, RulesetDefinition};

use common::params;

fn qnames(exe: &str, verb: &str, mode: &str) -> QualifiedNames {
    QualifiedNames {
        exe: exe.to_string(),
        exe_verb: verb.to_string(),
        exe_verb_mode: mode.to_string(),
    }
}

#[test]
fn test_empty_filter_default_command() {
    let fs = FilterSettings::default();
    let (dl, debug) =
        compute_detail_level(Some(&fs), &params(&[]), &qnames("c", "c:v", "c:v#m"));

    assert_eq!(dl, DetailLevel::Summary);
    assert_eq!(debug, "[builtin-default -> dl:summary]");
}

#[test]
fn test_nickname_fallback_chain() {
    let mut fs = FilterSettings::parse(
        r#"
keynames:
  nickname_key: "otel.trace2.nickname"
nicknames:
  "monorepo": "rs:rsdef1"
rulesets:
  "rs:rsdef0": "./rs0.yml"
  "rs:rsdef1": "./rs1.yml"
defaults:
  ruleset: "rs:rsdef0"
"#,
    )
    .unwrap();
    fs.ruleset_defs.insert(
        "rs:rsdef0".to_string(),
        RulesetDefinition::parse("{}", "rs0.yml").unwrap(),
    );
    fs.ruleset_defs.insert(
        "rs:rsdef1".to_string(),
        RulesetDefinition::parse("defaults:\n  detail: \"dl:summary\"\n", "rs1.yml").unwrap(),
    );

    let (dl, debug) = compute_detail_level(
        Some(&fs),
        &params(&[("otel.trace2.nickname", "monorepo")]),
        &qnames("c", "c:v", "c:v#m"),
    );

    assert_eq!(dl, DetailLevel::Summary);
    assert_eq!(
        debug,
        "[nickname -> monorepo]/[monorepo -> rs:rsdef1]/[command -> c:v#m]/[ruleset-default -> dl:summary]"
    );
}

#[test]
fn test_ruleset_command_precedence() {
    let mut fs = FilterSettings::default();
    fs.defaults.ruleset = "rs:rscmd0".to_string();
    fs.ruleset_defs.insert(
        "rs:rscmd0".to_string(),
        RulesetDefinition::parse(
            r#"
commands:
  "c:v#m": "dl:drop"
  "c:v": "dl:summary"
  "c": "dl:process"
defaults:
  detail: "dl:verbose"
"#,
            "rs-cmd0.yml",
        )
        .unwrap(),
    );
    let empty = params(&[]);

    let cases = [
        (qnames("c", "c:v", "c:v#m"), DetailLevel::Drop),
        (qnames("c", "c:v", "c:v#ZZ"), DetailLevel::Summary),
        (qnames("c", "c:YY", "c:YY#ZZ"), DetailLevel::Process),
        (qnames("XX", "XX:v", "XX:v#m"), DetailLevel::Verbose),
    ];

    for (qn, want) in cases {
        let (dl, debug) = compute_detail_level(Some(&fs), &empty, &qn);
        assert_eq!(dl, want, "qn {} debug {debug}", qn.exe_verb_mode);
    }
}

#[test]
fn test_ruleset_key_beats_nickname_and_default() {
    let mut fs = FilterSettings::parse(
        r#"
keynames:
  nickname_key: "otel.trace2.nickname"
  ruleset_key: "otel.trace2.ruleset"
nicknames:
  "monorepo": "dl:verbose"
defaults:
  ruleset: "dl:process"
"#,
    )
    .unwrap();
    fs.ruleset_defs.insert(
        "rs:mine".to_string(),
        RulesetDefinition::parse("defaults:\n  detail: \"dl:drop\"\n", "rs-mine.yml").unwrap(),
    );

    // Ruleset key wins over both the nickname and the global default.
    let (dl, _) = compute_detail_level(
        Some(&fs),
        &params(&[
            ("otel.trace2.ruleset", "rs:mine"),
            ("otel.trace2.nickname", "monorepo"),
        ]),
        &qnames("git", "git:status", "git:status"),
    );
    assert_eq!(dl, DetailLevel::Drop);

    // Without the ruleset key the nickname applies.
    let (dl, _) = compute_detail_level(
        Some(&fs),
        &params(&[("otel.trace2.nickname", "monorepo")]),
        &qnames("git", "git:status", "git:status"),
    );
    assert_eq!(dl, DetailLevel::Verbose);

    // With neither, the global default applies.
    let (dl, _) = compute_detail_level(
        Some(&fs),
        &params(&[]),
        &qnames("git", "git:status", "git:status"),
    );
    assert_eq!(dl, DetailLevel::Process);
}

#[test]
fn test_longest_prefix_property_over_generated_commands() {
    // For any qualified-name triple, the resolved level is the
    // longest-matching entry among mode, verb, exe forms, else the
    // ruleset default.
    let mut fs = FilterSettings::default();
    fs.defaults.ruleset = "rs:prop".to_string();
    fs.ruleset_defs.insert(
        "rs:prop".to_string(),
        RulesetDefinition::parse(
            r#"
commands:
  "git:fetch#shallow": "dl:verbose"
  "git:fetch": "dl:process"
  "git": "dl:summary"
defaults:
  detail: "dl:drop"
"#,
            "rs-prop.yml",
        )
        .unwrap(),
    );
    let empty = params(&[]);

    let table = [
        ("git", "git:fetch", "git:fetch#shallow", DetailLevel::Verbose),
        ("git", "git:fetch", "git:fetch#full", DetailLevel::Process),
        ("git", "git:push", "git:push#x", DetailLevel::Summary),
        ("scalar", "scalar:clone", "scalar:clone#x", DetailLevel::Drop),
    ];

    for (exe, verb, mode, want) in table {
        let (dl, _) = compute_detail_level(Some(&fs), &empty, &qnames(exe, verb, mode));
        assert_eq!(dl, want, "{mode}");
    }
}
