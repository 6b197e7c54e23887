//! ---
//! chaos_section: "01-core-functionality"
//! chaos_subsection: "tests"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Configuration parsing and validation tests."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::io::Write;
use std::time::Duration;

use r_chaos_common::config::{AppConfig, PercentageTunable, SequenceSetting};
use r_chaos_common::LogFormat;

const FULL_CONFIG: &str = r#"
[experiment]
name = "pod-delete"
target_kind = "pod"
candidates = ["shop/cart-0", "shop/cart-1", "shop/cart-2"]
duration = 30
interval = 2.5
interval_max = 5
randomness = true
sequence = "serial"
affected_percentage = "20-60"
seed = 7

[platform]
inject = "kubectl delete pod {target}"
revert = "true"
state = "kubectl get pod {target} -o jsonpath={.status.phase}"
faulted_output = "Terminating"
nominal_output = "Running"

[[probes]]
name = "frontend"
type = "http"
mode = "Edge"
[probes.run]
attempts = 3
probe_timeout = 0.5
[probes.http]
url = "http://127.0.0.1:8080/health"
response_code = "200"

[[probes]]
name = "replicas"
type = "cmd"
mode = "Continuous"
[probes.cmd]
command = "echo 3"
[probes.cmd.comparator]
type = "int"
criteria = ">="
value = "2"

[logging]
format = "pretty"
"#;

#[test]
fn parses_full_configuration() {
    let config: AppConfig = FULL_CONFIG.parse().expect("config parses");
    let experiment = &config.experiment;
    assert_eq!(experiment.name, "pod-delete");
    assert_eq!(experiment.candidates.len(), 3);
    assert_eq!(experiment.duration, Duration::from_secs(30));
    assert_eq!(experiment.interval, Duration::from_millis(2500));
    assert_eq!(experiment.interval_max, Some(Duration::from_secs(5)));
    assert_eq!(experiment.sequence, SequenceSetting::Serial);
    assert_eq!(
        experiment.affected_percentage,
        PercentageTunable::Range { low: 20, high: 60 }
    );
    assert_eq!(experiment.status_timeout, Duration::from_secs(180));
    assert_eq!(config.probes.len(), 2);
    assert_eq!(config.probes[0].run.attempts, 3);
    assert_eq!(config.probes[0].run.probe_timeout, Duration::from_millis(500));
    assert_eq!(config.probes[1].run.attempts, 1);
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(!config.metrics.enabled);
}

#[test]
fn integer_percentage_is_accepted() {
    let config: AppConfig = r#"
        [experiment]
        name = "node-drain"
        affected_percentage = 40
    "#
    .parse()
    .expect("config parses");
    assert_eq!(
        config.experiment.affected_percentage,
        PercentageTunable::Fixed(40)
    );
    assert_eq!(config.experiment.sequence, SequenceSetting::Parallel);
}

#[test]
fn rejects_duplicate_probe_names() {
    let err = r#"
        [experiment]
        name = "dup"

        [[probes]]
        name = "p"
        type = "cmd"
        mode = "SOT"
        [probes.cmd]
        command = "true"
        [probes.cmd.comparator]
        criteria = "equal"
        value = ""

        [[probes]]
        name = "p"
        type = "cmd"
        mode = "EOT"
        [probes.cmd]
        command = "true"
        [probes.cmd.comparator]
        criteria = "equal"
        value = ""
    "#
    .parse::<AppConfig>()
    .expect_err("duplicate names rejected");
    assert!(err.to_string().contains("declared more than once"));
}

#[test]
fn rejects_probe_without_inputs() {
    let err = r#"
        [experiment]
        name = "missing"

        [[probes]]
        name = "p"
        type = "http"
        mode = "SOT"
    "#
    .parse::<AppConfig>()
    .expect_err("missing inputs rejected");
    assert!(err.to_string().contains("missing its [http] inputs"));
}

#[test]
fn rejects_inverted_interval_bounds() {
    let err = r#"
        [experiment]
        name = "bad-interval"
        interval = 10
        interval_max = 5
    "#
    .parse::<AppConfig>()
    .expect_err("inverted bounds rejected");
    assert!(err.to_string().contains("interval_max"));
}

#[test]
fn percentage_range_parsing() {
    assert_eq!(
        "".parse::<PercentageTunable>().unwrap(),
        PercentageTunable::Fixed(0)
    );
    assert_eq!(
        " 10 - 30 ".parse::<PercentageTunable>().unwrap(),
        PercentageTunable::Range { low: 10, high: 30 }
    );
    assert!("ten".parse::<PercentageTunable>().is_err());
}

#[test]
fn load_prefers_env_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "[experiment]\nname = \"from-env\"\ncandidates = [\"a\"]\n"
    )
    .unwrap();
    std::env::set_var(AppConfig::ENV_CONFIG_PATH, file.path());
    let loaded = AppConfig::load_with_source(&["/nonexistent/chaos.toml"]).expect("loads");
    std::env::remove_var(AppConfig::ENV_CONFIG_PATH);
    assert_eq!(loaded.config.experiment.name, "from-env");
    assert_eq!(loaded.source, file.path());

    let err = AppConfig::load(&["/nonexistent/chaos.toml"]).expect_err("nothing to load");
    assert!(err.to_string().contains("no configuration files found"));
}
