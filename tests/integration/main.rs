//! Integration tests for the clouddetect binary
//!
//! Only network-free paths are exercised here; cache and lease behavior is
//! covered by the library tests with injected fetchers.

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn clouddetect() -> Command {
        cargo_bin_cmd!("clouddetect")
    }

    #[test]
    fn help_displays() {
        clouddetect()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("public cloud provider"));
    }

    #[test]
    fn version_displays() {
        clouddetect()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("clouddetect"));
    }

    #[test]
    fn requires_an_ip() {
        clouddetect()
            .assert()
            .failure()
            .stderr(predicate::str::contains("Usage"));
    }

    #[test]
    fn rejects_invalid_ip() {
        clouddetect()
            .arg("not-an-ip")
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn cache_file_flags_conflict() {
        clouddetect()
            .args(["--cache-file", "/tmp/ranges.json", "--no-cache-file", "127.0.0.1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot be used with"));
    }
}
