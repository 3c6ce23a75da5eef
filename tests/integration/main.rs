//! Integration tests for pack-exec

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn pack_exec() -> Command {
        cargo_bin_cmd!("pack-exec")
    }

    /// Command reading its config from an isolated directory
    fn isolated(temp: &TempDir) -> Command {
        let mut cmd = pack_exec();
        cmd.env("PACK_EXEC_CONFIG", temp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        pack_exec()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("lifecycle"))
            .stdout(predicate::str::contains("build"));
    }

    #[test]
    fn version_displays() {
        pack_exec()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pack-exec"));
    }

    #[test]
    fn build_help_lists_flags() {
        pack_exec()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--trust-builder"))
            .stdout(predicate::str::contains("--cache-image"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[lifecycle]"))
            .stdout(predicate::str::contains("creator_min_platform_api"));
    }

    #[test]
    fn config_show_masks_passwords() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[registry.auth]\n\"registry.example.com\" = \"robot:hunter2\"\n",
        )
        .unwrap();

        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("robot:****"))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        isolated(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        isolated(&temp)
            .args(["config", "init"])
            .assert()
            .success()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn invalid_config_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[general\n").unwrap();

        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn build_requires_builder() {
        pack_exec()
            .env_remove("PACK_EXEC_BUILDER")
            .args(["build", "example.com/app:1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--builder"));
    }

    #[test]
    fn cache_image_requires_publish() {
        pack_exec()
            .args([
                "build",
                "example.com/app:1",
                "--builder",
                "example.com/builder:1",
                "--cache-image",
                "example.com/cache:build",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--publish"));
    }

    #[test]
    fn cache_clear_rejects_bad_cache_option() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["cache", "clear", "example.com/app:1", "--cache", "type=run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid cache type"));
    }

    #[test]
    fn cache_clear_rejects_bad_image() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["cache", "clear", "Example.com/App"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn invalid_subcommand_fails() {
        pack_exec().arg("deploy").assert().failure();
    }
}
