use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=Seeder", "-c", "user.email=seed@localhost"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn help_lists_subcommands() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(deprecated)]
    Command::cargo_bin("gitwiki")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("serve"));
    Ok(())
}

#[test]
fn missing_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    #[allow(deprecated)]
    Command::cargo_bin("gitwiki")?
        .current_dir(dir.path())
        .env_remove("GITWIKI_CONFIG")
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
    Ok(())
}

#[test]
fn build_publishes_local_repository() -> Result<(), Box<dyn std::error::Error>> {
    if !git_available() {
        return Ok(());
    }
    let dir = tempdir()?;
    let repo = dir.path().join("content");
    fs::create_dir_all(repo.join("guides"))?;
    git(&repo, &["init"]);
    fs::write(repo.join("Home.md"), "# Welcome\n\nStart here.\n")?;
    fs::write(repo.join("guides/setup.md"), "# Setup\n")?;
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "seed"]);

    fs::write(
        dir.path().join("gitwiki.yml"),
        r#"
site_name: Handbook
paths:
  repo: content
  output: public
git:
  pull_interval_secs: 0
"#,
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("gitwiki")?
        .current_dir(dir.path())
        .env_remove("GITWIKI_CONFIG")
        .env_remove("RUST_LOG")
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("Site built"));

    let public = dir.path().join("public");
    let home = fs::read_to_string(public.join("index.html"))?;
    assert!(home.contains("<title>Home - Handbook</title>"));
    assert!(public.join("guides/setup/index.html").exists());
    assert!(public.join("directory.html").exists());
    assert!(public.join("search-index.json").exists());
    assert!(public.join("assets/site.js").exists());
    Ok(())
}
