//! Integration tests for `devgate resolve`.

use std::process::Command;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "devgate-cli", "--bin", "devgate", "--"]);
    cmd
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("vite.config.ts"),
        r"import { resolve } from 'path'
export default { resolve: { alias: { '@': resolve(__dirname, 'src') } } }
",
    )
    .unwrap();
    dir
}

#[test]
fn test_resolve_alias() {
    let dir = project();
    let root = dunce::canonicalize(dir.path()).unwrap();

    let output = cargo_bin()
        .arg("--cwd")
        .arg(dir.path())
        .args(["resolve", "@/foo.ts"])
        .output()
        .expect("Failed to run resolve command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        root.join("src").join("foo.ts").display().to_string()
    );
}

#[test]
fn test_resolve_json() {
    let dir = project();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.ts"), "").unwrap();

    let output = cargo_bin()
        .arg("--json")
        .arg("--cwd")
        .arg(dir.path())
        .args(["resolve", "@/main.ts"])
        .output()
        .expect("Failed to run resolve command");

    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON");
    assert_eq!(json["specifier"], "@/main.ts");
    assert_eq!(json["exists"], true);
}

#[test]
fn test_resolve_unmatched_specifier_fails() {
    let dir = project();

    let output = cargo_bin()
        .arg("--cwd")
        .arg(dir.path())
        .args(["resolve", "vue"])
        .output()
        .expect("Failed to run resolve command");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No alias matches 'vue'"), "stderr: {stderr}");
}
