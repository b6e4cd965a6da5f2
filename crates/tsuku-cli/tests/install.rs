mod common;

use common::{offline_recipe, TestHome};

#[cfg(unix)]
#[test]
fn install_list_remove_round_trip() {
    let home = TestHome::new();
    let recipe = home.write_recipe("demo.toml", &offline_recipe("demo", "2.0.0"));

    let output = home
        .tsuku()
        .args(["install", recipe.to_str().unwrap()])
        .output()
        .expect("run install");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("installed demo 2.0.0"));

    // The promoted tree and the current symlink exist.
    let promoted = home.path().join("tools/demo-2.0.0/bin/demo");
    assert!(promoted.is_file());
    assert_eq!(
        std::fs::read_link(home.path().join("current/demo")).expect("readlink"),
        promoted
    );

    let list = home.tsuku().arg("list").output().expect("run list");
    let stdout = String::from_utf8_lossy(&list.stdout);
    assert!(stdout.contains("demo 2.0.0 (active)"));

    home.tsuku()
        .args(["remove", "demo"])
        .assert()
        .success();
    let list = home.tsuku().arg("list").output().expect("run list");
    assert!(String::from_utf8_lossy(&list.stdout).contains("no tools installed"));
    assert!(!home.path().join("tools/demo-2.0.0").exists());
}

#[cfg(unix)]
#[test]
fn failed_verification_leaves_no_state_behind() {
    let home = TestHome::new();
    // The staged binary prints the wrong name, so the verify pattern never
    // matches.
    let recipe_text = offline_recipe("mismatch", "1.0.0").replace(
        "pattern = \"mismatch\"",
        "pattern = \"something-else-entirely\"",
    );
    let recipe = home.write_recipe("mismatch.toml", &recipe_text);

    let output = home
        .tsuku()
        .args(["install", recipe.to_str().unwrap()])
        .output()
        .expect("run install");
    assert!(!output.status.success());

    let list = home.tsuku().arg("list").output().expect("run list");
    assert!(String::from_utf8_lossy(&list.stdout).contains("no tools installed"));
    assert!(!home.path().join("tools/mismatch-1.0.0").exists());
}

#[test]
fn removing_an_unknown_tool_fails_cleanly() {
    let home = TestHome::new();
    let output = home
        .tsuku()
        .args(["remove", "ghost"])
        .output()
        .expect("run remove");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
    assert!(stderr.contains("not installed"));
}

#[cfg(unix)]
#[test]
fn installed_recipes_resolve_by_registry_name() {
    let home = TestHome::new();
    // Place the recipe inside the registry dir and install it by name.
    let recipes_dir = home.path().join("recipes");
    std::fs::create_dir_all(&recipes_dir).expect("mkdir");
    std::fs::write(
        recipes_dir.join("named.toml"),
        offline_recipe("named", "0.9.0"),
    )
    .expect("write recipe");

    home.tsuku().args(["install", "named"]).assert().success();
    assert!(home.path().join("tools/named-0.9.0/bin/named").is_file());
}
