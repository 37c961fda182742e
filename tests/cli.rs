use assert_cmd::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const CRATE_OBJ: &str = "\
o crate
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl crate_mat
f 1/1 2/2 3/3 4/4
";

fn build_project() -> TempDir {
    let project = TempDir::new().expect("temp project");
    let meshes = project.path().join("assets/meshes");
    fs::create_dir_all(&meshes).expect("mesh directory");
    fs::write(meshes.join("crate.obj"), CRATE_OBJ).expect("write mesh");
    project
}

fn command(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("crystal-assets").expect("binary exists");
    cmd.arg(project);
    cmd
}

#[test]
fn cli_declares_compiles_and_prints_summary() {
    let project = build_project();
    let mut cmd = command(project.path());
    cmd.arg("--declare")
        .arg("assets/meshes/crate.obj")
        .arg("--compile-all");
    cmd.assert()
        .success()
        .stdout(contains("Compiled mesh crate"))
        .stdout(contains("Loaded 1 asset(s)"))
        .stdout(contains(" - crate: 1 sub-mesh(es), 4 vertices, 6 indices"));

    let managers = project.path().join("managers");
    assert!(managers.join("assets/crate.asset.json").is_file());
    assert!(managers.join("meshes/crate.mesh.json").is_file());
    let materials = fs::read_to_string(managers.join("Material.manager.json")).unwrap();
    assert!(materials.contains("crate_mat"));
}

#[test]
fn cli_reloads_a_compiled_project() {
    let project = build_project();
    command(project.path())
        .arg("--declare")
        .arg("assets/meshes/crate.obj")
        .arg("--compile-all")
        .assert()
        .success();

    command(project.path())
        .assert()
        .success()
        .stdout(contains("Loaded 1 asset(s)"))
        .stdout(contains(" - crate: 1 sub-mesh(es), 4 vertices, 6 indices"));
}

#[test]
fn cli_cooks_physics_meshes() {
    let project = build_project();
    command(project.path())
        .args(["--declare", "assets/meshes/crate.obj", "--compile-all", "--cook-physics"])
        .assert()
        .success()
        .stdout(contains("Cooked 0 physics mesh(es), 1 from bounds, 0 skipped"));
    let physics = project.path().join("media/physics_meshes");
    assert!(physics.join("crate.pm").is_file());
    assert!(physics.join("crate.pcm").is_file());
}

#[test]
fn cli_rejects_unknown_arguments() {
    let project = build_project();
    command(project.path())
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(contains("Unknown argument: --frobnicate"));
}

#[test]
fn cli_requires_a_project() {
    Command::cargo_bin("crystal-assets")
        .expect("binary exists")
        .assert()
        .failure()
        .stderr(contains("Usage: crystal-assets"));
}

#[test]
fn cli_reports_malformed_settings() {
    let project = build_project();
    fs::write(project.path().join("settings.json"), "{ not json").unwrap();
    command(project.path())
        .assert()
        .failure()
        .stderr(contains("malformed settings"));
}
