use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;
use tool_sandbox::{PathGuard, PathGuardError};

#[test]
fn descendants_resolve_even_when_missing() {
    let workspace = tempdir().expect("temp workspace");
    let guard = PathGuard::new(workspace.path()).expect("guard");

    let resolved = guard.resolve("a/b/../c.txt").expect("inside");
    assert_eq!(resolved, guard.root().join("a/c.txt"));
    assert_eq!(guard.relative(&resolved), "a/c.txt");
}

#[test]
fn absolute_paths_inside_the_root_are_accepted() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("x.txt"), "").expect("seed");
    let guard = PathGuard::new(workspace.path()).expect("guard");

    let absolute = guard.root().join("x.txt");
    let resolved = guard
        .resolve(absolute.to_str().expect("utf-8 path"))
        .expect("inside");
    assert_eq!(resolved, absolute);
}

#[test]
fn every_escape_is_rejected() {
    let workspace = tempdir().expect("temp workspace");
    let inner = workspace.path().join("inner");
    fs::create_dir_all(&inner).expect("inner");
    let guard = PathGuard::new(&inner).expect("guard");

    let sibling = workspace.path().join("inner-sibling");
    let candidates = [
        "..".to_string(),
        "../inner-sibling/x".to_string(),
        "a/../../x".to_string(),
        "/etc/passwd".to_string(),
        sibling.display().to_string(),
        "../../../../../../../../..".to_string(),
    ];

    for candidate in &candidates {
        assert_matches!(
            guard.resolve(candidate),
            Err(PathGuardError::Escape(_)),
            "{candidate} should be rejected"
        );
    }
}

#[test]
fn empty_path_is_rejected() {
    let workspace = tempdir().expect("temp workspace");
    let guard = PathGuard::new(workspace.path()).expect("guard");

    assert_matches!(guard.resolve("   "), Err(PathGuardError::EmptyPath));
}

#[test]
fn file_root_is_rejected() {
    let workspace = tempdir().expect("temp workspace");
    let file = workspace.path().join("f");
    fs::write(&file, "").expect("seed");

    assert_matches!(PathGuard::new(&file), Err(PathGuardError::RootNotDirectory(_)));
}
