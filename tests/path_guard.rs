//! PathGuard confinement properties
//!
//! Whatever a client sends, a resolved path is either inside the base
//! directory or rejected.

use dummypage::files::{PathGuard, PathRejection};
use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn site() -> (TempDir, PathGuard) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let base = dir.path().join("large");
    std::fs::create_dir_all(base.join("a/b")).unwrap();
    std::fs::write(base.join("a/b/file.bin"), b"data").unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
    let guard = PathGuard::new(&base).unwrap();
    (dir, guard)
}

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("..".to_string()),
        Just(".".to_string()),
        Just("a".to_string()),
        Just("b".to_string()),
        Just("file.bin".to_string()),
        Just("secret.txt".to_string()),
        "[a-z0-9._-]{1,8}",
    ]
}

fn user_path() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec(segment(), 1..8),
        prop_oneof![Just("/"), Just("\\")],
    )
        .prop_map(|(segments, sep)| segments.join(sep))
}

#[test]
fn test_classic_traversals_are_rejected() {
    let (_dir, guard) = site();

    for attempt in [
        "../secret.txt",
        "../../etc/passwd",
        "a/../../secret.txt",
        "a/b/../../../secret.txt",
        "..\\secret.txt",
        "a\\..\\..\\secret.txt",
    ] {
        assert!(
            matches!(guard.resolve(attempt), Err(PathRejection::Escape)),
            "{} was not rejected as an escape",
            attempt
        );
    }
}

#[test]
fn test_absolute_and_empty_paths_are_rejected() {
    let (_dir, guard) = site();

    assert!(matches!(guard.resolve("/etc/passwd"), Err(PathRejection::Absolute)));
    assert!(matches!(guard.resolve("\\windows"), Err(PathRejection::Absolute)));
    assert!(matches!(guard.resolve(""), Err(PathRejection::Empty)));
    assert!(matches!(guard.resolve("a\0b"), Err(PathRejection::InvalidCharacter)));
}

#[test]
fn test_nested_file_resolves_inside_base() {
    let (_dir, guard) = site();

    let resolved = guard.resolve("a/./b/../b/file.bin").unwrap();
    assert!(resolved.starts_with(guard.base()));
    assert_eq!(resolved.file_name().unwrap(), "file.bin");
}

fn assert_confined(guard: &PathGuard, resolved: &Path) -> Result<(), TestCaseError> {
    prop_assert!(
        resolved.starts_with(guard.base()),
        "{} escaped {}",
        resolved.display(),
        guard.base().display()
    );
    Ok(())
}

proptest! {
    #[test]
    fn prop_resolved_paths_stay_inside_base(path in user_path()) {
        let (_dir, guard) = site();

        match guard.resolve(&path) {
            Ok(resolved) => assert_confined(&guard, &resolved)?,
            Err(rejection) => prop_assert!(rejection.is_client_error()),
        }
    }

    #[test]
    fn prop_async_resolution_agrees_with_sync(path in user_path()) {
        let (_dir, guard) = site();

        let sync = guard.resolve(&path);
        let async_result = tokio_test::block_on(guard.resolve_async(&path));
        match (sync, async_result) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            (a, b) => prop_assert!(false, "sync {:?} vs async {:?}", a, b),
        }
    }

    #[test]
    fn prop_leading_parent_always_escapes(rest in user_path()) {
        let path = format!("../{}", rest);
        let normalized = PathGuard::normalize(&path);
        prop_assert!(matches!(normalized, Err(PathRejection::Escape)));
    }
}
