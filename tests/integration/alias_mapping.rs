//! Alias allocation and unmap-exactly-once tests.

use std::fs;

use sbk::error::SbError;
use sbk::mapper::AliasMapper;

/// Resource law: `unmap` runs exactly once for every successful `map`,
/// whether or not the work in between succeeds.
#[test]
fn unmap_runs_once_per_map_on_success_and_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::create_dir(&device).unwrap();
    let alias_dir = tmp.path().join("aliases");
    let mapper = AliasMapper::new(&alias_dir);

    // Success path: explicit unmap consumes the guard.
    let alias = mapper.allocate_alias().unwrap();
    let mapped = mapper.map(alias, &device).unwrap();
    mapped.unmap().unwrap();
    assert_eq!(fs::read_dir(&alias_dir).unwrap().count(), 0);

    // Failure path: the guard is dropped mid-"copy" and still cleans up.
    let alias = mapper.allocate_alias().unwrap();
    let result: Result<(), &str> = {
        let _mapped = mapper.map(alias, &device).unwrap();
        Err("simulated copy failure")
    };
    assert!(result.is_err());
    assert_eq!(
        fs::read_dir(&alias_dir).unwrap().count(),
        0,
        "alias link survived the failure path"
    );
}

/// When every alias in the enumerable space is in use, allocation fails
/// with `NoAliasAvailable` and no mapping call is attempted.
#[test]
fn exhausted_alias_space_fails_before_mapping() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::create_dir(&device).unwrap();
    let alias_dir = tmp.path().join("aliases");
    let mapper = AliasMapper::new(&alias_dir);

    let mut guards = Vec::new();
    loop {
        match mapper.allocate_alias() {
            Ok(alias) => guards.push(mapper.map(alias, &device).unwrap()),
            Err(SbError::NoAliasAvailable) => break,
            Err(other) => panic!("unexpected: {other}"),
        }
    }
    // The classic 24-letter space: C through Z.
    assert_eq!(guards.len(), 24);

    let links_before = fs::read_dir(&alias_dir).unwrap().count();
    assert!(matches!(
        mapper.allocate_alias(),
        Err(SbError::NoAliasAvailable)
    ));
    assert_eq!(
        fs::read_dir(&alias_dir).unwrap().count(),
        links_before,
        "exhaustion must not create a mapping"
    );

    for guard in guards {
        guard.unmap().unwrap();
    }
}

/// Aliases are reusable after unmapping.
#[test]
fn released_alias_is_allocatable_again() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::create_dir(&device).unwrap();
    let mapper = AliasMapper::new(tmp.path().join("aliases"));

    let first = mapper.allocate_alias().unwrap();
    let mapped = mapper.map(first, &device).unwrap();
    mapped.unmap().unwrap();

    assert_eq!(mapper.allocate_alias().unwrap(), first);
}

/// The mapped link resolves to the shadow device contents.
#[test]
fn mapped_path_exposes_device_contents() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::create_dir(&device).unwrap();
    fs::write(device.join("inside.txt"), b"frozen").unwrap();
    let mapper = AliasMapper::new(tmp.path().join("aliases"));

    let alias = mapper.allocate_alias().unwrap();
    let mapped = mapper.map(alias, &device).unwrap();
    let through_link = fs::read(mapped.path().join("inside.txt")).unwrap();
    assert_eq!(through_link, b"frozen");
    mapped.unmap().unwrap();
}
