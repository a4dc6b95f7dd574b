mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn script() -> tempfile::NamedTempFile {
    let csv = tempfile::NamedTempFile::new().unwrap();
    common::write_script(
        csv.path(),
        &[
            &["op", "customer", "invoice", "amount", "funding_instrument"],
            &["customer", "alice"],
            &["invoice", "alice", "inv1", "100", "/v1/cards/CC1"],
        ],
    )
    .unwrap();
    csv
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let csv = script();

    let mut cmd = Command::new(cargo_bin!("billing-engine"));
    cmd.arg(csv.path()).arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(",DEBIT,100,DONE,PENDING,,0"))
        .stderr(predicate::str::contains("falling back to in-memory storage"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let csv = script();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("billing-engine"));
    cmd.arg(csv.path()).arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("falling back").not());
}
