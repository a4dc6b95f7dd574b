use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("billing-engine"));
    cmd.arg("tests/fixtures/script.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with(
            "invoice,external_id,invoice_status,transaction,type,amount,submit_status,settlement,reference_to,failures\n",
        ))
        // settled debit and partial refund; the 700 refund was rejected
        .stdout(predicate::str::contains(",order-1,PARTIALLY_REFUNDED,TX"))
        .stdout(predicate::str::contains(",DEBIT,1000,DONE,SUCCEEDED,,0\n"))
        .stdout(predicate::str::contains(",REFUND,400,DONE,PENDING,TX"))
        .stdout(predicate::str::contains("REFUND,700").not())
        // declined card
        .stdout(predicate::str::contains(",order-2,FAILED,TX"))
        .stdout(predicate::str::contains(",DEBIT,500,FAILED,FAILED,,1\n"))
        // canceled before any transaction
        .stdout(predicate::str::contains(",order-3,CANCELED,,,300,,,,0\n"))
        .stderr(predicate::str::contains("Refund amount 700 exceeds refundable amount 600"))
        .stderr(predicate::str::contains("Error reading script row"));

    Ok(())
}

#[test]
fn test_cli_company_scopes_report() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("billing-engine"));
    cmd.arg("tests/fixtures/script.csv").arg("--company").arg("CP_OTHER");

    // the script creates its own customer, so the report is still populated
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(",order-1,PARTIALLY_REFUNDED,"));

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("billing-engine"));
    cmd.arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}
