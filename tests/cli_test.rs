use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::prelude::*;
use secrecy::SecretString;
use shift_escrow::interfaces::webhook::WebhookVerifier;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_replay_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("replay")
        .arg("tests/fixtures/commands.csv")
        .arg("--admin")
        .arg("99");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with(
            "shift,payee,amount,state,payout_ref",
        ))
        // Hold elapsed before the tick
        .stdout(predicate::str::contains("10,2,540.00,released,paypal-PO-"))
        // Disputed, then refunded by the operator
        .stdout(predicate::str::contains("11,2,100.00,refunded,\n"))
        // Still on hold; the facility cannot force it
        .stdout(predicate::str::contains("12,2,75.50,escrowed,\n"))
        .stderr(predicate::str::contains("Error processing command"));

    Ok(())
}

#[test]
fn test_cli_reports_malformed_rows_and_continues() -> Result<(), Box<dyn std::error::Error>> {
    let mut csv = tempfile::NamedTempFile::new()?;
    writeln!(csv, "op, actor, shift, payee, amount, provider, account, at")?;
    writeln!(csv, "add_method, 2, , , , cashapp, $nurse,")?;
    writeln!(csv, "teleport, 1, 1, 2, 1.00, , ,")?;
    writeln!(csv, "create, 1, 5, 2, -3.00, , ,")?;
    writeln!(csv, "create, 1, 6, 2, 20.00, , ,")?;

    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("replay").arg(csv.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("6,2,20.00,escrowed,"))
        .stdout(predicate::str::contains("5,2,").not())
        .stderr(predicate::str::contains("Error reading command"))
        .stderr(predicate::str::contains("Error processing command"));

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("replay").arg("tests/fixtures/does_not_exist.csv");
    cmd.assert().failure();
}

fn webhook_config() -> Result<tempfile::NamedTempFile, Box<dyn std::error::Error>> {
    let mut config = tempfile::NamedTempFile::new()?;
    write!(config, r#"{{ "webhook_secret": "whsec_cli" }}"#)?;
    Ok(config)
}

fn signed(body: &str, secret: &str) -> String {
    WebhookVerifier::new(SecretString::from(secret.to_string()))
        .sign(body.as_bytes(), Utc::now().timestamp())
        .unwrap()
}

#[test]
fn test_cli_webhook_accepts_signed_delivery() -> Result<(), Box<dyn std::error::Error>> {
    let config = webhook_config()?;
    let body = r#"{"id":"evt_cli","event_type":"payout.created"}"#;
    let mut body_file = tempfile::NamedTempFile::new()?;
    write!(body_file, "{}", body)?;

    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("webhook")
        .arg(body_file.path())
        .arg("--signature")
        .arg(signed(body, "whsec_cli"))
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ignored"));

    Ok(())
}

#[test]
fn test_cli_webhook_rejects_bad_signature() -> Result<(), Box<dyn std::error::Error>> {
    let config = webhook_config()?;
    let body = r#"{"id":"evt_cli","event_type":"payout.created"}"#;
    let mut body_file = tempfile::NamedTempFile::new()?;
    write!(body_file, "{}", body)?;

    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("webhook")
        .arg(body_file.path())
        .arg("--signature")
        .arg(signed(body, "whsec_guess"))
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .stdout(predicate::str::is_empty());

    Ok(())
}

#[test]
fn test_cli_webhook_requires_secret() -> Result<(), Box<dyn std::error::Error>> {
    let body = r#"{"id":"evt_cli","event_type":"payout.created"}"#;
    let mut body_file = tempfile::NamedTempFile::new()?;
    write!(body_file, "{}", body)?;

    let mut cmd = Command::new(cargo_bin!("shift-escrow"));
    cmd.arg("webhook")
        .arg(body_file.path())
        .arg("--signature")
        .arg(signed(body, "whsec_cli"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("webhook_secret"));

    Ok(())
}
