use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn sotto_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_sotto").expect("sotto test binary not built")
}

#[test]
fn sotto_help_mentions_name() {
    let output = Command::new(sotto_bin())
        .arg("--help")
        .output()
        .expect("run sotto --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("sotto"));
}

#[test]
fn sotto_list_input_devices_prints_message() {
    let output = Command::new(sotto_bin())
        .arg("--list-input-devices")
        .output()
        .expect("run sotto --list-input-devices");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(
        combined.contains("audio input devices")
            || combined.contains("Failed to list audio input devices")
    );
}

#[test]
fn sotto_rejects_invalid_configuration() {
    let output = Command::new(sotto_bin())
        .args(["--port", "0"])
        .output()
        .expect("run sotto --port 0");
    assert_eq!(output.status.code(), Some(2));
    let combined = combined_output(&output);
    assert!(combined.contains("invalid configuration"));
}
