use std::process::Command;

fn job(command: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_matrix-tools"));
    cmd.arg(command)
        .env_remove("NAMESPACE")
        .env_remove("TOOL_IDENTITY")
        .env_remove("LABELS")
        .env_remove("GENERATED_SECRETS")
        .env_remove("EXPIRED_KEYS_KEY")
        .env_remove("DEPLOYMENT_MARKERS")
        .env_remove("MARKER_STEP");
    cmd
}

#[test]
fn fails_without_namespace() {
    let output = job("generate-secrets")
        .env("GENERATED_SECRETS", "synapse:SIGNING_KEY:signingkey")
        .output()
        .expect("failed to run matrix-tools binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn rejects_unknown_secret_kind_before_contacting_the_cluster() {
    let output = job("generate-secrets")
        .env("NAMESPACE", "ess")
        .env("GENERATED_SECRETS", "synapse:SIGNING_KEY:uuid")
        .env("KUBECONFIG", "/nonexistent/kubeconfig")
        .output()
        .expect("failed to run matrix-tools binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn rejects_unknown_marker_step() {
    let output = job("deployment-markers")
        .env("NAMESPACE", "ess")
        .env("MARKER_STEP", "during")
        .env("DEPLOYMENT_MARKERS", "markers:MAS:delegated:legacy")
        .output()
        .expect("failed to run matrix-tools binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn rejects_unknown_command() {
    let output = job("render-config")
        .env("NAMESPACE", "ess")
        .output()
        .expect("failed to run matrix-tools binary");
    assert_eq!(output.status.code(), Some(2));
}
