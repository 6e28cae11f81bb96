//! External command execution with timeouts

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Run a command with timeout, returning stdout on success and stderr on failure
pub async fn run_command(
    cmd: &mut Command,
    description: &str,
    timeout: Duration,
) -> Result<String, String> {
    info!("{}", description);
    let output = tokio::time::timeout(timeout, cmd.kill_on_drop(true).output())
        .await
        .map_err(|_| {
            warn!("{} timed out after {:?}", description, timeout);
            format!("timed out after {:?}", timeout)
        })?
        .map_err(|e| {
            warn!("{} spawn failed: {}", description, e);
            format!("failed to execute: {}", e)
        })?;

    if output.status.success() {
        info!("{} succeeded", description);
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("{} failed: {}", description, err);
        Err(err)
    }
}

/// Like [`run_command`], writing `input` to the child's stdin first
pub async fn run_command_with_stdin(
    cmd: &mut Command,
    input: &str,
    description: &str,
    timeout: Duration,
) -> Result<String, String> {
    info!("{}", description);
    let run = async {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to execute: {}", e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| format!("failed to write stdin: {}", e))?;
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait: {}", e))
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| format!("timed out after {:?}", timeout))??;

    if output.status.success() {
        info!("{} succeeded", description);
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("{} failed: {}", description, err);
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_stdout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo moved");
        let out = run_command(&mut cmd, "echo", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.trim(), "moved");
    }

    #[tokio::test]
    async fn returns_stderr_on_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'no kubeconfig' >&2; exit 1");
        let err = run_command(&mut cmd, "fail", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, "no kubeconfig");
    }

    #[tokio::test]
    async fn times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command(&mut cmd, "sleep", Duration::from_millis(50)).await.unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let mut cmd = Command::new("cat");
        let out = run_command_with_stdin(&mut cmd, "kind: Cluster\n", "cat", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "kind: Cluster\n");
    }
}
