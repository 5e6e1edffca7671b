//! Child process execution shared by the preparer and the command job.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command line")]
    Empty,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },
}

/// Run `argv` in `cwd` to completion, inheriting stdout/stderr. Killed on timeout.
pub async fn run_to_completion(
    argv: &[String],
    cwd: &Path,
    envs: &[(&str, &str)],
    limit: Duration,
) -> Result<(), CommandError> {
    let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(result) => result.map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(CommandError::Timeout {
                program: program.clone(),
                timeout_secs: limit.as_secs(),
            });
        }
    };

    if !status.success() {
        return Err(CommandError::Failed {
            program: program.clone(),
            status: status.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = run_to_completion(&[], Path::new("."), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Empty));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = run_to_completion(
            &argv(&["feedpipe-definitely-not-a-binary"]),
            Path::new("."),
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_and_env() {
        run_to_completion(&argv(&["true"]), Path::new("."), &[], Duration::from_secs(5))
            .await
            .unwrap();

        let err = run_to_completion(&argv(&["false"]), Path::new("."), &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed { .. }));

        run_to_completion(
            &argv(&["sh", "-c", "test \"$FEEDPIPE_ENV_CHECK\" = yes"]),
            Path::new("."),
            &[("FEEDPIPE_ENV_CHECK", "yes")],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_to_completion(
            &argv(&["sleep", "5"]),
            Path::new("."),
            &[],
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }
}
