//! Console-list helper client
//!
//! A process can be attached to only one console at a time, so the
//! processes on another console are listed by a short-lived helper: it is
//! run with the target pid, writes one framed response on stdout, and
//! exits.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::codec::FramedRead;
use tracing::debug;

use ptykit_protocol::{ConsoleListCodec, ConsoleListRequest, ConsoleListResponse, ProcessRecord};
use ptykit_utils::{PtykitError, Result};

/// Processes attached to the console of `pid`, in console order
///
/// The helper must write exactly one frame; anything after it is rejected.
/// Waits for the helper to exit. There is no built-in time bound; see
/// [`query_with_timeout`].
pub async fn query(helper: &Path, pid: u32) -> Result<Vec<ProcessRecord>> {
    let request = ConsoleListRequest::new(pid);
    let mut child = Command::new(helper)
        .arg(request.to_arg())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            PtykitError::console_list(format!("cannot run {}: {}", helper.display(), e))
        })?;

    let (stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => return Err(PtykitError::internal("helper pipes were not captured")),
    };

    let read_frame = async {
        let mut frames = FramedRead::new(stdout, ConsoleListCodec::new());
        let first = frames.next().await;
        let trailing = match first {
            Some(Ok(_)) => frames.next().await.is_some(),
            _ => false,
        };
        (first, trailing)
    };
    let read_stderr = async {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text).await;
        text
    };
    let ((frame, trailing), stderr_text) = tokio::join!(read_frame, read_stderr);

    let status = child
        .wait()
        .await
        .map_err(|e| PtykitError::console_list(format!("waiting for helper: {}", e)))?;
    debug!(pid, %status, "Console list helper exited");

    if !status.success() {
        let detail = stderr_text.trim();
        return Err(PtykitError::console_list(if detail.is_empty() {
            format!("helper exited with {}", status)
        } else {
            format!("helper exited with {}: {}", status, detail)
        }));
    }

    if trailing {
        return Err(PtykitError::console_list("helper wrote data after its response"));
    }

    match frame {
        None => Err(PtykitError::console_list("helper sent no response")),
        Some(Err(e)) => Err(PtykitError::console_list(format!(
            "malformed helper response: {}",
            e
        ))),
        Some(Ok(response)) if response.target_pid() != pid => {
            Err(PtykitError::console_list(format!(
                "helper answered for pid {} instead of {}",
                response.target_pid(),
                pid
            )))
        }
        Some(Ok(ConsoleListResponse::Processes { processes, .. })) => Ok(processes),
        Some(Ok(ConsoleListResponse::Failed { reason, .. })) => {
            Err(PtykitError::console_list(reason))
        }
    }
}

/// Image name of the newest process on a console
///
/// `skip_pid` excludes a process that hosts the console itself, such as
/// the WinPTY agent.
pub fn foreground_name(processes: &[ProcessRecord], skip_pid: Option<u32>) -> Option<String> {
    processes
        .iter()
        .rev()
        .find(|p| Some(p.pid) != skip_pid)
        .map(|p| p.image_name.clone())
}

/// [`query`], giving up and killing the helper after `timeout`
pub async fn query_with_timeout(
    helper: &Path,
    pid: u32,
    timeout: Duration,
) -> Result<Vec<ProcessRecord>> {
    tokio::time::timeout(timeout, query(helper, pid))
        .await
        .map_err(|_| {
            PtykitError::console_list(format!("helper did not answer within {:?}", timeout))
        })?
}

#[cfg(test)]
mod foreground_tests {
    use super::*;

    #[test]
    fn test_foreground_is_newest_process() {
        let processes = vec![
            ProcessRecord::new(100, "cmd.exe"),
            ProcessRecord::new(200, "vim.exe"),
        ];
        assert_eq!(foreground_name(&processes, None), Some("vim.exe".to_string()));
        assert_eq!(foreground_name(&[], None), None);
    }

    #[test]
    fn test_foreground_skips_console_host() {
        let processes = vec![
            ProcessRecord::new(100, "cmd.exe"),
            ProcessRecord::new(200, "vim.exe"),
            ProcessRecord::new(42, "winpty-agent.exe"),
        ];
        assert_eq!(foreground_name(&processes, Some(42)), Some("vim.exe".to_string()));
        assert_eq!(
            foreground_name(&[ProcessRecord::new(42, "winpty-agent.exe")], Some(42)),
            None
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;
    use tempfile::tempdir;

    fn script_helper(dir: &Path, frames: &[ConsoleListResponse]) -> std::path::PathBuf {
        let bytes: Vec<u8> = frames
            .iter()
            .flat_map(|frame| ptykit_protocol::encode_frame(frame).unwrap())
            .collect();
        raw_helper(dir, &bytes)
    }

    /// A helper that writes `bytes` to stdout and exits 0
    fn raw_helper(dir: &Path, bytes: &[u8]) -> std::path::PathBuf {
        let frame_path = dir.join("frame.bin");
        std::fs::write(&frame_path, bytes).unwrap();

        let script = dir.join("helper.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat '{}'\n", frame_path.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_missing_helper_unavailable() {
        let dir = tempdir().unwrap();
        let result = query(&dir.path().join("absent-helper"), 1).await;
        assert!(matches!(result, Err(PtykitError::ConsoleListUnavailable(_))));
    }

    #[tokio::test]
    async fn test_nonzero_exit_unavailable() {
        let result = query(Path::new("false"), 1).await;
        assert!(matches!(result, Err(PtykitError::ConsoleListUnavailable(_))));
    }

    #[tokio::test]
    async fn test_no_message_unavailable() {
        let result = query(Path::new("true"), 1).await;
        match result {
            Err(PtykitError::ConsoleListUnavailable(msg)) => assert!(msg.contains("no response")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_process_list() {
        let dir = tempdir().unwrap();
        let helper = script_helper(
            dir.path(),
            &[ConsoleListResponse::Processes {
                target_pid: 4242,
                processes: vec![
                    ProcessRecord::new(4242, "cmd.exe"),
                    ProcessRecord::new(5000, "node.exe"),
                ],
            }],
        );

        let processes = query(&helper, 4242).await.unwrap();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[1].image_name, "node.exe");
    }

    #[tokio::test]
    async fn test_failed_response_unavailable() {
        let dir = tempdir().unwrap();
        let helper = script_helper(
            dir.path(),
            &[ConsoleListResponse::Failed {
                target_pid: 7,
                reason: "AttachConsole failed".into(),
            }],
        );

        match query(&helper, 7).await {
            Err(PtykitError::ConsoleListUnavailable(msg)) => {
                assert!(msg.contains("AttachConsole"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_console_is_an_empty_list() {
        let dir = tempdir().unwrap();
        let helper = script_helper(
            dir.path(),
            &[ConsoleListResponse::Processes {
                target_pid: 12,
                processes: Vec::new(),
            }],
        );

        assert!(query(&helper, 12).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_for_other_pid_unavailable() {
        let dir = tempdir().unwrap();
        let helper = script_helper(
            dir.path(),
            &[ConsoleListResponse::Processes {
                target_pid: 99,
                processes: vec![ProcessRecord::new(99, "cmd.exe")],
            }],
        );

        match query(&helper, 12).await {
            Err(PtykitError::ConsoleListUnavailable(msg)) => {
                assert!(msg.contains("pid 99 instead of 12"), "{}", msg)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_frame_rejected() {
        let dir = tempdir().unwrap();
        let response = ConsoleListResponse::Processes {
            target_pid: 12,
            processes: vec![ProcessRecord::new(12, "cmd.exe")],
        };
        let helper = script_helper(dir.path(), &[response.clone(), response]);

        assert!(matches!(
            query(&helper, 12).await,
            Err(PtykitError::ConsoleListUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_trailing_bytes_rejected() {
        let dir = tempdir().unwrap();
        let mut bytes = ptykit_protocol::encode_frame(&ConsoleListResponse::Processes {
            target_pid: 12,
            processes: Vec::new(),
        })
        .unwrap();
        bytes.extend_from_slice(b"xx");
        let helper = raw_helper(dir.path(), &bytes);

        assert!(matches!(
            query(&helper, 12).await,
            Err(PtykitError::ConsoleListUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_helper() {
        // `sleep` takes the pid argument as a number of seconds
        let started = Instant::now();
        let result = query_with_timeout(Path::new("sleep"), 30, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(PtykitError::ConsoleListUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
