// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Launches an external command, merges its stdout and stderr, and enforces
//! an elapsed-time cap. Mirrors the narrow `run::<E>` boundary `container::Container`
//! puts around a child process lifecycle: callers never see a raw
//! [`tokio::process::Child`].

use std::{path::Path, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    time::Instant,
};

/// Synthetic exit code used when a subprocess is killed for exceeding its
/// timeout. The orchestrator's sole signal to distinguish timeout from crash.
pub const TIMEOUT_EXIT_CODE: i32 = -2;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub elapsed_seconds: f64,
    pub output: String,
}

impl RunOutcome {
    pub fn timed_out(self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("spawn {binary}")]
    Spawn { binary: String, #[source] source: std::io::Error },
}

/// Reads one chunk from `slot`, marking it (and clearing it) done on EOF or
/// error. Returns the number of bytes read into `buf`.
async fn read_some<R: AsyncRead + Unpin>(slot: &mut Option<R>, done: &mut bool, buf: &mut [u8]) -> usize {
    let Some(reader) = slot.as_mut() else {
        *done = true;
        return 0;
    };

    match reader.read(buf).await {
        Ok(0) | Err(_) => {
            *done = true;
            *slot = None;
            0
        }
        Ok(n) => n,
    }
}

/// Runs `binary args...` in `workdir`, merging stderr into stdout, polling
/// with exponential backoff (50ms..1000ms) so the caller's executor stays
/// responsive to other concurrent work. Never returns `Err` for a failed or
/// timed-out child: that's communicated through `RunOutcome::exit_code`.
pub async fn run(binary: &str, args: &[String], workdir: &Path, timeout: Duration) -> Result<RunOutcome, Error> {
    let start = Instant::now();

    let mut child = Command::new(binary)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            binary: binary.to_owned(),
            source,
        })?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut output = Vec::new();
    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();

    // Drain both pipes concurrently with the wait/backoff loop below so a
    // chatty child can never fill its pipe buffer and deadlock against a
    // reader that only looks at it after exit.
    let mut backoff = INITIAL_BACKOFF;
    let exit_code = loop {
        if !stdout_done || !stderr_done {
            let mut out_buf = [0_u8; 4096];
            let mut err_buf = [0_u8; 4096];
            tokio::select! {
                biased;
                n = read_some(&mut stdout, &mut stdout_done, &mut out_buf), if !stdout_done => {
                    output.extend_from_slice(&out_buf[..n]);
                }
                n = read_some(&mut stderr, &mut stderr_done, &mut err_buf), if !stderr_done => {
                    output.extend_from_slice(&err_buf[..n]);
                }
                () = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }

        if let Some(status) = child.try_wait().map_err(|source| Error::Spawn {
            binary: binary.to_owned(),
            source,
        })? {
            break status.code().unwrap_or(-1);
        }

        if start.elapsed() >= timeout {
            let _ = child.start_kill();
            let _ = child.wait().await;
            break TIMEOUT_EXIT_CODE;
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    };

    // Drain whatever remains after termination.
    while !stdout_done || !stderr_done {
        let mut out_buf = [0_u8; 4096];
        let mut err_buf = [0_u8; 4096];
        tokio::select! {
            n = read_some(&mut stdout, &mut stdout_done, &mut out_buf), if !stdout_done => {
                output.extend_from_slice(&out_buf[..n]);
            }
            n = read_some(&mut stderr, &mut stderr_done, &mut err_buf), if !stderr_done => {
                output.extend_from_slice(&err_buf[..n]);
            }
        }
    }

    let elapsed_seconds = start.elapsed().as_secs_f64();

    Ok(RunOutcome {
        exit_code,
        elapsed_seconds,
        output: String::from_utf8_lossy(&output).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_exit_zero() {
        let outcome = run("true", &[], Path::new("."), Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn failing_command_reports_nonzero_exit() {
        let outcome = run("false", &[], Path::new("."), Duration::from_secs(5)).await.unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(!outcome.timed_out());
    }

    #[tokio::test]
    async fn merges_stdout_and_stderr() {
        let outcome = run(
            "sh",
            &["-c".to_owned(), "echo out; echo err 1>&2".to_owned()],
            Path::new("."),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }

    #[tokio::test]
    async fn exceeding_timeout_kills_child_and_sets_sentinel() {
        let outcome = run(
            "sh",
            &["-c".to_owned(), "sleep 5".to_owned()],
            Path::new("."),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.timed_out());
    }
}
