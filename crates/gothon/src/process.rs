//! Worker process group: spawns N interpreter processes over the staged
//! trees, fans their stdout/stderr into line channels tagged with the worker
//! index, and delivers interrupts.
//!
//! Each worker runs `python3 -u -m <module-args>` with its staged copy as
//! the working directory (`-u` keeps the pipes unbuffered so output
//! multiplexing stays line-by-line live). One reader thread per pipe feeds
//! the line channels; one waiter thread per child reaps it, and a collector
//! announces completion once every worker has exited.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{Error, Result};

/// Interpreter invoked for each worker.
const WORKER_INTERPRETER: &str = "python3";

/// One line of worker output, tagged with the worker index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub node: usize,
    pub line: String,
}

pub struct ProcessGroup {
    pids: Vec<Pid>,
    stdout: Option<Receiver<OutputLine>>,
    stderr: Option<Receiver<OutputLine>>,
    done: Option<Receiver<()>>,
}

impl ProcessGroup {
    /// Launches `node_count` workers rooted under `src_root/<i>`.
    pub fn spawn(src_root: &Path, node_count: usize, node_args: &str) -> Result<ProcessGroup> {
        let (stdout_tx, stdout_rx) = channel::<OutputLine>();
        let (stderr_tx, stderr_rx) = channel::<OutputLine>();
        let (exit_tx, exit_rx) = channel::<()>();
        let (done_tx, done_rx) = channel::<()>();

        let mut pids = Vec::with_capacity(node_count);

        for node in 0..node_count {
            let mut child = Command::new(WORKER_INTERPRETER)
                .arg("-u")
                .arg("-m")
                .args(node_args.split_whitespace())
                .current_dir(src_root.join(node.to_string()))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|source| Error::WorkerSpawn { node, source })?;

            pids.push(Pid::from_raw(child.id() as i32));

            if let Some(stdout) = child.stdout.take() {
                spawn_pipe_reader(node, stdout, stdout_tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                spawn_pipe_reader(node, stderr, stderr_tx.clone());
            }

            let exit_tx = exit_tx.clone();
            thread::Builder::new()
                .name(format!("worker-wait-{node}"))
                .spawn(move || {
                    match child.wait() {
                        Ok(status) if !status.success() => {
                            log::debug!("worker {node} exited with {status}");
                        }
                        Ok(_) => {}
                        Err(e) => log::error!("worker {node} wait failed: {e}"),
                    }
                    let _ = exit_tx.send(());
                })
                .map_err(Error::Io)?;
        }

        // Collector: one completion event once every worker has been reaped.
        thread::Builder::new()
            .name("worker-collector".to_string())
            .spawn(move || {
                for _ in 0..node_count {
                    if exit_rx.recv().is_err() {
                        return;
                    }
                }
                let _ = done_tx.send(());
            })
            .map_err(Error::Io)?;

        Ok(ProcessGroup {
            pids,
            stdout: Some(stdout_rx),
            stderr: Some(stderr_rx),
            done: Some(done_rx),
        })
    }

    /// Hands the stdout line channel to its consumer (first call only).
    pub fn take_stdout(&mut self) -> Option<Receiver<OutputLine>> {
        self.stdout.take()
    }

    /// Hands the stderr line channel to its consumer (first call only).
    pub fn take_stderr(&mut self) -> Option<Receiver<OutputLine>> {
        self.stderr.take()
    }

    /// Hands over the completion channel; it fires once when every worker
    /// has exited (first call only).
    pub fn take_done(&mut self) -> Option<Receiver<()>> {
        self.done.take()
    }

    /// Delivers SIGINT to every worker that is still alive.
    pub fn stop(&self) {
        for pid in &self.pids {
            // ESRCH just means the worker already exited.
            if let Err(e) = kill(*pid, Signal::SIGINT) {
                if e != nix::errno::Errno::ESRCH {
                    log::error!("failed to interrupt worker {pid}: {e}");
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.pids.len()
    }
}

fn spawn_pipe_reader(
    node: usize,
    pipe: impl std::io::Read + Send + 'static,
    tx: Sender<OutputLine>,
) {
    thread::Builder::new()
        .name(format!("worker-pipe-{node}"))
        .spawn(move || {
            let reader = BufReader::new(pipe);
            for line in reader.lines() {
                let Ok(line) = line else {
                    return;
                };
                if tx.send(OutputLine { node, line }).is_err() {
                    return;
                }
            }
        })
        .expect("failed to spawn pipe reader thread");
}
