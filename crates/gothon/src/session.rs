//! Session orchestrator: one run of N workers over one project.
//!
//! [`Session::start`] performs the whole startup pipeline (staging,
//! analysis, rewriting, endpoint binding, register startup, worker launch)
//! and fails before any worker exists if any step does. [`Session::wait`]
//! blocks until all workers exit or an interrupt event arrives on the
//! session's event channel (the CLI wires its signal handler to
//! [`Session::event_sender`]). [`Session::shutdown`] interrupts surviving
//! workers, closes every endpoint (which retires the register reader
//! threads), and removes the staging directory unless
//! `GOTHON_KEEP_TEMP_DIR=true`.
//!
//! On-disk layout per session, rooted at the project directory:
//!
//! ```text
//! <project>/.gothon/
//!     sock/<i>/...      one datagram socket file per (worker, variable, op)
//!     src/<i>/...       rewritten copy of the project for worker i
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use crate::analyzer;
use crate::config;
use crate::error::{Error, Result};
use crate::fabric;
use crate::process::{OutputLine, ProcessGroup};
use crate::registry::Registry;
use crate::rewriter;
use crate::socket::SocketArray;

/// Events a running session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Every worker process has exited.
    WorkersDone,
    /// An external interrupt (SIGINT) was delivered.
    Interrupt,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Interrupted,
}

pub struct Session {
    gothon_dir: PathBuf,
    sockets: SocketArray,
    group: ProcessGroup,
    events: Receiver<SessionEvent>,
    event_tx: Sender<SessionEvent>,
}

impl Session {
    /// Stages, rewrites, binds, and launches a session of `node_count`
    /// workers running `python3 -u -m <node_args>`.
    pub fn start(project_dir: impl AsRef<Path>, node_count: usize, node_args: &str) -> Result<Session> {
        if node_count == 0 {
            return Err(Error::Config("node count must be at least 1".to_string()));
        }
        if node_args.trim().is_empty() {
            return Err(Error::Config("missing module argument".to_string()));
        }

        // Global knobs first: the shim embeds the string buffer size.
        config::configure_from_env()?;

        let project_dir = fs::canonicalize(project_dir)?;
        let gothon_dir = stage(&project_dir, node_count)?;

        let mut pkg = analyzer::parse(&project_dir)?;
        if pkg.modules.is_empty() {
            return Err(Error::EmptyProject(project_dir));
        }

        let shim = rewriter::rewrite(&mut pkg)?;
        rewriter::inject(&pkg, &shim, node_count)?;

        let paths = fabric::endpoint_paths(&pkg)?;
        let sockets = SocketArray::new(&gothon_dir.join("sock"), &paths, node_count);
        sockets.listen()?;

        let mut registry = Registry::build(&pkg, node_count)?;
        fabric::attach_endpoints(&mut registry, &sockets)?;
        registry.start();
        log::info!(
            "session ready: {} workers, {} registers, {} endpoints",
            node_count,
            registry.len(),
            sockets.len()
        );

        let (event_tx, events) = channel();
        let mut group = ProcessGroup::spawn(&gothon_dir.join("src"), node_count, node_args)?;

        if let Some(stdout) = group.take_stdout() {
            spawn_printer("worker-stdout", stdout, |line| {
                println!("\r[{}] {}", line.node, line.line);
            });
        }
        if let Some(stderr) = group.take_stderr() {
            spawn_printer("worker-stderr", stderr, |line| {
                eprintln!("\r\x1b[1;31m[{}] {}\x1b[0m", line.node, line.line);
            });
        }

        // Forward worker completion onto the event channel.
        if let Some(done) = group.take_done() {
            let done_tx = event_tx.clone();
            thread::Builder::new()
                .name("session-done".to_string())
                .spawn(move || {
                    if done.recv().is_ok() {
                        let _ = done_tx.send(SessionEvent::WorkersDone);
                    }
                })
                .map_err(Error::Io)?;
        }

        Ok(Session {
            gothon_dir,
            sockets,
            group,
            events,
            event_tx,
        })
    }

    /// A sender external triggers (the CLI's SIGINT handler) can use to
    /// interrupt [`wait`](Self::wait).
    pub fn event_sender(&self) -> Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Blocks until the first terminal event.
    pub fn wait(&self) -> Outcome {
        match self.events.recv() {
            Ok(SessionEvent::Interrupt) => Outcome::Interrupted,
            Ok(SessionEvent::WorkersDone) | Err(_) => Outcome::Completed,
        }
    }

    /// Interrupts live workers, closes endpoints, removes staging.
    pub fn shutdown(self) {
        self.group.stop();
        self.sockets.close();
        if !config::keep_temp_dir() {
            let _ = fs::remove_dir_all(&self.gothon_dir);
        }
    }

    pub fn gothon_dir(&self) -> &Path {
        &self.gothon_dir
    }

    pub fn node_count(&self) -> usize {
        self.group.node_count()
    }
}

fn spawn_printer(
    name: &str,
    lines: Receiver<OutputLine>,
    print: impl Fn(&OutputLine) + Send + 'static,
) {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while let Ok(line) = lines.recv() {
                print(&line);
            }
        })
        .expect("failed to spawn output printer thread");
}

// ── Staging ──────────────────────────────────────────────────────────────────

/// Recreates `<project>/.gothon/{sock,src}/<i>` and copies the project tree
/// into each `src/<i>`. Hidden top-level entries (including a previous
/// `.gothon`) are not copied.
fn stage(project_dir: &Path, node_count: usize) -> Result<PathBuf> {
    let gothon_dir = project_dir.join(".gothon");
    let _ = fs::remove_dir_all(&gothon_dir);
    fs::create_dir_all(&gothon_dir)?;

    for node in 0..node_count {
        fs::create_dir_all(gothon_dir.join("sock").join(node.to_string()))?;
        let src_dir = gothon_dir.join("src").join(node.to_string());
        fs::create_dir_all(&src_dir)?;

        for entry in fs::read_dir(project_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            copy_tree(&entry.path(), &src_dir.join(&name))?;
        }
    }

    Ok(gothon_dir)
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_creates_layout_and_copies() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("main.py"), "print('x')\n").expect("write");
        fs::create_dir(dir.path().join("pkg")).expect("mkdir");
        fs::write(dir.path().join("pkg/util.py"), "y = 1\n").expect("write");
        fs::write(dir.path().join(".hidden"), "secret\n").expect("write");

        let gothon_dir = stage(dir.path(), 2).expect("stage");
        assert_eq!(gothon_dir, dir.path().join(".gothon"));

        for node in 0..2 {
            let src = gothon_dir.join("src").join(node.to_string());
            assert!(src.join("main.py").is_file());
            assert!(src.join("pkg/util.py").is_file());
            assert!(!src.join(".hidden").exists());
            assert!(gothon_dir.join("sock").join(node.to_string()).is_dir());
        }
    }

    #[test]
    fn test_stage_replaces_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("main.py"), "pass\n").expect("write");

        let gothon_dir = stage(dir.path(), 1).expect("first stage");
        fs::write(gothon_dir.join("stale"), "old\n").expect("write stale");

        let gothon_dir = stage(dir.path(), 1).expect("second stage");
        assert!(!gothon_dir.join("stale").exists());
        // The old staging tree is not re-copied into the new one.
        assert!(!gothon_dir.join("src/0/.gothon").exists());
    }

    #[test]
    fn test_start_rejects_zero_workers_and_empty_args() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            Session::start(dir.path(), 0, "main"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Session::start(dir.path(), 2, "  "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_start_rejects_project_without_modules() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("README.md"), "not python\n").expect("write");
        assert!(matches!(
            Session::start(dir.path(), 1, "main"),
            Err(Error::EmptyProject(_))
        ));
    }
}
