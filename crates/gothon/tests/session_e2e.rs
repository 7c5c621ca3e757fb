//! Full-session scenarios: real workers under `python3`, real sockets, real
//! staging. Ignored by default since they need a working interpreter on the
//! path; run with `cargo test -- --ignored`.

use std::fs;
use std::time::Duration;

use gothon::{Outcome, Session};

fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (rel, content) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }
    dir
}

/// Polls for a file the workers write into the project root (three levels up
/// from their staged working directory).
fn wait_for_result(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("result.txt");
    for _ in 0..300 {
        if let Ok(content) = fs::read_to_string(&path) {
            return content;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("workers never produced {}", path.display());
}

#[test]
#[ignore = "requires python3"]
fn test_counter_reaches_exact_total_across_three_workers() {
    let program = "\
_node_: int = 0
_node_count_: int = 1
_counter_: int = 0
_sync_done_: callable = lambda n=_node_count_: None

i = 0
while i < 100:
    _counter_ += 1
    i += 1

_sync_done_(1)
_sync_done_(0)

if _node_ == 0:
    f = open('../../../result.txt', 'w')
    f.write(str(_counter_))
    f.close()
";
    let dir = project(&[("job.py", program)]);
    let session = Session::start(dir.path(), 3, "job").expect("start");

    let result = wait_for_result(&dir);
    assert_eq!(result, "300");

    assert_eq!(session.wait(), Outcome::Completed);
    let gothon_dir = session.gothon_dir().to_path_buf();
    session.shutdown();
    assert!(!gothon_dir.exists(), "staging directory is removed");
}

#[test]
#[ignore = "requires python3"]
fn test_mutex_guarded_tally() {
    let program = "\
_node_: int = 0
_node_count_: int = 1
_tally_: int = 0
_lock_t_: callable = lambda: None
_unlock_t_: callable = lambda: None
_sync_done_: callable = lambda n=_node_count_: None

i = 0
while i < 200:
    _lock_t_()
    _tally_ += 1
    _unlock_t_()
    i += 1

_sync_done_(1)
_sync_done_(0)

if _node_ == 0:
    f = open('../../../result.txt', 'w')
    f.write(str(_tally_))
    f.close()
";
    let dir = project(&[("job.py", program)]);
    let session = Session::start(dir.path(), 3, "job").expect("start");

    assert_eq!(wait_for_result(&dir), "600");
    assert_eq!(session.wait(), Outcome::Completed);
    session.shutdown();
}

#[test]
#[ignore = "requires python3"]
fn test_string_accumulation_is_a_permutation_of_worker_tags() {
    let program = "\
_node_: int = 0
_node_count_: int = 1
_msg_: str = ''
_lock_m_: callable = lambda: None
_unlock_m_: callable = lambda: None
_sync_done_: callable = lambda n=_node_count_: None

_lock_m_()
_msg_ += str(_node_)
_unlock_m_()

_sync_done_(1)
_sync_done_(0)

if _node_ == 0:
    f = open('../../../result.txt', 'w')
    f.write(_msg_)
    f.close()
";
    let dir = project(&[("job.py", program)]);
    let session = Session::start(dir.path(), 3, "job").expect("start");

    let mut chars: Vec<char> = wait_for_result(&dir).chars().collect();
    chars.sort_unstable();
    assert_eq!(chars, vec!['0', '1', '2']);

    assert_eq!(session.wait(), Outcome::Completed);
    session.shutdown();
}
