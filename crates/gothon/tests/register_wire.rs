//! Wire-level register tests over real unix datagram sockets.
//!
//! Each test builds a register, binds its endpoints under a tempdir the way
//! the fabric does, starts the reader threads, and then drives the protocol
//! from worker-side client sockets.

use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gothon::register::{
    BoolRegister, FloatRegister, IntRegister, MutexRegister, QueueRegister, Register, SlotDir,
    SlotOp, StrRegister, WaitGroupRegister, NAK, SYNC,
};
use gothon::socket::DatagramSocket;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const BLOCKED_TIMEOUT: Duration = Duration::from_millis(250);

fn endpoint(root: &Path, rel: &str) -> Arc<DatagramSocket> {
    let socket = Arc::new(DatagramSocket::new(root.join(rel), rel));
    socket.listen().expect("listen");
    socket
}

/// Attaches one worker slot (`<base>_in` request, `<base>_out` response) to
/// a register.
fn attach_pair(register: &mut dyn Register, root: &Path, base: &str, op: SlotOp) {
    register
        .slots_mut()
        .attach(op, SlotDir::In, endpoint(root, &format!("{base}_in")))
        .expect("attach in");
    register
        .slots_mut()
        .attach(op, SlotDir::Out, endpoint(root, &format!("{base}_out")))
        .expect("attach out");
}

/// Worker-side halves of one operation channel.
struct Client {
    tx: UnixDatagram,
    rx: UnixDatagram,
}

impl Client {
    /// Binds the response path and connects to the request path, the way
    /// the generated shim does during import.
    fn new(root: &Path, base: &str) -> Client {
        let rx = UnixDatagram::bind(root.join(format!("{base}_out"))).expect("bind out");
        rx.set_read_timeout(Some(RECV_TIMEOUT)).expect("timeout");
        let tx = UnixDatagram::unbound().expect("unbound");
        tx.connect(root.join(format!("{base}_in"))).expect("connect in");
        Client { tx, rx }
    }

    fn send(&self, frame: &[u8]) {
        self.tx.send(frame).expect("send");
    }

    fn recv(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        let n = self.rx.recv(&mut buf).expect("recv");
        buf.truncate(n);
        buf
    }

    fn request(&self, frame: &[u8], resp_len: usize) -> Vec<u8> {
        self.send(frame);
        self.recv(resp_len)
    }

    /// True when no response arrives within the short blocked window.
    fn is_blocked(&self) -> bool {
        self.rx
            .set_read_timeout(Some(BLOCKED_TIMEOUT))
            .expect("timeout");
        let mut buf = [0u8; 16];
        let blocked = self.rx.recv(&mut buf).is_err();
        self.rx.set_read_timeout(Some(RECV_TIMEOUT)).expect("timeout");
        blocked
    }
}

// ── Scalars ──────────────────────────────────────────────────────────────────

#[test]
fn test_bool_set_get_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = BoolRegister::new("m/_b_", false);
    attach_pair(&mut reg, root, "0/m/_b_/set", SlotOp::Set);
    attach_pair(&mut reg, root, "0/m/_b_/get", SlotOp::Get);
    reg.start();

    let set = Client::new(root, "0/m/_b_/set");
    let get = Client::new(root, "0/m/_b_/get");

    assert_eq!(get.request(&[SYNC], 1), vec![0]);
    assert_eq!(set.request(&[1], 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 1), vec![1]);
    assert_eq!(set.request(&[0], 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 1), vec![0]);
}

#[test]
fn test_int_arithmetic_and_gets_are_linearized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = IntRegister::new("m/_n_", 5);
    attach_pair(&mut reg, root, "0/m/_n_/set", SlotOp::Set);
    attach_pair(&mut reg, root, "0/m/_n_/get", SlotOp::Get);
    attach_pair(&mut reg, root, "0/m/_n_/add", SlotOp::Add);
    attach_pair(&mut reg, root, "0/m/_n_/sub", SlotOp::Sub);
    attach_pair(&mut reg, root, "0/m/_n_/mul", SlotOp::Mul);
    attach_pair(&mut reg, root, "0/m/_n_/div", SlotOp::Div);
    reg.start();

    let get = Client::new(root, "0/m/_n_/get");
    let set = Client::new(root, "0/m/_n_/set");
    let add = Client::new(root, "0/m/_n_/add");
    let sub = Client::new(root, "0/m/_n_/sub");
    let mul = Client::new(root, "0/m/_n_/mul");
    let div = Client::new(root, "0/m/_n_/div");

    let read = || i64::from_be_bytes(get.request(&[SYNC], 8).try_into().expect("8 bytes"));

    assert_eq!(read(), 5);
    assert_eq!(set.request(&7i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(add.request(&10i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(read(), 17);
    assert_eq!(sub.request(&2i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(mul.request(&4i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(div.request(&3i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(read(), 20);

    // Identity operations preserve the value.
    assert_eq!(add.request(&0i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(mul.request(&1i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(div.request(&1i64.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(read(), 20);
}

#[test]
fn test_concurrent_adders_reach_exact_total() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = IntRegister::new("m/_counter_", 0);
    for node in 0..3 {
        attach_pair(&mut reg, root, &format!("{node}/m/_counter_/add"), SlotOp::Add);
    }
    attach_pair(&mut reg, root, "0/m/_counter_/get", SlotOp::Get);
    reg.start();

    let workers: Vec<_> = (0..3)
        .map(|node| {
            let root = root.to_path_buf();
            std::thread::spawn(move || {
                let add = Client::new(&root, &format!("{node}/m/_counter_/add"));
                for _ in 0..100 {
                    assert_eq!(add.request(&1i64.to_be_bytes(), 1), vec![SYNC]);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let get = Client::new(root, "0/m/_counter_/get");
    let total = i64::from_be_bytes(get.request(&[SYNC], 8).try_into().expect("8 bytes"));
    assert_eq!(total, 300);
}

#[test]
fn test_float_arithmetic_is_ieee_exact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = FloatRegister::new("m/_f_", 1.5);
    attach_pair(&mut reg, root, "0/m/_f_/get", SlotOp::Get);
    attach_pair(&mut reg, root, "0/m/_f_/add", SlotOp::Add);
    attach_pair(&mut reg, root, "0/m/_f_/div", SlotOp::Div);
    reg.start();

    let get = Client::new(root, "0/m/_f_/get");
    let add = Client::new(root, "0/m/_f_/add");
    let div = Client::new(root, "0/m/_f_/div");

    let read = || f64::from_le_bytes(get.request(&[SYNC], 8).try_into().expect("8 bytes"));

    assert_eq!(read(), 1.5);
    assert_eq!(add.request(&2.25f64.to_le_bytes(), 1), vec![SYNC]);
    assert_eq!(read(), 1.5 + 2.25);
    assert_eq!(div.request(&0.0f64.to_le_bytes(), 1), vec![SYNC]);
    assert!(read().is_infinite());
}

#[test]
fn test_string_set_get_add_and_suffix_sub() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = StrRegister::new("m/_s_", "");
    attach_pair(&mut reg, root, "0/m/_s_/set", SlotOp::Set);
    attach_pair(&mut reg, root, "0/m/_s_/get", SlotOp::Get);
    attach_pair(&mut reg, root, "0/m/_s_/add", SlotOp::Add);
    attach_pair(&mut reg, root, "0/m/_s_/sub", SlotOp::Sub);
    reg.start();

    let set = Client::new(root, "0/m/_s_/set");
    let get = Client::new(root, "0/m/_s_/get");
    let add = Client::new(root, "0/m/_s_/add");
    let sub = Client::new(root, "0/m/_s_/sub");

    assert_eq!(set.request("héllo".as_bytes(), 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 65536), "héllo".as_bytes());

    assert_eq!(add.request(" wörld".as_bytes(), 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 65536), "héllo wörld".as_bytes());

    // Non-suffix subtraction leaves the value unchanged.
    assert_eq!(sub.request("héllo".as_bytes(), 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 65536), "héllo wörld".as_bytes());

    // Suffix subtraction removes the trailing match.
    assert_eq!(sub.request(" wörld".as_bytes(), 1), vec![SYNC]);
    assert_eq!(get.request(&[SYNC], 65536), "héllo".as_bytes());
}

// ── Mutex ────────────────────────────────────────────────────────────────────

#[test]
fn test_mutex_serializes_two_workers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = MutexRegister::new("m/_mutex_db_");
    for node in 0..2 {
        attach_pair(&mut reg, root, &format!("{node}/m/_lock_db_"), SlotOp::Lock);
        attach_pair(&mut reg, root, &format!("{node}/m/_unlock_db_"), SlotOp::Unlock);
    }
    reg.start();

    let lock0 = Client::new(root, "0/m/_lock_db_");
    let unlock0 = Client::new(root, "0/m/_unlock_db_");
    let lock1 = Client::new(root, "1/m/_lock_db_");
    let unlock1 = Client::new(root, "1/m/_unlock_db_");

    // Worker 0 takes the lock.
    assert_eq!(lock0.request(&[SYNC], 1), vec![SYNC]);

    // Worker 1's lock request parks until worker 0 releases.
    lock1.send(&[SYNC]);
    assert!(lock1.is_blocked(), "second lock must not be acked yet");

    assert_eq!(unlock0.request(&[SYNC], 1), vec![SYNC]);
    assert_eq!(lock1.recv(1), vec![SYNC]);

    assert_eq!(unlock1.request(&[SYNC], 1), vec![SYNC]);
}

// ── Wait-group ───────────────────────────────────────────────────────────────

#[test]
fn test_wait_group_barrier_releases_after_last_decrement() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = WaitGroupRegister::new("m/_sync_go_", 2);
    for node in 0..3 {
        attach_pair(&mut reg, root, &format!("{node}/m/_sync_go_"), SlotOp::Set);
    }
    reg.start();

    let a = Client::new(root, "0/m/_sync_go_");
    let b = Client::new(root, "1/m/_sync_go_");
    let c = Client::new(root, "2/m/_sync_go_");

    // A waits; the counter is still 2.
    a.send(&0i32.to_be_bytes());
    assert!(a.is_blocked(), "wait must park until the counter is zero");

    // One decrement is not enough.
    assert_eq!(b.request(&1i32.to_be_bytes(), 1), vec![SYNC]);
    assert!(a.is_blocked(), "wait must survive a partial countdown");

    // The final decrement releases the waiter.
    assert_eq!(c.request(&1i32.to_be_bytes(), 1), vec![SYNC]);
    assert_eq!(a.recv(1), vec![SYNC]);

    // Level-triggered: later waits return immediately.
    assert_eq!(b.request(&0i32.to_be_bytes(), 1), vec![SYNC]);
}

// ── Queues ───────────────────────────────────────────────────────────────────

/// Queue client with the extra ok endpoint for get.
struct QueueGetClient {
    inner: Client,
    ok: UnixDatagram,
}

impl QueueGetClient {
    fn new(root: &Path, var: &str) -> QueueGetClient {
        let ok = UnixDatagram::bind(root.join(format!("{var}/get_ok"))).expect("bind ok");
        ok.set_read_timeout(Some(RECV_TIMEOUT)).expect("timeout");
        QueueGetClient {
            inner: Client::new(root, &format!("{var}/get")),
            ok,
        }
    }

    /// Returns `Some(element bytes)` on success, `None` on NAK (empty).
    fn get(&self, elem_len: usize) -> Option<Vec<u8>> {
        self.inner.send(&[SYNC]);
        // Either SYNC arrives on the ok endpoint (then data follows) or NAK
        // arrives on the data endpoint.
        let mut ok_buf = [0u8; 1];
        self.ok
            .set_read_timeout(Some(BLOCKED_TIMEOUT))
            .expect("timeout");
        let got_ok = self.ok.recv(&mut ok_buf).is_ok() && ok_buf[0] == SYNC;
        self.ok.set_read_timeout(Some(RECV_TIMEOUT)).expect("timeout");
        if got_ok {
            Some(self.inner.recv(elem_len))
        } else {
            let nak = self.inner.recv(1);
            assert_eq!(nak, vec![NAK]);
            None
        }
    }
}

fn attach_queue_get(register: &mut dyn Register, root: &Path, var: &str) {
    attach_pair(register, root, &format!("{var}/get"), SlotOp::Get);
    register
        .slots_mut()
        .attach(
            SlotOp::Get,
            SlotDir::Ok,
            endpoint(root, &format!("{var}/get_ok")),
        )
        .expect("attach ok");
}

#[test]
fn test_bounded_fifo_order_capacity_and_naks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = QueueRegister::<i64>::new("m/_q_", 4, false);
    attach_pair(&mut reg, root, "0/m/_q_/set", SlotOp::Set);
    attach_queue_get(&mut reg, root, "0/m/_q_");
    attach_pair(&mut reg, root, "0/m/_q_/size", SlotOp::Size);
    attach_pair(&mut reg, root, "0/m/_q_/empty", SlotOp::Empty);
    attach_pair(&mut reg, root, "0/m/_q_/full", SlotOp::Full);
    reg.start();

    let put = Client::new(root, "0/m/_q_/set");
    let get = QueueGetClient::new(root, "0/m/_q_");
    let size = Client::new(root, "0/m/_q_/size");
    let empty = Client::new(root, "0/m/_q_/empty");
    let full = Client::new(root, "0/m/_q_/full");

    assert_eq!(empty.request(&[SYNC], 1), vec![1]);

    for v in 1..=4i64 {
        assert_eq!(put.request(&v.to_be_bytes(), 1), vec![SYNC]);
    }
    // Fifth put refused: capacity 4.
    assert_eq!(put.request(&5i64.to_be_bytes(), 1), vec![NAK]);

    assert_eq!(size.request(&[SYNC], 8), 4u64.to_be_bytes());
    assert_eq!(full.request(&[SYNC], 1), vec![1]);
    assert_eq!(empty.request(&[SYNC], 1), vec![0]);

    // FIFO drain preserves insertion order.
    for v in 1..=4i64 {
        let bytes = get.get(8).expect("element");
        assert_eq!(i64::from_be_bytes(bytes.try_into().expect("8 bytes")), v);
    }
    assert_eq!(get.get(8), None, "empty queue answers NAK");

    // Room again after the drain.
    assert_eq!(put.request(&5i64.to_be_bytes(), 1), vec![SYNC]);
}

#[test]
fn test_lifo_string_queue_overflow_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = QueueRegister::<String>::new("m/_s_", 2, true);
    attach_pair(&mut reg, root, "0/m/_s_/set", SlotOp::Set);
    attach_queue_get(&mut reg, root, "0/m/_s_");
    reg.start();

    let put = Client::new(root, "0/m/_s_/set");
    let get = QueueGetClient::new(root, "0/m/_s_");

    assert_eq!(put.request(b"a", 1), vec![SYNC]);
    assert_eq!(put.request(b"b", 1), vec![SYNC]);
    assert_eq!(put.request(b"c", 1), vec![NAK]);

    assert_eq!(get.get(65536).expect("element"), b"b");
    assert_eq!(put.request(b"c", 1), vec![SYNC]);
    assert_eq!(get.get(65536).expect("element"), b"c");
    assert_eq!(get.get(65536).expect("element"), b"a");
    assert_eq!(get.get(65536), None);
}

// ── Protocol errors ──────────────────────────────────────────────────────────

#[test]
fn test_bad_sync_byte_kills_only_that_slot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let mut reg = IntRegister::new("m/_n_", 1);
    attach_pair(&mut reg, root, "0/m/_n_/get", SlotOp::Get);
    attach_pair(&mut reg, root, "0/m/_n_/set", SlotOp::Set);
    reg.start();

    let get = Client::new(root, "0/m/_n_/get");
    let set = Client::new(root, "0/m/_n_/set");

    // A request byte that is not SYNC ends the getter task without a reply.
    get.send(&[0x00]);
    assert!(get.is_blocked(), "protocol violation must not be answered");

    // The same register's setter slot keeps working.
    assert_eq!(set.request(&9i64.to_be_bytes(), 1), vec![SYNC]);

    // And the dead getter stays dead.
    get.send(&[SYNC]);
    assert!(get.is_blocked());
}
