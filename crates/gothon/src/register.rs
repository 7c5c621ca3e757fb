//! Registers: coordinator-side owners of shared-variable values.
//!
//! A register holds one authoritative value behind a private mutex and a set
//! of endpoint slots, one per (worker, operation). [`Register::start`] spawns
//! one dedicated OS thread per slot; each thread loops receiving one
//! fixed-size request frame, applying the operation inside the register's
//! critical section, and sending the response frame(s).
//!
//! Thread lifecycle: a closed endpoint (zero-length receive after shutdown)
//! ends the thread silently; an unexpected IO error or a protocol violation
//! (a request byte that is not SYNC where SYNC is required) is logged via
//! `log::error!` and ends that thread only; the register's other slots keep
//! servicing their workers.
//!
//! No register ever takes another register's mutex, so inter-register
//! deadlock is structurally impossible. The only additional blocking points
//! are deliberate: a mutex register's locker thread parks until the holder
//! releases, and a wait-group thread parks until the counter reaches zero.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::config;
use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::socket::DatagramSocket;

/// Acknowledgement byte.
pub const SYNC: u8 = 0x16;
/// Refusal byte (queue full on put, queue empty on get).
pub const NAK: u8 = 0x15;

// ── Slots ────────────────────────────────────────────────────────────────────

/// Operation family an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOp {
    Set,
    Get,
    Add,
    Sub,
    Mul,
    Div,
    Lock,
    Unlock,
    Size,
    Empty,
    Full,
}

/// Direction of an endpoint within its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDir {
    In,
    Out,
    /// The extra success-signal output that accompanies queue get.
    Ok,
}

/// Endpoint slots of one register, grouped by operation family. The fabric
/// attaches `_in`/`_out` (and `_ok`) endpoints in matching order, one pair
/// per worker, so zipping the vectors pairs each request reader with its
/// response writer.
#[derive(Default)]
pub struct SlotSet {
    set_in: Vec<Arc<DatagramSocket>>,
    set_out: Vec<Arc<DatagramSocket>>,
    get_in: Vec<Arc<DatagramSocket>>,
    get_out: Vec<Arc<DatagramSocket>>,
    get_ok: Vec<Arc<DatagramSocket>>,
    add_in: Vec<Arc<DatagramSocket>>,
    add_out: Vec<Arc<DatagramSocket>>,
    sub_in: Vec<Arc<DatagramSocket>>,
    sub_out: Vec<Arc<DatagramSocket>>,
    mul_in: Vec<Arc<DatagramSocket>>,
    mul_out: Vec<Arc<DatagramSocket>>,
    div_in: Vec<Arc<DatagramSocket>>,
    div_out: Vec<Arc<DatagramSocket>>,
    lock_in: Vec<Arc<DatagramSocket>>,
    lock_out: Vec<Arc<DatagramSocket>>,
    unlock_in: Vec<Arc<DatagramSocket>>,
    unlock_out: Vec<Arc<DatagramSocket>>,
    size_in: Vec<Arc<DatagramSocket>>,
    size_out: Vec<Arc<DatagramSocket>>,
    empty_in: Vec<Arc<DatagramSocket>>,
    empty_out: Vec<Arc<DatagramSocket>>,
    full_in: Vec<Arc<DatagramSocket>>,
    full_out: Vec<Arc<DatagramSocket>>,
}

impl SlotSet {
    pub fn attach(&mut self, op: SlotOp, dir: SlotDir, socket: Arc<DatagramSocket>) -> Result<()> {
        let list = match (op, dir) {
            (SlotOp::Set, SlotDir::In) => &mut self.set_in,
            (SlotOp::Set, SlotDir::Out) => &mut self.set_out,
            (SlotOp::Get, SlotDir::In) => &mut self.get_in,
            (SlotOp::Get, SlotDir::Out) => &mut self.get_out,
            (SlotOp::Get, SlotDir::Ok) => &mut self.get_ok,
            (SlotOp::Add, SlotDir::In) => &mut self.add_in,
            (SlotOp::Add, SlotDir::Out) => &mut self.add_out,
            (SlotOp::Sub, SlotDir::In) => &mut self.sub_in,
            (SlotOp::Sub, SlotDir::Out) => &mut self.sub_out,
            (SlotOp::Mul, SlotDir::In) => &mut self.mul_in,
            (SlotOp::Mul, SlotDir::Out) => &mut self.mul_out,
            (SlotOp::Div, SlotDir::In) => &mut self.div_in,
            (SlotOp::Div, SlotDir::Out) => &mut self.div_out,
            (SlotOp::Lock, SlotDir::In) => &mut self.lock_in,
            (SlotOp::Lock, SlotDir::Out) => &mut self.lock_out,
            (SlotOp::Unlock, SlotDir::In) => &mut self.unlock_in,
            (SlotOp::Unlock, SlotDir::Out) => &mut self.unlock_out,
            (SlotOp::Size, SlotDir::In) => &mut self.size_in,
            (SlotOp::Size, SlotDir::Out) => &mut self.size_out,
            (SlotOp::Empty, SlotDir::In) => &mut self.empty_in,
            (SlotOp::Empty, SlotDir::Out) => &mut self.empty_out,
            (SlotOp::Full, SlotDir::In) => &mut self.full_in,
            (SlotOp::Full, SlotDir::Out) => &mut self.full_out,
            (op, SlotDir::Ok) => {
                return Err(Error::InvalidOperation {
                    variable: socket.tag().to_string(),
                    op: format!("{op:?}_ok"),
                })
            }
        };
        list.push(socket);
        Ok(())
    }
}

/// One shared cell: an id, a typed value, and the reader threads that
/// service its endpoint slots.
pub trait Register: Send {
    fn id(&self) -> &str;
    fn slots_mut(&mut self) -> &mut SlotSet;
    /// Consumes the attached slots and spawns one reader thread per slot.
    fn start(&mut self);
}

// ── Reader-thread plumbing ───────────────────────────────────────────────────

fn spawn_reader(name: String, body: impl FnOnce() + Send + 'static) {
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .expect("failed to spawn register reader thread");
}

/// Receives one frame; `None` ends the reader (closed endpoint or error).
fn recv_frame(ctx: &str, socket: &DatagramSocket, buf: &mut [u8]) -> Option<usize> {
    match socket.recv(buf) {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
            if !is_disconnect(&e) {
                log::error!("register:{ctx}:read: {e}");
            }
            None
        }
    }
}

/// Sends one frame; `false` ends the reader.
fn send_frame(ctx: &str, socket: &DatagramSocket, data: &[u8]) -> bool {
    match socket.send(data) {
        Ok(_) => true,
        Err(e) => {
            if !is_disconnect(&e) {
                log::error!("register:{ctx}:write: {e}");
            }
            false
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotFound
    )
}

/// Validates the one-byte SYNC request that read-style operations require.
fn expect_sync(ctx: &str, byte: u8) -> bool {
    if byte == SYNC {
        true
    } else {
        log::error!("register:{ctx}:read: expected byte {SYNC}, got {byte}");
        false
    }
}

fn lock<'a, T>(cell: &'a Arc<Mutex<T>>) -> std::sync::MutexGuard<'a, T> {
    cell.lock().expect("register mutex poisoned")
}

/// Request/ack loop for operations that carry a fixed-size payload and
/// answer with a single SYNC byte.
fn run_payload_op<const N: usize, F: FnMut(&[u8; N]) -> bool>(
    ctx: String,
    rx: Arc<DatagramSocket>,
    tx: Arc<DatagramSocket>,
    mut apply: F,
) {
    let mut buf = [0u8; N];
    loop {
        let Some(n) = recv_frame(&ctx, &rx, &mut buf) else {
            return;
        };
        if n < N {
            log::error!("register:{ctx}:read: short frame ({n} of {N} bytes)");
            return;
        }
        if !apply(&buf) {
            return;
        }
        if !send_frame(&ctx, &tx, &[SYNC]) {
            return;
        }
    }
}

/// Request/response loop for read-style operations: a SYNC request byte
/// answered with a computed frame.
fn run_query_op(
    ctx: String,
    rx: Arc<DatagramSocket>,
    tx: Arc<DatagramSocket>,
    mut compute: impl FnMut() -> Vec<u8>,
) {
    let mut buf = [0u8; 1];
    loop {
        let Some(_) = recv_frame(&ctx, &rx, &mut buf) else {
            return;
        };
        if !expect_sync(&ctx, buf[0]) {
            return;
        }
        let frame = compute();
        if !send_frame(&ctx, &tx, &frame) {
            return;
        }
    }
}

fn zip_slots(
    ins: Vec<Arc<DatagramSocket>>,
    outs: Vec<Arc<DatagramSocket>>,
) -> impl Iterator<Item = (usize, (Arc<DatagramSocket>, Arc<DatagramSocket>))> {
    ins.into_iter().zip(outs).enumerate()
}

// ── Bool ─────────────────────────────────────────────────────────────────────

pub struct BoolRegister {
    id: String,
    slots: SlotSet,
    value: Arc<Mutex<bool>>,
}

impl BoolRegister {
    pub fn new(id: impl Into<String>, default: bool) -> Self {
        BoolRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Mutex::new(default)),
        }
    }
}

impl Register for BoolRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        for (i, (rx, tx)) in zip_slots(slots.set_in, slots.set_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-bool-set-{i}"), move || {
                run_payload_op::<1, _>("bool:set".to_string(), rx, tx, move |frame| {
                    *lock(&value) = frame[0] != 0;
                    true
                })
            });
        }

        for (i, (rx, tx)) in zip_slots(slots.get_in, slots.get_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-bool-get-{i}"), move || {
                run_query_op("bool:get".to_string(), rx, tx, move || {
                    vec![u8::from(*lock(&value))]
                })
            });
        }
    }
}

// ── Int ──────────────────────────────────────────────────────────────────────

pub struct IntRegister {
    id: String,
    slots: SlotSet,
    value: Arc<Mutex<i64>>,
}

impl IntRegister {
    pub fn new(id: impl Into<String>, default: i64) -> Self {
        IntRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Mutex::new(default)),
        }
    }

    fn spawn_arithmetic(
        &self,
        op: &'static str,
        ins: Vec<Arc<DatagramSocket>>,
        outs: Vec<Arc<DatagramSocket>>,
        apply: fn(i64, i64) -> Option<i64>,
    ) {
        for (i, (rx, tx)) in zip_slots(ins, outs) {
            let value = Arc::clone(&self.value);
            let ctx = format!("int:{op}");
            spawn_reader(format!("reg-int-{op}-{i}"), move || {
                run_payload_op::<8, _>(ctx.clone(), rx, tx, move |frame| {
                    let operand = i64::from_be_bytes(*frame);
                    let mut guard = lock(&value);
                    match apply(*guard, operand) {
                        Some(next) => {
                            *guard = next;
                            true
                        }
                        None => {
                            log::error!("register:{ctx}: division by zero");
                            false
                        }
                    }
                })
            });
        }
    }
}

impl Register for IntRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        self.spawn_arithmetic("set", slots.set_in, slots.set_out, |_, v| Some(v));
        self.spawn_arithmetic("add", slots.add_in, slots.add_out, |a, b| {
            Some(a.wrapping_add(b))
        });
        self.spawn_arithmetic("sub", slots.sub_in, slots.sub_out, |a, b| {
            Some(a.wrapping_sub(b))
        });
        self.spawn_arithmetic("mul", slots.mul_in, slots.mul_out, |a, b| {
            Some(a.wrapping_mul(b))
        });
        self.spawn_arithmetic("div", slots.div_in, slots.div_out, |a, b| a.checked_div(b));

        for (i, (rx, tx)) in zip_slots(slots.get_in, slots.get_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-int-get-{i}"), move || {
                run_query_op("int:get".to_string(), rx, tx, move || {
                    lock(&value).to_be_bytes().to_vec()
                })
            });
        }
    }
}

// ── Float ────────────────────────────────────────────────────────────────────

pub struct FloatRegister {
    id: String,
    slots: SlotSet,
    value: Arc<Mutex<f64>>,
}

impl FloatRegister {
    pub fn new(id: impl Into<String>, default: f64) -> Self {
        FloatRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Mutex::new(default)),
        }
    }

    fn spawn_arithmetic(
        &self,
        op: &'static str,
        ins: Vec<Arc<DatagramSocket>>,
        outs: Vec<Arc<DatagramSocket>>,
        apply: fn(f64, f64) -> f64,
    ) {
        for (i, (rx, tx)) in zip_slots(ins, outs) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-float-{op}-{i}"), move || {
                run_payload_op::<8, _>(format!("float:{op}"), rx, tx, move |frame| {
                    let operand = f64::from_le_bytes(*frame);
                    let mut guard = lock(&value);
                    *guard = apply(*guard, operand);
                    true
                })
            });
        }
    }
}

impl Register for FloatRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        self.spawn_arithmetic("set", slots.set_in, slots.set_out, |_, v| v);
        self.spawn_arithmetic("add", slots.add_in, slots.add_out, |a, b| a + b);
        self.spawn_arithmetic("sub", slots.sub_in, slots.sub_out, |a, b| a - b);
        self.spawn_arithmetic("mul", slots.mul_in, slots.mul_out, |a, b| a * b);
        self.spawn_arithmetic("div", slots.div_in, slots.div_out, |a, b| a / b);

        for (i, (rx, tx)) in zip_slots(slots.get_in, slots.get_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-float-get-{i}"), move || {
                run_query_op("float:get".to_string(), rx, tx, move || {
                    lock(&value).to_le_bytes().to_vec()
                })
            });
        }
    }
}

// ── Str ──────────────────────────────────────────────────────────────────────

pub struct StrRegister {
    id: String,
    slots: SlotSet,
    value: Arc<Mutex<String>>,
}

impl StrRegister {
    pub fn new(id: impl Into<String>, default: impl Into<String>) -> Self {
        StrRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Mutex::new(default.into())),
        }
    }

    /// String payload operations read a whole datagram of up to the
    /// configured buffer size; a value truncated by the frame boundary is
    /// decoded lossily.
    fn spawn_payload(
        &self,
        op: &'static str,
        ins: Vec<Arc<DatagramSocket>>,
        outs: Vec<Arc<DatagramSocket>>,
        apply: fn(&mut String, &str),
    ) {
        let buffer_size = config::string_buffer_size() as usize;
        for (i, (rx, tx)) in zip_slots(ins, outs) {
            let value = Arc::clone(&self.value);
            let ctx = format!("string:{op}");
            spawn_reader(format!("reg-str-{op}-{i}"), move || {
                let mut buf = vec![0u8; buffer_size];
                loop {
                    let Some(n) = recv_frame(&ctx, &rx, &mut buf) else {
                        return;
                    };
                    let payload = String::from_utf8_lossy(&buf[..n]).into_owned();
                    apply(&mut lock(&value), &payload);
                    if !send_frame(&ctx, &tx, &[SYNC]) {
                        return;
                    }
                }
            });
        }
    }
}

impl Register for StrRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        self.spawn_payload("set", slots.set_in, slots.set_out, |value, payload| {
            *value = payload.to_string();
        });
        self.spawn_payload("add", slots.add_in, slots.add_out, |value, payload| {
            value.push_str(payload);
        });
        // Subtraction removes the payload only when it is a trailing match.
        self.spawn_payload("sub", slots.sub_in, slots.sub_out, |value, payload| {
            if let Some(stripped) = value.strip_suffix(payload) {
                *value = stripped.to_string();
            }
        });

        for (i, (rx, tx)) in zip_slots(slots.get_in, slots.get_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-str-get-{i}"), move || {
                run_query_op("string:get".to_string(), rx, tx, move || {
                    lock(&value).clone().into_bytes()
                })
            });
        }
    }
}

// ── Mutex ────────────────────────────────────────────────────────────────────

/// A lock whose acquire and release may come from different threads (each
/// worker's lock and unlock requests are serviced by distinct reader
/// threads), built from the std mutex/condvar pair.
struct RawLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl RawLock {
    fn new() -> Self {
        RawLock {
            held: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.held.lock().expect("raw lock poisoned");
        while *held {
            held = self.cv.wait(held).expect("raw lock poisoned");
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock().expect("raw lock poisoned") = false;
        self.cv.notify_one();
    }
}

pub struct MutexRegister {
    id: String,
    slots: SlotSet,
    value: Arc<RawLock>,
}

impl MutexRegister {
    pub fn new(id: impl Into<String>) -> Self {
        MutexRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(RawLock::new()),
        }
    }
}

impl Register for MutexRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        for (i, (rx, tx)) in zip_slots(slots.lock_in, slots.lock_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-mutex-lock-{i}"), move || {
                run_query_op("mutex:lock".to_string(), rx, tx, move || {
                    value.acquire();
                    vec![SYNC]
                })
            });
        }

        // Release by any worker is accepted, matching the source semantics
        // where the unlock callable is freestanding.
        for (i, (rx, tx)) in zip_slots(slots.unlock_in, slots.unlock_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-mutex-unlock-{i}"), move || {
                run_query_op("mutex:unlock".to_string(), rx, tx, move || {
                    value.release();
                    vec![SYNC]
                })
            });
        }
    }
}

// ── Wait-group ───────────────────────────────────────────────────────────────

/// Countdown latch: `done(k)` decrements, `wait` parks until the counter has
/// reached zero. Level-triggered: waits issued after that return at once.
struct Countdown {
    count: Mutex<i64>,
    cv: Condvar,
}

impl Countdown {
    fn new(count: i64) -> Self {
        Countdown {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    fn done(&self, k: i64) {
        let mut count = self.count.lock().expect("countdown poisoned");
        *count -= k;
        if *count <= 0 {
            self.cv.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().expect("countdown poisoned");
        while *count > 0 {
            count = self.cv.wait(count).expect("countdown poisoned");
        }
    }
}

pub struct WaitGroupRegister {
    id: String,
    slots: SlotSet,
    value: Arc<Countdown>,
}

impl WaitGroupRegister {
    pub fn new(id: impl Into<String>, count: i64) -> Self {
        WaitGroupRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Countdown::new(count)),
        }
    }
}

impl Register for WaitGroupRegister {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);

        // Wait-group requests arrive on the setter slot: a 4-byte big-endian
        // signed count. 0 waits for the counter; k > 0 performs k decrements;
        // negative is a protocol violation.
        for (i, (rx, tx)) in zip_slots(slots.set_in, slots.set_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-sync-{i}"), move || {
                run_payload_op::<4, _>("sync".to_string(), rx, tx, move |frame| {
                    let n = i32::from_be_bytes(*frame);
                    match n {
                        0 => value.wait(),
                        n if n > 0 => value.done(i64::from(n)),
                        _ => {
                            log::error!("register:sync: count must not be negative");
                            return false;
                        }
                    }
                    true
                })
            });
        }
    }
}

// ── Queue ────────────────────────────────────────────────────────────────────

/// Wire codec for a queue element kind.
pub trait WireElement: Clone + Send + 'static {
    /// Fixed request/response frame length, or `None` for the configured
    /// string buffer size.
    fn frame_len() -> Option<usize>;
    fn decode(frame: &[u8]) -> Self;
    fn encode(&self) -> Vec<u8>;
}

impl WireElement for bool {
    fn frame_len() -> Option<usize> {
        Some(1)
    }
    fn decode(frame: &[u8]) -> Self {
        frame.first().copied().unwrap_or(0) != 0
    }
    fn encode(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
}

impl WireElement for i64 {
    fn frame_len() -> Option<usize> {
        Some(8)
    }
    fn decode(frame: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&frame[..8]);
        i64::from_be_bytes(bytes)
    }
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl WireElement for f64 {
    fn frame_len() -> Option<usize> {
        Some(8)
    }
    fn decode(frame: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&frame[..8]);
        f64::from_le_bytes(bytes)
    }
    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
}

impl WireElement for String {
    fn frame_len() -> Option<usize> {
        None
    }
    fn decode(frame: &[u8]) -> Self {
        String::from_utf8_lossy(frame).into_owned()
    }
    fn encode(&self) -> Vec<u8> {
        self.clone().into_bytes()
    }
}

pub struct QueueRegister<T: WireElement> {
    id: String,
    slots: SlotSet,
    value: Arc<Mutex<Queue<T>>>,
}

impl<T: WireElement> QueueRegister<T> {
    pub fn new(id: impl Into<String>, max_size: usize, lifo: bool) -> Self {
        QueueRegister {
            id: id.into(),
            slots: SlotSet::default(),
            value: Arc::new(Mutex::new(Queue::new(max_size, lifo))),
        }
    }
}

fn element_frame_len<T: WireElement>() -> usize {
    T::frame_len().unwrap_or(config::string_buffer_size() as usize)
}

impl<T: WireElement> Register for QueueRegister<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn slots_mut(&mut self) -> &mut SlotSet {
        &mut self.slots
    }

    fn start(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        let frame_len = element_frame_len::<T>();

        // put: element frame in, SYNC or NAK out.
        for (i, (rx, tx)) in zip_slots(slots.set_in, slots.set_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-queue-put-{i}"), move || {
                let ctx = "queue:put";
                let mut buf = vec![0u8; frame_len];
                loop {
                    let Some(n) = recv_frame(ctx, &rx, &mut buf) else {
                        return;
                    };
                    if T::frame_len().is_some_and(|len| n < len) {
                        log::error!("register:{ctx}:read: short frame");
                        return;
                    }
                    let element = T::decode(&buf[..n]);
                    let accepted = lock(&value).put(element);
                    let reply = if accepted { SYNC } else { NAK };
                    if !send_frame(ctx, &tx, &[reply]) {
                        return;
                    }
                }
            });
        }

        // get: SYNC in; on success SYNC on the ok endpoint then the element
        // on the data endpoint; on empty a single NAK on the data endpoint.
        // The two sends are not atomic, but the register mutex keeps other
        // workers from interleaving their own dequeues in between.
        let gets = slots
            .get_in
            .into_iter()
            .zip(slots.get_out)
            .zip(slots.get_ok)
            .enumerate();
        for (i, ((rx, tx), ok)) in gets {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-queue-get-{i}"), move || {
                let ctx = "queue:get";
                let mut buf = [0u8; 1];
                loop {
                    let Some(_) = recv_frame(ctx, &rx, &mut buf) else {
                        return;
                    };
                    if !expect_sync(ctx, buf[0]) {
                        return;
                    }
                    let element = lock(&value).get();
                    match element {
                        Some(element) => {
                            if !send_frame(ctx, &ok, &[SYNC]) {
                                return;
                            }
                            if !send_frame(ctx, &tx, &element.encode()) {
                                return;
                            }
                        }
                        None => {
                            if !send_frame(ctx, &tx, &[NAK]) {
                                return;
                            }
                        }
                    }
                }
            });
        }

        for (i, (rx, tx)) in zip_slots(slots.size_in, slots.size_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-queue-size-{i}"), move || {
                run_query_op("queue:size".to_string(), rx, tx, move || {
                    (lock(&value).size() as u64).to_be_bytes().to_vec()
                })
            });
        }

        for (i, (rx, tx)) in zip_slots(slots.empty_in, slots.empty_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-queue-empty-{i}"), move || {
                run_query_op("queue:empty".to_string(), rx, tx, move || {
                    vec![u8::from(lock(&value).is_empty())]
                })
            });
        }

        for (i, (rx, tx)) in zip_slots(slots.full_in, slots.full_out) {
            let value = Arc::clone(&self.value);
            spawn_reader(format!("reg-queue-full-{i}"), move || {
                run_query_op("queue:full".to_string(), rx, tx, move || {
                    vec![u8::from(lock(&value).is_full())]
                })
            });
        }
    }
}
