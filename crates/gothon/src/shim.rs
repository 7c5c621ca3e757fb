//! Python helper templates for the generated `_gothon_.py` shim module.
//!
//! Each template is one worker-side helper implementing the wire protocol
//! for a (kind, operation) pair: send the request frame on the operation's
//! `_in` socket, receive the response on `_out` (and `_ok` for queue get).
//! `{{var_id}}` is the translated variable id, `{{action}}` the operation
//! token, `{{str_max_size}}` the configured string buffer size. The sentinel
//! 22 is the SYNC ack byte, 21 the NAK refusal byte.

use crate::config;

// ── bool ─────────────────────────────────────────────────────────────────────

const BOOL_SET: &str = r#"
def gothon_{{var_id}}_set(val: bool) -> bool:
    if val:
        _sock_{{var_id}}_set_in.send((1).to_bytes(1, 'big'))
    else:
        _sock_{{var_id}}_set_in.send((0).to_bytes(1, 'big'))
    _sock_{{var_id}}_set_out.recvfrom(1)
    return val"#;

const BOOL_GET: &str = r#"
def gothon_{{var_id}}_get() -> bool:
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(1)
    return val_bytes[0] != 0"#;

// ── int ──────────────────────────────────────────────────────────────────────

const INT_SET: &str = r#"
def gothon_{{var_id}}_set(val: int) -> int:
    _sock_{{var_id}}_set_in.send(val.to_bytes(8, 'big', signed=True))
    _sock_{{var_id}}_set_out.recvfrom(1)
    return val"#;

const INT_GET: &str = r#"
def gothon_{{var_id}}_get() -> int:
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(8)
    return int.from_bytes(val_bytes, 'big', signed=True)"#;

const INT_ARITH: &str = r#"
def gothon_{{var_id}}_{{action}}(val: int) -> int:
    _sock_{{var_id}}_{{action}}_in.send(val.to_bytes(8, 'big', signed=True))
    _sock_{{var_id}}_{{action}}_out.recvfrom(1)
    return val"#;

// ── float ────────────────────────────────────────────────────────────────────

const FLOAT_SET: &str = r#"
def gothon_{{var_id}}_set(val: float) -> float:
    _sock_{{var_id}}_set_in.send(struct.pack('<d', val))
    _sock_{{var_id}}_set_out.recvfrom(1)
    return val"#;

const FLOAT_GET: &str = r#"
def gothon_{{var_id}}_get() -> float:
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(8)
    return struct.unpack_from('<d', val_bytes, 0)[0]"#;

const FLOAT_ARITH: &str = r#"
def gothon_{{var_id}}_{{action}}(val: float) -> float:
    _sock_{{var_id}}_{{action}}_in.send(struct.pack('<d', val))
    _sock_{{var_id}}_{{action}}_out.recvfrom(1)
    return val"#;

// ── str ──────────────────────────────────────────────────────────────────────

const STR_SET: &str = r#"
def gothon_{{var_id}}_set(val: str) -> str:
    _sock_{{var_id}}_set_in.send(bytes(val, 'utf-8'))
    _sock_{{var_id}}_set_out.recvfrom(1)
    return val"#;

const STR_GET: &str = r#"
def gothon_{{var_id}}_get() -> str:
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom({{str_max_size}})
    return str(val_bytes, 'utf-8')"#;

const STR_ARITH: &str = r#"
def gothon_{{var_id}}_{{action}}(suffix: str) -> str:
    _sock_{{var_id}}_{{action}}_in.send(bytes(suffix, 'utf-8'))
    _sock_{{var_id}}_{{action}}_out.recvfrom(1)
    return suffix"#;

// ── mutex and wait-group ─────────────────────────────────────────────────────

const MUTEX: &str = r#"
def gothon_{{var_id}}():
    _sock_{{var_id}}_in.send((22).to_bytes(1, 'big'))
    _sock_{{var_id}}_out.recvfrom(1)"#;

const SYNC: &str = r#"
def gothon_{{var_id}}(n: int = 0):
    _sock_{{var_id}}_in.send(n.to_bytes(4, 'big', signed=True))
    _sock_{{var_id}}_out.recvfrom(1)"#;

// ── queue interrogation ──────────────────────────────────────────────────────

const QUEUE_SIZE: &str = r#"
def gothon_{{var_id}}_size() -> int:
    _sock_{{var_id}}_size_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_size_out.recvfrom(8)
    return int.from_bytes(val_bytes, 'big', signed=False)"#;

const QUEUE_EMPTY: &str = r#"
def gothon_{{var_id}}_empty() -> bool:
    _sock_{{var_id}}_empty_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_empty_out.recvfrom(1)
    return val_bytes[0] != 0"#;

const QUEUE_FULL: &str = r#"
def gothon_{{var_id}}_full() -> bool:
    _sock_{{var_id}}_full_in.send((22).to_bytes(1, 'big'))
    val_bytes, _ = _sock_{{var_id}}_full_out.recvfrom(1)
    return val_bytes[0] != 0"#;

// ── queue put/get, per element kind ──────────────────────────────────────────

const BOOL_QUEUE_SET: &str = r#"
def gothon_{{var_id}}_set(val: bool) -> (bool, bool):
    if val:
        _sock_{{var_id}}_set_in.send((1).to_bytes(1, 'big'))
    else:
        _sock_{{var_id}}_set_in.send((0).to_bytes(1, 'big'))
    ok, _ = _sock_{{var_id}}_set_out.recvfrom(1)
    return val, ok[0] == 22"#;

const BOOL_QUEUE_GET: &str = r#"
def gothon_{{var_id}}_get() -> (bool, bool):
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    ok, _ = _sock_{{var_id}}_get_ok.recvfrom(1)
    if ok[0] == 22:
        val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(1)
        return val_bytes[0] != 0, True
    else:
        return False, False"#;

const INT_QUEUE_SET: &str = r#"
def gothon_{{var_id}}_set(val: int) -> (int, bool):
    _sock_{{var_id}}_set_in.send(val.to_bytes(8, 'big', signed=True))
    ok, _ = _sock_{{var_id}}_set_out.recvfrom(1)
    return val, ok[0] == 22"#;

const INT_QUEUE_GET: &str = r#"
def gothon_{{var_id}}_get() -> (int, bool):
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    ok, _ = _sock_{{var_id}}_get_ok.recvfrom(1)
    if ok[0] == 22:
        val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(8)
        return int.from_bytes(val_bytes, 'big', signed=True), True
    else:
        return 0, False"#;

const FLOAT_QUEUE_SET: &str = r#"
def gothon_{{var_id}}_set(val: float) -> (float, bool):
    _sock_{{var_id}}_set_in.send(struct.pack('<d', val))
    ok, _ = _sock_{{var_id}}_set_out.recvfrom(1)
    return val, ok[0] == 22"#;

const FLOAT_QUEUE_GET: &str = r#"
def gothon_{{var_id}}_get() -> (float, bool):
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    ok, _ = _sock_{{var_id}}_get_ok.recvfrom(1)
    if ok[0] == 22:
        val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom(8)
        return struct.unpack_from('<d', val_bytes, 0)[0], True
    else:
        return 0.0, False"#;

const STR_QUEUE_SET: &str = r#"
def gothon_{{var_id}}_set(val: str) -> (str, bool):
    _sock_{{var_id}}_set_in.send(bytes(val, 'utf-8'))
    ok, _ = _sock_{{var_id}}_set_out.recvfrom(1)
    return val, ok[0] == 22"#;

const STR_QUEUE_GET: &str = r#"
def gothon_{{var_id}}_get() -> (str, bool):
    _sock_{{var_id}}_get_in.send((22).to_bytes(1, 'big'))
    ok, _ = _sock_{{var_id}}_get_ok.recvfrom(1)
    if ok[0] == 22:
        val_bytes, _ = _sock_{{var_id}}_get_out.recvfrom({{str_max_size}})
        return str(val_bytes, 'utf-8'), True
    else:
        return "", False"#;

// ── socket setup ─────────────────────────────────────────────────────────────

pub(crate) const SOCKET_INIT: &str = r#"
    _sock_{{var_id}}_{{action}}_in.connect(_addr_{{var_id}}_{{action}}_in)
    _sock_{{var_id}}_{{action}}_out.bind(_addr_{{var_id}}_{{action}}_out)"#;

pub(crate) const SOCKET_INIT_PLAIN: &str = r#"
    _sock_{{var_id}}_in.connect(_addr_{{var_id}}_in)
    _sock_{{var_id}}_out.bind(_addr_{{var_id}}_out)"#;

pub(crate) const SOCKET_INIT_QUEUE_GET_OK: &str = r#"
    _sock_{{var_id}}_get_ok.bind(_addr_{{var_id}}_get_ok)"#;

/// Looks up a helper template by key (`<kind>_<op>`, `<elem>_queue_<op>`,
/// `queue_<interrogation>`, `mutex`, or `sync`).
pub(crate) fn template(key: &str) -> Option<&'static str> {
    Some(match key {
        "bool_set" => BOOL_SET,
        "bool_get" => BOOL_GET,
        "int_set" => INT_SET,
        "int_get" => INT_GET,
        "int_add" | "int_sub" | "int_mul" | "int_div" => INT_ARITH,
        "float_set" => FLOAT_SET,
        "float_get" => FLOAT_GET,
        "float_add" | "float_sub" | "float_mul" | "float_div" => FLOAT_ARITH,
        "str_set" => STR_SET,
        "str_get" => STR_GET,
        "str_add" | "str_sub" => STR_ARITH,
        "mutex" => MUTEX,
        "sync" => SYNC,
        "queue_size" => QUEUE_SIZE,
        "queue_empty" => QUEUE_EMPTY,
        "queue_full" => QUEUE_FULL,
        "bool_queue_set" => BOOL_QUEUE_SET,
        "bool_queue_get" => BOOL_QUEUE_GET,
        "int_queue_set" => INT_QUEUE_SET,
        "int_queue_get" => INT_QUEUE_GET,
        "float_queue_set" => FLOAT_QUEUE_SET,
        "float_queue_get" => FLOAT_QUEUE_GET,
        "str_queue_set" => STR_QUEUE_SET,
        "str_queue_get" => STR_QUEUE_GET,
        _ => return None,
    })
}

/// Substitutes the template placeholders.
pub(crate) fn fill(template: &str, var_id: &str, action: &str) -> String {
    template
        .replace("{{var_id}}", var_id)
        .replace("{{action}}", action)
        .replace("{{str_max_size}}", &config::string_buffer_size().to_string())
}
