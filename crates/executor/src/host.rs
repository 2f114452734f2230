//! The executor's capability bag (spec §4.6): a WASM module sees exactly
//! `read_input`, `write_output`, and `log` under module `env`. No ambient
//! filesystem, network, clock, or environment import is ever linked in —
//! anything a module needs has to cross through one of these three calls.

use wasmtime::{Caller, Linker, Memory, StoreLimits};

use neuro_protocol::job::ResourceLimits;

pub struct HostState {
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub limits: ResourceLimits,
    pub store_limits: StoreLimits,
    pub logs: Vec<String>,
}

impl HostState {
    pub fn new(input: Vec<u8>, limits: ResourceLimits, store_limits: StoreLimits) -> Self {
        HostState { input, output: Vec::new(), io_read_bytes: 0, io_write_bytes: 0, limits, store_limits, logs: Vec::new() }
    }
}

fn memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, anyhow::Error> {
    caller.get_export("memory").and_then(|e| e.into_memory()).ok_or_else(|| anyhow::anyhow!("module does not export linear memory"))
}

/// `read_input(ptr, max_len) -> bytes_written`. Copies as much of the job's
/// input slice as fits in `max_len`, starting at offset 0 — a module that
/// wants the whole input calls this once with a buffer sized to its manifest
/// slice length.
fn read_input(mut caller: Caller<'_, HostState>, ptr: i32, max_len: i32) -> Result<i32, anyhow::Error> {
    let mem = memory(&mut caller)?;
    let state = caller.data();
    let n = state.input.len().min(max_len.max(0) as usize);
    let requested = state.io_read_bytes + n as u64;
    if requested > state.limits.io_read_bytes {
        anyhow::bail!("io_limit_exceeded: read");
    }
    let chunk = state.input[..n].to_vec();
    mem.write(&mut caller, ptr as usize, &chunk)?;
    caller.data_mut().io_read_bytes = requested;
    Ok(n as i32)
}

/// `write_output(ptr, len) -> 0`. Appends `len` bytes read from module
/// memory at `ptr` to the job's output buffer.
fn write_output(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<i32, anyhow::Error> {
    let mem = memory(&mut caller)?;
    let len = len.max(0) as usize;
    let mut buf = vec![0u8; len];
    mem.read(&caller, ptr as usize, &mut buf)?;
    let state = caller.data();
    let requested = state.io_write_bytes + len as u64;
    if requested > state.limits.io_write_bytes {
        anyhow::bail!("io_limit_exceeded: write");
    }
    let data = caller.data_mut();
    data.io_write_bytes = requested;
    data.output.extend_from_slice(&buf);
    Ok(0)
}

/// `log(ptr, len)`. Best-effort diagnostic string, never part of the job's
/// committed output and never counted against the IO budget.
fn log(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<(), anyhow::Error> {
    let mem = memory(&mut caller)?;
    let len = (len.max(0) as usize).min(4096);
    let mut buf = vec![0u8; len];
    mem.read(&caller, ptr as usize, &mut buf)?;
    let line = String::from_utf8_lossy(&buf).into_owned();
    tracing::debug!(target: "neuro_executor::wasm", "{}", line);
    caller.data_mut().logs.push(line);
    Ok(())
}

pub fn link_capabilities(linker: &mut Linker<HostState>) -> Result<(), anyhow::Error> {
    linker.func_wrap("env", "read_input", read_input)?;
    linker.func_wrap("env", "write_output", write_output)?;
    linker.func_wrap("env", "log", log)?;
    Ok(())
}
