//! Shared fixtures for the integration tests: hand-encoded ARM2 words and a
//! VM wired to capturing console sinks.

// Each test binary uses its own slice of these helpers
#![allow(dead_code)]

pub mod asm;

use std::io::Cursor;

use armature::devices::vm::Vm;
use armature::host::{Host, SharedBuf};

/// Build a VM around the given program image, with stdout/stderr captured
/// and stdin primed from a byte string.
pub fn capture_vm(image: &[u8], stdin: &[u8]) -> (Vm, SharedBuf, SharedBuf) {
    let out = SharedBuf::new();
    let err = SharedBuf::new();
    let host = Host::new()
        .with_stdout(Box::new(out.clone()))
        .with_stderr(Box::new(err.clone()))
        .with_stdin(Box::new(Cursor::new(stdin.to_vec())))
        .with_seed(1);
    let mut vm = Vm::new(host);
    vm.load(image, None, None).expect("program image fits in the code segment");
    vm.set_cycle_limit(1_000_000);
    (vm, out, err)
}

/// Flatten words to the little-endian byte image the loader expects.
pub fn image(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Words plus a trailing byte blob (string constants, arrays).
pub fn image_with_tail(words: &[u32], tail: &[u8]) -> Vec<u8> {
    let mut bytes = image(words);
    bytes.extend_from_slice(tail);
    bytes
}
