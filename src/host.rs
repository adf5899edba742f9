//! The host side of the service interface: byte sinks and sources for the
//! console, a wall clock, a random source, guest arguments, and a sandboxed
//! filesystem with its descriptor table.
//!
//! Everything here is per-VM. In particular the buffered stdin reader must
//! not be process-global: two VMs on different threads sharing one reader
//! would race over the buffered bytes.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Trait for an object that owns a host context.
pub trait WithHost {
    fn host(&self) -> &Host;
    fn host_mut(&mut self) -> &mut Host;
}

/// Largest single READ/WRITE transfer a file service will perform.
pub const MAX_TRANSFER: u32 = 1 << 20;
/// Open-file ceiling for the descriptor table.
pub const MAX_OPEN_FILES: usize = 1024;
/// First descriptor handed to guest OPEN calls; 0..2 are the std streams.
pub const FIRST_USER_FD: u32 = 3;

/// Why a file service refused to act. All of these are expected failures:
/// the guest gets an error code and keeps running.
#[derive(Debug)]
pub enum FsError {
    /// No sandbox configured, or the path escaped it
    Sandbox(String),
    /// Descriptor table full
    TooManyFiles,
    /// Unknown open mode or bad descriptor
    BadRequest,
    Io(io::Error),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> FsError {
        FsError::Io(err)
    }
}

struct FdTable {
    next_fd: u32,
    open: HashMap<u32, File>,
}

impl FdTable {
    fn new() -> FdTable {
        FdTable {
            next_fd: FIRST_USER_FD,
            open: HashMap::new(),
        }
    }
}

struct Xorshift(u32);

impl Xorshift {
    fn seeded(seed: u32) -> Xorshift {
        // xorshift must not start at zero
        Xorshift(if seed == 0 { 0x2545_F491 } else { seed })
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

pub struct Host {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
    stdin: Box<dyn BufRead + Send>,
    clock: Box<dyn FnMut() -> u64 + Send>,
    rng: Xorshift,
    args: Vec<String>,
    env: Vec<(String, String)>,
    sandbox: Option<PathBuf>,
    // The host may perform its own I/O from other threads; keep the
    // descriptor table behind a per-VM lock.
    files: Mutex<FdTable>,
    /// Error cell backing GET_ERROR/SET_ERROR/PRINT_ERROR.
    pub last_error: u32,
    pub last_error_text: Option<String>,
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Host {
    /// Host bound to the real std streams, with no filesystem sandbox (every
    /// OPEN is refused until [`Host::with_sandbox`] configures a root).
    pub fn new() -> Host {
        Host {
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
            stdin: Box::new(BufReader::new(io::stdin())),
            clock: Box::new(epoch_ms),
            rng: Xorshift::seeded(epoch_ms() as u32),
            args: Vec::new(),
            env: Vec::new(),
            sandbox: None,
            files: Mutex::new(FdTable::new()),
            last_error: 0,
            last_error_text: None,
        }
    }

    //region Builders

    pub fn with_stdout(mut self, sink: Box<dyn Write + Send>) -> Host {
        self.stdout = sink;
        self
    }

    pub fn with_stderr(mut self, sink: Box<dyn Write + Send>) -> Host {
        self.stderr = sink;
        self
    }

    pub fn with_stdin(mut self, source: Box<dyn BufRead + Send>) -> Host {
        self.stdin = source;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn FnMut() -> u64 + Send>) -> Host {
        self.clock = clock;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Host {
        self.rng = Xorshift::seeded(seed);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Host {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Host {
        self.env = env;
        self
    }

    pub fn with_sandbox(mut self, root: PathBuf) -> Host {
        self.sandbox = Some(root);
        self
    }

    //endregion

    //region Console

    pub fn write_out(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stdout.write_all(bytes)?;
        self.stdout.flush()
    }

    pub fn write_err(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stderr.write_all(bytes)?;
        self.stderr.flush()
    }

    /// One byte from stdin; None at end of input.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.stdin.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    /// One line from stdin with the trailing CR/LF trimmed; None at EOF.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stdin.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    //endregion

    //region Clock, random, arguments

    pub fn now_ms(&mut self) -> u64 {
        (self.clock)()
    }

    pub fn random(&mut self) -> u32 {
        self.rng.next()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    //endregion

    //region Sandboxed filesystem

    /// Lexical cleanup: split on separators, drop `.` and empty components.
    /// `..` survives so the caller can reject it component-wise.
    fn clean(raw: &str) -> Vec<&str> {
        raw.split(|ch: char| ch == '/' || ch == '\\')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect()
    }

    /// Map a guest path into the sandbox, refusing `..` components and
    /// symlink escapes. Returns the canonical host path.
    fn resolve(&self, raw: &str) -> Result<PathBuf, FsError> {
        let root = self
            .sandbox
            .as_ref()
            .ok_or_else(|| FsError::Sandbox("no sandbox root configured".into()))?;
        let components = Host::clean(raw);
        if components.is_empty() {
            return Err(FsError::Sandbox(format!("empty path {:?}", raw)));
        }
        // Component-based check: `foo..bar` is a legitimate name, a literal
        // `..` is not
        if components.iter().any(|c| *c == "..") {
            return Err(FsError::Sandbox(format!(
                "parent traversal in {:?}",
                raw
            )));
        }
        let root = root.canonicalize().map_err(FsError::Io)?;
        let mut joined = root.clone();
        joined.extend(components.iter().map(Path::new));
        // The file itself may not exist yet (write/append modes); resolve
        // symlinks through the parent and re-attach the final name.
        let canonical = match joined.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                let parent = joined.parent().ok_or(FsError::BadRequest)?;
                let name = joined.components().next_back().ok_or(FsError::BadRequest)?;
                match name {
                    Component::Normal(name) => {
                        parent.canonicalize().map_err(FsError::Io)?.join(name)
                    }
                    _ => return Err(FsError::BadRequest),
                }
            }
        };
        if !canonical.starts_with(&root) {
            return Err(FsError::Sandbox(format!(
                "{:?} resolves outside the sandbox",
                raw
            )));
        }
        Ok(canonical)
    }

    /// Open a file inside the sandbox. Mode 0 = read, 1 = write (create and
    /// truncate), 2 = append.
    pub fn fs_open(&mut self, raw: &str, mode: u32) -> Result<u32, FsError> {
        let path = self.resolve(raw)?;
        let file = match mode {
            0 => OpenOptions::new().read(true).open(&path)?,
            1 => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?,
            2 => OpenOptions::new().append(true).create(true).open(&path)?,
            _ => return Err(FsError::BadRequest),
        };
        let mut table = self.files.lock().unwrap();
        if table.open.len() >= MAX_OPEN_FILES {
            return Err(FsError::TooManyFiles);
        }
        let fd = table.next_fd;
        table.next_fd += 1;
        table.open.insert(fd, file);
        Ok(fd)
    }

    pub fn fs_close(&mut self, fd: u32) -> Result<(), FsError> {
        let mut table = self.files.lock().unwrap();
        table.open.remove(&fd).map(drop).ok_or(FsError::BadRequest)
    }

    /// Read up to `len` bytes. Descriptor 0 drains the console source; 1 and
    /// 2 are not readable.
    pub fn fs_read(&mut self, fd: u32, len: u32) -> Result<Vec<u8>, FsError> {
        if len > MAX_TRANSFER {
            return Err(FsError::BadRequest);
        }
        let mut buf = vec![0u8; len as usize];
        let n = match fd {
            0 => self.stdin.read(&mut buf)?,
            1 | 2 => return Err(FsError::BadRequest),
            _ => {
                let mut table = self.files.lock().unwrap();
                let file = table.open.get_mut(&fd).ok_or(FsError::BadRequest)?;
                file.read(&mut buf)?
            }
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Write the buffer. Descriptors 1 and 2 go to the console sinks.
    pub fn fs_write(&mut self, fd: u32, bytes: &[u8]) -> Result<u32, FsError> {
        if bytes.len() as u32 > MAX_TRANSFER {
            return Err(FsError::BadRequest);
        }
        match fd {
            0 => Err(FsError::BadRequest),
            1 => {
                self.write_out(bytes)?;
                Ok(bytes.len() as u32)
            }
            2 => {
                self.write_err(bytes)?;
                Ok(bytes.len() as u32)
            }
            _ => {
                let mut table = self.files.lock().unwrap();
                let file = table.open.get_mut(&fd).ok_or(FsError::BadRequest)?;
                file.write_all(bytes)?;
                Ok(bytes.len() as u32)
            }
        }
    }

    /// Seek; whence 0 = set, 1 = current, 2 = end. Results outside the
    /// 32-bit range (or negative) are refused.
    pub fn fs_seek(&mut self, fd: u32, offset: i64, whence: u32) -> Result<u32, FsError> {
        let from = match whence {
            0 => {
                if offset < 0 {
                    return Err(FsError::BadRequest);
                }
                SeekFrom::Start(offset as u64)
            }
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return Err(FsError::BadRequest),
        };
        let mut table = self.files.lock().unwrap();
        let file = table.open.get_mut(&fd).ok_or(FsError::BadRequest)?;
        let pos = file.seek(from)?;
        u32::try_from(pos).map_err(|_| FsError::BadRequest)
    }

    pub fn fs_tell(&mut self, fd: u32) -> Result<u32, FsError> {
        let mut table = self.files.lock().unwrap();
        let file = table.open.get_mut(&fd).ok_or(FsError::BadRequest)?;
        let pos = file.stream_position()?;
        u32::try_from(pos).map_err(|_| FsError::BadRequest)
    }

    pub fn fs_size(&mut self, fd: u32) -> Result<u32, FsError> {
        let table = self.files.lock().unwrap();
        let file = table.open.get(&fd).ok_or(FsError::BadRequest)?;
        let len = file.metadata().map_err(FsError::Io)?.len();
        u32::try_from(len).map_err(|_| FsError::BadRequest)
    }

    //endregion
}

impl Default for Host {
    fn default() -> Host {
        Host::new()
    }
}

/// Clonable in-memory sink, handy for capturing guest output in tests and
/// embedding scenarios.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> SharedBuf {
        SharedBuf::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn into_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_is_component_based() {
        assert_eq!(Host::clean("a//b/./c"), vec!["a", "b", "c"]);
        assert_eq!(Host::clean("/a/b"), vec!["a", "b"]);
        assert_eq!(Host::clean("foo..bar"), vec!["foo..bar"]);
        assert_eq!(Host::clean("a/../b"), vec!["a", "..", "b"]);
    }

    #[test]
    fn open_without_sandbox_is_refused() {
        let mut host = Host::new();
        assert!(matches!(
            host.fs_open("anything.txt", 0),
            Err(FsError::Sandbox(_))
        ));
    }

    #[test]
    fn parent_traversal_is_refused() {
        let mut host = Host::new().with_sandbox(std::env::temp_dir());
        assert!(matches!(
            host.fs_open("../etc/passwd", 0),
            Err(FsError::Sandbox(_))
        ));
        assert!(matches!(
            host.fs_open("a/../../x", 0),
            Err(FsError::Sandbox(_))
        ));
    }

    #[test]
    fn shared_buf_captures_writes() {
        let buf = SharedBuf::new();
        let mut sink = buf.clone();
        sink.write_all(b"hi").unwrap();
        assert_eq!(buf.into_string(), "hi");
    }

    #[test]
    fn rng_is_deterministic_per_seed() {
        let mut a = Xorshift::seeded(42);
        let mut b = Xorshift::seeded(42);
        assert_eq!(a.next(), b.next());
        let mut zero = Xorshift::seeded(0);
        assert_ne!(zero.next(), 0);
    }

    #[test]
    fn read_line_trims_crlf() {
        let mut host = Host::new().with_stdin(Box::new(io::Cursor::new(b"abc\r\ndef\n".to_vec())));
        assert_eq!(host.read_line().unwrap().unwrap(), "abc");
        assert_eq!(host.read_line().unwrap().unwrap(), "def");
        assert_eq!(host.read_line().unwrap(), None);
    }
}
