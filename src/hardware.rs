//! Hardware registers: polymorphic I/O endpoints attached to nodes.
//!
//! Each register lives in the network's hardware arena and records its host
//! node; the engine rejects access from an exa standing anywhere else. The
//! kinds mirror the `.reg` directive: sink, stdout, stderr, stdin, rand,
//! file_in, file_out. Reads default to Number 0 and writes default to a
//! no-op, so each kind only overrides the half it cares about.

use crate::value::{parse_token, Value};
use rand_mt::Mt64;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// A hardware register and the node index it is wired to.
#[derive(Debug)]
pub struct Hardware {
    pub(crate) name: String,
    pub(crate) host: usize,
    kind: HardwareKind,
}

#[derive(Debug)]
enum HardwareKind {
    /// Discards writes, reads 0.
    Sink,
    Stdout,
    Stderr,
    Stdin,
    /// Deterministic PRNG with its own seed.
    Rand(Mt64),
    /// Whitespace tokens drawn from a file; 0 once exhausted.
    FileIn(VecDeque<Value>),
    FileOut(BufWriter<fs::File>),
}

impl Hardware {
    pub(crate) fn sink(name: String, host: usize) -> Self {
        Self {
            name,
            host,
            kind: HardwareKind::Sink,
        }
    }

    pub(crate) fn stdout(name: String, host: usize) -> Self {
        Self {
            name,
            host,
            kind: HardwareKind::Stdout,
        }
    }

    pub(crate) fn stderr(name: String, host: usize) -> Self {
        Self {
            name,
            host,
            kind: HardwareKind::Stderr,
        }
    }

    pub(crate) fn stdin(name: String, host: usize) -> Self {
        Self {
            name,
            host,
            kind: HardwareKind::Stdin,
        }
    }

    pub(crate) fn rand(name: String, host: usize, seed: u64) -> Self {
        Self {
            name,
            host,
            kind: HardwareKind::Rand(Mt64::new(seed)),
        }
    }

    /// Reads and tokenizes the whole backing file up front so later reads
    /// cannot fail.
    pub(crate) fn file_in(name: String, host: usize, path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let tokens = text
            .split_whitespace()
            .map(|token| parse_token(token.to_string()))
            .collect();
        Ok(Self {
            name,
            host,
            kind: HardwareKind::FileIn(tokens),
        })
    }

    pub(crate) fn file_out(name: String, host: usize, path: &Path) -> io::Result<Self> {
        let file = fs::File::create(path)?;
        Ok(Self {
            name,
            host,
            kind: HardwareKind::FileOut(BufWriter::new(file)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one value; Number 0 unless the kind overrides.
    pub(crate) fn read(&mut self) -> Value {
        match &mut self.kind {
            HardwareKind::Stdin => match read_token(&mut io::stdin().lock()) {
                Some(token) => parse_token(token),
                None => Value::String(String::new()),
            },
            HardwareKind::Rand(rng) => Value::Number(rng.next_u64() as i64),
            HardwareKind::FileIn(tokens) => tokens.pop_front().unwrap_or(Value::Number(0)),
            _ => Value::Number(0),
        }
    }

    /// Writes one value; a no-op unless the kind overrides. Stream errors
    /// are swallowed like the original's unchecked streams.
    pub(crate) fn write(&mut self, value: &Value) {
        match &mut self.kind {
            HardwareKind::Stdout => print!("{value}"),
            HardwareKind::Stderr => eprint!("{value}"),
            HardwareKind::FileOut(stream) => {
                let _ = write!(stream, "{value}");
                let _ = stream.flush();
            }
            _ => {}
        }
    }
}

/// Pulls the next whitespace-delimited token from a buffered reader, or
/// `None` at end of input.
fn read_token<R: BufRead>(reader: &mut R) -> Option<String> {
    let mut token = String::new();

    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(_) => break,
        };
        if buf.is_empty() {
            break;
        }

        let mut consumed = 0;
        for &b in buf {
            if b.is_ascii_whitespace() {
                if token.is_empty() {
                    consumed += 1;
                    continue;
                }
                break;
            }
            token.push(b as char);
            consumed += 1;
        }

        let done = consumed < buf.len();
        reader.consume(consumed);
        if done && !token.is_empty() {
            break;
        }
    }

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::temp_path;

    #[test]
    fn sink_reads_zero_and_swallows_writes() {
        let mut hw = Hardware::sink("#null".to_string(), 0);
        hw.write(&Value::Number(5));
        assert_eq!(hw.read(), Value::Number(0));
    }

    #[test]
    fn rand_is_deterministic_per_seed() {
        let mut a = Hardware::rand("#r".to_string(), 0, 99);
        let mut b = Hardware::rand("#r".to_string(), 0, 99);
        for _ in 0..4 {
            assert_eq!(a.read(), b.read());
        }
    }

    #[test]
    fn file_in_tokens_then_zero() {
        let path = temp_path("file_in");
        fs::write(&path, "5 hello -2\n").unwrap();
        let mut hw = Hardware::file_in("#in".to_string(), 0, &path).unwrap();
        assert_eq!(hw.read(), Value::Number(5));
        assert_eq!(hw.read(), Value::String("hello".to_string()));
        assert_eq!(hw.read(), Value::Number(-2));
        assert_eq!(hw.read(), Value::Number(0));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_out_streams_text() {
        let path = temp_path("file_out");
        {
            let mut hw = Hardware::file_out("#out".to_string(), 0, &path).unwrap();
            hw.write(&Value::Number(12));
            hw.write(&Value::String("x".to_string()));
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "12x");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_in_missing_path_errors() {
        let path = temp_path("no_such_file_in");
        assert!(Hardware::file_in("#in".to_string(), 0, &path).is_err());
    }

    #[test]
    fn read_token_splits_on_whitespace() {
        let mut input = io::Cursor::new("  12\tfoo\nbar");
        assert_eq!(read_token(&mut input), Some("12".to_string()));
        assert_eq!(read_token(&mut input), Some("foo".to_string()));
        assert_eq!(read_token(&mut input), Some("bar".to_string()));
        assert_eq!(read_token(&mut input), None);
    }
}
