//! Synchronous in-memory byte pipe
//!
//! [`pipe`] connects a [`PipeReader`] and a [`PipeWriter`]: each write blocks
//! until one or more reads have consumed it in full, with no internal
//! buffering. Either side may close, once, optionally with an error; the
//! other side observes that error (or [`Error::ClosedPipe`]/[`Error::Eof`])
//! from then on.
//!
//! The pipe is two rendezvous channels (data one way, consumed-byte acks the
//! other) plus a done channel every operation `select`s against.

use std::sync::Arc;

use parking_lot::{Mutex, Once};
use thiserror::Error as ThisError;
use tracing::trace;

use crate::{
    chan::Chan,
    select::{default_case, select},
};

/// Pipe error values. `Eof` is the clean end-of-stream a reader sees after
/// the writer closes without an error.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("read/write on closed pipe")]
    ClosedPipe,
    #[error("EOF")]
    Eof,
    #[error("{0}")]
    Other(String),
}

/// The first error stored wins; later stores are ignored.
struct OnceError(Mutex<Option<Error>>);

impl OnceError {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn store(&self, err: Error) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn load(&self) -> Option<Error> {
        self.0.lock().clone()
    }
}

struct Pipe {
    /// Serializes concurrent writers so their chunks do not interleave.
    wr_mu: Mutex<()>,
    wr_chan: Chan<Vec<u8>>,
    rd_chan: Chan<usize>,
    once: Once,
    done: Chan<()>,
    rd_err: OnceError,
    wr_err: OnceError,
}

impl Pipe {
    fn read(&self, b: &mut [u8]) -> Result<usize, Error> {
        let mut d = None;
        if select(&mut [self.done.recv_case(&mut d), default_case()]) == 0 {
            return Err(self.read_close_error());
        }

        let mut bw: Option<Vec<u8>> = None;
        let mut d = None;
        match select(&mut [
            self.wr_chan.recv_case(&mut bw),
            self.done.recv_case(&mut d),
        ]) {
            0 => {
                let bw = bw.expect("write channel is never closed");
                let n = bw.len().min(b.len());
                b[..n].copy_from_slice(&bw[..n]);
                self.rd_chan.send(n);
                Ok(n)
            }
            _ => Err(self.read_close_error()),
        }
    }

    fn write(&self, b: &[u8]) -> Result<usize, Error> {
        let mut d = None;
        if select(&mut [self.done.recv_case(&mut d), default_case()]) == 0 {
            return Err(self.write_close_error());
        }

        let _writers = self.wr_mu.lock();
        let mut written = 0;
        let mut rest = b;
        let mut once = true;
        // One round even for an empty write, then until drained
        while once || !rest.is_empty() {
            once = false;
            let mut chunk = Some(rest.to_vec());
            let mut d = None;
            match select(&mut [
                self.wr_chan.send_case(&mut chunk),
                self.done.recv_case(&mut d),
            ]) {
                0 => {
                    let nw = self.rd_chan.recv().expect("ack channel is never closed");
                    rest = &rest[nw..];
                    written += nw;
                }
                _ => return Err(self.write_close_error()),
            }
        }
        Ok(written)
    }

    fn close_read(&self, err: Option<Error>) {
        self.rd_err.store(err.unwrap_or(Error::ClosedPipe));
        self.once.call_once(|| {
            trace!(target: "runnel::pipe", "pipe closed by reader");
            self.done.close();
        });
    }

    fn close_write(&self, err: Option<Error>) {
        self.wr_err.store(err.unwrap_or(Error::Eof));
        self.once.call_once(|| {
            trace!(target: "runnel::pipe", "pipe closed by writer");
            self.done.close();
        });
    }

    /// What a read reports once the pipe is down: whatever the writer
    /// stored, unless this side closed first.
    fn read_close_error(&self) -> Error {
        if self.rd_err.load().is_none() {
            if let Some(err) = self.wr_err.load() {
                return err;
            }
        }
        Error::ClosedPipe
    }

    fn write_close_error(&self) -> Error {
        if self.wr_err.load().is_none() {
            if let Some(err) = self.rd_err.load() {
                return err;
            }
        }
        Error::ClosedPipe
    }
}

/// The reading half of a [`pipe`].
pub struct PipeReader {
    p: Arc<Pipe>,
}

impl PipeReader {
    /// Blocks until a write arrives or the pipe closes, then copies up to
    /// `b.len()` bytes and acknowledges them to the writer.
    pub fn read(&self, b: &mut [u8]) -> Result<usize, Error> {
        self.p.read(b)
    }

    /// Closes the pipe; later writes fail with [`Error::ClosedPipe`].
    pub fn close(&self) {
        self.p.close_read(None);
    }

    /// Closes the pipe; later writes fail with `err`.
    pub fn close_with_error(&self, err: Error) {
        self.p.close_read(Some(err));
    }
}

/// The writing half of a [`pipe`].
pub struct PipeWriter {
    p: Arc<Pipe>,
}

impl PipeWriter {
    /// Blocks until readers have consumed all of `b` or the pipe closes.
    pub fn write(&self, b: &[u8]) -> Result<usize, Error> {
        self.p.write(b)
    }

    /// Closes the pipe; later reads fail with [`Error::Eof`].
    pub fn close(&self) {
        self.p.close_write(None);
    }

    /// Closes the pipe; later reads fail with `err`.
    pub fn close_with_error(&self, err: Error) {
        self.p.close_write(Some(err));
    }
}

/// A connected synchronous pipe pair.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let p = Arc::new(Pipe {
        wr_mu: Mutex::new(()),
        wr_chan: Chan::new(0),
        rd_chan: Chan::new(0),
        once: Once::new(),
        done: Chan::new(0),
        rd_err: OnceError::new(),
        wr_err: OnceError::new(),
    });
    (PipeReader { p: Arc::clone(&p) }, PipeWriter { p })
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    /// A single write is read back whole
    #[test]
    fn test_single_write_read() {
        let (r, w) = pipe();
        let t = thread::spawn(move || {
            let n = w.write(b"hello, world").unwrap();
            w.close();
            n
        });
        let mut buf = [0u8; 64];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[..n], b"hello, world");
        assert_eq!(t.join().unwrap(), 12);
        assert_eq!(r.read(&mut buf), Err(Error::Eof));
    }

    /// A sequence of writes arrives in order, one read each
    #[test]
    fn test_sequence() {
        let (r, w) = pipe();
        let t = thread::spawn(move || {
            for i in 0..5u8 {
                assert_eq!(w.write(&[i; 3]).unwrap(), 3);
            }
            w.close();
        });
        let mut buf = [0u8; 16];
        for i in 0..5u8 {
            let n = r.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], &[i; 3]);
        }
        assert_eq!(r.read(&mut buf), Err(Error::Eof));
        t.join().unwrap();
    }

    /// A large write drains through several small reads
    #[test]
    fn test_write_larger_than_reads() {
        let (r, w) = pipe();
        let data: Vec<u8> = (0..24).collect();
        let expect = data.clone();
        let t = thread::spawn(move || w.write(&data).unwrap());
        let mut got = Vec::new();
        let mut buf = [0u8; 8];
        while got.len() < 24 {
            let n = r.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(t.join().unwrap(), 24);
        assert_eq!(got, expect);
    }

    /// An empty write completes one round and returns zero
    #[test]
    fn test_empty_write() {
        let (r, w) = pipe();
        let t = thread::spawn(move || w.write(&[]).unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(t.join().unwrap(), 0);
    }

    /// Writes after a reader close report the reader's stored error
    #[test]
    fn test_write_after_reader_close() {
        let (r, w) = pipe();
        r.close();
        assert_eq!(w.write(b"x"), Err(Error::ClosedPipe));

        let (r, w) = pipe();
        r.close_with_error(Error::Other("boom".into()));
        assert_eq!(w.write(b"x"), Err(Error::Other("boom".into())));
    }

    /// Reads after this side's own close report a closed pipe, not EOF
    #[test]
    fn test_read_after_own_close() {
        let (r, w) = pipe();
        r.close();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Err(Error::ClosedPipe));
        drop(w);
    }

    /// Closing mid-write unblocks the writer with the close error
    #[test]
    fn test_close_unblocks_writer() {
        let (r, w) = pipe();
        let t = thread::spawn(move || w.write(b"stuck"));
        thread::sleep(std::time::Duration::from_millis(10));
        r.close();
        assert_eq!(t.join().unwrap(), Err(Error::ClosedPipe));
    }

    /// Closing mid-read unblocks the reader
    #[test]
    fn test_close_unblocks_reader() {
        let (r, w) = pipe();
        let t = thread::spawn(move || {
            let mut buf = [0u8; 4];
            r.read(&mut buf)
        });
        thread::sleep(std::time::Duration::from_millis(10));
        w.close_with_error(Error::Other("gone".into()));
        assert_eq!(t.join().unwrap(), Err(Error::Other("gone".into())));
    }

    /// The first close on each side wins; the error does not change later
    #[test]
    fn test_first_error_sticks() {
        let (r, w) = pipe();
        w.close_with_error(Error::Other("first".into()));
        w.close_with_error(Error::Other("second".into()));
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Err(Error::Other("first".into())));
    }
}
