//! Bounded in-process byte pipe.
//!
//! The write end batches bytes into chunks and pushes them through a bounded
//! channel; the read end hands them out through `Read`. With `capacity` chunks in
//! flight the writer blocks, which is the only flow control between the pack worker
//! and the HTTP body.

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender};

enum Chunk {
    Data(Vec<u8>),
    /// Clean end of stream.
    Close,
    /// The producer failed; the consumer must not treat the stream as complete.
    Abort(io::ErrorKind, String),
}

/// Creates a pipe holding at most `capacity` chunks of `chunk_size` bytes.
pub fn pipe(capacity: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(capacity.max(1));
    let chunk_size = chunk_size.max(1);
    (
        PipeWriter {
            tx: Some(tx),
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
            state: ReadState::Open,
        },
    )
}

pub struct PipeWriter {
    tx: Option<Sender<Chunk>>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl PipeWriter {
    fn send(&mut self, chunk: Chunk) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;
        tx.send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"))
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.send(Chunk::Data(full))
    }

    /// Flushes buffered bytes and marks a clean end of stream.
    pub fn close(mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.send(Chunk::Close)?;
        self.tx = None;
        Ok(())
    }

    /// Marks the stream as failed; the reader's next `read` returns an error.
    pub fn abort(mut self, kind: io::ErrorKind, msg: impl Into<String>) {
        self.buf.clear();
        // A gone reader already knows the stream is over.
        let _ = self.send(Chunk::Abort(kind, msg.into()));
        self.tx = None;
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadState {
    Open,
    Closed,
    Failed(io::ErrorKind, String),
}

pub struct PipeReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    state: ReadState,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            match &self.state {
                ReadState::Closed => return Ok(0),
                ReadState::Failed(kind, msg) => return Err(io::Error::new(*kind, msg.clone())),
                ReadState::Open => {}
            }
            self.state = match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                    ReadState::Open
                }
                Ok(Chunk::Close) => ReadState::Closed,
                Ok(Chunk::Abort(kind, msg)) => ReadState::Failed(kind, msg),
                Err(_) => ReadState::Failed(
                    io::ErrorKind::UnexpectedEof,
                    "pipe writer dropped without closing".into(),
                ),
            };
        }
        let n = (self.current.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
