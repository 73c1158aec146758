//! Byte stream abstraction over the underlying duplex transport.
//!
//! The engine never owns a socket: it is written against [`ByteStream`], a
//! cooperative, non-blocking read/write pair. `WouldBlock` outcomes are the
//! only suspension points; the caller retries when the transport is ready.
//!
//! With the `std` feature, [`duplex`] builds an in-memory pipe pair so a
//! client and a server session can be wired together in a single thread.

use crate::error::Error;

/// Outcome of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the front of the buffer.
    Data(usize),
    /// No data available right now.
    WouldBlock,
    /// The peer closed the stream; no more data will arrive.
    Eof,
}

/// Outcome of a non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `n` bytes were accepted (may be fewer than offered).
    Wrote(usize),
    /// The transport cannot accept data right now.
    WouldBlock,
}

/// A duplex byte transport supplied by the caller.
///
/// Both calls must never block: report `WouldBlock` instead. Transport
/// faults (reset, broken pipe) are `Err(Error::Transport)` and are fatal to
/// the session using the stream.
pub trait ByteStream {
    /// Read up to `buf.len()` bytes into the front of `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error>;

    /// Write bytes from `buf`, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<WriteOutcome, Error>;
}

#[cfg(feature = "std")]
mod pipe {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::{ByteStream, ReadOutcome, WriteOutcome};
    use crate::error::Error;

    struct PipeCore {
        queue: VecDeque<u8>,
        capacity: usize,
        closed: bool,
        faulted: bool,
    }

    impl PipeCore {
        fn new(capacity: usize) -> Self {
            PipeCore {
                queue: VecDeque::new(),
                capacity,
                closed: false,
                faulted: false,
            }
        }
    }

    /// One end of an in-memory duplex byte pipe.
    ///
    /// Dropping an end closes its outgoing direction: once the peer drains
    /// the queue it reads `Eof`.
    pub struct PipeEnd {
        incoming: Rc<RefCell<PipeCore>>,
        outgoing: Rc<RefCell<PipeCore>>,
    }

    /// Create a connected pipe pair. Each direction buffers at most
    /// `capacity` bytes; writes beyond that report `WouldBlock`.
    pub fn duplex(capacity: usize) -> (PipeEnd, PipeEnd) {
        let a_to_b = Rc::new(RefCell::new(PipeCore::new(capacity)));
        let b_to_a = Rc::new(RefCell::new(PipeCore::new(capacity)));
        (
            PipeEnd {
                incoming: Rc::clone(&b_to_a),
                outgoing: Rc::clone(&a_to_b),
            },
            PipeEnd {
                incoming: a_to_b,
                outgoing: b_to_a,
            },
        )
    }

    impl PipeEnd {
        /// Close the outgoing direction; the peer sees `Eof` after draining.
        pub fn close(&self) {
            self.outgoing.borrow_mut().closed = true;
        }

        /// Poison both directions so every further read/write fails with
        /// `Error::Transport`. Simulates a reset connection.
        pub fn fail(&self) {
            self.incoming.borrow_mut().faulted = true;
            self.outgoing.borrow_mut().faulted = true;
        }

        /// Bytes currently queued toward this end.
        pub fn pending(&self) -> usize {
            self.incoming.borrow().queue.len()
        }
    }

    impl Drop for PipeEnd {
        fn drop(&mut self) {
            self.outgoing.borrow_mut().closed = true;
        }
    }

    impl ByteStream for PipeEnd {
        fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
            let mut core = self.incoming.borrow_mut();
            if core.faulted {
                return Err(Error::Transport);
            }
            if core.queue.is_empty() {
                if core.closed {
                    return Ok(ReadOutcome::Eof);
                }
                return Ok(ReadOutcome::WouldBlock);
            }
            let n = buf.len().min(core.queue.len());
            for (slot, byte) in buf.iter_mut().zip(core.queue.drain(..n)) {
                *slot = byte;
            }
            Ok(ReadOutcome::Data(n))
        }

        fn write(&mut self, buf: &[u8]) -> Result<WriteOutcome, Error> {
            let mut core = self.outgoing.borrow_mut();
            if core.faulted {
                return Err(Error::Transport);
            }
            if core.closed {
                return Err(Error::Transport);
            }
            let room = core.capacity - core.queue.len();
            if room == 0 && !buf.is_empty() {
                return Ok(WriteOutcome::WouldBlock);
            }
            let n = room.min(buf.len());
            core.queue.extend(&buf[..n]);
            Ok(WriteOutcome::Wrote(n))
        }
    }
}

#[cfg(feature = "std")]
pub use pipe::{duplex, PipeEnd};
