//! Transport boundary for ATT connections
//!
//! ATT runs over a connection-oriented, reliable, ordered channel that
//! preserves frame boundaries - in practice an L2CAP channel bound to the ATT
//! fixed channel (LE) or the ATT PSM (BR/EDR). This module defines the trait
//! an [`crate::att::AttConnection`] drives, plus an in-process pipe transport
//! used by the tests and demo programs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// L2CAP channel identifier for the ATT fixed channel.
pub const ATT_CID: u16 = 0x0004;

/// Protocol/Service Multiplexer for ATT over BR/EDR.
pub const ATT_PSM: u16 = 31;

/// An ordered, reliable, frame-preserving byte channel.
///
/// One call to `send` carries exactly one ATT PDU; one call to `receive`
/// yields exactly one. `receive` may block until a frame arrives, or return
/// `io::ErrorKind::WouldBlock` for non-blocking implementations; either way
/// the driver loop owns the retry/teardown policy.
pub trait Transport {
    /// Send one PDU.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Receive one PDU of at most `max_len` bytes.
    fn receive(&mut self, max_len: usize) -> io::Result<Vec<u8>>;
}

/// One endpoint of an in-process transport pair.
///
/// Frames written to one endpoint are read from the other, in order.
/// Receiving from an empty pipe returns `WouldBlock` rather than blocking,
/// which fits the "drain writes, then read" driver loops the tests use.
pub struct PipeTransport {
    incoming: Rc<RefCell<VecDeque<Vec<u8>>>>,
    outgoing: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

/// Creates a connected pair of in-process transports.
pub fn pipe() -> (PipeTransport, PipeTransport) {
    let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a = Rc::new(RefCell::new(VecDeque::new()));

    let a = PipeTransport {
        incoming: b_to_a.clone(),
        outgoing: a_to_b.clone(),
    };
    let b = PipeTransport {
        incoming: a_to_b,
        outgoing: b_to_a,
    };

    (a, b)
}

impl PipeTransport {
    /// Number of frames waiting to be received on this endpoint.
    pub fn pending(&self) -> usize {
        self.incoming.borrow().len()
    }
}

impl Transport for PipeTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.outgoing.borrow_mut().push_back(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut incoming = self.incoming.borrow_mut();

        let frame = incoming
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no frame available"))?;

        // The peer never sends more than the negotiated MTU; a longer frame is
        // delivered truncated the way a datagram read would truncate it.
        if frame.len() > max_len {
            Ok(frame[..max_len].to_vec())
        } else {
            Ok(frame)
        }
    }
}
