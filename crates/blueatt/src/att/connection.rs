//! The ATT connection multiplexer
//!
//! One `AttConnection` owns one transport stream and serializes all ATT
//! traffic over it. Outbound PDUs are spread across three queues - plain
//! writes (responses, commands, notifications, confirmations), requests, and
//! indications - because ATT allows at most one outstanding request and at
//! most one outstanding indication at a time, while everything else may be
//! sent freely. Inbound PDUs are dispatched by opcode category: responses and
//! confirmations complete the pending operation, requests and notifications
//! fan out to registered callbacks.
//!
//! The connection is single-owner: an external driver loop calls [`read`]
//! and [`write`] (typically "drain writes, then block on one read") and there
//! is no internal locking or threading. No timeouts are enforced here; a
//! silent peer leaves the pending slots occupied until the driver tears the
//! bearer down.
//!
//! [`read`]: AttConnection::read
//! [`write`]: AttConnection::write

use log::{debug, trace, warn};
use std::collections::VecDeque;

use super::constants::*;
use super::error::{ConnectionError, ErrorCode, SendError};
use super::opcode::{Opcode, OpcodeKind};
use super::pdu::{AttPdu, ErrorResponse, HandleValueConfirmation, Pdu};
use crate::transport::Transport;

/// Outcome of a request or indication, delivered to its response callback.
#[derive(Debug)]
pub enum AttResponse {
    /// The peer answered with an Error Response.
    Error(ErrorResponse),
    /// The peer answered with the expected response (or confirmation) PDU.
    Value(Pdu),
}

/// Callback invoked when the reply to a request or indication arrives.
pub type ResponseCallback = Box<dyn FnMut(AttResponse, &mut Outbound)>;

/// Callback invoked for inbound requests, commands, notifications, and
/// indications matching its registered opcode.
pub type NotifyCallback = Box<dyn FnMut(&Pdu, &mut Outbound)>;

/// Callback invoked when the owner declares the bearer dead.
pub type DisconnectCallback = Box<dyn FnMut()>;

/// Deferred-send collector handed to callbacks.
///
/// Callbacks run while the connection is mid-dispatch, so they cannot touch
/// it directly; instead they queue outbound work here and the connection
/// drains it as soon as the dispatch returns.
pub struct Outbound {
    mtu: usize,
    mtu_update: Option<usize>,
    ops: Vec<QueuedSend>,
}

struct QueuedSend {
    pdu: Pdu,
    callback: Option<ResponseCallback>,
    mtu_after_send: Option<usize>,
}

impl Outbound {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            mtu_update: None,
            ops: Vec::new(),
        }
    }

    /// The MTU in effect for the PDU being dispatched.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Queues a response (or any other fire-and-forget PDU).
    pub fn respond(&mut self, pdu: Pdu) {
        self.ops.push(QueuedSend {
            pdu,
            callback: None,
            mtu_after_send: None,
        });
    }

    /// Queues a response and switches the connection MTU once the response
    /// bytes have been written - the response itself still travels under the
    /// old MTU.
    pub fn respond_then_set_mtu(&mut self, pdu: Pdu, mtu: usize) {
        self.ops.push(QueuedSend {
            pdu,
            callback: None,
            mtu_after_send: Some(mtu),
        });
    }

    /// Queues an error response for `request_opcode`.
    pub fn respond_error(&mut self, request_opcode: Opcode, handle: u16, code: ErrorCode) {
        self.respond(Pdu::ErrorResponse(ErrorResponse::new(
            request_opcode,
            handle,
            code,
        )));
    }

    /// Queues a follow-up request.
    pub fn request(&mut self, pdu: Pdu, callback: ResponseCallback) {
        self.ops.push(QueuedSend {
            pdu,
            callback: Some(callback),
            mtu_after_send: None,
        });
    }

    /// Queues an indication.
    pub fn indicate(&mut self, pdu: Pdu, callback: ResponseCallback) {
        self.ops.push(QueuedSend {
            pdu,
            callback: Some(callback),
            mtu_after_send: None,
        });
    }

    /// Applies a new MTU as soon as this dispatch finishes (client side of an
    /// MTU exchange).
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu_update = Some(mtu);
    }
}

/// An encoded PDU waiting in a queue or occupying a pending slot.
struct SendOperation {
    id: u64,
    opcode: Opcode,
    data: Vec<u8>,
    callback: Option<ResponseCallback>,
    mtu_after_send: Option<usize>,
}

struct NotifyRegistration {
    id: u64,
    opcode: Opcode,
    callback: NotifyCallback,
}

struct DisconnectRegistration {
    id: u64,
    callback: DisconnectCallback,
}

/// Manages one ATT bearer over a transport stream.
pub struct AttConnection<T: Transport> {
    transport: T,
    mtu: usize,

    /// There's a pending incoming request.
    incoming_request: bool,
    /// Outbound request awaiting its response.
    pending_request: Option<SendOperation>,
    /// Outbound indication awaiting its confirmation.
    pending_indication: Option<SendOperation>,

    request_queue: VecDeque<SendOperation>,
    indication_queue: VecDeque<SendOperation>,
    write_queue: VecDeque<SendOperation>,

    notify_list: Vec<NotifyRegistration>,
    disconnect_list: Vec<DisconnectRegistration>,

    next_register_id: u64,
    next_send_id: u64,
}

impl<T: Transport> AttConnection<T> {
    pub fn new(transport: T) -> Self {
        Self::with_mtu(transport, ATT_DEFAULT_MTU)
    }

    pub fn with_mtu(transport: T, mtu: usize) -> Self {
        assert!((ATT_DEFAULT_MTU..=ATT_MAX_MTU).contains(&mtu));
        Self {
            transport,
            mtu,
            incoming_request: false,
            pending_request: None,
            pending_indication: None,
            request_queue: VecDeque::new(),
            indication_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            notify_list: Vec::new(),
            disconnect_list: Vec::new(),
            next_register_id: 0,
            next_send_id: 0,
        }
    }

    /// The negotiated MTU currently in effect.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Changes the MTU. Values outside [23, 517] are a caller error.
    pub fn set_mtu(&mut self, mtu: usize) {
        assert!(
            (ATT_DEFAULT_MTU..=ATT_MAX_MTU).contains(&mtu),
            "MTU {} outside [{}, {}]",
            mtu,
            ATT_DEFAULT_MTU,
            ATT_MAX_MTU
        );
        debug!("MTU set to {}", mtu);
        self.mtu = mtu;
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending_request.is_some()
    }

    pub fn has_pending_indication(&self) -> bool {
        self.pending_indication.is_some()
    }

    pub fn has_incoming_request(&self) -> bool {
        self.incoming_request
    }

    /// Total PDUs queued but not yet written.
    pub fn queued_sends(&self) -> usize {
        self.write_queue.len() + self.request_queue.len() + self.indication_queue.len()
    }

    /// Registers a callback for an inbound opcode and returns its id.
    /// Multiple callbacks may be registered for the same opcode; they are
    /// invoked in registration order.
    pub fn register(&mut self, opcode: Opcode, callback: NotifyCallback) -> u64 {
        let id = self.next_register_id;
        self.next_register_id += 1;

        self.notify_list.push(NotifyRegistration {
            id,
            opcode,
            callback,
        });

        id
    }

    /// Unregisters the callback with the given id.
    ///
    /// Returns whether a callback was removed.
    pub fn unregister(&mut self, id: u64) -> bool {
        let before = self.notify_list.len();
        self.notify_list.retain(|notify| notify.id != id);
        self.notify_list.len() != before
    }

    /// Removes all notify callbacks and disconnect handlers.
    pub fn unregister_all(&mut self) {
        self.notify_list.clear();
        self.disconnect_list.clear();
    }

    /// Registers a handler fired when the owner declares the bearer dead.
    pub fn register_disconnect(&mut self, callback: DisconnectCallback) -> u64 {
        let id = self.next_register_id;
        self.next_register_id += 1;

        self.disconnect_list.push(DisconnectRegistration { id, callback });

        id
    }

    /// Fires and drops all disconnect handlers. Called by the owner when it
    /// tears the bearer down; the connection itself never decides this.
    pub fn disconnected(&mut self) {
        for mut registration in self.disconnect_list.drain(..) {
            (registration.callback)();
        }
    }

    /// Encodes `pdu` and adds it to the queue matching its opcode category.
    ///
    /// Requests and indications must carry a response callback; all other
    /// categories must not. The encoding must fit the current MTU - an
    /// oversized PDU is rejected here, never queued for later.
    ///
    /// Returns an id usable with [`cancel`](Self::cancel).
    pub fn send(&mut self, pdu: Pdu, callback: Option<ResponseCallback>) -> Result<u64, SendError> {
        self.enqueue(pdu, callback, None)
    }

    fn enqueue(
        &mut self,
        pdu: Pdu,
        callback: Option<ResponseCallback>,
        mtu_after_send: Option<usize>,
    ) -> Result<u64, SendError> {
        let opcode = pdu.opcode();

        match opcode.kind() {
            OpcodeKind::Request | OpcodeKind::Indication => {
                if callback.is_none() {
                    return Err(SendError::CallbackExpected(opcode));
                }
            }
            _ => {
                if callback.is_some() {
                    return Err(SendError::CallbackNotAllowed(opcode));
                }
            }
        }

        let data = pdu.encode();
        if data.len() > self.mtu {
            return Err(SendError::PduTooLarge {
                len: data.len(),
                mtu: self.mtu,
            });
        }

        let id = self.next_send_id;
        self.next_send_id += 1;

        let operation = SendOperation {
            id,
            opcode,
            data,
            callback,
            mtu_after_send,
        };

        trace!("queued {:?} (id {})", opcode, id);

        match opcode.kind() {
            OpcodeKind::Request => self.request_queue.push_back(operation),
            OpcodeKind::Indication => self.indication_queue.push_back(operation),
            _ => self.write_queue.push_back(operation),
        }

        Ok(id)
    }

    /// Removes a queued send operation.
    ///
    /// Returns `true` if the operation was still queued. An operation already
    /// written to the transport (possibly awaiting its reply) is not touched
    /// and `false` is returned; there is no in-flight abort in ATT.
    pub fn cancel(&mut self, id: u64) -> bool {
        for queue in [
            &mut self.write_queue,
            &mut self.request_queue,
            &mut self.indication_queue,
        ] {
            if let Some(index) = queue.iter().position(|op| op.id == id) {
                queue.remove(index);
                return true;
            }
        }
        false
    }

    /// Empties all three send queues. Pending slots are left alone so a reply
    /// that is already on its way does not become "unexpected".
    pub fn cancel_all(&mut self) {
        self.write_queue.clear();
        self.request_queue.clear();
        self.indication_queue.clear();
    }

    /// Receives and dispatches exactly one PDU.
    ///
    /// Any returned [`ConnectionError`] other than a transport error means
    /// the peer broke the protocol and the bearer should be disconnected.
    pub fn read(&mut self) -> Result<(), ConnectionError> {
        let data = self.transport.receive(self.mtu)?;

        if data.len() < ATT_MIN_PDU_LEN {
            return Err(ConnectionError::GarbageResponse(data));
        }

        let opcode = match Opcode::from_u8(data[0]) {
            Some(opcode) => opcode,
            None => return Err(ConnectionError::GarbageResponse(data)),
        };

        trace!("received {:?} ({} bytes)", opcode, data.len());

        match opcode.kind() {
            OpcodeKind::Response => self.handle_response(data, opcode),
            OpcodeKind::Confirmation => self.handle_confirmation(data),
            OpcodeKind::Request => self.handle_request(data, opcode),
            OpcodeKind::Command | OpcodeKind::Notification | OpcodeKind::Indication => {
                self.handle_notify(data, opcode)
            }
        }
    }

    /// Writes at most one queued PDU.
    ///
    /// Selection order: the plain write queue first (replies must never wait
    /// behind a blocked request), then the request queue if no request is
    /// outstanding, then the indication queue if no indication is
    /// outstanding. Returns `Ok(false)` when nothing is eligible.
    pub fn write(&mut self) -> Result<bool, ConnectionError> {
        let mut operation = match self.pick_next_send() {
            Some(operation) => operation,
            None => return Ok(false),
        };

        if let Err(err) = self.transport.send(&operation.data) {
            // Requeue at the front so a retrying driver does not lose the PDU.
            self.requeue_front(operation);
            return Err(err.into());
        }

        trace!(
            "sent {:?} (id {}, {} bytes)",
            operation.opcode,
            operation.id,
            operation.data.len()
        );

        match operation.opcode.kind() {
            OpcodeKind::Request => self.pending_request = Some(operation),
            OpcodeKind::Indication => self.pending_indication = Some(operation),
            OpcodeKind::Response => {
                // The reply for the pending incoming request is on the wire.
                self.incoming_request = false;
                if let Some(mtu) = operation.mtu_after_send.take() {
                    self.set_mtu(mtu);
                }
            }
            _ => {}
        }

        Ok(true)
    }

    /// Writes queued PDUs until nothing more is eligible. Returns how many
    /// were written.
    pub fn write_all(&mut self) -> Result<usize, ConnectionError> {
        let mut count = 0;
        while self.write()? {
            count += 1;
        }
        Ok(count)
    }

    fn pick_next_send(&mut self) -> Option<SendOperation> {
        if let Some(operation) = self.write_queue.pop_front() {
            return Some(operation);
        }

        if self.pending_request.is_none() {
            if let Some(operation) = self.request_queue.pop_front() {
                return Some(operation);
            }
        }

        if self.pending_indication.is_none() {
            if let Some(operation) = self.indication_queue.pop_front() {
                return Some(operation);
            }
        }

        None
    }

    fn requeue_front(&mut self, operation: SendOperation) {
        match operation.opcode.kind() {
            OpcodeKind::Request => self.request_queue.push_front(operation),
            OpcodeKind::Indication => self.indication_queue.push_front(operation),
            _ => self.write_queue.push_front(operation),
        }
    }

    fn handle_response(&mut self, data: Vec<u8>, opcode: Opcode) -> Result<(), ConnectionError> {
        // With no request pending the response is unexpected; the bearer
        // should be disconnected.
        let mut operation = match self.pending_request.take() {
            Some(operation) => operation,
            None => return Err(ConnectionError::UnexpectedResponse(data)),
        };

        let response = if opcode == Opcode::ErrorResponse {
            let error = match ErrorResponse::decode(&data) {
                Some(error) => error,
                None => return Err(ConnectionError::GarbageResponse(data)),
            };
            if error.request_opcode != operation.opcode as u8 {
                return Err(ConnectionError::UnexpectedResponse(data));
            }
            AttResponse::Error(error)
        } else {
            // The requester knows which response shape to expect; decode with
            // that type rather than sniffing.
            if operation.opcode.response() != Some(opcode) {
                return Err(ConnectionError::UnexpectedResponse(data));
            }
            let pdu = match Pdu::decode(&data) {
                Some(pdu) => pdu,
                None => return Err(ConnectionError::GarbageResponse(data)),
            };
            AttResponse::Value(pdu)
        };

        debug!(
            "{:?} answers {:?} (id {})",
            opcode, operation.opcode, operation.id
        );

        let mut out = Outbound::new(self.mtu);
        if let Some(callback) = operation.callback.as_mut() {
            callback(response, &mut out);
        }
        self.drain(out);

        Ok(())
    }

    fn handle_confirmation(&mut self, data: Vec<u8>) -> Result<(), ConnectionError> {
        // A confirmation is always exactly the opcode byte.
        if data.len() != 1 {
            return Err(ConnectionError::GarbageResponse(data));
        }

        let mut operation = match self.pending_indication.take() {
            Some(operation) => operation,
            None => return Err(ConnectionError::UnexpectedResponse(data)),
        };

        debug!("confirmation for indication id {}", operation.id);

        let mut out = Outbound::new(self.mtu);
        if let Some(callback) = operation.callback.as_mut() {
            callback(
                AttResponse::Value(Pdu::HandleValueConfirmation(HandleValueConfirmation)),
                &mut out,
            );
        }
        self.drain(out);

        Ok(())
    }

    fn handle_request(&mut self, data: Vec<u8>, opcode: Opcode) -> Result<(), ConnectionError> {
        // A second request while one is being served means the peer did not
        // wait for our response; the sequential protocol was violated.
        if self.incoming_request {
            return Err(ConnectionError::UnexpectedResponse(data));
        }

        self.incoming_request = true;

        self.handle_notify(data, opcode)
    }

    fn handle_notify(&mut self, data: Vec<u8>, opcode: Opcode) -> Result<(), ConnectionError> {
        let matched = self.notify_list.iter().any(|notify| notify.opcode == opcode);

        if matched {
            // Decode once, share across every matching callback.
            let pdu = match Pdu::decode(&data) {
                Some(pdu) => pdu,
                None => return Err(ConnectionError::GarbageResponse(data)),
            };

            let mut out = Outbound::new(self.mtu);
            for notify in self
                .notify_list
                .iter_mut()
                .filter(|notify| notify.opcode == opcode)
            {
                (notify.callback)(&pdu, &mut out);
            }
            self.drain(out);
        } else if opcode.kind() == OpcodeKind::Request {
            // Every request gets exactly one reply, even unhandled ones;
            // this keeps the peer's pending-request slot from jamming.
            debug!("no handler for {:?}, answering RequestNotSupported", opcode);
            let error = ErrorResponse::new(opcode, 0x0000, ErrorCode::RequestNotSupported);
            if let Err(err) = self.enqueue(Pdu::ErrorResponse(error), None, None) {
                warn!("could not queue RequestNotSupported: {}", err);
            }
        }

        Ok(())
    }

    fn drain(&mut self, out: Outbound) {
        let Outbound {
            ops, mtu_update, ..
        } = out;

        for queued in ops {
            let opcode = queued.pdu.opcode();
            if let Err(err) = self.enqueue(queued.pdu, queued.callback, queued.mtu_after_send) {
                warn!("dropping callback-queued {:?}: {}", opcode, err);
            }
        }

        if let Some(mtu) = mtu_update {
            self.set_mtu(mtu);
        }
    }
}
