//! Unit tests for the ATT codec and connection multiplexer

use std::cell::RefCell;
use std::rc::Rc;

use super::connection::{AttConnection, AttResponse};
use super::constants::*;
use super::error::{ConnectionError, ErrorCode, SendError};
use super::opcode::Opcode;
use super::pdu::*;
use crate::transport::{pipe, PipeTransport, Transport};
use crate::uuid::Uuid;

fn connection() -> (AttConnection<PipeTransport>, PipeTransport) {
    let (local, peer) = pipe();
    (AttConnection::new(local), peer)
}

// --- Codec ---

#[test]
fn error_response_round_trip() {
    let pdu = ErrorResponse::new(Opcode::ReadRequest, 0x0015, ErrorCode::ReadNotPermitted);
    let encoded = pdu.encode();

    assert_eq!(encoded, vec![0x01, 0x0A, 0x15, 0x00, 0x02]);
    assert_eq!(ErrorResponse::decode(&encoded).unwrap(), pdu);

    // Fixed PDUs must match their length exactly
    assert!(ErrorResponse::decode(&encoded[..4]).is_none());
    assert!(ErrorResponse::decode(&[&encoded[..], &[0x00]].concat()).is_none());

    // Wrong opcode byte
    let mut wrong = encoded;
    wrong[0] = 0x02;
    assert!(ErrorResponse::decode(&wrong).is_none());
}

#[test]
fn exchange_mtu_round_trip() {
    let request = ExchangeMtuRequest { client_mtu: 517 };
    let encoded = request.encode();
    assert_eq!(encoded, vec![0x02, 0x05, 0x02]);
    assert_eq!(ExchangeMtuRequest::decode(&encoded).unwrap(), request);

    let response = ExchangeMtuResponse { server_mtu: 23 };
    assert_eq!(
        ExchangeMtuResponse::decode(&response.encode()).unwrap(),
        response
    );

    assert!(ExchangeMtuRequest::decode(&[0x02, 0x05]).is_none());
    assert!(ExchangeMtuRequest::decode(&[0x02, 0x05, 0x02, 0x00]).is_none());
}

#[test]
fn find_information_response_formats() {
    let bit16 = FindInformationResponse::new(InformationData::Uuid16(vec![
        (0x0001, 0x2800),
        (0x0002, 0x2803),
    ]))
    .unwrap();

    let encoded = bit16.encode();
    assert_eq!(encoded[0], ATT_FIND_INFO_RSP);
    assert_eq!(encoded[1], ATT_FIND_INFO_RSP_FORMAT_16BIT);
    assert_eq!(encoded.len(), 2 + 2 * 4);
    assert_eq!(FindInformationResponse::decode(&encoded).unwrap(), bit16);

    let uuid = Uuid::new_random_v4();
    let bit128 =
        FindInformationResponse::new(InformationData::Uuid128(vec![(0x0003, uuid)])).unwrap();
    let encoded = bit128.encode();
    assert_eq!(encoded.len(), 2 + 18);
    assert_eq!(FindInformationResponse::decode(&encoded).unwrap(), bit128);

    // Empty lists are not constructible
    assert!(FindInformationResponse::new(InformationData::Uuid16(vec![])).is_none());

    // Unknown format byte
    assert!(FindInformationResponse::decode(&[0x05, 0x03, 0, 0, 0, 0]).is_none());

    // Ragged pair list
    assert!(FindInformationResponse::decode(&[0x05, 0x01, 0, 0, 0]).is_none());
}

#[test]
fn read_by_type_request_uuid_widths() {
    let short = ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        attribute_type: Uuid::from_u16(0x2803),
    };
    let encoded = short.encode();
    assert_eq!(encoded.len(), 7);
    assert_eq!(ReadByTypeRequest::decode(&encoded).unwrap(), short);

    let long = ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0x0010,
        attribute_type: Uuid::new_random_v4(),
    };
    let encoded = long.encode();
    assert_eq!(encoded.len(), 21);
    assert_eq!(ReadByTypeRequest::decode(&encoded).unwrap(), long);

    // Only 7 or 21 bytes are legal
    assert!(ReadByTypeRequest::decode(&encoded[..9]).is_none());
}

#[test]
fn read_by_type_response_uniformity() {
    let response = ReadByTypeResponse::new(vec![
        HandleValue {
            handle: 0x0002,
            value: vec![0xAA, 0xBB],
        },
        HandleValue {
            handle: 0x0005,
            value: vec![0xCC, 0xDD],
        },
    ])
    .unwrap();

    assert_eq!(response.entry_length(), 4);
    let encoded = response.encode();
    assert_eq!(encoded[1], 4);
    assert_eq!(ReadByTypeResponse::decode(&encoded).unwrap(), response);

    // Mixed value sizes cannot be packed into one PDU
    assert!(ReadByTypeResponse::new(vec![
        HandleValue {
            handle: 0x0002,
            value: vec![0xAA],
        },
        HandleValue {
            handle: 0x0005,
            value: vec![0xCC, 0xDD],
        },
    ])
    .is_none());

    // Entry list must divide evenly by the declared length
    assert!(ReadByTypeResponse::decode(&[0x09, 0x04, 0x02, 0x00, 0xAA]).is_none());
}

#[test]
fn read_by_group_type_response_round_trip() {
    let response = ReadByGroupTypeResponse::new(vec![
        AttributeGroupData {
            handle: 0x0001,
            end_group_handle: 0x0003,
            value: vec![0x34, 0x12],
        },
        AttributeGroupData {
            handle: 0x0004,
            end_group_handle: 0x0008,
            value: vec![0x0F, 0x18],
        },
    ])
    .unwrap();

    let encoded = response.encode();
    assert_eq!(encoded[1], 6);
    assert_eq!(ReadByGroupTypeResponse::decode(&encoded).unwrap(), response);

    // Entry length below 6 is not a valid group entry
    assert!(ReadByGroupTypeResponse::decode(&[0x11, 0x05, 0, 0, 0, 0, 0]).is_none());
}

#[test]
fn write_and_notification_shapes() {
    let write = WriteRequest {
        handle: 0x0042,
        value: vec![1, 2, 3],
    };
    assert_eq!(WriteRequest::decode(&write.encode()).unwrap(), write);
    assert_eq!(WriteResponse.encode(), vec![0x13]);
    assert!(WriteResponse::decode(&[0x13, 0x00]).is_none());

    let command = WriteCommand {
        handle: 0x0042,
        value: vec![9],
    };
    assert_eq!(command.encode()[0], 0x52);
    assert_eq!(WriteCommand::decode(&command.encode()).unwrap(), command);

    let notification = HandleValueNotification {
        handle: 0x0007,
        value: vec![0x64],
    };
    assert_eq!(
        HandleValueNotification::decode(&notification.encode()).unwrap(),
        notification
    );

    // Confirmations are exactly one byte
    assert_eq!(HandleValueConfirmation.encode(), vec![0x1E]);
    assert!(HandleValueConfirmation::decode(&[0x1E, 0x00]).is_none());
}

#[test]
fn pdu_union_dispatches_by_opcode() {
    let encoded = ExchangeMtuRequest { client_mtu: 50 }.encode();
    assert!(matches!(
        Pdu::decode(&encoded),
        Some(Pdu::ExchangeMtuRequest(ExchangeMtuRequest { client_mtu: 50 }))
    ));

    // Unknown opcode byte
    assert!(Pdu::decode(&[0xFF, 0x00]).is_none());
    assert!(Pdu::decode(&[]).is_none());
}

// --- Connection multiplexer ---

#[test]
fn request_waits_for_pending_slot() {
    // Scenario: a second request must stay queued until the first response.
    let (mut conn, mut peer) = connection();

    let responses = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..2 {
        let log = responses.clone();
        conn.send(
            Pdu::ExchangeMtuRequest(ExchangeMtuRequest { client_mtu: 48 }),
            Some(Box::new(move |response, _out| {
                if let AttResponse::Value(Pdu::ExchangeMtuResponse(rsp)) = response {
                    log.borrow_mut().push(rsp.server_mtu);
                }
            })),
        )
        .unwrap();
    }

    // Only the first request goes out; the second is gated on the slot.
    assert_eq!(conn.write_all().unwrap(), 1);
    assert!(conn.has_pending_request());
    assert_eq!(conn.queued_sends(), 1);
    assert_eq!(peer.pending(), 1);
    peer.receive(23).unwrap();

    // The response releases the slot and the second request follows.
    peer.send(&ExchangeMtuResponse { server_mtu: 30 }.encode())
        .unwrap();
    conn.read().unwrap();
    assert!(!conn.has_pending_request());

    assert_eq!(conn.write_all().unwrap(), 1);
    assert!(conn.has_pending_request());

    peer.receive(23).unwrap();
    peer.send(&ExchangeMtuResponse { server_mtu: 31 }.encode())
        .unwrap();
    conn.read().unwrap();

    assert_eq!(*responses.borrow(), vec![30, 31]);
}

#[test]
fn unexpected_response_is_fatal() {
    let (mut conn, mut peer) = connection();

    peer.send(&ExchangeMtuResponse { server_mtu: 23 }.encode())
        .unwrap();

    assert!(matches!(
        conn.read(),
        Err(ConnectionError::UnexpectedResponse(_))
    ));
}

#[test]
fn mismatched_response_opcode_is_fatal() {
    let (mut conn, mut peer) = connection();

    conn.send(
        Pdu::ReadRequest(ReadRequest { handle: 1 }),
        Some(Box::new(|_, _| {})),
    )
    .unwrap();
    conn.write_all().unwrap();

    // Peer answers a request we never made
    peer.send(&ExchangeMtuResponse { server_mtu: 23 }.encode())
        .unwrap();

    assert!(matches!(
        conn.read(),
        Err(ConnectionError::UnexpectedResponse(_))
    ));
}

#[test]
fn unknown_opcode_is_garbage() {
    // Scenario: an unrecognized opcode byte cannot crash the connection.
    let (mut conn, mut peer) = connection();

    peer.send(&[0xBB, 0x01, 0x02]).unwrap();

    assert!(matches!(
        conn.read(),
        Err(ConnectionError::GarbageResponse(_))
    ));
}

#[test]
fn error_response_reaches_request_callback() {
    let (mut conn, mut peer) = connection();

    let seen = Rc::new(RefCell::new(None));
    let log = seen.clone();

    conn.send(
        Pdu::ReadRequest(ReadRequest { handle: 0x0009 }),
        Some(Box::new(move |response, _out| {
            if let AttResponse::Error(error) = response {
                *log.borrow_mut() = Some((error.error_code, error.handle));
            }
        })),
    )
    .unwrap();
    conn.write_all().unwrap();

    peer.send(
        &ErrorResponse::new(Opcode::ReadRequest, 0x0009, ErrorCode::ReadNotPermitted).encode(),
    )
    .unwrap();
    conn.read().unwrap();

    assert_eq!(
        *seen.borrow(),
        Some((ErrorCode::ReadNotPermitted, 0x0009))
    );
    assert!(!conn.has_pending_request());
}

#[test]
fn confirmation_rules() {
    let (mut conn, mut peer) = connection();

    // Confirmation with no pending indication is a protocol violation
    peer.send(&[ATT_HANDLE_VALUE_CONF]).unwrap();
    assert!(matches!(
        conn.read(),
        Err(ConnectionError::UnexpectedResponse(_))
    ));

    let confirmed = Rc::new(RefCell::new(false));
    let flag = confirmed.clone();

    conn.send(
        Pdu::HandleValueIndication(HandleValueIndication {
            handle: 0x0003,
            value: vec![1],
        }),
        Some(Box::new(move |_response, _out| {
            *flag.borrow_mut() = true;
        })),
    )
    .unwrap();
    conn.write_all().unwrap();
    assert!(conn.has_pending_indication());

    // A confirmation longer than one byte is garbage
    peer.send(&[ATT_HANDLE_VALUE_CONF, 0x00]).unwrap();
    assert!(matches!(
        conn.read(),
        Err(ConnectionError::GarbageResponse(_))
    ));
    assert!(conn.has_pending_indication());

    peer.send(&[ATT_HANDLE_VALUE_CONF]).unwrap();
    conn.read().unwrap();
    assert!(*confirmed.borrow());
    assert!(!conn.has_pending_indication());
}

#[test]
fn indications_serialize_one_at_a_time() {
    let (mut conn, mut peer) = connection();

    for handle in [0x0003u16, 0x0004] {
        conn.send(
            Pdu::HandleValueIndication(HandleValueIndication {
                handle,
                value: vec![0],
            }),
            Some(Box::new(|_, _| {})),
        )
        .unwrap();
    }

    assert_eq!(conn.write_all().unwrap(), 1);
    assert_eq!(conn.queued_sends(), 1);

    peer.receive(23).unwrap();
    peer.send(&[ATT_HANDLE_VALUE_CONF]).unwrap();
    conn.read().unwrap();

    assert_eq!(conn.write_all().unwrap(), 1);
    assert_eq!(conn.queued_sends(), 0);
}

#[test]
fn unhandled_request_gets_not_supported() {
    let (mut conn, mut peer) = connection();

    peer.send(&ReadRequest { handle: 0x0001 }.encode()).unwrap();
    conn.read().unwrap();
    assert!(conn.has_incoming_request());

    conn.write_all().unwrap();
    assert!(!conn.has_incoming_request());

    let reply = peer.receive(23).unwrap();
    let error = ErrorResponse::decode(&reply).unwrap();
    assert_eq!(error.request_opcode, ATT_READ_REQ);
    assert_eq!(error.handle, 0x0000);
    assert_eq!(error.error_code, ErrorCode::RequestNotSupported);
}

#[test]
fn second_incoming_request_is_fatal() {
    let (mut conn, mut peer) = connection();

    peer.send(&ReadRequest { handle: 0x0001 }.encode()).unwrap();
    conn.read().unwrap();

    // The peer did not wait for our response
    peer.send(&ReadRequest { handle: 0x0002 }.encode()).unwrap();
    assert!(matches!(
        conn.read(),
        Err(ConnectionError::UnexpectedResponse(_))
    ));
}

#[test]
fn send_validates_callback_and_size() {
    let (mut conn, _peer) = connection();

    assert!(matches!(
        conn.send(Pdu::ReadRequest(ReadRequest { handle: 1 }), None),
        Err(SendError::CallbackExpected(Opcode::ReadRequest))
    ));

    assert!(matches!(
        conn.send(
            Pdu::WriteResponse(WriteResponse),
            Some(Box::new(|_, _| {}))
        ),
        Err(SendError::CallbackNotAllowed(Opcode::WriteResponse))
    ));

    // 3 + 21 bytes > default MTU of 23
    let oversized = Pdu::HandleValueNotification(HandleValueNotification {
        handle: 1,
        value: vec![0; 21],
    });
    assert!(matches!(
        conn.send(oversized, None),
        Err(SendError::PduTooLarge { len: 24, mtu: 23 })
    ));

    assert_eq!(conn.queued_sends(), 0);
}

#[test]
fn writes_never_wait_behind_blocked_requests() {
    let (mut conn, mut peer) = connection();

    conn.send(
        Pdu::ReadRequest(ReadRequest { handle: 1 }),
        Some(Box::new(|_, _| {})),
    )
    .unwrap();
    conn.write_all().unwrap();
    peer.receive(23).unwrap();

    // Slot occupied: another request is stuck, but a notification is not
    conn.send(
        Pdu::ReadRequest(ReadRequest { handle: 2 }),
        Some(Box::new(|_, _| {})),
    )
    .unwrap();
    conn.send(
        Pdu::HandleValueNotification(HandleValueNotification {
            handle: 7,
            value: vec![1],
        }),
        None,
    )
    .unwrap();

    assert_eq!(conn.write_all().unwrap(), 1);
    let sent = peer.receive(23).unwrap();
    assert_eq!(sent[0], ATT_HANDLE_VALUE_NTF);
    assert_eq!(conn.queued_sends(), 1);
}

#[test]
fn cancel_removes_only_queued_operations() {
    let (mut conn, mut peer) = connection();

    let first = conn
        .send(
            Pdu::ReadRequest(ReadRequest { handle: 1 }),
            Some(Box::new(|_, _| {})),
        )
        .unwrap();
    let second = conn
        .send(
            Pdu::ReadRequest(ReadRequest { handle: 2 }),
            Some(Box::new(|_, _| {})),
        )
        .unwrap();

    conn.write_all().unwrap();
    peer.receive(23).unwrap();

    // First is in flight: no abort. Second is still queued: removable.
    assert!(!conn.cancel(first));
    assert!(conn.cancel(second));
    assert!(!conn.cancel(second));
    assert_eq!(conn.queued_sends(), 0);

    conn.send(
        Pdu::HandleValueNotification(HandleValueNotification {
            handle: 1,
            value: vec![],
        }),
        None,
    )
    .unwrap();
    conn.cancel_all();
    assert_eq!(conn.queued_sends(), 0);
    // The pending request survives cancel_all
    assert!(conn.has_pending_request());
}

#[test]
fn notify_fan_out_in_registration_order() {
    let (mut conn, mut peer) = connection();

    let order = Rc::new(RefCell::new(Vec::new()));

    for tag in ["first", "second"] {
        let log = order.clone();
        conn.register(
            Opcode::HandleValueNotification,
            Box::new(move |pdu, _out| {
                if let Pdu::HandleValueNotification(notification) = pdu {
                    log.borrow_mut().push((tag, notification.handle));
                }
            }),
        );
    }

    peer.send(
        &HandleValueNotification {
            handle: 0x0021,
            value: vec![5],
        }
        .encode(),
    )
    .unwrap();
    conn.read().unwrap();

    assert_eq!(*order.borrow(), vec![("first", 0x0021), ("second", 0x0021)]);
}

#[test]
fn registration_ids_stay_fresh_after_unregister_all() {
    let (mut conn, _peer) = connection();

    let first = conn.register(Opcode::HandleValueNotification, Box::new(|_, _| {}));
    conn.unregister_all();

    let second = conn.register(Opcode::HandleValueNotification, Box::new(|_, _| {}));
    assert_ne!(first, second);

    // The old id no longer refers to anything
    assert!(!conn.unregister(first));
    assert!(conn.unregister(second));
}

#[test]
fn disconnect_handlers_fire_once() {
    let (mut conn, _peer) = connection();

    let fired = Rc::new(RefCell::new(0));
    let count = fired.clone();
    conn.register_disconnect(Box::new(move || {
        *count.borrow_mut() += 1;
    }));

    conn.disconnected();
    conn.disconnected();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
#[should_panic]
fn mtu_below_minimum_is_a_caller_error() {
    let (mut conn, _peer) = connection();
    conn.set_mtu(22);
}
