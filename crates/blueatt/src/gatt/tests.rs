//! Unit tests for the GATT database, server, and client

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use super::client::{DiscoveredService, GattClient};
use super::database::GattDatabase;
use super::server::{GattServer, GattServerConfig};
use super::types::*;
use crate::att::pdu::*;
use crate::att::{ConnectionError, ErrorCode, Opcode};
use crate::transport::{pipe, PipeTransport, Transport};
use crate::uuid::Uuid;

fn battery_service() -> Service {
    Service::new(Uuid::from_u16(0x180F), true).with_characteristic(
        Characteristic::new(
            Uuid::from_u16(0x2A19),
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            Permissions::read_only(),
            vec![100],
        )
        .with_descriptor(Descriptor::new(
            Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID),
            Permissions::read_write(),
            vec![0x00, 0x00],
        )),
    )
}

/// Calls `read` until the transport runs dry; protocol errors panic.
fn drain_reads(mut read: impl FnMut() -> Result<(), ConnectionError>) {
    loop {
        match read() {
            Ok(()) => {}
            Err(ConnectionError::Transport(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                break
            }
            Err(err) => panic!("protocol error: {}", err),
        }
    }
}

/// Shuttles PDUs between a client and a server until both sides go idle.
fn pump(server: &mut GattServer<PipeTransport>, client: &mut GattClient<PipeTransport>) {
    loop {
        let wrote = client.write_all().unwrap() + server.write_all().unwrap();

        drain_reads(|| server.read());
        drain_reads(|| client.read());

        let still_queued = client.connection().queued_sends() + server.connection().queued_sends();
        if wrote == 0 && still_queued == 0 {
            break;
        }
    }
}

// --- Database ---

#[test]
fn handles_are_allocated_in_declaration_order() {
    let mut database = GattDatabase::new();

    let range = database.add_service(&battery_service());
    assert_eq!(range, HandleRange::new(0x0001, 0x0004));

    // declaration, characteristic declaration, value, descriptor
    let attrs: Vec<_> = database.attributes().collect();
    assert_eq!(attrs.len(), 4);
    assert_eq!(attrs[0].attr_type, Uuid::from_u16(PRIMARY_SERVICE_UUID));
    assert_eq!(attrs[1].attr_type, Uuid::from_u16(CHARACTERISTIC_UUID));
    assert_eq!(attrs[2].attr_type, Uuid::from_u16(0x2A19));
    assert_eq!(attrs[3].attr_type, Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID));

    // Characteristic declaration points at the value attribute
    assert_eq!(
        attrs[1].value,
        vec![
            (CharacteristicProperties::READ | CharacteristicProperties::NOTIFY).bits(),
            0x03,
            0x00,
            0x19,
            0x2A
        ]
    );

    // A second service continues the same handle counter
    let second = database.add_service(&Service::new(Uuid::from_u16(0x1801), true));
    assert_eq!(second, HandleRange::new(0x0005, 0x0005));
}

#[test]
fn handles_never_restart_except_on_clear() {
    let mut database = GattDatabase::new();

    let first = database.add_service(&Service::new(Uuid::from_u16(0x1800), true));
    let second = database.add_service(&Service::new(Uuid::from_u16(0x1801), true));
    assert!(second.start > first.end);

    database.clear();
    assert!(database.is_empty());

    // clear resets attributes and allocator together
    let fresh = database.add_service(&Service::new(Uuid::from_u16(0x1802), true));
    assert_eq!(fresh.start, 0x0001);
}

#[test]
fn group_queries_come_back_ascending() {
    let mut database = GattDatabase::new();
    database.add_service(&battery_service());
    database.add_service(&Service::new(Uuid::from_u16(0x1801), true));
    database.add_service(&battery_service());

    let groups = database.read_by_group_type(
        HandleRange::new(0x0001, 0xFFFF),
        &Uuid::from_u16(PRIMARY_SERVICE_UUID),
    );
    assert_eq!(groups.len(), 3);
    assert!(groups.windows(2).all(|pair| pair[0].0.end < pair[1].0.start));

    // Partial overlap still reports the group
    let partial = database.read_by_group_type(
        HandleRange::new(0x0002, 0x0003),
        &Uuid::from_u16(PRIMARY_SERVICE_UUID),
    );
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].0, HandleRange::new(0x0001, 0x0004));

    let by_type = database.read_by_type(
        HandleRange::new(0x0001, 0xFFFF),
        &Uuid::from_u16(CHARACTERISTIC_UUID),
    );
    assert_eq!(by_type.len(), 2);
    assert!(by_type[0].handle < by_type[1].handle);
}

#[test]
fn service_of_reports_group_boundaries() {
    let mut database = GattDatabase::new();
    let range = database.add_service(&battery_service());

    for handle in range.start..=range.end {
        assert_eq!(database.service_of(handle), Some(range));
    }
    assert_eq!(database.service_of(range.end + 1), None);
}

#[test]
fn find_by_type_value_reports_whole_groups() {
    let mut database = GattDatabase::new();
    let battery = database.add_service(&battery_service());
    database.add_service(&Service::new(Uuid::from_u16(0x1801), true));

    let found = database.find_by_type_value(
        HandleRange::new(0x0001, 0xFFFF),
        PRIMARY_SERVICE_UUID,
        &[0x0F, 0x18],
    );
    assert_eq!(found, vec![battery]);
}

#[test]
#[should_panic]
fn writing_an_unknown_handle_is_a_caller_error() {
    let mut database = GattDatabase::new();
    database.write(0x0042, vec![1]);
}

// --- Server, driven over a raw peer endpoint ---

#[test]
fn read_by_group_type_returns_one_service_entry() {
    // Scenario: one service (0x1234) with one readable characteristic.
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);

    let service = Service::new(Uuid::from_u16(0x1234), true).with_characteristic(
        Characteristic::new(
            Uuid::from_u16(0x5678),
            CharacteristicProperties::READ,
            Permissions::read_only(),
            vec![0x2A],
        ),
    );
    let range = server.add_service(&service);
    assert_eq!(range, HandleRange::new(0x0001, 0x0003));

    peer.send(
        &ReadByGroupTypeRequest {
            start_handle: 0x0001,
            end_handle: 0xFFFF,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let reply = ReadByGroupTypeResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(reply.data().len(), 1);
    assert_eq!(reply.data()[0].handle, 0x0001);
    assert_eq!(reply.data()[0].end_group_handle, 0x0003);
    assert_eq!(reply.data()[0].value, vec![0x34, 0x12]);
}

#[test]
fn zero_handles_are_rejected_before_the_database_is_touched() {
    // Scenario: start=0, end=0 must yield InvalidHandle with handle field 0.
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);

    peer.send(
        &ReadByTypeRequest {
            start_handle: 0,
            end_handle: 0,
            attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let error = ErrorResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(error.request_opcode, Opcode::ReadByTypeRequest as u8);
    assert_eq!(error.handle, 0);
    assert_eq!(error.error_code, ErrorCode::InvalidHandle);
}

#[test]
fn inverted_range_names_the_start_handle() {
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);

    peer.send(
        &FindInformationRequest {
            start_handle: 0x0010,
            end_handle: 0x0002,
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let error = ErrorResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(error.handle, 0x0010);
    assert_eq!(error.error_code, ErrorCode::InvalidHandle);
}

#[test]
fn group_reads_only_allow_service_types() {
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);
    server.add_service(&battery_service());

    peer.send(
        &ReadByGroupTypeRequest {
            start_handle: 0x0001,
            end_handle: 0xFFFF,
            group_type: Uuid::from_u16(CHARACTERISTIC_UUID),
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let error = ErrorResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(error.error_code, ErrorCode::UnsupportedGroupType);
}

#[test]
fn empty_results_answer_attribute_not_found() {
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);
    server.add_service(&battery_service());

    peer.send(
        &ReadByGroupTypeRequest {
            start_handle: 0x0010,
            end_handle: 0xFFFF,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let error = ErrorResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(error.error_code, ErrorCode::AttributeNotFound);
    assert_eq!(error.handle, 0x0010);
}

#[test]
fn find_information_lists_types_in_16bit_format() {
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);
    server.add_service(&battery_service());

    peer.send(
        &FindInformationRequest {
            start_handle: 0x0001,
            end_handle: 0xFFFF,
        }
        .encode(),
    )
    .unwrap();

    server.read().unwrap();
    server.write_all().unwrap();

    let reply = FindInformationResponse::decode(&peer.receive(23).unwrap()).unwrap();
    match reply.data() {
        InformationData::Uuid16(pairs) => {
            assert_eq!(pairs[0], (0x0001, PRIMARY_SERVICE_UUID));
            assert_eq!(pairs[1], (0x0002, CHARACTERISTIC_UUID));
        }
        InformationData::Uuid128(_) => panic!("expected 16-bit format"),
    }
}

#[test]
fn write_request_respects_permissions() {
    let (local, mut peer) = pipe();
    let mut server = GattServer::new(local);
    let range = server.add_service(&battery_service());

    // The battery level is read-only; its CCC descriptor is writable.
    let value_handle = range.start + 2;
    let descriptor_handle = range.start + 3;

    peer.send(
        &WriteRequest {
            handle: value_handle,
            value: vec![0],
        }
        .encode(),
    )
    .unwrap();
    server.read().unwrap();
    server.write_all().unwrap();

    let error = ErrorResponse::decode(&peer.receive(23).unwrap()).unwrap();
    assert_eq!(error.error_code, ErrorCode::WriteNotPermitted);
    assert_eq!(error.handle, value_handle);

    peer.send(
        &WriteRequest {
            handle: descriptor_handle,
            value: vec![0x01, 0x00],
        }
        .encode(),
    )
    .unwrap();
    server.read().unwrap();
    server.write_all().unwrap();

    assert!(WriteResponse::decode(&peer.receive(23).unwrap()).is_some());
    assert_eq!(
        server.database().borrow().attribute(descriptor_handle).value,
        vec![0x01, 0x00]
    );
}

// --- Client against a live server ---

#[test]
fn mtu_exchange_settles_both_sides() {
    // Scenario: client asks for 50 against a server preferring 100.
    let (server_end, client_end) = pipe();
    let mut server = GattServer::with_config(
        server_end,
        GattServerConfig {
            preferred_mtu: 100,
        },
    );
    let mut client = GattClient::new(client_end);

    let negotiated = Rc::new(RefCell::new(None));
    let result = negotiated.clone();
    client
        .exchange_mtu(
            50,
            Box::new(move |outcome| {
                *result.borrow_mut() = Some(outcome.unwrap());
            }),
        )
        .unwrap();

    pump(&mut server, &mut client);

    assert_eq!(*negotiated.borrow(), Some(50));
    assert_eq!(client.mtu(), 50);
    assert_eq!(server.mtu(), 50);
}

#[test]
fn discovery_walks_all_services() {
    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    let battery = server.add_service(&battery_service());
    let custom_uuid = Uuid::new_random_v4();
    let custom = server.add_service(&Service::new(custom_uuid, true).with_characteristic(
        Characteristic::new(
            Uuid::new_random_v4(),
            CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            Permissions::read_write(),
            b"hello".to_vec(),
        ),
    ));

    let discovered: Rc<RefCell<Vec<DiscoveredService>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = discovered.clone();
    client
        .discover_all_primary_services(Box::new(move |outcome| {
            *sink.borrow_mut() = outcome.unwrap();
        }))
        .unwrap();

    pump(&mut server, &mut client);

    let services = discovered.borrow();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].uuid, Uuid::from_u16(0x180F));
    assert_eq!(services[0].range, battery);
    assert_eq!(services[1].uuid, custom_uuid);
    assert_eq!(services[1].range, custom);
}

#[test]
fn characteristics_reads_and_writes_round_trip() {
    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    let range = server.add_service(&Service::new(Uuid::from_u16(0x1234), true)
        .with_characteristic(Characteristic::new(
            Uuid::from_u16(0x5678),
            CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            Permissions::read_write(),
            b"initial".to_vec(),
        )));

    let characteristics = Rc::new(RefCell::new(Vec::new()));
    let sink = characteristics.clone();
    client
        .discover_characteristics(
            range,
            Box::new(move |outcome| {
                *sink.borrow_mut() = outcome.unwrap();
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);

    let value_handle = {
        let found = characteristics.borrow();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid, Uuid::from_u16(0x5678));
        assert!(found[0].properties.contains(CharacteristicProperties::READ));
        found[0].value_handle
    };

    let read_back = Rc::new(RefCell::new(Vec::new()));
    let sink = read_back.clone();
    client
        .read_characteristic(
            value_handle,
            Box::new(move |outcome| {
                *sink.borrow_mut() = outcome.unwrap();
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);
    assert_eq!(*read_back.borrow(), b"initial".to_vec());

    let wrote = Rc::new(RefCell::new(false));
    let flag = wrote.clone();
    client
        .write_characteristic(
            value_handle,
            b"updated".to_vec(),
            Box::new(move |outcome| {
                outcome.unwrap();
                *flag.borrow_mut() = true;
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);

    assert!(*wrote.borrow());
    assert_eq!(
        server.database().borrow().attribute(value_handle).value,
        b"updated".to_vec()
    );

    // Fire-and-forget write lands too
    client
        .write_without_response(value_handle, b"cmd".to_vec())
        .unwrap();
    pump(&mut server, &mut client);
    assert_eq!(
        server.database().borrow().attribute(value_handle).value,
        b"cmd".to_vec()
    );
}

#[test]
fn long_reads_continue_with_blobs() {
    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    // 60 bytes cannot fit one 23-byte PDU
    let long_value: Vec<u8> = (0..60).collect();
    let range = server.add_service(&Service::new(Uuid::from_u16(0x1234), true)
        .with_characteristic(Characteristic::new(
            Uuid::from_u16(0x5678),
            CharacteristicProperties::READ,
            Permissions::read_only(),
            long_value.clone(),
        )));

    let read_back = Rc::new(RefCell::new(Vec::new()));
    let sink = read_back.clone();
    client
        .read_characteristic(
            range.start + 2,
            Box::new(move |outcome| {
                *sink.borrow_mut() = outcome.unwrap();
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);

    assert_eq!(*read_back.borrow(), long_value);
}

#[test]
fn notifications_and_indications_reach_the_client() {
    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    let range = server.add_service(&battery_service());
    let value_handle = range.start + 2;

    let updates = Rc::new(RefCell::new(Vec::new()));

    let sink = updates.clone();
    client.register_notifications(Box::new(move |handle, value| {
        sink.borrow_mut().push((handle, value.to_vec()));
    }));
    let sink = updates.clone();
    client.register_indications(Box::new(move |handle, value| {
        sink.borrow_mut().push((handle, value.to_vec()));
    }));

    server.update_value(value_handle, vec![90]);
    server.notify(value_handle).unwrap();
    pump(&mut server, &mut client);

    server.update_value(value_handle, vec![85]);
    server.indicate(value_handle).unwrap();
    pump(&mut server, &mut client);

    assert_eq!(
        *updates.borrow(),
        vec![(value_handle, vec![90]), (value_handle, vec![85])]
    );
    // The confirmation freed the indication slot
    assert!(!server.connection().has_pending_indication());
}

#[test]
fn pagination_splits_large_result_sets() {
    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    // 6 bytes per group entry; a 23-byte MTU carries 3 per response, so 7
    // services force at least three exchanges.
    for index in 0..7u16 {
        server.add_service(&Service::new(Uuid::from_u16(0x1800 + index), true));
    }

    let discovered: Rc<RefCell<Vec<DiscoveredService>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = discovered.clone();
    client
        .discover_all_primary_services(Box::new(move |outcome| {
            *sink.borrow_mut() = outcome.unwrap();
        }))
        .unwrap();

    pump(&mut server, &mut client);

    let services = discovered.borrow();
    assert_eq!(services.len(), 7);
    for (index, service) in services.iter().enumerate() {
        assert_eq!(service.uuid, Uuid::from_u16(0x1800 + index as u16));
    }
}
