//! Runs a GATT server and client against each other over the in-process
//! pipe transport: MTU exchange, service discovery, a read, a write, and a
//! notification.
//!
//! Run with: RUST_LOG=debug cargo run --example gatt_loopback

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use blueatt::att::ConnectionError;
use blueatt::gatt::{
    Characteristic, CharacteristicProperties, Descriptor, GattClient, GattServer, Permissions,
    Service, CLIENT_CHAR_CONFIG_UUID,
};
use blueatt::transport::{pipe, PipeTransport};
use blueatt::uuid::Uuid;

fn drain_reads(mut read: impl FnMut() -> Result<(), ConnectionError>) {
    loop {
        match read() {
            Ok(()) => {}
            Err(ConnectionError::Transport(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                break
            }
            Err(err) => panic!("bearer failure: {}", err),
        }
    }
}

fn pump(server: &mut GattServer<PipeTransport>, client: &mut GattClient<PipeTransport>) {
    loop {
        let wrote = client.write_all().unwrap() + server.write_all().unwrap();

        drain_reads(|| server.read());
        drain_reads(|| client.read());

        if wrote == 0
            && client.connection().queued_sends() == 0
            && server.connection().queued_sends() == 0
        {
            break;
        }
    }
}

fn main() {
    env_logger::init();

    let (server_end, client_end) = pipe();
    let mut server = GattServer::new(server_end);
    let mut client = GattClient::new(client_end);

    // Battery service with a readable, notifying level characteristic
    let range = server.add_service(
        &Service::new(Uuid::from_u16(0x180F), true).with_characteristic(
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
        ),
    );
    println!(
        "server: battery service at 0x{:04X}..=0x{:04X}",
        range.start, range.end
    );

    client
        .exchange_mtu(
            185,
            Box::new(|outcome| println!("client: negotiated MTU {}", outcome.unwrap())),
        )
        .unwrap();
    pump(&mut server, &mut client);

    let services = Rc::new(RefCell::new(Vec::new()));
    let sink = services.clone();
    client
        .discover_all_primary_services(Box::new(move |outcome| {
            *sink.borrow_mut() = outcome.unwrap();
        }))
        .unwrap();
    pump(&mut server, &mut client);

    for service in services.borrow().iter() {
        println!(
            "client: service {} at 0x{:04X}..=0x{:04X}",
            service.uuid, service.range.start, service.range.end
        );
    }

    let battery = services.borrow()[0].range;
    let characteristics = Rc::new(RefCell::new(Vec::new()));
    let sink = characteristics.clone();
    client
        .discover_characteristics(
            battery,
            Box::new(move |outcome| {
                *sink.borrow_mut() = outcome.unwrap();
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);

    let value_handle = characteristics.borrow()[0].value_handle;
    println!("client: battery level at 0x{:04X}", value_handle);

    client
        .read_characteristic(
            value_handle,
            Box::new(|outcome| println!("client: battery level = {:?}", outcome.unwrap())),
        )
        .unwrap();
    pump(&mut server, &mut client);

    // Subscribe by writing the CCC descriptor, then let the server push an
    // update.
    client.register_notifications(Box::new(|handle, value| {
        println!("client: notification 0x{:04X} -> {:?}", handle, value);
    }));
    client
        .write_characteristic(
            value_handle + 1,
            vec![0x01, 0x00],
            Box::new(|outcome| {
                outcome.unwrap();
                println!("client: subscribed to notifications");
            }),
        )
        .unwrap();
    pump(&mut server, &mut client);

    server.update_value(value_handle, vec![97]);
    server.notify(value_handle).unwrap();
    pump(&mut server, &mut client);
}
