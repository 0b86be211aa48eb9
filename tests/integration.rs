//! Integration tests for insteon-gateway.
//!
//! Each test plays the gateway's side of the serial line over an in-memory
//! duplex stream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use insteon_gateway::links::{LinkAccess, LinkRecord};
use insteon_gateway::registry::{DeviceRecord, DeviceRegistry, DeviceType, MemoryRegistry};
use insteon_gateway::{Address, InsteonError, Level, LevelSource, LevelUnit, Modem};

const A: Address = Address::new(0x12, 0x5F, 0x5E);
const B: Address = Address::new(0x42, 0x22, 0xB8);
const GATEWAY: Address = Address::new(0x11, 0x2F, 0x19);

/// The gateway end of the line.
struct FakeGateway {
    line: DuplexStream,
}

impl FakeGateway {
    /// Read exactly `expected.len()` bytes and check them.
    async fn expect(&mut self, expected: &[u8]) {
        let mut got = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), self.line.read_exact(&mut got))
            .await
            .expect("engine sent nothing")
            .unwrap();
        assert_eq!(got, expected);
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.line.write_all(bytes).await.unwrap();
        self.line.flush().await.unwrap();
    }

    /// Expect `request` and echo it back with ACK.
    async fn ack(&mut self, request: &[u8]) {
        self.expect(request).await;
        let mut echo = request.to_vec();
        echo.push(0x06);
        self.send(&echo).await;
    }

    /// One standard command from the engine, answered by the device with
    /// `reply` in cmd2.
    async fn answer(&mut self, device: Address, cmd1: u8, cmd2: u8, reply: u8) {
        self.ack(&standard(device, cmd1, cmd2)).await;
        self.send(&direct_ack(device, cmd1, reply)).await;
    }

    /// Register page select for the link table.
    async fn page(&mut self, device: Address) {
        self.answer(device, 0x28, 0x0F, 0x0F).await;
    }

    async fn peek(&mut self, device: Address, low: u8, value: u8) {
        self.answer(device, 0x2B, low, value).await;
    }

    async fn poke(&mut self, device: Address, value: u8) {
        self.answer(device, 0x29, value, value).await;
    }

    /// Peek every byte of `record` at `slot`.
    async fn serve_slot(&mut self, device: Address, slot: u8, record: &LinkRecord) {
        for (k, byte) in record.to_bytes().into_iter().enumerate() {
            self.peek(device, slot + k as u8, byte).await;
        }
    }

    /// Expect a peek/poke pair for each byte of `record` at `slot`.
    async fn expect_written(&mut self, device: Address, slot: u8, record: &LinkRecord) {
        self.page(device).await;
        for (k, byte) in record.to_bytes().into_iter().enumerate() {
            self.peek(device, slot + k as u8, 0x00).await;
            self.poke(device, byte).await;
        }
    }

    /// Product data reply carrying `category`/`subcategory`.
    async fn product_data(&mut self, device: Address, category: u8, subcategory: u8) {
        self.answer(device, 0x03, 0x00, 0x00).await;
        let [a, b, c] = device.bytes();
        let [g1, g2, g3] = GATEWAY.bytes();
        let mut frame = vec![0x02, 0x51, a, b, c, g1, g2, g3, 0x1A, 0x03, 0x00];
        let mut data = [0u8; 14];
        data[4] = category;
        data[5] = subcategory;
        frame.extend_from_slice(&data);
        self.send(&frame).await;
    }

    /// Bulk read of the whole table, answered with `table` and a terminator.
    async fn serve_bulk_table(&mut self, device: Address, table: &[LinkRecord]) {
        self.ack(&extended(device, 0x2F, 0x00, [0u8; 14])).await;
        self.send(&direct_ack(device, 0x2F, 0x00)).await;
        for record in table {
            self.send(&link_reply(device, record)).await;
        }
        self.send(&link_reply(device, &LinkRecord::empty())).await;
    }

    /// Expect a bulk write of `record` at table `offset`.
    async fn expect_bulk_write(&mut self, device: Address, offset: u16, record: &LinkRecord) {
        let mut data = [0u8; 14];
        data[1] = 0x02;
        data[2..4].copy_from_slice(&offset.to_be_bytes());
        data[4] = 0x08;
        data[5..13].copy_from_slice(&record.to_bytes());
        self.ack(&extended(device, 0x2F, 0x00, data)).await;
        self.send(&direct_ack(device, 0x2F, 0x00)).await;
    }
}

fn standard(to: Address, cmd1: u8, cmd2: u8) -> Vec<u8> {
    let [a, b, c] = to.bytes();
    vec![0x02, 0x62, a, b, c, 0x0F, cmd1, cmd2]
}

fn extended(to: Address, cmd1: u8, cmd2: u8, data: [u8; 14]) -> Vec<u8> {
    let [a, b, c] = to.bytes();
    let mut msg = vec![0x02, 0x62, a, b, c, 0x1F, cmd1, cmd2];
    msg.extend_from_slice(&data);
    msg
}

fn direct_ack(from: Address, cmd1: u8, cmd2: u8) -> Vec<u8> {
    let [a, b, c] = from.bytes();
    let [g1, g2, g3] = GATEWAY.bytes();
    vec![0x02, 0x50, a, b, c, g1, g2, g3, 0x2B, cmd1, cmd2]
}

fn link_reply(from: Address, record: &LinkRecord) -> Vec<u8> {
    let [a, b, c] = from.bytes();
    let [g1, g2, g3] = GATEWAY.bytes();
    let mut frame = vec![0x02, 0x51, a, b, c, g1, g2, g3, 0x11, 0x2F, 0x00];
    frame.extend_from_slice(&[0x00, 0x01, 0x0F, 0xFF, 0x00]);
    frame.extend_from_slice(&record.to_bytes());
    frame.push(0x00);
    frame
}

fn setup(registry: Option<Arc<MemoryRegistry>>) -> (Modem, FakeGateway) {
    let (ours, line) = tokio::io::duplex(1024);
    let mut builder = Modem::builder()
        .echo_timeout(Duration::from_millis(500))
        .response_timeout(Duration::from_millis(500))
        .read_timeout(Duration::from_millis(100));
    if let Some(registry) = registry {
        builder = builder.registry(registry);
    }
    (builder.build(ours), FakeGateway { line })
}

fn registry_with_a() -> Arc<MemoryRegistry> {
    Arc::new(MemoryRegistry::new(vec![DeviceRecord::new(
        "hall",
        A,
        DeviceType::Dimmer,
    )]))
}

#[tokio::test]
async fn test_set_level_percent_updates_mirror() {
    let registry = registry_with_a();
    let (modem, mut gw) = setup(Some(registry.clone()));

    let gateway = tokio::spawn(async move {
        gw.ack(&standard(A, 0x11, 128)).await;
        gw.send(&direct_ack(A, 0x11, 128)).await;
        gw
    });

    let hall = modem.resolve("hall").unwrap();
    modem.set_level(hall.address, Level::Percent(50)).await.unwrap();
    gateway.await.unwrap();

    assert_eq!(registry.level_for_address(A), Some(128));
    assert_eq!(
        modem
            .get_level(A, LevelUnit::Percent, LevelSource::Mirror)
            .await
            .unwrap(),
        50
    );
    assert_eq!(modem.reset_count(), 0);
    modem.shutdown().await;
}

#[tokio::test]
async fn test_set_level_zero_sends_off() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.ack(&standard(A, 0x13, 0)).await;
        gw.send(&direct_ack(A, 0x13, 0)).await;
        gw
    });

    modem.set_level(A, Level::Direct(0)).await.unwrap();
    gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_single_byte_echo_difference_resets_once() {
    for position in [2usize, 3, 4, 6, 7] {
        let (modem, mut gw) = setup(None);

        let gateway = tokio::spawn(async move {
            let request = standard(A, 0x11, 0xFF);
            gw.expect(&request).await;
            let mut echo = request;
            echo[position] ^= 0x01;
            echo.push(0x06);
            gw.send(&echo).await;
            gw
        });

        let err = modem.set_level(A, Level::Direct(0xFF)).await.unwrap_err();
        assert!(
            matches!(err, InsteonError::EchoMismatch { .. }),
            "byte {position}: {err}"
        );
        assert!(err.is_desync());
        assert_eq!(modem.reset_count(), 1, "byte {position}");
        let _gw = gateway.await.unwrap();
        modem.shutdown().await;
    }
}

#[tokio::test]
async fn test_nack_is_not_a_reset() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        let request = standard(A, 0x19, 0x00);
        gw.expect(&request).await;
        let mut nack = request;
        nack.push(0x15);
        gw.send(&nack).await;
        gw
    });

    let err = modem
        .get_level(A, LevelUnit::Direct, LevelSource::Device)
        .await
        .unwrap_err();
    assert!(matches!(err, InsteonError::Nack));
    assert_eq!(modem.reset_count(), 0);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_response_timeout_resets() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.ack(&standard(A, 0x19, 0x00)).await;
        gw
    });

    let err = modem
        .get_level(A, LevelUnit::Direct, LevelSource::Device)
        .await
        .unwrap_err();
    assert!(matches!(err, InsteonError::ResponseTimeout));
    assert_eq!(modem.reset_count(), 1);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_other_device_traffic_goes_to_listeners() {
    let (modem, mut gw) = setup(None);

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = heard.clone();
    modem.register_listener(None, move |event| {
        sink.lock().unwrap().push(event.from());
    });

    let gateway = tokio::spawn(async move {
        gw.ack(&standard(A, 0x19, 0x00)).await;
        // B speaks first; only A's reply answers the request.
        gw.send(&direct_ack(B, 0x11, 0xFF)).await;
        gw.send(&direct_ack(A, 0x00, 0x40)).await;
        gw
    });

    let level = modem
        .get_level(A, LevelUnit::Direct, LevelSource::Device)
        .await
        .unwrap();
    assert_eq!(level, 0x40);
    let _gw = gateway.await.unwrap();

    // The dispatcher runs on its own task.
    for _ in 0..50 {
        if !heard.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*heard.lock().unwrap(), vec![Some(B)]);
    modem.shutdown().await;
}

#[tokio::test]
async fn test_gateway_info() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.expect(&[0x02, 0x60]).await;
        gw.send(&[0x02, 0x60, 0x11, 0x2F, 0x19, 0x03, 0x15, 0x9B, 0x06])
            .await;
        gw
    });

    let info = modem.gateway_info().await.unwrap();
    assert_eq!(info.address, GATEWAY);
    assert_eq!(info.category, 0x03);
    assert_eq!(info.subcategory, 0x15);
    assert_eq!(info.firmware, 0x9B);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_gateway_link_table_ends_on_nack() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.ack(&[0x02, 0x69]).await;
        gw.send(&[0x02, 0x57, 0xE2, 0x01, 0x12, 0x5F, 0x5E, 0x01, 0x20, 0x41])
            .await;
        gw.ack(&[0x02, 0x6A]).await;
        gw.send(&[0x02, 0x57, 0xA2, 0x00, 0x42, 0x22, 0xB8, 0x01, 0x20, 0x41])
            .await;
        gw.expect(&[0x02, 0x6A]).await;
        gw.send(&[0x02, 0x6A, 0x15]).await;
        gw
    });

    let records = modem.gateway_link_table().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].peer, A);
    assert!(records[0].is_controller());
    assert_eq!(records[1].peer, B);
    assert!(!records[1].is_controller());
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_bulk_read_all_links() {
    let (modem, mut gw) = setup(None);
    let table = vec![
        LinkRecord::responder(1, B, 1),
        LinkRecord::controller(1, B, 1),
        LinkRecord::responder(3, GATEWAY, 3),
    ];

    let replies = table.clone();
    let gateway = tokio::spawn(async move {
        let [a, b, c] = A.bytes();
        let mut request = vec![0x02, 0x62, a, b, c, 0x1F, 0x2F, 0x00];
        request.extend_from_slice(&[0u8; 14]);
        gw.ack(&request).await;
        gw.send(&direct_ack(A, 0x2F, 0x00)).await;
        for record in &replies {
            gw.send(&link_reply(A, record)).await;
        }
        gw.send(&link_reply(A, &LinkRecord::empty())).await;
        gw
    });

    let records = modem.read_links(A, None, LinkAccess::Bulk).await.unwrap();
    assert_eq!(records, table);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_bulk_read_single_link() {
    let (modem, mut gw) = setup(None);
    let record = LinkRecord::controller(2, B, 1);

    let reply = record;
    let gateway = tokio::spawn(async move {
        let [a, b, c] = A.bytes();
        let mut request = vec![0x02, 0x62, a, b, c, 0x1F, 0x2F, 0x00];
        let mut data = [0u8; 14];
        data[2..5].copy_from_slice(&[0x0F, 0xF7, 0x01]);
        request.extend_from_slice(&data);
        gw.ack(&request).await;
        gw.send(&direct_ack(A, 0x2F, 0x00)).await;
        gw.send(&link_reply(A, &reply)).await;
        gw
    });

    let records = modem.read_links(A, Some(1), LinkAccess::Bulk).await.unwrap();
    assert_eq!(records, vec![record]);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_group_broadcast_updates_relay_mirror() {
    let mut garage = DeviceRecord::new("garage", B, DeviceType::GarageIo);
    garage.responds_to.push(insteon_gateway::DeviceRef::new(A, Some(1)));
    let registry = Arc::new(MemoryRegistry::new(vec![
        DeviceRecord::new("hall", A, DeviceType::Dimmer),
        garage,
    ]));
    let (modem, mut gw) = setup(Some(registry.clone()));

    // Group 1 ON broadcast from A.
    let [a, b, c] = A.bytes();
    gw.send(&[0x02, 0x50, a, b, c, 0x00, 0x00, 0x01, 0xCF, 0x11, 0x00])
        .await;

    for _ in 0..50 {
        if registry.level_for_address(B) == Some(0xFF) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.level_for_address(B), Some(0xFF));
    modem.shutdown().await;
}

#[tokio::test]
async fn test_group_broadcast_refreshes_dimmer_after_settling() {
    let mut lamp = DeviceRecord::new("lamp", B, DeviceType::Dimmer);
    lamp.responds_to.push(insteon_gateway::DeviceRef::new(A, Some(1)));
    let registry = Arc::new(MemoryRegistry::new(vec![lamp]));
    let (ours, line) = tokio::io::duplex(1024);
    let modem = Modem::builder()
        .echo_timeout(Duration::from_millis(500))
        .response_timeout(Duration::from_millis(500))
        .read_timeout(Duration::from_millis(100))
        .settle_delay(Duration::from_millis(50))
        .registry(registry.clone())
        .build(ours);
    let mut gw = FakeGateway { line };

    let [a, b, c] = A.bytes();
    gw.send(&[0x02, 0x50, a, b, c, 0x00, 0x00, 0x01, 0xCF, 0x11, 0x00])
        .await;
    // The dimmer is still ramping, so its level comes from a status query.
    assert_eq!(registry.level_for_address(B), Some(0));
    gw.answer(B, 0x19, 0x00, 0x80).await;

    for _ in 0..50 {
        if registry.level_for_address(B) == Some(0x80) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.level_for_address(B), Some(0x80));
    modem.shutdown().await;
}

#[tokio::test]
async fn test_legacy_read_stops_at_empty_slot() {
    let (modem, mut gw) = setup(None);
    let table = vec![LinkRecord::controller(1, B, 0), LinkRecord::responder(3, B, 3)];

    let replies = table.clone();
    let gateway = tokio::spawn(async move {
        gw.page(A).await;
        gw.serve_slot(A, 0xF8, &replies[0]).await;
        gw.serve_slot(A, 0xF0, &replies[1]).await;
        // Zero flags: nothing more is read from this slot.
        gw.peek(A, 0xE8, 0x00).await;
        gw
    });

    let records = modem.read_links(A, None, LinkAccess::Legacy).await.unwrap();
    assert_eq!(records, table);
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_create_link_writes_both_tables() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.product_data(A, 0x01, 0x00).await;
        gw.product_data(B, 0x01, 0x15).await;

        // Both tables are empty.
        gw.page(A).await;
        gw.peek(A, 0xF8, 0x00).await;
        gw.page(B).await;
        gw.peek(B, 0xF8, 0x00).await;

        let [a1, a2, a3] = A.bytes();
        let [b1, b2, b3] = B.bytes();
        let controller =
            LinkRecord::from_bytes(&[0xE2, 0x01, b1, b2, b3, 0xFF, 0x1C, 0x00]).unwrap();
        let responder =
            LinkRecord::from_bytes(&[0xA2, 0x01, a1, a2, a3, 0xFF, 0x1C, 0x00]).unwrap();
        gw.expect_written(A, 0xF8, &controller).await;
        gw.expect_written(B, 0xF8, &responder).await;
        gw
    });

    let (controller, responder) = modem
        .create_link(
            insteon_gateway::DeviceRef::new(A, None),
            insteon_gateway::DeviceRef::new(B, None),
        )
        .await
        .unwrap();
    assert_eq!(controller, LinkRecord::controller(1, B, 0));
    assert_eq!(responder, LinkRecord::responder(1, A, 0));
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_delete_link_moves_last_record() {
    let (modem, mut gw) = setup(None);
    let table = [
        LinkRecord::controller(1, B, 0),
        LinkRecord::responder(2, B, 0),
        LinkRecord::responder(3, B, 0),
    ];

    let gateway = tokio::spawn(async move {
        gw.serve_bulk_table(A, &table).await;
        gw.expect_bulk_write(A, 0x0FFF, &table[2]).await;
        gw.expect_bulk_write(A, 0x0FEF, &LinkRecord::empty()).await;
        gw
    });

    modem.delete_link(A, Some(0)).await.unwrap();
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_delete_only_link_zeroes_it() {
    let (modem, mut gw) = setup(None);
    let table = [LinkRecord::controller(1, B, 0)];

    let gateway = tokio::spawn(async move {
        gw.serve_bulk_table(A, &table).await;
        gw.expect_bulk_write(A, 0x0FFF, &LinkRecord::empty()).await;
        gw
    });

    modem.delete_link(A, Some(0)).await.unwrap();
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}

#[tokio::test]
async fn test_delete_link_from_empty_table() {
    let (modem, mut gw) = setup(None);

    let gateway = tokio::spawn(async move {
        gw.serve_bulk_table(A, &[]).await;
        gw
    });

    assert!(matches!(
        modem.delete_link(A, Some(0)).await,
        Err(InsteonError::InvalidParameter(_))
    ));
    let _gw = gateway.await.unwrap();
    modem.shutdown().await;
}
