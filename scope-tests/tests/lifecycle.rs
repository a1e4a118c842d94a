use std::sync::{Arc, Mutex};
use std::time::Duration;

use scope_client::{NetworkScanner, ScannerConfig, TcpChannel};
use scope_interfaces::{ConsistencyError, DeviceScanner, InterfaceManager, LifecycleError};
use scope_protocol::error::Result;
use scope_protocol::{CommandChannel, Controller};
use scope_server::{Builder, UdpAnnouncer};
use scope_tests::{MockScope, Relay, eventually};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Scopes on a simulated bus. Every opened device gets the next serial.
#[derive(Default)]
struct Bus {
    present: Arc<Mutex<Vec<String>>>,
    opened: usize,
}

impl DeviceScanner for Bus {
    type Channel = MockScope;

    fn scan(&mut self) -> Result<Vec<String>> {
        Ok(self.present.lock().unwrap().clone())
    }

    fn open(&mut self, _location: &str) -> Result<Arc<MockScope>> {
        self.opened += 1;
        Ok(Arc::new(MockScope::new(&format!("MOCK{:04}", self.opened))))
    }
}

#[test]
fn unplugging_stops_an_idle_relay_and_replug_is_served() {
    let bus = Bus::default();
    let present = bus.present.clone();
    let mut manager = InterfaceManager::new(bus);

    *present.lock().unwrap() = vec!["usb:001/004".into()];
    manager.poll_device().unwrap();
    let first = manager.registry().get("usb:001/004").unwrap();
    let relay = Relay::start(first.clone(), Builder::new());

    // No client is connected, so no transfer can notice the removal.
    *present.lock().unwrap() = vec![];
    assert_eq!(manager.poll_device().unwrap().removed, ["usb:001/004"]);
    assert!(!first.is_alive());
    assert!(eventually(TIMEOUT, || relay.is_finished()));
    relay.stop().unwrap();

    *present.lock().unwrap() = vec!["usb:001/005".into()];
    assert_eq!(manager.poll_device().unwrap().arrived, ["usb:001/005"]);
    let second = manager.registry().get("usb:001/005").unwrap();
    let relay = Relay::start(second, Builder::new());
    let channel = TcpChannel::connect(relay.addr).unwrap();
    assert_eq!(channel.serial(), "MOCK0002");
}

#[test]
fn announced_relay_is_registered_once_and_again_after_removal() {
    let scanner = NetworkScanner::new(ScannerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ttl: Duration::from_secs(30),
        ..Default::default()
    })
    .unwrap();
    let announcer = Arc::new(UdpAnnouncer::new(scanner.local_addr().unwrap()).unwrap());

    let scope = Arc::new(MockScope::new("MOCK0001"));
    scope.set_controller_register(Controller::Pic, 0, &[42]).unwrap();
    let relay = Relay::start(
        scope.clone(),
        Builder::new()
            .announce_interval(Duration::from_millis(20))
            .announcer(announcer),
    );
    let location = relay.addr.to_string();

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut manager = InterfaceManager::new(scanner);
    manager.subscribe({
        let events = events.clone();
        move |channel, connected| {
            events
                .lock()
                .unwrap()
                .push((channel.serial().to_owned(), connected))
        }
    });

    assert!(eventually(TIMEOUT, || {
        !manager.poll_device().unwrap().arrived.is_empty()
    }));
    let first = manager.registry().get(&location).unwrap();
    assert_eq!(first.serial(), "MOCK0001");
    assert_eq!(
        first
            .get_controller_register(Controller::Pic, 0, 1)
            .unwrap(),
        [42]
    );

    // Serving a client withdraws the announcement, the open channel keeps
    // the relay registered.
    std::thread::sleep(Duration::from_millis(100));
    assert!(manager.poll_device().unwrap().is_empty());
    assert_eq!(manager.registry().len(), 1);

    assert!(matches!(
        manager.device_arrived(&location),
        Err(LifecycleError::Consistency(ConsistencyError::Duplicate(_)))
    ));

    manager.device_removed(&location).unwrap();
    assert!(!first.is_alive());

    assert!(eventually(TIMEOUT, || {
        !manager.poll_device().unwrap().arrived.is_empty()
    }));
    let second = manager.registry().get(&location).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_alive());

    manager.shutdown();
    assert!(manager.registry().is_empty());
    assert_eq!(
        *events.lock().unwrap(),
        [
            ("MOCK0001".to_owned(), true),
            ("MOCK0001".to_owned(), false),
            ("MOCK0001".to_owned(), true),
            ("MOCK0001".to_owned(), false),
        ]
    );
}
