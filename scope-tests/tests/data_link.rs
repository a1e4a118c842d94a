use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scope_client::{DataLink, TcpChannel};
use scope_protocol::{CommandChannel, Controller};
use scope_server::Builder;
use scope_tests::{BURST_FRAMER, BURST_SIZE, MockScope, Relay, verify_package};

fn relay(scope: &Arc<MockScope>) -> Relay {
    Relay::start(
        scope.clone(),
        Builder::new().burst_size(BURST_SIZE).framer(BURST_FRAMER),
    )
}

#[test]
fn packages_stay_intact_while_control_traffic_runs() {
    let scope = Arc::new(MockScope::new("MOCK0001"));
    let relay = relay(&scope);
    let channel = Arc::new(TcpChannel::connect(relay.addr).unwrap());
    let mut link = DataLink::request(&channel).unwrap();
    link.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let control = thread::spawn({
        let channel = channel.clone();
        move || {
            for i in 0..200u32 {
                let value = [(i % 256) as u8, (i / 256) as u8];
                channel
                    .set_controller_register(Controller::Rom, 0x10, &value)
                    .unwrap();
                assert_eq!(
                    channel
                        .get_controller_register(Controller::Rom, 0x10, 2)
                        .unwrap(),
                    value
                );
            }
        }
    });

    let mut expected = 0;
    for _ in 0..300 {
        let package = link.next_package().unwrap();
        assert_eq!(verify_package(&package), expected);
        expected += 1;
    }
    control.join().unwrap();
}

#[test]
fn data_link_failure_ends_the_session() {
    let scope = Arc::new(MockScope::new("MOCK0001").with_burst_limit(5));
    let relay = relay(&scope);
    let channel = TcpChannel::connect(relay.addr).unwrap();
    let mut link = DataLink::request(&channel).unwrap();
    link.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    for seq in 0..5 {
        assert_eq!(verify_package(&link.next_package().unwrap()), seq);
    }
    // The data endpoint ran dry. The pump is not restarted and the control
    // connection is closed as well.
    assert!(link.next_package().unwrap_err().is_link_down());
    assert!(
        channel
            .get_controller_register(Controller::Pic, 0, 1)
            .unwrap_err()
            .is_link_down()
    );

    // The relay itself keeps serving.
    let channel = TcpChannel::connect(relay.addr).unwrap();
    assert_eq!(channel.serial(), "MOCK0001");
}

#[test]
fn closing_the_client_stops_the_pump() {
    let scope = Arc::new(MockScope::new("MOCK0001"));
    let relay = relay(&scope);
    let channel = TcpChannel::connect(relay.addr).unwrap();
    let mut link = DataLink::request(&channel).unwrap();
    link.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    verify_package(&link.next_package().unwrap());

    channel.destroy();
    let mut drained = 0;
    while link.next_package().is_ok() {
        drained += 1;
        assert!(drained < 1_000_000, "pump kept running");
    }
    relay.stop().unwrap();
}
