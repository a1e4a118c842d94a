use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use scope_protocol::codec::{WireCodec, data_link_codec};
use scope_protocol::header;
use scope_protocol::wire::{Command, FrameBuffer, WireMessage};
use scope_protocol::{Controller, Operation};
use scope_server::Builder;
use scope_tests::{BURST_FRAMER, BURST_SIZE, MockScope, Relay, verify_package};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

fn messages() -> Vec<WireMessage> {
    vec![
        WireMessage::new(Command::Send, [0xC0, 2, 0x10, 2, 0xAA, 0xBB]),
        WireMessage::read(12),
        WireMessage::read_hbw(4096),
        WireMessage::new(Command::Send, vec![0x55; 600]),
        WireMessage::new(Command::Flush, []),
        WireMessage::new(Command::Disconnect, []),
    ]
}

#[tokio::test]
async fn framed_read_agrees_with_frame_buffer() {
    let mut bytes = Vec::new();
    for message in messages() {
        message.encode_into(&mut bytes).unwrap();
    }

    let mut buffer = FrameBuffer::default();
    let mut reassembled = Vec::new();
    for chunk in bytes.chunks(7) {
        buffer.extend(chunk);
        while let Some(message) = buffer.next_message().unwrap() {
            reassembled.push(message);
        }
    }
    assert_eq!(buffer.pending(), 0);

    let (mut writer, reader) = tokio::io::duplex(16);
    let feed = tokio::spawn(async move {
        for chunk in bytes.chunks(5) {
            writer.write_all(chunk).await.unwrap();
        }
    });
    let decoded: Vec<WireMessage> = FramedRead::new(reader, WireCodec::default())
        .map(|message| message.unwrap())
        .collect()
        .await;
    feed.await.unwrap();

    assert_eq!(decoded, messages());
    assert_eq!(reassembled, decoded);
}

#[tokio::test]
async fn async_client_against_relay() {
    let scope = Arc::new(MockScope::new("MOCK0001"));
    let relay = Relay::start(
        scope.clone(),
        Builder::new().burst_size(BURST_SIZE).framer(BURST_FRAMER),
    );

    let (mut rd, wr) = TcpStream::connect(relay.addr).await.unwrap().into_split();
    let mut sink = FramedWrite::new(wr, WireCodec::default());

    let mut write = header::encode(Controller::Pic, Operation::Write, 0x30, 2).unwrap();
    write.extend_from_slice(&[0x12, 0x34]);
    sink.send(WireMessage::new(Command::Send, write))
        .await
        .unwrap();
    let read = header::encode(Controller::Pic, Operation::Read, 0x30, 2).unwrap();
    sink.send(WireMessage::new(Command::Send, read)).await.unwrap();
    sink.send(WireMessage::read(16)).await.unwrap();

    let mut probe = [0u8; 16];
    rd.read_exact(&mut probe).await.unwrap();
    assert_eq!(
        header::read_response(Controller::Pic, &probe, 2).unwrap(),
        [0x12, 0x34]
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    sink.send(WireMessage::start_data_link(port)).await.unwrap();
    let (data, _) = listener.accept().await.unwrap();
    let mut packages = FramedRead::new(data, data_link_codec(1 << 20));
    for seq in 0..10 {
        let package = packages.next().await.unwrap().unwrap();
        assert_eq!(verify_package(&package), seq);
    }

    sink.send(WireMessage::new(Command::Disconnect, []))
        .await
        .unwrap();
    let mut rest = Vec::new();
    rd.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
