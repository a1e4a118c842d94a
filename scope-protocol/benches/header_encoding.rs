use std::hint::black_box;

use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use scope_protocol::wire::{Command, FrameBuffer, WireMessage};
use scope_protocol::{Controller, Operation, header};

fn encode_headers(c: &mut Criterion) {
    c.bench_function("encode fpga write", |b| {
        b.iter(|| header::encode(black_box(Controller::Fpga), Operation::Write, 0x05, 3))
    });
    c.bench_function("write packets awg 1k", |b| {
        let payload = vec![0x5A; 1024];
        b.iter(|| header::write_packets(Controller::Awg, 0, black_box(&payload)))
    });
}

fn reassemble(c: &mut Criterion) {
    let message = WireMessage::new(Command::Send, vec![0xC0; 32]);
    let mut stream = Vec::new();
    for _ in 0..64 {
        message.encode_into(&mut stream).unwrap();
    }

    c.bench_function("frame buffer 64 messages", |b| {
        b.iter(|| {
            let mut buffer = FrameBuffer::default();
            let mut count = 0;
            for chunk in stream.chunks(7) {
                buffer.extend(chunk);
                while let Ok(Some(_)) = buffer.next_message() {
                    count += 1;
                }
            }
            black_box(count)
        })
    });

    c.bench_function("decode single", |b| {
        let encoded = message.encode().unwrap();
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            WireMessage::decode(&mut buf, 8192)
        })
    });
}

criterion_group!(benches, encode_headers, reassemble);
criterion_main!(benches);
