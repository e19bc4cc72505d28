#[macro_use]
extern crate criterion;

extern crate neutronium;

use criterion::black_box;
use criterion::Criterion;
use neutronium::net::reassembler::{Inspection, Inspector, Reassembler};

struct LengthPrefixed;

impl Inspector for LengthPrefixed {
    fn header_size(&self) -> usize {
        4
    }

    fn inspect(&self, header: &[u8]) -> Inspection {
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        Inspection::Valid(len + 4)
    }
}

fn make_message(payload_len: usize) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + payload_len);
    msg.extend_from_slice(&(payload_len as u32).to_be_bytes());
    msg.extend(std::iter::repeat(0xABu8).take(payload_len));
    msg
}

fn reassembler_throughput(c: &mut Criterion) {
    let message = make_message(512);

    c.bench_function("reassembler feed+pop one message", move |b| {
        b.iter_with_setup(
            || Reassembler::new(LengthPrefixed, 1 << 20),
            |mut reassembler| {
                reassembler.feed(&message).unwrap();
                black_box(reassembler.pop().unwrap());
            },
        )
    });

    c.bench_function("reassembler byte-at-a-time feed", move |b| {
        let message = make_message(64);
        b.iter_with_setup(
            || Reassembler::new(LengthPrefixed, 1 << 20),
            |mut reassembler| {
                for byte in message.iter() {
                    reassembler.feed(std::slice::from_ref(byte)).unwrap();
                }
                black_box(reassembler.pop().unwrap());
            },
        )
    });
}

criterion_group!(benches, reassembler_throughput);
criterion_main!(benches);
