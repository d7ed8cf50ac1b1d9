#![no_main]

use cluster_net::core::packet::ServiceKind;
use cluster_net::core::parser::PacketParser;
use cluster_net::core::ring_buffer::RingBuffer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary stream fed in uneven pieces; must end in packets or an error, never a panic
    for kind in [ServiceKind::Inner, ServiceKind::Outer] {
        let mut buffer = RingBuffer::new(64);
        let mut parser = PacketParser::new(kind);
        let step = usize::from(data.first().copied().unwrap_or(1)).max(1);
        'feed: for piece in data.chunks(step) {
            buffer.write(piece);
            loop {
                match parser.parse(&mut buffer) {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(_) => break 'feed,
                }
            }
        }
    }
});
