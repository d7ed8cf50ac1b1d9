#![no_main]

use bytes::BytesMut;
use cluster_net::core::codec::PacketCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    for mut codec in [PacketCodec::inner(), PacketCodec::outer()] {
        let mut buf = BytesMut::from(data);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
});
