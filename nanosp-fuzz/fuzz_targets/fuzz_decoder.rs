#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use nanosp_proto::codec::{encode, FrameDecoder, LENGTH_PREFIX_LEN};

const MAX_MSG_SIZE: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size, so the same input also exercises
    // reassembly across arbitrary read boundaries.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut decoder = FrameDecoder::new(Some(MAX_MSG_SIZE));
    let mut src = BytesMut::new();
    let mut consumed = 0;

    for piece in rest.chunks(chunk) {
        src.extend_from_slice(piece);
        loop {
            match decoder.decode(&mut src) {
                Ok(Some(msg)) => {
                    assert!(msg.len() <= MAX_MSG_SIZE);
                    consumed += LENGTH_PREFIX_LEN + msg.len();
                }
                Ok(None) => break,
                // The connection would be dropped here.
                Err(_) => return,
            }
        }
    }
    assert!(consumed <= rest.len());

    // Whatever decoded must re-encode to the bytes it came from.
    let mut again = BytesMut::new();
    let mut decoder = FrameDecoder::new(Some(MAX_MSG_SIZE));
    let mut whole = BytesMut::from(&rest[..consumed]);
    while let Ok(Some(msg)) = decoder.decode(&mut whole) {
        encode(&msg, &mut again);
    }
    assert_eq!(&again[..], &rest[..consumed]);
});
