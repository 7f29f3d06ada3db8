#![no_main]

use libfuzzer_sys::fuzz_target;
use nanosp_proto::handshake::{build_header, parse_header, HEADER_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(header) = <[u8; HEADER_LEN]>::try_from(data) else {
        return;
    };
    // Any accepted header must be the canonical one for its protocol.
    if let Ok(protocol) = parse_header(&header) {
        assert_eq!(build_header(protocol), header);
    }
});
