#![no_main]

//! Fuzz target for Theora quantizer header parsing.
//!
//! Parses arbitrary bytes as a quantizer table header. Anything that parses
//! must build into tables and serialize back to an equivalent header.

use libfuzzer_sys::fuzz_target;
use transcode_theora::{read_qtables, write_qtables, QuantTables};

fuzz_target!(|data: &[u8]| {
    if data.len() > 64 * 1024 {
        return;
    }

    let Ok(info) = read_qtables(data) else {
        return;
    };

    let tables = QuantTables::build(&info).expect("parsed info is valid");
    for qi in 0..64u8 {
        let _ = tables.frame_dequant(qi);
    }

    let bytes = write_qtables(&info).expect("parsed info serializes");
    let reparsed = read_qtables(&bytes).expect("serialized info parses");
    assert_eq!(reparsed, info);
});
