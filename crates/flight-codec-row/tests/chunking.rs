//! 任意切分的字节块必须解码出与整块输入相同的行序列。

use flight_codec_row::{RowDecoder, RowTag, decode_rows, encode_row};
use flight_core::RowId;
use proptest::prelude::*;

fn sample_stream(payloads: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, payload) in payloads.iter().enumerate() {
        let id = RowId::new(index as u64 + 1).expect("non-zero id");
        let tag = if index % 3 == 2 {
            RowTag::Error
        } else {
            RowTag::Model
        };
        let json = serde_json::to_string(payload).expect("string to json");
        out.extend_from_slice(&encode_row(id, tag, &json).expect("encode"));
    }
    out
}

proptest! {
    #[test]
    fn arbitrary_chunk_boundaries_yield_identical_rows(
        payloads in prop::collection::vec("\\PC{0,12}", 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let bytes = sample_stream(&payloads);
        let (expected, consumed) = decode_rows(&bytes, None).expect("whole input");
        prop_assert_eq!(consumed, bytes.len());

        let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(bytes.len())).collect();
        offsets.push(0);
        offsets.push(bytes.len());
        offsets.sort_unstable();
        offsets.dedup();

        let mut decoder = RowDecoder::new();
        let mut rows = Vec::new();
        for window in offsets.windows(2) {
            rows.extend(decoder.decode(&bytes[window[0]..window[1]]).expect("chunk"));
        }
        decoder.finish().expect("no truncated tail");
        prop_assert_eq!(rows, expected);
    }
}
