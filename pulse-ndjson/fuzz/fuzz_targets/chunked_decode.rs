#![no_main]
use libfuzzer_sys::fuzz_target;
use pulse_ndjson::NdjsonDecoder;

fuzz_target!(|data: &[u8]| {
    let Some((&cut, body)) = data.split_first() else {
        return;
    };
    let cut = usize::from(cut).min(body.len());

    let mut whole = NdjsonDecoder::new();
    let mut expected = whole.feed(body);
    expected.extend(whole.finish());

    let mut split = NdjsonDecoder::new();
    let mut actual = split.feed(&body[..cut]);
    actual.extend(split.feed(&body[cut..]));
    actual.extend(split.finish());

    assert_eq!(expected, actual);
});
