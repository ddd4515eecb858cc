use deltafile::{DeltaFileReader, DeltaFileWriter, Flavor, Header, check_reader};

fn build() -> Vec<u8> {
    let header = Header {
        url_count: 3,
        range_start: 1_650_000_000_123_456,
        range_end: 1_649_000_000_000_000,
        flavor: Flavor::Dump,
    };
    let mut w = DeltaFileWriter::new(Vec::new(), &header).unwrap();
    w.add_record(b"Q1.ttl", b"<a> <b> <c> .\n").unwrap();
    w.add_record(b"Q2.ttl", b"").unwrap();
    w.add_record(b"Q3.ttl", &[7u8; 200]).unwrap();
    w.finish().unwrap()
}

#[test]
fn every_single_byte_flip_is_detected() {
    let original = build();
    check_reader(original.as_slice()).unwrap();

    for pos in 0..original.len() {
        let mut bytes = original.clone();
        bytes[pos] ^= 0xFF;
        match check_reader(bytes.as_slice()) {
            Err(e) => assert!(e.is_corrupt(), "byte {pos}: unexpected error kind {e}"),
            Ok(_) => panic!("flip at byte {pos} went unnoticed"),
        }
    }
}

#[test]
fn header_flip_reports_header_crc() {
    let mut bytes = build();
    bytes[9] ^= 0x01;
    let err = check_reader(bytes.as_slice()).unwrap_err();
    assert!(err.to_string().contains("CRC-8"), "{err}");
}

#[test]
fn body_flip_reports_record_crc() {
    let mut bytes = build();
    // inside the content of the first record
    let pos = 37 + 1 + 6 + 1 + 3;
    bytes[pos] ^= 0x01;
    let err = check_reader(bytes.as_slice()).unwrap_err();
    assert!(err.to_string().contains("CRC-32"), "{err}");

    let items: Vec<_> = DeltaFileReader::new(bytes.as_slice()).unwrap().collect();
    assert_eq!(items.len(), 4);
    assert!(items[3].as_ref().unwrap_err().is_corrupt());
}
