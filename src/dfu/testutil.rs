//! Shared fixtures for the DFU tests.

/// Build a Target record declaring `declared_count` elements but carrying
/// only the given ones. Offsets match the DfuSe layout the parser reads:
/// element count at byte 267, first element at byte 274.
pub(crate) fn build_target(declared_count: u16, elements: &[(u32, &[u8])]) -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(b"Target");
    record.resize(267, 0);
    record.extend_from_slice(&declared_count.to_le_bytes());
    record.resize(274, 0);
    for (address, data) in elements {
        record.extend_from_slice(&address.to_le_bytes());
        record.extend_from_slice(&(data.len() as u32).to_le_bytes());
        record.extend_from_slice(data);
    }
    record
}

/// Assemble a signed DfuSe container from Target records.
pub(crate) fn build_dfuse(targets: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"DfuSe");
    for target in targets {
        buf.extend_from_slice(target);
    }
    buf
}

/// A 6-byte GETSTATUS answer reporting `state` with a zero poll timeout.
pub(crate) fn status_bytes(state: u8) -> [u8; 6] {
    [0, 0, 0, 0, state, 0]
}
