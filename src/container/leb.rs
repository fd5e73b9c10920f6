pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    if remaining == 0 {
        result.push(0);
        return result;
    }

    while remaining != 0 {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);
    }

    result
}

pub(crate) fn decode_uleb128(encoded: &[u8]) -> (u32, usize) {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;
    let mut count: usize = 0;

    for &byte in encoded {
        count += 1;

        let low = (byte & 0x7F) as u32;
        if shift < 32 {
            // guard against UB: saturate the shift and use wrapping to avoid panic
            value = value.wrapping_add(low.wrapping_shl(shift));
        }

        let cont = (byte & 0x80) != 0;
        shift = shift.saturating_add(7);

        // uleb128 values are 32-bit — valid encodings are ≤ 5 bytes.
        if !cont || count == 5 {
            break;
        }
    }

    (value, count)
}
