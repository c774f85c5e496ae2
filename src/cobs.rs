// Author: Lukas Bower
// Purpose: Consistent Overhead Byte Stuffing encode/decode for wire framing.
//! COBS (Consistent Overhead Byte Stuffing) encode and decode.
//!
//! Encoding turns an arbitrary byte sequence into one with no `0x00` bytes,
//! so a single `0x00` can delimit frames on the wire. Both directions are
//! pure and allocation-free given caller-provided buffers.

use crate::error::CobsError;

/// Upper bound on the encoded length of an `n`-byte input.
pub fn max_encoded_len(n: usize) -> usize {
    n + n.div_ceil(254).max(1)
}

/// Encode `input` into `out`, returning the number of bytes written.
///
/// `out` must be at least [`max_encoded_len`] bytes. The encoded form does
/// not include the trailing `0x00` frame delimiter; callers append that
/// themselves before writing to the wire.
pub fn encode(input: &[u8], out: &mut [u8]) -> Result<usize, CobsError> {
    let mut written = 0usize;
    // Index of the code byte for the block currently being filled.
    let mut code_idx = 0usize;
    let mut code: u8 = 1;
    // Set after a maximal-run flush: the next block's code byte is not
    // reserved yet, since a maximal run never has an implicit trailing
    // zero and may legitimately be the last thing in the input.
    let mut pending_block = false;

    let push = |out: &mut [u8], written: &mut usize, byte: u8| -> Result<(), CobsError> {
        *out.get_mut(*written).ok_or(CobsError::OutputExhausted(*written))? = byte;
        *written += 1;
        Ok(())
    };

    // Reserve the first code byte slot.
    push(out, &mut written, 0)?;

    for &byte in input {
        if pending_block {
            code_idx = written;
            push(out, &mut written, 0)?;
            pending_block = false;
        }
        if byte == 0 {
            out[code_idx] = code;
            code_idx = written;
            push(out, &mut written, 0)?;
            code = 1;
            continue;
        }
        push(out, &mut written, byte)?;
        code += 1;
        if code == 0xFF {
            out[code_idx] = code;
            code = 1;
            pending_block = true;
        }
    }
    if !pending_block {
        out[code_idx] = code;
    }
    Ok(written)
}

/// Encode `input`, allocating the output buffer.
pub fn encode_vec(input: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; max_encoded_len(input.len())];
    let n = encode(input, &mut out).expect("buffer sized by max_encoded_len");
    out.truncate(n);
    out
}

/// Decode a single COBS-encoded frame (without its trailing `0x00`
/// delimiter) into `out`, returning the number of bytes written.
pub fn decode(input: &[u8], out: &mut [u8]) -> Result<usize, CobsError> {
    let mut written = 0usize;
    let mut pos = 0usize;

    while pos < input.len() {
        let code = input[pos];
        if code == 0 {
            return Err(CobsError::ZeroCode(pos));
        }
        let block_len = (code - 1) as usize;
        let data_start = pos + 1;
        let data_end = data_start + block_len;
        if data_end > input.len() {
            return Err(CobsError::Overrun(pos));
        }
        for &byte in &input[data_start..data_end] {
            if byte == 0 {
                return Err(CobsError::InteriorZero(data_start));
            }
            *out
                .get_mut(written)
                .ok_or(CobsError::OutputExhausted(written))? = byte;
            written += 1;
        }
        pos = data_end;
        // A non-maximal block (code < 0xFF) that isn't the last block in the
        // frame represents a logical zero between blocks.
        if code < 0xFF && pos < input.len() {
            *out
                .get_mut(written)
                .ok_or(CobsError::OutputExhausted(written))? = 0;
            written += 1;
        }
    }
    Ok(written)
}

/// Decode a single COBS-encoded frame, allocating the output buffer.
pub fn decode_vec(input: &[u8]) -> Result<Vec<u8>, CobsError> {
    // Decoded output is never longer than the encoded input.
    let mut out = vec![0u8; input.len()];
    let n = decode(input, &mut out)?;
    out.truncate(n);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_spec_vector() {
        let input = [0x11, 0x22, 0x00, 0x33];
        let encoded = encode_vec(&input);
        assert_eq!(encoded, vec![0x03, 0x11, 0x22, 0x02, 0x33]);
        assert!(!encoded.contains(&0));
    }

    #[test]
    fn decodes_spec_vector() {
        let encoded = [0x03, 0x11, 0x22, 0x02, 0x33];
        let decoded = decode_vec(&encoded).expect("valid frame");
        assert_eq!(decoded, vec![0x11, 0x22, 0x00, 0x33]);
    }

    #[test]
    fn round_trips_empty_input() {
        let encoded = encode_vec(&[]);
        let decoded = decode_vec(&encoded).expect("valid frame");
        assert!(decoded.is_empty());
    }

    #[test]
    fn round_trips_all_zero_input() {
        let input = vec![0u8; 10];
        let encoded = encode_vec(&input);
        assert!(!encoded.contains(&0));
        let decoded = decode_vec(&encoded).expect("valid frame");
        assert_eq!(decoded, input);
    }

    #[test]
    fn round_trips_maximal_run() {
        // 254 consecutive non-zero bytes must encode as a single maximal
        // (code == 0xFF) block with no implicit terminator zero.
        let input: Vec<u8> = (1u8..=254).collect();
        let encoded = encode_vec(&input);
        assert_eq!(encoded[0], 0xFF);
        assert_eq!(encoded.len(), 255, "no spurious trailing block after an exact 254-byte run");
        let decoded = decode_vec(&encoded).expect("valid frame");
        assert_eq!(decoded, input);
    }

    #[test]
    fn round_trips_several_maximal_runs() {
        // A length that is an exact multiple of 254 must not provoke an
        // extra empty block after the final maximal run.
        let input: Vec<u8> = (0..254 * 3).map(|i| (i % 255 + 1) as u8).collect();
        let encoded = encode_vec(&input);
        assert_eq!(encoded.len(), input.len() + 3);
        let decoded = decode_vec(&encoded).expect("valid frame");
        assert_eq!(decoded, input);
    }

    #[test]
    fn rejects_interior_zero_byte() {
        // A raw 0x00 inside what's presented as frame bytes is malformed.
        let err = decode(&[0x02, 0x41, 0x00], &mut [0u8; 16]).unwrap_err();
        assert_eq!(err, CobsError::InteriorZero(2));
    }

    #[test]
    fn rejects_zero_code_byte() {
        let err = decode(&[0x00, 0x41], &mut [0u8; 16]).unwrap_err();
        assert_eq!(err, CobsError::ZeroCode(0));
    }

    #[test]
    fn rejects_overrunning_code() {
        let err = decode(&[0x05, 0x41, 0x42], &mut [0u8; 16]).unwrap_err();
        assert_eq!(err, CobsError::Overrun(0));
    }

    #[test]
    fn rejects_output_overflow() {
        let encoded = encode_vec(&[1, 2, 3, 4]);
        let err = decode(&encoded, &mut [0u8; 2]).unwrap_err();
        assert_eq!(err, CobsError::OutputExhausted(2));
    }

    proptest::proptest! {
        #[test]
        fn round_trips_any_byte_sequence(input in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048)) {
            let encoded = encode_vec(&input);
            proptest::prop_assert!(!encoded.contains(&0));
            let decoded = decode_vec(&encoded).expect("round trip should decode");
            proptest::prop_assert_eq!(decoded, input);
        }
    }
}
