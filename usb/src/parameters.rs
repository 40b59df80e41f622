use crate::error::CommandError;
use byteorder::{ByteOrder, LittleEndian};
use respeaker_types::{ParameterDescriptor, ValueType};

pub const READ_RESPONSE_LENGTH: usize = 8;
pub const WRITE_PAYLOAD_LENGTH: usize = 12;

const READ_FLAG: u16 = 0x80;
const INT_FLAG: u16 = 0x40;

/// The wValue of a parameter read: the offset tagged as a read, and as an int when applicable.
pub fn read_request_value(offset: u8, value_type: ValueType) -> u16 {
    let mut value = READ_FLAG | offset as u16;
    if value_type == ValueType::Int {
        value |= INT_FLAG;
    }
    value
}

/// Builds the `(offset, value, type flag)` payload of a parameter write.
pub fn encode_write(offset: u8, value_type: ValueType, value: f64) -> [u8; WRITE_PAYLOAD_LENGTH] {
    let mut payload = [0; WRITE_PAYLOAD_LENGTH];
    LittleEndian::write_i32(&mut payload[0..4], offset as i32);

    match value_type {
        ValueType::Int => {
            LittleEndian::write_i32(&mut payload[4..8], value as i32);
            LittleEndian::write_i32(&mut payload[8..12], 1);
        }
        ValueType::Float => {
            LittleEndian::write_f32(&mut payload[4..8], value as f32);
            LittleEndian::write_i32(&mut payload[8..12], 0);
        }
    }
    payload
}

/// Decodes a read response of two little-endian i32s, `(mantissa, exponent)`.
pub fn decode_read(value_type: ValueType, response: &[u8]) -> Result<f64, CommandError> {
    if response.len() < READ_RESPONSE_LENGTH {
        return Err(CommandError::MalformedResponse {
            expected: READ_RESPONSE_LENGTH,
            received: response.len(),
        });
    }

    let hi = LittleEndian::read_i32(&response[0..4]);
    let lo = LittleEndian::read_i32(&response[4..8]);

    Ok(match value_type {
        ValueType::Int => hi as f64,
        ValueType::Float => hi as f64 * 2f64.powi(lo),
    })
}

pub fn validate_write(descriptor: &ParameterDescriptor, value: f64) -> Result<(), CommandError> {
    if !descriptor.is_writable() {
        return Err(CommandError::ParameterAccess {
            group_id: descriptor.group_id,
            offset: descriptor.offset,
        });
    }

    if !descriptor.in_range(value) {
        return Err(CommandError::ParameterRange {
            group_id: descriptor.group_id,
            offset: descriptor.offset,
            value,
            min: descriptor.min,
            max: descriptor.max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use respeaker_types::Parameter;

    fn response(hi: i32, lo: i32) -> [u8; 8] {
        let mut bytes = [0; 8];
        LittleEndian::write_i32(&mut bytes[0..4], hi);
        LittleEndian::write_i32(&mut bytes[4..8], lo);
        bytes
    }

    #[test]
    fn read_request_flags() {
        assert_eq!(read_request_value(0, ValueType::Int), 0xC0);
        assert_eq!(read_request_value(19, ValueType::Float), 0x93);
        assert_eq!(read_request_value(7, ValueType::Int), 0xC7);
    }

    #[test]
    fn int_write_payload() {
        assert_eq!(
            encode_write(7, ValueType::Int, 1.0),
            [7, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn float_write_payload() {
        let payload = encode_write(19, ValueType::Float, 0.5);
        assert_eq!(LittleEndian::read_i32(&payload[0..4]), 19);
        assert_eq!(LittleEndian::read_f32(&payload[4..8]), 0.5);
        assert_eq!(LittleEndian::read_i32(&payload[8..12]), 0);
    }

    #[test]
    fn decodes_int_and_float() {
        assert_eq!(decode_read(ValueType::Int, &response(1, 0)).unwrap(), 1.0);
        assert_eq!(decode_read(ValueType::Float, &response(3, 1)).unwrap(), 6.0);
        assert_eq!(decode_read(ValueType::Float, &response(1, -2)).unwrap(), 0.25);

        // Ints ignore the exponent entirely.
        assert_eq!(decode_read(ValueType::Int, &response(42, 5)).unwrap(), 42.0);
    }

    #[test]
    fn short_response_is_malformed() {
        assert_matches!(
            decode_read(ValueType::Int, &[1, 0, 0, 0]),
            Err(CommandError::MalformedResponse {
                expected: 8,
                received: 4
            })
        );
    }

    #[test]
    fn rejects_read_only_and_out_of_range() {
        assert_matches!(
            validate_write(&Parameter::DoaAngle.descriptor(), 10.0),
            Err(CommandError::ParameterAccess {
                group_id: 21,
                offset: 0
            })
        );

        let agc = Parameter::AgcMaxGain.descriptor();
        assert!(validate_write(&agc, agc.min).is_ok());
        assert!(validate_write(&agc, agc.max).is_ok());
        assert_matches!(
            validate_write(&agc, agc.min - 1.0),
            Err(CommandError::ParameterRange { .. })
        );
        assert_matches!(
            validate_write(&agc, agc.max + 1.0),
            Err(CommandError::ParameterRange { .. })
        );
    }
}
