use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::core::error::{Error, Reason};
use crate::core::modbus::function::FunctionCode;
use crate::core::modbus::header::Header;

/// A fully parsed request frame, ready for dispatch by
/// [`crate::core::server::Server`].
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ReadBits {
        function: FunctionCode,
        start: u16,
        count: u16,
    },
    ReadWords {
        function: FunctionCode,
        start: u16,
        count: u16,
    },
    /// Any write function code. The simulator always echoes the original
    /// frame bytes back unmodified (`spec.md` §4.1 writes never persist).
    Write { raw: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub header: Header,
    pub function_code: u8,
    pub request: Request,
}

/// Parses one complete MBAP+PDU frame. `raw` is the whole frame as read off
/// the socket (`spec.md` §4.5: up to 256 bytes per `read()`).
pub fn parse_request(raw: &[u8]) -> Result<ParsedFrame, Error> {
    if raw.len() < 8 {
        return Err(Error::Malformed(Reason::ShortFrame));
    }

    let header = Header::unpack(&raw[0..7])?;
    let function_code = raw[7];

    // `length` counts unit_id + PDU; anything under 2 can't even cover the
    // function code we already read, and anything the buffer doesn't
    // actually hold means the frame was cut short or misreports its size.
    if header.length < 2 {
        return Err(Error::Malformed(Reason::LengthMismatch));
    }
    let pdu_end = 6usize + header.length as usize;
    if pdu_end > raw.len() {
        return Err(Error::Malformed(Reason::LengthMismatch));
    }
    let payload_end = pdu_end;
    let payload = &raw[8..payload_end];

    let request = match FunctionCode::try_from_code(function_code) {
        Ok(function) if function.is_read() => {
            if payload.len() < 4 {
                return Err(Error::InvalidData(Reason::ShortPayload));
            }
            let mut rdr = io::Cursor::new(payload);
            let start = rdr.read_u16::<BigEndian>()?;
            let count = rdr.read_u16::<BigEndian>()?;
            match function {
                FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                    Request::ReadBits { function, start, count }
                }
                _ => Request::ReadWords { function, start, count },
            }
        }
        Ok(_write_function) => Request::Write {
            raw: raw[..payload_end].to_vec(),
        },
        Err(_) => {
            return Err(Reason::InvalidFunction.into());
        }
    };

    Ok(ParsedFrame {
        header,
        function_code,
        request,
    })
}

/// Builds a read response for function codes 1/2 (bit-packed, one bit per
/// coil, little-endian-first-bit-per-byte per the Modbus spec).
pub fn encode_bit_response(header: &Header, function_code: u8, bits: &[bool]) -> Vec<u8> {
    let byte_count = bits.len().div_ceil(8);
    let mut body = Vec::with_capacity(1 + byte_count);
    body.push(byte_count as u8);
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, bit) in chunk.iter().enumerate() {
            if *bit {
                byte |= 1 << i;
            }
        }
        body.push(byte);
    }
    encode_pdu(header, function_code, &body)
}

/// Builds a read response for function codes 3/4 (register words).
pub fn encode_word_response(header: &Header, function_code: u8, words: &[u16]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + words.len() * 2);
    body.push((words.len() * 2) as u8);
    for word in words {
        body.write_u16::<BigEndian>(*word).unwrap();
    }
    encode_pdu(header, function_code, &body)
}

/// Writes echo the originating frame unchanged (`spec.md` §4.1).
pub fn encode_write_echo(raw: &[u8]) -> Vec<u8> {
    raw.to_vec()
}

/// Builds an exception response: the function code with its high bit set,
/// followed by a single exception-code byte (`spec.md` §4.1).
pub fn encode_exception(transaction_id: u16, unit_id: u8, function_code: u8, exception_code: u8) -> Vec<u8> {
    let header = Header::new(transaction_id, unit_id, 2);
    let mut out = header.pack();
    out.push(FunctionCode::exception_code(function_code));
    out.push(exception_code);
    out
}

fn encode_pdu(header: &Header, function_code: u8, body: &[u8]) -> Vec<u8> {
    let pdu_len = 1 + body.len();
    let response_header = Header::new(header.transaction_id, header.unit_id, pdu_len as u16);
    let mut out = response_header.pack();
    out.push(function_code);
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn mbap(transaction_id: u16, unit_id: u8, pdu_len: u16) -> Vec<u8> {
        Header::new(transaction_id, unit_id, pdu_len).pack()
    }

    #[test]
    fn p1_read_request_round_trip() {
        let mut raw = mbap(1, 1, 6);
        raw.push(0x03); // read holding registers
        raw.extend_from_slice(&[0x00, 0x0A]); // start = 10
        raw.extend_from_slice(&[0x00, 0x02]); // count = 2

        let parsed = parse_request(&raw).unwrap();
        assert_eq!(
            parsed.request,
            Request::ReadWords {
                function: FunctionCode::ReadHoldingRegisters,
                start: 10,
                count: 2,
            }
        );
    }

    #[test]
    fn s4_illegal_function_is_rejected() {
        let mut raw = mbap(1, 1, 2);
        raw.push(0x17); // unsupported
        let err = parse_request(&raw);
        assert!(matches!(err, Err(Error::InvalidData(Reason::InvalidFunction))));
    }

    #[test]
    fn inconsistent_length_field_is_malformed() {
        // Header claims a 6-byte PDU but the buffer only carries 2 bytes of it.
        let mut raw = mbap(1, 1, 6);
        raw.push(0x03);
        raw.extend_from_slice(&[0x00, 0x0A]);
        let err = parse_request(&raw);
        assert!(matches!(err, Err(Error::Malformed(Reason::LengthMismatch))));
    }

    #[test]
    fn s5_short_read_payload_is_rejected() {
        let mut raw = mbap(1, 1, 2);
        raw.push(0x03);
        let err = parse_request(&raw);
        assert!(matches!(err, Err(Error::InvalidData(Reason::ShortPayload))));
    }

    #[test]
    fn p7_exception_envelope_sets_high_bit_and_one_byte_body() {
        let response = encode_exception(7, 1, 0x03, 0x02);
        assert_eq!(response[7], 0x83);
        assert_eq!(response[8], 0x02);
        assert_eq!(response.len(), 9);
    }

    #[test]
    fn s6_bit_response_packs_low_bit_first() {
        let header = Header::new(1, 1, 6);
        let response = encode_bit_response(&header, 0x01, &[true, false, false, false, false, false, false, true]);
        // MBAP(7) + function(1) + byte_count(1) + data(1)
        assert_eq!(response[8], 1); // byte count
        assert_eq!(response[9], 0b1000_0001);
    }

    #[test]
    fn p8_write_echoes_raw_frame() {
        let mut raw = mbap(9, 1, 6);
        raw.push(0x06);
        raw.extend_from_slice(&[0x00, 0x01, 0x00, 0x2A]);
        let parsed = parse_request(&raw).unwrap();
        match parsed.request {
            Request::Write { raw: echoed } => assert_eq!(echoed, raw),
            _ => panic!("expected a write request"),
        }
    }
}
