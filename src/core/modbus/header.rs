use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::core::error::{Error, Reason};

pub const MBAP_HEADER_SIZE: usize = 7;
pub const MODBUS_PROTOCOL_TCP: u16 = 0x0000;

/// The seven-byte MBAP header prefixing every Modbus/TCP PDU (`spec.md`
/// §4.1). `length` counts everything after itself: `unit_id` plus the PDU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl Header {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: u16) -> Header {
        Header {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_TCP,
            length: pdu_len + 1,
            unit_id,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(MBAP_HEADER_SIZE);
        buff.write_u16::<BigEndian>(self.transaction_id).unwrap();
        buff.write_u16::<BigEndian>(self.protocol_id).unwrap();
        buff.write_u16::<BigEndian>(self.length).unwrap();
        buff.write_u8(self.unit_id).unwrap();
        buff
    }

    pub fn unpack(buff: &[u8]) -> Result<Header, Error> {
        if buff.len() < MBAP_HEADER_SIZE {
            return Err(Error::Malformed(Reason::ShortFrame));
        }
        let mut rdr = io::Cursor::new(buff);
        let header = Header {
            transaction_id: rdr.read_u16::<BigEndian>()?,
            protocol_id: rdr.read_u16::<BigEndian>()?,
            length: rdr.read_u16::<BigEndian>()?,
            unit_id: rdr.read_u8()?,
        };
        Ok(header)
    }
}
