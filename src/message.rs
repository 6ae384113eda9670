//! CAPI message header, command codes and the wire codec

use crate::{
    CapiError, CapiResult,
    config::MAX_MSG_SIZE,
    parse::put_struct,
};

/// Size of the fixed CAPI message header
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::FromRepr, strum_macros::EnumIter)]
#[repr(u8)]
/// CAPI command byte
pub enum Command {
    /// ALERT
    Alert = 0x01,
    /// CONNECT
    Connect = 0x02,
    /// CONNECT_ACTIVE
    ConnectActive = 0x03,
    /// DISCONNECT
    Disconnect = 0x04,
    /// LISTEN
    Listen = 0x05,
    /// INFO
    Info = 0x08,
    /// SELECT_B_PROTOCOL
    SelectB = 0x41,
    /// FACILITY
    Facility = 0x80,
    /// CONNECT_B3
    ConnectB3 = 0x82,
    /// CONNECT_B3_ACTIVE
    ConnectB3Active = 0x83,
    /// DISCONNECT_B3
    DisconnectB3 = 0x84,
    /// DATA_B3
    DataB3 = 0x86,
    /// RESET_B3
    ResetB3 = 0x87,
    /// CONNECT_B3_T90_ACTIVE
    ConnectB3T90Active = 0x88,
    /// MANUFACTURER
    Manufacturer = 0xFF,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::FromRepr)]
#[repr(u8)]
/// CAPI subcommand byte
pub enum SubCommand {
    /// Application to engine request
    Req = 0x80,
    /// Engine to application confirmation
    Conf = 0x81,
    /// Engine to application indication
    Ind = 0x82,
    /// Application to engine response
    Resp = 0x83,
}

/// Fixed 12 byte CAPI message header
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CapiHeader {
    /// Total message length including this header
    pub length: u16,
    /// Application ID
    pub appl_id: u16,
    /// Command byte
    pub command: u8,
    /// Subcommand byte
    pub subcommand: u8,
    /// Message number
    pub number: u16,
    /// Controller number, bit 7 flags external equipment
    pub controller: u8,
    /// PLCI, 0 addresses the controller
    pub plci: u8,
    /// NCCI, 0 addresses the PLCI
    pub ncci: u16,
}

impl CapiHeader {
    /// Command word, subcommand in the high byte
    pub fn command_word(&self) -> u16 {
        (self.subcommand as u16) << 8 | self.command as u16
    }

    /// Controller, PLCI and NCCI packed into the CAPI identifier dword
    pub fn id(&self) -> u32 {
        self.controller as u32 | (self.plci as u32) << 8 | (self.ncci as u32) << 16
    }

    /// Typed command, if known
    pub fn cmd(&self) -> Option<Command> {
        Command::from_repr(self.command)
    }

    /// Typed subcommand, if known
    pub fn sub(&self) -> Option<SubCommand> {
        SubCommand::from_repr(self.subcommand)
    }
}

/// A complete CAPI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapiMessage {
    /// Message header
    pub header: CapiHeader,
    /// Parameter area following the header
    pub params: Vec<u8>,
    /// DATA_B3 payload. The wire format only carries a pointer, the payload travels
    /// next to the message
    pub data: Option<Vec<u8>>,
}

impl CapiMessage {
    /// Builds a message for `id` (controller | plci << 8 | ncci << 16)
    pub fn new(appl: u16, command: Command, sub: SubCommand, number: u16, id: u32, params: Vec<u8>) -> Self {
        Self {
            header: CapiHeader {
                length: (HEADER_LEN + params.len()) as u16,
                appl_id: appl,
                command: command as u8,
                subcommand: sub as u8,
                number,
                controller: id as u8,
                plci: (id >> 8) as u8,
                ncci: (id >> 16) as u16,
            },
            params,
            data: None,
        }
    }

    /// Attaches a DATA_B3 payload
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// True if the message has this command and subcommand
    pub fn is(&self, command: Command, sub: SubCommand) -> bool {
        self.header.command == command as u8 && self.header.subcommand == sub as u8
    }

    /// Encodes the message into its wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let mut out = Vec::with_capacity(HEADER_LEN + self.params.len());
        out.extend_from_slice(&h.length.to_le_bytes());
        out.extend_from_slice(&h.appl_id.to_le_bytes());
        out.push(h.command);
        out.push(h.subcommand);
        out.extend_from_slice(&h.number.to_le_bytes());
        out.push(h.controller);
        out.push(h.plci);
        out.extend_from_slice(&h.ncci.to_le_bytes());
        out.extend_from_slice(&self.params);
        out
    }

    /// Decodes a message from its wire form. The header length must cover exactly
    /// the supplied bytes
    pub fn from_bytes(b: &[u8]) -> CapiResult<Self> {
        if b.len() < HEADER_LEN || b.len() > MAX_MSG_SIZE {
            return Err(CapiError::BadMessage);
        }
        let header = CapiHeader {
            length: crate::get_word(&b[0..]),
            appl_id: crate::get_word(&b[2..]),
            command: b[4],
            subcommand: b[5],
            number: crate::get_word(&b[6..]),
            controller: b[8],
            plci: b[9],
            ncci: crate::get_word(&b[10..]),
        };
        if header.length as usize != b.len() {
            return Err(CapiError::BadMessage);
        }
        Ok(Self {
            header,
            params: b[HEADER_LEN..].to_vec(),
            data: None,
        })
    }
}

/// One outgoing parameter, encoded by [encode_params]
#[derive(Debug, Clone, Copy)]
pub enum Out<'a> {
    /// Byte
    B(u8),
    /// Word
    W(u16),
    /// Dword
    D(u32),
    /// Struct, length prefix is added
    S(&'a [u8]),
}

/// Encodes a parameter list into a parameter area
pub fn encode_params(params: &[Out<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in params {
        match p {
            Out::B(b) => out.push(*b),
            Out::W(w) => out.extend_from_slice(&w.to_le_bytes()),
            Out::D(d) => out.extend_from_slice(&d.to_le_bytes()),
            Out::S(s) => put_struct(&mut out, s),
        }
    }
    out
}

#[cfg(test)]
pub mod message_test {
    use super::*;

    #[test]
    fn test_header_wire_layout() {
        let m = CapiMessage::new(3, Command::Connect, SubCommand::Req, 0x0102, 0x0005_0201, vec![0xAA]);
        let b = m.to_bytes();
        assert_eq!(b.len(), 13);
        assert_eq!(&b[..12], &[13, 0, 3, 0, 0x02, 0x80, 0x02, 0x01, 0x01, 0x02, 0x05, 0x00]);
        assert_eq!(CapiMessage::from_bytes(&b).unwrap(), m);
        assert_eq!(m.header.command_word(), 0x8002);
        assert_eq!(m.header.id(), 0x0005_0201);
    }

    #[test]
    fn test_from_bytes_rejects_bad_length() {
        assert_eq!(CapiMessage::from_bytes(&[0; 5]), Err(CapiError::BadMessage));
        let mut b = CapiMessage::new(1, Command::Listen, SubCommand::Req, 0, 1, vec![]).to_bytes();
        b[0] = 20;
        assert_eq!(CapiMessage::from_bytes(&b), Err(CapiError::BadMessage));
    }

    #[test]
    fn test_encode_params() {
        let p = encode_params(&[Out::W(0x3304), Out::S(&[1, 2]), Out::D(1), Out::B(9)]);
        assert_eq!(p, vec![0x04, 0x33, 2, 1, 2, 1, 0, 0, 0, 9]);
    }

    #[test]
    fn test_command_lookup() {
        assert_eq!(Command::from_repr(0x86), Some(Command::DataB3));
        assert_eq!(Command::from_repr(0x99), None);
        assert_eq!(SubCommand::from_repr(0x83), Some(SubCommand::Resp));
    }
}
