//! CAPI info and reason values
//!
//! Every confirmation carries an info word, every DISCONNECT style indication a
//! reason word. Both share the same value space which is modelled by [Info].

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
/// CAPI info / reason value
pub enum Info {
    /// Request accepted
    Success,
    /// NCPI not supported by the current protocol, NCPI ignored
    NcpiIgnored,
    /// Flags not supported by the current protocol, flags ignored
    FlagsIgnored,
    /// Alert already sent by another application
    AlertIgnored,
    /// Illegal application number
    IllegalApplication,
    /// Illegal command or subcommand, or message length less than 12 bytes
    BadMessage,
    /// Message could not be accepted because of a queue full condition
    QueueFull,
    /// Message not supported in the current state
    WrongState,
    /// Illegal controller, PLCI or NCCI
    WrongIdentifier,
    /// Out of PLCI
    OutOfPlci,
    /// Out of NCCI
    OutOfNcci,
    /// Out of LISTEN
    OutOfListen,
    /// Illegal message parameter coding
    WrongMessageFormat,
    /// B1 protocol not supported
    B1NotSupported,
    /// B2 protocol not supported
    B2NotSupported,
    /// B3 protocol not supported
    B3NotSupported,
    /// B1 protocol parameter not supported
    B1ParmNotSupported,
    /// B2 protocol parameter not supported
    B2ParmNotSupported,
    /// B3 protocol parameter not supported
    B3ParmNotSupported,
    /// B protocol combination not supported
    BStackNotSupported,
    /// NCPI not supported
    NcpiNotSupported,
    /// CIP value unknown
    CipNotSupported,
    /// Flags not supported (reserved bits)
    FlagsNotSupported,
    /// Facility not supported
    FacilityNotSupported,
    /// Data length not supported by current protocol
    DataLengthNotSupported,
    /// Reset procedure not supported by current protocol
    ResetNotSupported,
    /// Supplementary service not supported
    SupplementaryServiceNotSupported,
    /// Request not allowed in this state
    RequestNotAllowedInThisState,
    /// Protocol error layer 1
    L1Error,
    /// Protocol error layer 2
    L2Error,
    /// Protocol error layer 3
    L3Error,
    /// Another application got that call
    OtherApplConnected,
    /// Cleared by a supplementary service
    ClearedBySupplementaryService,
    /// T.30: connection not successful, remote station is not a G3 fax device
    FaxNoG3Remote,
    /// T.30: training error
    FaxTrainingError,
    /// T.30: disconnected before transfer
    FaxDisconnectedBeforeTransfer,
    /// T.30: disconnected during transfer, remote abort
    FaxRemoteAbort,
    /// T.30: protocol procedure error
    FaxProcedureError,
    /// Disconnect cause from the network, the low byte is the Q.931 cause
    NetworkCause(u8),
    /// Any other value
    Other(u16),
}

impl Info {
    /// True if the value reports success or a success with a warning
    pub fn is_ok(&self) -> bool {
        u16::from(*self) < 0x1000
    }
}

impl From<u16> for Info {
    fn from(p: u16) -> Self {
        match p {
            0x0000 => Self::Success,
            0x0001 => Self::NcpiIgnored,
            0x0002 => Self::FlagsIgnored,
            0x0003 => Self::AlertIgnored,
            0x1101 => Self::IllegalApplication,
            0x1102 => Self::BadMessage,
            0x1103 => Self::QueueFull,
            0x2001 => Self::WrongState,
            0x2002 => Self::WrongIdentifier,
            0x2003 => Self::OutOfPlci,
            0x2004 => Self::OutOfNcci,
            0x2005 => Self::OutOfListen,
            0x2007 => Self::WrongMessageFormat,
            0x3001 => Self::B1NotSupported,
            0x3002 => Self::B2NotSupported,
            0x3003 => Self::B3NotSupported,
            0x3004 => Self::B1ParmNotSupported,
            0x3005 => Self::B2ParmNotSupported,
            0x3006 => Self::B3ParmNotSupported,
            0x3007 => Self::BStackNotSupported,
            0x3008 => Self::NcpiNotSupported,
            0x3009 => Self::CipNotSupported,
            0x300A => Self::FlagsNotSupported,
            0x300B => Self::FacilityNotSupported,
            0x300C => Self::DataLengthNotSupported,
            0x300D => Self::ResetNotSupported,
            0x300E => Self::SupplementaryServiceNotSupported,
            0x3010 => Self::RequestNotAllowedInThisState,
            0x3301 => Self::L1Error,
            0x3302 => Self::L2Error,
            0x3303 => Self::L3Error,
            0x3304 => Self::OtherApplConnected,
            0x3305 => Self::ClearedBySupplementaryService,
            0x3311 => Self::FaxNoG3Remote,
            0x3312 => Self::FaxTrainingError,
            0x3313 => Self::FaxDisconnectedBeforeTransfer,
            0x3314 => Self::FaxRemoteAbort,
            0x3315 => Self::FaxProcedureError,
            0x3400..=0x34FF => Self::NetworkCause((p & 0xFF) as u8),
            x => Self::Other(x),
        }
    }
}

impl From<Info> for u16 {
    fn from(i: Info) -> Self {
        match i {
            Info::Success => 0x0000,
            Info::NcpiIgnored => 0x0001,
            Info::FlagsIgnored => 0x0002,
            Info::AlertIgnored => 0x0003,
            Info::IllegalApplication => 0x1101,
            Info::BadMessage => 0x1102,
            Info::QueueFull => 0x1103,
            Info::WrongState => 0x2001,
            Info::WrongIdentifier => 0x2002,
            Info::OutOfPlci => 0x2003,
            Info::OutOfNcci => 0x2004,
            Info::OutOfListen => 0x2005,
            Info::WrongMessageFormat => 0x2007,
            Info::B1NotSupported => 0x3001,
            Info::B2NotSupported => 0x3002,
            Info::B3NotSupported => 0x3003,
            Info::B1ParmNotSupported => 0x3004,
            Info::B2ParmNotSupported => 0x3005,
            Info::B3ParmNotSupported => 0x3006,
            Info::BStackNotSupported => 0x3007,
            Info::NcpiNotSupported => 0x3008,
            Info::CipNotSupported => 0x3009,
            Info::FlagsNotSupported => 0x300A,
            Info::FacilityNotSupported => 0x300B,
            Info::DataLengthNotSupported => 0x300C,
            Info::ResetNotSupported => 0x300D,
            Info::SupplementaryServiceNotSupported => 0x300E,
            Info::RequestNotAllowedInThisState => 0x3010,
            Info::L1Error => 0x3301,
            Info::L2Error => 0x3302,
            Info::L3Error => 0x3303,
            Info::OtherApplConnected => 0x3304,
            Info::ClearedBySupplementaryService => 0x3305,
            Info::FaxNoG3Remote => 0x3311,
            Info::FaxTrainingError => 0x3312,
            Info::FaxDisconnectedBeforeTransfer => 0x3313,
            Info::FaxRemoteAbort => 0x3314,
            Info::FaxProcedureError => 0x3315,
            Info::NetworkCause(c) => 0x3400 | c as u16,
            Info::Other(x) => x,
        }
    }
}
