//! Adapter side of the engine: the XDI request / completion model
//!
//! Each PLCI owns up to two adapter entities, a signaling entity for the D channel call
//! and a network layer entity for the B channel data connections. Requests are
//! issued through [XdiTransport] and complete later with a [XdiEvent::ReturnCode].
//! Unsolicited adapter events arrive as [XdiEvent::Sig] and [XdiEvent::Nl].

pub mod simulation;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
/// Adapter entity addressed by a request
pub enum Entity {
    /// Signaling (D channel call control)
    Sig,
    /// Network layer (B channel data)
    Nl,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
/// Adapter request primitive
pub enum Req {
    /// Create the entity
    Assign,
    /// Destroy the entity
    Remove,
    /// Outgoing call setup
    CallReq,
    /// Accept an offered call
    CallRes,
    /// Alert an offered call
    CallAlert,
    /// Clear the call
    Hangup,
    /// Reject an offered call without answering
    Reject,
    /// Send information elements
    InfoReq,
    /// Suspend the call (terminal portability)
    Suspend,
    /// Resume a suspended call
    Resume,
    /// Put the call on hold
    CallHold,
    /// Retrieve a held call
    CallRetrieve,
    /// Invoke a supplementary service
    SService,
    /// Write DSP parameters (echo canceller, mixer, voice coefficients)
    TelCtrl,
    /// Change the B1 resource of the channel
    B1Config,
    /// Open a B3 connection
    NConnect,
    /// Accept an incoming B3 connection
    NConnectAck,
    /// Close a B3 connection
    NDisc,
    /// Acknowledge a remote B3 disconnect
    NDiscAck,
    /// Send data
    NData,
    /// Reset the B3 connection
    NReset,
    /// Acknowledge a remote reset
    NResetAck,
    /// Unnumbered data (DTMF and DSP control)
    NUData,
    /// Extended data (T.30 control)
    NEData,
    /// Resume receive data flow
    NXon,
}

impl Req {
    /// True for primitives on the network layer entity
    pub fn entity(&self) -> Entity {
        match self {
            Req::NConnect
            | Req::NConnectAck
            | Req::NDisc
            | Req::NDiscAck
            | Req::NData
            | Req::NReset
            | Req::NResetAck
            | Req::NUData
            | Req::NEData
            | Req::NXon => Entity::Nl,
            _ => Entity::Sig,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Adapter return code
pub enum Rc {
    /// Request completed
    Ok,
    /// Request accepted, transmit flow control active. A final [Rc::Ok] follows
    OkFc,
    /// Entity assigned
    AssignOk,
    /// Command not allowed
    WrongCommand,
    /// Unknown entity ID
    WrongId,
    /// Unknown channel
    WrongCh,
    /// Unknown command
    UnknownCommand,
    /// Command not allowed in the entity state
    WrongState,
    /// Adapter ran out of resources
    OutOfResources,
    /// Any other value
    Other(u8),
}

impl Rc {
    /// True for the codes that complete a request successfully
    pub fn is_ok(&self) -> bool {
        matches!(self, Rc::Ok | Rc::AssignOk)
    }
}

impl From<u8> for Rc {
    fn from(p: u8) -> Self {
        match p {
            0xFF => Self::Ok,
            0x01 => Self::OkFc,
            0xEF => Self::AssignOk,
            0x02 => Self::WrongCommand,
            0x03 => Self::WrongId,
            0x04 => Self::WrongCh,
            0x05 => Self::UnknownCommand,
            0x06 => Self::WrongState,
            0x20 => Self::OutOfResources,
            x => Self::Other(x),
        }
    }
}

impl From<Rc> for u8 {
    fn from(r: Rc) -> Self {
        match r {
            Rc::Ok => 0xFF,
            Rc::OkFc => 0x01,
            Rc::AssignOk => 0xEF,
            Rc::WrongCommand => 0x02,
            Rc::WrongId => 0x03,
            Rc::WrongCh => 0x04,
            Rc::UnknownCommand => 0x05,
            Rc::WrongState => 0x06,
            Rc::OutOfResources => 0x20,
            Rc::Other(x) => x,
        }
    }
}

/// A request handed to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdiRequest {
    /// Controller the request is for
    pub controller: u8,
    /// Owning PLCI
    pub plci: u8,
    /// Entity addressed
    pub entity: Entity,
    /// Entity ID, 0 for [Req::Assign]
    pub id: u8,
    /// Primitive
    pub req: Req,
    /// Network layer channel, 0 for signaling requests
    pub ch: u8,
    /// Request payload (IE list, data, DSP parameters)
    pub data: Vec<u8>,
}

/// Signaling indications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigInd {
    /// Incoming call offered on a listening entity
    Indicate {
        /// Call IEs
        ies: Vec<u8>,
    },
    /// Outgoing call answered
    CallCon {
        /// Connected party IEs
        ies: Vec<u8>,
    },
    /// Accepted incoming call is connected
    CallInd {
        /// IEs
        ies: Vec<u8>,
    },
    /// Remote party is alerting
    Alert {
        /// IEs
        ies: Vec<u8>,
    },
    /// Call cleared
    Hangup {
        /// IEs, the cause element carries the clearing cause
        ies: Vec<u8>,
    },
    /// Information received during the call
    Info {
        /// IEs
        ies: Vec<u8>,
    },
    /// Hold succeeded
    HoldAck,
    /// Hold failed
    HoldRej {
        /// Q.931 cause
        cause: u8,
    },
    /// Retrieve succeeded
    RetrieveAck,
    /// Retrieve failed
    RetrieveRej {
        /// Q.931 cause
        cause: u8,
    },
    /// Suspend succeeded
    SuspendAck,
    /// Suspend failed
    SuspendRej {
        /// Q.931 cause
        cause: u8,
    },
    /// Resume succeeded
    ResumeAck {
        /// IEs
        ies: Vec<u8>,
    },
    /// Resume failed
    ResumeRej {
        /// Q.931 cause
        cause: u8,
    },
    /// Supplementary service invocation succeeded
    SServiceAck {
        /// Service code
        service: u8,
    },
    /// Supplementary service invocation failed
    SServiceRej {
        /// Service code
        service: u8,
        /// Q.931 cause
        cause: u8,
    },
}

/// Network layer indications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NlInd {
    /// Remote opens a B3 connection
    Connect {
        /// Channel
        ch: u8,
        /// Protocol specific connect info
        ncpi: Vec<u8>,
    },
    /// Remote accepted our B3 connection
    ConnectAck {
        /// Channel
        ch: u8,
        /// Protocol specific connect info
        ncpi: Vec<u8>,
    },
    /// Remote closes the B3 connection
    Disc {
        /// Channel
        ch: u8,
        /// Protocol cause
        cause: u8,
        /// Protocol specific info
        ncpi: Vec<u8>,
    },
    /// Our B3 disconnect completed
    DiscAck {
        /// Channel
        ch: u8,
        /// Protocol specific info
        ncpi: Vec<u8>,
    },
    /// Received data
    Data {
        /// Channel
        ch: u8,
        /// Payload including any protocol header
        data: Vec<u8>,
    },
    /// Remote confirmed delivery of data
    DataAck {
        /// Channel
        ch: u8,
    },
    /// Remote reset
    Reset {
        /// Channel
        ch: u8,
    },
    /// Our reset completed
    ResetAck {
        /// Channel
        ch: u8,
    },
    /// Unnumbered data (DTMF digits, DSP events)
    UData {
        /// Channel
        ch: u8,
        /// Event code followed by event data
        data: Vec<u8>,
    },
    /// Extended data (T.30 progress)
    EData {
        /// Channel
        ch: u8,
        /// Event code followed by event data
        data: Vec<u8>,
    },
}

impl NlInd {
    /// Channel the indication arrived on
    pub fn ch(&self) -> u8 {
        match self {
            NlInd::Connect { ch, .. }
            | NlInd::ConnectAck { ch, .. }
            | NlInd::Disc { ch, .. }
            | NlInd::DiscAck { ch, .. }
            | NlInd::Data { ch, .. }
            | NlInd::DataAck { ch }
            | NlInd::Reset { ch }
            | NlInd::ResetAck { ch }
            | NlInd::UData { ch, .. }
            | NlInd::EData { ch, .. } => *ch,
        }
    }
}

/// Anything the adapter reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XdiEvent {
    /// Completion of the request in flight on a PLCI
    ReturnCode {
        /// PLCI the request was issued for
        plci: u8,
        /// Result
        rc: Rc,
        /// Entity ID assigned by [Req::Assign]
        id: u8,
        /// Channel assigned by [Req::NConnect] / [Req::NConnectAck]
        ch: u8,
    },
    /// Signaling indication
    Sig {
        /// PLCI owning the signaling entity
        plci: u8,
        /// Indication
        ind: SigInd,
    },
    /// Network layer indication
    Nl {
        /// PLCI owning the network layer entity
        plci: u8,
        /// Indication
        ind: NlInd,
    },
}

/// Outbound half of the adapter transport
pub trait XdiTransport {
    /// Hands a request to the adapter. The result arrives later as
    /// [XdiEvent::ReturnCode]
    fn request(&mut self, req: XdiRequest);
}

/// Answer to an indication
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndResponse {
    /// Indication consumed
    Accepted,
    /// Receive not ready. The adapter keeps the data and redelivers after an XON
    Rnr,
}
