//! Engine limits, per adapter profiles and the flag sets shared by the engine modules

use bitflags::bitflags;

/// Highest application ID the engine accepts
pub const MAX_APPL: u16 = 240;
/// Highest NCCI number per adapter. NCCI 0 means "no NCCI"
pub const MAX_NCCI: usize = 127;
/// Highest adapter network layer channel number
pub const MAX_NL_CHANNEL: usize = 255;
/// Maximum number of DATA_B3 requests outstanding per NCCI
pub const MAX_DATA_B3: usize = 8;
/// Maximum number of DATA_B3 requests with delivery confirmation outstanding per NCCI
pub const MAX_DATA_ACK: usize = 2;
/// Maximum size of a CAPI message (header and parameters)
pub const MAX_MSG_SIZE: usize = 256;
/// Maximum number of parameters in one message
pub const MAX_MSG_PARMS: usize = 10;
/// Capacity of the per PLCI message ring in bytes
pub const MSG_IN_QUEUE_SIZE: usize = (4096 + 3) & 0xfffc;
/// Bookkeeping bytes carried per queued message
pub const MSG_IN_OVERHEAD: usize = 8;
/// Depth of the internal command FIFO per PLCI
pub const MAX_INTERNAL_COMMAND_LEVELS: usize = 4;
/// Largest DATA_B3 payload accepted
pub const MAX_DATA_B3_LENGTH: usize = 2048;
/// Maximum B3 connections on one physical connection
pub const MAX_CHANNELS_PER_PLCI: u8 = 8;
/// Eicon manufacturer ID used in MANUFACTURER messages ("DIDD" in little endian)
pub const DI_MANU_ID: u32 = 0x4444_4944;

bitflags! {
    /// Optional adapter features advertised in the adapter profile
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ManufacturerFeatures: u32 {
        /// Tone generation for DTMF send
        const DTMF_TONE = 0x0001;
        /// DTMF detection in the adapter DSP
        const HARDDTMF = 0x0002;
        /// Software DTMF sender
        const SOFTDTMF_SEND = 0x0004;
        /// Software DTMF receiver
        const SOFTDTMF_RECEIVE = 0x0008;
        /// Line echo canceller
        const ECHO_CANCELLER = 0x0010;
        /// Cross connect / line interconnect mixer
        const XCONNECT = 0x0020;
        /// Advanced voice (handset codec)
        const ADV_VOICE = 0x0040;
        /// T.30 fax
        const FAX = 0x0080;
        /// Hold, retrieve, suspend, resume, ECT and three party conference
        const SUPPLEMENTARY_SERVICES = 0x0100;
        /// DTMF digit parameters (tone / gap duration)
        const DTMF_PARAMETERS = 0x0200;
    }
}

bitflags! {
    /// DSP resources attached to the B1 layer of a PLCI
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct B1Facilities: u16 {
        /// Local loop
        const LOCAL = 0x01;
        /// Mixer for line interconnect
        const MIXER = 0x02;
        /// DTMF transmitter
        const DTMFX = 0x04;
        /// DTMF receiver
        const DTMFR = 0x08;
        /// Voice coefficients (advanced voice)
        const VOICE = 0x10;
        /// Echo canceller
        const EC = 0x20;
    }
}

bitflags! {
    /// DATA_B3 flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataFlags: u16 {
        /// Qualifier bit
        const QUALIFIER = 0x0001;
        /// More data bit
        const MORE_DATA = 0x0002;
        /// Delivery confirmation
        const DELIVERY_CONFIRMATION = 0x0004;
        /// Expedited data
        const EXPEDITED = 0x0008;
        /// Break or UI frame
        const BREAK = 0x0010;
        /// Framing error reported by the adapter
        const FRAMING_ERROR = 0x8000;
    }
}

bitflags! {
    /// Receive flow control state of one adapter channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelFlow: u8 {
        /// Adapter was told not to deliver more data (RNR)
        const RX_FLOW_CONTROL = 0x01;
        /// An XON has been issued and not yet completed
        const XON_SENT = 0x02;
        /// An XON should be issued as soon as the PLCI is idle
        const XON_REQ = 0x04;
        /// Flow control was raised while a B3 connection was still being set up
        const XON_CONNECT_IND = 0x08;
        /// Transmit flow control: adapter returned OK_FC, wait for the final OK
        const OK_FC_PENDING = 0x80;
    }
}

bitflags! {
    /// Per application options set through the manufacturer options request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ApplOptions: u32 {
        /// Line interconnect requests use the pre 2.0 parameter layout
        const OLD_LI_SPEC = 0x0001;
        /// Echo canceller requests use the private selector
        const PRIV_EC_SPEC = 0x0002;
    }
}

/// Engine wide configuration
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Default number of receive buffers per application when registration passes 0
    pub default_max_ncci_data: u16,
    /// Default maximum data block length per application when registration passes 0
    pub default_max_data_len: u16,
    /// Number of consecutive RNR answers after which receive flow control is
    /// reported as stuck
    pub flow_ctrl_backoff: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_ncci_data: MAX_DATA_B3 as u16,
            default_max_data_len: MAX_DATA_B3_LENGTH as u16,
            flow_ctrl_backoff: 100,
        }
    }
}

/// Capabilities of one attached adapter
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterProfile {
    /// Number of PLCI slots
    pub max_plci: u8,
    /// Number of B channels on the line
    pub channels: u8,
    /// Bit mask of supported B1 protocols
    pub b1_protocols: u32,
    /// Bit mask of supported B2 protocols
    pub b2_protocols: u32,
    /// Bit mask of supported B3 protocols
    pub b3_protocols: u32,
    /// Optional features
    pub features: ManufacturerFeatures,
    /// Use u-law instead of A-law for speech bearer capabilities
    pub u_law: bool,
    /// Adapter is usable. A disabled adapter rejects new connections
    pub enabled: bool,
}

impl Default for AdapterProfile {
    fn default() -> Self {
        Self {
            max_plci: 16,
            channels: 2,
            b1_protocols: 0x0000_0013,
            b2_protocols: 0x0000_0213,
            b3_protocols: 0x0000_0037,
            features: ManufacturerFeatures::all(),
            u_law: false,
            enabled: true,
        }
    }
}
