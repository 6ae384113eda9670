//! Information elements exchanged with the adapter signaling entity, and the
//! CIP value tables
//!
//! IE lists are a sequence of `[code, length, content...]` triples. Codes with
//! bit 7 set are single octet elements without a length.

/// Bearer capability
pub const BC: u8 = 0x04;
/// Cause
pub const CAU: u8 = 0x08;
/// Call identity (suspend / resume)
pub const CAI: u8 = 0x10;
/// Channel identification
pub const CHI: u8 = 0x18;
/// Logical link information (B1 facilities and B protocol setup)
pub const LLI: u8 = 0x19;
/// Facility
pub const FTY: u8 = 0x1C;
/// Progress indicator
pub const PI: u8 = 0x1E;
/// Display
pub const DSP: u8 = 0x28;
/// Date and time
pub const DT: u8 = 0x29;
/// Keypad facility
pub const KEY: u8 = 0x2C;
/// Connected number
pub const CONN_NR: u8 = 0x4C;
/// Connected subaddress
pub const CONN_SA: u8 = 0x4D;
/// Calling party number
pub const OAD: u8 = 0x6C;
/// Calling party subaddress
pub const OSA: u8 = 0x6D;
/// Called party number
pub const CPN: u8 = 0x70;
/// Called party subaddress
pub const DSA: u8 = 0x71;
/// Redirecting number
pub const RDN: u8 = 0x74;
/// Low layer compatibility
pub const LLC: u8 = 0x7C;
/// High layer compatibility
pub const HLC: u8 = 0x7D;
/// User to user information
pub const UUI: u8 = 0x7E;
/// Sending complete (single octet)
pub const SCP: u8 = 0xA1;

/// Builds an IE list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeWriter {
    buf: Vec<u8>,
}

impl IeWriter {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element. Empty content is skipped
    pub fn add(mut self, code: u8, content: &[u8]) -> Self {
        if code & 0x80 != 0 {
            self.buf.push(code);
        } else if !content.is_empty() {
            self.buf.push(code);
            self.buf.push(content.len().min(0xFF) as u8);
            self.buf.extend_from_slice(&content[..content.len().min(0xFF)]);
        }
        self
    }

    /// Adds a single octet element if `present`
    pub fn flag(self, code: u8, present: bool) -> Self {
        if present { self.add(code, &[]) } else { self }
    }

    /// Finished list
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Iterator over an IE list, yielding `(code, content)`
#[derive(Debug, Clone)]
pub struct IeIter<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for IeIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&code, rest) = self.buf.split_first()?;
        if code & 0x80 != 0 {
            self.buf = rest;
            return Some((code, &[]));
        }
        let (&len, rest) = rest.split_first()?;
        let len = (len as usize).min(rest.len());
        let (content, rest) = rest.split_at(len);
        self.buf = rest;
        Some((code, content))
    }
}

/// Iterates an IE list
pub fn ies(buf: &[u8]) -> IeIter<'_> {
    IeIter { buf }
}

/// Content of the first element with `code`
pub fn find_ie(buf: &[u8], code: u8) -> Option<&[u8]> {
    ies(buf).find(|(c, _)| *c == code).map(|(_, v)| v)
}

/// Q.931 cause value carried in a cause element
pub fn cause_value(cau: &[u8]) -> u8 {
    // octet 3 (location) may be followed by an extension octet before the cause
    match cau {
        [loc, _, cause, ..] if loc & 0x80 == 0 => cause & 0x7F,
        [_, cause, ..] => cause & 0x7F,
        _ => 0,
    }
}

/// INFO_IND mask bit an element is reported under, see `LISTEN_REQ`
pub fn info_mask_bit(code: u8) -> u32 {
    match code {
        CAU => 0x0001,
        DT => 0x0002,
        DSP => 0x0004,
        UUI => 0x0008,
        PI => 0x0010,
        FTY => 0x0020,
        CPN => 0x0080,
        CHI => 0x0100,
        RDN => 0x0400,
        SCP => 0x1000,
        _ => 0,
    }
}

/// Number of CIP values
pub const CIP_COUNT: usize = 29;

/// Bearer capability per CIP value, A-law and u-law variants. Values 10 to 15 are
/// reserved and have no bearer
const CIP_BC: [[&[u8]; 2]; CIP_COUNT] = [
    [b"", b""],
    [b"\x80\x90\xa3", b"\x80\x90\xa2"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x89\x90", b"\x89\x90"],
    [b"\x90\x90\xa3", b"\x90\x90\xa2"],
    [b"\x91\x90", b"\x91\x90"],
    [b"\x98\x90", b"\x98\x90"],
    [b"\x88\xc0\xc6\xe6", b"\x88\xc0\xc6\xe6"],
    [b"\x88\x90\x21\x8f", b"\x88\x90\x21\x8f"],
    [b"\x91\x90\xa5", b"\x91\x90\xa5"],
    [b"", b""],
    [b"", b""],
    [b"", b""],
    [b"", b""],
    [b"", b""],
    [b"", b""],
    [b"\x80\x90\xa3", b"\x80\x90\xa2"],
    [b"\x90\x90\xa3", b"\x90\x90\xa2"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x88\x90", b"\x88\x90"],
    [b"\x91\x90\xa5", b"\x91\x90\xa5"],
    [b"\x91\x90\xa5", b"\x91\x90\xa5"],
    [b"\x88\x90", b"\x88\x90"],
];

/// High layer compatibility per CIP value, only set from 16 upwards
const CIP_HLC: [&[u8]; CIP_COUNT] = [
    b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"", b"",
    b"\x91\x81",
    b"\x91\x84",
    b"\x91\xa1",
    b"\x91\xa4",
    b"\x91\xa8",
    b"\x91\xb1",
    b"\x91\xb2",
    b"\x91\xb5",
    b"\x91\xb8",
    b"\x91\xc1",
    b"\x91\x81",
    b"\x91\xe0\x01",
    b"\x91\xe0\x02",
];

/// Bearer capability for a CIP value. `None` for 0, the reserved values and
/// anything out of range
pub fn cip_bc(cip: u16, u_law: bool) -> Option<&'static [u8]> {
    CIP_BC
        .get(cip as usize)
        .map(|e| e[u_law as usize])
        .filter(|bc| !bc.is_empty())
}

/// High layer compatibility for a CIP value, if it has one
pub fn cip_hlc(cip: u16) -> Option<&'static [u8]> {
    CIP_HLC.get(cip as usize).copied().filter(|h| !h.is_empty())
}

/// Derives the CIP value of an incoming call from its BC and HLC content.
/// Values with an HLC win over the plain bearer values
pub fn find_cip(bc: &[u8], hlc: &[u8], u_law: bool) -> u16 {
    let law = u_law as usize;
    let plain = (1..=9).rev().find(|&i| CIP_BC[i][law] == bc).unwrap_or(0);
    (16..CIP_COUNT)
        .find(|&j| CIP_BC[j][law] == bc && CIP_HLC[j] == hlc)
        .map(|j| j as u16)
        .unwrap_or(plain as u16)
}

#[cfg(test)]
pub mod ie_test {
    use super::*;

    #[test]
    fn test_write_and_iterate() {
        let list = IeWriter::new()
            .add(CPN, b"\x81123")
            .add(OAD, &[])
            .flag(SCP, true)
            .add(UUI, b"hi")
            .into_bytes();
        let v: Vec<_> = ies(&list).collect();
        assert_eq!(v, vec![(CPN, &b"\x81123"[..]), (SCP, &[][..]), (UUI, &b"hi"[..])]);
        assert_eq!(find_ie(&list, UUI), Some(&b"hi"[..]));
        assert_eq!(find_ie(&list, OAD), None);
    }

    #[test]
    fn test_truncated_list() {
        let v: Vec<_> = ies(&[CPN, 5, 1, 2]).collect();
        assert_eq!(v, vec![(CPN, &[1, 2][..])]);
    }

    #[test]
    fn test_cip_tables() {
        assert!(cip_bc(0, false).is_none());
        for reserved in 10..=15 {
            assert!(cip_bc(reserved, false).is_none());
        }
        assert_eq!(cip_bc(1, true), Some(&b"\x80\x90\xa2"[..]));
        assert!(cip_bc(29, false).is_none());
        assert_eq!(cip_hlc(16), Some(&b"\x91\x81"[..]));
    }

    #[test]
    fn test_find_cip() {
        // speech without HLC
        assert_eq!(find_cip(b"\x80\x90\xa3", b"", false), 1);
        // telephony
        assert_eq!(find_cip(b"\x80\x90\xa3", b"\x91\x81", false), 16);
        // G3 fax
        assert_eq!(find_cip(b"\x90\x90\xa3", b"\x91\x84", false), 17);
        assert_eq!(find_cip(b"\x01", b"", false), 0);
    }

    #[test]
    fn test_cause_value() {
        assert_eq!(cause_value(&[0x80, 0x90]), 0x10);
        assert_eq!(cause_value(&[0x00, 0x80, 0x91]), 0x11);
        assert_eq!(cause_value(&[]), 0);
    }
}
