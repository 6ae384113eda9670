//! B channel protocol selection (`B protocol` struct of CONNECT_REQ, CONNECT_RESP and
//! SELECT_B_REQ)

use crate::{
    config::AdapterProfile,
    ie::{IeWriter, LLI},
    info::Info,
    parse::{ApiParse, put_struct},
};

/// B1 protocol: T.30 fax modem
pub const B1_T30: u16 = 4;
/// B2 protocol: T.30 fax
pub const B2_T30: u16 = 4;
/// B2 protocol: V.120 asynchronous
pub const B2_V120_ASYNC: u16 = 9;
/// B2 protocol: V.120 bit transparent
pub const B2_V120_BIT_TRANSPARENT: u16 = 11;
/// B3 protocol: transparent
pub const B3_TRANSPARENT: u16 = 0;
/// B3 protocol: T.90NL
pub const B3_T90NL: u16 = 1;
/// B3 protocol: T.30 fax
pub const B3_T30: u16 = 4;
/// B3 protocol: T.30 fax with extensions
pub const B3_T30_EXT: u16 = 5;

/// Selected B1/B2/B3 protocols and their configuration structs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BProtocol {
    /// B1 protocol
    pub b1: u16,
    /// B2 protocol
    pub b2: u16,
    /// B3 protocol
    pub b3: u16,
    /// B1 configuration
    pub b1_config: Vec<u8>,
    /// B2 configuration
    pub b2_config: Vec<u8>,
    /// B3 configuration
    pub b3_config: Vec<u8>,
}

impl BProtocol {
    /// Decodes and validates a `B protocol` struct against the adapter profile. An empty
    /// struct selects the CAPI defaults (64 kbit/s HDLC, X.75, transparent)
    pub fn from_parms(bp: &ApiParse<'_>, profile: &AdapterProfile) -> Result<Self, Info> {
        if bp.is_empty() {
            return Ok(Self::default());
        }
        let f = bp.parse("wwwsss").map_err(|_| Info::WrongMessageFormat)?;
        let b = Self {
            b1: f[0].word(),
            b2: f[1].word(),
            b3: f[2].word(),
            b1_config: f[3].info.to_vec(),
            b2_config: f[4].info.to_vec(),
            b3_config: f[5].info.to_vec(),
        };
        b.check(profile)?;
        Ok(b)
    }

    fn check(&self, profile: &AdapterProfile) -> Result<(), Info> {
        let supported = |proto: u16, mask: u32| proto < 32 && mask & (1 << proto) != 0;
        if !supported(self.b1, profile.b1_protocols) {
            return Err(Info::B1NotSupported);
        }
        if !supported(self.b2, profile.b2_protocols) {
            return Err(Info::B2NotSupported);
        }
        if !supported(self.b3, profile.b3_protocols) {
            return Err(Info::B3NotSupported);
        }
        // fax needs the whole stack
        let fax_layers = [self.b1 == B1_T30, self.b2 == B2_T30, self.is_fax()];
        if fax_layers.iter().any(|&x| x) && !fax_layers.iter().all(|&x| x) {
            return Err(Info::BStackNotSupported);
        }
        Ok(())
    }

    /// B2 is one of the V.120 variants, data carries a V.120 header
    pub fn is_v120(&self) -> bool {
        matches!(self.b2, B2_V120_ASYNC | B2_V120_BIT_TRANSPARENT)
    }

    /// B3 is T.30 fax
    pub fn is_fax(&self) -> bool {
        matches!(self.b3, B3_T30 | B3_T30_EXT)
    }

    /// B3 has no protocol of its own, so there is nothing to reset
    pub fn is_transparent(&self) -> bool {
        self.b3 == B3_TRANSPARENT
    }

    /// Payload of the network layer assign: the LLI element with the layer numbers
    /// followed by the three configuration structs
    pub fn assign_data(&self) -> Vec<u8> {
        let mut lli = vec![self.b1 as u8, self.b2 as u8, self.b3 as u8];
        put_struct(&mut lli, &self.b1_config);
        put_struct(&mut lli, &self.b2_config);
        put_struct(&mut lli, &self.b3_config);
        IeWriter::new().add(LLI, &lli).into_bytes()
    }
}

#[cfg(test)]
pub mod bprot_test {
    use super::*;
    use crate::{message::encode_params, message::Out};

    fn bp(b1: u16, b2: u16, b3: u16) -> Vec<u8> {
        encode_params(&[Out::W(b1), Out::W(b2), Out::W(b3), Out::S(&[]), Out::S(&[]), Out::S(&[])])
    }

    #[test]
    fn test_default_when_empty() {
        let p = ApiParse { info: &[] };
        let b = BProtocol::from_parms(&p, &AdapterProfile::default()).unwrap();
        assert_eq!(b, BProtocol::default());
        assert!(b.is_transparent());
    }

    #[test]
    fn test_validation() {
        let profile = AdapterProfile::default();
        let check = |raw: Vec<u8>| BProtocol::from_parms(&ApiParse { info: &raw }, &profile);
        assert!(check(bp(1, 1, 0)).is_ok());
        assert_eq!(check(bp(2, 1, 0)), Err(Info::B1NotSupported));
        assert_eq!(check(bp(1, 3, 0)), Err(Info::B2NotSupported));
        assert_eq!(check(bp(1, 1, 3)), Err(Info::B3NotSupported));
        assert_eq!(check(bp(1, 1, 4)), Err(Info::BStackNotSupported));
        assert!(check(bp(4, 4, 4)).unwrap().is_fax());
        assert!(check(bp(0, 9, 0)).unwrap().is_v120());
        assert_eq!(check(vec![1, 0]), Err(Info::WrongMessageFormat));
    }

    #[test]
    fn test_assign_data() {
        let b = BProtocol {
            b1: 1,
            b2: 1,
            b3: 0,
            ..Default::default()
        };
        assert_eq!(b.assign_data(), vec![LLI, 6, 1, 1, 0, 0, 0, 0]);
    }
}
