//! CAPI parameter parsing and parameter save/restore
//!
//! Parameter areas are described by format strings built from single characters:
//!
//! * `b` - one byte
//! * `w` - little endian word
//! * `d` - little endian dword
//! * `s` - CAPI struct: a length byte followed by that many bytes. A length byte of
//!   `0xFF` is followed by a 16 bit length
//!
//! Trailing bytes after the last parameter are allowed. Running past the end of the
//! area is a [FormatError].

use crate::config::MAX_MSG_PARMS;

/// Parameter parse error
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A parameter runs past the end of the parameter area
    #[error("Parameter {index} runs past the end of the message")]
    Truncated {
        /// Index of the parameter inside the format
        index: usize,
    },
    /// Format string contains an unknown code
    #[error("Unknown format code '{0}'")]
    UnknownCode(char),
    /// Format string has more parameters than a message can carry
    #[error("Too many parameters")]
    TooManyParameters,
}

/// One parsed parameter, borrowing from the parameter area
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ApiParse<'a> {
    /// Parameter content. For `s` parameters the length prefix is not included
    pub info: &'a [u8],
}

impl<'a> ApiParse<'a> {
    /// Length of the parameter content
    pub fn len(&self) -> usize {
        self.info.len()
    }

    /// True for an empty struct
    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    /// Parameter content read as a byte
    pub fn byte(&self) -> u8 {
        self.info.first().copied().unwrap_or(0)
    }

    /// Parameter content read as a word
    pub fn word(&self) -> u16 {
        crate::get_word(self.info)
    }

    /// Parameter content read as a dword
    pub fn dword(&self) -> u32 {
        crate::get_dword(self.info)
    }

    /// Parses the content of a struct parameter against a nested format
    pub fn parse(&self, format: &str) -> Result<Vec<ApiParse<'a>>, FormatError> {
        api_parse(self.info, format)
    }
}

/// Parses `msg` against `format`
pub fn api_parse<'a>(msg: &'a [u8], format: &str) -> Result<Vec<ApiParse<'a>>, FormatError> {
    if format.len() > MAX_MSG_PARMS {
        return Err(FormatError::TooManyParameters);
    }
    let mut parms = Vec::with_capacity(format.len());
    let mut pos = 0usize;
    for (index, code) in format.chars().enumerate() {
        let (start, len) = match code {
            'b' => (pos, 1),
            'w' => (pos, 2),
            'd' => (pos, 4),
            's' => {
                let l = *msg.get(pos).ok_or(FormatError::Truncated { index })?;
                if l == 0xFF {
                    let ext = msg
                        .get(pos + 1..pos + 3)
                        .ok_or(FormatError::Truncated { index })?;
                    (pos + 3, crate::get_word(ext) as usize)
                } else {
                    (pos + 1, l as usize)
                }
            }
            other => return Err(FormatError::UnknownCode(other)),
        };
        let info = msg
            .get(start..start + len)
            .ok_or(FormatError::Truncated { index })?;
        parms.push(ApiParse { info });
        pos = start + len;
    }
    Ok(parms)
}

/// Splits a sequence of back to back structs, as used for participant lists
pub fn struct_list(mut buf: &[u8]) -> Result<Vec<ApiParse<'_>>, FormatError> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let s = api_parse(buf, "s").map_err(|_| FormatError::Truncated { index: out.len() })?[0];
        let prefix = if buf[0] == 0xFF { 3 } else { 1 };
        buf = &buf[prefix + s.len()..];
        out.push(s);
    }
    Ok(out)
}

/// Appends a CAPI struct (length prefix and content) to `out`
pub fn put_struct(out: &mut Vec<u8>, content: &[u8]) {
    if content.len() >= 0xFF {
        out.push(0xFF);
        out.extend_from_slice(&(content.len() as u16).to_le_bytes());
    } else {
        out.push(content.len() as u8);
    }
    out.extend_from_slice(content);
}

/// Parsed parameters saved past the lifetime of the message they came from.
///
/// The saved form is a re-encoded parameter area, so loading it is just parsing it
/// again with the same format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiSave {
    format: String,
    area: Vec<u8>,
}

impl ApiSave {
    /// Saves `parms` which were parsed with `format`
    pub fn save(parms: &[ApiParse<'_>], format: &str) -> Self {
        let mut area = Vec::new();
        for (p, code) in parms.iter().zip(format.chars()) {
            match code {
                's' => put_struct(&mut area, p.info),
                _ => area.extend_from_slice(p.info),
            }
        }
        Self {
            format: format.to_string(),
            area,
        }
    }

    /// Format the parameters were saved with
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Re-encoded parameter area
    pub fn area(&self) -> &[u8] {
        &self.area
    }

    /// Restores the saved parameters
    pub fn load(&self) -> Result<Vec<ApiParse<'_>>, FormatError> {
        api_parse(&self.area, &self.format)
    }
}
