use encoding_rs::Encoding;

use crate::result::{Error, Result};

pub const DEFAULT_CHARSET: &str = "UTF-8";

// Labels that mean 7-bit ASCII. The WHATWG label table encoding_rs
// implements maps these to windows-1252, which accepts every byte and
// would swallow the invalid-text errors strict ASCII must produce.
const ASCII_LABELS: &[&str] = &["us-ascii", "ascii", "ansi_x3.4-1968", "iso646-us"];

#[derive(Debug, Clone, Copy)]
enum Repr {
    Ascii,
    Encoding(&'static Encoding),
}

#[derive(Debug, Clone, Copy)]
pub struct Charset(Repr);

impl Charset {
    pub fn lookup(name: &str) -> Result<Charset> {
        if ASCII_LABELS.iter().any(|l| name.eq_ignore_ascii_case(l)) {
            return Ok(Charset(Repr::Ascii));
        }
        Encoding::for_label(name.as_bytes())
            .map(|e| Charset(Repr::Encoding(e)))
            .ok_or_else(|| Error::Value(format!("unknown charset `{}`", name)))
    }

    pub fn name(&self) -> &'static str {
        match self.0 {
            Repr::Ascii => "US-ASCII",
            Repr::Encoding(encoding) => encoding.name(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self.0 {
            Repr::Ascii => {
                if !bytes.is_ascii() {
                    return Err(Error::Value("invalid US-ASCII text".into()));
                }
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Repr::Encoding(encoding) => {
                let (text, malformed) = encoding.decode_without_bom_handling(bytes);
                if malformed {
                    return Err(Error::Value(format!("invalid {} text", self.name())));
                }
                Ok(text.into_owned())
            }
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self.0 {
            Repr::Ascii => {
                if !text.is_ascii() {
                    return Err(Error::Value("text not representable in US-ASCII".into()));
                }
                Ok(text.as_bytes().to_vec())
            }
            Repr::Encoding(encoding) => {
                let (bytes, _, unmappable) = encoding.encode(text);
                if unmappable {
                    return Err(Error::Value(format!(
                        "text not representable in {}",
                        self.name()
                    )));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset(Repr::Encoding(encoding_rs::UTF_8))
    }
}
