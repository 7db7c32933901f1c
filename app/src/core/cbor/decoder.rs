use super::*;

const MAX_DEPTH: usize = 64;

/// Decodes the first item of `bytes`. Bytes after the first complete item are ignored.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder {
        buf: bytes,
        pos: 0,
        depth: 0,
    };
    decoder.read_value()
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn read_value(&mut self) -> Result<Value, DecodeError> {
        let initial = self.read_u8()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        if major == MAJOR_SIMPLE {
            return self.read_simple(info);
        }

        let arg = self.read_argument(info)?;

        match major {
            MAJOR_UNSIGNED => Ok(Value::Unsigned(arg)),
            MAJOR_NEGATIVE => {
                if arg > i64::MAX as u64 {
                    return Err(DecodeError::NegativeOutOfRange);
                }
                Ok(Value::Negative(-1 - arg as i64))
            }
            MAJOR_BYTES => Err(DecodeError::Unsupported("byte string")),
            MAJOR_TEXT => self.read_text(arg).map(Value::Text),
            MAJOR_ARRAY => {
                self.enter()?;
                let len = self.checked_len(arg)?;
                let mut items = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                self.depth -= 1;
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                self.enter()?;
                let len = self.checked_len(arg)?;
                let mut entries = Vec::with_capacity(len.min(self.remaining() / 2));
                for _ in 0..len {
                    let key = match self.read_value()? {
                        Value::Text(s) => s,
                        other => other.to_string(),
                    };
                    let value = self.read_value()?;
                    entries.push((key, value));
                }
                self.depth -= 1;
                Ok(Value::Map(entries))
            }
            MAJOR_TAG => Err(DecodeError::Unsupported("tag")),
            _ => unreachable!("major type is three bits"),
        }
    }

    fn read_argument(&mut self, info: u8) -> Result<u64, DecodeError> {
        match info {
            0..=23 => Ok(info.into()),
            24 => self.read_u8().map(u64::from),
            25 => self.read_array::<2>().map(|b| u16::from_be_bytes(b).into()),
            26 => self.read_array::<4>().map(|b| u32::from_be_bytes(b).into()),
            27 => self.read_array::<8>().map(u64::from_be_bytes),
            31 => Err(DecodeError::Unsupported("indefinite-length item")),
            _ => Err(DecodeError::Unsupported("reserved additional information")),
        }
    }

    fn read_simple(&mut self, info: u8) -> Result<Value, DecodeError> {
        match info {
            SIMPLE_FALSE => Ok(Value::Bool(false)),
            SIMPLE_TRUE => Ok(Value::Bool(true)),
            SIMPLE_NULL => Ok(Value::Null),
            INFO_FLOAT64 => self
                .read_array::<8>()
                .map(|b| Value::Float(f64::from_bits(u64::from_be_bytes(b)))),
            25 => Err(DecodeError::Unsupported("half-precision float")),
            26 => Err(DecodeError::Unsupported("single-precision float")),
            31 => Err(DecodeError::Unsupported("indefinite-length item")),
            other => Err(DecodeError::UnsupportedSimple(other)),
        }
    }

    fn read_text(&mut self, len: u64) -> Result<String, DecodeError> {
        let offset = self.pos;
        let len = self.checked_len(len)?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn checked_len(&self, len: u64) -> Result<usize, DecodeError> {
        usize::try_from(len).map_err(|_| DecodeError::Truncated { offset: self.buf.len() })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated { offset: self.buf.len() })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.take(1).map(|b| b[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
