use super::*;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut encoder = Encoder::default();
    encoder.write_value(value);
    encoder.out
}

#[derive(Default)]
struct Encoder {
    out: Vec<u8>,
}

impl Encoder {
    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.write_simple(SIMPLE_NULL),
            Value::Bool(b) => self.write_simple(if *b { SIMPLE_TRUE } else { SIMPLE_FALSE }),
            Value::Unsigned(n) => self.write_header(MAJOR_UNSIGNED, *n),
            Value::Negative(n) => self.write_negative(*n),
            Value::Float(f) => self.write_number(*f),
            Value::Text(s) => self.write_text(s),
            Value::Array(items) => {
                self.write_header(MAJOR_ARRAY, items.len() as u64);
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Map(entries) => {
                self.write_header(MAJOR_MAP, entries.len() as u64);
                for (key, item) in entries {
                    self.write_text(key);
                    self.write_value(item);
                }
            }
        }
    }

    fn write_header(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        if arg < 24 {
            self.out.push(major | arg as u8);
        } else if arg <= 0xff {
            self.out.push(major | 24);
            self.out.push(arg as u8);
        } else if arg <= 0xffff {
            self.out.push(major | 25);
            self.out.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= 0xffff_ffff {
            self.out.push(major | 26);
            self.out.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.out.push(major | 27);
            self.out.extend_from_slice(&arg.to_be_bytes());
        }
    }

    fn write_negative(&mut self, n: i64) {
        if n >= 0 {
            self.write_header(MAJOR_UNSIGNED, n as u64);
        } else {
            // -1 - n without overflow for i64::MIN
            self.write_header(MAJOR_NEGATIVE, !(n as u64));
        }
    }

    // Integral finite numbers travel as integers, everything else as float64.
    fn write_number(&mut self, f: f64) {
        if f.is_finite() && f.fract() == 0.0 {
            if f >= 0.0 && f < TWO_POW_64 {
                return self.write_header(MAJOR_UNSIGNED, f as u64);
            }
            // the decoder holds negatives as i64
            if f < 0.0 && f >= i64::MIN as f64 {
                return self.write_negative(f as i64);
            }
        }
        self.write_float64(f);
    }

    fn write_float64(&mut self, f: f64) {
        self.out.push((MAJOR_SIMPLE << 5) | INFO_FLOAT64);
        self.out.extend_from_slice(&f.to_bits().to_be_bytes());
    }

    fn write_text(&mut self, s: &str) {
        self.write_header(MAJOR_TEXT, s.len() as u64);
        self.out.extend_from_slice(s.as_bytes());
    }

    fn write_simple(&mut self, simple: u8) {
        self.out.push((MAJOR_SIMPLE << 5) | simple);
    }
}
