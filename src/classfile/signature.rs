//! Generic signature decoding.
//!
//! Only the class types mentioned by a signature are extracted; type
//! variables, wildcards and primitive types are skipped. The parser accepts
//! class, method and field signatures as well as plain descriptors.

use crate::error::MalformedInput;

type Result<T, E = MalformedInput> = std::result::Result<T, E>;

/// Return the internal names of every class type mentioned in `signature`.
pub fn referenced_types(signature: &str) -> Result<Vec<String>> {
    let mut parser = SignatureParser {
        signature,
        bytes: signature.as_bytes(),
        pos: 0,
        names: Vec::new(),
    };
    parser.parse()?;
    Ok(parser.names)
}

struct SignatureParser<'a> {
    signature: &'a str,
    bytes: &'a [u8],
    pos: usize,
    names: Vec<String>,
}

impl<'a> SignatureParser<'a> {
    fn parse(&mut self) -> Result<()> {
        if self.peek() == Some(b'<') {
            self.type_parameters()?;
        }
        while let Some(byte) = self.peek() {
            match byte {
                b'(' | b')' | b'^' | b'V' => self.pos += 1,
                _ => self.type_signature()?,
            }
        }
        Ok(())
    }

    fn type_parameters(&mut self) -> Result<()> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            self.read_until(&[b':'])?;
            while self.peek() == Some(b':') {
                self.pos += 1;
                if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                    self.reference_type()?;
                }
            }
        }
        self.expect(b'>')
    }

    fn type_signature(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.pos += 1;
                Ok(())
            }
            _ => self.reference_type(),
        }
    }

    fn reference_type(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'L') => self.class_type(),
            Some(b'T') => {
                self.read_until(&[b';'])?;
                self.expect(b';')
            }
            Some(b'[') => {
                self.pos += 1;
                self.type_signature()
            }
            _ => Err(self.invalid()),
        }
    }

    fn class_type(&mut self) -> Result<()> {
        self.expect(b'L')?;
        let mut name = self.read_until(&[b'<', b'.', b';'])?.to_string();
        loop {
            match self.peek() {
                Some(b'<') => self.type_arguments()?,
                Some(b'.') => {
                    self.pos += 1;
                    let inner = self.read_until(&[b'<', b'.', b';'])?;
                    name.push('$');
                    name.push_str(inner);
                }
                Some(b';') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.invalid()),
            }
        }
        if name.is_empty() {
            return Err(self.invalid());
        }
        self.names.push(name);
        Ok(())
    }

    fn type_arguments(&mut self) -> Result<()> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            match self.peek() {
                Some(b'*') => self.pos += 1,
                Some(b'+' | b'-') => {
                    self.pos += 1;
                    self.reference_type()?;
                }
                Some(_) => self.reference_type()?,
                None => return Err(self.invalid()),
            }
        }
        self.expect(b'>')
    }

    fn read_until(&mut self, stops: &[u8]) -> Result<&'a str> {
        let signature = self.signature;
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if stops.contains(&byte) {
                return Ok(&signature[start..self.pos]);
            }
            self.pos += 1;
        }
        Err(self.invalid())
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() != Some(byte) {
            return Err(self.invalid());
        }
        self.pos += 1;
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn invalid(&self) -> MalformedInput {
        MalformedInput::InvalidDescriptor(self.signature.to_string())
    }
}
