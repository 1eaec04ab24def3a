use crate::{Emitter, Encoding, WriterError};

/// UTF-16 encode `text` into `out` with the requested endianness.
fn encode_utf16(text: &str, big_endian: bool, out: &mut Vec<u8>) {
    for unit in text.encode_utf16() {
        let bytes = if big_endian {
            unit.to_be_bytes()
        } else {
            unit.to_le_bytes()
        };
        out.extend(bytes);
    }
}

impl<'w> Emitter<'w> {
    /// Flush the accumulated characters to the sink in its encoding.
    ///
    /// UTF-8 sinks take the character buffer as is; UTF-16 sinks go through
    /// the raw scratch buffer. Partial writes are not supported: the sink
    /// must accept everything offered.
    pub fn flush(&mut self) -> Result<(), WriterError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let handler = self.write_handler.as_mut().expect("no output handler set");
        match self.encoding {
            Encoding::Utf8 => handler.write_all(self.buffer.as_bytes())?,
            Encoding::Utf16Le | Encoding::Utf16Be => {
                let big_endian = self.encoding == Encoding::Utf16Be;
                encode_utf16(&self.buffer, big_endian, &mut self.raw_buffer);
                handler.write_all(&self.raw_buffer)?;
                self.raw_buffer.clear();
            }
            Encoding::Any => unreachable!("encoding was not resolved before the first flush"),
        }
        self.buffer.clear();
        Ok(())
    }
}
