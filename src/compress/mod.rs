//! # Container Compression
//!
//! The archive stream is either plain tar or tar wrapped end-to-end in a single
//! compression stage. The choice is one switch for the whole stream, made by the
//! caller at pack time and repeated at unpack time.

use std::io::{self, Read, Write};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Defines the container formats.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar, no compression.
    #[default]
    None,
    /// Gzip-wrapped tar.
    Gzip,
    /// Zstandard-wrapped tar.
    Zstd,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

impl Compression {
    /// Wraps `sink` in the encoder for this format.
    pub fn encoder<W: Write>(self, sink: W, level: i32) -> io::Result<Encoder<W>> {
        Ok(match self {
            Compression::None => Encoder::Plain(sink),
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                sink,
                gzip_level(level),
            )),
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(sink, level)?),
        })
    }

    /// Wraps `source` in the decoder for this format.
    pub fn decoder<'a, R: Read + Send + 'a>(self, source: R) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(match self {
            Compression::None => Box::new(source),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(source)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(source)?),
        })
    }

    /// Guesses the format from the first bytes of a stream.
    ///
    /// Plain tar has no magic at offset 0, so anything unrecognised is `None`.
    pub fn detect(prefix: &[u8]) -> Self {
        if prefix.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else if prefix.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

// zstd levels run 1..=22, gzip 0..=9.
fn gzip_level(level: i32) -> flate2::Compression {
    flate2::Compression::new(level.clamp(0, 9) as u32)
}

/// Compression stage in front of an archive sink.
///
/// `finish` must be called to flush the trailer of the compressed stream.
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Completes the compressed stream and hands back the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Encoder::Gzip(enc) => {
                let mut w = enc.finish()?;
                w.flush()?;
                Ok(w)
            }
            Encoder::Zstd(enc) => {
                let mut w = enc.finish()?;
                w.flush()?;
                Ok(w)
            }
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(compression: Compression, data: &[u8]) -> Vec<u8> {
        let mut enc = compression.encoder(Vec::new(), 3).unwrap();
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn decode(compression: Compression, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        compression.decoder(data).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn each_format_decodes_what_it_encoded() {
        let payload = b"export PATH=$HOME/bin:$PATH\n".repeat(200);
        for c in [Compression::None, Compression::Gzip, Compression::Zstd] {
            let packed = encode(c, &payload);
            assert_eq!(decode(c, &packed), payload, "format {c:?}");
        }
    }

    #[test]
    fn plain_encoder_is_passthrough() {
        assert_eq!(encode(Compression::None, b"abc"), b"abc");
    }

    #[test]
    fn detect_recognises_magic_bytes() {
        assert_eq!(Compression::detect(&encode(Compression::Gzip, b"x")), Compression::Gzip);
        assert_eq!(Compression::detect(&encode(Compression::Zstd, b"x")), Compression::Zstd);
        assert_eq!(Compression::detect(b"home/u/.bashrc\0\0"), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn wrong_decoder_fails_instead_of_passing_garbage() {
        let packed = encode(Compression::None, b"not compressed at all");
        let mut out = Vec::new();
        let res = Compression::Gzip.decoder(&packed[..]).unwrap().read_to_end(&mut out);
        assert!(res.is_err());
    }
}
