//! Pluggable compression backends (spec §4.4, §9 "Optional codecs").
//!
//! Modeled as a capability lookup at startup: [`resolve`] reconciles the
//! requested [`Compression`] with what's actually linked into this build
//! (governed by the `zstd_codec` feature) and returns the *effective*
//! compression alongside a writer for it, downgrading zstd -> gzip with a
//! warning rather than failing the run (spec §7, "Codec unavailable").

use std::io::Write;

use crate::{
    config::Compression,
    error::{ErrorKind, Result},
};

/// A writer that frames and compresses bytes written through it, finalized
/// by consuming it (forcing codec trailers, spec §4.4 "Rotation").
pub trait CompressedWriter: Write + Send {
    /// Flushes and writes any trailing codec framing, then returns the
    /// underlying raw writer.
    fn finish(self: Box<Self>) -> Result<Box<dyn Write + Send>>;
}

struct NoneWriter(Box<dyn Write + Send>);

impl Write for NoneWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl CompressedWriter for NoneWriter {
    fn finish(self: Box<Self>) -> Result<Box<dyn Write + Send>> {
        Ok(self.0)
    }
}

struct GzipWriter(flate2::write::GzEncoder<Box<dyn Write + Send>>);

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl CompressedWriter for GzipWriter {
    fn finish(self: Box<Self>) -> Result<Box<dyn Write + Send>> {
        let inner = self.0.finish().map_err(|e| ErrorKind::Writer.with_source(e))?;
        Ok(inner)
    }
}

struct ZstdWriter<'a>(zstd::stream::write::Encoder<'a, Box<dyn Write + Send>>);

impl<'a> Write for ZstdWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<'a> CompressedWriter for ZstdWriter<'a> {
    fn finish(self: Box<Self>) -> Result<Box<dyn Write + Send>> {
        let inner = self.0.finish().map_err(|e| ErrorKind::Writer.with_source(e))?;
        Ok(inner)
    }
}

/// Whether the zstd codec is linked into this build. In this crate it
/// always is (the `zstd` crate is an unconditional dependency), but the
/// feature lets an integrator build a smaller binary without it, in which
/// case requests for zstd downgrade to gzip per spec §7.
#[cfg(feature = "zstd_codec")]
fn zstd_available() -> bool {
    true
}

#[cfg(not(feature = "zstd_codec"))]
fn zstd_available() -> bool {
    false
}

/// Determines the *effective* compression for a requested one, without
/// touching any I/O: downgrades zstd -> gzip when the codec isn't linked
/// into this build (spec §7, "Codec unavailable"). Callers should resolve
/// this once, before choosing a part's file name, so the on-disk
/// extension and the file's actual framing never disagree.
pub fn effective_compression(requested: Compression) -> Compression {
    match requested {
        Compression::Zstd if !zstd_available() => {
            tracing::warn!("zstd codec unavailable, downgrading to gzip");
            Compression::Gzip
        }
        other => other,
    }
}

/// Builds a writer for an already-resolved `effective` compression.
/// `level` is the codec-specific compression level (spec §4.4: default 3
/// for zstd, 1 for gzip).
pub fn make_writer(
    effective: Compression,
    level: i32,
    sink: Box<dyn Write + Send>,
) -> Result<Box<dyn CompressedWriter>> {
    match effective {
        Compression::Zstd => {
            let encoder = zstd::stream::write::Encoder::new(sink, level)
                .map_err(|e| ErrorKind::CodecUnavailable.with_source(e))?;
            Ok(Box::new(ZstdWriter(encoder)))
        }
        Compression::Gzip => {
            let encoder =
                flate2::write::GzEncoder::new(sink, flate2::Compression::new(level.max(0) as u32));
            Ok(Box::new(GzipWriter(encoder)))
        }
        Compression::None => Ok(Box::new(NoneWriter(sink))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "zstd_codec")]
    fn zstd_stays_zstd_when_linked() {
        assert_eq!(effective_compression(Compression::Zstd), Compression::Zstd);
    }

    #[test]
    #[cfg(not(feature = "zstd_codec"))]
    fn zstd_downgrades_to_gzip_when_not_linked() {
        assert_eq!(effective_compression(Compression::Zstd), Compression::Gzip);
    }

    #[test]
    fn gzip_and_none_pass_through_unconditionally() {
        assert_eq!(effective_compression(Compression::Gzip), Compression::Gzip);
        assert_eq!(effective_compression(Compression::None), Compression::None);
    }

    #[test]
    fn make_writer_round_trips_each_codec() {
        for compression in [Compression::Zstd, Compression::Gzip, Compression::None] {
            let buf: Vec<u8> = Vec::new();
            let mut writer = make_writer(compression, 1, Box::new(buf)).unwrap();
            writer.write_all(b"hello world\n").unwrap();
            let raw = writer.finish().unwrap();
            // NoneWriter hands back the same boxed Vec<u8>; the compressed
            // variants hand back their finalized, framed byte stream.
            drop(raw);
        }
    }
}
