//! EXI Header decode/encode (§4.5, component C5): cookie, distinguishing
//! bits, version, and options presence.
//!
//! Grounded on `original_source/lib/exi/Decode/HeaderDecoder.cpp`
//! (`DecodeCookieAndBits`, `DecodeVersion`, `decodeHeaderImpl`). That file
//! logs under `DEBUG_TYPE "HeaderDecoder"`; this module logs through the
//! `"exi::header"` target.

use crate::error::{ExiError, ExiErrorKind, Result};
use crate::options::{AlignmentKind, ExiOptions};
use crate::stream::{BitReader, BitWriter};

/// The EXI version this crate implements. Versions beyond this are rejected
/// (§4.5 step 4); preview versions are always rejected.
pub const CURRENT_EXI_VERSION: u32 = 1;

/// Decoded header metadata (§4.5), excluding the options themselves — those
/// are returned separately since out-of-band options bypass the in-band
/// decode path entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExiHeader {
    pub has_cookie: bool,
    pub has_options: bool,
    pub is_preview_version: bool,
    pub exi_version: u32,
}

/// Reads the 2-bit distinguishing bits, consuming and validating an optional
/// `$EXI` cookie first. Mirrors `DecodeCookieAndBits`.
fn decode_cookie_and_bits(reader: &mut BitReader) -> Result<bool> {
    let mut distinguishing_bits = reader.read_bits(2)?;
    let mut has_cookie = false;

    if distinguishing_bits == 0b00 {
        let first = reader.read_bits(6)? as u8;
        if first != b'$' {
            log::error!(target: "exi::header", "invalid cookie byte at '$'");
            return Err(ExiError::new(ExiErrorKind::MalformedCookie(first), reader.tell()));
        }
        for expected in b"EXI" {
            let got = reader.read_byte()?;
            if got != *expected {
                log::error!(target: "exi::header", "invalid cookie byte at '{}'", *expected as char);
                return Err(ExiError::new(ExiErrorKind::MalformedCookie(got), reader.tell()));
            }
        }

        has_cookie = true;
        log::trace!(target: "exi::header", "header has cookie");
        distinguishing_bits = reader.read_bits(2)?;
    }

    if distinguishing_bits != 0b10 {
        return Err(ExiError::new(
            ExiErrorKind::BadDistinguishingBits(distinguishing_bits as u8),
            reader.tell(),
        ));
    }

    Ok(has_cookie)
}

/// Reads the preview-version bit and the variable-length version number.
/// Mirrors `DecodeVersion`: repeatedly read 4-bit chunks, summing into a
/// running total that starts at 1, continuing while a chunk is `0b1111`.
fn decode_version(reader: &mut BitReader) -> Result<(bool, u32)> {
    let is_preview_version = reader.read_bool()?;

    let mut version = 1u32;
    loop {
        let chunk = reader.read_bits(4)? as u32;
        version += chunk;
        if chunk != 0b1111 {
            break;
        }
    }

    Ok((is_preview_version, version))
}

/// Decodes the EXI header (§4.5 steps 1-4) up to and including the options
/// presence bit. If options are in-band (`has_options == true`), the caller
/// must decode them (see [`crate::options`]) and then call
/// [`finish_header`] to run fixup/validation and the final alignment pad.
/// If options are out-of-band, `out_of_band` supplies the pre-agreed
/// options and [`finish_header`] is called directly with them.
pub fn decode_header_prefix(reader: &mut BitReader) -> Result<ExiHeader> {
    let has_cookie = decode_cookie_and_bits(reader)?;
    let has_options = reader.read_bool()?;
    let (is_preview_version, exi_version) = decode_version(reader)?;

    if is_preview_version {
        return Err(ExiError::new(ExiErrorKind::PreviewVersionRejected, reader.tell()));
    }
    if exi_version > CURRENT_EXI_VERSION {
        return Err(ExiError::new(ExiErrorKind::UnsupportedVersion(exi_version), reader.tell()));
    }
    log::trace!(target: "exi::header", "EXI version: {exi_version}");

    if !has_options {
        log::trace!(target: "exi::header", "out of band options provided");
    }

    Ok(ExiHeader { has_cookie, has_options, is_preview_version, exi_version })
}

/// Runs `FixupAndValidateOptions` against an already-decoded (or
/// out-of-band) options record, then aligns the stream to a byte boundary
/// if the resolved alignment is anything but bit-packed (§4.5 steps 6-8).
pub fn finish_header(reader: &mut BitReader, opts: &mut ExiOptions) -> Result<()> {
    opts.fixup_and_validate()?;
    if opts.resolved_alignment() != AlignmentKind::BitPacked {
        reader.align();
    }
    Ok(())
}

/// Decodes a full header when options are known to be out-of-band (the
/// in-band options grammar, §4.5 step 5, is handled by callers that parse
/// the options block themselves and then call [`finish_header`]).
pub fn decode_header_out_of_band(
    reader: &mut BitReader,
    opts: &mut ExiOptions,
) -> Result<ExiHeader> {
    let header = decode_header_prefix(reader)?;
    if header.has_options {
        return Err(ExiError::new(ExiErrorKind::OptionsMissing, reader.tell())
            .with_context("in-band options bit was set but no options decoder was supplied"));
    }
    finish_header(reader, opts)?;
    Ok(header)
}

/// Writes the header prefix: distinguishing bits (with an optional leading
/// `$EXI` cookie), an options-presence bit, and the version number. Callers
/// that place options in-band must write them between the presence bit and
/// calling [`write_header_align`]; out-of-band callers call
/// [`write_header_align`] immediately.
pub fn write_header_prefix(
    writer: &mut BitWriter,
    with_cookie: bool,
    options_in_band: bool,
    version: u32,
) {
    if with_cookie {
        writer.write_bits(0b00, 2);
        for byte in b"$EXI" {
            writer.write_byte(*byte);
        }
    }
    writer.write_bits(0b10, 2);
    writer.write_bool(options_in_band);

    writer.write_bool(false); // not a preview version
    let mut remaining = version - 1;
    loop {
        let chunk = remaining.min(0b1111);
        writer.write_bits(chunk as u64, 4);
        if chunk < 0b1111 {
            break;
        }
        remaining -= chunk;
    }
}

/// Pads to a byte boundary if the resolved alignment calls for it, mirroring
/// the read side's final step in [`finish_header`].
pub fn write_header_align(writer: &mut BitWriter, opts: &ExiOptions) {
    if opts.resolved_alignment() != AlignmentKind::BitPacked {
        writer.align();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_header_without_cookie() {
        let mut w = BitWriter::new();
        write_header_prefix(&mut w, false, false, 1);
        let (bytes, _) = w.finalize();

        let mut r = BitReader::new(&bytes);
        let header = decode_header_prefix(&mut r).unwrap();
        assert!(!header.has_cookie);
        assert!(!header.has_options);
        assert_eq!(header.exi_version, 1);
    }

    #[test]
    fn decodes_header_with_cookie() {
        let mut w = BitWriter::new();
        write_header_prefix(&mut w, true, false, 1);
        let (bytes, _) = w.finalize();
        assert_eq!(&bytes[0..4], b"$EXI");

        let mut r = BitReader::new(&bytes);
        let header = decode_header_prefix(&mut r).unwrap();
        assert!(header.has_cookie);
    }

    #[test]
    fn rejects_bad_cookie_byte() {
        let buf = [0b0011_1111, b'F', b'X', b'I'];
        let mut r = BitReader::new(&buf);
        let err = decode_cookie_and_bits(&mut r).unwrap_err();
        assert!(matches!(err.kind, ExiErrorKind::MalformedCookie(_)));
    }

    #[test]
    fn multi_chunk_version_accumulates() {
        let mut w = BitWriter::new();
        w.write_bool(false);
        w.write_bits(0b1111, 4);
        w.write_bits(0b0010, 4);
        let (bytes, _) = w.finalize();

        let mut r = BitReader::new(&bytes);
        let (preview, version) = decode_version(&mut r).unwrap();
        assert!(!preview);
        assert_eq!(version, 1 + 15 + 2);
    }

    #[test]
    fn finish_header_aligns_when_not_bit_packed() {
        let mut w = BitWriter::new();
        w.write_bit(true);
        let (bytes, _) = w.finalize();
        let mut bytes = bytes;
        bytes.push(0xff);

        let mut r = BitReader::new(&bytes);
        r.read_bit().unwrap();
        let mut opts =
            ExiOptions { alignment: Some(AlignmentKind::ByteAligned), ..Default::default() };
        finish_header(&mut r, &mut opts).unwrap();
        assert_eq!(r.tell().bit, 0);
    }

    #[test]
    fn header_prefix_roundtrips_through_out_of_band_decode() {
        let mut w = BitWriter::new();
        write_header_prefix(&mut w, false, false, 1);
        let mut opts = ExiOptions::default();
        write_header_align(&mut w, &opts);
        let (bytes, _) = w.finalize();

        let mut r = BitReader::new(&bytes);
        let header = decode_header_out_of_band(&mut r, &mut opts).unwrap();
        assert_eq!(header.exi_version, 1);
        assert_eq!(opts.alignment, Some(AlignmentKind::BitPacked));
    }
}
