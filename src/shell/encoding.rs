//! Host code-page resolution and streaming text conversion.
//!
//! Legacy interactive shells read and write the host's native code page
//! rather than UTF-8, so shell output is decoded and client input encoded
//! with that encoding. Decoding is streaming: a multibyte sequence split
//! across two pipe reads is carried over instead of being replaced.

use std::borrow::Cow;

use encoding_rs::{Decoder, Encoding, UTF_8};
use tracing::debug;

use crate::{AppError, Result};

/// Resolve the encoding used for shell stdio.
///
/// An explicit label (from configuration) always wins. Otherwise the host
/// code page is probed; UTF-8 is used when nothing can be determined.
///
/// # Errors
///
/// Returns `AppError::Config` when `override_label` is not a known label.
pub fn resolve_host_encoding(override_label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(label) = override_label {
        return Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| AppError::Config(format!("unknown encoding label '{label}'")));
    }

    let encoding = host_code_page_encoding().unwrap_or(UTF_8);
    debug!(encoding = encoding.name(), "resolved host code page");
    Ok(encoding)
}

/// Map a Windows code page number to an encoding.
///
/// Covers the code pages legacy consoles commonly run with. Returns `None`
/// for code pages without a WHATWG encoding (e.g. 437).
#[must_use]
pub fn encoding_for_code_page(code_page: u32) -> Option<&'static Encoding> {
    let label: &[u8] = match code_page {
        65001 => b"utf-8",
        936 | 54936 => b"gb18030",
        950 => b"big5",
        932 => b"shift_jis",
        949 => b"euc-kr",
        866 => b"ibm866",
        874 => b"windows-874",
        1250 => b"windows-1250",
        1251 => b"windows-1251",
        1252 => b"windows-1252",
        1253 => b"windows-1253",
        1254 => b"windows-1254",
        1255 => b"windows-1255",
        1256 => b"windows-1256",
        1257 => b"windows-1257",
        1258 => b"windows-1258",
        20866 => b"koi8-r",
        21866 => b"koi8-u",
        28591 => b"iso-8859-1",
        28592 => b"iso-8859-2",
        28595 => b"iso-8859-5",
        _ => return None,
    };
    Encoding::for_label(label)
}

/// Extract the charset from a POSIX locale string such as `zh_CN.GBK` or
/// `en_US.UTF-8@euro`.
#[must_use]
pub fn charset_from_locale(locale: &str) -> Option<&'static Encoding> {
    let (_, charset) = locale.split_once('.')?;
    let charset = charset.split('@').next().unwrap_or(charset);
    Encoding::for_label(charset.as_bytes())
}

#[cfg(unix)]
fn host_code_page_encoding() -> Option<&'static Encoding> {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| charset_from_locale(&locale))
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn host_code_page_encoding() -> Option<&'static Encoding> {
    use windows_sys::Win32::Globalization::GetOEMCP;
    use windows_sys::Win32::System::Console::GetConsoleOutputCP;

    // SAFETY: both calls take no arguments and only read process state.
    let console = unsafe { GetConsoleOutputCP() };
    let code_page = if console == 0 {
        unsafe { GetOEMCP() }
    } else {
        console
    };
    encoding_for_code_page(code_page)
}

#[cfg(not(any(unix, windows)))]
fn host_code_page_encoding() -> Option<&'static Encoding> {
    None
}

/// Encode client input for the shell's stdin.
#[must_use]
pub fn encode_input<'a>(encoding: &'static Encoding, text: &'a str) -> Cow<'a, [u8]> {
    let (bytes, _, _) = encoding.encode(text);
    bytes
}

/// Streaming decoder for one shell output stream.
pub struct OutputDecoder {
    decoder: Decoder,
}

impl std::fmt::Debug for OutputDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDecoder")
            .field("encoding", &self.decoder.encoding().name())
            .finish()
    }
}

impl OutputDecoder {
    /// Create a decoder for `encoding`; a BOM in the stream is honoured.
    #[must_use]
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
        }
    }

    /// Decode one chunk. Trailing bytes of an incomplete sequence are kept
    /// for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.decode_inner(bytes, false)
    }

    /// Flush any buffered partial sequence at end-of-stream.
    pub fn finish(&mut self) -> String {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len().saturating_mul(3).saturating_add(16));
        let mut out = String::with_capacity(capacity);
        let (_, _, _) = self.decoder.decode_to_string(bytes, &mut out, last);
        out
    }
}
