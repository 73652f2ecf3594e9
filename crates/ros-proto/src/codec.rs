use bytes::{Buf, BufMut, BytesMut};

use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ErrorKind, Result};

// Upper bounds of the one, two, three and four byte length prefixes.
const ONE_BYTE_LIMIT: usize = 0x80;
const TWO_BYTES_LIMIT: usize = 0x4000;
const THREE_BYTES_LIMIT: usize = 0x20_0000;
const FOUR_BYTES_LIMIT: usize = 0x1000_0000;

// Marker of the five byte length prefix.
const FIVE_BYTES_MARKER: u8 = 0xF0;

/// Default upper bound of a decoded word, in bytes.
pub const DEFAULT_MAX_WORD_LENGTH: usize = 16 * 1024 * 1024;

fn length_error(len: usize) -> Error {
    Error::new(
        ErrorKind::Protocol,
        format!("Word of {len} bytes exceeds the maximum encodable length"),
    )
}

/// Appends the length prefix of a word to `dst`.
pub(crate) fn encode_length(len: usize, dst: &mut BytesMut) -> Result<()> {
    if len < ONE_BYTE_LIMIT {
        dst.put_u8(len as u8);
    } else if len < TWO_BYTES_LIMIT {
        dst.put_u16(len as u16 | 0x8000);
    } else if len < THREE_BYTES_LIMIT {
        let len = len as u32 | 0x00C0_0000;
        dst.put_slice(&len.to_be_bytes()[1..]);
    } else if len < FOUR_BYTES_LIMIT {
        dst.put_u32(len as u32 | 0xE000_0000);
    } else {
        let len = u32::try_from(len).map_err(|_| length_error(len))?;
        dst.put_u8(FIVE_BYTES_MARKER);
        dst.put_u32(len);
    }
    Ok(())
}

/// Decodes the length prefix at the start of `src`.
///
/// Returns the word length along with the number of prefix bytes, or
/// [`None`] when `src` does not hold the whole prefix yet.
pub(crate) fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let prefix_len = match first {
        0x00..=0x7F => 1,
        0x80..=0xBF => 2,
        0xC0..=0xDF => 3,
        0xE0..=0xEF => 4,
        FIVE_BYTES_MARKER => 5,
        _ => {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!("Unexpected control byte `{first:#04x}` in length prefix"),
            ));
        }
    };

    if src.len() < prefix_len {
        return Ok(None);
    }

    let prefix = &src[..prefix_len];
    let len = match prefix_len {
        1 => u32::from(first),
        2 => u32::from(first & 0x3F) << 8 | u32::from(prefix[1]),
        3 => u32::from(first & 0x1F) << 16 | u32::from(prefix[1]) << 8 | u32::from(prefix[2]),
        4 => {
            u32::from(first & 0x0F) << 24
                | u32::from(prefix[1]) << 16
                | u32::from(prefix[2]) << 8
                | u32::from(prefix[3])
        }
        _ => u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]),
    };

    Ok(Some((len as usize, prefix_len)))
}

/// A codec framing whole sentences.
///
/// A sentence is a sequence of length-prefixed words terminated by a
/// zero-length word. Decoded words are converted lossily to UTF-8.
///
/// Words announcing more than the maximum word length are rejected before
/// any buffer space is reserved for them. The same bound applies to a whole
/// buffered sentence.
#[derive(Debug, Clone, Copy)]
pub struct SentenceCodec {
    max_word_length: usize,
}

impl Default for SentenceCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceCodec {
    /// Creates a [`SentenceCodec`] bounded by [`DEFAULT_MAX_WORD_LENGTH`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_word_length: DEFAULT_MAX_WORD_LENGTH,
        }
    }

    /// Sets the maximum length of a decoded word.
    #[must_use]
    pub const fn max_word_length(mut self, max_word_length: usize) -> Self {
        self.max_word_length = max_word_length;
        self
    }

    fn oversized(&self, len: usize) -> Error {
        Error::new(
            ErrorKind::Protocol,
            format!(
                "Received {len} bytes, exceeding the maximum of {} bytes",
                self.max_word_length
            ),
        )
    }
}

impl Decoder for SentenceCodec {
    type Item = Vec<String>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            // Word boundaries found so far, consumed only once the whole
            // sentence is buffered.
            let mut words = Vec::new();
            let mut position = 0;

            loop {
                let Some((len, prefix_len)) = decode_length(&src[position..])? else {
                    return Ok(None);
                };
                if len > self.max_word_length {
                    return Err(self.oversized(len));
                }
                let start = position + prefix_len;
                if len == 0 {
                    position = start;
                    break;
                }
                let end = start + len;
                if end > self.max_word_length {
                    return Err(self.oversized(end));
                }
                if src.len() < end {
                    src.reserve(end - src.len());
                    return Ok(None);
                }
                words.push(start..end);
                position = end;
            }

            let frame = src.split_to(position);

            // Stray terminators carry no sentence.
            if words.is_empty() {
                if src.has_remaining() {
                    continue;
                }
                return Ok(None);
            }

            return Ok(Some(
                words
                    .into_iter()
                    .map(|range| String::from_utf8_lossy(&frame[range]).into_owned())
                    .collect(),
            ));
        }
    }
}

impl Encoder<Vec<String>> for SentenceCodec {
    type Error = Error;

    fn encode(&mut self, sentence: Vec<String>, dst: &mut BytesMut) -> Result<()> {
        let total: usize = sentence.iter().map(|word| word.len() + 5).sum();
        dst.reserve(total + 1);

        for word in &sentence {
            encode_length(word.len(), dst)?;
            dst.put_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}
