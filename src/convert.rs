//! The conversion pipeline.
//!
//! Frames are read one at a time and each goes through decode, encode, the
//! optional filter and the write before the next frame is read. The first
//! failure aborts the run; output already written stays written.

use crate::config::ConverterConfig;
use crate::error::{ConvertError, Result};
use crate::filter::{self, FilterKind};
use crate::frame::{Frame, FrameReader};
use proto_codec::{Encoding, ProtoCodec};
use proto_types::{ProtoMessageDescriptor, ProtoSchema};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

const PREVIEW_LEN: usize = 32;

/// Totals for a finished conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub frames: usize,
    pub bytes_in: usize,
    pub bytes_out: usize,
}

/// A configured converter bound to one message type.
pub struct Converter {
    codec: ProtoCodec,
    descriptor: Arc<ProtoMessageDescriptor>,
    config: ConverterConfig,
}

impl Converter {
    /// Resolve the configured message type. Fails before any I/O if the
    /// schema does not contain it.
    pub fn new(schema: Arc<ProtoSchema>, config: ConverterConfig) -> Result<Self> {
        let codec = ProtoCodec::new(schema);
        let descriptor = codec
            .find_message(&config.message_name)
            .map_err(ConvertError::MessageNotFound)?;

        Ok(Self {
            codec,
            descriptor,
            config,
        })
    }

    pub fn descriptor(&self) -> &Arc<ProtoMessageDescriptor> {
        &self.descriptor
    }

    /// Convert every frame of `input` and write the results to `output`.
    ///
    /// When a delimiter is configured it is written after every output
    /// frame, the last one included.
    pub fn convert<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> Result<ConvertStats> {
        info!(
            "Converting {} messages from {} to {}",
            self.descriptor.name(),
            self.config.input_encoding,
            self.config.output_encoding
        );

        let mut frames = FrameReader::new(input, self.config.delimiter);
        let mut stats = ConvertStats::default();

        while let Some(frame) = frames
            .next_frame()
            .map_err(|source| ConvertError::Framing {
                frame: stats.frames,
                source,
            })?
        {
            let encoded = self.convert_frame(&frame)?;

            let write_error = |source: std::io::Error| ConvertError::Write {
                frame: frame.index,
                source,
            };
            output.write_all(&encoded).map_err(write_error)?;
            if let Some(delimiter) = self.config.delimiter {
                output.write_all(&[delimiter]).map_err(write_error)?;
            }

            debug!(
                "Converted frame {} ({} bytes -> {} bytes)",
                frame.index,
                frame.bytes.len(),
                encoded.len()
            );
            stats.frames += 1;
            stats.bytes_in += frame.bytes.len();
            stats.bytes_out += encoded.len();
        }

        output.flush().map_err(|source| ConvertError::Write {
            frame: stats.frames.saturating_sub(1),
            source,
        })?;

        info!(
            "Converted {} frames ({} bytes in, {} bytes out)",
            stats.frames, stats.bytes_in, stats.bytes_out
        );
        Ok(stats)
    }

    /// Decode, re-encode and filter a single frame.
    pub fn convert_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        let message = self
            .codec
            .decode(&self.descriptor, &frame.bytes, self.config.input_encoding)
            .map_err(|source| ConvertError::Decode {
                frame: frame.index,
                preview: preview(&frame.bytes),
                source,
            })?;

        let encoded = self
            .codec
            .encode(&message, self.config.output_encoding)
            .map_err(|source| ConvertError::Encode {
                frame: frame.index,
                source,
            })?;

        Ok(filter::apply(encoded, self.config.filter))
    }
}

/// Convert a stream in one call.
#[allow(clippy::too_many_arguments)]
pub fn convert<R: BufRead, W: Write>(
    schema: Arc<ProtoSchema>,
    message_name: &str,
    input_encoding: Encoding,
    output_encoding: Encoding,
    delimiter: Option<u8>,
    filter: Option<FilterKind>,
    input: R,
    output: &mut W,
) -> Result<ConvertStats> {
    let config = ConverterConfig::new(message_name, input_encoding, output_encoding)
        .with_delimiter(delimiter)
        .with_filter(filter);
    Converter::new(schema, config)?.convert(input, output)
}

/// Escaped leading bytes of a frame, for error messages.
fn preview(bytes: &[u8]) -> String {
    let mut out: String = bytes
        .iter()
        .take(PREVIEW_LEN)
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect();
    if bytes.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    format!("\"{out}\"")
}
