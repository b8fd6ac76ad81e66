//! Raw audio formats over parameter values.

use anyhow::{Result, bail};
use pod::{Builder, Choice, Value, filter, fixate};
use protocol::id::{self, AudioFormat as SampleFormat, MediaSubType, MediaType, ObjectType, Param};

/// A negotiated raw audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

impl AudioFormat {
    /// The size of one sample in bytes.
    pub fn sample_size(&self) -> u32 {
        match self.format {
            SampleFormat::S16 | SampleFormat::S16P => 2,
            SampleFormat::S32 | SampleFormat::S32P => 4,
            SampleFormat::F32 | SampleFormat::F32P => 4,
            SampleFormat::F64 | SampleFormat::F64P => 8,
            _ => 4,
        }
    }

    /// Whether samples are planar, one data block per channel.
    pub fn is_planar(&self) -> bool {
        matches!(
            self.format,
            SampleFormat::S16P | SampleFormat::S32P | SampleFormat::F32P | SampleFormat::F64P
        )
    }

    /// The number of data blocks a buffer of this format carries.
    pub fn blocks(&self) -> u32 {
        if self.is_planar() { self.channels } else { 1 }
    }

    /// The stride of one frame within a data block.
    pub fn stride(&self) -> u32 {
        if self.is_planar() {
            self.sample_size()
        } else {
            self.sample_size() * self.channels
        }
    }

    /// Express the format as a fixated format object for the given
    /// parameter id.
    pub fn to_value(&self, param: Param) -> Value {
        Builder::object(ObjectType::FORMAT, param)
            .property(id::Format::MEDIA_TYPE, Value::id(MediaType::AUDIO))
            .property(id::Format::MEDIA_SUB_TYPE, Value::id(MediaSubType::RAW))
            .property(id::Format::AUDIO_FORMAT, Value::id(self.format))
            .property(id::Format::AUDIO_RATE, Value::Int(self.rate as i32))
            .property(id::Format::AUDIO_CHANNELS, Value::Int(self.channels as i32))
            .build_value()
    }

    /// Parse a fixated format object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            bail!("Format parameter is not an object");
        };

        if object.object_type != ObjectType::FORMAT.into_raw() {
            bail!("Parameter object is not a format");
        }

        let media_type = object
            .property(id::Format::MEDIA_TYPE)
            .and_then(Value::as_id)
            .map(MediaType::from_raw);

        if media_type != Some(MediaType::AUDIO) {
            bail!("Format media type {media_type:?} is not audio");
        }

        let sub_type = object
            .property(id::Format::MEDIA_SUB_TYPE)
            .and_then(Value::as_id)
            .map(MediaSubType::from_raw);

        if sub_type != Some(MediaSubType::RAW) {
            bail!("Format media subtype {sub_type:?} is not raw");
        }

        let Some(format) = object
            .property(id::Format::AUDIO_FORMAT)
            .and_then(Value::as_id)
            .map(SampleFormat::from_raw)
        else {
            bail!("Format has no sample format");
        };

        let Some(rate) = object.property(id::Format::AUDIO_RATE).and_then(Value::as_int) else {
            bail!("Format has no rate");
        };

        let Some(channels) = object
            .property(id::Format::AUDIO_CHANNELS)
            .and_then(Value::as_int)
        else {
            bail!("Format has no channel count");
        };

        Ok(Self {
            format,
            rate: rate as u32,
            channels: channels as u32,
        })
    }

    /// Build an enumeration format object offering this format as the
    /// default among the given alternatives.
    pub fn enum_value(
        &self,
        formats: impl IntoIterator<Item = SampleFormat>,
        rates: impl IntoIterator<Item = u32>,
    ) -> Value {
        let format = choice_or_plain(
            Value::id(self.format),
            formats.into_iter().map(Value::id).collect(),
        );

        let rate = choice_or_plain(
            Value::Int(self.rate as i32),
            rates.into_iter().map(|r| Value::Int(r as i32)).collect(),
        );

        Builder::object(ObjectType::FORMAT, Param::ENUM_FORMAT)
            .property(id::Format::MEDIA_TYPE, Value::id(MediaType::AUDIO))
            .property(id::Format::MEDIA_SUB_TYPE, Value::id(MediaSubType::RAW))
            .property(id::Format::AUDIO_FORMAT, format)
            .property(id::Format::AUDIO_RATE, rate)
            .property(id::Format::AUDIO_CHANNELS, Value::Int(self.channels as i32))
            .build_value()
    }
}

fn choice_or_plain(default: Value, alternatives: Vec<Value>) -> Value {
    let alternatives: Vec<Value> = alternatives.into_iter().filter(|v| *v != default).collect();

    if alternatives.is_empty() {
        default
    } else {
        Value::choice(Choice::enumeration(default, alternatives))
    }
}

/// Intersect the enumerated formats of two linked ports and fixate the
/// first match.
///
/// The output side's preferences dictate the defaults.
pub fn negotiate(output: &[Value], input: &[Value]) -> Option<Value> {
    for a in output {
        for b in input {
            if let Some(joint) = filter(a, b) {
                let mut fixed = fixate(&joint);

                if let Value::Object(object) = &mut fixed {
                    object.object_id = Param::FORMAT.into_raw();
                }

                return Some(fixed);
            }
        }
    }

    None
}

/// Build a buffer-requirement object.
pub fn buffers_value(buffers: u32, blocks: u32, size: u32, stride: u32, align: u32) -> Value {
    Builder::object(ObjectType::PARAM_BUFFERS, Param::BUFFERS)
        .property(
            id::ParamBuffers::BUFFERS,
            Value::choice(Choice::range(
                Value::Int(buffers as i32),
                Value::Int(1),
                Value::Int(32),
            )),
        )
        .property(id::ParamBuffers::BLOCKS, Value::Int(blocks as i32))
        .property(id::ParamBuffers::SIZE, Value::Int(size as i32))
        .property(id::ParamBuffers::STRIDE, Value::Int(stride as i32))
        .property(id::ParamBuffers::ALIGN, Value::Int(align as i32))
        .build_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_round_trip() {
        let format = AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 1,
        };

        let value = format.to_value(Param::FORMAT);
        assert_eq!(AudioFormat::from_value(&value).unwrap(), format);
    }

    #[test]
    fn planar_blocks_and_stride() {
        let planar = AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 2,
        };

        assert_eq!(planar.blocks(), 2);
        assert_eq!(planar.stride(), 4);

        let interleaved = AudioFormat {
            format: SampleFormat::S16,
            rate: 48000,
            channels: 2,
        };

        assert_eq!(interleaved.blocks(), 1);
        assert_eq!(interleaved.stride(), 4);
    }

    #[test]
    fn negotiate_picks_common_rate() {
        let out = AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 1,
        };

        let inp = AudioFormat {
            format: SampleFormat::F32P,
            rate: 44100,
            channels: 1,
        };

        let a = out.enum_value([SampleFormat::F32P], [48000, 44100]);
        let b = inp.enum_value([SampleFormat::F32P], [44100]);

        let joint = negotiate(&[a], &[b]).unwrap();
        let format = AudioFormat::from_value(&joint).unwrap();

        assert_eq!(format.rate, 44100);
        assert_eq!(format.format, SampleFormat::F32P);
    }

    #[test]
    fn negotiate_fails_on_disjoint_channels() {
        let out = AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 1,
        };

        let inp = AudioFormat {
            format: SampleFormat::F32P,
            rate: 48000,
            channels: 2,
        };

        let a = out.enum_value([SampleFormat::F32P], [48000]);
        let b = inp.enum_value([SampleFormat::F32P], [48000]);

        assert!(negotiate(&[a], &[b]).is_none());
    }
}
