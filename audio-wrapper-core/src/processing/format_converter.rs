use crate::models::config::{FrameFormat, SampleEncoding};

/// Converts provider buffers into the engine's output `FrameFormat`.
///
/// Pipeline: channel remix → linear resample → sample encoding. The
/// resampler keeps its position across buffers, so one converter serves one
/// continuous stream (one capture session).
#[derive(Debug, Clone)]
pub struct FormatConverter {
    target: FrameFormat,
    resampler: Option<LinearResampler>,
}

impl FormatConverter {
    pub fn new(target: FrameFormat) -> Self {
        Self {
            target,
            resampler: None,
        }
    }

    pub fn target(&self) -> FrameFormat {
        self.target
    }

    /// Convert one interleaved f32 buffer to raw bytes in the target format.
    ///
    /// A trailing partial frame in `samples` is ignored. A change of source
    /// rate restarts the resampler.
    pub fn convert(&mut self, samples: &[f32], source_rate: u32, source_channels: u16) -> Vec<u8> {
        if source_channels == 0 || source_rate == 0 {
            return Vec::new();
        }
        let whole = samples.len() - samples.len() % source_channels as usize;
        let channels = self.target.channels as usize;
        let remixed = remix(&samples[..whole], source_channels as usize, channels);

        if source_rate == self.target.sample_rate {
            self.resampler = None;
            return encode(&remixed, self.target.encoding);
        }

        let target_rate = self.target.sample_rate;
        if self.resampler.as_ref().is_some_and(|r| r.source_rate != source_rate) {
            self.resampler = None;
        }
        let resampler = self.resampler.get_or_insert_with(|| {
            log::debug!("resampling {} Hz -> {} Hz", source_rate, target_rate);
            LinearResampler::new(channels, source_rate, target_rate)
        });
        let resampled = resampler.process(&remixed);
        encode(&resampled, self.target.encoding)
    }
}

/// Change the channel count of interleaved audio.
///
/// - N → 1: average of all channels.
/// - 1 → N: the mono sample copied to every channel.
/// - N → M (both > 1): first `min(N, M)` channels kept, extra output channels silent.
pub fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / from;
    let mut output = Vec::with_capacity(frame_count * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: f32 = frame.iter().sum();
            output.push(sum / from as f32);
        } else if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                output.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    output
}

/// Streaming linear-interpolation resampler for interleaved audio.
///
/// Output frame `k` of the stream sits at source position
/// `k * source_rate / target_rate`, computed in integers so the output length
/// tracks the rate ratio exactly however the input is split into buffers. An
/// output frame is emitted once both source frames around it have arrived;
/// the last frame of each buffer is kept to interpolate across the boundary.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    /// Stream index of the first frame of the next input buffer.
    base: u64,
    /// Stream index of the next output frame.
    next_output: u64,
    previous: Vec<f32>,
}

impl LinearResampler {
    pub fn new(channels: usize, source_rate: u32, target_rate: u32) -> Self {
        Self {
            channels: channels.max(1),
            source_rate: source_rate.max(1),
            target_rate: target_rate.max(1),
            base: 0,
            next_output: 0,
            previous: Vec::new(),
        }
    }

    /// Resample the next interleaved buffer of the stream.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        let frames = (samples.len() / channels) as u64;
        if frames == 0 {
            return Vec::new();
        }
        let last = self.base + frames - 1;
        let (src, dst) = (self.source_rate as u64, self.target_rate as u64);

        let mut output = Vec::with_capacity((frames * dst / src + 1) as usize * channels);
        loop {
            let position = self.next_output * src;
            let index = position / dst;
            let remainder = position % dst;
            if index > last || (index == last && remainder != 0) {
                break;
            }
            let fraction = remainder as f32 / dst as f32;
            for ch in 0..channels {
                let a = self.sample(samples, index, ch);
                let value = if remainder == 0 {
                    a
                } else {
                    let b = self.sample(samples, index + 1, ch);
                    a + (b - a) * fraction
                };
                output.push(value);
            }
            self.next_output += 1;
        }

        let tail = (frames as usize - 1) * channels;
        self.previous.clear();
        self.previous.extend_from_slice(&samples[tail..tail + channels]);
        self.base += frames;
        output
    }

    /// Sample at stream frame `index`: the current buffer, or the kept last
    /// frame of the previous one.
    fn sample(&self, samples: &[f32], index: u64, channel: usize) -> f32 {
        if index >= self.base {
            samples[(index - self.base) as usize * self.channels + channel]
        } else {
            self.previous.get(channel).copied().unwrap_or(0.0)
        }
    }
}

/// Encode f32 samples as little-endian bytes.
///
/// For `S16le`, samples are clamped to `[-1.0, 1.0]` first.
pub fn encode(samples: &[f32], encoding: SampleEncoding) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * encoding.bytes_per_sample());
    match encoding {
        SampleEncoding::F32le => {
            for &sample in samples {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        SampleEncoding::S16le => {
            for &sample in samples {
                let clamped = sample.clamp(-1.0, 1.0);
                let value = (clamped * i16::MAX as f32) as i16;
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    data
}
