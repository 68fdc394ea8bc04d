use crate::shared::frame::Frame;
use crate::shared::source_info::SourceInfo;
use crate::video::domain::video_source::{FrameRead, SourceError, VideoSource};

/// Decodes any ffmpeg-readable file, URL or device into RGB24 frames.
pub struct FfmpegSource {
    locator: String,
    state: Option<DecodeState>,
}

struct DecodeState {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    frame_index: usize,
    flushing: bool,
}

// Safety: the source is owned and driven by a single ingestion thread.
// The raw pointers inside ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            state: None,
        }
    }

    fn open_err(&self, reason: impl ToString) -> SourceError {
        SourceError::Open {
            locator: self.locator.clone(),
            reason: reason.to_string(),
        }
    }
}

impl VideoSource for FfmpegSource {
    fn open(&mut self) -> Result<SourceInfo, Box<dyn std::error::Error>> {
        ffmpeg_next::init().map_err(|e| self.open_err(e))?;

        let input = ffmpeg_next::format::input(&self.locator).map_err(|e| self.open_err(e))?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| SourceError::NoVideoStream(self.locator.clone()))?;

        let stream_index = stream.index();
        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| self.open_err(e))?;
        let decoder = codec_ctx.decoder().video().map_err(|e| self.open_err(e))?;
        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| self.open_err(e))?;

        self.state = Some(DecodeState {
            input,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            frame_index: 0,
            flushing: false,
        });

        Ok(SourceInfo {
            width,
            height,
            fps,
            locator: self.locator.clone(),
        })
    }

    fn read(&mut self) -> Result<FrameRead, Box<dyn std::error::Error>> {
        let state = self.state.as_mut().ok_or(SourceError::NotOpen)?;

        if let Some(read) = state.try_receive() {
            return Ok(read);
        }
        if state.flushing {
            return Ok(FrameRead::EndOfStream);
        }

        loop {
            let Some((stream, packet)) = state.input.packets().next() else {
                let _ = state.decoder.send_eof();
                state.flushing = true;
                return Ok(state.try_receive().unwrap_or(FrameRead::EndOfStream));
            };

            if stream.index() != state.stream_index {
                continue;
            }

            if let Err(e) = state.decoder.send_packet(&packet) {
                return Ok(FrameRead::Retry(format!("packet rejected: {e}")));
            }

            if let Some(read) = state.try_receive() {
                return Ok(read);
            }
        }
    }

    fn close(&mut self) {
        self.state = None;
    }
}

impl DecodeState {
    fn try_receive(&mut self) -> Option<FrameRead> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        self.decoder.receive_frame(&mut decoded).ok()?;

        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb) {
            return Some(FrameRead::Retry(format!("scale failed: {e}")));
        }

        let pixels = packed_rgb(&rgb, self.width, self.height);
        let frame = Frame::new(pixels, self.width, self.height, 3, self.frame_index);
        self.frame_index += 1;
        Some(FrameRead::Frame(frame))
    }
}

/// Copies an RGB24 plane into a tightly packed buffer, dropping row padding.
fn packed_rgb(rgb: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}
