use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use std::path::Path;

/// Basic stream properties of an opened video.
#[derive(Debug, Clone, Copy)]
pub struct VideoInfo {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Total duration in seconds.
    pub duration: f64,
}

/// Decodes a video file into RGB frames.
pub struct VideoSource {
    input_path: String,
}

impl VideoSource {
    pub fn new(input_path: impl AsRef<Path>) -> Result<Self> {
        ffmpeg::init().context("failed to initialize FFmpeg")?;

        // Keep the FFmpeg logger quiet; only real errors are interesting.
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }

        Ok(Self {
            input_path: input_path.as_ref().to_string_lossy().to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.input_path
    }

    pub fn info(&self) -> Result<VideoInfo> {
        let ictx = ffmpeg::format::input(&self.input_path)
            .with_context(|| format!("failed to open video file: {}", self.input_path))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;

        let decoder_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                .context("failed to create decoder context")?;
        let decoder = decoder_context
            .decoder()
            .video()
            .context("failed to create video decoder")?;

        let rate = video_stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            30.0
        };

        let duration = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;

        Ok(VideoInfo {
            fps,
            width: decoder.width(),
            height: decoder.height(),
            duration,
        })
    }

    /// Decodes the whole stream, keeping roughly `sample_rate` frames per
    /// second. Returns (timestamp in seconds, frame) pairs in decode order.
    pub fn sample_frames(&self, sample_rate: f64) -> Result<Vec<(f64, DynamicImage)>> {
        let mut ictx = ffmpeg::format::input(&self.input_path)
            .with_context(|| format!("failed to open video file: {}", self.input_path))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;
        let video_stream_index = video_stream.index();
        let time_base: f64 = video_stream.time_base().into();

        let decoder_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                .context("failed to create decoder context")?;
        let mut decoder = decoder_context
            .decoder()
            .video()
            .context("failed to create video decoder")?;

        let mut scaler = rgb_scaler(&decoder)?;

        let mut gate = SampleGate::new(sample_rate);
        let mut frames = Vec::new();

        let mut drain = |decoder: &mut ffmpeg::decoder::Video| -> Result<()> {
            let mut decoded = ffmpeg::frame::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let ts = match decoded.pts() {
                    Some(pts) => pts as f64 * time_base,
                    None => continue,
                };
                if !gate.admit(ts) {
                    continue;
                }

                let mut rgb_frame = ffmpeg::frame::Video::empty();
                scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("failed to convert frame to RGB")?;
                frames.push((ts, frame_to_image(&rgb_frame)?));
            }
            Ok(())
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != video_stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("failed to send packet to decoder")?;
            drain(&mut decoder)?;
        }
        decoder.send_eof().context("failed to flush decoder")?;
        drain(&mut decoder)?;

        Ok(frames)
    }

    /// Seeks to `seconds` and decodes the first frame at or after that point.
    pub fn extract_frame_at(&self, seconds: f64) -> Result<DynamicImage> {
        let mut ictx = ffmpeg::format::input(&self.input_path)
            .with_context(|| format!("failed to open video file: {}", self.input_path))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;
        let video_stream_index = video_stream.index();
        let time_base: f64 = video_stream.time_base().into();
        let parameters = video_stream.parameters();

        let timestamp = (seconds * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;

        // Seek backwards to the nearest keyframe, then decode forward until
        // the target time is reached.
        unsafe {
            let ret = ffmpeg::sys::av_seek_frame(
                ictx.as_mut_ptr(),
                -1,
                timestamp,
                ffmpeg::sys::AVSEEK_FLAG_BACKWARD as i32,
            );
            if ret < 0 {
                anyhow::bail!("failed to seek to {:.2}s in {}", seconds, self.input_path);
            }
        }

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .context("failed to create decoder context")?;
        let mut decoder = decoder_context
            .decoder()
            .video()
            .context("failed to create video decoder")?;
        decoder.flush();

        let mut scaler = rgb_scaler(&decoder)?;

        // Bounded scan so a broken stream cannot spin forever.
        const MAX_PACKETS: usize = 1024;
        let mut packets_read = 0usize;

        for (stream, packet) in ictx.packets() {
            if stream.index() != video_stream_index {
                continue;
            }
            packets_read += 1;
            if packets_read > MAX_PACKETS {
                break;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }

            let mut decoded = ffmpeg::frame::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let ts = decoded.pts().map(|pts| pts as f64 * time_base).unwrap_or(0.0);
                if ts + 1e-6 < seconds {
                    continue;
                }
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("failed to convert frame to RGB")?;
                return frame_to_image(&rgb_frame);
            }
        }

        anyhow::bail!(
            "no frame found at {:.2}s in {}",
            seconds,
            self.input_path
        )
    }
}

/// Decides which decoded frames to keep for a target sampling rate.
struct SampleGate {
    interval: f64,
    next_time: f64,
}

impl SampleGate {
    fn new(sample_rate: f64) -> Self {
        Self {
            interval: if sample_rate > 0.0 { 1.0 / sample_rate } else { 0.0 },
            next_time: 0.0,
        }
    }

    /// Whether the frame at `ts` should be kept. The next admission time is
    /// anchored to the kept frame's timestamp, so a PTS gap does not let a
    /// burst of consecutive frames through afterwards.
    fn admit(&mut self, ts: f64) -> bool {
        if ts < self.next_time {
            return false;
        }
        self.next_time = ts + self.interval;
        true
    }
}

fn rgb_scaler(
    decoder: &ffmpeg::decoder::Video,
) -> Result<ffmpeg::software::scaling::Context> {
    ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .context("failed to create scaler")
}

/// Copies an RGB24 frame into an image buffer, honoring the row stride.
fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<DynamicImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut buf = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height as usize {
        let row_start = y * stride;
        let row_end = row_start + width as usize * 3;
        if row_end > data.len() {
            anyhow::bail!("decoded frame is shorter than expected");
        }
        buf.extend_from_slice(&data[row_start..row_end]);
    }

    let img = image::RgbImage::from_raw(width, height, buf)
        .context("failed to build image from decoded frame")?;
    Ok(DynamicImage::ImageRgb8(img))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_gate_keeps_one_frame_per_interval() {
        let mut gate = SampleGate::new(1.0);

        assert!(gate.admit(0.0));
        assert!(!gate.admit(0.25));
        assert!(!gate.admit(0.75));
        assert!(gate.admit(1.0));
        assert!(!gate.admit(1.5));
        assert!(gate.admit(2.1));
    }

    #[test]
    fn test_sample_gate_anchors_after_pts_gap() {
        let mut gate = SampleGate::new(1.0);

        assert!(gate.admit(0.0));
        // A five second gap in the stream.
        assert!(gate.admit(5.0));
        // Consecutive frames right after the gap must not slip through.
        assert!(!gate.admit(5.1));
        assert!(!gate.admit(5.9));
        assert!(gate.admit(6.0));
    }

    #[test]
    fn test_sample_gate_zero_rate_keeps_everything() {
        let mut gate = SampleGate::new(0.0);

        assert!(gate.admit(0.0));
        assert!(gate.admit(0.01));
        assert!(gate.admit(0.02));
    }
}
