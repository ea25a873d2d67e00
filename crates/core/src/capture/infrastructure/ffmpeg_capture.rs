use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;

use crate::capture::domain::frame_source::{CaptureError, FrameSource};
use crate::shared::frame::Frame;

#[cfg(target_os = "linux")]
const DEVICE_DEMUXER: &str = "v4l2";
#[cfg(target_os = "macos")]
const DEVICE_DEMUXER: &str = "avfoundation";
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const DEVICE_DEMUXER: &str = "dshow";

/// Live frames from a camera device, stream URL or file via ffmpeg-next.
///
/// Decoded frames are converted to RGB24. The scaler is built from the
/// first decoded frame, since capture devices often report no pixel
/// format until they deliver one.
pub struct FfmpegCaptureSource {
    device: String,
    capture: Option<Capture>,
    frame_index: u64,
}

// Safety: FfmpegCaptureSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegCaptureSource {}

struct Capture {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<(scaling::Context, (Pixel, u32, u32))>,
    stream_index: usize,
    flushed: bool,
}

impl FfmpegCaptureSource {
    /// Opens `device` with default probing, then once more through the
    /// platform capture demuxer requesting MJPEG before giving up.
    pub fn open(device: &str) -> Result<Self, CaptureError> {
        let unavailable = |message: String| CaptureError::Unavailable {
            device: device.to_string(),
            message,
        };
        ffmpeg_next::init().map_err(|e| unavailable(e.to_string()))?;
        ffmpeg_next::device::register_all();

        let ictx = match ffmpeg_next::format::input(device) {
            Ok(ictx) => ictx,
            Err(first) => {
                log::warn!("Opening {device} failed ({first}); retrying as {DEVICE_DEMUXER} MJPEG device");
                open_mjpeg_device(device)
                    .map_err(|second| unavailable(format!("{first}; {DEVICE_DEMUXER}: {second}")))?
            }
        };

        let (stream_index, parameters) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| unavailable("no video stream".into()))?;
            (stream.index(), stream.parameters())
        };
        let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| unavailable(e.to_string()))?;

        log::info!("Opened capture device {device}");
        Ok(Self {
            device: device.to_string(),
            capture: Some(Capture {
                ictx,
                decoder,
                scaler: None,
                stream_index,
                flushed: false,
            }),
            frame_index: 0,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

fn open_mjpeg_device(
    device: &str,
) -> Result<ffmpeg_next::format::context::Input, ffmpeg_next::Error> {
    let demuxer = ffmpeg_next::device::input::video()
        .find(|format| format.name() == DEVICE_DEMUXER)
        .ok_or(ffmpeg_next::Error::DemuxerNotFound)?;

    let mut options = ffmpeg_next::Dictionary::new();
    options.set("input_format", "mjpeg");

    match ffmpeg_next::format::open_with(
        device,
        &ffmpeg_next::format::Format::Input(demuxer),
        options,
    )? {
        ffmpeg_next::format::context::Context::Input(ictx) => Ok(ictx),
        _ => Err(ffmpeg_next::Error::DemuxerNotFound),
    }
}

impl Capture {
    fn next_rgb(&mut self) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        loop {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_rgb(&decoded);
            }
            if self.flushed {
                return Err(CaptureError::Read("end of stream".into()));
            }

            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushed = true;
                continue;
            };
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable packet: {e}");
            }
        }
    }

    fn to_rgb(&mut self, decoded: &Video) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        let (width, height) = (decoded.width(), decoded.height());
        let key = (decoded.format(), width, height);

        if self.scaler.as_ref().map(|(_, k)| *k) != Some(key) {
            let scaler = scaling::Context::get(
                key.0,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| CaptureError::Read(e.to_string()))?;
            self.scaler = Some((scaler, key));
        }
        let Some((scaler, _)) = self.scaler.as_mut() else {
            return Err(CaptureError::Read("scaler unavailable".into()));
        };

        let mut rgb = Video::empty();
        scaler
            .run(decoded, &mut rgb)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        Ok((extract_rgb_pixels(&rgb, width, height), width, height))
    }
}

impl FrameSource for FfmpegCaptureSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let capture = self.capture.as_mut().ok_or(CaptureError::Closed)?;
        let (pixels, width, height) = capture.next_rgb()?;
        let frame = Frame::new(pixels, width, height, 3, self.frame_index);
        self.frame_index += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if self.capture.take().is_some() {
            log::info!("Released capture device {}", self.device);
        }
    }
}

impl Drop for FfmpegCaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn extract_rgb_pixels(rgb_frame: &Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    pixels
}
