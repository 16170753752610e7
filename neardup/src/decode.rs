//! Opening video files for decoding, plus the conversion and packet-pump
//! plumbing shared by the two samplers and the thumbnailer.

extern crate ffmpeg_next as ffmpeg;

pub mod fast;
pub mod slow;

use std::path::Path;
use std::sync::OnceLock;

use color_eyre::eyre::{self, Context};
use ffmpeg::codec::Capabilities;
use ffmpeg::codec::Context as CodecContext;
use ffmpeg::decoder::Video as DecoderVideo;
use ffmpeg::format::context::Input as FormatContext;
use ffmpeg::format::{input_with_dictionary, Pixel};
use ffmpeg::frame::Video as FrameVideo;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as ScalingContext, Flags};
use ffmpeg::util::log as ffmpeglog;
use ffmpeg::{Dictionary, Packet, Rational};
use ffmpeg_sys_next::{AVDiscard, AV_CODEC_FLAG2_FAST, FF_THREAD_FRAME, FF_THREAD_SLICE};
use neardup_common::bin_common::termination::Cookie;
use neardup_common::hashing::{hamming::Hamming, phash};

const MAX_DECODE_THREADS: usize = 16;

/// One-time process-global decoder setup. FFmpeg's own chatter is clamped to
/// warnings.
pub fn ensure_ffmpeg() -> eyre::Result<()> {
    static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();
    if let Err(e) = INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeglog::set_level(ffmpeglog::Level::Warning);
        Ok(())
    }) {
        eyre::bail!("Failed to initialize ffmpeg: {e}");
    }
    Ok(())
}

/// An opened container with its video decoder. Dropping it releases every
/// ffmpeg handle, on error paths included.
pub(crate) struct OpenVideo {
    pub ictx: FormatContext,
    pub decoder: DecoderVideo,
    pub stream_index: usize,
    pub time_base: Rational,
}

pub(crate) fn open(path: &Path) -> eyre::Result<OpenVideo> {
    ensure_ffmpeg()?;

    let options = {
        let mut options = Dictionary::new();
        options.set("probesize", "10M");
        options.set("analyzeduration", "10M");
        options
    };
    let mut ictx =
        input_with_dictionary(&path, options).wrap_err("Failed to open the file")?;

    let (stream_index, time_base, parameters) = {
        let video = ictx
            .streams()
            .best(Type::Video)
            .ok_or(eyre::eyre!("No video stream"))?;
        (video.index(), video.time_base(), video.parameters())
    };

    let codec = ffmpeg::decoder::find(parameters.id());
    let mut codec_ctx =
        CodecContext::from_parameters(parameters).wrap_err("No codec found")?;

    // Threading and the speed knobs have to be in place before the decoder is
    // opened, which the safe API does not allow. Frame threading where the
    // codec supports it, slice threading as the fallback.
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DECODE_THREADS);
    unsafe {
        let raw = codec_ctx.as_mut_ptr();
        (*raw).thread_type = match codec {
            Some(c) if c.capabilities().contains(Capabilities::FRAME_THREADS) => {
                FF_THREAD_FRAME
            }
            Some(c) if c.capabilities().contains(Capabilities::SLICE_THREADS) => {
                FF_THREAD_SLICE
            }
            _ => 0,
        };
        (*raw).thread_count = threads as libc::c_int;
        (*raw).flags2 |= AV_CODEC_FLAG2_FAST as libc::c_int;
        (*raw).skip_loop_filter = AVDiscard::AVDISCARD_ALL;
        (*raw).skip_frame = AVDiscard::AVDISCARD_DEFAULT;
    }

    let decoder = codec_ctx
        .decoder()
        .video()
        .wrap_err("No codec found, of type video (?)")?;

    ictx.streams_mut()
        .filter(|stream| stream.index() != stream_index)
        .for_each(|mut stream| stream_set_discard_all(&mut stream));

    Ok(OpenVideo {
        ictx,
        decoder,
        stream_index,
        time_base,
    })
}

fn stream_set_discard_all(stream: &mut ffmpeg::StreamMut<'_>) {
    unsafe {
        let ptr = stream.as_mut_ptr();
        if !ptr.is_null() {
            (*ptr).discard = AVDiscard::AVDISCARD_ALL;
        }
    }
}

pub(crate) fn sec_to_pts(seconds: f64, time_base: Rational) -> i64 {
    if time_base.numerator() <= 0 || time_base.denominator() <= 0 {
        log::warn!(
            "Invalid time base {}/{}",
            time_base.numerator(),
            time_base.denominator()
        );
        return 0;
    }
    (seconds * time_base.denominator() as f64 / time_base.numerator() as f64).round()
        as i64
}

fn seek(
    input: &mut FormatContext,
    stream_index: usize,
    ts: i64,
    flags: libc::c_int,
) -> Result<(), ffmpeg::Error> {
    unsafe {
        match ffmpeg_sys_next::av_seek_frame(
            input.as_mut_ptr(),
            stream_index as libc::c_int,
            ts,
            flags,
        ) {
            s if s >= 0 => Ok(()),
            e => Err(ffmpeg::Error::from(e)),
        }
    }
}

/// Backward seek to the keyframe at or before `target_pts`, then a decoder
/// flush.
pub(crate) fn seek_backward(v: &mut OpenVideo, target_pts: i64) -> eyre::Result<()> {
    seek(
        &mut v.ictx,
        v.stream_index,
        target_pts,
        ffmpeg_sys_next::AVSEEK_FLAG_BACKWARD as libc::c_int,
    )
    .wrap_err("Failed to seek")?;
    v.decoder.flush();
    Ok(())
}

/// Seek that may land on any frame, keyframe or not.
pub(crate) fn seek_any(v: &mut OpenVideo, target_pts: i64) -> eyre::Result<()> {
    seek(
        &mut v.ictx,
        v.stream_index,
        target_pts,
        ffmpeg_sys_next::AVSEEK_FLAG_ANY as libc::c_int,
    )
    .wrap_err("Failed to seek")?;
    v.decoder.flush();
    Ok(())
}

/// The decoded timestamp, falling back to the demuxer's best effort. `None`
/// means the frame has no usable timestamp at all.
pub(crate) fn frame_pts(frame: &FrameVideo) -> Option<i64> {
    frame.pts().or_else(|| frame.timestamp())
}

/// A frame without any timestamp is always due.
pub(crate) fn sample_due(pts: Option<i64>, next_pts: i64) -> bool {
    pts.map_or(true, |pts| pts >= next_pts)
}

/// Converts decoded frames into contiguous packed buffers of one target
/// format, rebuilding the swscale context only when the source geometry
/// changes.
pub(crate) struct FrameConverter {
    target: Pixel,
    bytes_per_pixel: usize,
    ctx: Option<ScalingContext>,
    src: (u32, u32, Pixel),
}

impl FrameConverter {
    pub fn new_gray() -> Self {
        Self {
            target: Pixel::GRAY8,
            bytes_per_pixel: 1,
            ctx: None,
            src: (0, 0, Pixel::None),
        }
    }

    pub fn new_rgb() -> Self {
        Self {
            target: Pixel::RGB24,
            bytes_per_pixel: 3,
            ctx: None,
            src: (0, 0, Pixel::None),
        }
    }

    /// The converted plane with its padding stripped, plus the frame's
    /// dimensions.
    pub fn convert(
        &mut self,
        frame: &FrameVideo,
    ) -> eyre::Result<(Vec<u8>, usize, usize)> {
        eyre::ensure!(frame.format() != Pixel::None, "No pixel format");

        let src = (frame.width(), frame.height(), frame.format());
        if self.ctx.is_none() || self.src != src {
            self.ctx = Some(
                ScalingContext::get(
                    src.2,
                    src.0,
                    src.1,
                    self.target,
                    src.0,
                    src.1,
                    Flags::FAST_BILINEAR,
                )
                .wrap_err("Failed to create the pixel converter")?,
            );
            self.src = src;
        }

        let mut converted = FrameVideo::empty();
        self.ctx
            .as_mut()
            .expect("was just created")
            .run(frame, &mut converted)
            .wrap_err("Failed to convert the decoded frame")?;

        let width = converted.width() as usize;
        let height = converted.height() as usize;
        let src_linesize = converted.stride(0);
        let trg_linesize = self.bytes_per_pixel * width;
        let data = converted.data(0);

        let buf = if src_linesize == trg_linesize {
            data[..trg_linesize * height].to_vec()
        } else {
            let mut nopadding = vec![0; trg_linesize * height];
            for i in 0..height {
                nopadding[(i * trg_linesize)..((i + 1) * trg_linesize)].copy_from_slice(
                    &data[(i * src_linesize)..(i * src_linesize + trg_linesize)],
                );
            }
            nopadding
        };

        Ok((buf, width, height))
    }
}

/// Frame to perceptual hash, `None` when the luma conversion or the hash
/// itself fails.
pub(crate) fn hash_frame(
    converter: &mut FrameConverter,
    frame: &FrameVideo,
) -> Option<Hamming> {
    match converter.convert(frame) {
        Ok((luma, width, height)) => phash::hash_luma(&luma, width, height),
        Err(e) => {
            log::warn!("Luma extraction failed: {e:#}");
            None
        }
    }
}

/// Decodes forward until a frame with PTS at or past `target_pts` appears and
/// returns it. `Ok(None)` means the stream ended first or the caller
/// cancelled.
pub(crate) fn decode_until(
    v: &mut OpenVideo,
    target_pts: i64,
    cookie: &Cookie,
) -> eyre::Result<Option<FrameVideo>> {
    let mut frame = FrameVideo::empty();
    loop {
        if cookie.is_terminating() {
            return Ok(None);
        }

        loop {
            match v.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    if sample_due(frame_pts(&frame), target_pts) {
                        return Ok(Some(std::mem::replace(
                            &mut frame,
                            FrameVideo::empty(),
                        )));
                    }
                }
                Err(ffmpeg::Error::Other {
                    errno: libc::EAGAIN,
                }) => break,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(e).wrap_err("Decoder error when receiving a frame");
                }
            }
        }

        let mut packet = Packet::empty();
        match packet.read(&mut v.ictx) {
            Ok(()) if packet.stream() == v.stream_index => {
                match v.decoder.send_packet(&packet) {
                    Ok(()) => (),
                    Err(ffmpeg::Error::Other {
                        errno: libc::EAGAIN,
                    }) => {
                        // just drained to empty, so the decoder has room; try
                        // the next read anyway
                        continue;
                    }
                    Err(ffmpeg::Error::Eof) => (),
                    Err(e) => {
                        return Err(e).wrap_err("Decoder error when sending a packet");
                    }
                }
            }
            Ok(()) => continue,
            Err(ffmpeg::Error::Eof) => {
                // flush whatever the decoder still holds
                v.decoder.send_eof().ok();
            }
            Err(e) => {
                return Err(e).wrap_err("Failed to read a packet from the stream");
            }
        }
    }
}

/// A frame that is available without feeding any packet, used by the
/// keyframe-only fast path right after a seek.
pub(crate) fn try_receive(v: &mut OpenVideo) -> Option<FrameVideo> {
    let mut frame = FrameVideo::empty();
    match v.decoder.receive_frame(&mut frame) {
        Ok(()) => Some(frame),
        Err(_) => None,
    }
}
