//! Container/stream metadata extraction, the cheap step before any decoding
//! happens.

extern crate ffmpeg_next as ffmpeg;

use color_eyre::eyre::{self, Context};
use ffmpeg::media::Type;
use ffmpeg_sys_next::{AV_NOPTS_VALUE, AV_TIME_BASE};

use crate::decode;
use crate::video_info::VideoInfo;

/// Fills the stream fields of a scanned skeleton: duration, codec names,
/// dimensions, frame rate, sample rate and container bit rate. A video whose
/// duration cannot be determined keeps `duration == 0`, which later disables
/// all percentage-based seeking for it.
pub fn probe(video: &mut VideoInfo) -> eyre::Result<()> {
    decode::ensure_ffmpeg()?;
    eyre::ensure!(
        video.path.is_file(),
        "not a file: {}",
        video.path.display()
    );

    let ictx = ffmpeg::format::input(&video.path).wrap_err("Failed to open the file")?;

    video.bit_rate = unsafe { (*ictx.as_ptr()).bit_rate };

    let mut stream_duration = None;
    for stream in ictx.streams() {
        let parameters = stream.parameters();
        let codec_name = ffmpeg::decoder::find(parameters.id())
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        match parameters.medium() {
            Type::Video if video.video_codec.is_empty() => {
                video.video_codec = codec_name;
                unsafe {
                    let raw = parameters.as_ptr();
                    video.width = (*raw).width.max(0) as u32;
                    video.height = (*raw).height.max(0) as u32;
                }

                let rate = stream.avg_frame_rate();
                video.avg_frame_rate = if rate.denominator() > 0 {
                    rate.numerator() as f64 / rate.denominator() as f64
                } else {
                    0.0
                };

                if stream.duration() != AV_NOPTS_VALUE {
                    let tb = stream.time_base();
                    stream_duration = Some(
                        (stream.duration() as f64 * tb.numerator() as f64
                            / tb.denominator() as f64) as i64,
                    );
                }
            }
            Type::Audio if video.audio_codec.is_empty() => {
                video.audio_codec = codec_name;
                video.sample_rate = unsafe { (*parameters.as_ptr()).sample_rate };
            }
            _ => (),
        }
    }

    video.duration = match stream_duration {
        Some(duration) => duration,
        None if ictx.duration() != AV_NOPTS_VALUE => {
            ictx.duration() / i64::from(AV_TIME_BASE)
        }
        None => {
            log::warn!(
                "Could not determine the duration of {}",
                video.path.display()
            );
            0
        }
    };

    Ok(())
}
