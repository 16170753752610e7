//! Dense sampler: one frame per second of stream time, skipping a
//! configurable fraction of the head and tail.

extern crate ffmpeg_next as ffmpeg;

use color_eyre::eyre::{self, Context};
use ffmpeg::decoder::Video as DecoderVideo;
use ffmpeg::frame::Video as FrameVideo;
use ffmpeg::Packet;
use neardup_common::bin_common::termination::Cookie;
use neardup_common::hashing::hamming::Hamming;

use super::{
    frame_pts, hash_frame, open, sample_due, sec_to_pts, seek_backward, FrameConverter,
};
use crate::settings::SearchSettings;
use crate::video_info::VideoInfo;

const SAMPLE_PERIOD_SECS: f64 = 1.0;
const MAX_SKIP: f64 = 0.40;

// Skipping into tiny files costs more than it saves.
const SMALL_FILE_SECS: i64 = 20;
const SMALL_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// When to sample and when to stop.
struct SampleGate {
    next_pts: i64,
    step_pts: i64,
    end_pts: i64,
    max_hashes: usize,
}

enum Drained {
    NeedInput,
    EndOfStream,
    Stop,
}

pub fn decode_and_hash(
    video: &VideoInfo,
    settings: &SearchSettings,
    cookie: &Cookie,
) -> eyre::Result<Vec<Hamming>> {
    eyre::ensure!(
        video.path.is_file(),
        "not a file: {}",
        video.path.display()
    );

    let mut v = open(&video.path).wrap_err("Failed to open for decoding")?;
    let step_pts = sec_to_pts(SAMPLE_PERIOD_SECS, v.time_base).max(1);

    let mut skip = (settings.skip_percent as f64 / 100.0).clamp(0.0, MAX_SKIP);
    if (video.duration > 0 && video.duration < SMALL_FILE_SECS)
        || video.size < SMALL_FILE_BYTES
    {
        log::debug!(
            "Small file, head/tail skip disabled: {}",
            video.path.display()
        );
        skip = 0.0;
    }

    let mut gate = SampleGate {
        next_pts: 0,
        step_pts,
        end_pts: i64::MAX,
        max_hashes: settings.max_frames as usize,
    };

    if video.duration > 0 && skip > 0.0 {
        let target = sec_to_pts(skip * video.duration as f64, v.time_base);
        match seek_backward(&mut v, target) {
            Ok(()) => {
                gate.next_pts = target;
                gate.end_pts =
                    sec_to_pts((1.0 - skip) * video.duration as f64, v.time_base);
                log::debug!("Skipped ahead to {:.1}%", skip * 100.0);
            }
            Err(e) => {
                log::warn!(
                    "Seek failed, decoding {} from the start: {e:#}",
                    video.path.display()
                );
            }
        }
    }

    let mut converter = FrameConverter::new_gray();
    let mut frame = FrameVideo::empty();
    let mut hashes = Vec::new();

    let mut state = Drained::NeedInput;
    while matches!(state, Drained::NeedInput) {
        if cookie.is_terminating() {
            return Ok(hashes);
        }

        let mut packet = Packet::empty();
        match packet.read(&mut v.ictx) {
            Ok(()) if packet.stream() == v.stream_index => loop {
                match v.decoder.send_packet(&packet) {
                    Ok(()) => {
                        state = drain_ready_frames(
                            &mut v.decoder,
                            &mut converter,
                            &mut frame,
                            &mut gate,
                            &mut hashes,
                            cookie,
                        )?;
                        break;
                    }
                    Err(ffmpeg::Error::Other {
                        errno: libc::EAGAIN,
                    }) => {
                        // decoder is full: drain, then resend this packet
                        state = drain_ready_frames(
                            &mut v.decoder,
                            &mut converter,
                            &mut frame,
                            &mut gate,
                            &mut hashes,
                            cookie,
                        )?;
                        if !matches!(state, Drained::NeedInput) {
                            break;
                        }
                    }
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => {
                        return Err(e).wrap_err("Decoder error when sending a packet");
                    }
                }
            },
            Ok(()) => (), // not the video stream
            Err(ffmpeg::Error::Eof) => {
                // out of packets; a null packet flushes the remaining frames
                v.decoder.send_eof().ok();
                state = drain_ready_frames(
                    &mut v.decoder,
                    &mut converter,
                    &mut frame,
                    &mut gate,
                    &mut hashes,
                    cookie,
                )?;
                if matches!(state, Drained::NeedInput) {
                    state = Drained::EndOfStream;
                }
            }
            Err(e) => {
                return Err(e).wrap_err("Failed to read a packet from the stream");
            }
        }
    }

    log::info!(
        "Got {} hashes from: {}",
        hashes.len(),
        video.path.display()
    );
    Ok(hashes)
}

/// Pulls every frame the decoder has ready, hashing the ones whose PTS
/// crossed the sampling schedule.
fn drain_ready_frames(
    decoder: &mut DecoderVideo,
    converter: &mut FrameConverter,
    frame: &mut FrameVideo,
    gate: &mut SampleGate,
    hashes: &mut Vec<Hamming>,
    cookie: &Cookie,
) -> eyre::Result<Drained> {
    loop {
        if cookie.is_terminating() {
            return Ok(Drained::Stop);
        }

        match decoder.receive_frame(frame) {
            Ok(()) => {
                let pts = frame_pts(frame);
                if pts.is_some_and(|pts| pts >= gate.end_pts) {
                    return Ok(Drained::Stop);
                }

                if sample_due(pts, gate.next_pts) {
                    if let Some(hash) = hash_frame(converter, frame) {
                        hashes.push(hash);
                    }
                    gate.next_pts += gate.step_pts;

                    if hashes.len() >= gate.max_hashes {
                        return Ok(Drained::Stop);
                    }
                }
            }
            Err(ffmpeg::Error::Other {
                errno: libc::EAGAIN,
            }) => return Ok(Drained::NeedInput),
            Err(ffmpeg::Error::Eof) => return Ok(Drained::EndOfStream),
            Err(e) => return Err(e).wrap_err("Decoder error when receiving a frame"),
        }
    }
}
