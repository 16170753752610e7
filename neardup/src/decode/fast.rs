//! Sparse sampler: exactly one frame at 30% and one at 70% of the duration.
//! Either both hashes come out or the whole video is given up on, so that
//! every fast-mode video is compared on the same footing.

use color_eyre::eyre::{self, Context};
use neardup_common::bin_common::termination::Cookie;
use neardup_common::hashing::hamming::Hamming;

use super::{
    decode_until, hash_frame, open, sec_to_pts, seek_any, seek_backward, try_receive,
    FrameConverter,
};
use crate::settings::SearchSettings;
use crate::video_info::VideoInfo;

const TARGETS: [f64; 2] = [0.30, 0.70];

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
    // No duration means no percentage targets to seek to.
    eyre::ensure!(
        video.duration > 0,
        "unknown duration: {}",
        video.path.display()
    );

    let mut v = open(&video.path).wrap_err("Failed to open for decoding")?;
    let mut converter = FrameConverter::new_gray();
    let mut hashes = Vec::with_capacity(TARGETS.len());

    for pct in TARGETS {
        if cookie.is_terminating() {
            return Ok(Vec::new());
        }

        let target = sec_to_pts(pct * video.duration as f64, v.time_base);

        if settings.use_keyframes_only {
            seek_any(&mut v, target)
        } else {
            seek_backward(&mut v, target)
        }
        .wrap_err_with(|| format!("Failed to seek to {:.0}%", pct * 100.0))?;

        // A backward seek lands on the keyframe before the target, so decode
        // forward to the exact spot for hashes that do not depend on keyframe
        // placement. In keyframe-only mode whatever the seek produced is good
        // enough; the first decoded frame is the fallback.
        let frame = if settings.use_keyframes_only {
            match try_receive(&mut v) {
                Some(frame) => Some(frame),
                None => decode_until(&mut v, i64::MIN, cookie)?,
            }
        } else {
            decode_until(&mut v, target, cookie)?
        };

        let frame = frame.ok_or_else(|| {
            eyre::eyre!("No frame came out at {:.0}%", pct * 100.0)
        })?;
        let hash = hash_frame(&mut converter, &frame).ok_or_else(|| {
            eyre::eyre!("Hashing the frame at {:.0}% failed", pct * 100.0)
        })?;
        hashes.push(hash);
    }

    Ok(hashes)
}
