//! JPEG thumbnails for the UI layer, sampled at evenly spaced points of the
//! video. Failures here never hold up the pipeline; a video simply ends up
//! without thumbnails.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{self, Context};
use image::{imageops::FilterType, RgbImage};
use neardup_common::bin_common::termination::Cookie;
use neardup_common::utils::fsutils::path_as_filename;

use crate::decode;
use crate::video_info::VideoInfo;

const THUMB_WIDTH: u32 = 320;

pub fn generate_thumbnails(
    video: &VideoInfo,
    count: u32,
    out_dir: &Path,
    cookie: &Cookie,
) -> eyre::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .wrap_err_with(|| format!("failed to create {}", out_dir.display()))?;

    let mut v = decode::open(&video.path).wrap_err("Failed to open for decoding")?;
    let mut converter = decode::FrameConverter::new_rgb();

    // Without a duration there is nothing to space evenly; settle for the
    // first decodable frame.
    let targets: Vec<f64> = if video.duration > 0 {
        (1..=count).map(|i| i as f64 / (count + 1) as f64).collect()
    } else {
        vec![0.0]
    };

    let stem = path_as_filename(&video.path);
    let mut paths = Vec::new();

    for (index, pct) in targets.iter().enumerate() {
        if cookie.is_terminating() {
            break;
        }

        let target = decode::sec_to_pts(pct * video.duration as f64, v.time_base);
        if video.duration > 0 {
            if let Err(e) = decode::seek_backward(&mut v, target) {
                log::warn!(
                    "Thumbnail seek failed for {}: {e:#}",
                    video.path.display()
                );
                continue;
            }
        }

        let Some(frame) = decode::decode_until(&mut v, target, cookie)? else {
            continue;
        };

        let (rgb, width, height) = converter.convert(&frame)?;
        let img = RgbImage::from_vec(width as u32, height as u32, rgb)
            .ok_or(eyre::eyre!("the frame buffer has the wrong size"))?;
        let img = shrink_to_width(img, THUMB_WIDTH);

        let file = out_dir.join(format!("{stem}_{index}.jpg"));
        img.save(&file)
            .wrap_err_with(|| format!("failed to write {}", file.display()))?;
        paths.push(file);
    }

    Ok(paths)
}

fn shrink_to_width(img: RgbImage, width: u32) -> RgbImage {
    if img.width() <= width || img.width() == 0 {
        return img;
    }
    let height = (img.height() * width / img.width()).max(1);
    image::imageops::resize(&img, width, height, FilterType::Triangle)
}
