//! `ffprobe` / `ffmpeg` subprocess backend for [`FrameExtractor`].

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use super::video::{CropRect, FrameExtractor, PacketTimestamp, VideoInfo};
use crate::config::VideoConfig;
use crate::error::{LoaderError, Result};

#[derive(Debug, Deserialize)]
struct StreamsReport {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    width: Option<u32>,
    height: Option<u32>,
    time_base: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FramesReport {
    #[serde(default)]
    frames: Vec<FrameEntry>,
}

// Older ffprobe builds report pkt_pts, newer ones only pts.
#[derive(Debug, Deserialize)]
struct FrameEntry {
    pkt_pts: Option<i64>,
    pts: Option<i64>,
    pkt_dts: Option<i64>,
}

pub struct FfmpegExtractor {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegExtractor {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }

    fn run(&self, program: &str, args: &[&str], path: &Path) -> Result<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| LoaderError::Collaborator(format!("failed to execute {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(LoaderError::Collaborator(format!(
                "{} failed on {}: {}",
                program,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let stdout = self.run(
            &self.ffprobe_path,
            &["-v", "error", "-select_streams", "v:0", "-print_format", "json", "-show_streams"],
            path,
        )?;
        parse_streams_report(&stdout)
    }

    fn packet_timestamps(&self, path: &Path) -> Result<Vec<PacketTimestamp>> {
        let stdout = self.run(
            &self.ffprobe_path,
            &["-v", "error", "-select_streams", "v:0", "-print_format", "json", "-show_frames"],
            path,
        )?;
        parse_frames_report(&stdout)
    }

    fn extract(&self, path: &Path, start: usize, count: usize, crop: Option<CropRect>) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let filter = select_filter(start, count, crop);
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-hide_banner", "-i"])
            .arg(path)
            .args(["-vf", filter.as_str(), "-vsync", "0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .output()
            .map_err(|e| {
                LoaderError::Collaborator(format!("failed to execute {}: {}", self.ffmpeg_path, e))
            })?;

        if !output.status.success() {
            return Err(LoaderError::Collaborator(format!(
                "ffmpeg frame extraction failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        log::debug!(
            "decoded frames [{}, {}) of {} ({} bytes)",
            start,
            start + count,
            path.display(),
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}

fn select_filter(start: usize, count: usize, crop: Option<CropRect>) -> String {
    let mut filter = format!("select=between(n\\,{}\\,{})", start, start + count - 1);
    if let Some(crop) = crop {
        filter.push_str(&format!(",crop={}:{}:{}:{}", crop.w, crop.h, crop.x, crop.y));
    }
    filter
}

fn parse_time_base(raw: &str) -> Result<(i64, i64)> {
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| LoaderError::Parse(format!("invalid time base '{}'", raw)))
    };
    match raw.split_once('/') {
        Some((num, den)) => Ok((parse(num)?, parse(den)?)),
        None => Ok((parse(raw)?, 1)),
    }
}

fn parse_streams_report(json: &[u8]) -> Result<VideoInfo> {
    let report: StreamsReport = serde_json::from_slice(json)?;
    let stream = report
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| LoaderError::Collaborator("no video stream found".into()))?;

    let rotation = match stream.tags.get("rotate") {
        Some(tag) => tag
            .trim()
            .parse()
            .map_err(|_| LoaderError::Parse(format!("invalid rotate tag '{}'", tag)))?,
        None => stream
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .unwrap_or(0),
    };

    Ok(VideoInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        rotation,
        time_base: parse_time_base(stream.time_base.as_deref().unwrap_or("1/1"))?,
    })
}

fn parse_frames_report(json: &[u8]) -> Result<Vec<PacketTimestamp>> {
    let report: FramesReport = serde_json::from_slice(json)?;
    Ok(report
        .frames
        .into_iter()
        .map(|frame| PacketTimestamp {
            pts: frame.pkt_pts.or(frame.pts),
            dts: frame.pkt_dts,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_streams_report() {
        let json = br#"{"streams":[{"index":0,"codec_name":"mjpeg","width":640,"height":480,
            "time_base":"1/30","tags":{"rotate":"270"}}]}"#;
        let info = parse_streams_report(json).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.time_base, (1, 30));
        assert_eq!(info.oriented_size(), (480, 640));
    }

    #[test]
    fn test_rotation_from_side_data() {
        let json = br#"{"streams":[{"width":1920,"height":1080,"time_base":"1/90000",
            "side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}]}"#;
        let info = parse_streams_report(json).unwrap();
        assert_eq!(info.normalized_rotation(), 270);
    }

    #[test]
    fn test_missing_stream() {
        assert!(matches!(
            parse_streams_report(br#"{"streams":[]}"#),
            Err(LoaderError::Collaborator(_))
        ));
    }

    #[test]
    fn test_parse_frames_report() {
        let json = br#"{"frames":[{"pkt_pts":0,"pkt_dts":0},{"pts":512},{"pkt_dts":1024},{}]}"#;
        let packets = parse_frames_report(json).unwrap();
        assert_eq!(packets[0], PacketTimestamp { pts: Some(0), dts: Some(0) });
        assert_eq!(packets[1].pts, Some(512));
        assert_eq!(packets[2], PacketTimestamp { pts: None, dts: Some(1024) });
        assert_eq!(packets[3], PacketTimestamp::default());
    }

    #[test]
    fn test_select_filter() {
        assert_eq!(select_filter(100, 50, None), "select=between(n\\,100\\,149)");
        let crop = CropRect { x: 10, y: 20, w: 64, h: 48 };
        assert_eq!(
            select_filter(0, 1, Some(crop)),
            "select=between(n\\,0\\,0),crop=64:48:10:20"
        );
    }
}
