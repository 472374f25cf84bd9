//! Video and audio transcoding through ffmpeg.

use std::path::PathBuf;

use async_trait::async_trait;
use kernel::Category;

use super::{ensure_output, output_path, ConvertRequest, Strategy};
use crate::error::ConvertError;
use crate::process::Tool;

/// Input side options: ffmpeg may only open local files and only through
/// the demuxers of the admitted audio and video types, so playlists and
/// concat lists inside an upload cannot pull in anything else.
const INPUT_ARGS: &[&str] = &[
    "-y",
    "-hide_banner",
    "-nostdin",
    "-loglevel",
    "error",
    "-protocol_whitelist",
    "file",
    "-format_whitelist",
    "mov,mp4,m4a,avi,matroska,webm,gif,mp3,wav,flac,ogg,aac",
];

/// Encoder settings for one output format.
#[derive(Debug)]
struct Profile {
    target: &'static str,
    muxer: &'static str,
    codec_args: &'static [&'static str],
}

const VIDEO_PROFILES: &[Profile] = &[
    Profile {
        target: "mp4",
        muxer: "mp4",
        codec_args: &[
            "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-movflags", "+faststart",
        ],
    },
    Profile {
        target: "mov",
        muxer: "mov",
        codec_args: &["-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac"],
    },
    Profile {
        target: "avi",
        muxer: "avi",
        codec_args: &["-c:v", "mpeg4", "-q:v", "5", "-c:a", "libmp3lame"],
    },
    Profile {
        target: "mkv",
        muxer: "matroska",
        codec_args: &["-c:v", "libx264", "-c:a", "aac"],
    },
    Profile {
        target: "webm",
        muxer: "webm",
        codec_args: &[
            "-c:v", "libvpx-vp9", "-b:v", "0", "-crf", "33", "-c:a", "libopus",
        ],
    },
];

const AUDIO_PROFILES: &[Profile] = &[
    Profile {
        target: "mp3",
        muxer: "mp3",
        codec_args: &["-vn", "-c:a", "libmp3lame", "-q:a", "2"],
    },
    Profile {
        target: "wav",
        muxer: "wav",
        codec_args: &["-vn", "-c:a", "pcm_s16le"],
    },
];

/// One ffmpeg backed family; ffmpeg probes its own input so the detected
/// type only matters for admission.
pub struct MediaStrategy {
    category: Category,
    profiles: &'static [Profile],
    ffmpeg: Tool,
}

impl MediaStrategy {
    #[must_use]
    pub fn video(ffmpeg: Tool) -> Self {
        Self {
            category: Category::Video,
            profiles: VIDEO_PROFILES,
            ffmpeg,
        }
    }

    #[must_use]
    pub fn audio(ffmpeg: Tool) -> Self {
        Self {
            category: Category::Audio,
            profiles: AUDIO_PROFILES,
            ffmpeg,
        }
    }
}

#[async_trait]
impl Strategy for MediaStrategy {
    fn name(&self) -> &'static str {
        match self.category {
            Category::Audio => "audio",
            _ => "video",
        }
    }

    fn category(&self) -> Category {
        self.category
    }

    fn targets(&self) -> Vec<&'static str> {
        self.profiles.iter().map(|p| p.target).collect()
    }

    async fn convert(&self, request: &ConvertRequest<'_>) -> Result<PathBuf, ConvertError> {
        let Some(profile) = self.profiles.iter().find(|p| p.target == request.target) else {
            return Err(ConvertError::UnsupportedFormat {
                category: self.category,
                target: request.target.to_owned(),
            });
        };

        let output = output_path(request.scratch.path(), profile.target);
        self.ffmpeg
            .invoke()
            .args(INPUT_ARGS)
            .arg("-i")
            .path_arg(request.input)
            .args(profile.codec_args)
            .args(["-f", profile.muxer])
            .path_arg(&output)
            .redact(request.scratch.path())
            .run()
            .await
            .map_err(|e| ConvertError::failed(self.category, e))?;

        ensure_output(self.category, &output).await?;
        Ok(output)
    }
}
