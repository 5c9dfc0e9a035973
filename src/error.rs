use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    NoQualifyingFiles,
    Unreadable(PathBuf, String),
    NoAudioTrack(PathBuf),
    DeviceNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoQualifyingFiles => write!(f, "No MP3 files among the selected files."),
            Error::Unreadable(path, reason) => {
                write!(f, "Cannot read {}: {}", path.display(), reason)
            }
            Error::NoAudioTrack(path) => {
                write!(f, "No supported audio tracks found in {}", path.display())
            }
            Error::DeviceNotFound(name) => write!(f, "Output device not found: {}", name),
        }
    }
}

impl std::error::Error for Error {}
