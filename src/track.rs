use std::path::{Path, PathBuf};

/// The only extension the player accepts. The check is case-insensitive.
pub const AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub path: PathBuf,
    pub name: String,
}

impl Track {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
}

/// Keeps the qualifying files in the order they were selected.
pub fn filter_tracks(paths: &[PathBuf]) -> Vec<Track> {
    paths
        .iter()
        .filter(|p| is_audio_file(p))
        .cloned()
        .map(Track::new)
        .collect()
}

/// Turns a mixed list of files and directories into a flat file list.
/// Directories contribute their direct children, sorted by name.
pub fn expand_selection(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut children = match std::fs::read_dir(path) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect::<Vec<_>>(),
                Err(err) => {
                    log::warn!("cannot list {}: {}", path.display(), err);
                    continue;
                }
            };
            children.sort();
            files.extend(children);
        } else {
            files.push(path.clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_ignores_case() {
        assert!(is_audio_file(Path::new("a/b/Song.MP3")));
        assert!(is_audio_file(Path::new("song.mp3")));
        assert!(!is_audio_file(Path::new("song.wav")));
        assert!(!is_audio_file(Path::new("mp3")));
        assert!(!is_audio_file(Path::new("song.mp3.txt")));
    }

    #[test]
    fn filter_keeps_selection_order() {
        let paths = vec![
            PathBuf::from("b.mp3"),
            PathBuf::from("cover.jpg"),
            PathBuf::from("a.Mp3"),
        ];
        let tracks = filter_tracks(&paths);
        let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["b.mp3", "a.Mp3"]);
    }

    #[test]
    fn display_name_is_file_name() {
        let track = Track::new(PathBuf::from("/music/album/01 - intro.mp3"));
        assert_eq!(track.name, "01 - intro.mp3");
    }

    #[test]
    fn directories_expand_to_sorted_children() {
        let dir = std::env::temp_dir().join(format!("winhrach-expand-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.mp3"), b"").unwrap();
        std::fs::write(dir.join("a.mp3"), b"").unwrap();
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        let files = expand_selection(&[dir.clone()]);
        assert_eq!(files, vec![dir.join("a.mp3"), dir.join("b.mp3")]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
