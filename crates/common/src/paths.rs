//! Path derivation for the launcher's executable, archive and manifest.
//!
//! Everything here works on plain strings and accepts both `\` and `/` as
//! separators, so Windows-style paths behave the same on every host.

use crate::{ARCHIVE_EXTENSION, MANIFEST_SUFFIX};

const SEPARATORS: [char; 2] = ['\\', '/'];

/// Final path component: everything after the last `\` or `/`.
///
/// Returns the input unchanged when it has no separator.
pub fn basename(path: &str) -> &str {
    match path.rfind(SEPARATORS) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Directory portion of the executable path, trailing separator included.
///
/// Without any separator the result degenerates to at most the first two
/// characters, which keeps a drive designator such as `C:` intact.
pub fn home_dir(self_path: &str) -> String {
    match self_path.rfind(SEPARATORS) {
        Some(idx) => self_path[..=idx].to_string(),
        None => match self_path.char_indices().nth(2) {
            Some((idx, _)) => self_path[..idx].to_string(),
            None => self_path.to_string(),
        },
    }
}

/// Companion archive path: the last three characters swapped for `pkg`.
///
/// Callers pass an executable path ending in a three character extension
/// (`tool.exe` becomes `tool.pkg`). Anything shorter gets `.pkg` appended.
pub fn archive_path(self_path: &str) -> String {
    match self_path.char_indices().rev().nth(2) {
        Some((idx, _)) => format!("{}{}", &self_path[..idx], ARCHIVE_EXTENSION),
        None => appended_archive_path(self_path),
    }
}

/// Companion archive path for extension-less executables: `<self_path>.pkg`.
pub fn appended_archive_path(self_path: &str) -> String {
    format!("{self_path}.{ARCHIVE_EXTENSION}")
}

/// Manifest location: `<work_dir><basename(self_path)>.manifest`.
///
/// `work_dir` is used as given, so it should already end with a separator
/// (as [`home_dir`] guarantees).
pub fn manifest_path(work_dir: &str, self_path: &str) -> String {
    format!("{work_dir}{}{MANIFEST_SUFFIX}", basename(self_path))
}

/// How the archive name is derived from the executable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveNaming {
    /// `tool.exe` -> `tool.pkg`
    ReplaceExtension,
    /// `tool` -> `tool.pkg`
    Append,
}

impl ArchiveNaming {
    /// Naming used by executables built for the current platform.
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::ReplaceExtension
        } else {
            Self::Append
        }
    }

    pub fn derive(self, self_path: &str) -> String {
        match self {
            Self::ReplaceExtension => archive_path(self_path),
            Self::Append => appended_archive_path(self_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basename_either_separator() {
        assert_eq!(basename("C:\\apps\\tool.exe"), "tool.exe");
        assert_eq!(basename("/opt/apps/tool"), "tool");
        assert_eq!(basename("C:\\apps/mixed\\tool.exe"), "tool.exe");
        assert_eq!(basename("C:/apps\\tool.exe"), "tool.exe");
        assert_eq!(basename("tool.exe"), "tool.exe");
        assert_eq!(basename("dir\\"), "");
    }

    #[test]
    fn test_home_dir() {
        assert_eq!(home_dir("C:\\apps\\tool.exe"), "C:\\apps\\");
        assert_eq!(home_dir("/usr/local/bin/tool"), "/usr/local/bin/");
        assert_eq!(home_dir("/tool"), "/");
    }

    #[test]
    fn test_home_dir_degenerate_inputs() {
        assert_eq!(home_dir("C:tool.exe"), "C:");
        assert_eq!(home_dir("ab"), "ab");
        assert_eq!(home_dir("a"), "a");
        assert_eq!(home_dir(""), "");
    }

    #[test]
    fn test_archive_path_replaces_extension() {
        assert_eq!(archive_path("C:\\apps\\tool.exe"), "C:\\apps\\tool.pkg");
        assert_eq!(archive_path("C:\\apps\\TOOL.EXE"), "C:\\apps\\TOOL.pkg");
        assert_eq!(archive_path("ab"), "ab.pkg");
    }

    #[test]
    fn test_archive_path_is_char_boundary_safe() {
        assert_eq!(archive_path("C:\\äpps\\tööl.exé"), "C:\\äpps\\tööl.pkg");
    }

    #[test]
    fn test_archive_naming() {
        assert_eq!(
            ArchiveNaming::ReplaceExtension.derive("C:\\apps\\tool.exe"),
            "C:\\apps\\tool.pkg"
        );
        assert_eq!(
            ArchiveNaming::Append.derive("/opt/apps/tool"),
            "/opt/apps/tool.pkg"
        );
        #[cfg(windows)]
        assert_eq!(ArchiveNaming::native(), ArchiveNaming::ReplaceExtension);
        #[cfg(not(windows))]
        assert_eq!(ArchiveNaming::native(), ArchiveNaming::Append);
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            manifest_path("C:\\apps\\", "C:\\apps\\tool.exe"),
            "C:\\apps\\tool.exe.manifest"
        );
        assert_eq!(
            manifest_path("/tmp/_work/", "/opt/apps/tool"),
            "/tmp/_work/tool.manifest"
        );
    }

    proptest! {
        #[test]
        fn prop_basename_is_suffix_after_last_separator(
            dirs in proptest::collection::vec("[a-zA-Z0-9 ._-]{0,8}", 1..5),
            seps in proptest::collection::vec(prop_oneof![Just('\\'), Just('/')], 4),
            name in "[a-zA-Z0-9._-]{0,12}",
        ) {
            let mut path = String::new();
            for (i, dir) in dirs.iter().enumerate() {
                path.push_str(dir);
                path.push(seps[i % seps.len()]);
            }
            path.push_str(&name);

            prop_assert_eq!(basename(&path), name.as_str());
        }

        #[test]
        fn prop_basename_without_separator_is_identity(name in "[a-zA-Z0-9 ._:-]{0,16}") {
            prop_assert_eq!(basename(&name), name.as_str());
        }

        #[test]
        fn prop_home_dir_and_basename_rebuild_path(
            dir in "[a-zA-Z0-9]{1,8}",
            name in "[a-zA-Z0-9._-]{0,12}",
        ) {
            let path = format!("C:\\{dir}\\{name}");
            prop_assert_eq!(format!("{}{}", home_dir(&path), basename(&path)), path);
        }
    }
}
