//! Command-line augmentation for Chromium-family browsers.
//!
//! The rewrite happens once, at layer initialisation, and only for the
//! top-level browser process: helpers spawned by the browser carry a
//! `--type=` switch and keep their real command line.

use crate::platform::{CommandLineApi, Platform};
use mirage_config::{keys, PolicyStore};
use std::borrow::Cow;

/// Present in every Chromium child-process command line.
pub const CHILD_PROCESS_MARKER: &str = " --type=";

/// Executables (without `.exe`) treated as Chromium browsers.
const CHROMIUM_IMAGES: &[&str] = &["chrome", "msedge", "brave", "vivaldi", "opera", "chromium"];

const SPACE: u16 = b' ' as u16;
const TAB: u16 = b'\t' as u16;
const QUOTE: u16 = b'"' as u16;

/// Extra capacity reserved beyond the original line and the configured flags.
const SLACK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    Chromium,
    Other,
}

impl ImageFamily {
    /// Classify a process by the file name of its executable path.
    pub fn detect(image_path: &str) -> Self {
        let file = image_path
            .trim_matches('"')
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or_default();
        let lower = file.to_ascii_lowercase();
        let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
        if CHROMIUM_IMAGES.contains(&stem) {
            ImageFamily::Chromium
        } else {
            ImageFamily::Other
        }
    }
}

fn is_blank(c: u16) -> bool {
    c == SPACE || c == TAB
}

/// Index of the whitespace that ends argument 0, honouring quotes.
/// `None` when the command line has no further arguments.
pub fn find_argument_end(cmdline: &[u16]) -> Option<usize> {
    let start = cmdline.iter().position(|&c| !is_blank(c))?;
    let mut quoted = false;
    for (i, &c) in cmdline.iter().enumerate().skip(start) {
        if c == QUOTE {
            quoted = !quoted;
        } else if !quoted && is_blank(c) {
            return Some(i);
        }
    }
    None
}

/// Argument 0 with surrounding blanks and quotes removed.
pub fn argument0(cmdline: &[u16]) -> String {
    let end = find_argument_end(cmdline).unwrap_or(cmdline.len());
    String::from_utf16_lossy(&cmdline[..end])
        .trim()
        .replace('"', "")
}

pub fn contains_marker(cmdline: &[u16], marker: &str) -> bool {
    let needle: Vec<u16> = marker.encode_utf16().collect();
    !needle.is_empty() && cmdline.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Splice `extra` between argument 0 and the remaining arguments.
pub fn rewrite(cmdline: &[u16], extra: &[u16]) -> Vec<u16> {
    let end = find_argument_end(cmdline).unwrap_or(cmdline.len());
    let (program, arguments) = cmdline.split_at(end);

    let mut out = Vec::with_capacity(cmdline.len() + extra.len() + SLACK);
    out.extend_from_slice(program);
    if out.last() != Some(&SPACE) {
        out.push(SPACE);
    }
    out.extend_from_slice(extra);
    out.extend_from_slice(arguments);
    out
}

/// The rewritten command line, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineOverride {
    wide: Vec<u16>,
    narrow: Vec<u8>,
}

impl CommandLineOverride {
    /// Compute the override for the current process, or `None` when the
    /// process is not a top-level Chromium browser or no flags are configured.
    pub fn build(platform: &dyn Platform, policy: &dyn PolicyStore) -> Option<Self> {
        let flags = policy.query_text(keys::CUSTOM_CHROMIUM_FLAGS, keys::CONF_LINE_LEN)?;
        let wide = Self::rewrite_line(&platform.command_line_wide(), &flags)?;
        let narrow = platform.encode_narrow(&wide);
        Some(Self { wide, narrow })
    }

    /// Same decision for an arbitrary command line, with UTF-8 as the narrow
    /// encoding.
    pub fn for_command_line(cmdline: &str, flags: &str) -> Option<Self> {
        let real: Vec<u16> = cmdline.encode_utf16().collect();
        let wide = Self::rewrite_line(&real, flags)?;
        let narrow = String::from_utf16_lossy(&wide).into_bytes();
        Some(Self { wide, narrow })
    }

    fn rewrite_line(real: &[u16], flags: &str) -> Option<Vec<u16>> {
        if ImageFamily::detect(&argument0(real)) != ImageFamily::Chromium {
            return None;
        }
        if contains_marker(real, CHILD_PROCESS_MARKER) {
            mirage_config::log_layer_debug!("child browser process, command line kept");
            return None;
        }
        let flags = flags.trim();
        if flags.is_empty() {
            return None;
        }
        let extra: Vec<u16> = flags.encode_utf16().collect();
        Some(rewrite(real, &extra))
    }

    pub fn wide(&self) -> &[u16] {
        &self.wide
    }

    pub fn narrow(&self) -> &[u8] {
        &self.narrow
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.wide)
    }
}

impl CommandLineApi for CommandLineOverride {
    fn command_line_wide(&self) -> Cow<'_, [u16]> {
        Cow::Borrowed(&self.wide)
    }

    fn command_line_narrow(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.narrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use mirage_config::testing::TestPolicy;

    fn w(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_find_argument_end() {
        assert_eq!(find_argument_end(&w(r#""C:\app.exe" --flag1"#)), Some(12));
        assert_eq!(find_argument_end(&w(r"C:\app.exe --flag1")), Some(10));
        assert_eq!(find_argument_end(&w(r#""C:\Program Files\app.exe""#)), None);
        assert_eq!(find_argument_end(&w("  app.exe\t-x")), Some(9));
        assert_eq!(find_argument_end(&w("")), None);
    }

    #[test]
    fn test_rewrite_inserts_single_space() {
        let out = rewrite(&w(r#""C:\app.exe" --flag1"#), &w("--extra"));
        assert_eq!(String::from_utf16_lossy(&out), r#""C:\app.exe" --extra --flag1"#);
    }

    #[test]
    fn test_rewrite_without_arguments() {
        let out = rewrite(&w(r#""C:\Program Files\app.exe""#), &w("--a --b"));
        assert_eq!(
            String::from_utf16_lossy(&out),
            r#""C:\Program Files\app.exe" --a --b"#
        );
    }

    #[test]
    fn test_rewrite_preserves_argument_spacing() {
        let out = rewrite(&w("app.exe   x  y"), &w("--z"));
        assert_eq!(String::from_utf16_lossy(&out), "app.exe --z   x  y");
    }

    #[test]
    fn test_detect_family() {
        assert_eq!(
            ImageFamily::detect(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            ImageFamily::Chromium
        );
        assert_eq!(ImageFamily::detect(r#""C:\x\MSEDGE.EXE""#), ImageFamily::Chromium);
        assert_eq!(ImageFamily::detect("/usr/bin/chromium"), ImageFamily::Chromium);
        assert_eq!(ImageFamily::detect(r"C:\x\notepad.exe"), ImageFamily::Other);
        assert_eq!(ImageFamily::detect(r"C:\x\chrome_proxy.exe"), ImageFamily::Other);
    }

    #[test]
    fn test_argument0_strips_quotes() {
        assert_eq!(argument0(&w(r#""C:\a b\chrome.exe" --x"#)), r"C:\a b\chrome.exe");
    }

    #[test]
    fn test_build_for_top_level_browser() {
        let platform = FakePlatform::new().with_command_line(r#""C:\chrome.exe" --flag1"#);
        let policy = TestPolicy::new()
            .text(keys::CUSTOM_CHROMIUM_FLAGS, "--extra")
            .build();
        let cmd = CommandLineOverride::build(&platform, &policy).unwrap();
        assert_eq!(cmd.to_string_lossy(), r#""C:\chrome.exe" --extra --flag1"#);
        assert_eq!(cmd.narrow(), br#""C:\chrome.exe" --extra --flag1"#);
    }

    #[test]
    fn test_build_skips_child_processes() {
        let platform =
            FakePlatform::new().with_command_line(r#""C:\chrome.exe" --type=renderer --x"#);
        let policy = TestPolicy::new()
            .text(keys::CUSTOM_CHROMIUM_FLAGS, "--extra")
            .build();
        assert!(CommandLineOverride::build(&platform, &policy).is_none());
    }

    #[test]
    fn test_build_requires_flags_and_family() {
        let chrome = FakePlatform::new().with_command_line(r#""C:\chrome.exe""#);
        assert!(CommandLineOverride::build(&chrome, &TestPolicy::new().build()).is_none());

        let other = FakePlatform::new().with_command_line(r#""C:\app.exe" --flag1"#);
        let policy = TestPolicy::new()
            .text(keys::CUSTOM_CHROMIUM_FLAGS, "--extra")
            .build();
        assert!(CommandLineOverride::build(&other, &policy).is_none());
    }

    #[test]
    fn test_for_command_line_preview() {
        let cmd = CommandLineOverride::for_command_line("brave.exe --a", "  --b  ").unwrap();
        assert_eq!(cmd.to_string_lossy(), "brave.exe --b --a");
        assert!(CommandLineOverride::for_command_line("brave.exe --a", "   ").is_none());
    }
}
