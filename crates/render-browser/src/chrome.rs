//! Chrome binary discovery and launch flags.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use render_settings::BrowserSettings;

/// Known Chrome binary locations, in search priority order.
const KNOWN_PATHS: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/homebrew/bin/chromium",
    "/usr/local/bin/chromium",
];

/// Flags every automated browser gets.
const AUTOMATION_FLAGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--force-color-profile=srgb",
    "--metrics-recording-only",
    "--password-store=basic",
    "--use-mock-keychain",
    "--enable-automation",
];

/// Flags for rendering a page with sound for capture.
const RENDER_FLAGS: &[&str] = &[
    "--hide-scrollbars",
    "--start-maximized",
    "--autoplay-policy=no-user-gesture-required",
    "--disable-web-security",
];

/// Find a Chrome or Chromium binary on the system.
///
/// Search order:
/// 1. `explicit`, when configured
/// 2. `CHROME_PATH` environment variable
/// 3. Well-known Linux and macOS install paths
///
/// Returns `None` if no valid executable is found.
pub fn find_chrome(explicit: Option<&Path>) -> Option<PathBuf> {
    find_chrome_with(explicit, |key| std::env::var(key).ok())
}

/// [`find_chrome`] with environment access injected.
pub fn find_chrome_with(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured chrome path not executable, falling through");
    }

    if let Some(env_path) = lookup("CHROME_PATH").filter(|p| !p.is_empty()) {
        let path = PathBuf::from(&env_path);
        if is_executable(&path) {
            return Some(path);
        }
        tracing::debug!(path = %env_path, "CHROME_PATH set but not executable, falling through");
    }

    search_paths().into_iter().find(|path| {
        let found = is_executable(path);
        if found {
            tracing::debug!(path = %path.display(), "found Chrome binary");
        }
        found
    })
}

/// The ordered list of well-known paths.
pub fn search_paths() -> Vec<PathBuf> {
    KNOWN_PATHS.iter().map(PathBuf::from).collect()
}

fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// How to launch the browser for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Window width.
    pub width: u32,
    /// Window height.
    pub height: u32,
    /// Run with `--headless=new`.
    pub headless: bool,
    /// Explicit binary.
    pub chrome_path: Option<PathBuf>,
    /// Companion extension directory.
    pub extension_path: Option<PathBuf>,
    /// Whitelisted extension id.
    pub extension_id: Option<String>,
    /// `DISPLAY` for the browser process.
    pub display: Option<String>,
}

impl LaunchOptions {
    /// Headful window of the given size, no extension.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            headless: false,
            chrome_path: None,
            extension_path: None,
            extension_id: None,
            display: None,
        }
    }

    /// Options from the browser section of the settings.
    pub fn from_settings(settings: &BrowserSettings, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            headless: settings.headless,
            chrome_path: settings.chrome_path.as_ref().map(PathBuf::from),
            extension_path: settings.extension_path.as_ref().map(PathBuf::from),
            extension_id: settings.extension_id.clone(),
            display: settings.display.clone(),
        }
    }

    /// Command line for a browser debugging on `port` with a profile in
    /// `user_data_dir`. The initial URL is not included.
    pub fn args(&self, port: u16, user_data_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = AUTOMATION_FLAGS
            .iter()
            .chain(RENDER_FLAGS)
            .map(|flag| (*flag).to_string())
            .collect();

        if self.headless {
            args.push("--headless=new".into());
        }
        if let Some(dir) = &self.extension_path {
            args.push(format!("--load-extension={}", dir.display()));
        }
        if let Some(id) = &self.extension_id {
            args.push(format!("--whitelisted-extension-id={id}"));
        }
        args.push(format!("--window-size={},{}", self.width, self.height));
        args.push(format!("--remote-debugging-port={port}"));
        args.push(format!("--user-data-dir={}", user_data_dir.display()));
        args
    }

    /// Extra environment for the browser process.
    pub fn env(&self) -> Vec<(String, String)> {
        self.display
            .iter()
            .map(|display| ("DISPLAY".to_string(), display.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = executable(dir.path(), "chrome-explicit");
        let from_env = executable(dir.path(), "chrome-env");
        let env = from_env.to_string_lossy().to_string();

        let found = find_chrome_with(Some(&explicit), |_| Some(env.clone()));
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn env_var_used_when_no_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let from_env = executable(dir.path(), "chrome-env");
        let env = from_env.to_string_lossy().to_string();

        let found = find_chrome_with(None, |key| (key == "CHROME_PATH").then(|| env.clone()));
        assert_eq!(found, Some(from_env));
    }

    #[test]
    fn non_executable_candidates_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("not-exec");
        std::fs::write(&plain, "not a binary").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();
        let env = plain.to_string_lossy().to_string();

        let found = find_chrome_with(Some(&plain), |_| Some(env.clone()));
        if let Some(path) = found {
            assert_ne!(path, plain);
        }
    }

    #[test]
    fn search_paths_are_absolute_and_ordered() {
        let paths = search_paths();
        assert_eq!(paths[0], PathBuf::from("/usr/bin/google-chrome-stable"));
        for path in &paths {
            assert!(path.is_absolute(), "path should be absolute: {}", path.display());
        }
    }

    #[test]
    fn is_executable_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_executable(Path::new("/nonexistent/binary")));
        assert!(is_executable(&executable(dir.path(), "run.sh")));
    }

    #[test]
    fn args_include_render_flags() {
        let args = LaunchOptions::new(1280, 720).args(9222, Path::new("/tmp/profile"));
        for flag in [
            "--disable-background-timer-throttling",
            "--autoplay-policy=no-user-gesture-required",
            "--hide-scrollbars",
            "--window-size=1280,720",
            "--remote-debugging-port=9222",
            "--user-data-dir=/tmp/profile",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--load-extension")));
    }

    #[test]
    fn args_load_extension_and_headless() {
        let settings = BrowserSettings {
            extension_path: Some("/opt/render/crx".into()),
            extension_id: Some("efjphpadcohhfnlcfjbdiehlnhkomdck".into()),
            headless: true,
            ..BrowserSettings::default()
        };
        let args = LaunchOptions::from_settings(&settings, 800, 600).args(1, Path::new("/p"));
        assert!(args.contains(&"--load-extension=/opt/render/crx".to_string()));
        assert!(args.contains(&"--whitelisted-extension-id=efjphpadcohhfnlcfjbdiehlnhkomdck".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=800,600".to_string()));
    }

    #[test]
    fn display_exported_when_configured() {
        let mut options = LaunchOptions::new(1, 1);
        assert!(options.env().is_empty());
        options.display = Some(":2".into());
        assert_eq!(options.env(), vec![("DISPLAY".to_string(), ":2".to_string())]);
    }
}
