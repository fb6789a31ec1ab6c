use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::canvas::CanvasSize;
use crate::compositor::DEFAULT_WHITE_TOLERANCE;

/// Engine tunables, read from a `key = value` file.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub max_history: usize,
    pub history_debounce_ms: u64,
    /// Texture pushes allowed per second while a stroke is in progress.
    pub max_updates_per_sec: u32,
    pub hit_tolerance_px: f32,
    pub placeholder_white_tolerance: u8,
    pub selection_border_color: [u8; 4],
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            canvas_width: 2048,
            canvas_height: 2048,
            max_history: 50,
            history_debounce_ms: 300,
            max_updates_per_sec: 30,
            hit_tolerance_px: 2.0,
            placeholder_white_tolerance: DEFAULT_WHITE_TOLERANCE,
            selection_border_color: [0, 160, 255, 255],
        }
    }
}

impl EngineSettings {
    pub fn canvas_size(&self) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height)
    }

    pub fn history_debounce(&self) -> Duration {
        Duration::from_millis(self.history_debounce_ms)
    }

    /// Per-user settings file.
    /// On Linux:   ~/.config/garmentfe/garmentfe.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\GarmentFE\garmentfe.cfg
    /// On macOS:   ~/Library/Application Support/GarmentFE/garmentfe.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            return Some(config_dir.join("garmentfe").join("garmentfe.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("GarmentFE").join("garmentfe.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("GarmentFE")
                    .join("garmentfe.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("garmentfe.cfg")))
        }
    }

    /// Load the per-user file, falling back to defaults.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Load from `path`. A missing or unreadable file gives the defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("could not read settings {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Parse `key = value` lines. Unknown keys are ignored; bad values keep
    /// the default and log a warning.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "canvas_width" => set(&mut s.canvas_width, val),
                "canvas_height" => set(&mut s.canvas_height, val),
                "max_history" => set(&mut s.max_history, val),
                "history_debounce_ms" => set(&mut s.history_debounce_ms, val),
                "max_updates_per_sec" => set(&mut s.max_updates_per_sec, val),
                "hit_tolerance_px" => set(&mut s.hit_tolerance_px, val),
                "placeholder_white_tolerance" => set(&mut s.placeholder_white_tolerance, val),
                "selection_border_color" => match str_to_color(val) {
                    Some(c) => {
                        s.selection_border_color = c;
                        true
                    }
                    None => false,
                },
                _ => {
                    tracing::debug!("settings: ignoring unknown key '{key}'");
                    true
                }
            };
            if !ok {
                tracing::warn!("settings: bad value '{val}' for '{key}', keeping default");
            }
        }
        s
    }

    pub fn to_cfg_string(&self) -> String {
        let [r, g, b, a] = self.selection_border_color;
        format!(
            "canvas_width={}\ncanvas_height={}\nmax_history={}\nhistory_debounce_ms={}\nmax_updates_per_sec={}\nhit_tolerance_px={}\nplaceholder_white_tolerance={}\nselection_border_color={r},{g},{b},{a}\n",
            self.canvas_width,
            self.canvas_height,
            self.max_history,
            self.history_debounce_ms,
            self.max_updates_per_sec,
            self.hit_tolerance_px,
            self.placeholder_white_tolerance,
        )
    }
}

fn set<T: std::str::FromStr>(slot: &mut T, val: &str) -> bool {
    match val.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

/// Parse a colour from "r,g,b,a"
fn str_to_color(s: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() == 4 {
        let r = parts[0].trim().parse::<u8>().ok()?;
        let g = parts[1].trim().parse::<u8>().ok()?;
        let b = parts[2].trim().parse::<u8>().ok()?;
        let a = parts[3].trim().parse::<u8>().ok()?;
        Some([r, g, b, a])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_keeps_defaults_for_bad_values() {
        let s = EngineSettings::parse(
            "# garment editor\ncanvas_width = 1024\nmax_history=abc\nselection_border_color=1,2,3,4\nwhatever=1\n",
        );
        assert_eq!(s.canvas_width, 1024);
        assert_eq!(s.canvas_height, 2048);
        assert_eq!(s.max_history, 50);
        assert_eq!(s.selection_border_color, [1, 2, 3, 4]);
    }

    #[test]
    fn cfg_string_round_trips() {
        let s = EngineSettings { hit_tolerance_px: 3.5, max_updates_per_sec: 12, ..Default::default() };
        assert_eq!(EngineSettings::parse(&s.to_cfg_string()), s);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(EngineSettings::load_from(&dir.path().join("nope.cfg")), EngineSettings::default());
    }
}
