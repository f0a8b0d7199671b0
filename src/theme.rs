/// Theme handling.
///
/// The renderer never receives a bag of loose color strings — it gets a
/// `ThemeMode` plus the fixed `Palette` resolved from it. The palette is
/// looked up once per theme change, not threaded through every view.
use serde::{Deserialize, Serialize};

// ── ThemeMode ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    /// The string persisted under the `app_theme` key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }

    /// Parse a persisted value. Anything other than "light"/"dark" is
    /// treated as absent so a corrupted key falls back to the device scheme.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(ThemeMode::Light),
            "dark" => Some(ThemeMode::Dark),
            _ => None,
        }
    }

    pub fn palette(&self) -> &'static Palette {
        match self {
            ThemeMode::Light => &LIGHT,
            ThemeMode::Dark => &DARK,
        }
    }
}

// ── Palette ───────────────────────────────────────────────────────────────────

/// Fixed color roles the renderer consumes. Values are CSS-style hex strings
/// (with alpha where the design uses it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub text: &'static str,
    pub secondary_text: &'static str,
    pub primary: &'static str,
    pub card: &'static str,
    pub secondary: &'static str,
    pub secondary_action: &'static str,
}

pub const LIGHT: Palette = Palette {
    background: "#F3F4F6",
    text: "#151515ff",
    secondary_text: "#4e4d4dff",
    primary: "#3B82F6",
    card: "#ecedeeff",
    secondary: "#dfe7f5ff",
    secondary_action: "#e5e8ebff",
};

pub const DARK: Palette = Palette {
    background: "#151515ff",
    text: "#F3F4F6",
    secondary_text: "#e5e6e7ff",
    primary: "#3B82F6",
    card: "#232424ff",
    secondary: "#393a3bff",
    secondary_action: "#393a3bff",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_values() {
        assert_eq!(ThemeMode::parse("light"), Some(ThemeMode::Light));
        assert_eq!(ThemeMode::parse("dark"), Some(ThemeMode::Dark));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ThemeMode::parse(""), None);
        assert_eq!(ThemeMode::parse("Dark"), None);
        assert_eq!(ThemeMode::parse("solarized"), None);
    }

    #[test]
    fn test_as_str_round_trips() {
        for mode in [ThemeMode::Light, ThemeMode::Dark] {
            assert_eq!(ThemeMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_palette_lookup() {
        assert_eq!(ThemeMode::Light.palette().background, "#F3F4F6");
        assert_eq!(ThemeMode::Dark.palette().background, "#151515ff");
        // Primary accent is shared between both palettes
        assert_eq!(ThemeMode::Light.palette().primary, ThemeMode::Dark.palette().primary);
    }
}
