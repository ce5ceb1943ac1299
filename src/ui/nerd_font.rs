/// Icons used in bootpool's text output.
///
/// Only the handful of glyphs the tool actually prints; all of them are
/// available in every nerd font release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerdFont {
    Check,
    Cross,
    Warning,
    Info,
    HardDrive,
    Refresh,
}

impl NerdFont {
    /// Get the Unicode character for this icon
    pub const fn unicode(&self) -> char {
        match self {
            Self::Check => '\u{f00c}',     // fa-check
            Self::Cross => '\u{f00d}',     // fa-times
            Self::Warning => '\u{f071}',   // fa-exclamation-triangle
            Self::Info => '\u{f05a}',      // fa-info-circle
            Self::HardDrive => '\u{f0a0}', // fa-hdd
            Self::Refresh => '\u{f021}',   // fa-refresh
        }
    }
}

impl std::fmt::Display for NerdFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unicode())
    }
}

impl From<NerdFont> for char {
    fn from(icon: NerdFont) -> Self {
        icon.unicode()
    }
}
