//! Colors and glyphs shared by help rendering and command output.

use changeledger::ChangeState;
use colored::Color;
use comfy_table::Color as TableColor;
use once_cell::sync::Lazy;

/// Message and help colors, plus one color per recorded change state.
pub struct LedgerTheme {
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub info: Color,
    pub highlight: Color,
    pub muted: Color,
    pub primary: Color,
    pub secondary: Color,
    pub key: Color,
    pub value: Color,
    pub states: StateColors,
}

pub struct StateColors {
    pub executed: Color,
    pub failed: Color,
    pub reverted: Color,
    pub skipped: Color,
}

impl Default for LedgerTheme {
    fn default() -> Self {
        Self {
            success: Color::BrightGreen,
            error: Color::BrightRed,
            warning: Color::Yellow,
            info: Color::Cyan,
            highlight: Color::BrightYellow,
            muted: Color::BrightBlack,
            primary: Color::Green,
            secondary: Color::Cyan,
            key: Color::BrightWhite,
            value: Color::White,
            states: StateColors {
                executed: Color::Green,
                failed: Color::Red,
                reverted: Color::Magenta,
                skipped: Color::Yellow,
            },
        }
    }
}

impl LedgerTheme {
    pub fn state_color(&self, state: Option<ChangeState>) -> Color {
        match state {
            // rows written before state tracking count as executed
            Some(ChangeState::Executed) | None => self.states.executed,
            Some(ChangeState::Failed | ChangeState::RollbackFailed) => self.states.failed,
            Some(ChangeState::RolledBack) => self.states.reverted,
            Some(ChangeState::Ignored) => self.states.skipped,
        }
    }
}

pub static THEME: Lazy<LedgerTheme> = Lazy::new(LedgerTheme::default);

/// Map a terminal color onto the table renderer's palette.
pub fn table_color(color: Color) -> TableColor {
    match color {
        Color::Black => TableColor::Black,
        Color::Red => TableColor::DarkRed,
        Color::Green => TableColor::DarkGreen,
        Color::Yellow => TableColor::DarkYellow,
        Color::Blue => TableColor::DarkBlue,
        Color::Magenta => TableColor::DarkMagenta,
        Color::Cyan => TableColor::DarkCyan,
        Color::White => TableColor::Grey,
        Color::BrightBlack => TableColor::DarkGrey,
        Color::BrightRed => TableColor::Red,
        Color::BrightGreen => TableColor::Green,
        Color::BrightYellow => TableColor::Yellow,
        Color::BrightBlue => TableColor::Blue,
        Color::BrightMagenta => TableColor::Magenta,
        Color::BrightCyan => TableColor::Cyan,
        Color::BrightWhite => TableColor::White,
        Color::TrueColor { r, g, b } => TableColor::Rgb { r, g, b },
    }
}

pub struct Icons {
    pub done: &'static str,
    pub failed: &'static str,
    pub caution: &'static str,
    pub note: &'static str,
    pub step: &'static str,
    pub pending: &'static str,
}

pub const ICONS: Icons = Icons {
    done: "●",
    failed: "■",
    caution: "▲",
    note: "•",
    step: "›",
    pending: "…",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_colors_group_like_outcomes() {
        let theme = LedgerTheme::default();
        assert_eq!(theme.state_color(Some(ChangeState::Executed)), Color::Green);
        assert_eq!(
            theme.state_color(Some(ChangeState::RollbackFailed)),
            theme.state_color(Some(ChangeState::Failed))
        );
        assert_eq!(theme.state_color(None), theme.state_color(Some(ChangeState::Executed)));
        assert_ne!(
            theme.state_color(Some(ChangeState::RolledBack)),
            theme.state_color(Some(ChangeState::Ignored))
        );
    }

    #[test]
    fn table_colors_follow_brightness() {
        assert_eq!(table_color(Color::Green), TableColor::DarkGreen);
        assert_eq!(table_color(Color::BrightGreen), TableColor::Green);
        assert_eq!(
            table_color(Color::TrueColor { r: 1, g: 2, b: 3 }),
            TableColor::Rgb { r: 1, g: 2, b: 3 }
        );
    }
}
