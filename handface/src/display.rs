//! Emoji overlay showing the winning class.
//!
use serde::Serialize;

use crate::{labels::Label, pipeline::ClassProbability};

/// Raised hand with fingers splayed.
pub const HAND_EMOJI: char = '\u{1F590}';
/// Man.
pub const FACE_EMOJI: char = '\u{1F468}';

/// Glyph and the two mutually exclusive `left`/`right` styles of the overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmojiDisplay {
    pub glyph: String,
    pub left: bool,
    pub right: bool,
}

impl EmojiDisplay {
    /// Show the first-ranked label if it strictly beats the second one.
    ///
    /// Exact ties, and lists with fewer than two entries, leave the display as it is. Returns
    /// the label shown, if any.
    pub fn apply(&mut self, classes: &[ClassProbability]) -> Option<Label> {
        let (first, second) = match classes {
            [first, second, ..] => (first, second),
            _ => return None,
        };
        // Strict comparison, so ties and NaN scores never update the display
        let winner = match first.probability > second.probability {
            true => first.label,
            false => {
                log::debug!(
                    "No clear winner between {} and {}, keeping display",
                    first.label,
                    second.label
                );
                return None;
            }
        };

        match winner {
            Label::Hand => {
                log::info!("Hand");
                self.glyph = HAND_EMOJI.to_string();
                self.left = true;
                self.right = false;
            }
            Label::Face => {
                log::info!("Face");
                self.glyph = FACE_EMOJI.to_string();
                self.left = false;
                self.right = true;
            }
        }

        Some(winner)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ranked(first: (Label, f32), second: (Label, f32)) -> Vec<ClassProbability> {
        vec![
            ClassProbability {
                label: first.0,
                probability: first.1,
            },
            ClassProbability {
                label: second.0,
                probability: second.1,
            },
        ]
    }

    #[test]
    fn hand_goes_left() {
        let mut display = EmojiDisplay::default();
        let shown = display.apply(&ranked((Label::Hand, 0.9), (Label::Face, 0.1)));

        assert_eq!(shown, Some(Label::Hand));
        assert_eq!(display.glyph, "\u{1F590}");
        assert!(display.left);
        assert!(!display.right);
    }

    #[test]
    fn face_goes_right() {
        let mut display = EmojiDisplay::default();
        display.apply(&ranked((Label::Hand, 0.9), (Label::Face, 0.1)));
        let shown = display.apply(&ranked((Label::Face, 0.8), (Label::Hand, 0.2)));

        assert_eq!(shown, Some(Label::Face));
        assert_eq!(display.glyph, "\u{1F468}");
        assert!(!display.left);
        assert!(display.right);
    }

    #[test]
    fn tie_keeps_previous_state() {
        let mut display = EmojiDisplay::default();
        display.apply(&ranked((Label::Face, 0.8), (Label::Hand, 0.2)));
        let before = display.clone();

        let shown = display.apply(&ranked((Label::Hand, 0.3), (Label::Face, 0.3)));
        assert_eq!(shown, None);
        assert_eq!(display, before);
    }

    #[test]
    fn single_entry_is_ignored() {
        let mut display = EmojiDisplay::default();
        let single = [ClassProbability {
            label: Label::Hand,
            probability: 1.0,
        }];

        assert_eq!(display.apply(&single), None);
        assert_eq!(display, EmojiDisplay::default());
    }
}
