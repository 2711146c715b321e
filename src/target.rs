//! Resolves the optional window-title hint into a capture target.
use log::{info, warn};

use crate::fallback;

/// What the capture source should capture.
#[derive(Eq, PartialEq, Clone, Debug)]
pub enum Target<H> {
    /// A single top-level window.
    Window { handle: H, title: String },
    /// The whole display.
    Desktop,
}

/// Window lookup strategies, tried in declaration order.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Lookup {
    /// The title equals the hint.
    ExactTitle,
    /// The title contains the hint, ignoring case.
    Substring,
}

impl Lookup {
    pub const CHAIN: [Self; 2] = [Self::ExactTitle, Self::Substring];
}

/// Returns `true` when `title` equals `hint`, including case.
#[must_use]
#[inline]
pub fn is_exact_title(title: &str, hint: &str) -> bool {
    title == hint
}

/// Finds the first candidate whose title contains `hint`, ignoring case.
pub fn find_substring<'a, H>(hint: &str, candidates: &'a [(H, String)]) -> Option<&'a (H, String)> {
    let needle = hint.to_lowercase();
    candidates.iter().find(|(_, title)| title.to_lowercase().contains(&needle))
}

/// Resolves `hint` with the exact match first, then a substring match over
/// `candidates`, then the whole desktop. Never fails.
///
/// `exact` performs the exact-title lookup (usually `FindWindowW`) and
/// `candidates` lists the visible top-level windows with their titles. The
/// candidate list is only built when the exact lookup misses.
pub fn resolve<H: Clone>(
    hint: Option<&str>,
    mut exact: impl FnMut(&str) -> Option<H>,
    mut candidates: impl FnMut() -> Vec<(H, String)>,
) -> Target<H> {
    let Some(hint) = hint.map(str::trim).filter(|hint| !hint.is_empty()) else {
        return Target::Desktop;
    };

    let found = fallback::first_success(Lookup::CHAIN, |lookup| match lookup {
        Lookup::ExactTitle => exact(hint).map(|handle| (handle, hint.to_string())).ok_or(()),
        Lookup::Substring => find_substring(hint, &candidates()).cloned().ok_or(()),
    });

    match found {
        Ok((lookup, (handle, title))) => {
            info!("Capturing Window \"{title}\" ({lookup:?} Match)");
            Target::Window { handle, title }
        }
        Err(_) => {
            warn!("No Window Matches \"{hint}\", Capturing The Desktop Instead");
            Target::Desktop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows() -> Vec<(u32, String)> {
        vec![
            (1, "Untitled - Notepad".to_string()),
            (2, "Calculator".to_string()),
            (3, "notes.txt - Notepad".to_string()),
        ]
    }

    #[test]
    fn no_hint_is_desktop() {
        let target = resolve(None, |_| Some(7u32), windows);
        assert_eq!(target, Target::Desktop);

        let target = resolve(Some("  "), |_| Some(7u32), windows);
        assert_eq!(target, Target::Desktop);
    }

    #[test]
    fn exact_match_wins() {
        let mut listed = false;
        let target = resolve(
            Some("Calculator"),
            |title| (title == "Calculator").then_some(2u32),
            || {
                listed = true;
                windows()
            },
        );

        assert_eq!(target, Target::Window { handle: 2, title: "Calculator".to_string() });
        assert!(!listed, "enumeration is skipped after an exact match");
    }

    #[test]
    fn falls_back_to_first_substring_match() {
        let target = resolve(Some("notepad"), |_| None, windows);
        assert_eq!(target, Target::Window { handle: 1, title: "Untitled - Notepad".to_string() });
    }

    #[test]
    fn exact_title_is_case_sensitive() {
        assert!(is_exact_title("Calculator", "Calculator"));
        assert!(!is_exact_title("Calculator", "calculator"));
        assert!(!is_exact_title("Calculator", "Calc"));

        // A case-insensitive hit from the window manager falls through to the substring pass.
        let target = resolve(
            Some("calculator"),
            |hint| windows().into_iter().find(|(_, title)| is_exact_title(title, hint)).map(|(handle, _)| handle),
            windows,
        );
        assert_eq!(target, Target::Window { handle: 2, title: "Calculator".to_string() });
    }

    #[test]
    fn unmatched_hint_is_desktop() {
        let target = resolve(Some("Paint"), |_| None, windows);
        assert_eq!(target, Target::Desktop);
    }
}
