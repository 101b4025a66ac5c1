const BRAILLE_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Running builds and steps alternate between the two hourglass halves.
const HOURGLASS_FRAMES: &[&str] = &["⧗", "⧖"];

/// Frames per hourglass flip, at the 100ms UI tick.
const HOURGLASS_HOLD: usize = 5;

pub fn frame(idx: usize) -> char {
    BRAILLE_FRAMES[idx % BRAILLE_FRAMES.len()]
}

pub fn hourglass(idx: usize) -> &'static str {
    HOURGLASS_FRAMES[(idx / HOURGLASS_HOLD) % HOURGLASS_FRAMES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braille_char_range() {
        for &ch in BRAILLE_FRAMES {
            assert!(
                ('\u{2800}'..='\u{28FF}').contains(&ch),
                "char {ch:?} not in Braille range"
            );
        }
    }

    #[test]
    fn wrap_around() {
        assert_eq!(frame(0), frame(BRAILLE_FRAMES.len()));
    }

    #[test]
    fn hourglass_flips_after_hold() {
        assert_eq!(hourglass(0), hourglass(HOURGLASS_HOLD - 1));
        assert_ne!(hourglass(0), hourglass(HOURGLASS_HOLD));
        assert_eq!(hourglass(0), hourglass(HOURGLASS_HOLD * 2));
    }

    #[test]
    fn large_index_no_panic() {
        let _ = frame(usize::MAX);
        let _ = hourglass(usize::MAX);
    }
}
