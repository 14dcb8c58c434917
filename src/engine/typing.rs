#![forbid(unsafe_code)]

// Keystroke synthesis for FILE_MOD: walks a source corpus in fixed windows and
// sprinkles in corrected typos so receivers replay realistic edits.

use rand::Rng;

use super::corpus;

/// Deletes the character before it when replayed
pub const BACKSPACE: char = '\u{8}';

/// Characters typed per FILE_MOD
pub const TYPE_WINDOW: usize = 8;

/// Chance of typing a stray word and erasing it
pub const TYPO_CHANCE: f64 = 0.05;

/// Ceiling of the erase-and-retype chance
pub const MAX_RETYPE_CHANCE: f64 = 0.20;

/// Intact characters at which the retype chance reaches its ceiling
const RETYPE_SATURATION: f64 = 40.0;

#[derive(Debug, Clone)]
pub struct TypingSynth {
    corpus: Vec<char>,
    cursor: usize,
    window: usize,
    /// Text typed since the last correction
    intact: Vec<char>,
}

impl Default for TypingSynth {
    fn default() -> Self {
        Self::new(corpus::CODE, TYPE_WINDOW)
    }
}

impl TypingSynth {
    pub fn new(corpus: &str, window: usize) -> Self {
        Self {
            corpus: corpus.chars().collect(),
            cursor: 0,
            window,
            intact: Vec::new(),
        }
    }

    /// Produces the next keystroke stream. Replaying it appends exactly the
    /// next corpus window; the typos and retypes cancel out.
    pub fn next_chunk<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        let typed = self.take_window();
        if typed.is_empty() {
            return String::new();
        }

        let mut stream = String::new();
        if rng.gen_bool(TYPO_CHANCE) {
            let word = corpus::random_word(rng);
            stream.push_str(word);
            stream.extend(std::iter::repeat(BACKSPACE).take(word.chars().count()));
            stream.extend(typed.iter());
            self.intact.clear();
            self.intact.extend(typed);
            return stream;
        }

        stream.extend(typed.iter());
        self.intact.extend(typed);

        let chance = (self.intact.len() as f64 / RETYPE_SATURATION * MAX_RETYPE_CHANCE)
            .min(MAX_RETYPE_CHANCE);
        if rng.gen_bool(chance) {
            let erase = rng.gen_range(1..=self.intact.len());
            let suffix = &self.intact[self.intact.len() - erase..];
            stream.extend(std::iter::repeat(BACKSPACE).take(erase));
            stream.extend(suffix.iter());
            self.intact.clear();
        }
        stream
    }

    fn take_window(&mut self) -> Vec<char> {
        if self.corpus.is_empty() {
            return Vec::new();
        }
        let len = self.corpus.len();
        let typed = (0..self.window)
            .map(|i| self.corpus[(self.cursor + i) % len])
            .collect();
        self.cursor = (self.cursor + self.window) % len;
        typed
    }
}

/// Replays a keystroke stream onto file content.
pub fn apply_keystrokes(content: &mut String, stream: &str) {
    for c in stream.chars() {
        if c == BACKSPACE {
            content.pop();
        } else {
            content.push(c);
        }
    }
}
