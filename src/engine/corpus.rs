#![forbid(unsafe_code)]

// Canned content: words for names and comments, Python source for typing

use rand::seq::SliceRandom;
use rand::Rng;

pub const FILE_EXT: &str = ".py";

const DIRS: [&str; 4] = ["", "a/", "b/", "c/"];

pub const WORDS: &[&str] = &[
    "apple", "banana", "binary", "bridge", "buffer", "cache", "candle", "canvas", "cipher",
    "cloud", "comet", "counter", "delta", "docker", "eagle", "echo", "engine", "falcon",
    "filter", "forest", "galaxy", "garden", "gamma", "harbor", "helper", "index", "island",
    "jungle", "kernel", "ladder", "lambda", "lemon", "matrix", "meadow", "mirror", "module",
    "nebula", "number", "orbit", "oracle", "packet", "parser", "pepper", "planet", "queue",
    "random", "reader", "river", "rocket", "sample", "scanner", "shadow", "signal", "socket",
    "sorter", "spiral", "stack", "string", "summit", "syntax", "tensor", "thread", "tiger",
    "token", "tower", "tuple", "vector", "velvet", "window", "wizard", "yellow", "zebra",
];

pub const CODE: &str = r#"import sys
from collections import defaultdict


def read_numbers(stream):
    numbers = []
    for line in stream:
        line = line.strip()
        if not line:
            continue
        numbers.extend(int(token) for token in line.split())
    return numbers


def bubble_sort(values):
    values = list(values)
    n = len(values)
    for i in range(n):
        swapped = False
        for j in range(0, n - i - 1):
            if values[j] > values[j + 1]:
                values[j], values[j + 1] = values[j + 1], values[j]
                swapped = True
        if not swapped:
            break
    return values


def binary_search(values, target):
    low, high = 0, len(values) - 1
    while low <= high:
        mid = (low + high) // 2
        if values[mid] == target:
            return mid
        if values[mid] < target:
            low = mid + 1
        else:
            high = mid - 1
    return -1


class Graph:
    def __init__(self):
        self.edges = defaultdict(list)

    def add_edge(self, u, v):
        self.edges[u].append(v)
        self.edges[v].append(u)

    def bfs(self, start):
        seen = {start}
        order = [start]
        queue = [start]
        while queue:
            node = queue.pop(0)
            for nxt in self.edges[node]:
                if nxt not in seen:
                    seen.add(nxt)
                    order.append(nxt)
                    queue.append(nxt)
        return order


def fibonacci(n):
    a, b = 0, 1
    for _ in range(n):
        a, b = b, a + b
    return a


if __name__ == "__main__":
    data = read_numbers(sys.stdin)
    ordered = bubble_sort(data)
    print(" ".join(map(str, ordered)))
    print(binary_search(ordered, 42))
    print([fibonacci(i) for i in range(10)])
"#;

pub fn random_word<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    WORDS.choose(rng).copied().unwrap_or("word")
}

/// Space-separated words; `count` defaults to 5..=10.
pub fn random_words<R: Rng + ?Sized>(rng: &mut R, count: Option<usize>) -> String {
    let count = count.unwrap_or_else(|| rng.gen_range(5..=10));
    (0..count)
        .map(|_| random_word(rng))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<dir><word>.py` with dir one of the root or `a/`, `b/`, `c/`
pub fn random_file_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let dir = DIRS.choose(rng).copied().unwrap_or_default();
    format!("{dir}{}{FILE_EXT}", random_word(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_file_name_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let name = random_file_name(&mut rng);
            assert!(name.ends_with(FILE_EXT));
            let stem = name.trim_end_matches(FILE_EXT);
            let word = stem.rsplit('/').next().unwrap();
            assert!(WORDS.contains(&word), "{name}");
            assert!(DIRS.iter().any(|d| stem == format!("{d}{word}")));
        }
    }

    #[test]
    fn test_random_words_count() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(random_words(&mut rng, Some(3)).split(' ').count(), 3);
        for _ in 0..50 {
            let n = random_words(&mut rng, None).split(' ').count();
            assert!((5..=10).contains(&n));
        }
    }

    #[test]
    fn test_code_corpus_is_ascii() {
        assert!(CODE.is_ascii());
        assert!(CODE.len() > 500);
    }
}
