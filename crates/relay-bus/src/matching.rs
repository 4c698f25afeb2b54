//! Topic-exchange binding key matching.
//!
//! Words are separated by `.`. In a binding key `*` matches exactly one word
//! and `#` matches zero or more words. An empty routing key has no words.

/// Whether a message published under `routing_key` reaches a queue bound with `binding_key`.
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    // Exact match first (most common case)
    if binding_key == routing_key {
        return true;
    }
    if binding_key == "#" {
        return true;
    }

    let pattern = words(binding_key);
    let words = words(routing_key);
    match_words(&pattern, &words)
}

fn words(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    }
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            // Collapse runs of `#`; they match the same word sequences as one.
            if rest.first() == Some(&"#") {
                return match_words(rest, words);
            }
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first() == Some(literal) && match_words(rest, &words[1..])
        }
    }
}
