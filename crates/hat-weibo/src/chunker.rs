//! Clause-aware splitting of model output into comment-sized chunks.

/// Maximum comment length accepted by the platform, in characters.
pub const WEIBO_COMMENT_MAX_CHARS: usize = 140;

const CLAUSE_DELIMITERS: [char; 3] = ['，', '。', '；'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Packs whole clauses into chunks of at most `max_chars` characters.
///
/// Clauses end at a full-width comma, period or semicolon, and the delimiter
/// stays with the clause before it. A clause longer than the limit is never
/// cut; it becomes its own oversized chunk. Joining the chunks in order gives
/// back the input exactly.
pub struct TextChunker {
    max_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(WEIBO_COMMENT_MAX_CHARS)
    }
}

impl TextChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut buffer_chars = 0_usize;

        for clause in split_clauses(text) {
            let clause_chars = clause.chars().count();
            if buffer_chars + clause_chars <= self.max_chars {
                buffer.push_str(clause);
                buffer_chars += clause_chars;
                continue;
            }
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
            }
            buffer.push_str(clause);
            buffer_chars = clause_chars;
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }
        chunks
    }
}

fn split_clauses(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(|ch: char| CLAUSE_DELIMITERS.contains(&ch))
}
