use crate::error::MemoryError;
use crate::models::ChunkingConfig;
use regex::Regex;

const HEADING_PATTERN: &str = r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$";
const BLANK_LINE_PATTERN: &str = r"\n[ \t]*\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub section: Option<String>,
    pub text: String,
}

pub fn chunk_markdown(markdown: &str, config: ChunkingConfig) -> Result<Vec<TextChunk>, MemoryError> {
    let heading_re = Regex::new(HEADING_PATTERN)?;
    let blank_line_re = Regex::new(BLANK_LINE_PATTERN)?;

    let unified = markdown.replace("\r\n", "\n");
    let paragraphs = blank_line_re
        .split(&unified)
        .map(|paragraph| paragraph.trim().replace('\t', " "))
        .filter(|paragraph| !paragraph.is_empty());

    let mut packed = Vec::new();
    let mut section: Option<String> = None;
    let mut current = String::new();

    for paragraph in paragraphs {
        let heading = paragraph
            .lines()
            .next()
            .and_then(|line| heading_re.captures(line))
            .and_then(|captures| captures.get(1))
            .map(|title| title.as_str().to_string());

        if let Some(title) = heading {
            flush(&mut packed, &mut current, &section);
            section = Some(title);
        }

        if current.is_empty() {
            current.push_str(&paragraph);
            continue;
        }

        if current.len() + paragraph.len() + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            flush(&mut packed, &mut current, &section);
            current.push_str(&paragraph);
        }
    }
    flush(&mut packed, &mut current, &section);

    let mut with_overlap = Vec::new();
    for chunk in packed {
        if chunk.text.chars().count() <= config.max_chars {
            with_overlap.push(chunk);
            continue;
        }

        let chars: Vec<char> = chunk.text.chars().collect();
        let step = config
            .max_chars
            .saturating_sub(config.overlap_chars)
            .max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            with_overlap.push(TextChunk {
                section: chunk.section.clone(),
                text: chars[start..end].iter().collect(),
            });
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    Ok(with_overlap)
}

fn flush(chunks: &mut Vec<TextChunk>, current: &mut String, section: &Option<String>) {
    if current.trim().is_empty() {
        current.clear();
        return;
    }

    chunks.push(TextChunk {
        section: section.clone(),
        text: std::mem::take(current),
    });
}
