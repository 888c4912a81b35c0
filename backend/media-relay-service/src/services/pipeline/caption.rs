use media_core::MediaFormat;
use std::collections::HashSet;

const ELLIPSIS: &str = "...";

/// Build the caption for a delivered artifact.
///
/// Lengths are UTF-16 code units, the unit the chat API counts its caption
/// limit in. Videos carry the post description. Animated images also carry
/// an `Original video:` line with the source URL, which is never truncated;
/// only the description gives way to fit `max_units`.
pub fn build_caption(
    description: Option<&str>,
    source_url: &str,
    format: MediaFormat,
    max_units: usize,
) -> Option<String> {
    let description = description.map(str::trim).filter(|d| !d.is_empty());

    match format {
        MediaFormat::Video => description.map(|d| truncate_utf16(d, max_units)),
        MediaFormat::AnimatedImage => {
            let footer = format!("Original video: {source_url}");
            let separator = "\n\n";
            let budget = max_units
                .saturating_sub(utf16_len(&footer))
                .saturating_sub(utf16_len(separator));

            let caption = match description {
                Some(d) if budget > ELLIPSIS.len() => {
                    format!("{}{separator}{footer}", truncate_utf16(d, budget))
                }
                _ => footer,
            };
            Some(caption)
        }
    }
}

pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn truncate_utf16(text: &str, max_units: usize) -> String {
    if utf16_len(text) <= max_units {
        return text.to_string();
    }
    let keep = max_units.saturating_sub(ELLIPSIS.len());
    let mut used = 0;
    let mut truncated = String::new();
    for c in text.chars() {
        used += c.len_utf16();
        if used > keep {
            break;
        }
        truncated.push(c);
    }
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Rewrite hashtags as lowercase `#word` tokens and drop repeats.
///
/// `#Food#Travel,` becomes `#food #travel`. Lines without hashtags are left
/// as they are; a line left empty by dropped repeats is removed.
pub fn normalize_hashtags(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    for line in text.lines() {
        if !line.split_whitespace().any(|t| t.starts_with('#')) {
            lines.push(line.to_string());
            continue;
        }

        let mut tokens = Vec::new();
        for token in line.split_whitespace() {
            if !token.starts_with('#') {
                tokens.push(token.to_string());
                continue;
            }
            for raw in token.split('#').filter(|t| !t.is_empty()) {
                let tag: String = raw
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .flat_map(char::to_lowercase)
                    .collect();
                if !tag.is_empty() && seen.insert(tag.clone()) {
                    tokens.push(format!("#{tag}"));
                }
            }
        }
        if !tokens.is_empty() {
            lines.push(tokens.join(" "));
        }
    }

    lines.join("\n")
}
