//! Wikitext parsing: raw article markup to the structured [`Page`] model.
//!
//! This is a consumer-grade subset of wikitext, covering the constructs the
//! converter reads: headings, paragraphs, bold/italic spans, internal,
//! external and interwiki links, and images. Templates, citations, tables
//! and comments are stripped before structure is extracted.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;

use crate::page::{Image, Link, LinkKind, Page, Paragraph, Section, Sentence};

// Percent-encoding set matching JS encodeURIComponent.
const SLUG_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));
static CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<gallery[^>]*>.*?</gallery>|<math[^>]*>.*?</math>|<score[^>]*>.*?</score>|<syntaxhighlight[^>]*>.*?</syntaxhighlight>|<source[^>]*>.*?</source>|<timeline[^>]*>.*?</timeline>",
    )
    .expect("container pattern")
});
static REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<ref[^>]*/>|<ref[^>]*?>.*?</ref>").expect("ref pattern"));
static BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("break pattern"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").expect("tag pattern"));
static MAGIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__[A-Z]+__").expect("magic word pattern"));

const INTERWIKI_BASES: &[(&str, &str)] = &[
    ("commons", "https://commons.wikimedia.org/wiki/"),
    ("wikt", "https://en.wiktionary.org/wiki/"),
    ("wiktionary", "https://en.wiktionary.org/wiki/"),
    ("s", "https://en.wikisource.org/wiki/"),
    ("wikisource", "https://en.wikisource.org/wiki/"),
    ("q", "https://en.wikiquote.org/wiki/"),
    ("wikiquote", "https://en.wikiquote.org/wiki/"),
    ("b", "https://en.wikibooks.org/wiki/"),
    ("wikibooks", "https://en.wikibooks.org/wiki/"),
    ("voy", "https://en.wikivoyage.org/wiki/"),
    ("species", "https://species.wikimedia.org/wiki/"),
    ("meta", "https://meta.wikimedia.org/wiki/"),
    ("mw", "https://www.mediawiki.org/wiki/"),
    ("d", "https://www.wikidata.org/wiki/"),
];

const INTERWIKI_LANGUAGES: &[&str] = &[
    "ar", "bg", "ca", "cs", "da", "de", "el", "eo", "es", "et", "fa", "fi", "fr", "he", "hi",
    "hr", "hu", "id", "it", "ja", "ko", "lt", "nl", "no", "pl", "pt", "ro", "ru", "sk", "sl",
    "sr", "sv", "th", "tr", "uk", "vi", "zh",
];

const IMAGE_ATTRIBUTES: &[&str] = &[
    "thumb",
    "thumbnail",
    "frame",
    "framed",
    "frameless",
    "border",
    "right",
    "left",
    "center",
    "none",
    "baseline",
    "middle",
    "top",
    "bottom",
    "text-top",
    "text-bottom",
    "sub",
    "super",
    "upright",
];

const IMAGE_ATTRIBUTE_PREFIXES: &[&str] =
    &["link=", "page=", "class=", "lang=", "upright=", "thumb=", "thumbnail="];

/// Parse raw wikitext into a [`Page`].
pub fn parse_article(id: i64, title: &str, language: &str, wikitext: &str) -> Page {
    let cleaned = preprocess(wikitext);
    let flat = split_sections(&cleaned, language);
    Page {
        id,
        title: title.to_string(),
        language: language.to_string(),
        sections: nest_sections(flat),
    }
}

/// Canonical article URL for a title on the given language edition.
pub fn article_url(language: &str, title: &str) -> String {
    format!("https://{language}.wikipedia.org/wiki/{}", encode_slug(title))
}

/// Redirect URL serving a thumbnail rendition of a file.
pub fn thumbnail_url(language: &str, file: &str) -> String {
    format!(
        "https://{language}.wikipedia.org/wiki/Special:Redirect/file/{}?width=300",
        encode_slug(file)
    )
}

/// Title to URL slug: spaces become underscores, the rest percent-encoded.
pub fn encode_slug(title: &str) -> String {
    utf8_percent_encode(&title.replace(' ', "_"), SLUG_SET).to_string()
}

fn preprocess(wikitext: &str) -> String {
    let text = COMMENT_RE.replace_all(wikitext, "");
    let text = CONTAINER_RE.replace_all(&text, "");
    let text = REF_RE.replace_all(&text, "");
    let text = BREAK_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, "");
    let text = strip_balanced(&text, "{{", "}}");
    let text = strip_balanced(&text, "{|", "|}");
    let text = MAGIC_RE.replace_all(&text, "");
    decode_entities(&text)
}

/// Remove balanced `open`..`close` regions, including nested ones.
fn strip_balanced(input: &str, open: &str, close: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut depth = 0usize;
    let mut rest = input;
    while !rest.is_empty() {
        if rest.starts_with(open) {
            depth += 1;
            rest = &rest[open.len()..];
            continue;
        }
        if depth > 0 && rest.starts_with(close) {
            depth -= 1;
            rest = &rest[close.len()..];
            continue;
        }
        let mut iter = rest.chars();
        if let Some(ch) = iter.next()
            && depth == 0
        {
            output.push(ch);
        }
        rest = iter.as_str();
    }
    output
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Split cleaned wikitext into a flat, document-ordered section list.
///
/// Text before the first heading becomes the untitled lead section at
/// indentation 0, even when empty.
fn split_sections(text: &str, language: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title: Option<String> = None;
    let mut indentation = 0u32;
    let mut body = String::new();

    for line in text.lines() {
        if let Some((depth, heading)) = parse_heading(line) {
            push_section(&mut sections, title.take(), indentation, &body, language);
            body.clear();
            title = Some(heading);
            indentation = depth;
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    push_section(&mut sections, title, indentation, &body, language);
    sections
}

fn push_section(
    sections: &mut Vec<Section>,
    title: Option<String>,
    indentation: u32,
    body: &str,
    language: &str,
) {
    let index = sections.len();
    sections.push(Section {
        index,
        indentation,
        title,
        paragraphs: parse_paragraphs(body, language),
        children: Vec::new(),
    });
}

/// `== Title ==` lines: 2 to 6 balanced equals signs. Returns the heading
/// depth (equals count minus two) and the title.
fn parse_heading(line: &str) -> Option<(u32, String)> {
    let trimmed = line.trim();
    if !trimmed.starts_with("==") || !trimmed.ends_with('=') || trimmed.len() < 5 {
        return None;
    }
    let leading = trimmed.chars().take_while(|ch| *ch == '=').count();
    let trailing = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    if leading < 2 || leading > 6 || leading != trailing || leading + trailing >= trimmed.len() {
        return None;
    }
    let inner = trimmed[leading..trimmed.len() - trailing].trim();
    if inner.is_empty() {
        return None;
    }
    Some(((leading - 2) as u32, inner.to_string()))
}

/// Nest a flat section list by indentation with an explicit stack.
fn nest_sections(flat: Vec<Section>) -> Vec<Section> {
    let mut roots: Vec<Section> = Vec::new();
    let mut stack: Vec<Section> = Vec::new();

    for section in flat {
        while let Some(top) = stack.last() {
            if top.indentation < section.indentation {
                break;
            }
            attach_finished(&mut roots, &mut stack);
        }
        stack.push(section);
    }
    while !stack.is_empty() {
        attach_finished(&mut roots, &mut stack);
    }
    roots
}

fn attach_finished(roots: &mut Vec<Section>, stack: &mut Vec<Section>) {
    if let Some(finished) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(finished),
            None => roots.push(finished),
        }
    }
}

fn parse_paragraphs(body: &str, language: &str) -> Vec<Paragraph> {
    body.split("\n\n")
        .filter_map(|block| parse_block(block, language))
        .collect()
}

fn parse_block(block: &str, language: &str) -> Option<Paragraph> {
    let mut images = Vec::new();
    let mut text_lines: Vec<String> = Vec::new();

    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        if lowered.starts_with("[[file:") || lowered.starts_with("[[image:") {
            if let Some(image) = parse_image(trimmed, language) {
                images.push(image);
            }
            continue;
        }
        if lowered.starts_with("[[category:") {
            continue;
        }
        text_lines.push(strip_list_markers(trimmed).to_string());
    }

    let text = text_lines.join(" ");
    let sentences: Vec<Sentence> = split_sentences(&text)
        .into_iter()
        .map(|raw| parse_sentence(&raw))
        .collect();

    if sentences.is_empty() && images.is_empty() {
        return None;
    }
    Some(Paragraph { sentences, images })
}

fn strip_list_markers(line: &str) -> &str {
    line.trim_start_matches(['*', '#', ':', ';']).trim_start()
}

/// Split paragraph text into sentences on terminal punctuation followed by
/// whitespace and a sentence opener. Splits are suppressed inside brackets
/// so that link targets like `[[U.S. Army]]` stay intact.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut depth = 0i32;
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '[' => depth += 1,
            ']' => depth = (depth - 1).max(0),
            '.' | '!' | '?' if depth == 0 => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                let opens_sentence = j > i + 1
                    && chars.get(j).is_some_and(|next| {
                        next.is_uppercase()
                            || next.is_ascii_digit()
                            || matches!(next, '"' | '\'' | '(' | '[')
                    });
                if opens_sentence {
                    push_sentence(&mut sentences, &chars[start..=i]);
                    start = j;
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if start < chars.len() {
        push_sentence(&mut sentences, &chars[start..]);
    }
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, chars: &[char]) {
    let sentence = chars.iter().collect::<String>().trim().to_string();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

fn parse_sentence(raw: &str) -> Sentence {
    let (without_bold, bold_spans) = take_spans(raw, "'''");
    let (without_marks, italic_spans) = take_spans(&without_bold, "''");
    let (text, links) = parse_inline(&without_marks);

    let bolds = bold_spans
        .iter()
        .map(|span| plain_text(span))
        .filter(|span| !span.is_empty())
        .collect();
    let italics = italic_spans
        .iter()
        .map(|span| plain_text(span))
        .filter(|span| !span.is_empty())
        .collect();

    Sentence {
        text: normalize_whitespace(&text),
        bolds,
        italics,
        links,
    }
}

/// Remove `marker`-delimited spans, returning the text with the delimiters
/// dropped and the span contents. Unbalanced markers stay literal.
fn take_spans(input: &str, marker: &str) -> (String, Vec<String>) {
    let mut output = String::with_capacity(input.len());
    let mut spans = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find(marker) {
        output.push_str(&rest[..open]);
        let after = &rest[open + marker.len()..];
        match after.find(marker) {
            Some(close) => {
                let inner = &after[..close];
                output.push_str(inner);
                if !inner.trim().is_empty() {
                    spans.push(inner.trim().to_string());
                }
                rest = &after[close + marker.len()..];
            }
            None => {
                output.push_str(marker);
                rest = after;
            }
        }
    }
    output.push_str(rest);
    (output, spans)
}

/// The display text of a markup fragment: quotes dropped, links reduced to
/// their shown text.
fn plain_text(span: &str) -> String {
    let stripped = span.replace("''", "");
    let (text, _) = parse_inline(&stripped);
    normalize_whitespace(&text)
}

fn normalize_whitespace(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !output.is_empty();
        } else {
            if pending_space {
                output.push(' ');
                pending_space = false;
            }
            output.push(ch);
        }
    }
    output
}

/// Extract links from a sentence fragment, producing display text and the
/// link list.
fn parse_inline(input: &str) -> (String, Vec<Link>) {
    let chars: Vec<char> = input.chars().collect();
    let mut text = String::with_capacity(input.len());
    let mut links = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] == '[' && chars.get(i + 1) == Some(&'[') {
            if let Some(end) = find_sequence(&chars, i + 2, &[']', ']']) {
                let inner: String = chars[i + 2..end].iter().collect();
                if let Some((shown, link)) = parse_wiki_link(&inner) {
                    text.push_str(&shown);
                    if let Some(link) = link {
                        links.push(link);
                    }
                }
                i = end + 2;
                continue;
            }
        }
        if chars[i] == '[' {
            if let Some(end) = find_sequence(&chars, i + 1, &[']'])
                && let Some((shown, link)) = parse_external_link(
                    &chars[i + 1..end].iter().collect::<String>(),
                )
            {
                text.push_str(&shown);
                links.push(link);
                i = end + 1;
                continue;
            }
        }
        text.push(chars[i]);
        i += 1;
    }

    (text, links)
}

fn find_sequence(chars: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if chars.len() < needle.len() {
        return None;
    }
    (from..=chars.len() - needle.len()).find(|&i| chars[i..i + needle.len()] == *needle)
}

/// One `[[...]]` link. Returns the text it contributes to the sentence and
/// the extracted link, if any; inline file, image and category links
/// contribute neither.
fn parse_wiki_link(inner: &str) -> Option<(String, Option<Link>)> {
    let mut parts = inner.splitn(2, '|');
    let target_raw = parts.next()?.trim();
    let display = parts
        .next()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty());

    let target_raw = target_raw.strip_prefix(':').unwrap_or(target_raw).trim();
    if target_raw.is_empty() {
        return display.map(|shown| (shown, None));
    }

    let lowered = target_raw.to_lowercase();
    if lowered.starts_with("file:") || lowered.starts_with("image:") || lowered.starts_with("category:")
    {
        return None;
    }

    // strip a section fragment from the target
    let target = match target_raw.split_once('#') {
        Some(("", _)) => {
            // fragment-only link: plain text, nothing to resolve
            return Some((display.unwrap_or_default(), None));
        }
        Some((before, _)) => before.trim().to_string(),
        None => target_raw.to_string(),
    };

    if let Some((prefix, rest)) = target.split_once(':') {
        let prefix = prefix.trim().to_lowercase();
        if let Some(base) = interwiki_base(&prefix) {
            let rest = rest.trim().to_string();
            let href = format!("{base}{}", encode_slug(&rest));
            let shown = display.clone().unwrap_or_else(|| rest.clone());
            let link = Link {
                kind: LinkKind::Interwiki { target: rest, href },
                text: display,
            };
            return Some((shown, Some(link)));
        }
    }

    let shown = display.clone().unwrap_or_else(|| target.clone());
    let link = Link {
        kind: LinkKind::Internal { target },
        text: display,
    };
    Some((shown, Some(link)))
}

fn interwiki_base(prefix: &str) -> Option<String> {
    if let Some((_, base)) = INTERWIKI_BASES.iter().find(|(key, _)| *key == prefix) {
        return Some((*base).to_string());
    }
    if INTERWIKI_LANGUAGES.contains(&prefix) {
        return Some(format!("https://{prefix}.wikipedia.org/wiki/"));
    }
    None
}

/// One `[url text]` external link.
fn parse_external_link(inner: &str) -> Option<(String, Link)> {
    let inner = inner.trim();
    let (url, label) = match inner.split_once(char::is_whitespace) {
        Some((url, label)) => (url.trim(), Some(label.trim().to_string())),
        None => (inner, None),
    };
    let label = label.filter(|value| !value.is_empty());
    if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//")) {
        return None;
    }
    let shown = label.clone().unwrap_or_default();
    let link = Link {
        kind: LinkKind::External {
            url: url.to_string(),
        },
        text: label,
    };
    Some((shown, link))
}

/// One `[[File:...]]` line: file name, caption, alt text and thumbnail URL.
fn parse_image(line: &str, language: &str) -> Option<Image> {
    let inner = line.trim().strip_prefix("[[")?.strip_suffix("]]")?;
    let segments = split_pipes(inner);
    let (first, rest) = segments.split_first()?;
    let file = first.split_once(':').map(|(_, name)| name.trim())?;
    if file.is_empty() {
        return None;
    }

    let mut caption = None;
    let mut alt = None;
    for segment in rest {
        let segment = segment.trim();
        if segment.is_empty() || is_image_attribute(segment) {
            continue;
        }
        if let Some(value) = segment.strip_prefix("alt=") {
            let value = value.trim();
            if !value.is_empty() {
                alt = Some(value.to_string());
            }
            continue;
        }
        let text = plain_text(segment);
        if !text.is_empty() {
            caption = Some(text);
        }
    }

    Some(Image {
        file: file.to_string(),
        caption,
        alt,
        thumbnail: thumbnail_url(language, file),
    })
}

fn is_image_attribute(segment: &str) -> bool {
    let lowered = segment.to_lowercase();
    IMAGE_ATTRIBUTES.contains(&lowered.as_str())
        || lowered.ends_with("px")
        || IMAGE_ATTRIBUTE_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
}

/// Split on `|` outside bracketed regions.
fn split_pipes(inner: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in inner.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = (depth - 1).max(0);
                current.push(ch);
            }
            '|' if depth == 0 => {
                segments.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}
