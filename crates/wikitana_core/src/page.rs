use std::collections::BTreeSet;

/// A parsed article: identity, title, and the section tree.
///
/// Pages are immutable once built; the crawl engine keys them by `id` and the
/// converter reads them without further normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    pub title: String,
    pub language: String,
    pub sections: Vec<Section>,
}

/// One section of an article.
///
/// `index` is the document-order position across the whole page (the lead
/// section is 0). `indentation` is the heading depth: the lead section and
/// `== Heading ==` sections sit at 0, `=== Subheading ===` at 1, and so on.
/// `children` holds nested subsections in document order; a child's
/// indentation can exceed the parent's by more than one when the source
/// skips heading levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub indentation: u32,
    pub title: Option<String>,
    pub paragraphs: Vec<Paragraph>,
    pub children: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    pub sentences: Vec<Sentence>,
    pub images: Vec<Image>,
}

/// A sentence with its markup stripped out into side tables.
///
/// `text` is the display text; `bolds` and `italics` hold the span contents
/// and `links` the extracted links, each to be re-injected by the converter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub bolds: Vec<String>,
    pub italics: Vec<String>,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    /// Display text, when it differs from the target.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Link to another article in the same wiki.
    Internal { target: String },
    /// Plain external URL.
    External { url: String },
    /// Link into a sibling wiki, already resolved to a full href.
    Interwiki { target: String, href: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub file: String,
    pub caption: Option<String>,
    pub alt: Option<String>,
    pub thumbnail: String,
}

impl Page {
    /// Distinct internal link targets across the whole page.
    ///
    /// External and interwiki links are excluded, as are links without a
    /// resolvable target title. The ordered set keeps crawl frontiers
    /// reproducible.
    pub fn link_targets(&self) -> BTreeSet<String> {
        let mut targets = BTreeSet::new();
        let mut stack: Vec<&Section> = self.sections.iter().collect();
        while let Some(section) = stack.pop() {
            for paragraph in &section.paragraphs {
                for sentence in &paragraph.sentences {
                    for link in &sentence.links {
                        if let LinkKind::Internal { target } = &link.kind
                            && !target.is_empty()
                        {
                            targets.insert(target.clone());
                        }
                    }
                }
            }
            stack.extend(section.children.iter());
        }
        targets
    }
}

impl Link {
    pub fn internal(target: impl Into<String>, text: Option<String>) -> Self {
        Self {
            kind: LinkKind::Internal {
                target: target.into(),
            },
            text,
        }
    }

    pub fn external(url: impl Into<String>, text: Option<String>) -> Self {
        Self {
            kind: LinkKind::External { url: url.into() },
            text,
        }
    }
}
