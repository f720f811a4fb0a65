use std::collections::BTreeSet;

use serde::Serialize;

use crate::crawl::CrawlResult;
use crate::page::{Image, Link, LinkKind, Page, Paragraph, Section, Sentence};
use crate::text::smart_replace;
use crate::wikitext::article_url;

pub const FORMAT_VERSION: &str = "TanaIntermediateFile V0.1";
pub const WIKI_PAGE_SUPERTAG_UID: &str = "wiki-page";
pub const WIKI_PAGE_SUPERTAG_NAME: &str = "Wikipedia";

// pathological inputs only; real articles nest a handful of levels deep
const MAX_SECTION_DEPTH: u32 = 64;

/// Identifier generator for paragraph and image nodes.
///
/// Injected so conversion is deterministic under test; production uses
/// [`RandomUids`]. Page-root and section uids are derived, not generated.
pub trait UidSource {
    fn uid(&mut self) -> String;
}

/// Process-wide random UUID source.
pub struct RandomUids;

impl UidSource for RandomUids {
    fn uid(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Tana Intermediate File, version 0.1.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub version: &'static str,
    pub summary: Summary,
    pub supertags: Vec<Supertag>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub leaf_nodes: usize,
    pub top_level_nodes: usize,
    pub total_nodes: usize,
    pub fields: usize,
    pub calendar_nodes: usize,
    pub broken_refs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Supertag {
    pub uid: String,
    pub name: String,
}

/// One node of the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    #[serde(rename = "node")]
    Branch {
        uid: String,
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        supertags: Vec<String>,
        children: Vec<Node>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        refs: Vec<String>,
    },
    #[serde(rename = "image")]
    Image {
        uid: String,
        name: String,
        #[serde(rename = "mediaUrl")]
        media_url: String,
    },
}

impl Node {
    fn is_empty(&self) -> bool {
        match self {
            Node::Branch { name, children, .. } => name.is_empty() && children.is_empty(),
            Node::Image {
                name, media_url, ..
            } => name.is_empty() && media_url.is_empty(),
        }
    }

    fn descendants(&self) -> usize {
        match self {
            Node::Branch { children, .. } => {
                children.iter().map(|child| 1 + child.descendants()).sum()
            }
            Node::Image { .. } => 0,
        }
    }
}

/// Convert a crawl result into a Tana document.
///
/// Page roots are emitted in page-id order; the crawl's page map is
/// unordered and a stable document makes runs comparable.
pub fn convert(result: &CrawlResult, uids: &mut dyn UidSource) -> Document {
    let mut pages: Vec<&Page> = result.pages.values().collect();
    pages.sort_by_key(|page| page.id);

    let nodes: Vec<Node> = pages
        .into_iter()
        .map(|page| convert_page(page, result, uids))
        .collect();

    Document {
        version: FORMAT_VERSION,
        summary: summarize(&nodes),
        supertags: vec![Supertag {
            uid: WIKI_PAGE_SUPERTAG_UID.to_string(),
            name: WIKI_PAGE_SUPERTAG_NAME.to_string(),
        }],
        nodes,
    }
}

fn summarize(nodes: &[Node]) -> Summary {
    let top_level_nodes = nodes.len();
    let leaf_nodes: usize = nodes.iter().map(Node::descendants).sum();
    Summary {
        leaf_nodes,
        top_level_nodes,
        total_nodes: top_level_nodes + leaf_nodes,
        fields: 0,
        calendar_nodes: 0,
        broken_refs: 0,
    }
}

fn convert_page(page: &Page, result: &CrawlResult, uids: &mut dyn UidSource) -> Node {
    let mut children = Vec::new();
    for section in page.sections.iter().filter(|s| s.indentation == 0) {
        children.extend(convert_section(page, section, result, uids, 0));
    }

    Node::Branch {
        uid: page.id.to_string(),
        name: format!("**{}**", page.title),
        supertags: vec![WIKI_PAGE_SUPERTAG_UID.to_string()],
        children,
        refs: Vec::new(),
    }
}

/// Convert one section. Untitled sections contribute their children
/// directly; titled sections wrap them in a node with a uid derived from
/// `(pageId, sectionIndex, indentation)`.
///
/// Only children exactly one indentation level deeper are attached here;
/// a section whose heading skips levels mirrors the source and stays
/// unattached.
fn convert_section(
    page: &Page,
    section: &Section,
    result: &CrawlResult,
    uids: &mut dyn UidSource,
    depth: u32,
) -> Vec<Node> {
    if depth > MAX_SECTION_DEPTH {
        return Vec::new();
    }

    let mut children: Vec<Node> = section
        .paragraphs
        .iter()
        .map(|paragraph| convert_paragraph(page, paragraph, result, uids))
        .collect();
    for child in &section.children {
        if child.indentation == section.indentation + 1 {
            children.extend(convert_section(page, child, result, uids, depth + 1));
        }
    }
    children.retain(|node| !node.is_empty());

    match &section.title {
        None => children,
        Some(title) => vec![Node::Branch {
            uid: format!("{}-{}-{}", page.id, section.index, section.indentation),
            name: format!("**{title}**"),
            supertags: Vec::new(),
            children,
            refs: Vec::new(),
        }],
    }
}

fn convert_paragraph(
    page: &Page,
    paragraph: &Paragraph,
    result: &CrawlResult,
    uids: &mut dyn UidSource,
) -> Node {
    let mut images: Vec<Node> = paragraph
        .images
        .iter()
        .map(|image| convert_image(image, uids))
        .collect();

    let mut texts = Vec::new();
    let mut refs = BTreeSet::new();
    for sentence in &paragraph.sentences {
        let converted = convert_sentence(page, sentence, result);
        if !converted.text.is_empty() {
            texts.push(converted.text);
            refs.extend(converted.refs);
        }
    }

    // a caption-only paragraph promotes to its image, skipping the wrapper
    if texts.is_empty() && images.len() == 1 {
        return images.remove(0);
    }

    Node::Branch {
        uid: uids.uid(),
        name: texts.join("\n"),
        supertags: Vec::new(),
        children: images,
        refs: refs.into_iter().collect(),
    }
}

fn convert_image(image: &Image, uids: &mut dyn UidSource) -> Node {
    let name = image
        .caption
        .clone()
        .filter(|caption| !caption.is_empty())
        .or_else(|| image.alt.clone().filter(|alt| !alt.is_empty()))
        .unwrap_or_else(|| "image".to_string());
    Node::Image {
        uid: uids.uid(),
        name,
        media_url: image.thumbnail.clone(),
    }
}

struct ConvertedSentence {
    text: String,
    refs: Vec<String>,
}

/// Re-inject markup into the sentence text: bolds, then italics, then
/// links, each rewriting the running text in place.
fn convert_sentence(page: &Page, sentence: &Sentence, result: &CrawlResult) -> ConvertedSentence {
    let mut text = sentence.text.clone();
    for bold in &sentence.bolds {
        text = smart_replace(&text, bold, &format!("**{bold}**"));
    }
    for italic in &sentence.italics {
        text = smart_replace(&text, italic, &format!("__{italic}__"));
    }

    let mut refs = Vec::new();
    for link in &sentence.links {
        let rendered = render_link(page, link, result);
        text = smart_replace(&text, link_display(link), &rendered.text);
        if let Some(reference) = rendered.reference {
            refs.push(reference);
        }
    }

    ConvertedSentence { text, refs }
}

/// The text a link occupies in the stripped sentence; this is the
/// substitution target.
fn link_display(link: &Link) -> &str {
    if let Some(text) = &link.text {
        return text;
    }
    match &link.kind {
        LinkKind::Internal { target } | LinkKind::Interwiki { target, .. } => target,
        LinkKind::External { .. } => "",
    }
}

struct RenderedLink {
    text: String,
    reference: Option<String>,
}

fn render_link(page: &Page, link: &Link, result: &CrawlResult) -> RenderedLink {
    match &link.kind {
        LinkKind::External { url } => RenderedLink {
            text: format!("[{}]({url})", link.text.as_deref().unwrap_or_default()),
            reference: None,
        },
        LinkKind::Interwiki { target, href } => RenderedLink {
            text: format!("[{}]({href})", link.text.as_deref().unwrap_or(target)),
            reference: None,
        },
        LinkKind::Internal { target } => {
            let resolved = result
                .references
                .get(target)
                .and_then(|id| id.as_ref())
                .and_then(|id| result.pages.get(id));

            match resolved {
                None => RenderedLink {
                    text: format!(
                        "[{}]({})",
                        link.text.as_deref().unwrap_or(target),
                        article_url(&page.language, target)
                    ),
                    reference: None,
                },
                Some(target_page) => {
                    let reference = target_page.id.to_string();
                    let alias = link
                        .text
                        .as_deref()
                        .filter(|text| *text != target_page.title);
                    let text = match alias {
                        Some(alias) => format!("[{alias}]([[{reference}]])"),
                        None => format!("[[{reference}]]"),
                    };
                    RenderedLink {
                        text,
                        reference: Some(reference),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        FORMAT_VERSION, Node, UidSource, WIKI_PAGE_SUPERTAG_UID, convert,
    };
    use crate::crawl::CrawlResult;
    use crate::page::{Image, Link, Page, Paragraph, Section, Sentence};

    /// Deterministic uid source for structural assertions.
    #[derive(Default)]
    struct SequentialUids(usize);

    impl UidSource for SequentialUids {
        fn uid(&mut self) -> String {
            self.0 += 1;
            format!("uid-{}", self.0)
        }
    }

    fn sentence(text: &str) -> Sentence {
        Sentence {
            text: text.to_string(),
            ..Sentence::default()
        }
    }

    fn section(
        index: usize,
        indentation: u32,
        title: Option<&str>,
        paragraphs: Vec<Paragraph>,
        children: Vec<Section>,
    ) -> Section {
        Section {
            index,
            indentation,
            title: title.map(str::to_string),
            paragraphs,
            children,
        }
    }

    fn paragraph(sentences: Vec<Sentence>) -> Paragraph {
        Paragraph {
            sentences,
            images: Vec::new(),
        }
    }

    fn page(id: i64, title: &str, sections: Vec<Section>) -> Page {
        Page {
            id,
            title: title.to_string(),
            language: "en".to_string(),
            sections,
        }
    }

    fn singleton(page_value: Page) -> CrawlResult {
        let mut references = HashMap::new();
        references.insert(page_value.title.clone(), Some(page_value.id));
        let mut pages = HashMap::new();
        pages.insert(page_value.id, page_value);
        CrawlResult { pages, references }
    }

    fn branch_fields(node: &Node) -> (&str, &str, &[Node], &[String]) {
        match node {
            Node::Branch {
                uid,
                name,
                children,
                refs,
                ..
            } => (uid, name, children, refs),
            Node::Image { .. } => panic!("expected branch node"),
        }
    }

    #[test]
    fn page_root_carries_identity_and_supertag() {
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(
                0,
                0,
                None,
                vec![paragraph(vec![sentence("Hello.")])],
                Vec::new(),
            )],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        assert_eq!(document.version, FORMAT_VERSION);
        assert_eq!(document.supertags.len(), 1);
        assert_eq!(document.supertags[0].uid, WIKI_PAGE_SUPERTAG_UID);

        let root = &document.nodes[0];
        let (uid, name, children, _) = branch_fields(root);
        assert_eq!(uid, "7");
        assert_eq!(name, "**Alpha**");
        assert_eq!(children.len(), 1);
        match root {
            Node::Branch { supertags, .. } => {
                assert_eq!(supertags, &vec![WIKI_PAGE_SUPERTAG_UID.to_string()]);
            }
            Node::Image { .. } => unreachable!(),
        }
    }

    #[test]
    fn section_uids_are_derived_and_untitled_sections_flatten() {
        let inner = section(
            1,
            1,
            Some("History"),
            vec![paragraph(vec![sentence("Old.")])],
            Vec::new(),
        );
        let lead = section(
            0,
            0,
            None,
            vec![paragraph(vec![sentence("Lead text.")])],
            vec![inner],
        );
        let result = singleton(page(7, "Alpha", vec![lead]));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);

        // the untitled lead flattened: its paragraph and the wrapped child
        assert_eq!(children.len(), 2);
        let (uid, name, _, _) = branch_fields(&children[1]);
        assert_eq!(uid, "7-1-1");
        assert_eq!(name, "**History**");
    }

    #[test]
    fn level_skipping_sections_are_not_attached() {
        let skipping = section(
            1,
            2,
            Some("Deep"),
            vec![paragraph(vec![sentence("Too deep.")])],
            Vec::new(),
        );
        let lead = section(
            0,
            0,
            None,
            vec![paragraph(vec![sentence("Lead.")])],
            vec![skipping],
        );
        let result = singleton(page(7, "Alpha", vec![lead]));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        assert_eq!(children.len(), 1); // only the lead paragraph
    }

    #[test]
    fn empty_nodes_are_filtered() {
        let empty_section = section(1, 1, None, vec![paragraph(vec![sentence("")])], Vec::new());
        let titled = section(
            0,
            0,
            Some("Things"),
            vec![paragraph(Vec::new())],
            vec![empty_section],
        );
        let result = singleton(page(7, "Alpha", vec![titled]));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        // the titled wrapper survives (it has a name) with no children
        assert_eq!(children.len(), 1);
        let (_, name, inner, _) = branch_fields(&children[0]);
        assert_eq!(name, "**Things**");
        assert!(inner.is_empty());
    }

    #[test]
    fn caption_only_paragraph_promotes_to_image_node() {
        let image = Image {
            file: "Lone.jpg".to_string(),
            caption: Some("A caption".to_string()),
            alt: None,
            thumbnail: "https://example.org/lone.jpg".to_string(),
        };
        let para = Paragraph {
            sentences: Vec::new(),
            images: vec![image],
        };
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![para], Vec::new())],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        match &children[0] {
            Node::Image {
                name, media_url, ..
            } => {
                assert_eq!(name, "A caption");
                assert_eq!(media_url, "https://example.org/lone.jpg");
            }
            Node::Branch { .. } => panic!("expected promoted image node"),
        }
    }

    #[test]
    fn image_name_falls_back_to_alt_then_placeholder() {
        let alt_only = Image {
            file: "a.jpg".to_string(),
            caption: None,
            alt: Some("Alt text".to_string()),
            thumbnail: "https://example.org/a.jpg".to_string(),
        };
        let bare = Image {
            file: "b.jpg".to_string(),
            caption: None,
            alt: None,
            thumbnail: "https://example.org/b.jpg".to_string(),
        };
        let para = Paragraph {
            sentences: Vec::new(),
            images: vec![alt_only, bare],
        };
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![para], Vec::new())],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        // two images: no promotion, the wrapper keeps them as children
        let (_, _, images, _) = branch_fields(&children[0]);
        match (&images[0], &images[1]) {
            (Node::Image { name: first, .. }, Node::Image { name: second, .. }) => {
                assert_eq!(first, "Alt text");
                assert_eq!(second, "image");
            }
            _ => panic!("expected two image nodes"),
        }
    }

    #[test]
    fn bold_annotation_wraps_first_word_boundary_match() {
        let mut s = sentence("cat sat on the cat mat");
        s.bolds.push("cat".to_string());
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![paragraph(vec![s])], Vec::new())],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        let (_, name, _, _) = branch_fields(&children[0]);
        assert_eq!(name, "**cat** sat on the cat mat");
    }

    #[test]
    fn resolved_links_become_refs_and_node_references() {
        let mut s = sentence("Alpha borders Beta today.");
        s.links.push(Link::internal("Beta", None));

        let beta = page(9, "Beta", Vec::new());
        let alpha = page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![paragraph(vec![s])], Vec::new())],
        );

        let mut pages = HashMap::new();
        pages.insert(7, alpha);
        pages.insert(9, beta);
        let mut references = HashMap::new();
        references.insert("Alpha".to_string(), Some(7));
        references.insert("Beta".to_string(), Some(9));
        let result = CrawlResult { pages, references };

        let document = convert(&result, &mut SequentialUids::default());
        // nodes sorted by page id: Alpha (7) first
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        let (_, name, _, refs) = branch_fields(&children[0]);
        assert_eq!(name, "Alpha borders [[9]] today.");
        assert_eq!(refs, &["9".to_string()]);
    }

    #[test]
    fn aliased_links_render_with_display_text() {
        let mut s = sentence("See the French republic here.");
        s.links
            .push(Link::internal("France", Some("French republic".to_string())));

        let france = page(11, "France", Vec::new());
        let alpha = page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![paragraph(vec![s])], Vec::new())],
        );

        let mut pages = HashMap::new();
        pages.insert(7, alpha);
        pages.insert(11, france);
        let mut references = HashMap::new();
        references.insert("France".to_string(), Some(11));
        let result = CrawlResult { pages, references };

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        let (_, name, _, refs) = branch_fields(&children[0]);
        assert_eq!(name, "See the [French republic]([[11]]) here.");
        assert_eq!(refs, &["11".to_string()]);
    }

    #[test]
    fn unresolved_links_render_as_article_urls() {
        let mut s = sentence("Mentions Zeta only.");
        s.links.push(Link::internal("Zeta", None));
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![paragraph(vec![s])], Vec::new())],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        let (_, name, _, refs) = branch_fields(&children[0]);
        assert_eq!(
            name,
            "Mentions [Zeta](https://en.wikipedia.org/wiki/Zeta) only."
        );
        assert!(refs.is_empty());
    }

    #[test]
    fn absent_reference_entries_render_as_article_urls() {
        // the title was attempted during the crawl and recorded absent
        let mut s = sentence("Mentions Ghost here.");
        s.links.push(Link::internal("Ghost", None));
        let mut result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![paragraph(vec![s])], Vec::new())],
        ));
        result.references.insert("Ghost".to_string(), None);

        let document = convert(&result, &mut SequentialUids::default());
        let (_, _, children, _) = branch_fields(&document.nodes[0]);
        let (_, name, _, refs) = branch_fields(&children[0]);
        assert_eq!(
            name,
            "Mentions [Ghost](https://en.wikipedia.org/wiki/Ghost) here."
        );
        assert!(refs.is_empty());
    }

    #[test]
    fn summary_counts_descendants_not_tree_leaves() {
        let inner = section(
            1,
            1,
            Some("Inner"),
            vec![paragraph(vec![sentence("Deep.")])],
            Vec::new(),
        );
        let lead = section(
            0,
            0,
            None,
            vec![paragraph(vec![sentence("Top.")])],
            vec![inner],
        );
        let result = singleton(page(7, "Alpha", vec![lead]));

        let document = convert(&result, &mut SequentialUids::default());
        // root -> [paragraph, section -> [paragraph]]
        assert_eq!(document.summary.top_level_nodes, 1);
        assert_eq!(document.summary.leaf_nodes, 3);
        assert_eq!(document.summary.total_nodes, 4);
        assert_eq!(document.summary.fields, 0);
        assert_eq!(document.summary.calendar_nodes, 0);
        assert_eq!(document.summary.broken_refs, 0);
    }

    #[test]
    fn conversion_is_structurally_idempotent() {
        let mut s = sentence("Alpha links Beta once.");
        s.links.push(Link::internal("Beta", None));
        s.bolds.push("Alpha".to_string());

        let beta = page(9, "Beta", Vec::new());
        let alpha = page(
            7,
            "Alpha",
            vec![section(
                0,
                0,
                Some("Lead"),
                vec![paragraph(vec![s])],
                Vec::new(),
            )],
        );

        let mut pages = HashMap::new();
        pages.insert(7, alpha);
        pages.insert(9, beta);
        let mut references = HashMap::new();
        references.insert("Alpha".to_string(), Some(7));
        references.insert("Beta".to_string(), Some(9));
        let result = CrawlResult { pages, references };

        let first = convert(&result, &mut SequentialUids::default());
        let second = convert(&result, &mut SequentialUids::default());
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.nodes, second.nodes);
    }

    #[test]
    fn serialized_nodes_are_tagged_variants() {
        let image = Image {
            file: "x.jpg".to_string(),
            caption: Some("Cap".to_string()),
            alt: None,
            thumbnail: "https://example.org/x.jpg".to_string(),
        };
        let para = Paragraph {
            sentences: Vec::new(),
            images: vec![image],
        };
        let result = singleton(page(
            7,
            "Alpha",
            vec![section(0, 0, None, vec![para], Vec::new())],
        ));

        let document = convert(&result, &mut SequentialUids::default());
        let value = serde_json::to_value(&document).expect("serialize");

        assert_eq!(value["version"], "TanaIntermediateFile V0.1");
        assert_eq!(value["nodes"][0]["type"], "node");
        assert_eq!(value["nodes"][0]["uid"], "7");
        assert_eq!(value["nodes"][0]["supertags"][0], "wiki-page");
        let image_node = &value["nodes"][0]["children"][0];
        assert_eq!(image_node["type"], "image");
        assert_eq!(image_node["mediaUrl"], "https://example.org/x.jpg");
        assert_eq!(image_node["name"], "Cap");
        // image nodes never carry children or refs
        assert!(image_node.get("children").is_none());
        // summary keys are camel-cased
        assert!(value["summary"].get("topLevelNodes").is_some());
        assert!(value["summary"].get("leafNodes").is_some());
    }
}
