use std::collections::{BTreeSet, HashMap};

use crate::page::Page;
use crate::wikipedia::PageSource;

/// Inclusive crawl bounds. `max_depth = 0` or `max_size <= 1` collects only
/// the seed page.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_size: usize,
}

/// Why a frontier title resolved to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedResolution {
    /// The source returned no candidate page.
    Missing,
    /// The source returned more than one candidate page.
    Ambiguous(usize),
    /// The source failed outright (network or decode error).
    FetchFailed,
}

/// Observer for crawl side effects. Counts are monotonically increasing and
/// bounded by the limits; they feed progress reporting, never correctness.
pub trait CrawlProgress {
    fn page_collected(&mut self, _collected: usize, _max_size: usize) {}
    fn level_completed(&mut self, _depth: u32, _max_depth: u32) {}
    fn resolution_degraded(&mut self, _title: &str, _reason: DegradedResolution) {}
}

/// No-op observer.
pub struct NullProgress;

impl CrawlProgress for NullProgress {}

#[derive(Debug, Default)]
pub struct CrawlResult {
    /// Collected pages, keyed by page id.
    pub pages: HashMap<i64, Page>,
    /// Every title ever resolved during the crawl, mapped to the page id it
    /// resolved to (or `None`). Written once per title, never re-queried;
    /// this is what deduplicates fetch attempts across levels. Every
    /// `Some(id)` has a matching key in `pages`.
    pub references: HashMap<String, Option<i64>>,
}

/// Breadth-first bounded exploration from `seed`.
///
/// The frontier advances one depth level at a time; a level that would
/// overshoot `max_size` is cut short mid-iteration, so partial levels are
/// expected. Non-seed resolution failures degrade to an absent reference
/// and the crawl continues.
pub fn crawl(
    source: &mut dyn PageSource,
    seed: Page,
    limits: CrawlLimits,
    progress: &mut dyn CrawlProgress,
) -> CrawlResult {
    let mut frontier = seed.link_targets();
    let mut pages = HashMap::new();
    let mut references = HashMap::new();
    references.insert(seed.title.clone(), Some(seed.id));
    pages.insert(seed.id, seed);

    let mut depth = 0u32;
    while !frontier.is_empty() && depth < limits.max_depth && pages.len() < limits.max_size {
        let mut next = BTreeSet::new();

        for title in frontier {
            if pages.len() >= limits.max_size {
                break;
            }
            if references.contains_key(&title) {
                continue;
            }

            let page = resolve_one(source, &title, progress);
            references.insert(title, page.as_ref().map(|page| page.id));
            let Some(page) = page else {
                continue;
            };
            if pages.contains_key(&page.id) {
                // another title already resolved to this page
                continue;
            }

            for target in page.link_targets() {
                if !references.contains_key(&target) {
                    next.insert(target);
                }
            }
            pages.insert(page.id, page);
            progress.page_collected(pages.len(), limits.max_size);
        }

        if pages.len() >= limits.max_size {
            break;
        }
        depth += 1;
        frontier = next;
        progress.level_completed(depth, limits.max_depth);
    }

    CrawlResult { pages, references }
}

fn resolve_one(
    source: &mut dyn PageSource,
    title: &str,
    progress: &mut dyn CrawlProgress,
) -> Option<Page> {
    match source.resolve(title) {
        Ok(mut candidates) => match candidates.len() {
            0 => {
                progress.resolution_degraded(title, DegradedResolution::Missing);
                None
            }
            1 => candidates.pop(),
            count => {
                progress.resolution_degraded(title, DegradedResolution::Ambiguous(count));
                None
            }
        },
        Err(_) => {
            progress.resolution_degraded(title, DegradedResolution::FetchFailed);
            None
        }
    }
}
