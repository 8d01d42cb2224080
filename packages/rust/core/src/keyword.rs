//! Keyword filter: case-insensitive substring match over title and abstract.

use paperfeeder_shared::Paper;
use tracing::{debug, info, instrument};

/// Include/exclude keyword policy.
///
/// A paper is kept when its title or abstract contains at least one include
/// keyword and none of the exclude keywords. An empty include list keeps
/// everything not excluded. Blank keywords are ignored.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    include: Vec<(String, String)>,
    exclude: Vec<String>,
}

impl KeywordFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let include = include
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| (k.to_string(), k.to_lowercase()))
            .collect();
        let exclude = exclude
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { include, exclude }
    }

    pub fn is_wildcard(&self) -> bool {
        self.include.is_empty()
    }

    /// The include keywords `paper` matches, or `None` when it is filtered out.
    pub fn matches(&self, paper: &Paper) -> Option<Vec<String>> {
        let haystack = format!("{}\n{}", paper.title(), paper.abstract_text()).to_lowercase();

        if let Some(hit) = self.exclude.iter().find(|k| haystack.contains(k.as_str())) {
            debug!(id = %paper.id(), keyword = %hit, "excluded by keyword");
            return None;
        }

        let matched: Vec<String> = self
            .include
            .iter()
            .filter(|(_, lower)| haystack.contains(lower.as_str()))
            .map(|(original, _)| original.clone())
            .collect();

        if matched.is_empty() && !self.is_wildcard() {
            return None;
        }
        Some(matched)
    }

    /// Keep matching papers in their original order, recording matched keywords.
    #[instrument(skip_all, fields(input = papers.len()))]
    pub fn apply(&self, papers: Vec<Paper>) -> Vec<Paper> {
        let out: Vec<Paper> = papers
            .into_iter()
            .filter_map(|mut paper| {
                let matched = self.matches(&paper)?;
                if let Err(e) = paper.set_matched_keywords(matched) {
                    debug!(error = %e, "keywords already recorded");
                }
                Some(paper)
            })
            .collect();
        info!(kept = out.len(), wildcard = self.is_wildcard(), "keyword filter applied");
        out
    }
}
