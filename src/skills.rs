//! Skill discovery with local-over-global precedence
//!
//! Skills are free-form markdown documents discovered across an ordered list
//! of roots: the first root is project-local, later roots are global. A
//! skill's relevance combines keyword overlap over the head of its content
//! with a filename-keyword boost; project-local skills get a multiplicative
//! bonus and strictly shadow global skills with the same file name.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bytes of skill content considered when scoring.
const SCORING_PREFIX_BYTES: usize = 500;

/// Multiplicative score bonus for project-local skills.
const LOCAL_BONUS: f64 = 1.10;

/// Additive boost when a keyword hits the file name (without learned weights).
const FILENAME_BOOST: f64 = 0.2;

/// Learned feature weights supplied by an external relevance-learning system.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceWeights {
    /// Weight applied to the keyword-overlap fraction
    pub keyword_match: f64,

    /// Weight applied to the filename-hit feature
    pub filename_match: f64,
}

/// Port to the privacy-preserving relevance-learning subsystem.
///
/// When absent (or disabled via `MNEMOSYNE_DISABLE_EVALUATION`), scoring
/// falls back to the fixed overlap + filename-boost formula.
pub trait RelevanceLearning: Send + Sync {
    fn weights(&self) -> RelevanceWeights;
}

/// A discovered skill with its relevance score.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub path: PathBuf,
    pub relevance_score: f64,
    pub keywords: Vec<String>,

    /// Categories derived from the file name
    pub categories: Vec<String>,
    pub source_dir: PathBuf,
    pub is_local: bool,
}

/// Skill discovery configuration.
#[derive(Clone)]
pub struct SkillIndexConfig {
    /// Ordered skill roots; the first is project-local
    pub skill_roots: Vec<PathBuf>,

    /// Matches below this score are discarded (default 0.60)
    pub relevance_threshold: f64,

    /// At most this many skills are returned (default 7)
    pub max_skills_loaded: usize,

    /// Apply the local-root bonus (default true)
    pub prioritize_local: bool,

    /// Optional learned-weight provider
    pub relevance_learning: Option<Arc<dyn RelevanceLearning>>,
}

impl std::fmt::Debug for SkillIndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillIndexConfig")
            .field("skill_roots", &self.skill_roots)
            .field("relevance_threshold", &self.relevance_threshold)
            .field("max_skills_loaded", &self.max_skills_loaded)
            .field("prioritize_local", &self.prioritize_local)
            .field("has_relevance_learning", &self.relevance_learning.is_some())
            .finish()
    }
}

impl Default for SkillIndexConfig {
    fn default() -> Self {
        Self {
            skill_roots: default_skill_roots(),
            relevance_threshold: 0.60,
            max_skills_loaded: 7,
            prioritize_local: true,
            relevance_learning: None,
        }
    }
}

/// Default skill roots: project-local first, then the global plugin set.
pub fn default_skill_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from(".claude/skills")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".claude/plugins/cc-polymath/skills"));
    }
    roots
}

/// Skill discovery engine.
pub struct SkillIndex {
    config: SkillIndexConfig,
}

impl SkillIndex {
    pub fn new(config: SkillIndexConfig) -> Self {
        Self { config }
    }

    /// Discover skills relevant to a task description.
    ///
    /// Enumerates every markdown skill under each existing root (skipping
    /// `_`-prefixed index files), scores each against keywords extracted
    /// from the task, dedups by file name with local shadowing global, and
    /// returns at most `max_skills_loaded` matches at or above the
    /// threshold, sorted by descending score.
    pub fn discover(&self, task_description: &str) -> Vec<SkillMatch> {
        let keywords = extract_keywords(task_description);
        debug!("Extracted keywords: {:?}", keywords);

        let mut matches: Vec<SkillMatch> = Vec::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for (root_index, root) in self.config.skill_roots.iter().enumerate() {
            let is_local = root_index == 0;

            if !root.is_dir() {
                debug!("Skill root not found: {}", root.display());
                continue;
            }

            let mut files = Vec::new();
            collect_skill_files(root, &mut files);

            for file in files {
                let Some(name) = file.file_name().and_then(|n| n.to_str()).map(String::from)
                else {
                    continue;
                };

                // Roots are scanned local-first, so an earlier match with the
                // same file name strictly shadows this one
                if seen_names.contains(&name) {
                    continue;
                }

                let mut score = self.score_skill(&file, &keywords);
                if is_local && self.config.prioritize_local {
                    score = (score * LOCAL_BONUS).min(1.0);
                }

                if score >= self.config.relevance_threshold {
                    let categories = extract_categories(&name);
                    seen_names.insert(name);
                    matches.push(SkillMatch {
                        path: file,
                        relevance_score: score,
                        keywords: keywords.clone(),
                        categories,
                        source_dir: root.clone(),
                        is_local,
                    });
                }
            }
        }

        matches.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.config.max_skills_loaded);

        info!(
            "Discovered {} relevant skills ({} local)",
            matches.len(),
            matches.iter().filter(|m| m.is_local).count()
        );

        matches
    }

    /// Score one skill file against the task keywords.
    ///
    /// Features: keyword-overlap fraction over the first ~500 bytes and a
    /// filename-keyword hit. With a relevance-learning port installed, the
    /// features are combined with learned weights; otherwise the filename
    /// hit adds a fixed boost.
    fn score_skill(&self, file: &Path, keywords: &[String]) -> f64 {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read skill {}: {}", file.display(), e);
                return 0.0;
            }
        };
        let head: String = content.chars().take(SCORING_PREFIX_BYTES).collect();
        let head = head.to_lowercase();

        let keyword_overlap = if keywords.is_empty() {
            0.0
        } else {
            keywords.iter().filter(|kw| head.contains(kw.as_str())).count() as f64
                / keywords.len() as f64
        };

        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let filename_hit = keywords.iter().any(|kw| stem.contains(kw.as_str()));

        let score = match &self.config.relevance_learning {
            Some(learning) => {
                let weights = learning.weights();
                keyword_overlap * weights.keyword_match
                    + if filename_hit { weights.filename_match } else { 0.0 }
            }
            None => keyword_overlap + if filename_hit { FILENAME_BOOST } else { 0.0 },
        };

        score.min(1.0)
    }

    /// Load a discovered skill's full content.
    pub fn load(&self, skill: &SkillMatch) -> std::io::Result<String> {
        fs::read_to_string(&skill.path)
    }
}

/// Recursively collect markdown skill files, skipping `_`-prefixed names.
fn collect_skill_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            collect_skill_files(&path, out);
        } else if path.extension().and_then(|s| s.to_str()) == Some("md") {
            let skip = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('_'))
                .unwrap_or(true);
            if !skip {
                out.push(path);
            }
        }
    }
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "with", "this",
        "that", "from", "into", "over",
    ]
    .into_iter()
    .collect()
});

/// Extract search keywords from a task description.
///
/// Lowercased words longer than three characters with stopwords removed,
/// capped at twenty, in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.len() <= 3 || STOPWORDS.contains(word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            keywords.push(word.to_string());
            if keywords.len() >= 20 {
                break;
            }
        }
    }

    keywords
}

/// Derive categories from a skill file name.
///
/// `skill-category-subcategory.md` yields `["category", "subcategory"]`.
fn extract_categories(filename: &str) -> Vec<String> {
    filename
        .trim_end_matches(".md")
        .split('-')
        .skip(1)
        .map(String::from)
        .collect()
}
