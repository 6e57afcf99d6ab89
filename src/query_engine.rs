use std::collections::HashMap;
use std::sync::Arc;

use crate::analyzer::{TextAnalyzer, TextToken};
use crate::config::SearchConfig;
use crate::data_models::{Field, SearchResult};
use crate::db::{Database, PageRepo};
use crate::error::RelayError;

const SNIPPET_CHARS: usize = 200;
const KEYWORDS_PER_RESULT: i64 = 10;

pub fn intersect_two_postings<'a, T>(
    posting_list1: &'a [T],
    posting_list2: &'a [T],
    out: &mut Vec<T>,
) where
    T: Ord + Clone,
{
    let (mut p1i, mut p2i) = (0usize, 0usize);
    while p1i < posting_list1.len() && p2i < posting_list2.len() {
        match posting_list1[p1i].cmp(&posting_list2[p2i]) {
            std::cmp::Ordering::Equal => {
                out.push(posting_list1[p1i].clone());
                p1i += 1;
                p2i += 1;
            }
            std::cmp::Ordering::Less => p1i += 1,
            std::cmp::Ordering::Greater => p2i += 1,
        }
    }
}

/// Intersects sorted posting lists, starting from the shortest one.
pub fn intersect_postings<T>(posting_lists: &[&[T]]) -> Vec<T>
where
    T: Ord + Clone,
{
    if posting_lists.is_empty() {
        return Vec::new();
    }
    let mut smallest_idx = 0usize;
    for (idx, pl) in posting_lists.iter().enumerate() {
        if pl.len() < posting_lists[smallest_idx].len() {
            smallest_idx = idx;
        }
    }
    let mut result: Vec<T> = posting_lists[smallest_idx].to_vec();
    let mut scratch: Vec<T> = Vec::new();
    for (idx, pl) in posting_lists.iter().enumerate() {
        if idx == smallest_idx {
            continue;
        }
        scratch.clear();
        intersect_two_postings(&result, pl, &mut scratch);
        std::mem::swap(&mut result, &mut scratch);
        if result.is_empty() {
            break;
        }
    }

    result
}

/// A query split into quoted phrases and the free text around them.
///
/// Only closed quote pairs form phrases; a dangling `"` is left in the free
/// text, where the tokenizer drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub remainder: String,
}

impl ParsedQuery {
    pub fn parse(query: &str) -> ParsedQuery {
        let segments: Vec<&str> = query.split('"').collect();
        let mut phrases = Vec::new();
        let mut remainder = String::new();
        for (idx, segment) in segments.iter().enumerate() {
            let closed = idx + 1 < segments.len();
            if idx % 2 == 1 && closed {
                phrases.push(segment.to_string());
                remainder.push(' ');
            } else {
                if idx % 2 == 1 {
                    remainder.push('"');
                }
                remainder.push_str(segment);
            }
        }
        ParsedQuery { phrases, remainder }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub doc_id: i64,
    pub weight: f64,
}

/// In-memory vector space model over the keyword tables.
///
/// `tf(t,d) = title_boost * title_freq + body_freq`, weights are
/// `tf / max_tf(d) * ln(N / df(t))`, and postings are sorted by `doc_id`.
#[derive(Debug, Default)]
pub struct SearchIndex {
    postings: HashMap<String, Vec<Posting>>,
    idf: HashMap<String, f64>,
    doc_lengths: HashMap<i64, f64>,
    num_docs: usize,
}

impl SearchIndex {
    /// Builds the index from `(doc_id, term, tf)` triples. Docs listed in
    /// `doc_ids` count towards N even when they have no terms.
    pub fn from_term_frequencies(doc_ids: &[i64], tfs: HashMap<(i64, String), f64>) -> SearchIndex {
        let num_docs = doc_ids.len();

        let mut max_tf: HashMap<i64, f64> = HashMap::new();
        for ((doc_id, _), tf) in &tfs {
            let entry = max_tf.entry(*doc_id).or_insert(0.0);
            if *tf > *entry {
                *entry = *tf;
            }
        }

        let mut raw: HashMap<String, Vec<(i64, f64)>> = HashMap::new();
        for ((doc_id, term), tf) in tfs {
            raw.entry(term).or_default().push((doc_id, tf));
        }

        let mut idf = HashMap::with_capacity(raw.len());
        let mut postings = HashMap::with_capacity(raw.len());
        let mut squared: HashMap<i64, f64> = HashMap::new();
        for (term, mut docs) in raw {
            docs.sort_by_key(|(doc_id, _)| *doc_id);
            let term_idf = (num_docs.max(docs.len()) as f64 / docs.len() as f64).ln();
            let list: Vec<Posting> = docs
                .into_iter()
                .map(|(doc_id, tf)| {
                    let max = max_tf.get(&doc_id).copied().unwrap_or(1.0).max(f64::EPSILON);
                    let weight = tf / max * term_idf;
                    *squared.entry(doc_id).or_insert(0.0) += weight * weight;
                    Posting { doc_id, weight }
                })
                .collect();
            idf.insert(term.clone(), term_idf);
            postings.insert(term, list);
        }

        let doc_lengths = squared.into_iter().map(|(d, s)| (d, s.sqrt())).collect();

        SearchIndex {
            postings,
            idf,
            doc_lengths,
            num_docs,
        }
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn num_terms(&self) -> usize {
        self.postings.len()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn doc_ids_for(&self, term: &str) -> Vec<i64> {
        self.postings
            .get(term)
            .map(|list| list.iter().map(|p| p.doc_id).collect())
            .unwrap_or_default()
    }

    /// `qtf / max_qtf * idf` for each query term known to the index.
    pub fn query_vector(&self, terms: &[String]) -> HashMap<String, f64> {
        let mut qtf: HashMap<&str, f64> = HashMap::new();
        for term in terms {
            *qtf.entry(term.as_str()).or_insert(0.0) += 1.0;
        }
        let max_qtf = qtf.values().copied().fold(0.0_f64, f64::max).max(1.0);
        qtf.into_iter()
            .filter_map(|(term, tf)| self.idf(term).map(|idf| (term.to_string(), tf / max_qtf * idf)))
            .collect()
    }

    /// Cosine similarity of every document sharing a term with the query.
    /// Documents with a zero score are left out.
    pub fn cosine_scores(&self, query_vector: &HashMap<String, f64>) -> HashMap<i64, f64> {
        let query_length = query_vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if query_length == 0.0 {
            return HashMap::new();
        }

        let mut dots: HashMap<i64, f64> = HashMap::new();
        for (term, qw) in query_vector {
            if let Some(list) = self.postings.get(term) {
                for posting in list {
                    *dots.entry(posting.doc_id).or_insert(0.0) += qw * posting.weight;
                }
            }
        }

        dots.into_iter()
            .filter_map(|(doc_id, dot)| {
                let doc_length = self.doc_lengths.get(&doc_id).copied().unwrap_or(0.0);
                if doc_length == 0.0 {
                    return None;
                }
                let score = dot / (query_length * doc_length);
                (score > 0.0).then_some((doc_id, score))
            })
            .collect()
    }
}

/// Every document with a positive score, best first, plus the page of
/// results to return.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
}

pub struct QueryEngine {
    db: Database,
    pages_repo: PageRepo,
    analyzer: Arc<TextAnalyzer>,
    index: SearchIndex,
    config: SearchConfig,
}

impl QueryEngine {
    /// Loads the keyword tables and builds the in-memory index.
    pub async fn build(
        db: Database,
        analyzer: Arc<TextAnalyzer>,
        config: SearchConfig,
    ) -> Result<Self, RelayError> {
        let pages_repo = PageRepo::new(&db);
        let doc_ids = pages_repo.page_ids().await?;

        let mut tfs: HashMap<(i64, String), f64> = HashMap::new();
        for field in Field::ALL {
            let boost = match field {
                Field::Title => config.title_boost,
                Field::Body => 1.0,
            };
            for (doc_id, word, frequency) in pages_repo.term_frequencies(field).await? {
                *tfs.entry((doc_id, word)).or_insert(0.0) += boost * frequency as f64;
            }
        }

        let index = SearchIndex::from_term_frequencies(&doc_ids, tfs);
        log::info!(
            "Search index built: {} documents, {} terms",
            index.num_docs(),
            index.num_terms()
        );

        Ok(Self {
            db,
            pages_repo,
            analyzer,
            index,
            config,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Ranked `(doc_id, score)` pairs for every matching document.
    pub async fn rank(&self, query: &str) -> Result<Vec<(i64, f64)>, RelayError> {
        let parsed = ParsedQuery::parse(query);

        let mut terms: Vec<String> = self
            .analyzer
            .analyze(&parsed.remainder)
            .into_iter()
            .map(|t| t.term)
            .collect();
        let phrases: Vec<Vec<TextToken>> = parsed
            .phrases
            .iter()
            .map(|p| self.analyzer.analyze(p))
            .filter(|tokens| !tokens.is_empty())
            .collect();
        for phrase in &phrases {
            terms.extend(phrase.iter().map(|t| t.term.clone()));
        }

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.index.query_vector(&terms);
        let similarities = self.index.cosine_scores(&query_vector);

        let mut boosts: HashMap<i64, f64> = HashMap::new();
        for phrase in &phrases {
            let lists: Vec<Vec<i64>> = phrase.iter().map(|t| self.index.doc_ids_for(&t.term)).collect();
            let refs: Vec<&[i64]> = lists.iter().map(|l| l.as_slice()).collect();
            for doc_id in intersect_postings(&refs) {
                if !similarities.contains_key(&doc_id) {
                    continue;
                }
                let boost = self.phrase_boost(phrase, doc_id).await?;
                *boosts.entry(doc_id).or_insert(0.0) += boost;
            }
        }

        let mut ranked: Vec<(i64, f64)> = similarities
            .into_iter()
            .map(|(doc_id, sim)| {
                let boost = boosts.get(&doc_id).copied().unwrap_or(0.0);
                (doc_id, sim + sim * boost)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }

    /// `title_boost` if the phrase occurs in the title plus 1 if it occurs in the body.
    async fn phrase_boost(&self, phrase: &[TextToken], doc_id: i64) -> Result<f64, RelayError> {
        let mut boost = 0.0;
        for field in Field::ALL {
            if self.phrase_in_field(phrase, doc_id, field).await? {
                boost += match field {
                    Field::Title => self.config.title_boost,
                    Field::Body => 1.0,
                };
            }
        }
        Ok(boost)
    }

    async fn phrase_in_field(
        &self,
        phrase: &[TextToken],
        doc_id: i64,
        field: Field,
    ) -> Result<bool, RelayError> {
        let mut positions = Vec::with_capacity(phrase.len());
        for token in phrase {
            let list = self.pages_repo.positions(field, doc_id, &token.term).await?;
            if list.is_empty() {
                return Ok(false);
            }
            positions.push(list);
        }
        Ok(phrase_occurs(phrase, &positions))
    }

    pub async fn search(&self, query: &str) -> Result<SearchOutcome, RelayError> {
        let ranked = self.rank(query).await?;
        let total_results = ranked.len();

        let mut results = Vec::with_capacity(total_results.min(self.config.result_limit));
        for (doc_id, score) in ranked.into_iter().take(self.config.result_limit) {
            if let Some(result) = self.assemble(doc_id, score).await? {
                results.push(result);
            }
        }

        Ok(SearchOutcome {
            results,
            total_results,
        })
    }

    async fn assemble(&self, doc_id: i64, score: f64) -> Result<Option<SearchResult>, RelayError> {
        let Some(page) = self.pages_repo.find_by_id(doc_id).await? else {
            log::warn!("page {doc_id} is in the index but missing from the store");
            return Ok(None);
        };

        let keywords = self.pages_repo.top_keywords(doc_id, KEYWORDS_PER_RESULT).await?;
        let parent_links = self.pages_repo.parent_links(&page.url).await?;
        let child_links = self.pages_repo.child_links(&page.url).await?;

        let title = page
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "No Title".to_string());

        Ok(Some(SearchResult {
            id: page.id,
            score,
            title,
            url: page.url,
            snippet: snippet(page.content.as_deref().unwrap_or_default()),
            last_modified: page.last_modified,
            size: page.size.unwrap_or(0),
            keywords,
            parent_links,
            child_links,
        }))
    }
}

/// True when some start position has every phrase term at its offset from
/// the first term. Offsets come from token positions, so stop words removed
/// from the middle of a phrase still count as gaps.
pub fn phrase_occurs(phrase: &[TextToken], positions: &[Vec<i64>]) -> bool {
    let Some(first) = phrase.first() else {
        return false;
    };
    if positions.len() != phrase.len() {
        return false;
    }
    positions[0].iter().any(|start| {
        phrase.iter().zip(positions).skip(1).all(|(token, list)| {
            let offset = token.pos as i64 - first.pos as i64;
            list.binary_search(&(start + offset)).is_ok()
        })
    })
}

fn snippet(content: &str) -> String {
    let mut chars = content.char_indices();
    match chars.nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_two_postings() {
        let mut out = Vec::new();
        intersect_two_postings(&[2, 10, 45, 100, 1000], &[2, 20, 45, 1000], &mut out);
        assert_eq!(out, vec![2, 45, 1000]);

        let mut out = Vec::new();
        intersect_two_postings(&[100, 101, 102, 105], &[1, 2, 3, 4, 5], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_intersect_postings_multilist() {
        let l1 = vec![1u32, 2, 3, 4, 5, 8, 13, 21, 34, 55];
        let l2 = vec![2u32, 3, 5, 8, 13, 34, 89];
        let l3 = vec![3u32, 8, 34];
        let l4 = vec![0u32, 3, 8, 34, 144, 233];
        assert_eq!(
            intersect_postings(&[l1.as_slice(), l2.as_slice(), l3.as_slice(), l4.as_slice()]),
            vec![3u32, 8, 34]
        );

        let empty: Vec<u32> = vec![];
        assert!(intersect_postings(&[l1.as_slice(), empty.as_slice()]).is_empty());
        assert_eq!(intersect_postings(&[l3.as_slice()]), l3);
        assert!(intersect_postings::<u32>(&[]).is_empty());
    }

    #[test]
    fn test_parse_query_phrases() {
        let parsed = ParsedQuery::parse(r#"movie "hong kong" review"#);
        assert_eq!(parsed.phrases, vec!["hong kong".to_string()]);
        assert!(parsed.remainder.contains("movie"));
        assert!(parsed.remainder.contains("review"));
        assert!(!parsed.remainder.contains("hong"));
    }

    #[test]
    fn test_parse_query_unclosed_quote_is_free_text() {
        let parsed = ParsedQuery::parse(r#"rust "crab"#);
        assert!(parsed.phrases.is_empty());
        assert!(parsed.remainder.contains("crab"));

        let parsed = ParsedQuery::parse(r#""a b" "c"#);
        assert_eq!(parsed.phrases, vec!["a b".to_string()]);
        assert!(parsed.remainder.contains('c'));
    }

    fn tok(term: &str, pos: usize) -> TextToken {
        TextToken { term: term.to_string(), pos }
    }

    #[test]
    fn test_phrase_occurs_adjacent_and_with_gap() {
        let phrase = vec![tok("hong", 0), tok("kong", 1)];
        assert!(phrase_occurs(&phrase, &[vec![3, 10], vec![11]]));
        assert!(!phrase_occurs(&phrase, &[vec![3, 10], vec![5]]));

        // "art of war" with "of" removed keeps a gap of two
        let phrase = vec![tok("art", 0), tok("war", 2)];
        assert!(phrase_occurs(&phrase, &[vec![7], vec![9]]));
        assert!(!phrase_occurs(&phrase, &[vec![7], vec![8]]));
    }

    fn tf_map(entries: &[(i64, &str, f64)]) -> HashMap<(i64, String), f64> {
        entries
            .iter()
            .map(|(d, t, tf)| ((*d, t.to_string()), *tf))
            .collect()
    }

    #[test]
    fn test_idf_zero_for_terms_in_every_doc() {
        let index = SearchIndex::from_term_frequencies(
            &[1, 2],
            tf_map(&[(1, "rust", 1.0), (2, "rust", 2.0), (1, "crab", 1.0)]),
        );
        assert_eq!(index.idf("rust"), Some(0.0));
        assert!((index.idf("crab").unwrap() - 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_prefers_higher_weight() {
        let index = SearchIndex::from_term_frequencies(
            &[1, 2, 3],
            tf_map(&[
                (1, "rust", 3.0),
                (1, "crab", 1.0),
                (2, "rust", 1.0),
                (2, "ocean", 3.0),
                (3, "ocean", 1.0),
            ]),
        );
        let qv = index.query_vector(&["rust".to_string()]);
        let scores = index.cosine_scores(&qv);
        assert!(scores[&1] > scores[&2]);
        assert!(!scores.contains_key(&3));
    }

    #[test]
    fn test_query_vector_skips_unknown_terms() {
        let index = SearchIndex::from_term_frequencies(&[1, 2], tf_map(&[(1, "rust", 1.0)]));
        let qv = index.query_vector(&["rust".to_string(), "python".to_string()]);
        assert_eq!(qv.len(), 1);
        assert!(qv.contains_key("rust"));
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "é".repeat(250);
        let s = snippet(&long);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), 203);
        assert_eq!(snippet("short"), "short");
    }
}
