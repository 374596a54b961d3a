//! Question clustering, keyword extraction and conversation pairing.
//!
//! Similarity between two questions blends three measures over the normalized
//! text: token Jaccard (0.4), term-count cosine (0.4) and character
//! Levenshtein (0.2).

use crate::models::{
    ConversationMessage, NormalizedItem, PatternMatch, PatternSource, QuestionAnswerPair,
    SenderType,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

const MAX_KEYWORDS: usize = 15;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static QUESTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\?$",
        r"^(how|what|when|where|why|who|which|can|could|would|should|is|are|do|does|did)\s",
        r"(help|problem|issue|trouble|error)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});
static ANSWER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(you can|try|here's how|to do this|follow these|solution|resolve)",
        r"(step|first|then|next|finally)",
        r"(should|will|need to|have to)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "up", "about", "into", "through", "during", "before", "after", "above", "below",
        "between", "among", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "can", "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
        "me", "him", "her", "us", "them", "my", "your", "our", "how", "what", "why", "when",
        "where", "which", "who",
    ]
    .into_iter()
    .collect()
});

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "authentication",
        &["password", "login", "log in", "sign in", "account", "username"],
    ),
    (
        "billing",
        &["payment", "invoice", "billing", "subscription", "price", "refund"],
    ),
    (
        "technical",
        &["error", "bug", "not working", "broken", "issue", "crash"],
    ),
    ("account", &["profile", "settings", "preferences", "update"]),
];

/// Lowercase, punctuation to spaces, whitespace collapsed
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, " ");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// First 16 hex chars of SHA-256 over the normalized text
pub fn pattern_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_text(text).as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn is_question(text: &str) -> bool {
    if text.chars().count() < 5 {
        return false;
    }
    let lower = text.trim().to_lowercase();
    QUESTION_PATTERNS.iter().any(|p| p.is_match(&lower))
}

pub fn is_answer(text: &str) -> bool {
    if text.chars().count() < 10 {
        return false;
    }
    let lower = text.to_lowercase();
    ANSWER_PATTERNS.iter().any(|p| p.is_match(&lower))
}

fn content_words(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .filter(|w| w.chars().count() > 2)
        .filter(|w| !STOP_WORDS.contains(w))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Ranked single words and 2/3-grams; n-grams weigh 1.5x
pub fn extract_keywords(text: &str) -> Vec<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Vec::new();
    }
    let words = content_words(&normalized);
    let text_length = normalized.split(' ').count().max(1) as f64;

    // Insertion order keeps ties stable
    let mut terms: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut add = |term: String| {
        let count = counts.entry(term.clone()).or_insert(0);
        if *count == 0 {
            terms.push(term);
        }
        *count += 1;
    };

    for word in &words {
        add(word.to_string());
    }
    for n in [2usize, 3] {
        for window in words.windows(n) {
            let ngram = window.join(" ");
            if ngram.chars().count() > 5 {
                add(ngram);
            }
        }
    }

    let mut scored: Vec<(usize, String, f64)> = terms
        .into_iter()
        .enumerate()
        .map(|(order, term)| {
            let mut score = counts[&term] as f64 / text_length;
            if term.contains(' ') {
                score *= 1.5;
            }
            (order, term, score)
        })
        .collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));

    scored
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(_, term, _)| term)
        .collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split(' ').collect();
    let set_b: HashSet<&str> = b.split(' ').collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

fn cosine(a: &str, b: &str) -> f64 {
    let mut vectors: HashMap<&str, (f64, f64)> = HashMap::new();
    for word in a.split(' ') {
        vectors.entry(word).or_default().0 += 1.0;
    }
    for word in b.split(' ') {
        vectors.entry(word).or_default().1 += 1.0;
    }
    let dot: f64 = vectors.values().map(|(x, y)| x * y).sum();
    let norm_a = vectors.values().map(|(x, _)| x * x).sum::<f64>().sqrt();
    let norm_b = vectors.values().map(|(_, y)| y * y).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Blended similarity in 0..=1
pub fn calculate_similarity(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }
    let (a, b) = (normalize_text(a), normalize_text(b));
    jaccard(&a, &b) * 0.4 + cosine(&a, &b) * 0.4 + levenshtein_similarity(&a, &b) * 0.2
}

/// First category whose keywords appear in the combined text, else `general`
pub fn infer_category<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
    let combined = texts
        .into_iter()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
        .map(|(category, _)| category.to_string())
        .unwrap_or_else(|| "general".to_string())
}

/// Greedy single-pass clustering: each unassigned question seeds a group and
/// absorbs every later unassigned question at or above `threshold`.
/// Returns groups of indices, largest first.
pub fn group_similar_questions(questions: &[&str], threshold: f64) -> Vec<Vec<usize>> {
    let mut assigned = vec![false; questions.len()];
    let mut groups = Vec::new();

    for i in 0..questions.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut group = vec![i];
        for j in (i + 1)..questions.len() {
            if !assigned[j] && calculate_similarity(questions[i], questions[j]) >= threshold {
                assigned[j] = true;
                group.push(j);
            }
        }
        groups.push(group);
    }

    groups.sort_by(|a, b| b.len().cmp(&a.len()));
    groups
}

fn common_keywords(questions: &[&str]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for question in questions {
        let unique: HashSet<String> = extract_keywords(question).into_iter().collect();
        for keyword in unique {
            let count = counts.entry(keyword.clone()).or_insert(0);
            if *count == 0 {
                order.push(keyword);
            }
            *count += 1;
        }
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));
    order
        .into_iter()
        .filter(|k| counts[k] > 1)
        .take(5)
        .collect()
}

/// Cluster a batch into patterns. Every item lands in exactly one pattern;
/// singletons are patterns with frequency 1.
pub fn identify_patterns(items: &[NormalizedItem], threshold: f64) -> Vec<PatternMatch> {
    let questions: Vec<&str> = items.iter().map(|i| i.question.as_str()).collect();

    group_similar_questions(&questions, threshold)
        .into_iter()
        .map(|group| {
            let members: Vec<&str> = group.iter().map(|&i| questions[i]).collect();
            let template = members
                .iter()
                .copied()
                .min_by_key(|q| q.chars().count())
                .unwrap_or_default()
                .to_string();

            let similarity = if members.len() > 1 {
                members[1..]
                    .iter()
                    .map(|q| calculate_similarity(members[0], q))
                    .sum::<f64>()
                    / (members.len() - 1) as f64
            } else {
                1.0
            };

            let mut keywords = common_keywords(&members);
            if keywords.is_empty() {
                keywords = extract_keywords(&template).into_iter().take(5).collect();
            }

            PatternMatch {
                pattern_hash: pattern_hash(&template),
                frequency: members.len(),
                similarity,
                keywords,
                category: infer_category(members.iter().copied()),
                sources: group
                    .iter()
                    .map(|&i| PatternSource {
                        source: items[i].source,
                        source_id: items[i].source_id,
                        item_id: items[i].id.clone(),
                    })
                    .collect(),
                template,
            }
        })
        .collect()
}

fn pair_confidence(question: &str, answer: &str) -> i32 {
    let mut confidence = 50;
    if is_question(question) {
        confidence += 20;
    }
    if is_answer(answer) {
        confidence += 20;
    }
    if (10..=200).contains(&question.chars().count()) {
        confidence += 5;
    }
    if (20..=1000).contains(&answer.chars().count()) {
        confidence += 5;
    }
    confidence.clamp(1, 100)
}

/// User question immediately followed by an agent or bot answer
pub fn identify_question_answer_pairs(messages: &[ConversationMessage]) -> Vec<QuestionAnswerPair> {
    messages
        .windows(2)
        .enumerate()
        .filter(|(_, w)| {
            w[0].sender == SenderType::User
                && w[1].sender.is_responder()
                && is_question(&w[0].content)
                && is_answer(&w[1].content)
        })
        .map(|(i, w)| {
            let context = messages[i.saturating_sub(3)..i]
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            QuestionAnswerPair {
                question: w[0].content.clone(),
                answer: w[1].content.clone(),
                confidence: pair_confidence(&w[0].content, &w[1].content),
                context: (!context.is_empty()).then_some(context),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, SourceMetadata};
    use chrono::Utc;
    use uuid::Uuid;

    fn item(id: &str, question: &str) -> NormalizedItem {
        NormalizedItem {
            id: id.to_string(),
            question: question.to_string(),
            answer: Some("Use the reset link on the login page.".to_string()),
            extraction_confidence: 80,
            source_id: Uuid::new_v4(),
            source: DataSource::Chat,
            context: None,
            category: "general".to_string(),
            metadata: SourceMetadata::at(Utc::now()),
        }
    }

    fn message(sender: SenderType, content: &str) -> ConversationMessage {
        ConversationMessage {
            content: content.to_string(),
            sender,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_and_hash() {
        assert_eq!(
            normalize_text("  How do I   RESET my password?! "),
            "how do i reset my password"
        );
        let hash = pattern_hash("How do I reset my password?");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, pattern_hash("how do i reset my password"));
        assert_ne!(hash, pattern_hash("how do i change my email"));
    }

    #[test]
    fn test_question_and_answer_detection() {
        assert!(is_question("How do I export invoices"));
        assert!(is_question("my printer shows an error"));
        assert!(is_question("Anyone there?"));
        assert!(!is_question("ok"));
        assert!(!is_question("thanks a lot"));

        assert!(is_answer("You can export them from the billing page."));
        assert!(is_answer("First open settings, then choose export."));
        assert!(!is_answer("ok thanks"));
    }

    #[test]
    fn test_extract_keywords_skips_stop_words_and_numbers() {
        let keywords = extract_keywords("How can I reset the password for account 12345?");
        assert!(keywords.contains(&"reset".to_string()));
        assert!(keywords.contains(&"password".to_string()));
        assert!(keywords.contains(&"reset password".to_string()));
        assert!(!keywords.iter().any(|k| k == "the" || k == "12345" || k == "can"));
        assert!(keywords.len() <= MAX_KEYWORDS);
    }

    #[test]
    fn test_similarity_bounds() {
        let same = calculate_similarity("How do I reset my password?", "how do i reset my password");
        assert!((same - 1.0).abs() < 1e-9);

        let unrelated = calculate_similarity("How do I reset my password?", "Where is my invoice");
        assert!(unrelated < 0.5);

        assert_eq!(calculate_similarity("", "anything"), 0.0);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_infer_category() {
        assert_eq!(infer_category(["I forgot my password"]), "authentication");
        assert_eq!(infer_category(["Where is my invoice?"]), "billing");
        assert_eq!(infer_category(["The app is broken"]), "technical");
        assert_eq!(infer_category(["Change notification preferences"]), "account");
        assert_eq!(infer_category(["What are your opening hours"]), "general");
    }

    #[test]
    fn test_identify_patterns_groups_paraphrases() {
        let items = vec![
            item("a", "How do I reset my password?"),
            item("b", "Where can I download my invoice?"),
            item("c", "How do I reset my password"),
            item("d", "how do i reset my password please?"),
        ];
        let patterns = identify_patterns(&items, 0.7);

        assert_eq!(patterns.len(), 2);
        let top = &patterns[0];
        assert_eq!(top.frequency, 3);
        assert_eq!(top.template, "How do I reset my password");
        assert_eq!(top.category, "authentication");
        assert!(top.covers("a") && top.covers("c") && top.covers("d"));
        assert!(top.keywords.contains(&"password".to_string()));
        assert_eq!(patterns[1].frequency, 1);
        assert!(patterns[1].covers("b"));
    }

    #[test]
    fn test_question_answer_pairs() {
        let messages = vec![
            message(SenderType::Bot, "Hi! How can I help you today?"),
            message(SenderType::User, "How do I change my billing address?"),
            message(
                SenderType::Agent,
                "You can change it under Settings, then Billing. Follow these steps.",
            ),
            message(SenderType::User, "thanks"),
            message(SenderType::Agent, "You're welcome"),
        ];

        let pairs = identify_question_answer_pairs(&messages);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "How do I change my billing address?");
        assert_eq!(pairs[0].confidence, 100);
        assert_eq!(
            pairs[0].context.as_deref(),
            Some("Hi! How can I help you today?")
        );
    }
}
