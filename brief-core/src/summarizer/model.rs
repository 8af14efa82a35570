use futures_util::stream::{self, BoxStream, StreamExt};

use super::SummaryLength;

/// Text-generation capability used to produce summaries.
///
/// `summarize` yields increasingly complete snapshots of the summary; the last
/// item is the final text. The stream may end without yielding anything.
pub trait LanguageModel: Send + Sync {
    fn is_available(&self) -> bool;

    fn summarize(&self, text: &str, length: SummaryLength) -> BoxStream<'static, String>;
}

/// Extractive model: keeps the lead sentences of the source text and streams
/// them out word by word.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadSentenceModel;

const HEADLINE_MAX_CHARS: usize = 160;

impl LeadSentenceModel {
    fn sentence_budget(length: SummaryLength) -> usize {
        match length {
            SummaryLength::Headline => 1,
            SummaryLength::Short => 2,
            SummaryLength::Long => 4,
            SummaryLength::Detailed => 8,
        }
    }

    pub fn lead(text: &str, length: SummaryLength) -> String {
        let normalised = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut out = String::new();
        let mut taken = 0;
        let mut start = 0;
        for (idx, ch) in normalised.char_indices() {
            if matches!(ch, '.' | '!' | '?') {
                let end = idx + ch.len_utf8();
                let sentence = normalised[start..end].trim();
                if !sentence.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(sentence);
                    taken += 1;
                }
                start = end;
                if taken == Self::sentence_budget(length) {
                    break;
                }
            }
        }
        if taken < Self::sentence_budget(length) {
            let rest = normalised.get(start..).unwrap_or_default().trim();
            if !rest.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(rest);
            }
        }
        if length == SummaryLength::Headline && out.chars().count() > HEADLINE_MAX_CHARS {
            out = out.chars().take(HEADLINE_MAX_CHARS - 1).collect::<String>();
            out.push('…');
        }
        out
    }
}

impl LanguageModel for LeadSentenceModel {
    fn is_available(&self) -> bool {
        true
    }

    fn summarize(&self, text: &str, length: SummaryLength) -> BoxStream<'static, String> {
        let lead = Self::lead(text, length);
        let mut partial = String::new();
        let snapshots: Vec<String> = lead
            .split(' ')
            .filter(|word| !word.is_empty())
            .map(|word| {
                if !partial.is_empty() {
                    partial.push(' ');
                }
                partial.push_str(word);
                partial.clone()
            })
            .collect();
        stream::iter(snapshots).boxed()
    }
}
