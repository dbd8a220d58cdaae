//! Facts-sheet derivation: a compact summary of topic, audience, key points
//! and notable terms computed purely from title/channel/hooks. Never calls
//! the generation engine.

use crate::job::DraftTone;
use crate::validator::Hook;
use serde::{Deserialize, Serialize};
use voicebackend_common::utc_now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsSheet {
    #[serde(rename = "generatedAtUtc")]
    pub generated_at_utc: String,
    pub topic: String,
    #[serde(rename = "targetAudience")]
    pub target_audience: String,
    #[serde(rename = "keyPoints")]
    pub key_points: Vec<String>,
    #[serde(rename = "notableTerms")]
    pub notable_terms: Vec<String>,
    #[serde(rename = "draftTone")]
    pub draft_tone: String,
}

/// Build the facts sheet from title/channel/hooks only. `keyPoints` is
/// always exactly 5 strings ending in a period; `notableTerms` is at most 3.
pub fn derive_facts_sheet(title: &str, channel: &str, hooks: &[Hook], draft_tone: DraftTone) -> FactsSheet {
    let topic = if title.trim().is_empty() {
        "This video".to_string()
    } else {
        title.trim().to_string()
    };
    let target_audience = if channel.trim().is_empty() {
        "general viewers".to_string()
    } else {
        format!("{}'s audience", channel.trim())
    };

    let mut key_points: Vec<String> = hooks
        .iter()
        .flat_map(|h| [h.outcome.clone(), h.proof.clone()])
        .filter(|s| !s.trim().is_empty())
        .map(|s| ensure_period(s.trim()))
        .collect();
    key_points.dedup();
    while key_points.len() < 5 {
        key_points.push(ensure_period(&format!(
            "{topic} offers practical guidance worth revisiting"
        )));
    }
    key_points.truncate(5);

    let notable_terms: Vec<String> = hooks
        .iter()
        .map(|h| h.who.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .into_iter()
        .take(3)
        .collect();

    FactsSheet {
        generated_at_utc: utc_now_rfc3339(),
        topic,
        target_audience,
        key_points,
        notable_terms,
        draft_tone: draft_tone.as_str().to_string(),
    }
}

fn ensure_period(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.ends_with('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::SupportingMoment;

    fn sample_hook(outcome: &str, proof: &str, who: &str) -> Hook {
        Hook {
            rank: 1,
            hook: "do the thing".to_string(),
            who: who.to_string(),
            outcome: outcome.to_string(),
            proof: proof.to_string(),
            supporting_moments: vec![SupportingMoment {
                quote: "quote".to_string(),
                start_sec: None,
                end_sec: None,
            }],
        }
    }

    #[test]
    fn key_points_always_exactly_five_and_end_in_period() {
        let hooks = vec![sample_hook("faster results", "shown on screen", "beginners")];
        let facts = derive_facts_sheet("My Video", "My Channel", &hooks, DraftTone::Professional);
        assert_eq!(facts.key_points.len(), 5);
        assert!(facts.key_points.iter().all(|p| p.ends_with('.')));
    }

    #[test]
    fn notable_terms_capped_at_three() {
        let hooks = vec![
            sample_hook("a", "b", "group one"),
            sample_hook("c", "d", "group two"),
            sample_hook("e", "f", "group three"),
            sample_hook("g", "h", "group four"),
        ];
        let facts = derive_facts_sheet("T", "C", &hooks, DraftTone::Direct);
        assert_eq!(facts.notable_terms.len(), 3);
    }
}
