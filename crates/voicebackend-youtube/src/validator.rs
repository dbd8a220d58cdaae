//! Structured-output extraction, normalization, and the bounded
//! repair-then-fallback policy for the two model-facing schemas: the hooks
//! JSON payload and the three-section drafts format. The fallback template
//! bodies are plain parameterized string-builders, not hardcoded to any
//! content niche.

use crate::job::DraftTone;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voicebackend_common::utc_now_rfc3339;

// ---------------------------------------------------------------------
// Hooks schema
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingMoment {
    pub quote: String,
    #[serde(rename = "startSec")]
    pub start_sec: Option<f64>,
    #[serde(rename = "endSec")]
    pub end_sec: Option<f64>,
}

impl SupportingMoment {
    fn from_quote(quote: String) -> Self {
        Self {
            quote,
            start_sec: None,
            end_sec: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub rank: u8,
    pub hook: String,
    pub who: String,
    pub outcome: String,
    pub proof: String,
    #[serde(rename = "supporting_moments")]
    pub supporting_moments: Vec<SupportingMoment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksPayload {
    #[serde(rename = "hasTimestamps")]
    pub has_timestamps: bool,
    #[serde(rename = "generatedAtUtc")]
    pub generated_at_utc: String,
    #[serde(rename = "draftTone")]
    pub draft_tone: String,
    pub hooks: Vec<Hook>,
}

/// One of three candidate extractions, in order: the whole string; the
/// content of the outermost fenced code block; the substring from the
/// first `{` to the last `}`. The first that parses as a JSON object wins.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let candidates = [
        raw.trim().to_string(),
        extract_fenced_block(raw).unwrap_or_default(),
        extract_brace_span(raw).unwrap_or_default(),
    ];
    for candidate in candidates {
        if candidate.trim().is_empty() {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return Some(Value::Object(map));
        }
    }
    None
}

fn extract_fenced_block(raw: &str) -> Option<String> {
    let re = RegexBuilder::new(r"```(?:json)?\s*\n?(.*?)```")
        .dot_matches_new_line(true)
        .case_insensitive(true)
        .build()
        .ok()?;
    re.captures(raw).map(|c| c[1].trim().to_string())
}

fn extract_brace_span(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

const PLACEHOLDER_PROOF: &str = "generated fallback hook.";
const PLACEHOLDER_OUTCOME: &str = "actionable takeaway identified.";
const NO_QUOTE_FALLBACK: &str = "No supporting quote provided.";

/// Normalize a raw parsed hooks object: up to three qualifying entries,
/// cascading field fill-in, re-ranked 1..3, each with 2-3 deduplicated
/// `supporting_moments`.
pub fn normalize_hooks(value: &Value, draft_tone: DraftTone) -> Result<HooksPayload, &'static str> {
    let raw_hooks = value.get("hooks").and_then(Value::as_array).ok_or("missing hooks array")?;
    if raw_hooks.is_empty() {
        return Err("empty hooks array");
    }

    let mut normalized = Vec::new();
    for entry in raw_hooks {
        let hook = str_field(entry, "hook");
        let who = str_field(entry, "who");
        let outcome = str_field(entry, "outcome");
        let proof = str_field(entry, "proof");
        if hook.is_empty() && outcome.is_empty() && proof.is_empty() {
            continue;
        }

        let outcome = if outcome.is_empty() { proof.clone() } else { outcome };
        let outcome = if outcome.is_empty() { hook.clone() } else { outcome };
        let proof = if proof.is_empty() { outcome.clone() } else { proof };
        let proof = if proof.is_empty() { hook.clone() } else { proof };
        let hook_text = if hook.is_empty() { outcome.clone() } else { hook };

        let mut moments: Vec<SupportingMoment> = entry
            .get("supporting_moments")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let quote = m.get("quote").and_then(Value::as_str)?.trim();
                        if quote.is_empty() {
                            None
                        } else {
                            Some(SupportingMoment::from_quote(quote.to_string()))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        backfill_moments(&mut moments, &proof, &outcome, &hook_text);
        moments.truncate(3);

        normalized.push(Hook {
            rank: 0,
            hook: hook_text,
            who: if who.is_empty() { "the audience".to_string() } else { who },
            outcome,
            proof,
            supporting_moments: moments,
        });

        if normalized.len() == 3 {
            break;
        }
    }

    if normalized.is_empty() {
        return Err("no qualifying hook entries");
    }

    for (i, hook) in normalized.iter_mut().enumerate() {
        hook.rank = (i + 1) as u8;
    }

    Ok(HooksPayload {
        has_timestamps: false,
        generated_at_utc: utc_now_rfc3339(),
        draft_tone: draft_tone.as_str().to_string(),
        hooks: normalized,
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string()
}

fn backfill_moments(moments: &mut Vec<SupportingMoment>, proof: &str, outcome: &str, hook: &str) {
    let candidates = [proof, outcome, hook, NO_QUOTE_FALLBACK];
    for candidate in candidates {
        if moments.len() >= 2 {
            break;
        }
        if candidate.trim().is_empty() {
            continue;
        }
        let already_present = moments
            .iter()
            .any(|m| m.quote.eq_ignore_ascii_case(candidate.trim()));
        if !already_present {
            moments.push(SupportingMoment::from_quote(candidate.trim().to_string()));
        }
    }
}

/// A hook is placeholder-shaped if its hook text starts with "value hook "
/// (case-insensitive), or its proof/outcome match the validator's own
/// fallback strings.
pub fn is_placeholder_hook(hook: &Hook) -> bool {
    hook.hook.to_ascii_lowercase().starts_with("value hook ")
        || hook.proof.eq_ignore_ascii_case(PLACEHOLDER_PROOF)
        || hook.outcome.eq_ignore_ascii_case(PLACEHOLDER_OUTCOME)
}

/// Placeholder iff at least two entries qualify, or fewer than three hooks
/// exist at all.
pub fn payload_is_placeholder(payload: &HooksPayload) -> bool {
    if payload.hooks.len() < 3 {
        return true;
    }
    payload.hooks.iter().filter(|h| is_placeholder_hook(h)).count() >= 2
}

// ---------------------------------------------------------------------
// Drafts format
// ---------------------------------------------------------------------

const LINKEDIN_DELIM: &str = "===LINKEDIN_CAROUSEL===";
const X_THREAD_DELIM: &str = "===X_THREAD===";
const NEWSLETTER_DELIM: &str = "===NEWSLETTER_SUMMARY===";

/// Split a combined drafts response into its three raw sections, matching
/// case-insensitively and tolerating surrounding whitespace around each
/// delimiter. `None` if any delimiter is missing.
pub fn split_drafts(raw: &str) -> Option<(String, String, String)> {
    let lower = raw.to_ascii_lowercase();
    let linkedin_start = lower.find(&LINKEDIN_DELIM.to_ascii_lowercase())?;
    let x_start = lower.find(&X_THREAD_DELIM.to_ascii_lowercase())?;
    let news_start = lower.find(&NEWSLETTER_DELIM.to_ascii_lowercase())?;
    if !(linkedin_start < x_start && x_start < news_start) {
        return None;
    }

    let linkedin = raw[linkedin_start + LINKEDIN_DELIM.len()..x_start].trim().to_string();
    let x_thread = raw[x_start + X_THREAD_DELIM.len()..news_start].trim().to_string();
    let newsletter = raw[news_start + NEWSLETTER_DELIM.len()..].trim().to_string();
    Some((linkedin, x_thread, newsletter))
}

/// Validated/renumbered LinkedIn carousel: `Slide N:` markers, 5-8 slides.
pub fn normalize_linkedin(raw: &str) -> Option<String> {
    let slide_re = Regex::new(r"(?im)^\s*slide\s+\d+\s*:").unwrap();
    let matches: Vec<_> = slide_re.find_iter(raw).collect();

    let slides: Vec<String> = if !matches.is_empty() {
        matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let end = matches.get(i + 1).map(|n| n.start()).unwrap_or(raw.len());
                raw[m.start()..end].trim().to_string()
            })
            .collect()
    } else {
        let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() < 5 {
            return None;
        }
        lines.iter().take(8).map(|l| l.to_string()).collect()
    };

    if !(5..=8).contains(&slides.len()) {
        return None;
    }

    let renumbered: Vec<String> = slides
        .iter()
        .enumerate()
        .map(|(i, slide)| {
            let body = slide_re.replace(slide, "").trim().to_string();
            format!("Slide {}: {}", i + 1, body)
        })
        .collect();
    Some(renumbered.join("\n\n"))
}

/// Validated/renumbered X thread: exactly 5 posts, each `[N/5] ...` and
/// at most 280 bytes.
/// Extract up to five post bodies from raw model output: strips any existing
/// `[N/5] ` markers (in whatever order they appear) if present, else falls
/// back to non-blank lines. Bodies never carry the `[N/5] ` prefix.
pub fn extract_x_thread_post_bodies(raw: &str) -> Vec<String> {
    let post_re = Regex::new(r"(?im)^\s*\[(\d)/5\]\s*").unwrap();
    let matches: Vec<_> = post_re.find_iter(raw).collect();

    if !matches.is_empty() {
        matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let end = matches.get(i + 1).map(|n| n.start()).unwrap_or(raw.len());
                let body = &raw[m.end()..end];
                body.trim().to_string()
            })
            .collect()
    } else {
        raw.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(5)
            .map(str::to_string)
            .collect()
    }
}

/// Re-number post bodies as `[1/5] ...` through `[5/5] ...`.
pub fn number_x_thread_posts(bodies: &[String]) -> Vec<String> {
    bodies
        .iter()
        .enumerate()
        .map(|(i, post)| format!("[{}/5] {}", i + 1, post))
        .collect()
}

pub fn normalize_x_thread(raw: &str) -> Option<String> {
    let posts = extract_x_thread_post_bodies(raw);
    if posts.len() != 5 {
        return None;
    }

    let normalized = number_x_thread_posts(&posts);
    if normalized.iter().all(|p| p.len() <= 280) {
        Some(normalized.join("\n"))
    } else {
        None
    }
}

/// Truncate any over-length post to 277 bytes plus `...`, used as the
/// last repair attempt before hard failure.
pub fn truncate_x_thread_posts(posts: &[String]) -> Vec<String> {
    posts
        .iter()
        .map(|p| {
            if p.len() <= 280 {
                p.clone()
            } else {
                let mut truncated: String = p.chars().take(277).collect();
                truncated.push_str("...");
                truncated
            }
        })
        .collect()
}

/// Newsletter usability check: no `===` markers, length >= 320 bytes, at
/// least one heading, at least one bullet.
pub fn is_newsletter_usable(raw: &str) -> bool {
    if raw.contains("===") {
        return false;
    }
    if raw.len() < 320 {
        return false;
    }
    let has_heading = raw.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("## ") || t.starts_with("### ")
    });
    let has_bullet = raw.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ")
    });
    has_heading && has_bullet
}

// ---------------------------------------------------------------------
// Deterministic fallback templates
// ---------------------------------------------------------------------

/// Seven pre-authored slides interpolating the first three hooks' titles
/// and outcomes. Used only when the model's LinkedIn section fails both
/// generation and repair.
pub fn linkedin_fallback_template(hooks: &[Hook], title: &str) -> String {
    let hook = |i: usize| hooks.get(i);
    let lines = vec![
        format!("Slide 1: What {title} gets right (and how to use it)"),
        format!(
            "Slide 2: {}",
            hook(0).map(|h| h.hook.clone()).unwrap_or_else(|| "The first big takeaway".to_string())
        ),
        format!(
            "Slide 3: Why it matters — {}",
            hook(0).map(|h| h.outcome.clone()).unwrap_or_else(|| "a concrete outcome worth repeating".to_string())
        ),
        format!(
            "Slide 4: {}",
            hook(1).map(|h| h.hook.clone()).unwrap_or_else(|| "The second takeaway".to_string())
        ),
        format!(
            "Slide 5: Proof — {}",
            hook(1).map(|h| h.proof.clone()).unwrap_or_else(|| "backed up in the source material".to_string())
        ),
        format!(
            "Slide 6: {}",
            hook(2).map(|h| h.hook.clone()).unwrap_or_else(|| "The third takeaway".to_string())
        ),
        "Slide 7: Save this for the next time you need a quick refresher.".to_string(),
    ];
    lines.join("\n\n")
}

/// A three-section markdown template (Overview, Key Takeaways, Why It
/// Matters), populated from hooks/facts. Used when the model's newsletter
/// section fails both generation and repair.
pub fn newsletter_fallback_template(hooks: &[Hook], facts: &FactsSheet) -> String {
    let mut out = String::new();
    out.push_str("## Overview\n\n");
    out.push_str(&format!(
        "This issue covers {} for {}.\n\n",
        facts.topic, facts.target_audience
    ));
    out.push_str("### Key Takeaways\n\n");
    for point in &facts.key_points {
        out.push_str(&format!("- {point}\n"));
    }
    out.push('\n');
    out.push_str("### Why It Matters\n\n");
    if let Some(first) = hooks.first() {
        out.push_str(&format!("{}\n", first.outcome));
    } else {
        out.push_str("The source material offers practical, repeatable guidance.\n");
    }
    out
}

use crate::facts::FactsSheet;
