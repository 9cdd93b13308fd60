use crate::util::truncate_chars;

pub(super) const DEFAULT_SYSTEM_PROMPT: &str = "You identify the mathematical themes taught in lecture transcripts. \
You answer with a JSON array only, never prose.";

const DISAMBIGUATION_RULES: &str = "Domain rules:
- Vector language (vectors, dot product, distance, angles, 2D/3D coordinates) belongs to Geometry unless abstract vector-space vocabulary dominates (span, basis, subspace, linear independence, eigenvalues, matrices as linear maps); only then use Linear Algebra.
- Plane geometry with parallel lines, postulates or classic constructions is Euclidean geometry. Curvature, geodesics, spherical or hyperbolic spaces are non-Euclidean.
- Prefer the most specific listed topic. Do not invent topics that are not listed.";

const OUTPUT_FORMAT: &str = "Output format:
Return ONLY a JSON array, with no Markdown and no commentary. Each element is an object:
{\"name\": string, \"confidence\": number between 0 and 1, \"summary\": one sentence, \"keywords\": array of strings, \"mapped_topic\": string or null}
Use a listed topic verbatim for mapped_topic, or null when none fits.";

pub(super) const ELISION_MARKER: &str = "\n\n[... middle of transcript omitted ...]\n\n";

/// The known-topic section of the prompt. At most `max_topics` are listed; the
/// remainder is announced so the model answers `null` instead of guessing.
pub(super) fn topic_listing(topics: &[String], max_topics: usize) -> String {
    if topics.is_empty() {
        return "Known topics: none are available. Set mapped_topic to null.".to_string();
    }

    let listed = topics.len().min(max_topics);
    let mut section = String::from("Known topics:\n");
    for topic in &topics[..listed] {
        section.push_str("- ");
        section.push_str(topic);
        section.push('\n');
    }

    let omitted = topics.len() - listed;
    if omitted > 0 {
        section.push_str(&format!(
            "({omitted} more topics exist but are not listed. If no listed topic fits, set mapped_topic to null.)\n"
        ));
    }
    section
}

/// Keeps the opening `head_ratio` share and the closing remainder of the
/// character budget, joined by an elision marker.
pub(super) fn truncate_middle(text: &str, max_chars: usize, head_ratio: f64) -> String {
    let total_chars = text.chars().count();
    if total_chars <= max_chars {
        return text.to_string();
    }

    let head_chars = ((max_chars as f64) * head_ratio.clamp(0.0, 1.0)).floor() as usize;
    let tail_chars = max_chars - head_chars;
    let head = truncate_chars(text, head_chars);
    let tail_start = text
        .char_indices()
        .nth(total_chars - tail_chars)
        .map(|(byte_index, _)| byte_index)
        .unwrap_or(text.len());

    format!("{}{ELISION_MARKER}{}", head.trim_end(), text[tail_start..].trim_start())
}

pub(super) fn user_prompt(
    topic_section: &str,
    text: &str,
    max_themes: usize,
    whole_transcript: bool,
) -> String {
    let scope = if whole_transcript {
        "the whole lecture transcript"
    } else {
        "one excerpt of a longer lecture"
    };

    format!(
        "{DISAMBIGUATION_RULES}\n\n{topic_section}\n\
         Identify at most {max_themes} themes taught in {scope}:\n\
         <<<\n{text}\n>>>\n\n{OUTPUT_FORMAT}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_listing_announces_omitted_topics() {
        let topics = (0..5)
            .map(|index| format!("Topic {index}"))
            .collect::<Vec<String>>();

        let bounded = topic_listing(&topics, 3);
        assert!(bounded.contains("- Topic 2"));
        assert!(!bounded.contains("- Topic 3"));
        assert!(bounded.contains("2 more topics"));

        let full = topic_listing(&topics, 10);
        assert!(!full.contains("more topics"));
        assert!(topic_listing(&[], 10).contains("null"));
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(50), "m".repeat(100), "z".repeat(50));
        let truncated = truncate_middle(&text, 100, 0.65);

        assert!(truncated.starts_with(&"a".repeat(50)));
        assert!(truncated.ends_with(&"z".repeat(35)));
        assert!(truncated.contains(ELISION_MARKER));
        assert_eq!(
            truncated.chars().count(),
            100 + ELISION_MARKER.chars().count()
        );

        assert_eq!(truncate_middle("short", 100, 0.65), "short");
    }
}
