//! Parses raw model output into channel-tagged segments (§4.3 "Parser
//! inputs"/"Parser rules"). Pure: no sequencing, no storage, no I/O — the
//! caller (the session engine) is responsible for turning each
//! [`RoutedMessage`] into a sequenced, stored [`super::ChannelMessage`].

use regex::Regex;
use serde_json::Value;

use super::types::Channel;

/// One channel-tagged segment produced by [`route`], before sequencing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub channel: Channel,
    pub content: String,
    /// Set when this segment carries a continuation hint (`metadata.continue`
    /// in the structured-JSON path, or a `CONTINUE: true`-shaped tail in the
    /// marked-text path). Always routed to [`Channel::Analysis`].
    pub is_continuation: bool,
}

impl RoutedMessage {
    fn new(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            is_continuation: false,
        }
    }
}

/// Route one complete (or partial, for streaming) chunk of model output.
pub fn route(raw: &str) -> Vec<RoutedMessage> {
    if let Some(structured) = try_structured_json(raw) {
        return structured;
    }
    route_marked_text(raw)
}

/// Structured-JSON path: the whole message parses as an object carrying all
/// three channel keys. Split verbatim; a truthy `metadata.continue` becomes a
/// synthetic continuation marker appended to `analysis`.
fn try_structured_json(raw: &str) -> Option<Vec<RoutedMessage>> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let obj = value.as_object()?;
    let analysis = obj.get("analysis")?.as_str()?;
    let commentary = obj.get("commentary")?.as_str()?;
    let final_text = obj.get("final")?.as_str()?;

    let is_continuation = obj
        .get("metadata")
        .and_then(|m| m.get("continue"))
        .and_then(|c| c.as_bool())
        .unwrap_or(false);

    let analysis_content = if is_continuation {
        format!("{analysis}\n[CONTINUE]")
    } else {
        analysis.to_string()
    };

    Some(vec![
        RoutedMessage {
            channel: Channel::Analysis,
            content: analysis_content,
            is_continuation,
        },
        RoutedMessage::new(Channel::Commentary, commentary),
        RoutedMessage::new(Channel::Final, final_text),
    ])
}

/// One recognised opening marker and its (optional) matching closer.
struct MarkerDef {
    open: Regex,
    channel: Channel,
    close: Option<Regex>,
}

fn marker_defs() -> Vec<MarkerDef> {
    let pair = |open: &str, close: &str, channel: Channel| MarkerDef {
        open: Regex::new(open).expect("static marker pattern"),
        channel,
        close: Some(Regex::new(close).expect("static marker pattern")),
    };
    vec![
        pair(r"(?i)\[analysis\]", r"(?i)\[/analysis\]", Channel::Analysis),
        pair(r"(?i)<analysis>", r"(?i)</analysis>", Channel::Analysis),
        pair(r"(?i)<thinking>", r"(?i)</thinking>", Channel::Analysis),
        pair(r"(?i)\[commentary\]", r"(?i)\[/commentary\]", Channel::Commentary),
        pair(r"(?i)<commentary>", r"(?i)</commentary>", Channel::Commentary),
        pair(r"(?i)<tool_call>", r"(?i)</tool_call>", Channel::Commentary),
        pair(r"(?i)\[final\]", r"(?i)\[/final\]", Channel::Final),
        pair(r"(?i)<final>", r"(?i)</final>", Channel::Final),
    ]
}

/// Marked-text path: find every recognised opening marker, slice its content
/// up to the matching closer (or, failing that, the next marker, or the end
/// of the text), and run the leftover, unmatched text through the tail
/// heuristic as a single unit.
fn route_marked_text(raw: &str) -> Vec<RoutedMessage> {
    let defs = marker_defs();

    let mut opens: Vec<(usize, usize, usize)> = Vec::new();
    for (idx, def) in defs.iter().enumerate() {
        for m in def.open.find_iter(raw) {
            opens.push((m.start(), m.end(), idx));
        }
    }
    opens.sort_by_key(|&(start, _, _)| start);

    let mut messages = Vec::new();
    let mut tail = String::new();
    let mut cursor = 0usize;

    for (i, &(start, end, marker_idx)) in opens.iter().enumerate() {
        if start < cursor {
            // Nested/overlapping marker already consumed as prior content.
            continue;
        }
        if start > cursor {
            tail.push_str(&raw[cursor..start]);
        }

        let def = &defs[marker_idx];
        let next_open_start = opens.get(i + 1).map(|&(s, _, _)| s);
        let close_match = def.close.as_ref().and_then(|re| re.find_at(raw, end));

        let (content_end, consumed_end) = match (close_match, next_open_start) {
            (Some(cm), Some(ns)) if cm.start() <= ns => (cm.start(), cm.end()),
            (Some(_), Some(ns)) => (ns, ns),
            (Some(cm), None) => (cm.start(), cm.end()),
            (None, Some(ns)) => (ns, ns),
            (None, None) => (raw.len(), raw.len()),
        };

        let content = raw[end..content_end].trim().to_string();
        messages.push(RoutedMessage::new(def.channel, content));
        cursor = consumed_end;
    }

    if cursor < raw.len() {
        tail.push_str(&raw[cursor..]);
    }

    let tail_trimmed = tail.trim();
    if !tail_trimmed.is_empty() {
        messages.push(route_tail(tail_trimmed));
    } else if messages.is_empty() {
        // No markers at all and an entirely blank tail: preserve the raw
        // text verbatim rather than silently dropping it.
        messages.push(RoutedMessage::new(Channel::Final, raw));
    }

    messages
}

/// Heuristic for unmarked tail content (§4.3 "Heuristic for tail content").
fn route_tail(tail: &str) -> RoutedMessage {
    if looks_like_tool_call(tail) {
        return RoutedMessage::new(Channel::Commentary, tail);
    }
    if is_continuation_hint(tail) {
        return RoutedMessage {
            channel: Channel::Analysis,
            content: tail.to_string(),
            is_continuation: true,
        };
    }
    RoutedMessage::new(Channel::Final, tail)
}

fn looks_like_tool_call(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|obj| obj.contains_key("function") || (obj.contains_key("name") && obj.contains_key("arguments")))
        .unwrap_or(false)
}

fn is_continuation_hint(text: &str) -> bool {
    Regex::new(r"(?i)continue\s*:\s*true")
        .expect("static pattern")
        .is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_json_splits_verbatim() {
        let raw = r#"{"analysis":"thinking...","commentary":"calling tool","final":"Done."}"#;
        let routed = route(raw);
        assert_eq!(routed.len(), 3);
        assert_eq!(routed[0].channel, Channel::Analysis);
        assert_eq!(routed[0].content, "thinking...");
        assert_eq!(routed[2].content, "Done.");
    }

    #[test]
    fn structured_json_continuation_marks_analysis() {
        let raw = r#"{"analysis":"more to do","commentary":"","final":"","metadata":{"continue":true}}"#;
        let routed = route(raw);
        let analysis = routed.iter().find(|m| m.channel == Channel::Analysis).unwrap();
        assert!(analysis.is_continuation);
        assert!(analysis.content.contains("[CONTINUE]"));
    }

    #[test]
    fn bracket_markers_are_split() {
        let raw = "[ANALYSIS]thinking[/ANALYSIS][FINAL]Hi![/FINAL]";
        let routed = route(raw);
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0], RoutedMessage::new(Channel::Analysis, "thinking"));
        assert_eq!(routed[1], RoutedMessage::new(Channel::Final, "Hi!"));
    }

    #[test]
    fn xml_style_markers_without_closer_fall_through_to_next_marker() {
        let raw = "<thinking>pondering<commentary>{\"name\":\"x\",\"arguments\":{}}</commentary>";
        let routed = route(raw);
        assert_eq!(routed[0].channel, Channel::Analysis);
        assert_eq!(routed[0].content, "pondering");
        assert_eq!(routed[1].channel, Channel::Commentary);
    }

    #[test]
    fn unmarked_tool_call_shape_routes_to_commentary() {
        let raw = r#"{"name":"get_weather","arguments":{"city":"NY"}}"#;
        let routed = route(raw);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].channel, Channel::Commentary);
    }

    #[test]
    fn unmarked_continuation_hint_routes_to_analysis() {
        let routed = route("CONTINUE: true, more coming");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].channel, Channel::Analysis);
        assert!(routed[0].is_continuation);
    }

    #[test]
    fn plain_text_routes_to_final() {
        let routed = route("Just a normal reply.");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].channel, Channel::Final);
        assert_eq!(routed[0].content, "Just a normal reply.");
    }

    #[test]
    fn mixed_markers_and_trailing_tail() {
        let raw = "[ANALYSIS]reasoning[/ANALYSIS]The answer is 42.";
        let routed = route(raw);
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[1].channel, Channel::Final);
        assert_eq!(routed[1].content, "The answer is 42.");
    }
}
