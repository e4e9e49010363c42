//! Layered system prompt builder.
//!
//! Layers (in order):
//! 1. Role and ground rules
//! 2. Ladder method (check layers bottom-up, stop at the first failure)
//! 3. Current ladder state for this session
//! 4. Operator notes from the config, if any

use crate::ladder::{LadderCorrelator, Layer, LayerStatus};
use tracing::debug;

const ROLE: &str = r#"
# Role

You are a network troubleshooting assistant. You diagnose connectivity problems
by calling diagnostic tools and reasoning over their structured results.

Rules:
- Act before you explain: call a diagnostic tool instead of guessing.
- Each tool returns JSON with `success`, `data`, `error` and `suggestions`.
  Base every conclusion on those results and quote the relevant values.
- Never invent tool names or results. If a tool fails, say so plainly.
- Keep answers short and practical; give the user concrete next steps.
"#;

const LADDER_METHOD: &str = r#"
# Method

Work up the diagnostic ladder, one layer at a time:
1. physical: is the adapter present, enabled and linked?
2. link: does the adapter have a valid IP configuration?
3. network: does the default gateway answer?
4. resolution: does DNS resolve names?
5. application: can external services be reached?

Stop at the first layer that fails. Layers above a failure cannot be trusted,
so do not test them; explain the failure and how to fix it instead.
"#;

/// Build the system prompt for a provider call.
pub fn build_system_prompt(ladder: &LadderCorrelator, operator_notes: Option<&str>) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(ROLE);
    prompt.push_str(LADDER_METHOD);

    prompt.push_str("\n# Ladder state\n\n");
    if !ladder.is_started() {
        prompt.push_str("No layer has been tested yet in this run.\n");
    } else {
        for layer in Layer::ALL {
            prompt.push_str(&format!(
                "- layer {} ({}): {}\n",
                layer.id(),
                layer,
                ladder.status(layer)
            ));
        }
        if let Some(stopped) = ladder.stopped_at() {
            prompt.push_str(&format!(
                "\nThe run stopped at layer {} ({}). Do not probe higher layers; \
                 explain the fault and the fix.\n",
                stopped.id(),
                stopped
            ));
        } else if Layer::ALL
            .iter()
            .all(|l| ladder.status(*l) == LayerStatus::Pass)
        {
            prompt.push_str("\nEvery layer passed. Summarize the findings for the user.\n");
        }
    }

    if let Some(notes) = operator_notes.filter(|n| !n.trim().is_empty()) {
        prompt.push_str("\n# Operator notes\n\n");
        prompt.push_str(notes.trim());
        prompt.push('\n');
    }

    debug!("System prompt: {} chars", prompt.len());
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeVerdict;

    #[test]
    fn fresh_ladder_says_nothing_tested() {
        let prompt = build_system_prompt(&LadderCorrelator::new(), None);
        assert!(prompt.contains("No layer has been tested yet"));
        assert!(!prompt.contains("Operator notes"));
    }

    #[test]
    fn failed_ladder_tells_model_to_stop() {
        let mut ladder = LadderCorrelator::new();
        ladder.apply(Layer::Physical, ProbeVerdict::Pass);
        ladder.apply(Layer::Link, ProbeVerdict::Fail);
        let prompt = build_system_prompt(&ladder, Some("Office VLAN uses static IPs."));
        assert!(prompt.contains("- layer 1 (physical): pass"));
        assert!(prompt.contains("- layer 3 (network): skipped"));
        assert!(prompt.contains("stopped at layer 2 (link)"));
        assert!(prompt.contains("Office VLAN uses static IPs."));
    }
}
