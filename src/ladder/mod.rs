//! Diagnostic ladder: the layered state machine that localizes a fault.
//!
//! Layers are checked bottom-up. A failure at layer L concludes the run:
//! every layer above L that has not already passed is marked skipped, and
//! further results are ignored until `reset()`.

use crate::types::{ProbeVerdict, ToolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Number of layers on the ladder.
pub const LAYER_COUNT: usize = 5;

/// The fixed, ordered ladder layers (1-based ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Adapter present, enabled, link up.
    Physical = 1,
    /// Address assigned (DHCP / static).
    Link = 2,
    /// Gateway reachable.
    Network = 3,
    /// DNS resolves.
    Resolution = 4,
    /// External services reachable.
    Application = 5,
}

impl Layer {
    pub const ALL: [Layer; LAYER_COUNT] = [
        Layer::Physical,
        Layer::Link,
        Layer::Network,
        Layer::Resolution,
        Layer::Application,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id).checked_sub(1)?).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    fn index(self) -> usize {
        usize::from(self.id()) - 1
    }

    pub fn next(self) -> Option<Self> {
        Self::from_id(self.id() + 1)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical => write!(f, "physical"),
            Self::Link => write!(f, "link"),
            Self::Network => write!(f, "network"),
            Self::Resolution => write!(f, "resolution"),
            Self::Application => write!(f, "application"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Pending,
    Testing,
    Pass,
    Fail,
    Skipped,
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Testing => write!(f, "testing"),
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// What observing a result did to the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Passed(Layer),
    Failed { layer: Layer, skipped: usize },
    /// Untagged result, unknown layer, or undetermined verdict.
    Unchanged,
    /// The run already concluded with a failure.
    Ignored,
}

/// Read-only view of a ladder, for the UI and the system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSnapshot {
    pub layers: Vec<(Layer, LayerStatus)>,
    pub current: Option<Layer>,
}

/// Per-session ladder state. Mutated only through its methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderCorrelator {
    status: [LayerStatus; LAYER_COUNT],
    current: Option<Layer>,
}

impl Default for LadderCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl LadderCorrelator {
    pub fn new() -> Self {
        Self {
            status: [LayerStatus::Pending; LAYER_COUNT],
            current: None,
        }
    }

    /// Return every layer to pending. The only way to undo pass or fail.
    pub fn reset(&mut self) {
        debug!("Ladder reset");
        self.status = [LayerStatus::Pending; LAYER_COUNT];
        self.current = None;
    }

    pub fn status(&self, layer: Layer) -> LayerStatus {
        self.status[layer.index()]
    }

    pub fn current(&self) -> Option<Layer> {
        self.current
    }

    /// The failed layer, if the run stopped on one.
    pub fn stopped_at(&self) -> Option<Layer> {
        Layer::ALL
            .into_iter()
            .find(|l| self.status(*l) == LayerStatus::Fail)
    }

    /// A run is over once something failed or every layer passed.
    pub fn is_concluded(&self) -> bool {
        self.stopped_at().is_some() || self.status.iter().all(|s| *s == LayerStatus::Pass)
    }

    /// Whether any layer has left `pending`.
    pub fn is_started(&self) -> bool {
        self.status.iter().any(|s| *s != LayerStatus::Pending)
    }

    /// Note that a probe for `layer` is about to run.
    pub fn mark_testing(&mut self, layer: Layer) {
        if self.stopped_at().is_some() {
            return;
        }
        if self.status(layer) == LayerStatus::Pending {
            self.status[layer.index()] = LayerStatus::Testing;
        }
        self.current = Some(layer);
    }

    /// Fold one tool result into the ladder.
    pub fn observe(&mut self, result: &ToolResult) -> Transition {
        let Some(layer) = result.layer.and_then(Layer::from_id) else {
            return Transition::Unchanged;
        };
        self.apply(layer, result.verdict)
    }

    /// Apply a verdict for `layer` directly.
    pub fn apply(&mut self, layer: Layer, verdict: ProbeVerdict) -> Transition {
        if self.stopped_at().is_some() {
            debug!("Ladder concluded; ignoring {} result for layer {}", verdict_name(verdict), layer);
            return Transition::Ignored;
        }

        match verdict {
            ProbeVerdict::Undetermined => Transition::Unchanged,
            ProbeVerdict::Pass => {
                self.status[layer.index()] = LayerStatus::Pass;
                self.current = layer.next();
                if let Some(next) = self.current {
                    if self.status(next) == LayerStatus::Pending {
                        self.status[next.index()] = LayerStatus::Testing;
                    }
                }
                debug!("Ladder: layer {} ({}) passed", layer.id(), layer);
                Transition::Passed(layer)
            }
            ProbeVerdict::Fail => {
                self.status[layer.index()] = LayerStatus::Fail;
                let mut skipped = 0;
                for above in Layer::ALL.into_iter().filter(|l| *l > layer) {
                    if self.status(above) != LayerStatus::Pass {
                        self.status[above.index()] = LayerStatus::Skipped;
                        skipped += 1;
                    }
                }
                self.current = Some(layer);
                info!("Ladder stopped at layer {} ({}); {} layer(s) skipped", layer.id(), layer, skipped);
                Transition::Failed { layer, skipped }
            }
        }
    }

    pub fn snapshot(&self) -> LadderSnapshot {
        LadderSnapshot {
            layers: Layer::ALL.into_iter().map(|l| (l, self.status(l))).collect(),
            current: self.current,
        }
    }
}

fn verdict_name(verdict: ProbeVerdict) -> &'static str {
    match verdict {
        ProbeVerdict::Pass => "pass",
        ProbeVerdict::Fail => "fail",
        ProbeVerdict::Undetermined => "undetermined",
    }
}

impl fmt::Display for LadderSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (layer, status) in &self.layers {
            let marker = if Some(*layer) == self.current { " <" } else { "" };
            writeln!(f, "  {}. {:<12} {}{}", layer.id(), layer.to_string(), status, marker)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn result(layer: u8, verdict: ProbeVerdict) -> ToolResult {
        ToolResult {
            tool_call_id: format!("call_{layer}"),
            tool_name: "probe".into(),
            success: verdict == ProbeVerdict::Pass,
            payload: serde_json::Value::Null,
            summary: String::new(),
            elapsed_ms: 0,
            layer: Some(layer),
            verdict,
        }
    }

    #[test]
    fn adapter_failure_skips_everything_above() {
        let mut ladder = LadderCorrelator::new();
        let t = ladder.observe(&result(1, ProbeVerdict::Fail));
        assert_eq!(t, Transition::Failed { layer: Layer::Physical, skipped: 4 });
        assert_eq!(ladder.status(Layer::Physical), LayerStatus::Fail);
        for layer in &Layer::ALL[1..] {
            assert_eq!(ladder.status(*layer), LayerStatus::Skipped);
        }
        assert_eq!(ladder.stopped_at(), Some(Layer::Physical));
        assert!(ladder.is_concluded());
    }

    #[test]
    fn all_pass_walks_the_ladder() {
        let mut ladder = LadderCorrelator::new();
        for id in 1..=5 {
            ladder.observe(&result(id, ProbeVerdict::Pass));
            if let Some(next) = Layer::from_id(id + 1) {
                assert_eq!(ladder.status(next), LayerStatus::Testing);
                assert_eq!(ladder.current(), Some(next));
            }
        }
        assert!(Layer::ALL.iter().all(|l| ladder.status(*l) == LayerStatus::Pass));
        assert_eq!(ladder.current(), None);
        assert!(ladder.is_concluded());
    }

    #[test]
    fn failure_never_skips_a_passed_layer() {
        let mut ladder = LadderCorrelator::new();
        ladder.observe(&result(4, ProbeVerdict::Pass));
        ladder.observe(&result(2, ProbeVerdict::Fail));
        assert_eq!(ladder.status(Layer::Resolution), LayerStatus::Pass);
        assert_eq!(ladder.status(Layer::Network), LayerStatus::Skipped);
        assert_eq!(ladder.status(Layer::Application), LayerStatus::Skipped);
        assert_eq!(ladder.status(Layer::Physical), LayerStatus::Pending);
    }

    #[test]
    fn results_after_failure_are_ignored() {
        let mut ladder = LadderCorrelator::new();
        ladder.observe(&result(3, ProbeVerdict::Fail));
        let before = ladder.clone();
        assert_eq!(ladder.observe(&result(5, ProbeVerdict::Pass)), Transition::Ignored);
        assert_eq!(ladder.observe(&result(1, ProbeVerdict::Fail)), Transition::Ignored);
        ladder.mark_testing(Layer::Physical);
        assert_eq!(ladder, before);
    }

    #[test]
    fn undetermined_and_untagged_results_change_nothing() {
        let mut ladder = LadderCorrelator::new();
        assert_eq!(ladder.observe(&result(2, ProbeVerdict::Undetermined)), Transition::Unchanged);
        let mut untagged = result(1, ProbeVerdict::Fail);
        untagged.layer = None;
        assert_eq!(ladder.observe(&untagged), Transition::Unchanged);
        let mut out_of_range = result(9, ProbeVerdict::Fail);
        out_of_range.layer = Some(9);
        assert_eq!(ladder.observe(&out_of_range), Transition::Unchanged);
        assert_eq!(ladder, LadderCorrelator::new());
    }

    #[test]
    fn reset_is_equivalent_to_fresh_correlator() {
        let sequence = [
            (2, ProbeVerdict::Pass),
            (1, ProbeVerdict::Pass),
            (3, ProbeVerdict::Fail),
            (4, ProbeVerdict::Pass),
        ];

        let mut reused = LadderCorrelator::new();
        reused.observe(&result(1, ProbeVerdict::Fail));
        reused.mark_testing(Layer::Network);
        reused.reset();
        assert_eq!(reused, LadderCorrelator::new());

        let mut fresh = LadderCorrelator::new();
        for (id, verdict) in sequence {
            assert_eq!(
                reused.observe(&result(id, verdict)),
                fresh.observe(&result(id, verdict))
            );
        }
        assert_eq!(reused, fresh);
    }

    /// Exhaustively checks every sequence of up to three results.
    #[test]
    fn skipped_set_is_exactly_unpassed_layers_above_first_failure() {
        let verdicts = [ProbeVerdict::Pass, ProbeVerdict::Fail, ProbeVerdict::Undetermined];
        let steps: Vec<(u8, ProbeVerdict)> = (1..=5u8)
            .flat_map(|id| verdicts.iter().map(move |v| (id, *v)))
            .collect();

        let mut sequences: Vec<Vec<(u8, ProbeVerdict)>> = vec![Vec::new()];
        let mut frontier = sequences.clone();
        for _ in 0..3 {
            frontier = frontier
                .iter()
                .flat_map(|seq| {
                    steps.iter().map(move |step| {
                        let mut next = seq.clone();
                        next.push(*step);
                        next
                    })
                })
                .collect();
            sequences.extend(frontier.iter().cloned());
        }

        for seq in sequences {
            let mut ladder = LadderCorrelator::new();
            let mut first_fail: Option<u8> = None;
            let mut passed_before_fail = BTreeSet::new();
            for (id, verdict) in &seq {
                ladder.observe(&result(*id, *verdict));
                if first_fail.is_none() {
                    match verdict {
                        ProbeVerdict::Pass => {
                            passed_before_fail.insert(*id);
                        }
                        ProbeVerdict::Fail => first_fail = Some(*id),
                        ProbeVerdict::Undetermined => {}
                    }
                }
            }

            let skipped: BTreeSet<u8> = Layer::ALL
                .iter()
                .filter(|l| ladder.status(**l) == LayerStatus::Skipped)
                .map(|l| l.id())
                .collect();
            let expected: BTreeSet<u8> = match first_fail {
                Some(f) => (f + 1..=5).filter(|id| !passed_before_fail.contains(id)).collect(),
                None => BTreeSet::new(),
            };
            assert_eq!(skipped, expected, "sequence {seq:?}");
        }
    }

    #[test]
    fn snapshot_renders_current_marker() {
        let mut ladder = LadderCorrelator::new();
        ladder.observe(&result(1, ProbeVerdict::Pass));
        let text = ladder.snapshot().to_string();
        assert!(text.contains("1. physical     pass"));
        assert!(text.contains("2. link         testing <"));
    }
}
