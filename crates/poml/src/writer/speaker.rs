//! Grouping of IR content into speaker runs.

use poml_syntax::Span;

use crate::ir::{IrKind, IrNode, Speaker};

/// Contiguous top-level content attributed to one speaker.
#[derive(Debug)]
pub(crate) struct SpeakerRun<'a> {
    pub speaker: Speaker,
    pub nodes: Vec<&'a IrNode>,
    pub span: Span,
}

fn is_blank_text(node: &IrNode) -> bool {
    matches!(&node.kind, IrKind::Text { value, .. } if value.trim().is_empty())
}

fn declares_speaker(node: &IrNode) -> bool {
    node.walk().iter().any(|n| n.speaker.is_some())
}

/// Units that each belong to exactly one speaker. Containers without a
/// speaker of their own are opened when something inside declares one.
fn units<'a>(node: &'a IrNode, inherited: Speaker, out: &mut Vec<(Speaker, &'a IrNode)>) {
    for child in node.children.iter().filter(|c| !is_blank_text(c)) {
        match child.speaker {
            Some(speaker) => out.push((speaker, child)),
            None if matches!(child.kind, IrKind::Document | IrKind::Block | IrKind::Section)
                && child.children.iter().any(declares_speaker) =>
            {
                units(child, inherited, out)
            }
            None => out.push((inherited, child)),
        }
    }
}

/// Split a document into runs. With `single` everything is one message
/// spoken by the first declared speaker, or `human`.
pub(crate) fn speaker_runs(ir: &IrNode, single: bool) -> Vec<SpeakerRun<'_>> {
    let root_speaker = ir.speaker.unwrap_or(Speaker::Human);
    let mut flat = Vec::new();
    units(ir, root_speaker, &mut flat);

    if single {
        let speaker = flat
            .iter()
            .find(|(_, node)| node.speaker.is_some())
            .map_or(root_speaker, |(speaker, _)| *speaker);
        let nodes: Vec<&IrNode> = flat.into_iter().map(|(_, node)| node).collect();
        return vec![SpeakerRun {
            speaker,
            nodes,
            span: ir.span,
        }];
    }

    let mut runs: Vec<SpeakerRun> = Vec::new();
    for (speaker, node) in flat {
        match runs.last_mut() {
            // Tool messages never merge; each answers one call.
            Some(run) if run.speaker == speaker && speaker != Speaker::Tool => {
                run.span = run.span.cover(node.span);
                run.nodes.push(node);
            }
            _ => runs.push(SpeakerRun {
                speaker,
                nodes: vec![node],
                span: node.span,
            }),
        }
    }
    runs
}
