//! Terminal rendering of transcript entries and session status.

use crate::catalog::{CatalogSnapshot, Pipeline};
use crate::session::{SessionSnapshot, SessionState};
use crate::transcript::{ChatEntry, EntryKind};
use owo_colors::OwoColorize;

fn label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Input => "you",
        EntryKind::Output => "assist",
        EntryKind::Error => "error",
        EntryKind::Info => "info",
    }
}

/// One transcript line, e.g. `  you> turn off the lights`.
pub fn format_entry(entry: &ChatEntry, color: bool) -> String {
    let tag = format!("{:>6}>", label(entry.kind));
    if !color {
        return format!("{} {}", tag, entry.content);
    }
    match entry.kind {
        EntryKind::Input => format!("{} {}", tag.cyan(), entry.content),
        EntryKind::Output => format!("{} {}", tag.green(), entry.content.bold()),
        EntryKind::Error => format!("{} {}", tag.red(), entry.content.red()),
        EntryKind::Info => format!("{} {}", tag.yellow(), entry.content.dimmed()),
    }
}

/// Print a transcript entry to stdout.
pub fn render_entry(entry: &ChatEntry, color: bool) {
    println!("{}", format_entry(entry, color));
}

fn describe_state(state: &SessionState) -> String {
    match state {
        SessionState::Error(detail) => format!("error: {}", detail),
        other => other.name().to_string(),
    }
}

/// Multi-line run summary printed after a replay.
pub fn format_summary(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("state:          {}", describe_state(&snapshot.state))];
    if let Some(id) = snapshot.handler_id {
        lines.push(format!("handler id:     {}", id));
    }
    lines.push(format!("frames sent:    {}", snapshot.frames_sent));
    if snapshot.chunks_dropped > 0 {
        lines.push(format!("chunks dropped: {}", snapshot.chunks_dropped));
    }
    if snapshot.events_ignored > 0 {
        lines.push(format!("events ignored: {}", snapshot.events_ignored));
    }
    if let Some(secs) = snapshot.stage_timeout_secs {
        lines.push(format!("stage timeout:  {}s", secs));
    }
    lines.join("\n")
}

fn pipeline_line(pipeline: &Pipeline, preferred: bool) -> String {
    let mut stages = vec!["intent"];
    if pipeline.supports_audio() {
        stages.insert(0, "stt");
    }
    if pipeline.supports_tts() {
        stages.push("tts");
    }
    format!(
        "{} {} [{}] ({}) {}",
        if preferred { "*" } else { " " },
        pipeline.name,
        pipeline.id,
        pipeline.language.as_deref().unwrap_or("-"),
        stages.join("+")
    )
}

/// Pipeline list with the preferred one starred.
pub fn format_catalog(snapshot: &CatalogSnapshot) -> String {
    snapshot
        .pipelines
        .iter()
        .map(|p| pipeline_line(p, snapshot.preferred_pipeline.as_deref() == Some(&p.id)))
        .collect::<Vec<_>>()
        .join("\n")
}
