//! Plain-text rendering of the per-turn reasoning timeline
//!
//! The in-flight message body is rebuilt from scratch from the full step
//! list on every incoming step, so the displayed state is always a pure
//! function of the accumulated steps. Markup conversion is left to the
//! embedding renderer.

use chatkit_wire::AgentStep;

/// Display names for well-known tools.
fn tool_display_name(action: &str) -> String {
    let name: String = action
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();

    if name.is_empty() {
        return action.chars().take(15).collect();
    }

    match name.as_str() {
        "search_records" => "search".to_string(),
        "count_records" => "count".to_string(),
        "get_sample_data" => "sample data".to_string(),
        "get_column_stats" => "statistics".to_string(),
        "create_record" => "create".to_string(),
        "update_record" => "update".to_string(),
        "delete_record" => "delete".to_string(),
        other => other.replace('_', " "),
    }
}

/// Human-readable tool label, collapsing comma-joined parallel calls.
///
/// `"search_records, search_records"` becomes `"search ×2"`; mixed
/// parallel calls are joined after de-duplication.
pub fn format_tool_name(action: &str) -> String {
    let parts: Vec<&str> = action.split(", ").filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 {
        let mut unique: Vec<String> = Vec::new();
        for part in &parts {
            let mapped = tool_display_name(part);
            if !unique.contains(&mapped) {
                unique.push(mapped);
            }
        }
        if unique.len() == 1 {
            return format!("{} ×{}", unique[0], parts.len());
        }
        return unique.join(", ");
    }
    tool_display_name(action)
}

/// The "currently thinking / running a tool" label for the latest step.
pub fn running_label(steps: &[AgentStep]) -> Option<String> {
    let current = steps.last()?;
    let running_tool = current
        .action
        .as_deref()
        .filter(|_| current.observation.is_none());

    Some(match running_tool {
        Some(action) => format!("Running: {}", format_tool_name(action)),
        None => current.thought.clone(),
    })
}

/// One line per step, flagged done, running, or queued.
pub fn render_timeline(steps: &[AgentStep]) -> String {
    let mut lines = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let is_last = index + 1 == steps.len();
        let marker = if step.is_complete() {
            "[done]"
        } else if is_last {
            "[running]"
        } else {
            "[queued]"
        };

        let mut line = format!("{marker} {}", step.thought);
        if let Some(action) = &step.action {
            line.push_str(&format!(" ({})", format_tool_name(action)));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Full body of the in-flight streaming message: status line + timeline.
pub fn streaming_body(steps: &[AgentStep]) -> String {
    let Some(label) = running_label(steps) else {
        return String::new();
    };

    let completed = steps.iter().filter(|s| s.is_complete()).count();
    let mut body = label;
    if completed > 0 {
        body.push_str(&format!(
            " · {completed} tool{} used",
            if completed == 1 { "" } else { "s" }
        ));
    }
    body.push('\n');
    body.push_str(&render_timeline(steps));
    body
}
