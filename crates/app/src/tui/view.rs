use super::model::TuiModel;
use gitagrip_core::app::{Coordinator, InputMode, OverlayKind, Row, SortMode};
use gitagrip_core::domain::{is_hidden_group, CommandKind, Repository};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

/// Command log entries listed in the info panel
const INFO_LOG_ENTRIES: usize = 8;

const HELP_LINES: &[(&str, &str)] = &[
    ("Navigation", ""),
    ("j/k ↑/↓", "Move down / up"),
    ("h/l ←/→", "Collapse / expand group"),
    ("gg G", "Top / bottom"),
    ("PgUp PgDn", "Page up / down"),
    ("z Tab", "Toggle group"),
    ("Enter", "Toggle group or info"),
    ("Selection", ""),
    ("Space", "Select repository or group"),
    ("a", "Select all / none"),
    ("Esc", "Clear selection, search or filter"),
    ("Git", ""),
    ("r F5", "Refresh status"),
    ("f", "Fetch"),
    ("p", "Pull --rebase"),
    ("H L", "Log"),
    ("D", "Diff"),
    ("Ctrl+R", "Rescan base directory"),
    ("Groups", ""),
    ("N", "New group from selection"),
    ("m", "Move to group"),
    ("x", "Hide"),
    ("R", "Rename group"),
    ("d", "Delete group"),
    ("J/K Shift+↑/↓", "Move group down / up"),
    ("View", ""),
    ("/ n N", "Search, next, previous"),
    ("F Ctrl+F", "Filter (status:dirty, status:ahead, text)"),
    ("s", "Sort"),
    ("i", "Repository info"),
    ("?", "Help"),
    ("q Ctrl+C", "Quit"),
];

/// The View component of MVU - responsible for rendering the model
pub struct TuiView;

impl TuiView {
    /// Render the entire TUI based on the current model state
    pub fn render(model: &TuiModel, frame: &mut Frame) {
        let coordinator = &model.coordinator;
        let size = frame.area();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Title bar
                Constraint::Min(0),    // Repository list
                Constraint::Length(1), // Prompt
                Constraint::Length(1), // Status line
            ])
            .split(size);

        Self::render_title_bar(coordinator, frame, chunks[0]);
        Self::render_repo_list(coordinator, frame, chunks[1]);
        Self::render_prompt(coordinator, frame, chunks[2]);
        Self::render_status_line(coordinator, frame, chunks[3]);

        if coordinator.show_info() {
            Self::render_info_panel(coordinator, frame, size);
        }
        if coordinator.overlay().is_some() {
            Self::render_output_overlay(coordinator, frame, size);
        }
        if coordinator.show_help() {
            Self::render_help(frame, size);
        }
    }

    fn render_title_bar(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let mut title = format!(
            "GitaGrip - {} | {} repos | sort: {}",
            coordinator.options().base_dir.display(),
            coordinator.repo_count(),
            coordinator.sort().label(),
        );
        if !coordinator.filter_query().is_empty() {
            title.push_str(&format!(" | filter: {}", coordinator.filter_query()));
        }
        if !coordinator.selection().is_empty() {
            title.push_str(&format!(" | {} selected", coordinator.selection().len()));
        }
        if coordinator.is_scanning() {
            title.push_str(" [SCANNING...]");
        }

        let title_paragraph = Paragraph::new(title)
            .style(Style::default().fg(Color::White).bg(Color::Blue))
            .alignment(Alignment::Center);
        frame.render_widget(title_paragraph, area);
    }

    fn render_repo_list(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Repositories");
        let rows = coordinator.rows();

        if rows.is_empty() {
            let empty_msg = if coordinator.is_scanning() {
                "Scanning for repositories..."
            } else if !coordinator.filter_query().is_empty() {
                "No repositories match the filter."
            } else {
                "No repositories found. Press Ctrl+R to rescan."
            };
            let paragraph = Paragraph::new(empty_msg)
                .block(block)
                .style(Style::default().fg(Color::Yellow))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
            return;
        }

        let window = coordinator.window();
        let mut lines = Vec::with_capacity(window.end - window.start + 2);
        if window.more_above {
            lines.push(Line::from(Span::styled(
                format!("  ↑ {} more", window.start),
                Style::default().fg(Color::DarkGray),
            )));
        }
        for (index, row) in rows.iter().enumerate().take(window.end).skip(window.start) {
            let mut line = Self::row_line(coordinator, row, coordinator.search_state().is_match(index));
            if index == coordinator.cursor() {
                line = line.style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
            }
            lines.push(line);
        }
        if window.more_below {
            lines.push(Line::from(Span::styled(
                format!("  ↓ {} more", rows.len() - window.end),
                Style::default().fg(Color::DarkGray),
            )));
        }

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn row_line<'a>(coordinator: &Coordinator, row: &'a Row, is_match: bool) -> Line<'a> {
        match row {
            Row::Gap => Line::from(""),
            Row::GroupHeader {
                name,
                repo_count,
                expanded,
            } => {
                let indicator = if *expanded { "▼" } else { "▶" };
                let color = if is_hidden_group(name) { Color::DarkGray } else { Color::Blue };
                let mut name_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
                if is_match {
                    name_style = name_style.add_modifier(Modifier::UNDERLINED);
                }
                Line::from(vec![
                    Span::styled(indicator, Style::default().fg(color)),
                    Span::raw(" "),
                    Span::styled(name.as_str(), name_style),
                    Span::raw(format!(" ({})", repo_count)),
                ])
            }
            Row::Repo(repo) => Self::repo_line(coordinator, repo, is_match),
        }
    }

    fn repo_line<'a>(coordinator: &Coordinator, repo: &'a Repository, is_match: bool) -> Line<'a> {
        let indent = if repo.group.is_empty() { "" } else { "  " };
        let mark = if coordinator.is_selected(&repo.path) { "✓ " } else { "  " };
        let (icon, color) = match coordinator.busy(&repo.path) {
            Some(kind) => (busy_icon(kind), Color::Cyan),
            None => status_icon(repo),
        };

        let mut name_style = Style::default();
        if is_match {
            name_style = name_style.fg(Color::Yellow).add_modifier(Modifier::UNDERLINED);
        }

        let mut spans = vec![
            Span::raw(indent),
            Span::styled(mark, Style::default().fg(Color::Green)),
            Span::styled(icon, Style::default().fg(color)),
            Span::raw(" "),
            Span::styled(repo.display_name.as_str(), name_style),
            Span::raw(" "),
            Span::styled(format!("[{}]", repo.status.branch), Style::default().fg(Color::Cyan)),
        ];

        if coordinator.options().show_ahead_behind {
            if repo.status.ahead_count > 0 {
                spans.push(Span::styled(
                    format!(" ↑{}", repo.status.ahead_count),
                    Style::default().fg(Color::Green),
                ));
            }
            if repo.status.behind_count > 0 {
                spans.push(Span::styled(
                    format!(" ↓{}", repo.status.behind_count),
                    Style::default().fg(Color::Red),
                ));
            }
        }
        if let Some(kind) = coordinator.busy(&repo.path) {
            spans.push(Span::styled(format!(" {}...", kind), Style::default().fg(Color::Cyan)));
        }
        if let Some(error) = repo.visible_error() {
            spans.push(Span::styled(format!(" ✗ {}", first_line(error)), Style::default().fg(Color::Red)));
        }
        Line::from(spans)
    }

    fn render_prompt(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let input = coordinator.input();
        let line = match &input.mode {
            InputMode::Normal => {
                let search = coordinator.search_state();
                if search.is_active() {
                    let position = match search.position() {
                        Some((current, total)) => format!("[{}/{}]", current, total),
                        None => "[no matches]".to_string(),
                    };
                    Line::from(vec![
                        Span::styled(format!("/{} ", search.query()), Style::default().fg(Color::Yellow)),
                        Span::styled(position, Style::default().fg(Color::DarkGray)),
                        Span::styled("  n/N next/prev", Style::default().fg(Color::DarkGray)),
                    ])
                } else {
                    Line::from(Span::styled(
                        "? Help | Space Select | r Refresh | f Fetch | p Pull | / Search | F Filter | s Sort | q Quit",
                        Style::default().fg(Color::Gray),
                    ))
                }
            }
            InputMode::Sort { index, .. } => {
                let mut spans = vec![Span::styled(input.mode.prompt(), Style::default().fg(Color::Yellow))];
                for (i, mode) in SortMode::ALL.iter().enumerate() {
                    let style = if i == *index {
                        Style::default().fg(Color::Black).bg(Color::Yellow)
                    } else {
                        Style::default().fg(Color::Gray)
                    };
                    spans.push(Span::styled(format!(" {} ", mode.label()), style));
                }
                spans.push(Span::styled(
                    format!("  {}", SortMode::at(*index).description()),
                    Style::default().fg(Color::DarkGray),
                ));
                Line::from(spans)
            }
            InputMode::DeleteConfirm { group } => Line::from(Span::styled(
                format!("Delete group '{}'? (y/n)", group),
                Style::default().fg(Color::Red),
            )),
            mode => Line::from(vec![
                Span::styled(mode.prompt(), Style::default().fg(Color::Yellow)),
                Span::raw(input.buffer.as_str()),
                Span::styled("█", Style::default().fg(Color::Yellow)),
            ]),
        };
        frame.render_widget(Paragraph::new(line), area);
    }

    fn render_status_line(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let paragraph = match coordinator.status() {
            Some(status) if status.is_error => Paragraph::new(format!("Error: {}", status.text))
                .style(Style::default().fg(Color::White).bg(Color::Red)),
            Some(status) => Paragraph::new(status.text.as_str())
                .style(Style::default().fg(Color::White).bg(Color::DarkGray)),
            None => Paragraph::new("").style(Style::default().bg(Color::DarkGray)),
        };
        frame.render_widget(paragraph, area);
    }

    fn render_info_panel(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let Some(repo) = coordinator.current_repo() else {
            return;
        };
        let popup_area = Self::centered_rect(70, 60, area);
        frame.render_widget(Clear, popup_area);

        let status = &repo.status;
        let state = if status.is_pending() {
            Span::styled("Pending", Style::default().fg(Color::DarkGray))
        } else if status.is_dirty {
            Span::styled("Dirty", Style::default().fg(Color::Yellow))
        } else if status.has_untracked {
            Span::styled("Untracked files", Style::default().fg(Color::Yellow))
        } else {
            Span::styled("Clean", Style::default().fg(Color::Green))
        };
        let group = if repo.group.is_empty() { "(ungrouped)" } else { repo.group.as_str() };

        let mut lines = vec![
            Line::from(Span::styled(repo.display_name.as_str(), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(format!("Path: {}", repo.path.display())),
            Line::from(format!("Group: {}", group)),
            Line::from(format!("Branch: {}", status.branch)),
            Line::from(vec![Span::raw("Status: "), state]),
            Line::from(format!("Ahead: {} | Behind: {}", status.ahead_count, status.behind_count)),
        ];
        if let Some(error) = repo.visible_error() {
            lines.push(Line::from(Span::styled(
                format!("Error: {}", error),
                Style::default().fg(Color::Red),
            )));
        }

        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Recent commands:",
            Style::default().add_modifier(Modifier::UNDERLINED),
        )));
        if repo.command_logs.is_empty() {
            lines.push(Line::from(Span::styled("  none", Style::default().fg(Color::DarkGray))));
        }
        for log in repo.command_logs.iter().rev().take(INFO_LOG_ENTRIES) {
            let (mark, color) = if log.success { ("✓", Color::Green) } else { ("✗", Color::Red) };
            let detail = if log.success { &log.output } else { &log.error };
            lines.push(Line::from(vec![
                Span::styled(format!("  {} ", mark), Style::default().fg(color)),
                Span::raw(format!("{:<6} {:>6}ms ", log.command.as_str(), log.duration_ms)),
                Span::styled(first_line(detail).to_string(), Style::default().fg(Color::Gray)),
            ]));
        }

        let panel = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Repository Info"))
            .wrap(Wrap { trim: false });
        frame.render_widget(panel, popup_area);
    }

    fn render_output_overlay(coordinator: &Coordinator, frame: &mut Frame, area: Rect) {
        let Some(overlay) = coordinator.overlay() else {
            return;
        };
        let popup_area = Self::centered_rect(90, 80, area);
        frame.render_widget(Clear, popup_area);

        let lines: Vec<Line> = match &overlay.text {
            None => vec![Line::from(Span::styled("Loading...", Style::default().fg(Color::DarkGray)))],
            Some(text) => text
                .lines()
                .map(|line| match overlay.kind {
                    OverlayKind::Diff => Line::from(Span::styled(line, diff_style(line))),
                    OverlayKind::Log => Line::from(line),
                })
                .collect(),
        };
        // Keep at least one line on screen
        let scroll = overlay.scroll.min(lines.len().saturating_sub(1));

        let block = Block::default()
            .borders(Borders::ALL)
            .title(overlay.title.as_str())
            .title_bottom(" j/k scroll | Esc close ");
        let paragraph = Paragraph::new(lines)
            .block(block)
            .scroll((u16::try_from(scroll).unwrap_or(u16::MAX), 0));
        frame.render_widget(paragraph, popup_area);
    }

    fn render_help(frame: &mut Frame, area: Rect) {
        let popup_area = Self::centered_rect(70, 90, area);
        frame.render_widget(Clear, popup_area);

        let lines: Vec<Line> = HELP_LINES
            .iter()
            .map(|(keys, action)| {
                if action.is_empty() {
                    Line::from(Span::styled(*keys, Style::default().add_modifier(Modifier::UNDERLINED)))
                } else {
                    Line::from(vec![
                        Span::styled(format!("  {:<16}", keys), Style::default().fg(Color::Yellow)),
                        Span::raw(*action),
                    ])
                }
            })
            .collect();

        let help = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Help (any key to close)"))
            .wrap(Wrap { trim: false });
        frame.render_widget(help, popup_area);
    }

    /// Helper to create centered rectangle
    fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(r);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

/// Icon and colour summarising a repository's state
pub fn status_icon(repo: &Repository) -> (&'static str, Color) {
    let status = &repo.status;
    if repo.visible_error().is_some() {
        ("✗", Color::Red)
    } else if status.is_pending() {
        ("⋯", Color::DarkGray)
    } else if status.is_dirty {
        ("●", Color::Yellow)
    } else if status.has_untracked {
        ("?", Color::Yellow)
    } else if status.is_diverged() {
        ("⇅", Color::Magenta)
    } else if status.ahead_count > 0 || status.behind_count > 0 {
        ("↕", Color::Cyan)
    } else {
        ("✓", Color::Green)
    }
}

fn busy_icon(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Fetch | CommandKind::Pull => "⇣",
        _ => "↻",
    }
}

fn diff_style(line: &str) -> Style {
    if line.starts_with("+++") || line.starts_with("---") {
        Style::default().add_modifier(Modifier::BOLD)
    } else if line.starts_with('+') {
        Style::default().fg(Color::Green)
    } else if line.starts_with('-') {
        Style::default().fg(Color::Red)
    } else if line.starts_with("@@") {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
