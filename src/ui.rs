use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Wrap,
};

use crate::app::{App, Dialog, Overlay};
use crate::dialog::{Confirmation, Picker, Prompt, TransferForm};
use crate::flash::FlashLevel;
use crate::keys::KeyHint;
use crate::view::ResourceViewer;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);
const PL_E: Color = Color::Rgb(13, 148, 136);
const SELECTED_BG: Color = Color::Rgb(24, 36, 58);
const MARK_ICON: &str = "󰄲 ";

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_hints(frame, root[1], app);
    render_body(frame, root[2], app);
    render_footer(frame, root[3], app);

    if app.show_help() {
        render_help_modal(frame, app);
    }
    match app.dialog() {
        Some(Dialog::Confirm(dialog)) => render_confirm(frame, dialog),
        Some(Dialog::Pick(picker)) => render_picker(frame, picker),
        Some(Dialog::Prompt(prompt)) => render_prompt(frame, prompt),
        Some(Dialog::Transfer(form)) => render_transfer_form(frame, form),
        None => {}
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let left_line = build_left_header_line(app);
    let right_line = build_right_header_line(app);
    let right_width = spans_width(&right_line.spans) as u16;
    if area.width < 42 || right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line)
            .style(Style::default().bg(BG))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn build_left_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" 󰠳 {} ", compact_text(app.cluster(), 28)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰒓 {} ", compact_text(app.context(), 24)),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰉖 {} ", compact_text(&app.namespace_scope().label(), 20)),
        Color::White,
        PL_C,
        PL_D,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {} ", breadcrumbs(app.views())),
        Color::White,
        PL_D,
        BG,
    );
    Line::from(spans)
}

fn build_right_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    if let Some(count) = app.forwarders().map(|forwarders| forwarders.len())
        && count > 0
    {
        push_powerline_segment_rtl(
            &mut spans,
            format!(" 󰌘 {count} "),
            Color::Black,
            PL_E,
            BG,
        );
    }
    let refreshed = app
        .active_view()
        .and_then(|view| view.frame().last_refreshed)
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let next_bg = if spans.is_empty() { BG } else { PL_E };
    push_powerline_segment_rtl(
        &mut spans,
        format!(" 󰑓 {refreshed} "),
        Color::White,
        PANEL,
        next_bg,
    );
    Line::from(spans)
}

fn breadcrumbs(views: &[ResourceViewer]) -> String {
    views
        .iter()
        .map(|view| view.title().to_lowercase())
        .collect::<Vec<_>>()
        .join(" › ")
}

fn render_hints(frame: &mut Frame, area: Rect, app: &App) {
    let hints = app
        .active_view()
        .map(ResourceViewer::hints)
        .unwrap_or_default();
    let line = hint_line(&hints, area.width as usize);
    frame.render_widget(Paragraph::new(line).style(Style::default().bg(BG)), area);
}

/// Safe hints first; dangerous ones are drawn in the error color.
fn hint_line(hints: &[KeyHint], width: usize) -> Line<'static> {
    let mut spans = Vec::new();
    let mut used = 0usize;
    for hint in hints {
        let key = format!(" {}", hint.key);
        let description = format!(" {} ", hint.description);
        let chunk_width = key.chars().count() + description.chars().count();
        if used + chunk_width > width {
            if used < width {
                spans.push(Span::styled("…", Style::default().fg(MUTED)));
            }
            break;
        }
        let key_color = if hint.dangerous { ERROR } else { ACCENT };
        spans.push(Span::styled(
            key,
            Style::default().fg(key_color).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(description, Style::default().fg(MUTED)));
        used += chunk_width;
    }
    Line::from(spans)
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    app.set_table_page_size(table_rows_visible(area));

    if let Some(overlay) = app.overlay() {
        render_overlay(frame, area, overlay);
        return;
    }
    if let Some(view) = app.active_view() {
        render_table(frame, area, view);
    }
}

fn render_overlay(frame: &mut Frame, area: Rect, overlay: &Overlay) {
    let paragraph = Paragraph::new(Text::from(overlay.text.clone()))
        .wrap(Wrap { trim: false })
        .scroll((overlay.scroll, 0))
        .block(
            Block::default()
                .title(format!(" {} ", overlay.title))
                .title_bottom(Line::from(" Esc close  j/k scroll  g/G top/bottom ").fg(MUTED))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_table(frame: &mut Frame, area: Rect, view: &ResourceViewer) {
    let data = view.frame();
    if let Some(error) = &data.error {
        let panel = Paragraph::new(Text::from(error.clone()))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(format!(" {} Error ", view.title()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(ERROR))
                    .style(Style::default().bg(PANEL)),
            )
            .style(Style::default().fg(ERROR));
        frame.render_widget(panel, area);
        return;
    }

    let sort = view.sort();
    let header_row = Row::new(data.headers.iter().map(|header| {
        let label = match sort {
            Some(sort) if sort.column.eq_ignore_ascii_case(header) => {
                format!("{header}{}", if sort.ascending { "↑" } else { "↓" })
            }
            _ => header.clone(),
        };
        Cell::from(label).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = data.rows.iter().map(|row| {
        let marked = view.is_marked(&row.path());
        let fg = if marked { WARN } else { Color::White };
        let mut cells = row
            .columns
            .iter()
            .map(|column| Cell::from(column.clone()).style(Style::default().fg(fg)))
            .collect::<Vec<_>>();
        if marked && let Some(first) = cells.first_mut() {
            let label = row.columns.first().cloned().unwrap_or_default();
            *first = Cell::from(format!("{MARK_ICON}{label}")).style(Style::default().fg(fg));
        }
        Row::new(cells)
    });

    let mut title = format!(" {} ({}) ", view.title(), data.rows.len());
    if view.mark_count() > 0 {
        title.push_str(&format!("[{} marked] ", view.mark_count()));
    }
    let mut block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));
    if let Some(summary) = &data.summary {
        block = block.title(
            Line::from(format!(" {summary} "))
                .fg(MUTED)
                .alignment(Alignment::Right),
        );
    }

    let table = Table::new(rows, column_constraints(data.headers.len()))
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(Style::default().bg(SELECTED_BG).add_modifier(Modifier::BOLD))
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    if !data.rows.is_empty() {
        state.select(Some(view.selected_index()));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let read_only = app.settings().read_only;
    let (status_bg, status_fg, status_icon, status_text) = match app.flash().message() {
        Some((FlashLevel::Info, text)) => (PL_B, Color::White, "󰋼", text.to_string()),
        Some((FlashLevel::Warn, text)) => (WARN, Color::Black, "󰀪", text.to_string()),
        Some((FlashLevel::Error, text)) => (ERROR, Color::Black, "󰅚", text.to_string()),
        None => (PANEL, MUTED, "󰋽", "? help  q quit".to_string()),
    };

    let mut spans = Vec::new();
    let (mode_label, mode_fg, mode_bg) = if read_only {
        (" 󰌾 ro ", Color::Black, WARN)
    } else {
        (" 󰘳 nrm ", Color::White, PL_A)
    };
    push_powerline_segment(&mut spans, mode_label, mode_fg, mode_bg, status_bg);
    let width_hint = area.width.saturating_sub(12).max(24) as usize;
    push_powerline_segment(
        &mut spans,
        format!(" {status_icon} {} ", compact_text(&status_text, width_hint)),
        status_fg,
        status_bg,
        BG,
    );
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(78, 72, frame.area());
    frame.render_widget(Clear, area);

    let title = app
        .active_view()
        .map(ResourceViewer::title)
        .unwrap_or_default();
    let mut lines = vec![
        Line::from(format!(
            "narwhal help  scope:{}  view:{}",
            app.namespace_scope(),
            title
        )),
        Line::from(""),
        Line::from("Navigation: j/k move  g/G top/bottom  PgUp/PgDn page  Esc back  q quit"),
        Line::from(""),
    ];
    let hints = app
        .active_view()
        .map(ResourceViewer::hints)
        .unwrap_or_default();
    for hint in hints {
        let key_color = if hint.dangerous { ERROR } else { ACCENT };
        lines.push(Line::from(vec![
            Span::styled(
                format!("{:<14}", hint.key.to_string()),
                Style::default().fg(key_color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(hint.description),
        ]));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn modal_block(title: &str, border: Color) -> Block<'static> {
    Block::default()
        .title(format!(" {title} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(PANEL))
}

fn render_confirm<T>(frame: &mut Frame, dialog: &Confirmation<T>) {
    let area = centered_rect(60, 30, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![Line::from(dialog.message.clone()), Line::from("")];
    match dialog.ack() {
        Some(_) => {
            let color = if dialog.can_accept() { ACCENT } else { WARN };
            lines.push(Line::from(vec![
                Span::styled("> ", Style::default().fg(MUTED)),
                Span::styled(format!("{}█", dialog.input()), Style::default().fg(color)),
            ]));
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Enter confirm  Esc cancel",
                Style::default().fg(MUTED),
            )));
        }
        None => lines.push(Line::from(vec![
            Span::styled("y", Style::default().fg(ERROR).add_modifier(Modifier::BOLD)),
            Span::styled(" confirm  ", Style::default().fg(MUTED)),
            Span::styled("n/Esc", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
            Span::styled(" cancel", Style::default().fg(MUTED)),
        ])),
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(modal_block(&dialog.title, WARN))
        .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn render_picker<T>(frame: &mut Frame, picker: &Picker<T>) {
    let area = centered_rect(50, 40, frame.area());
    frame.render_widget(Clear, area);

    let items = picker
        .items
        .iter()
        .map(|item| ListItem::new(item.clone()))
        .collect::<Vec<_>>();
    let list = List::new(items)
        .block(modal_block(&picker.title, ACCENT))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().bg(SELECTED_BG).add_modifier(Modifier::BOLD))
        .highlight_symbol("󰜴 ");
    let mut state = ListState::default();
    state.select(Some(picker.selected));
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_prompt<T>(frame: &mut Frame, prompt: &Prompt<T>) {
    let area = centered_rect(50, 20, frame.area());
    frame.render_widget(Clear, area);

    let lines = vec![
        Line::from(vec![
            Span::styled("> ", Style::default().fg(MUTED)),
            Span::styled(format!("{}█", prompt.input), Style::default().fg(ACCENT)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "Enter submit  Esc cancel",
            Style::default().fg(MUTED),
        )),
    ];
    let modal = Paragraph::new(lines)
        .block(modal_block(&prompt.title, ACCENT))
        .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn render_transfer_form(frame: &mut Frame, form: &TransferForm) {
    let area = centered_rect(64, 50, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = Vec::new();
    for (field, value) in form.fields() {
        let focused = field == form.focus;
        let label_style = if focused {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(MUTED)
        };
        let value_style = if focused {
            Style::default().fg(Color::White).bg(SELECTED_BG)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:<12}", field.label()), label_style),
            Span::styled(value, value_style),
        ]));
    }
    if !form.containers.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("containers: {}", form.containers.join(", ")),
            Style::default().fg(MUTED),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Tab next  Space toggle  Enter transfer  Esc cancel",
        Style::default().fg(MUTED),
    )));

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(modal_block(&format!("Transfer {}", form.path), ACCENT))
        .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn table_rows_visible(area: Rect) -> usize {
    area.height.saturating_sub(3).max(1) as usize
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Settings;
    use crate::keys::Key;
    use crate::model::{NamespaceScope, RowData, TableData};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    fn pods_app(read_only: bool) -> App {
        let mut app = App::new(
            "https://kind:6443".to_string(),
            "kind-dev".to_string(),
            NamespaceScope::Named("default".to_string()),
            Settings {
                read_only,
                ..Settings::default()
            },
        );
        let mut data = TableData::default();
        data.set_rows(
            vec!["NAME".to_string(), "STATUS".to_string()],
            ["web", "db"]
                .into_iter()
                .map(|name| RowData {
                    name: name.to_string(),
                    namespace: Some("default".to_string()),
                    columns: vec![name.to_string(), "Running".to_string()],
                    ..RowData::default()
                })
                .collect(),
            chrono::Local::now(),
        );
        app.set_active_data(data);
        app
    }

    fn render_snapshot(app: &mut App, width: u16, height: u16) -> String {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).expect("create test terminal");
        terminal.draw(|frame| render(frame, app)).expect("draw ui");
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(width as usize)
            .map(|row| {
                row.iter()
                    .map(|cell| cell.symbol())
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn press(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
        app.handle_key(KeyEvent::new(code, modifiers));
    }

    #[test]
    fn table_title_counts_rows_and_marks() {
        let mut app = pods_app(false);
        press(&mut app, KeyCode::Char(' '), KeyModifiers::NONE);
        let screen = render_snapshot(&mut app, 140, 20);
        assert!(screen.contains("Pods (2)"), "{screen}");
        assert!(screen.contains("[1 marked]"), "{screen}");
        assert!(screen.contains("kind-dev"), "{screen}");
    }

    #[test]
    fn read_only_footer_and_hints() {
        let mut app = pods_app(true);
        let screen = render_snapshot(&mut app, 140, 20);
        assert!(screen.contains("ro"), "{screen}");
        assert!(!screen.contains("Kill"), "{screen}");
        assert!(screen.contains("Logs"), "{screen}");
    }

    #[test]
    fn confirm_dialog_is_drawn_over_the_table() {
        let mut app = pods_app(false);
        press(&mut app, KeyCode::Char('k'), KeyModifiers::CONTROL);
        let screen = render_snapshot(&mut app, 140, 30);
        assert!(screen.contains("Kill default/web?"), "{screen}");
        assert!(screen.contains("confirm"), "{screen}");
    }

    #[test]
    fn error_panel_replaces_rows() {
        let mut app = pods_app(false);
        app.set_active_error("forbidden: pods is not allowed");
        let screen = render_snapshot(&mut app, 120, 16);
        assert!(screen.contains("Pods Error"), "{screen}");
        assert!(screen.contains("forbidden"), "{screen}");
    }

    #[test]
    fn dangerous_hints_use_error_color() {
        let hints = vec![
            KeyHint {
                key: Key::char('l'),
                description: "Logs".to_string(),
                dangerous: false,
            },
            KeyHint {
                key: Key::ctrl('k'),
                description: "Kill".to_string(),
                dangerous: true,
            },
        ];
        let line = hint_line(&hints, 80);
        let kill_key = line
            .spans
            .iter()
            .find(|span| span.content.contains("ctrl-k"))
            .expect("kill key span");
        assert_eq!(kill_key.style.fg, Some(ERROR));
        let logs_key = line
            .spans
            .iter()
            .find(|span| span.content.contains("<l>"))
            .expect("logs key span");
        assert_eq!(logs_key.style.fg, Some(ACCENT));
    }

    #[test]
    fn hint_line_truncates_to_width() {
        let hints = (0..20)
            .map(|index| KeyHint {
                key: Key::char('a'),
                description: format!("Action {index}"),
                dangerous: false,
            })
            .collect::<Vec<_>>();
        let line = hint_line(&hints, 40);
        assert!(spans_width(&line.spans) <= 40);
        assert_eq!(line.spans.last().map(|span| span.content.as_ref()), Some("…"));
    }

    #[test]
    fn compact_text_adds_ellipsis() {
        assert_eq!(compact_text("namespace", 4), "nam…");
        assert_eq!(compact_text("ns", 4), "ns");
    }
}
