use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};

use crate::{
    app::App, clock::Clock, execution::CodeExecutor, exercise::Verdict, session::Mode,
    store::KeyValueStore,
};

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;
const LOW_TIME_SECS: u64 = 60;

impl<S: KeyValueStore, C: Clock, X: CodeExecutor> Widget for &App<S, C, X> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let view = self.view();

        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        let dim_style = Style::default().add_modifier(Modifier::DIM);
        let italic_style = Style::default().add_modifier(Modifier::ITALIC);

        match view.mode {
            Mode::Active => {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .horizontal_margin(HORIZONTAL_MARGIN)
                    .vertical_margin(VERTICAL_MARGIN)
                    .constraints([
                        Constraint::Length(1), // title + countdown
                        Constraint::Length(3), // prompt
                        Constraint::Min(3),    // editor
                        Constraint::Length(6), // last run
                        Constraint::Length(1), // legend
                    ])
                    .split(area);

                let timer_style = if view.time_remaining_secs <= LOW_TIME_SECS {
                    bold_style.fg(Color::Red)
                } else {
                    bold_style.fg(Color::Yellow)
                };

                Paragraph::new(Line::from(vec![
                    Span::styled(self.exercise.title.clone(), bold_style),
                    Span::styled(format!("  [{}]  ", self.exercise.language), dim_style),
                    Span::styled(view.formatted_countdown.clone(), timer_style),
                ]))
                .render(chunks[0], buf);

                Paragraph::new(self.exercise.prompt.clone())
                    .style(italic_style)
                    .wrap(Wrap { trim: true })
                    .render(chunks[1], buf);

                let mut editor_text = self.source.clone();
                editor_text.push('█');
                Paragraph::new(editor_text)
                    .block(Block::default().borders(Borders::ALL).title("code"))
                    .render(chunks[2], buf);

                let (title, body, style) = match (&self.status, &self.last_run, self.verdict) {
                    (Some(status), _, _) => (
                        "error".to_string(),
                        status.clone(),
                        Style::default().fg(Color::Red),
                    ),
                    (None, Some(run), Some(Verdict::Fail)) => {
                        let mut body = run.stdout.clone();
                        if !run.stderr.is_empty() {
                            body.push_str(&run.stderr);
                        }
                        let title = if run.succeeded() {
                            "output (not quite)".to_string()
                        } else {
                            format!("output (not quite, exit {})", run.exit_code)
                        };
                        (title, body, Style::default().fg(Color::Red))
                    }
                    (None, Some(run), _) => ("output".to_string(), run.stdout.clone(), Style::default()),
                    (None, None, _) => ("output".to_string(), String::new(), dim_style),
                };
                let title = if self.is_running() {
                    format!("{title} [running...]")
                } else {
                    title
                };
                Paragraph::new(body)
                    .style(style)
                    .block(Block::default().borders(Borders::ALL).title(title))
                    .wrap(Wrap { trim: false })
                    .render(chunks[3], buf);

                Paragraph::new(Span::styled("(ctrl+r) run / (esc)ape", italic_style))
                    .render(chunks[4], buf);
            }
            Mode::Defeated | Mode::Locked | Mode::Completed => {
                let (headline, detail, color) = match view.mode {
                    Mode::Completed => (
                        "Challenge complete!".to_string(),
                        format!("{} left on the clock", view.formatted_countdown),
                        Color::Green,
                    ),
                    Mode::Defeated => (
                        "Time's up!".to_string(),
                        format!("Next attempt in {}", view.formatted_lock_countdown),
                        Color::Red,
                    ),
                    _ => (
                        "Challenges are locked".to_string(),
                        format!("Try again in {}", view.formatted_lock_countdown),
                        Color::Yellow,
                    ),
                };

                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Percentage(40),
                        Constraint::Length(1),
                        Constraint::Length(1),
                        Constraint::Length(1),
                        Constraint::Min(1),
                    ])
                    .split(area);

                Paragraph::new(Span::styled(headline, bold_style.fg(color)))
                    .alignment(Alignment::Center)
                    .render(chunks[1], buf);

                Paragraph::new(Span::styled(detail, bold_style))
                    .alignment(Alignment::Center)
                    .render(chunks[2], buf);

                Paragraph::new(Span::styled("(esc)ape", italic_style))
                    .alignment(Alignment::Center)
                    .render(chunks[4], buf);
            }
        }
    }
}
