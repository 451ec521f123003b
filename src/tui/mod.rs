use std::io;
use std::panic;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Bar, BarChart, BarGroup, Block, Borders, Cell, Gauge, Paragraph, Row as TableRow, Table,
    TableState, Tabs, Wrap,
};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::aggregate::aggregate;
use crate::api::AppSelection;
use crate::core::{Aggregates, Bucket, Row, RowField, Status};
use crate::refresh::{RefreshController, RefreshState, Trigger};
use crate::rows::flatten;
use crate::select::{
    Choice, FilterOptions, FilterState, SortDirection, SortState, cycle_choice, cycle_status,
    select_indices,
};
use crate::ui::{cell_text, showing_line, table_columns};

pub fn run(ctl: RefreshController, color: bool) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;

    let mut tui = Tui {
        terminal: Terminal::new(CrosstermBackend::new(stdout)).context("initialize terminal")?,
    };
    tui.terminal.clear().ok();

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        run_app(&mut tui.terminal, ctl, color)
    }));

    let _ = tui.terminal.show_cursor();
    let _ = disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = execute!(stdout, LeaveAlternateScreen);

    match res {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!(
            "the dashboard panicked (the terminal should have been restored)"
        )),
    }
}

struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Dashboard,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Servers = 0,
    Regions = 1,
    Apps = 2,
    Excluded = 3,
}

impl Tab {
    const TITLES: [&'static str; 4] = ["Servers", "By region", "By app", "Excluded"];

    fn next(self) -> Self {
        match self {
            Tab::Servers => Tab::Regions,
            Tab::Regions => Tab::Apps,
            Tab::Apps => Tab::Excluded,
            Tab::Excluded => Tab::Servers,
        }
    }

    fn prev(self) -> Self {
        match self {
            Tab::Servers => Tab::Excluded,
            Tab::Regions => Tab::Servers,
            Tab::Apps => Tab::Regions,
            Tab::Excluded => Tab::Apps,
        }
    }
}

#[derive(Default)]
struct View {
    seq: u64,
    rows: Vec<Row>,
    options: FilterOptions,
    agg: Aggregates,
    week_label: Option<String>,
}

struct App {
    color: bool,
    screen: Screen,
    tab: Tab,
    filter: FilterState,
    sort: SortState,
    search_mode: bool,
    table_state: TableState,
    view: View,
    tick: u64,
}

impl App {
    fn new(color: bool) -> Self {
        let mut table_state = TableState::default();
        table_state.select(Some(0));
        Self {
            color,
            screen: Screen::Dashboard,
            tab: Tab::Servers,
            filter: FilterState::default(),
            sort: SortState::default(),
            search_mode: false,
            table_state,
            view: View::default(),
            tick: 0,
        }
    }

    fn sync(&mut self, ctl: &RefreshController) {
        if ctl.applied_seq() == self.view.seq {
            return;
        }
        let Some(payload) = ctl.payload() else {
            return;
        };
        let rows = flatten(payload);
        self.view = View {
            seq: ctl.applied_seq(),
            options: FilterOptions::from_rows(&rows),
            agg: aggregate(payload),
            week_label: Some(payload.reference_week_label()),
            rows,
        };
        // Filters naming a region or app that vanished fall back to `all`.
        if let Choice::Only(region) = &self.filter.region {
            if !self.view.options.regions.contains(region) {
                self.filter.region = Choice::All;
            }
        }
        if let Choice::Only(app) = &self.filter.app {
            if !self.view.options.apps.contains(app) {
                self.filter.app = Choice::All;
            }
        }
        self.clamp_selection();
    }

    fn visible(&self) -> Vec<usize> {
        select_indices(&self.view.rows, &self.filter, &self.sort)
    }

    fn columns(&self) -> Vec<RowField> {
        table_columns(self.view.options.show_app_column())
    }

    fn clamp_selection(&mut self) {
        let len = self.visible().len();
        let idx = self.table_state.selected().unwrap_or(0);
        self.table_state
            .select(Some(if len == 0 { 0 } else { idx.min(len - 1) }));
    }

    fn reset_selection(&mut self) {
        self.table_state.select(Some(0));
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.visible().len();
        if len == 0 {
            return;
        }
        let idx = self.table_state.selected().unwrap_or(0) as isize;
        let next = (idx + delta).clamp(0, len as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    fn style(&self, color: Color) -> Style {
        if self.color {
            Style::default().fg(color)
        } else {
            Style::default()
        }
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut ctl: RefreshController,
    color: bool,
) -> Result<()> {
    let mut app = App::new(color);
    ctl.start(Instant::now());

    let tick_rate = Duration::from_millis(200);
    let mut last_tick = Instant::now();

    loop {
        ctl.poll(Instant::now());
        app.sync(&ctl);

        terminal
            .draw(|f| draw(f, &mut app, &ctl))
            .context("draw frame")?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout).context("wait for terminal event")? {
            if let Event::Key(key) = event::read().context("read terminal event")? {
                if key.kind == KeyEventKind::Press && handle_key(&mut app, &mut ctl, key, Instant::now())? {
                    break;
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick = app.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }

    ctl.shutdown();
    Ok(())
}

fn handle_key(
    app: &mut App,
    ctl: &mut RefreshController,
    key: KeyEvent,
    now: Instant,
) -> Result<bool> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Ok(true);
    }

    if app.search_mode {
        match key.code {
            KeyCode::Enter | KeyCode::Esc => app.search_mode = false,
            KeyCode::Backspace => {
                app.filter.search_term.pop();
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                app.filter.search_term.clear();
            }
            KeyCode::Char(c) => {
                if !key.modifiers.contains(KeyModifiers::CONTROL)
                    && !key.modifiers.contains(KeyModifiers::ALT)
                {
                    app.filter.search_term.push(c);
                }
            }
            _ => {}
        }
        app.reset_selection();
        return Ok(false);
    }

    if app.screen == Screen::Help {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('b') => {
                app.screen = Screen::Dashboard;
            }
            _ => {}
        }
        return Ok(false);
    }

    match key.code {
        KeyCode::Char('q') => return Ok(true),
        KeyCode::Char('?') => app.screen = Screen::Help,
        KeyCode::Char('r') => {
            ctl.trigger(Trigger::Manual, now);
        }
        KeyCode::Char('a') => {
            let enabled = !ctl.options().auto_refresh;
            ctl.set_auto_refresh(enabled, now);
        }
        KeyCode::Char('i') => {
            ctl.cycle_interval(now);
        }
        KeyCode::Char(']') | KeyCode::Char('[') => {
            let forward = key.code == KeyCode::Char(']');
            let next = step_selection(&ctl.selection_options(), ctl.selected(), forward);
            ctl.select_app(next, now);
        }
        KeyCode::Char('x') => ctl.dismiss_error(),
        KeyCode::Char('/') => {
            app.search_mode = true;
            app.tab = Tab::Servers;
        }
        KeyCode::Char('s') => {
            app.filter.status = cycle_status(app.filter.status.clone());
            app.reset_selection();
        }
        KeyCode::Char('g') => {
            app.filter.region = cycle_choice(&app.filter.region, &app.view.options.regions, true);
            app.reset_selection();
        }
        KeyCode::Char('f') => {
            if app.view.options.show_app_column() {
                app.filter.app = cycle_choice(&app.filter.app, &app.view.options.apps, true);
                app.reset_selection();
            }
        }
        KeyCode::Char('c') => {
            app.filter = FilterState::default();
            app.sort.clear();
            app.reset_selection();
        }
        KeyCode::Char(d @ '1'..='9') => {
            let cols = app.columns();
            let idx = (d as usize) - ('1' as usize);
            if let Some(field) = cols.get(idx) {
                app.sort.toggle(*field);
                app.reset_selection();
            }
        }
        KeyCode::Tab => app.tab = app.tab.next(),
        KeyCode::BackTab => app.tab = app.tab.prev(),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::PageDown => app.move_selection(10),
        KeyCode::PageUp => app.move_selection(-10),
        KeyCode::Home => app.reset_selection(),
        KeyCode::End => app.move_selection(isize::MAX / 2),
        _ => {}
    }
    Ok(false)
}

fn step_selection(options: &[AppSelection], current: &AppSelection, forward: bool) -> AppSelection {
    if options.is_empty() {
        return AppSelection::All;
    }
    let len = options.len();
    let pos = options.iter().position(|o| o == current).unwrap_or(0);
    let next = if forward {
        (pos + 1) % len
    } else {
        (pos + len - 1) % len
    };
    options[next].clone()
}

fn draw(f: &mut ratatui::Frame, app: &mut App, ctl: &RefreshController) {
    let size = f.size();

    let banner = banner_text(ctl);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(if banner.is_some() { 3 } else { 0 }),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(size);

    draw_header(f, chunks[0], app, ctl);
    if let Some(msg) = banner {
        draw_banner(f, chunks[1], app, &msg);
    }
    draw_cards(f, chunks[2], app);
    draw_tabs(f, chunks[3], app);
    draw_footer(f, chunks[5], app);

    if ctl.payload().is_none() {
        draw_placeholder(f, chunks[4], ctl);
    } else {
        match app.tab {
            Tab::Servers => draw_servers(f, chunks[4], app),
            Tab::Regions => draw_buckets(f, chunks[4], app, "Compliance by region", &app.view.agg.by_region),
            Tab::Apps => draw_buckets(f, chunks[4], app, "Compliance by app", &app.view.agg.by_app),
            Tab::Excluded => draw_excluded(f, chunks[4], app),
        }
    }

    if app.screen == Screen::Help {
        draw_help(f, size, app);
    }
}

fn banner_text(ctl: &RefreshController) -> Option<String> {
    match ctl.state() {
        RefreshState::Error(msg) => Some(msg),
        _ => None,
    }
}

fn log_notice(ctl: &RefreshController) -> Option<String> {
    ctl.log_error().map(|err| format!("refresh log disabled: {err}"))
}

fn draw_header(f: &mut ratatui::Frame, area: Rect, app: &App, ctl: &RefreshController) {
    const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

    let week = app
        .view
        .week_label
        .clone()
        .unwrap_or_else(|| "Week N/A".to_string());
    let auto = if ctl.options().auto_refresh {
        format!("auto {}", interval_label(ctl.options().interval))
    } else {
        "auto off".to_string()
    };
    let state = match ctl.state() {
        RefreshState::Fetching => format!("{} loading", SPINNER[(app.tick % 4) as usize]),
        RefreshState::Error(_) => "error".to_string(),
        RefreshState::Idle => "idle".to_string(),
    };
    let updated = ctl
        .last_success_at()
        .map(clock)
        .map(|t| format!("updated {t} UTC"))
        .unwrap_or_else(|| "never updated".to_string());
    let user = ctl.session().user().unwrap_or("anonymous").to_string();

    let mut spans = vec![
        Span::styled(
            "Server Image Compliance",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(week, app.style(Color::Cyan)),
        Span::raw("  app: "),
        Span::styled(ctl.selected().to_string(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("  {auto}  ")),
        Span::styled(state, app.style(Color::Yellow)),
        Span::styled(format!("  {updated}  {user}"), app.style(Color::DarkGray)),
    ];
    if let Some(notice) = log_notice(ctl) {
        spans.push(Span::styled(format!("  {notice}"), app.style(Color::Red)));
    }

    let w = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(w, area);
}

fn clock(ts: OffsetDateTime) -> String {
    ts.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".to_string())
}

fn interval_label(d: Duration) -> String {
    let mins = d.as_secs() / 60;
    if mins > 0 && d.as_secs() % 60 == 0 {
        format!("{mins}m")
    } else {
        format!("{}s", d.as_secs())
    }
}

fn draw_banner(f: &mut ratatui::Frame, area: Rect, app: &App, msg: &str) {
    let line = Line::from(vec![
        Span::styled(msg.to_string(), app.style(Color::Red).add_modifier(Modifier::BOLD)),
        Span::styled("  (x to dismiss, r to retry)", app.style(Color::DarkGray)),
    ]);
    let w = Paragraph::new(line)
        .block(Block::default().borders(Borders::ALL).title("Error"))
        .wrap(Wrap { trim: true });
    f.render_widget(w, area);
}

fn draw_cards(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(22),
            Constraint::Percentage(22),
            Constraint::Percentage(22),
            Constraint::Percentage(34),
        ])
        .split(area);

    let t = &app.view.agg.totals;
    let cards = [
        ("Total servers", t.total_servers, Color::White),
        ("Compliant", t.total_compliant, Color::Green),
        ("Non-compliant", t.total_non_compliant, Color::Red),
    ];
    for (i, (title, value, color)) in cards.iter().enumerate() {
        let w = Paragraph::new(Span::styled(
            value.to_string(),
            app.style(*color).add_modifier(Modifier::BOLD),
        ))
        .block(Block::default().borders(Borders::ALL).title(*title));
        f.render_widget(w, cols[i]);
    }

    let pct = t.compliance_percentage;
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Compliance rate"))
        .gauge_style(app.style(rate_color(pct.hundredths())))
        .ratio((pct.as_f64() / 100.0).clamp(0.0, 1.0))
        .label(format!("{pct}%"));
    f.render_widget(gauge, cols[3]);
}

fn rate_color(hundredths: u64) -> Color {
    match hundredths {
        9000.. => Color::Green,
        7000.. => Color::Yellow,
        _ => Color::Red,
    }
}

fn draw_tabs(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let excluded = app.view.agg.excluded_regions.len() + app.view.agg.excluded_apps.len();
    let titles: Vec<Line> = Tab::TITLES
        .iter()
        .enumerate()
        .map(|(i, t)| {
            if i == Tab::Excluded as usize && excluded > 0 {
                Line::from(format!("{t} ({excluded})"))
            } else {
                Line::from(*t)
            }
        })
        .collect();
    let tabs = Tabs::new(titles)
        .select(app.tab as usize)
        .highlight_style(app.style(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, area);
}

fn draw_placeholder(f: &mut ratatui::Frame, area: Rect, ctl: &RefreshController) {
    let msg = match ctl.state() {
        RefreshState::Fetching => "Loading compliance data...",
        _ => "No compliance data yet. Press r to refresh.",
    };
    let w = Paragraph::new(msg).block(Block::default().borders(Borders::ALL));
    f.render_widget(w, area);
}

fn draw_servers(f: &mut ratatui::Frame, area: Rect, app: &mut App) {
    let visible = app.visible();
    let cols = app.columns();

    let header = TableRow::new(cols.iter().enumerate().map(|(i, field)| {
        let mut label = format!("{} {}", i + 1, field.label());
        if app.sort.key == Some(*field) {
            label.push(' ');
            label.push_str(app.sort.direction.arrow());
        }
        Cell::from(label)
    }))
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows: Vec<TableRow> = visible
        .iter()
        .map(|&idx| {
            let row = &app.view.rows[idx];
            TableRow::new(cols.iter().map(|field| {
                let text = cell_text(row, *field);
                if *field == RowField::Status {
                    let color = match row.status {
                        Status::Compliant => Color::Green,
                        Status::NonCompliant => Color::Red,
                    };
                    Cell::from(text).style(app.style(color))
                } else {
                    Cell::from(text)
                }
            }))
        })
        .collect();

    let widths: Vec<Constraint> = cols
        .iter()
        .map(|field| match field {
            RowField::App | RowField::Region => Constraint::Length(14),
            RowField::ServerName | RowField::ImageName => Constraint::Min(16),
            RowField::Status => Constraint::Length(14),
            RowField::ImageWeek => Constraint::Length(10),
            _ => Constraint::Min(10),
        })
        .collect();

    let title = format!(
        "{}  [{}]",
        showing_line(visible.len(), app.view.rows.len()),
        filter_summary(app)
    );
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn filter_summary(app: &App) -> String {
    let mut parts = Vec::new();
    if app.search_mode || !app.filter.search_term.is_empty() {
        let cursor = if app.search_mode { "_" } else { "" };
        parts.push(format!("search: {}{cursor}", app.filter.search_term));
    }
    parts.push(format!("status: {}", app.filter.status));
    parts.push(format!("region: {}", app.filter.region));
    if app.view.options.show_app_column() {
        parts.push(format!("app: {}", app.filter.app));
    }
    if let Some(key) = app.sort.key {
        let dir = match app.sort.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        parts.push(format!("sort: {key} {dir}"));
    }
    parts.join(" | ")
}

fn draw_buckets(f: &mut ratatui::Frame, area: Rect, app: &App, title: &str, buckets: &[Bucket]) {
    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    if buckets.is_empty() {
        let msg = if app.tab == Tab::Apps {
            "Per-app comparison is shown when viewing all apps."
        } else {
            "No healthy regions reported."
        };
        f.render_widget(Paragraph::new(msg).block(block), area);
        return;
    }

    let max = buckets
        .iter()
        .map(|b| b.compliant.max(b.non_compliant))
        .max()
        .unwrap_or(0)
        .max(1);
    let mut chart = BarChart::default()
        .block(block)
        .bar_width(6)
        .bar_gap(1)
        .group_gap(3)
        .max(max);
    for bucket in buckets {
        let bars = [
            Bar::default()
                .value(bucket.compliant)
                .style(app.style(Color::Green))
                .text_value(bucket.compliant.to_string()),
            Bar::default()
                .value(bucket.non_compliant)
                .style(app.style(Color::Red))
                .text_value(bucket.non_compliant.to_string()),
        ];
        let label = format!("{} {}%", bucket.name, bucket.percentage());
        chart = chart.data(BarGroup::default().label(Line::from(label)).bars(&bars));
    }
    f.render_widget(chart, area);
}

fn draw_excluded(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let agg = &app.view.agg;
    let mut lines = Vec::new();
    if !agg.has_exclusions() {
        lines.push(Line::from("Every region answered."));
    }
    for excluded in &agg.excluded_apps {
        lines.push(Line::from(vec![
            Span::styled(format!("app {}", excluded.app), app.style(Color::Yellow)),
            Span::raw(format!(": {}", excluded.error)),
        ]));
    }
    for excluded in &agg.excluded_regions {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{}/{}", excluded.app, excluded.region),
                app.style(Color::Yellow),
            ),
            Span::raw(format!(": {}", excluded.error)),
        ]));
    }
    let w = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Left out of every total"),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(w, area);
}

fn draw_footer(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let (line1, line2) = if app.search_mode {
        (
            "type to search server/image names | Backspace delete | Ctrl-U clear",
            "Enter/Esc done | Ctrl-C quit",
        )
    } else if app.screen == Screen::Help {
        ("Esc/?/b close help", "q quit | Ctrl-C quit")
    } else {
        (
            "r refresh | a auto | i interval | [ ] app | / search | s status | g region | f app filter | 1-7 sort | c clear",
            "Tab view | j/k move | x dismiss error | ? help | q quit",
        )
    };
    let w = Paragraph::new(Text::from(vec![Line::from(line1), Line::from(line2)]))
        .style(app.style(Color::DarkGray))
        .wrap(Wrap { trim: true });
    f.render_widget(w, area);
}

fn draw_help(f: &mut ratatui::Frame, area: Rect, _app: &App) {
    let text = Text::from(vec![
        Line::from(Span::styled(
            "compliance-dash",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Data:"),
        Line::from("  r       : refresh now"),
        Line::from("  a       : toggle auto-refresh"),
        Line::from("  i       : next interval (1m, 5m, 10m, 30m)"),
        Line::from("  [ / ]   : previous / next app (all, then each app)"),
        Line::from("  x       : dismiss the error banner"),
        Line::from(""),
        Line::from("Table:"),
        Line::from("  /       : search server and image names"),
        Line::from("  s       : status filter (all, compliant, non-compliant)"),
        Line::from("  g       : region filter"),
        Line::from("  f       : app filter (with more than one app)"),
        Line::from("  1-7     : sort by column; again to reverse"),
        Line::from("  c       : clear filters and sort"),
        Line::from("  j/k ↑↓  : move"),
        Line::from(""),
        Line::from("Views:"),
        Line::from("  Tab / Shift-Tab : servers, by region, by app, excluded"),
        Line::from(""),
        Line::from("  q / Ctrl-C : quit"),
    ]);

    let popup = centered_rect(60, 70, area);
    f.render_widget(ratatui::widgets::Clear, popup);
    let w = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, popup);
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ComplianceSource;
    use crate::core::CompliancePayload;
    use crate::refresh::RefreshOptions;
    use crate::session::Session;
    use std::sync::{Arc, Mutex};

    const PAYLOAD: &str = r#"{"current_week": 10, "current_year": 2024, "apps": {
        "billing": {"regions": {
            "eu": {"total_servers": 2, "compliant": 1, "non_compliant": 1,
                "good_servers": [{"name": "web-1", "image_name": "base-2024w10"}],
                "bad_servers": [{"name": "web-2", "image_name": "base-2023w40", "reason": "Stale"}]},
            "us": {"total_servers": 1, "compliant": 0, "non_compliant": 1,
                "bad_servers": [{"name": "db-1", "image_name": "pg-2024w01"}]}
        }},
        "search": {"regions": {
            "eu": {"total_servers": 1, "compliant": 1, "non_compliant": 0,
                "good_servers": [{"name": "idx-1", "image_name": "idx-2024w10"}]}
        }}
    }}"#;

    struct Fixed {
        requested: Mutex<Vec<AppSelection>>,
    }

    impl ComplianceSource for Fixed {
        fn fetch_apps(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["search".to_string(), "billing".to_string()])
        }

        fn fetch_compliance(&self, app: &AppSelection) -> anyhow::Result<CompliancePayload> {
            self.requested.lock().unwrap().push(app.clone());
            CompliancePayload::from_json(PAYLOAD.as_bytes())
        }
    }

    fn loaded() -> (App, RefreshController, Arc<Fixed>) {
        let source = Arc::new(Fixed {
            requested: Mutex::new(vec![]),
        });
        let mut ctl = RefreshController::new(
            Arc::clone(&source) as Arc<dyn ComplianceSource>,
            Session::login("ops").unwrap(),
            RefreshOptions {
                default_app: Some(AppSelection::All),
                ..RefreshOptions::default()
            },
        );
        ctl.start(Instant::now());
        ctl.settle();
        let mut app = App::new(false);
        app.sync(&ctl);
        (app, ctl, source)
    }

    fn press(app: &mut App, ctl: &mut RefreshController, code: KeyCode) -> bool {
        handle_key(app, ctl, KeyEvent::new(code, KeyModifiers::NONE), Instant::now()).unwrap()
    }

    fn visible_names(app: &App) -> Vec<String> {
        app.visible()
            .into_iter()
            .map(|i| app.view.rows[i].server_name.clone())
            .collect()
    }

    #[test]
    fn sync_builds_view_once_per_payload() {
        let (mut app, ctl, _) = loaded();
        assert_eq!(app.view.seq, 1);
        assert_eq!(app.view.rows.len(), 4);
        assert_eq!(app.view.agg.totals.total_servers, 4);
        assert!(app.view.options.show_app_column());
        assert_eq!(app.columns()[0], RowField::App);

        app.view.rows.clear();
        app.sync(&ctl);
        assert!(app.view.rows.is_empty());
    }

    #[test]
    fn search_mode_captures_text_including_q() {
        let (mut app, mut ctl, _) = loaded();
        assert!(!press(&mut app, &mut ctl, KeyCode::Char('/')));
        for c in "IDX".chars() {
            press(&mut app, &mut ctl, KeyCode::Char(c));
        }
        assert_eq!(visible_names(&app), vec!["idx-1"]);
        assert!(!press(&mut app, &mut ctl, KeyCode::Char('q')));
        assert_eq!(app.filter.search_term, "IDXq");
        press(&mut app, &mut ctl, KeyCode::Backspace);
        press(&mut app, &mut ctl, KeyCode::Enter);
        assert!(!app.search_mode);
        assert_eq!(app.filter.search_term, "IDX");

        press(&mut app, &mut ctl, KeyCode::Char('/'));
        handle_key(
            &mut app,
            &mut ctl,
            KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL),
            Instant::now(),
        )
        .unwrap();
        assert!(app.filter.search_term.is_empty());
    }

    #[test]
    fn status_and_region_filters_cycle() {
        let (mut app, mut ctl, _) = loaded();
        press(&mut app, &mut ctl, KeyCode::Char('s'));
        press(&mut app, &mut ctl, KeyCode::Char('s'));
        assert_eq!(app.filter.status, Choice::Only(Status::NonCompliant));
        assert_eq!(visible_names(&app), vec!["web-2", "db-1"]);

        press(&mut app, &mut ctl, KeyCode::Char('g'));
        assert_eq!(app.filter.region, Choice::Only("eu".to_string()));
        assert_eq!(visible_names(&app), vec!["web-2"]);

        press(&mut app, &mut ctl, KeyCode::Char('c'));
        assert!(app.filter.is_empty());
        assert_eq!(visible_names(&app).len(), 4);
    }

    #[test]
    fn digit_sorts_by_column_and_flips_on_repeat() {
        let (mut app, mut ctl, _) = loaded();
        // Columns: App, Region, Server Name, ...
        press(&mut app, &mut ctl, KeyCode::Char('3'));
        assert_eq!(app.sort, SortState::by(RowField::ServerName, SortDirection::Asc));
        assert_eq!(visible_names(&app), vec!["db-1", "idx-1", "web-1", "web-2"]);
        press(&mut app, &mut ctl, KeyCode::Char('3'));
        assert_eq!(visible_names(&app), vec!["web-2", "web-1", "idx-1", "db-1"]);
        press(&mut app, &mut ctl, KeyCode::Char('9'));
        assert_eq!(app.sort.key, Some(RowField::ServerName));
    }

    #[test]
    fn selection_moves_within_bounds() {
        let (mut app, mut ctl, _) = loaded();
        press(&mut app, &mut ctl, KeyCode::Char('k'));
        assert_eq!(app.table_state.selected(), Some(0));
        press(&mut app, &mut ctl, KeyCode::End);
        assert_eq!(app.table_state.selected(), Some(3));
        press(&mut app, &mut ctl, KeyCode::Char('j'));
        assert_eq!(app.table_state.selected(), Some(3));
    }

    #[test]
    fn app_keys_walk_selection_options_and_fetch() {
        let (mut app, mut ctl, source) = loaded();
        assert_eq!(ctl.selected(), &AppSelection::All);
        press(&mut app, &mut ctl, KeyCode::Char(']'));
        assert_eq!(ctl.selected(), &AppSelection::App("billing".into()));
        assert!(ctl.is_fetching());
        ctl.settle();
        press(&mut app, &mut ctl, KeyCode::Char('['));
        assert_eq!(ctl.selected(), &AppSelection::All);
        press(&mut app, &mut ctl, KeyCode::Char('['));
        assert_eq!(ctl.selected(), &AppSelection::App("search".into()));
        ctl.settle();
        assert_eq!(source.requested.lock().unwrap().len(), 4);
    }

    #[test]
    fn refresh_auto_and_interval_keys_drive_the_controller() {
        let (mut app, mut ctl, _) = loaded();
        press(&mut app, &mut ctl, KeyCode::Char('r'));
        assert!(ctl.is_fetching());
        ctl.settle();
        assert_eq!(ctl.applied_seq(), 2);

        press(&mut app, &mut ctl, KeyCode::Char('a'));
        assert!(ctl.options().auto_refresh);
        assert!(ctl.next_tick().is_some());
        press(&mut app, &mut ctl, KeyCode::Char('i'));
        assert_eq!(ctl.options().interval, Duration::from_secs(600));
        press(&mut app, &mut ctl, KeyCode::Char('a'));
        assert_eq!(ctl.next_tick(), None);
    }

    #[test]
    fn help_and_quit() {
        let (mut app, mut ctl, _) = loaded();
        press(&mut app, &mut ctl, KeyCode::Char('?'));
        assert_eq!(app.screen, Screen::Help);
        press(&mut app, &mut ctl, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Dashboard);
        assert!(press(&mut app, &mut ctl, KeyCode::Char('q')));
        assert!(handle_key(
            &mut app,
            &mut ctl,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Instant::now(),
        )
        .unwrap());
    }

    #[test]
    fn tabs_wrap_both_ways() {
        let (mut app, mut ctl, _) = loaded();
        press(&mut app, &mut ctl, KeyCode::BackTab);
        assert_eq!(app.tab, Tab::Excluded);
        press(&mut app, &mut ctl, KeyCode::Tab);
        assert_eq!(app.tab, Tab::Servers);
    }

    #[test]
    fn failed_refresh_log_is_shown_in_header() {
        let home = std::env::temp_dir().join(format!(
            "compliance-dash-tui-home-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&home);
        std::fs::write(&home, b"not a directory").unwrap();

        let source = Arc::new(Fixed {
            requested: Mutex::new(vec![]),
        });
        let mut ctl = RefreshController::new(
            source as Arc<dyn ComplianceSource>,
            Session::login("ops").unwrap(),
            RefreshOptions {
                default_app: Some(AppSelection::All),
                ..RefreshOptions::default()
            },
        )
        .with_log(crate::logs::RefreshLog::new(&home, OffsetDateTime::now_utc()));
        ctl.start(Instant::now());
        ctl.settle();
        assert!(ctl.payload().is_some());
        let notice = log_notice(&ctl).expect("notice");
        assert!(notice.starts_with("refresh log disabled: "), "{notice}");

        let mut app = App::new(false);
        app.sync(&ctl);
        let mut terminal = Terminal::new(ratatui::backend::TestBackend::new(400, 30)).unwrap();
        terminal.draw(|f| draw(f, &mut app, &ctl)).unwrap();
        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("refresh log disabled"));

        let _ = std::fs::remove_file(&home);
    }

    #[test]
    fn clean_log_has_no_notice() {
        let (_, ctl, _) = loaded();
        assert!(log_notice(&ctl).is_none());
    }

    #[test]
    fn interval_labels() {
        assert_eq!(interval_label(Duration::from_secs(300)), "5m");
        assert_eq!(interval_label(Duration::from_secs(45)), "45s");
    }
}
