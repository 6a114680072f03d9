use crate::client::AppSnapshot;
use case_rush::{
    catalog::{
        CaseItem,
        Rarity,
    },
    ledger::{
        Address,
        OwnedItem,
    },
    opening::Phase,
    roll::Reel,
    session::CASE_PRICE,
};
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;
use unicode_width::{
    UnicodeWidthChar,
    UnicodeWidthStr,
};

const REEL_CELL_WIDTH: u16 = 16;

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

pub enum UserEvent {
    Quit,
    Redraw,
    OpenCase,
    PlayAgain,
    CycleSort,
    RefreshInventory,
    ConfirmSell { inventory_index: usize },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Tab {
    #[default]
    Inventory,
    Leaderboard,
}

#[derive(Clone, Debug, Default)]
enum Mode {
    #[default]
    Normal,
    SellConfirm(SellState),
    Help,
    QuitModal,
}

#[derive(Clone, Debug)]
struct SellState {
    inventory_index: usize,
    name: String,
    floor_price: f64,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    tab: Tab,
    selected: usize,
    phase: Option<Phase>,
    sellable: bool,
    owned: Vec<OwnedItem>,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

/// Reads terminal events on a dedicated thread so the async loop never blocks on input.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let ev = event::read();
            let failed = ev.is_err();
            if tx.send(ev).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    let ev = input_events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input stream closed"))?;
    Ok(ev?)
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.phase = Some(snap.phase);
    state.sellable = snap.sellable;
    state.owned = snap.owned.clone();
    state.selected = state.selected.min(state.owned.len().saturating_sub(1));
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let Event::Key(k) = event else {
        return match event {
            Event::Resize(..) => Some(UserEvent::Redraw),
            _ => None,
        };
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    match &state.mode {
        Mode::SellConfirm(sell) => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    let inventory_index = sell.inventory_index;
                    state.mode = Mode::Normal;
                    Some(UserEvent::ConfirmSell { inventory_index })
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Help => {
            state.mode = Mode::Normal;
            return Some(UserEvent::Redraw);
        }
        Mode::Normal => {}
    }

    let phase = state.phase.unwrap_or(Phase::Idle);
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('?') => {
            state.mode = Mode::Help;
            Some(UserEvent::Redraw)
        }
        KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('o') => match phase {
            Phase::Idle => Some(UserEvent::OpenCase),
            Phase::Revealed => Some(UserEvent::PlayAgain),
            Phase::AwaitingOutcome | Phase::Animating => None,
        },
        KeyCode::Char('s') => Some(UserEvent::CycleSort),
        KeyCode::Char('r') => Some(UserEvent::RefreshInventory),
        KeyCode::Tab => {
            state.tab = match state.tab {
                Tab::Inventory => Tab::Leaderboard,
                Tab::Leaderboard => Tab::Inventory,
            };
            Some(UserEvent::Redraw)
        }
        KeyCode::Up | KeyCode::Char('k') => {
            state.selected = state.selected.saturating_sub(1);
            Some(UserEvent::Redraw)
        }
        KeyCode::Down | KeyCode::Char('j') => {
            let max = state.owned.len().saturating_sub(1);
            state.selected = (state.selected + 1).min(max);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('x') => {
            if !state.sellable || state.tab != Tab::Inventory {
                return None;
            }
            let owned = state.owned.get(state.selected)?;
            state.mode = Mode::SellConfirm(SellState {
                inventory_index: owned.inventory_index,
                name: owned.item.name.clone(),
                floor_price: owned.item.floor_price,
            });
            Some(UserEvent::Redraw)
        }
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // case header
            Constraint::Min(10),   // catalog + inventory/leaderboard
            Constraint::Length(7), // reel
            Constraint::Length(6), // status/errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    draw_catalog(f, middle[0], snap);
    match state.tab {
        Tab::Inventory => draw_inventory(f, middle[1], state, snap),
        Tab::Leaderboard => draw_leaderboard(f, middle[1], snap),
    }
    draw_reel(f, chunks[2], snap);
    draw_status(f, chunks[3], snap);
    draw_help(f, chunks[4], snap);
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let price = if snap.sellable {
        format!("{CASE_PRICE} BNB")
    } else {
        String::from("free (demo)")
    };
    let mut text = format!(
        "{} | {} | Player: {} | Price: {} | Holding: {:.4} BNB",
        snap.case_name,
        snap.network,
        Address::new(snap.user.clone()).short(),
        price,
        snap.inventory_value()
    );
    if let Some(description) = &snap.case_description {
        text.push_str(" | ");
        text.push_str(description);
    }
    let widget =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Case"));
    f.render_widget(widget, area);
}

fn draw_catalog(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let rows = snap.items.iter().map(|item| {
        Row::new(vec![
            Cell::from(item.name.clone()),
            Cell::from(item.rarity.label()),
            Cell::from(format!("{:.2}%", item.probability * 100.0)),
            Cell::from(format!("{}", item.floor_price)),
        ])
        .style(Style::default().fg(rarity_color(item.rarity)))
    });
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(45),
            Constraint::Percentage(25),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
        ],
    )
    .header(
        Row::new(vec!["Item", "Rarity", "Odds", "BNB"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Contents (sort: {})", snap.sort.label())),
    );
    f.render_widget(table, area);
}

fn draw_inventory(f: &mut Frame, area: Rect, state: &UiState, snap: &AppSnapshot) {
    let lines: Vec<Line> = if snap.sellable {
        if snap.owned.is_empty() {
            vec![Line::from("No unsold items on the ledger")]
        } else {
            snap.owned
                .iter()
                .enumerate()
                .map(|(i, owned)| {
                    let marker = if i == state.selected { "> " } else { "  " };
                    let age = owned
                        .won_at
                        .map(|at| format_age(snap.now, at))
                        .unwrap_or_default();
                    Line::from(format!(
                        "{marker}{} | {} BNB | {age}",
                        owned.item.name, owned.item.floor_price
                    ))
                    .style(Style::default().fg(rarity_color(owned.item.rarity)))
                })
                .collect()
        }
    } else if snap.local_inventory.is_empty() {
        vec![Line::from("Nothing won yet")]
    } else {
        snap.local_inventory
            .iter()
            .rev()
            .map(|record| {
                Line::from(format!(
                    "{} | {} BNB | {}",
                    record.item.name,
                    record.item.floor_price,
                    format_age(snap.now, record.won_at)
                ))
                .style(Style::default().fg(rarity_color(record.item.rarity)))
            })
            .collect()
    };
    let title = if snap.sellable {
        "Inventory [Tab: leaderboard | x: sell]"
    } else {
        "Inventory [Tab: leaderboard]"
    };
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_leaderboard(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(area);

    let stats = Paragraph::new(leaderboard_summary(snap))
        .block(Block::default().borders(Borders::ALL).title("Stats"));
    f.render_widget(stats, chunks[0]);

    let lines: Vec<Line> = if snap.leaderboard.is_empty() {
        vec![Line::from("No openings yet")]
    } else {
        snap.leaderboard
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                Line::from(format!(
                    "{:>3}. {} | {} | {} | {} BNB | {}",
                    rank + 1,
                    Address::new(entry.user.clone()).short(),
                    entry.item.name,
                    entry.case_name,
                    entry.value,
                    format_age(snap.now, entry.timestamp)
                ))
                .style(Style::default().fg(rarity_color(entry.item.rarity)))
            })
            .collect()
    };
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Recent Drops [Tab: inventory]"),
    );
    f.render_widget(widget, chunks[1]);
}

fn leaderboard_summary(snap: &AppSnapshot) -> String {
    let stats = snap.leaderboard_stats();
    format!(
        "Total Cases Opened: {} | Total Value Won: {:.4} BNB | Highest Win: {} BNB",
        stats.total_opened, stats.total_value, stats.highest_win
    )
}

fn draw_reel(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let block = Block::default().borders(Borders::ALL).title(match snap.phase {
        Phase::Idle => "Reel",
        Phase::AwaitingOutcome => "Reel (waiting for outcome)",
        Phase::Animating => "Reel (spinning)",
        Phase::Revealed => "Reel (revealed)",
    });
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(reel) = &snap.reel else {
        let hint = Paragraph::new("Press Enter to open the case")
            .alignment(Alignment::Center);
        f.render_widget(hint, inner);
        return;
    };
    let position = match snap.phase {
        Phase::Revealed => reel.target_index(),
        _ => reel_position(reel, snap.progress.unwrap_or(0.0)),
    };
    let visible = (inner.width / REEL_CELL_WIDTH).max(1) as usize;
    let (start, end) = reel_window(reel.len(), position, visible);
    for (slot, index) in (start..end).enumerate() {
        let entry = &reel.entries()[index];
        let rect = Rect::new(
            inner.x + slot as u16 * REEL_CELL_WIDTH,
            inner.y,
            REEL_CELL_WIDTH,
            inner.height,
        );
        let mut style = Style::default().fg(rarity_color(entry.item.rarity));
        let centered = index == position;
        if centered {
            style = style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
        }
        let width = REEL_CELL_WIDTH.saturating_sub(2) as usize;
        let lines = vec![
            Line::from(truncate(&entry.item.weapon, width)),
            Line::from(truncate(&entry.item.skin, width)),
            Line::from(truncate(entry.item.rarity.label(), width)),
        ];
        let cell = Paragraph::new(lines).style(style).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(if centered && snap.phase == Phase::Revealed {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                }),
        );
        f.render_widget(cell, rect);
    }
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let status_widget = if snap.errors.is_empty() {
        let mut lines: Vec<Line> = Vec::new();
        if snap.status.trim().is_empty() {
            lines.push(Line::from("Ready"));
        } else {
            for line in snap.status.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        if let Some(outcome) = snap.outcome.as_ref().filter(|_| snap.phase == Phase::Revealed)
        {
            lines.push(winner_line(&outcome.winner));
            if let Some(tx) = &outcome.transaction {
                lines.push(Line::from(format!("tx {tx}")));
            }
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        for e in &snap.errors {
            lines.push(Line::from(e.clone()));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(status_widget, area);
}

fn winner_line(item: &CaseItem) -> Line<'static> {
    Line::from(vec![
        Span::raw("Winner: "),
        Span::styled(
            format!("{} ({})", item.name, item.rarity),
            Style::default()
                .fg(rarity_color(item.rarity))
                .add_modifier(Modifier::BOLD),
        ),
    ])
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = if snap.sellable {
        "Enter open/play again | s sort | Tab switch | ↑/↓ select | x sell | r refresh | ? help | q quit"
    } else {
        "Enter open/play again | s sort | Tab switch | r refresh | ? help | q quit"
    };
    let help =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::SellConfirm(sell) => {
            let area = centered_rect(50, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Sale");
            let p = Paragraph::new(format!(
                "Sell {} for {} BNB? (Y/N)",
                sell.name, sell.floor_price
            ))
            .wrap(Wrap { trim: true });
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Help => {
            let area = centered_rect(60, 50, f.area());
            let block = Block::default().borders(Borders::ALL).title("How it works");
            let lines = vec![
                Line::from("The winner is decided before the reel starts moving."),
                Line::from("Demo mode rolls locally; ledger modes read the winner back"),
                Line::from("from the contract after openCase confirms."),
                Line::from(""),
                Line::from("Rarities, most common first:"),
            ]
            .into_iter()
            .chain(Rarity::ALL.iter().map(|rarity| {
                Line::from(format!("  {}", rarity.label()))
                    .style(Style::default().fg(rarity_color(*rarity)))
            }))
            .collect::<Vec<_>>();
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(Paragraph::new(lines), block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

fn rarity_color(rarity: Rarity) -> Color {
    let hex = rarity.color_hex().trim_start_matches('#');
    match u32::from_str_radix(hex, 16) {
        Ok(rgb) => Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8),
        Err(_) => Color::White,
    }
}

/// Cubic ease-out: fast start, slow landing.
fn ease_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

fn reel_position(reel: &Reel, progress: f64) -> usize {
    let target = reel.target_index();
    ((ease_out(progress) * target as f64).round() as usize).min(target)
}

/// Range of entries to show with `position` as close to the middle as the reel allows.
fn reel_window(len: usize, position: usize, visible: usize) -> (usize, usize) {
    if len <= visible {
        return (0, len);
    }
    let start = position
        .saturating_sub(visible / 2)
        .min(len - visible);
    (start, start + visible)
}

fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    match seconds {
        0..60 => String::from("Just now"),
        60..3_600 => format!("{}m ago", seconds / 60),
        3_600..86_400 => format!("{}h ago", seconds / 3_600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use case_rush::catalog::CaseCatalog;
    use chrono::Duration;
    use crossterm::event::{
        KeyEvent,
        KeyModifiers,
    };

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn owned(inventory_index: usize) -> OwnedItem {
        let catalog = CaseCatalog::bundled().unwrap();
        OwnedItem {
            inventory_index,
            item_id: 1,
            won_at: None,
            item: catalog.items[0].clone(),
        }
    }

    #[test]
    fn format_age__buckets_by_minutes_hours_and_days() {
        // given
        let now = Utc::now();

        // then
        assert_eq!(format_age(now, now - Duration::seconds(30)), "Just now");
        assert_eq!(format_age(now, now - Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(now, now - Duration::hours(3)), "3h ago");
        assert_eq!(format_age(now, now - Duration::days(2)), "2d ago");
        assert_eq!(format_age(now, now + Duration::minutes(1)), "Just now");
    }

    #[test]
    fn truncate__respects_display_width() {
        assert_eq!(truncate("Karambit", 10), "Karambit");
        assert_eq!(truncate("Chromatic Aberration", 8), "Chromat…");
        assert_eq!(truncate("ＡＢＣ", 4), "Ａ…");
    }

    #[test]
    fn ease_out__starts_fast_and_lands_on_target() {
        assert_eq!(ease_out(0.0), 0.0);
        assert_eq!(ease_out(1.0), 1.0);
        assert_eq!(ease_out(2.0), 1.0);
        assert!(ease_out(0.5) > 0.5);
    }

    #[test]
    fn reel_window__keeps_position_visible_near_edges() {
        assert_eq!(reel_window(100, 0, 5), (0, 5));
        assert_eq!(reel_window(100, 85, 5), (83, 88));
        assert_eq!(reel_window(100, 99, 5), (95, 100));
        assert_eq!(reel_window(3, 2, 5), (0, 3));
    }

    #[test]
    fn rarity_color__parses_hex_tiers() {
        assert_eq!(rarity_color(Rarity::Special), Color::Rgb(0xFF, 0xD7, 0x00));
        assert_eq!(rarity_color(Rarity::Covert), Color::Rgb(0xEB, 0x4B, 0x4B));
    }

    #[test]
    fn interpret_event__enter_opens_when_idle_and_replays_when_revealed() {
        // given
        let mut state = UiState::default();

        // when
        let idle = interpret_event(&mut state, key(KeyCode::Enter));
        state.phase = Some(Phase::Animating);
        let spinning = interpret_event(&mut state, key(KeyCode::Enter));
        state.phase = Some(Phase::Revealed);
        let revealed = interpret_event(&mut state, key(KeyCode::Enter));

        // then
        assert!(matches!(idle, Some(UserEvent::OpenCase)));
        assert!(spinning.is_none());
        assert!(matches!(revealed, Some(UserEvent::PlayAgain)));
    }

    #[test]
    fn interpret_event__sell_requires_confirmation() {
        // given
        let mut state = UiState {
            sellable: true,
            owned: vec![owned(0), owned(4)],
            ..UiState::default()
        };
        interpret_event(&mut state, key(KeyCode::Down));

        // when
        let opened = interpret_event(&mut state, key(KeyCode::Char('x')));
        let confirmed = interpret_event(&mut state, key(KeyCode::Char('y')));

        // then
        assert!(matches!(opened, Some(UserEvent::Redraw)));
        assert!(matches!(
            confirmed,
            Some(UserEvent::ConfirmSell { inventory_index: 4 })
        ));
        assert!(matches!(state.mode, Mode::Normal));
    }

    #[test]
    fn interpret_event__sell_is_ignored_in_demo_mode() {
        // given
        let mut state = UiState {
            owned: vec![owned(0)],
            ..UiState::default()
        };

        // when
        let result = interpret_event(&mut state, key(KeyCode::Char('x')));

        // then
        assert!(result.is_none());
        assert!(matches!(state.mode, Mode::Normal));
    }
}
