use color_eyre::Result;
use crossbeam::channel::{Receiver, Sender};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use ratatui::{
    DefaultTerminal,
    crossterm::event::{
        Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, MouseButton, MouseEvent,
        MouseEventKind, poll, read,
    },
    layout::{Flex, Position},
    prelude::*,
    widgets::{
        Bar, BarChart, BarGroup, Block, Clear, FrameExt, Gauge, LineGauge, List, ListItem, ListState,
        Paragraph, Wrap,
    },
};
use ratatui_explorer::{FileExplorer, Theme};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tui_big_text::{BigText, PixelSize};

use crate::{
    analyser::{Analyser, AnalyserWindow},
    command::{PlayerCommand, PlayerEvent},
    config::Config,
    equalizer::{BANDS, MAX_GAIN_DB, MIN_GAIN_DB, Preset},
    state::{Event, Panel, Playback, PlayerState, update},
    track::expand_selection,
    visualizer::{BAR_COUNT, downsample, heights},
};

const DISPLAY_FG: Color = Color::Rgb(0, 226, 0);
const DISPLAY_BG: Color = Color::Black;
const FRAME_FG: Color = Color::Rgb(189, 206, 214);
const ACCENT: Color = Color::Rgb(255, 200, 0);

const EQ_STEP_DB: f32 = 0.5;
const VOLUME_STEP: f32 = 0.05;
const MARQUEE_SEPARATOR: &str = "  ***  ";
// frames per marquee step
const MARQUEE_SPEED: u64 = 6;

struct App {
    state: PlayerState,
    explorer: FileExplorer,
    show_explorer: bool,
    // explorer entries picked with space, in picking order
    marked: Vec<PathBuf>,
    analyser: Analyser,
    command_tx: Sender<PlayerCommand>,
    event_rx: Receiver<PlayerEvent>,
    playlist: ListState,
    frame_count: u64,
    frame_interval: Duration,
    seek_step: f64,
    // last drawn positions, for mouse hits
    progress_area: Rect,
    volume_area: Rect,
    quit: bool,
}

impl App {
    fn new(
        state: PlayerState,
        explorer: FileExplorer,
        analyser: Analyser,
        command_tx: Sender<PlayerCommand>,
        event_rx: Receiver<PlayerEvent>,
        config: &Config,
    ) -> Self {
        Self {
            state,
            explorer,
            show_explorer: false,
            marked: Vec::new(),
            analyser,
            command_tx,
            event_rx,
            playlist: ListState::default(),
            frame_count: 0,
            frame_interval: Duration::from_secs_f64(1. / f64::from(config.frame_rate.max(1))),
            seek_step: config.seek_step_secs,
            progress_area: Rect::default(),
            volume_area: Rect::default(),
            quit: false,
        }
    }

    fn dispatch(&mut self, event: Event) {
        if event == Event::Quit {
            self.quit = true;
        }
        for cmd in update(&mut self.state, event) {
            if let Err(err) = self.command_tx.send(cmd) {
                log::error!("audio thread is gone: {}", err);
                self.quit = true;
            }
        }
    }

    fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        loop {
            let frame_start = Instant::now();

            // reports from the audio thread
            while let Ok(event) = self.event_rx.try_recv() {
                self.dispatch(Event::Player(event));
            }

            let bars = if self.state.is_playing() {
                downsample(&self.analyser.byte_frequency_data())
            } else {
                self.analyser.reset();
                [0.; BAR_COUNT]
            };
            self.dispatch(Event::Frame(bars));

            terminal.draw(|f| self.draw(f))?;
            self.frame_count = self.frame_count.wrapping_add(1);

            // input until the next frame is due
            let mut timeout = self.frame_interval.saturating_sub(frame_start.elapsed());
            while poll(timeout)? {
                let event = read()?;
                self.handle_terminal_event(event)?;
                if self.quit {
                    return Ok(());
                }
                timeout = self.frame_interval.saturating_sub(frame_start.elapsed());
            }
            if self.quit {
                return Ok(());
            }
        }
    }

    fn handle_terminal_event(&mut self, event: TermEvent) -> Result<()> {
        match &event {
            TermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                if self.state.alert.is_some() {
                    self.dispatch(Event::DismissAlert);
                } else if self.show_explorer {
                    match key.code {
                        KeyCode::Enter => self.select_files(),
                        KeyCode::Char(' ') => {
                            let path = self.explorer.current().path().clone();
                            toggle_mark(&mut self.marked, path);
                        }
                        KeyCode::Esc | KeyCode::Char('o') => self.show_explorer = false,
                        _ => self.explorer.handle(&event)?,
                    }
                } else {
                    self.handle_key(*key);
                }
            }
            TermEvent::Mouse(mouse) if !self.show_explorer => self.handle_mouse(*mouse),
            _ => (),
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let state = &self.state;
        let event = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Event::Quit,
            KeyCode::Char('z') => Event::Previous,
            KeyCode::Char('b') => Event::Next,
            KeyCode::Char('x') => {
                // x only starts, c only pauses
                if state.is_playing() {
                    return;
                }
                Event::TogglePlayPause
            }
            KeyCode::Char('c') => {
                if !state.is_playing() {
                    return;
                }
                Event::TogglePlayPause
            }
            KeyCode::Char(' ') => Event::TogglePlayPause,
            KeyCode::Char('v') => Event::Stop,
            KeyCode::Char('o') => {
                self.show_explorer = true;
                return;
            }
            KeyCode::Char('e') => Event::TogglePanel(Panel::Equalizer),
            KeyCode::Char('p') => {
                self.playlist.select(state.current_song_index.or(Some(0)));
                Event::TogglePanel(Panel::Playlist)
            }
            KeyCode::Char('+') | KeyCode::Char('=') => Event::SetVolume(state.volume + VOLUME_STEP),
            KeyCode::Char('-') => Event::SetVolume(state.volume - VOLUME_STEP),
            KeyCode::Char(',') => self.seek_by(-self.seek_step),
            KeyCode::Char('.') => self.seek_by(self.seek_step),
            code if state.show_eq_panel => match self.eq_key(code) {
                Some(event) => event,
                None => return,
            },
            code if state.show_playlist_panel => match self.playlist_key(code) {
                Some(event) => event,
                None => return,
            },
            KeyCode::Left => self.seek_by(-self.seek_step),
            KeyCode::Right => self.seek_by(self.seek_step),
            KeyCode::Up => Event::SetVolume(state.volume + VOLUME_STEP),
            KeyCode::Down => Event::SetVolume(state.volume - VOLUME_STEP),
            _ => return,
        };
        self.dispatch(event);
    }

    fn eq_key(&mut self, code: KeyCode) -> Option<Event> {
        let eq = &mut self.state.equalizer;
        let band = eq.selected_band;
        let gain = eq.gains().get(band).unwrap_or(0.);
        match code {
            KeyCode::Left => {
                eq.select_band(-1);
                None
            }
            KeyCode::Right => {
                eq.select_band(1);
                None
            }
            KeyCode::Up => Some(Event::SetBandGain {
                band,
                gain: gain + EQ_STEP_DB,
            }),
            KeyCode::Down => Some(Event::SetBandGain {
                band,
                gain: gain - EQ_STEP_DB,
            }),
            KeyCode::Char('0') => Some(Event::SetBandGain { band, gain: 0. }),
            KeyCode::Tab => Some(Event::SelectPreset(eq.preset().next())),
            _ => None,
        }
    }

    fn playlist_key(&mut self, code: KeyCode) -> Option<Event> {
        let len = self.state.songs.len();
        if len == 0 {
            return None;
        }
        let cursor = self.playlist.selected().unwrap_or(0).min(len - 1);
        match code {
            KeyCode::Up => {
                self.playlist.select(Some((cursor + len - 1) % len));
                None
            }
            KeyCode::Down => {
                self.playlist.select(Some((cursor + 1) % len));
                None
            }
            KeyCode::Enter => Some(Event::SelectSong(cursor)),
            _ => None,
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if mouse.kind != MouseEventKind::Down(MouseButton::Left) {
            return;
        }
        let pos = Position::new(mouse.column, mouse.row);
        if self.progress_area.contains(pos) {
            let fraction = click_fraction(self.progress_area, mouse.column);
            self.dispatch(Event::Seek(fraction));
        } else if self.volume_area.contains(pos) {
            let fraction = click_fraction(self.volume_area, mouse.column);
            self.dispatch(Event::SetVolume(fraction as f32));
        }
    }

    fn seek_by(&self, secs: f64) -> Event {
        let duration = self.state.duration;
        let fraction = if duration > 0. {
            (self.state.current_time + secs) / duration
        } else {
            0.
        };
        Event::Seek(fraction)
    }

    fn select_files(&mut self) {
        let picked = if self.marked.is_empty() {
            vec![self.explorer.current().path().clone()]
        } else {
            std::mem::take(&mut self.marked)
        };
        let selection = expand_selection(&picked);
        self.show_explorer = false;
        self.dispatch(Event::FilesSelected(selection));
    }

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let panel_open = self.state.show_eq_panel || self.state.show_playlist_panel;
        let [main, panel] = Layout::vertical([
            Constraint::Length(15),
            Constraint::Fill(if panel_open { 1 } else { 0 }),
        ])
        .areas(area);

        self.render_main_window(f, main);
        if self.state.show_eq_panel {
            self.render_equalizer(f, panel);
        } else if self.state.show_playlist_panel {
            self.render_playlist(f, panel);
        }

        if self.show_explorer {
            let area = Self::popup_area(area, 60, 70);
            let [list, hint] =
                Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(area);
            f.render_widget(Clear, area);
            f.render_widget_ref(self.explorer.widget(), list);
            let hint_text = format!(
                " space: mark  enter: open  esc: close  ({} marked)",
                self.marked.len()
            );
            f.render_widget(
                Paragraph::new(hint_text).bg(DISPLAY_BG).fg(FRAME_FG),
                hint,
            );
        }
        if let Some(alert) = &self.state.alert {
            let area = Self::popup_area(area, 50, 30);
            f.render_widget(Clear, area);
            let text = vec![
                Line::from(alert.as_str()),
                Line::from(""),
                Line::from("Press any key").dim(),
            ];
            let popup = Paragraph::new(text)
                .wrap(Wrap { trim: true })
                .alignment(Alignment::Center)
                .block(Block::bordered().title(" WinHrach ").fg(ACCENT));
            f.render_widget(popup, area);
        }
    }

    fn render_main_window(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered()
            .title(" WinHrach ".bold())
            .title_alignment(Alignment::Center)
            .fg(FRAME_FG);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let [top, progress, volume, controls] = Layout::vertical([
            Constraint::Length(6),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(2),
        ])
        .spacing(1)
        .areas(inner);

        let [time, visualizer, info] = Layout::horizontal([
            Constraint::Length(24),
            Constraint::Length(BAR_COUNT as u16 + 2),
            Constraint::Fill(1),
        ])
        .areas(top);

        self.render_time(frame, time);
        self.render_visualizer(frame, visualizer);
        self.render_song_info(frame, info);

        self.progress_area = progress;
        let label = format!(
            "{} / {}",
            format_time(self.state.current_time),
            format_time(self.state.duration)
        );
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(ACCENT).bg(DISPLAY_BG))
            .ratio(self.state.progress())
            .label(label);
        frame.render_widget(gauge, progress);

        self.volume_area = volume;
        let volume_gauge = LineGauge::default()
            .filled_style(Style::default().fg(DISPLAY_FG))
            .ratio(f64::from(self.state.volume).clamp(0., 1.))
            .label(format!("VOL {:>3}%", (self.state.volume * 100.).round() as u32));
        frame.render_widget(volume_gauge, volume);

        frame.render_widget(self.controls(), controls);
    }

    fn render_time(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().bg(DISPLAY_BG);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let indicator = match self.state.playback {
            Playback::Playing => "▶",
            Playback::Paused => "❚❚",
            Playback::Stopped => "■",
            Playback::Loading => "…",
            Playback::Idle => " ",
        };
        let [icon, digits] =
            Layout::horizontal([Constraint::Length(2), Constraint::Fill(1)]).areas(inner);
        frame.render_widget(Paragraph::new(indicator).fg(DISPLAY_FG), icon);
        let big = BigText::builder()
            .pixel_size(PixelSize::Quadrant)
            .style(Style::default().fg(DISPLAY_FG))
            .lines(vec![format_time(self.state.current_time).into()])
            .build();
        frame.render_widget(big, digits);
    }

    fn render_visualizer(&self, frame: &mut Frame, area: Rect) {
        let bars: Vec<Bar> = heights(&self.state.visualizer_bars)
            .iter()
            .map(|&h| Bar::default().value(h).text_value(String::new()))
            .collect();
        let chart = BarChart::default()
            .block(Block::bordered().bg(DISPLAY_BG))
            .data(BarGroup::default().bars(&bars))
            .bar_width(1)
            .bar_gap(0)
            .max(255)
            .bar_style(Style::default().fg(DISPLAY_FG));
        frame.render_widget(chart, area);
    }

    fn render_song_info(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().bg(DISPLAY_BG);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let name = self
            .state
            .current_song()
            .map_or("Select songs (o)", |t| t.name.as_str());
        let title = marquee(
            name,
            inner.width as usize,
            (self.frame_count / MARQUEE_SPEED) as usize,
        );

        let details = match &self.state.track_info {
            Some(info) => {
                let kbps = info.kbps.map_or_else(|| "--".to_string(), |k| k.to_string());
                let khz = (f64::from(info.sample_rate) / 1000.).round();
                let stereo = if info.is_stereo() {
                    "stereo".fg(DISPLAY_FG)
                } else {
                    "mono".fg(DISPLAY_FG)
                };
                Line::from(vec![
                    format!("{kbps} kbps  ").fg(DISPLAY_FG),
                    format!("{khz} kHz  ").fg(DISPLAY_FG),
                    stereo,
                ])
            }
            None => Line::from("-- kbps  -- kHz").dim(),
        };
        let position = match (self.state.current_song_index, self.state.songs.len()) {
            (Some(i), len) => format!("track {}/{}", i + 1, len),
            (None, _) => String::new(),
        };
        let text = vec![
            Line::from(title).fg(DISPLAY_FG),
            Line::from(""),
            details,
            Line::from(position).dim(),
        ];
        frame.render_widget(Paragraph::new(text), inner);
    }

    fn controls(&self) -> Paragraph<'static> {
        let key = |k: &'static str| k.fg(ACCENT).bold();
        let on = |active: bool, label: &'static str| {
            if active {
                label.fg(DISPLAY_FG).bold()
            } else {
                label.fg(FRAME_FG)
            }
        };
        let transport = Line::from(vec![
            key("z"),
            " ⏮  ".into(),
            key("x"),
            " ▶  ".into(),
            key("c"),
            " ❚❚  ".into(),
            key("v"),
            " ■  ".into(),
            key("b"),
            " ⏭     ".into(),
            key("o"),
            " ⏏  ".into(),
            key("e"),
            " ".into(),
            on(self.state.show_eq_panel, "EQ"),
            "  ".into(),
            key("p"),
            " ".into(),
            on(self.state.show_playlist_panel, "PL"),
        ]);
        let help = Line::from(", . seek   + - volume   click bar to seek   q quit").dim();
        Paragraph::new(vec![transport, help])
    }

    fn render_equalizer(&self, frame: &mut Frame, area: Rect) {
        let eq = &self.state.equalizer;
        let title = Line::from(vec![
            " Equalizer  ".into(),
            format!("[{}]", eq.preset().name()).fg(ACCENT),
            "  ←/→ band  ↑/↓ gain  0 reset  Tab preset ".dim(),
        ]);
        let block = Block::bordered().title(title).fg(FRAME_FG);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let [chart_area, values] =
            Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(inner);

        let span = ((MAX_GAIN_DB - MIN_GAIN_DB) * 10.) as u64;
        let bars: Vec<Bar> = eq
            .gains()
            .iter()
            .enumerate()
            .map(|(i, (freq, gain))| {
                let style = if i == eq.selected_band {
                    Style::default().fg(ACCENT)
                } else {
                    Style::default().fg(DISPLAY_FG)
                };
                Bar::default()
                    .value(((gain - MIN_GAIN_DB) * 10.).round() as u64)
                    .label(Line::from(band_label(freq)))
                    .text_value(format!("{gain:+.1}"))
                    .style(style)
            })
            .collect();
        let bar_width = (chart_area.width / BANDS.len() as u16).saturating_sub(1).clamp(3, 9);
        let chart = BarChart::default()
            .data(BarGroup::default().bars(&bars))
            .bar_width(bar_width)
            .bar_gap(1)
            .max(span);
        frame.render_widget(chart, chart_area);

        let presets: Vec<Span> = Preset::ALL
            .iter()
            .flat_map(|p| {
                let name = if *p == eq.preset() {
                    p.name().fg(ACCENT).bold()
                } else {
                    p.name().dim()
                };
                [name, "  ".into()]
            })
            .collect();
        frame.render_widget(Paragraph::new(Line::from(presets)), values);
    }

    fn render_playlist(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered()
            .title(" Playlist ")
            .title_bottom(" ↑/↓ move  Enter play ".dim())
            .fg(FRAME_FG);

        if self.state.songs.is_empty() {
            let empty = Paragraph::new("No songs.").dim().block(block);
            frame.render_widget(empty, area);
            return;
        }

        let items: Vec<ListItem> = self
            .state
            .songs
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let line = format!("{:>3}. {}", i + 1, track.name);
                if Some(i) == self.state.current_song_index {
                    ListItem::new(line).fg(DISPLAY_FG).bold()
                } else {
                    ListItem::new(line).fg(FRAME_FG)
                }
            })
            .collect();
        let list = List::new(items)
            .block(block)
            .highlight_symbol("» ")
            .highlight_style(Style::default().bg(Color::DarkGray));
        frame.render_stateful_widget(list, area, &mut self.playlist);
    }

    fn popup_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
        let vertical = Layout::vertical([Constraint::Percentage(percent_y)]).flex(Flex::Center);
        let horizontal = Layout::horizontal([Constraint::Percentage(percent_x)]).flex(Flex::Center);
        let [area] = vertical.areas(area);
        let [area] = horizontal.areas(area);
        area
    }
}

/// Where inside `area` a click at `column` landed, as `0.0..=1.0`.
fn click_fraction(area: Rect, column: u16) -> f64 {
    if area.width == 0 {
        return 0.;
    }
    (f64::from(column.saturating_sub(area.x)) / f64::from(area.width)).clamp(0., 1.)
}

pub fn format_time(secs: f64) -> String {
    if !secs.is_finite() || secs < 0. {
        return "00:00".to_string();
    }
    let secs = secs as u64;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn band_label(freq: u32) -> String {
    if freq >= 1000 {
        let khz = f64::from(freq) / 1000.;
        if freq % 1000 == 0 {
            format!("{khz:.0}k")
        } else {
            format!("{khz:.1}k")
        }
    } else {
        freq.to_string()
    }
}

fn toggle_mark(marked: &mut Vec<PathBuf>, path: PathBuf) {
    match marked.iter().position(|p| *p == path) {
        Some(i) => {
            marked.remove(i);
        }
        None => marked.push(path),
    }
}

/// Scrolls `text` leftwards inside `width` columns; short text stays put.
fn marquee(text: &str, width: usize, offset: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let looped: Vec<char> = chars
        .iter()
        .copied()
        .chain(MARQUEE_SEPARATOR.chars())
        .collect();
    let start = offset % looped.len();
    looped.iter().cycle().skip(start).take(width).collect()
}

pub fn run(
    state: PlayerState,
    initial_selection: Vec<PathBuf>,
    config: &Config,
    command_tx: Sender<PlayerCommand>,
    event_rx: Receiver<PlayerEvent>,
    window: AnalyserWindow,
) -> Result<()> {
    let theme = Theme::default()
        .add_default_title()
        .with_item_style(Style::default().fg(FRAME_FG));
    let file_explorer = FileExplorer::with_theme(theme)?;

    let mut app = App::new(
        state,
        file_explorer,
        Analyser::new(window),
        command_tx,
        event_rx,
        config,
    );
    let volume = app.state.volume;
    app.dispatch(Event::SetVolume(volume));
    if !initial_selection.is_empty() {
        app.dispatch(Event::FilesSelected(initial_selection));
    }

    let terminal = ratatui::init();
    crossterm::execute!(std::io::stdout(), EnableMouseCapture)?;
    let app_result = app.run(terminal);
    crossterm::execute!(std::io::stdout(), DisableMouseCapture)?;
    ratatui::restore();
    app_result
}
